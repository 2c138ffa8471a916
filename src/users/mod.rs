/// User records consumed by the auth flows.
///
/// The session service only needs lookup by id/email and creation; richer
/// user management lives elsewhere.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::StoreError;

pub use memory::InMemoryUserStore;
pub use postgres::PgUserStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub fullname: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(
        username: String,
        fullname: String,
        email: String,
        password_hash: String,
        role: Role,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            username,
            fullname,
            email,
            password_hash,
            role,
            created_at: now,
            updated_at: now,
        }
    }

    /// Role list embedded in access tokens
    pub fn roles(&self) -> Vec<String> {
        vec![self.role.as_str().to_string()]
    }
}

/// User lookup and creation collaborator
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with `Conflict` if the email is already registered.
    async fn create(&self, user: &User) -> Result<(), StoreError>;

    async fn by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// Emails are compared case-insensitively.
    async fn by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
}
