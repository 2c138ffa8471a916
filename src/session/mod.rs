/// Session persistence
///
/// A session is created at login and bound 1:1 to the digest of its current
/// refresh token. Its id doubles as the `session_id` claim in both tokens.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::StoreError;

pub use memory::InMemorySessionStore;
pub use postgres::PgSessionStore;

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub ip_address: String,
    pub user_agent: String,
    /// Liveness flag, independent of `expires_at`
    pub valid: bool,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub refresh_token_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        id: Uuid,
        user_id: Uuid,
        ip_address: String,
        user_agent: String,
        refresh_token_hash: String,
        expires_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id,
            ip_address,
            user_agent,
            valid: true,
            expires_at,
            refresh_token_hash,
            created_at: now,
            updated_at: now,
        }
    }

    /// Valid and strictly before its expiry
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.valid && now < self.expires_at
    }
}

/// Sparse update: `None` leaves the stored field untouched, and so does an
/// empty string.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionPatch {
    pub refresh_token_hash: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub valid: Option<bool>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SessionPatch {
    /// Patch recording one refresh rotation
    pub fn rotation(
        refresh_token_hash: String,
        expires_at: DateTime<Utc>,
        ip_address: String,
        user_agent: String,
    ) -> Self {
        Self {
            refresh_token_hash: Some(refresh_token_hash),
            expires_at: Some(expires_at),
            ip_address: Some(ip_address),
            user_agent: Some(user_agent),
            valid: None,
            updated_at: Some(Utc::now()),
        }
    }

    pub fn apply(&self, session: &mut Session) {
        if let Some(hash) = non_empty(&self.refresh_token_hash) {
            session.refresh_token_hash = hash.to_string();
        }
        if let Some(expires_at) = self.expires_at {
            session.expires_at = expires_at;
        }
        if let Some(ip) = non_empty(&self.ip_address) {
            session.ip_address = ip.to_string();
        }
        if let Some(ua) = non_empty(&self.user_agent) {
            session.user_agent = ua.to_string();
        }
        if let Some(valid) = self.valid {
            session.valid = valid;
        }
        if let Some(updated_at) = self.updated_at {
            session.updated_at = updated_at;
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionFilter {
    pub user_id: Option<Uuid>,
    pub valid: Option<bool>,
}

impl SessionFilter {
    pub fn matches(&self, session: &Session) -> bool {
        self.user_id.map_or(true, |id| session.user_id == id)
            && self.valid.map_or(true, |valid| session.valid == valid)
    }
}

/// Durable owner of session records.
///
/// Implementations must be safe for concurrent use. `compare_and_update` is
/// the only write the refresh rotation uses, so two racing refreshes of one
/// session cannot both commit.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fails with `Conflict` if the id already exists.
    async fn create(&self, session: &Session) -> Result<(), StoreError>;

    /// `Ok(None)` when no session has this id.
    async fn get_by_id(&self, id: Uuid) -> Result<Option<Session>, StoreError>;

    /// Sets `valid = false` without removing the record.
    async fn invalidate(&self, id: Uuid) -> Result<(), StoreError>;

    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;

    /// Partial merge; returns the stored session after the merge.
    async fn update(&self, id: Uuid, patch: SessionPatch) -> Result<Session, StoreError>;

    /// Partial merge applied only while the stored refresh digest equals
    /// `expected_hash`; otherwise `Conflict`.
    async fn compare_and_update(
        &self,
        id: Uuid,
        expected_hash: &str,
        patch: SessionPatch,
    ) -> Result<Session, StoreError>;

    /// Sessions matching the filter, oldest first.
    async fn list(&self, filter: SessionFilter) -> Result<Vec<Session>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session() -> Session {
        Session::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "10.0.0.1".to_string(),
            "agent/1.0".to_string(),
            "hash-1".to_string(),
            Utc::now() + Duration::days(1),
        )
    }

    #[test]
    fn test_patch_leaves_unspecified_fields() {
        let mut s = session();
        let before = s.clone();

        SessionPatch {
            refresh_token_hash: Some("hash-2".to_string()),
            ..Default::default()
        }
        .apply(&mut s);

        assert_eq!(s.refresh_token_hash, "hash-2");
        assert_eq!(s.ip_address, before.ip_address);
        assert_eq!(s.user_agent, before.user_agent);
        assert_eq!(s.expires_at, before.expires_at);
        assert!(s.valid);
    }

    #[test]
    fn test_patch_ignores_empty_strings() {
        let mut s = session();
        SessionPatch {
            ip_address: Some(String::new()),
            user_agent: Some(String::new()),
            ..Default::default()
        }
        .apply(&mut s);

        assert_eq!(s.ip_address, "10.0.0.1");
        assert_eq!(s.user_agent, "agent/1.0");
    }

    #[test]
    fn test_usable_requires_valid_and_unexpired() {
        let now = Utc::now();
        let mut s = session();
        assert!(s.is_usable_at(now));

        s.valid = false;
        assert!(!s.is_usable_at(now));

        s.valid = true;
        assert!(!s.is_usable_at(s.expires_at));
    }

    #[test]
    fn test_filter_matches() {
        let s = session();
        assert!(SessionFilter::default().matches(&s));
        assert!(SessionFilter { user_id: Some(s.user_id), valid: Some(true) }.matches(&s));
        assert!(!SessionFilter { user_id: Some(Uuid::new_v4()), valid: None }.matches(&s));
        assert!(!SessionFilter { user_id: None, valid: Some(false) }.matches(&s));
    }
}
