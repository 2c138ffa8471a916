/// JWT Claims structures
///
/// Access and refresh tokens carry separate claim schemas. Both carry the
/// session id (`session_id`) that joins a token to its stored session.
/// The subject is always a UUID string; no other representation is accepted.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TokenError;

/// Claims embedded in an access token
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AccessClaims {
    /// Subject (user ID as UUID string)
    pub sub: String,
    pub email: String,
    pub username: String,
    pub roles: Vec<String>,
    /// Unique token id, fresh per access token
    pub jti: String,
    /// Session id, shared with the paired refresh token
    pub session_id: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub iss: String,
}

/// Claims embedded in a refresh token
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RefreshClaims {
    pub sub: String,
    pub jti: String,
    pub session_id: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub iss: String,
}

/// Trusted result of a successful token verification.
///
/// Only `TokenCodec` builds these, from claims whose signature and
/// timestamps have already been checked.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimsPayload {
    pub user_id: Uuid,
    pub email: String,
    pub username: String,
    pub roles: Vec<String>,
    pub jti: Uuid,
    pub session_id: Uuid,
    pub expiry: DateTime<Utc>,
}

impl ClaimsPayload {
    /// Case-insensitive role membership check
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }
}

fn parse_uuid(value: &str) -> Result<Uuid, TokenError> {
    Uuid::parse_str(value).map_err(|_| TokenError::Malformed)
}

fn parse_expiry(exp: i64) -> Result<DateTime<Utc>, TokenError> {
    Utc.timestamp_opt(exp, 0)
        .single()
        .ok_or(TokenError::Malformed)
}

impl TryFrom<AccessClaims> for ClaimsPayload {
    type Error = TokenError;

    fn try_from(claims: AccessClaims) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: parse_uuid(&claims.sub)?,
            email: claims.email,
            username: claims.username,
            roles: claims.roles,
            jti: parse_uuid(&claims.jti)?,
            session_id: parse_uuid(&claims.session_id)?,
            expiry: parse_expiry(claims.exp)?,
        })
    }
}

impl TryFrom<RefreshClaims> for ClaimsPayload {
    type Error = TokenError;

    fn try_from(claims: RefreshClaims) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: parse_uuid(&claims.sub)?,
            email: String::new(),
            username: String::new(),
            roles: Vec::new(),
            jti: parse_uuid(&claims.jti)?,
            session_id: parse_uuid(&claims.session_id)?,
            expiry: parse_expiry(claims.exp)?,
        })
    }
}
