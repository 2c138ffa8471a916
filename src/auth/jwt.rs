/// JWT Token Codec
///
/// Issues and verifies the two token classes. Each class has its own HMAC
/// secret and lifetime; a token signed for one class never verifies as the
/// other. The codec holds no mutable state and is shared across workers.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::auth::claims::{AccessClaims, ClaimsPayload, RefreshClaims};
use crate::configuration::JwtSettings;
use crate::error::{ConfigError, TokenError};

/// Tolerated clock skew for `exp` and `nbf`, in seconds
pub const LEEWAY_SECONDS: u64 = 5;

const ALGORITHM: Algorithm = Algorithm::HS256;

/// An access/refresh token pair. Never persisted as a whole.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
    /// Unique id of the access token
    pub jti: Uuid,
    /// Session id shared by both tokens
    pub session_id: Uuid,
}

#[derive(Clone)]
struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl SigningKeys {
    fn new(secret: &str, ttl_seconds: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::seconds(ttl_seconds),
        }
    }
}

/// Stateless signer/verifier for access and refresh tokens
#[derive(Clone)]
pub struct TokenCodec {
    access: SigningKeys,
    refresh: SigningKeys,
    issuer: String,
}

impl TokenCodec {
    /// Build a codec from settings.
    ///
    /// # Errors
    /// Returns `ConfigError` if either secret is empty, the secrets are
    /// identical, or a lifetime is not positive.
    pub fn new(settings: &JwtSettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            access: SigningKeys::new(&settings.access_secret, settings.access_token_expiry),
            refresh: SigningKeys::new(&settings.refresh_secret, settings.refresh_token_expiry),
            issuer: settings.issuer.clone(),
        })
    }

    pub fn access_ttl(&self) -> Duration {
        self.access.ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh.ttl
    }

    /// Issue a pair for a brand-new session (fresh session id).
    pub fn issue_pair(
        &self,
        user_id: Uuid,
        email: &str,
        username: &str,
        roles: &[String],
    ) -> Result<TokenPair, TokenError> {
        self.issue_pair_at(Uuid::new_v4(), user_id, email, username, roles, Utc::now())
    }

    /// Issue a pair for an existing session, keeping its session id.
    pub fn issue_pair_for_session(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        email: &str,
        username: &str,
        roles: &[String],
    ) -> Result<TokenPair, TokenError> {
        self.issue_pair_at(session_id, user_id, email, username, roles, Utc::now())
    }

    pub(crate) fn issue_pair_at(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        email: &str,
        username: &str,
        roles: &[String],
        now: DateTime<Utc>,
    ) -> Result<TokenPair, TokenError> {
        let access_expires_at = now + self.access.ttl;
        let refresh_expires_at = now + self.refresh.ttl;
        let jti = Uuid::new_v4();

        let access_claims = AccessClaims {
            sub: user_id.to_string(),
            email: email.to_string(),
            username: username.to_string(),
            roles: roles.to_vec(),
            jti: jti.to_string(),
            session_id: session_id.to_string(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: access_expires_at.timestamp(),
            iss: self.issuer.clone(),
        };

        let refresh_claims = RefreshClaims {
            sub: user_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: refresh_expires_at.timestamp(),
            iss: self.issuer.clone(),
        };

        let access_token = sign(&access_claims, &self.access.encoding)?;
        let refresh_token = sign(&refresh_claims, &self.refresh.encoding)?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            access_expires_at,
            refresh_expires_at,
            jti,
            session_id,
        })
    }

    /// Verify an access token and return its payload.
    pub fn verify_access(&self, token: &str) -> Result<ClaimsPayload, TokenError> {
        let claims: AccessClaims = self.verify(token, &self.access.decoding)?;
        ClaimsPayload::try_from(claims)
    }

    /// Verify a refresh token and return its payload.
    ///
    /// Refresh payloads carry subject, session id, jti and expiry only.
    pub fn verify_refresh(&self, token: &str) -> Result<ClaimsPayload, TokenError> {
        let claims: RefreshClaims = self.verify(token, &self.refresh.decoding)?;
        ClaimsPayload::try_from(claims)
    }

    fn verify<T: DeserializeOwned>(&self, token: &str, key: &DecodingKey) -> Result<T, TokenError> {
        if token.is_empty() {
            return Err(TokenError::Malformed);
        }

        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = LEEWAY_SECONDS;
        validation.validate_nbf = true;
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "nbf", "sub", "iss"]);

        decode::<T>(token, key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                let err = classify(e.kind());
                tracing::debug!(error = %err, "Token verification failed");
                err
            })
    }
}

fn sign<T: serde::Serialize>(claims: &T, key: &EncodingKey) -> Result<String, TokenError> {
    encode(&Header::new(ALGORITHM), claims, key).map_err(|e| {
        tracing::error!(error = %e, "Failed to sign token");
        TokenError::Signing(e.to_string())
    })
}

fn classify(kind: &ErrorKind) -> TokenError {
    match kind {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        ErrorKind::InvalidSignature => TokenError::BadSignature,
        ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => TokenError::WrongAlgorithm,
        _ => TokenError::Malformed,
    }
}
