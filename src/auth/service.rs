/// Authentication Orchestrator
///
/// Composes the token codec, session store, user store and credential
/// verifier into registration, login, session validation and logout.

use std::sync::Arc;

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::jwt::{TokenCodec, TokenPair};
use crate::auth::password::{validate_password_strength, CredentialVerifier};
use crate::auth::token_hash::hash_token;
use crate::error::{AppError, AuthError, StoreError};
use crate::session::{Session, SessionFilter, SessionStore};
use crate::users::{Role, User, UserStore};
use crate::validators::{is_valid_email, is_valid_name, is_valid_username, normalize_email};

/// User registration request
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub username: String,
    pub fullname: String,
}

/// User login request
///
/// `ip_address` and `user_agent` override the values taken from the
/// connection when present.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

#[derive(Clone)]
pub struct AuthOrchestrator {
    codec: TokenCodec,
    sessions: Arc<dyn SessionStore>,
    users: Arc<dyn UserStore>,
    verifier: Arc<dyn CredentialVerifier>,
    // Verified against when the email is unknown, so both login failures cost
    // one hash comparison.
    dummy_hash: String,
}

impl AuthOrchestrator {
    pub fn new(
        codec: TokenCodec,
        sessions: Arc<dyn SessionStore>,
        users: Arc<dyn UserStore>,
        verifier: Arc<dyn CredentialVerifier>,
    ) -> Result<Self, AppError> {
        let filler: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        let dummy_hash = verifier.hash(&filler)?;

        Ok(Self {
            codec,
            sessions,
            users,
            verifier,
            dummy_hash,
        })
    }

    /// Register a new user with role `user`.
    ///
    /// # Errors
    /// - `Validation` for malformed input or a weak password
    /// - `Auth(EmailTaken)` if the email is already registered
    pub async fn register(&self, request: RegisterRequest) -> Result<User, AppError> {
        let email = is_valid_email(&request.email)?;
        let username = is_valid_username(&request.username)?;
        let fullname = is_valid_name(&request.fullname)?;
        validate_password_strength(&request.password)?;

        if self.users.by_email(&email).await?.is_some() {
            return Err(AuthError::EmailTaken.into());
        }

        let password_hash = self.verifier.hash(&request.password)?;
        let user = User::new(username, fullname, email, password_hash, Role::User);

        self.users.create(&user).await.map_err(|e| match e {
            StoreError::Conflict => AppError::Auth(AuthError::EmailTaken),
            other => other.into(),
        })?;

        tracing::info!(user_id = %user.id, "User registered");
        Ok(user)
    }

    /// Check credentials and return the user.
    ///
    /// Unknown email and wrong password both yield `InvalidCredentials`
    /// after one hash verification.
    pub async fn login(&self, request: &LoginRequest) -> Result<User, AppError> {
        let email = normalize_email(&request.email);
        let user = self.users.by_email(&email).await?;

        let digest = user
            .as_ref()
            .map_or(self.dummy_hash.as_str(), |u| u.password_hash.as_str());
        let verified = match self.verifier.verify(digest, &request.password) {
            Ok(matched) => matched,
            Err(e) => {
                tracing::error!(error = %e, "Password verification failed");
                false
            }
        };

        match user {
            Some(user) if verified => {
                tracing::info!(user_id = %user.id, "Login succeeded");
                Ok(user)
            }
            _ => {
                tracing::warn!("Login failed");
                Err(AuthError::InvalidCredentials.into())
            }
        }
    }

    /// Open a new session for `user` and issue its first token pair.
    pub async fn start_session(
        &self,
        user: &User,
        ip_address: String,
        user_agent: String,
    ) -> Result<TokenPair, AppError> {
        let pair = self
            .codec
            .issue_pair(user.id, &user.email, &user.username, &user.roles())?;

        let session = Session::new(
            pair.session_id,
            user.id,
            ip_address,
            user_agent,
            hash_token(&pair.refresh_token),
            pair.refresh_expires_at,
        );
        self.sessions.create(&session).await?;

        tracing::info!(user_id = %user.id, session_id = %session.id, "Session started");
        Ok(pair)
    }

    /// Resolve a usable session by id.
    ///
    /// Absent, invalidated and expired sessions all yield `SessionNotFound`.
    pub async fn validate_token(&self, session_id: Uuid) -> Result<Session, AppError> {
        match self.sessions.get_by_id(session_id).await? {
            Some(session) if session.is_usable_at(Utc::now()) => Ok(session),
            _ => Err(AuthError::SessionNotFound.into()),
        }
    }

    /// Resolve session, then its owner.
    pub async fn get_me(&self, session_id: Uuid) -> Result<User, AppError> {
        let session = self.validate_token(session_id).await?;
        self.users
            .by_id(session.user_id)
            .await?
            .ok_or_else(|| AuthError::UserNotFound.into())
    }

    /// Mark a session invalid. Unknown ids are treated as already invalid.
    pub async fn invalidate_session(&self, session_id: Uuid) -> Result<(), AppError> {
        match self.sessions.invalidate(session_id).await {
            Ok(()) => {
                tracing::info!(session_id = %session_id, "Session invalidated");
                Ok(())
            }
            Err(StoreError::NotFound) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Invalidate a session only if `user_id` owns it.
    ///
    /// A session owned by someone else is reported as not found.
    pub async fn invalidate_own_session(
        &self,
        user_id: Uuid,
        session_id: Uuid,
    ) -> Result<(), AppError> {
        match self.sessions.get_by_id(session_id).await? {
            Some(session) if session.user_id == user_id => {
                self.invalidate_session(session_id).await
            }
            _ => Err(StoreError::NotFound.into()),
        }
    }

    /// Delete a session. Deleting an absent session succeeds.
    pub async fn logout(&self, session_id: Uuid) -> Result<(), AppError> {
        match self.sessions.delete(session_id).await {
            Ok(()) => {
                tracing::info!(session_id = %session_id, "Session logged out");
                Ok(())
            }
            Err(StoreError::NotFound) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list_sessions(&self, filter: SessionFilter) -> Result<Vec<Session>, AppError> {
        Ok(self.sessions.list(filter).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::BcryptVerifier;
    use crate::configuration::JwtSettings;
    use crate::session::InMemorySessionStore;
    use crate::users::InMemoryUserStore;

    fn codec() -> TokenCodec {
        TokenCodec::new(&JwtSettings {
            access_secret: "access-secret-for-tests".to_string(),
            refresh_secret: "refresh-secret-for-tests".to_string(),
            access_token_expiry: 900,
            refresh_token_expiry: 86400,
            issuer: "sessiond".to_string(),
        })
        .unwrap()
    }

    fn orchestrator() -> (AuthOrchestrator, Arc<InMemorySessionStore>, Arc<InMemoryUserStore>) {
        let sessions = Arc::new(InMemorySessionStore::new());
        let users = Arc::new(InMemoryUserStore::new());
        let service = AuthOrchestrator::new(
            codec(),
            sessions.clone(),
            users.clone(),
            Arc::new(BcryptVerifier::new(4)),
        )
        .unwrap();
        (service, sessions, users)
    }

    fn alice() -> RegisterRequest {
        RegisterRequest {
            email: "Alice@Example.com".to_string(),
            password: "Password123".to_string(),
            username: "alice".to_string(),
            fullname: "Alice Liddell".to_string(),
        }
    }

    fn login(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
            ip_address: None,
            user_agent: None,
        }
    }

    fn assert_invalid_credentials(result: Result<User, AppError>) {
        match result {
            Err(AppError::Auth(AuthError::InvalidCredentials)) => {}
            other => panic!("expected InvalidCredentials, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_register_normalises_and_hashes() {
        let (service, _, _) = orchestrator();

        let user = service.register(alice()).await.unwrap();

        assert_eq!(user.email, "alice@example.com");
        assert_eq!(user.role, Role::User);
        assert_ne!(user.password_hash, "Password123");
    }

    #[tokio::test]
    async fn test_register_duplicate_email() {
        let (service, _, _) = orchestrator();
        service.register(alice()).await.unwrap();

        let mut again = alice();
        again.username = "alice2".to_string();
        match service.register(again).await {
            Err(AppError::Auth(AuthError::EmailTaken)) => {}
            other => panic!("expected EmailTaken, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_register_rejects_weak_password() {
        let (service, _, _) = orchestrator();
        let mut request = alice();
        request.password = "password".to_string();

        assert!(matches!(
            service.register(request).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_login_failures_are_uniform() {
        let (service, _, _) = orchestrator();
        service.register(alice()).await.unwrap();

        assert_invalid_credentials(
            service.login(&login("alice@example.com", "WrongPass123")).await,
        );
        assert_invalid_credentials(
            service.login(&login("nobody@example.com", "Password123")).await,
        );
    }

    #[tokio::test]
    async fn test_login_is_case_insensitive_on_email() {
        let (service, _, _) = orchestrator();
        let registered = service.register(alice()).await.unwrap();

        let user = service
            .login(&login(" ALICE@example.com", "Password123"))
            .await
            .unwrap();
        assert_eq!(user.id, registered.id);
    }

    #[tokio::test]
    async fn test_start_session_stores_refresh_digest() {
        let (service, sessions, _) = orchestrator();
        let user = service.register(alice()).await.unwrap();

        let pair = service
            .start_session(&user, "10.0.0.1".to_string(), "agent".to_string())
            .await
            .unwrap();

        let session = sessions.get_by_id(pair.session_id).await.unwrap().unwrap();
        assert_eq!(session.user_id, user.id);
        assert_eq!(session.refresh_token_hash, hash_token(&pair.refresh_token));
        assert_eq!(session.expires_at, pair.refresh_expires_at);
        assert!(session.valid);
    }

    #[tokio::test]
    async fn test_get_me_and_validate() {
        let (service, _, _) = orchestrator();
        let user = service.register(alice()).await.unwrap();
        let pair = service
            .start_session(&user, "10.0.0.1".to_string(), "agent".to_string())
            .await
            .unwrap();

        assert_eq!(service.get_me(pair.session_id).await.unwrap().id, user.id);
        assert_eq!(
            service.validate_token(pair.session_id).await.unwrap().id,
            pair.session_id
        );

        match service.get_me(Uuid::new_v4()).await {
            Err(AppError::Auth(AuthError::SessionNotFound)) => {}
            other => panic!("expected SessionNotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_get_me_unknown_user() {
        let (service, sessions, _) = orchestrator();
        let orphan = Session::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "10.0.0.1".to_string(),
            "agent".to_string(),
            "digest".to_string(),
            Utc::now() + chrono::Duration::hours(1),
        );
        sessions.create(&orphan).await.unwrap();

        match service.get_me(orphan.id).await {
            Err(AppError::Auth(AuthError::UserNotFound)) => {}
            other => panic!("expected UserNotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalidated_session_not_found() {
        let (service, _, _) = orchestrator();
        let user = service.register(alice()).await.unwrap();
        let pair = service
            .start_session(&user, "10.0.0.1".to_string(), "agent".to_string())
            .await
            .unwrap();

        service.invalidate_session(pair.session_id).await.unwrap();
        service.invalidate_session(pair.session_id).await.unwrap();

        assert!(matches!(
            service.validate_token(pair.session_id).await,
            Err(AppError::Auth(AuthError::SessionNotFound))
        ));
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let (service, sessions, _) = orchestrator();
        let user = service.register(alice()).await.unwrap();
        let pair = service
            .start_session(&user, "10.0.0.1".to_string(), "agent".to_string())
            .await
            .unwrap();

        service.logout(pair.session_id).await.unwrap();
        service.logout(pair.session_id).await.unwrap();

        assert_eq!(sessions.get_by_id(pair.session_id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalidate_own_session_checks_owner() {
        let (service, sessions, _) = orchestrator();
        let user = service.register(alice()).await.unwrap();
        let pair = service
            .start_session(&user, "10.0.0.1".to_string(), "agent".to_string())
            .await
            .unwrap();

        assert!(matches!(
            service.invalidate_own_session(Uuid::new_v4(), pair.session_id).await,
            Err(AppError::Store(StoreError::NotFound))
        ));
        assert!(sessions.get_by_id(pair.session_id).await.unwrap().unwrap().valid);

        service
            .invalidate_own_session(user.id, pair.session_id)
            .await
            .unwrap();
        assert!(!sessions.get_by_id(pair.session_id).await.unwrap().unwrap().valid);
    }
}
