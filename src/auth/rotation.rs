/// Refresh Token Rotation
///
/// Exchanges a refresh token for a new pair on the same session. A refresh
/// token that verifies but no longer matches its session's stored digest is
/// a replay of an older generation, so the whole session is deleted.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::auth::jwt::{TokenCodec, TokenPair};
use crate::auth::token_hash::{hash_token, token_matches};
use crate::error::{AppError, AuthError, StoreError};
use crate::session::{SessionPatch, SessionStore};
use crate::users::{User, UserStore};

#[derive(Clone)]
pub struct RefreshRotation {
    codec: TokenCodec,
    sessions: Arc<dyn SessionStore>,
    users: Arc<dyn UserStore>,
}

impl RefreshRotation {
    pub fn new(
        codec: TokenCodec,
        sessions: Arc<dyn SessionStore>,
        users: Arc<dyn UserStore>,
    ) -> Self {
        Self {
            codec,
            sessions,
            users,
        }
    }

    /// Rotate the session bound to `refresh_token`.
    ///
    /// # Errors
    /// - `Auth(TokenInvalid)` if the token does not verify (no store access)
    /// - `Auth(SessionRevoked)` if the session is gone, invalid or expired
    /// - `Auth(ReuseDetected)` if the token is not the session's current one,
    ///   or a concurrent rotation committed first; the session is deleted
    pub async fn rotate(
        &self,
        refresh_token: &str,
        ip_address: String,
        user_agent: String,
    ) -> Result<(TokenPair, User), AppError> {
        let claims = self.codec.verify_refresh(refresh_token).map_err(|e| {
            tracing::debug!(error = %e, "Refresh token rejected");
            AppError::Auth(AuthError::TokenInvalid)
        })?;
        let session_id = claims.session_id;

        let session = match self.sessions.get_by_id(session_id).await? {
            Some(session) if session.is_usable_at(Utc::now()) => session,
            _ => return Err(AuthError::SessionRevoked.into()),
        };

        if !token_matches(&session.refresh_token_hash, refresh_token) {
            return Err(self.revoke_compromised(session_id, session.user_id).await);
        }

        let user = self
            .users
            .by_id(session.user_id)
            .await?
            .ok_or(AppError::Auth(AuthError::TokenInvalid))?;

        let pair = self.codec.issue_pair_for_session(
            session_id,
            user.id,
            &user.email,
            &user.username,
            &user.roles(),
        )?;

        let patch = SessionPatch::rotation(
            hash_token(&pair.refresh_token),
            pair.refresh_expires_at,
            ip_address,
            user_agent,
        );
        match self
            .sessions
            .compare_and_update(session_id, &session.refresh_token_hash, patch)
            .await
        {
            Ok(_) => {}
            Err(StoreError::Conflict) => {
                return Err(self.revoke_compromised(session_id, user.id).await);
            }
            Err(StoreError::NotFound) => return Err(AuthError::SessionRevoked.into()),
            Err(e) => return Err(e.into()),
        }

        tracing::info!(user_id = %user.id, session_id = %session_id, "Session rotated");
        Ok((pair, user))
    }

    async fn revoke_compromised(&self, session_id: Uuid, user_id: Uuid) -> AppError {
        tracing::warn!(
            session_id = %session_id,
            user_id = %user_id,
            "Refresh token reuse detected, deleting session"
        );

        match self.sessions.delete(session_id).await {
            Ok(()) | Err(StoreError::NotFound) => AuthError::ReuseDetected.into(),
            Err(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::JwtSettings;
    use crate::session::{InMemorySessionStore, Session, SessionFilter};
    use crate::users::{InMemoryUserStore, Role};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Barrier;

    /// Counts lookups and conditional writes, delegating to an in-memory store.
    ///
    /// `cas_barrier` holds every conditional write until all parties arrive,
    /// so concurrent rotations all read the same digest before any commits.
    #[derive(Default)]
    struct CountingStore {
        inner: InMemorySessionStore,
        lookups: AtomicUsize,
        cas_calls: AtomicUsize,
        reject_cas: AtomicBool,
        cas_barrier: Option<Barrier>,
    }

    #[async_trait]
    impl SessionStore for CountingStore {
        async fn create(&self, session: &Session) -> Result<(), StoreError> {
            self.inner.create(session).await
        }

        async fn get_by_id(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.inner.get_by_id(id).await
        }

        async fn invalidate(&self, id: Uuid) -> Result<(), StoreError> {
            self.inner.invalidate(id).await
        }

        async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
            self.inner.delete(id).await
        }

        async fn update(&self, id: Uuid, patch: SessionPatch) -> Result<Session, StoreError> {
            self.inner.update(id, patch).await
        }

        async fn compare_and_update(
            &self,
            id: Uuid,
            expected_hash: &str,
            patch: SessionPatch,
        ) -> Result<Session, StoreError> {
            self.cas_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(barrier) = &self.cas_barrier {
                barrier.wait().await;
            }
            if self.reject_cas.load(Ordering::SeqCst) {
                return Err(StoreError::Conflict);
            }
            self.inner.compare_and_update(id, expected_hash, patch).await
        }

        async fn list(&self, filter: SessionFilter) -> Result<Vec<Session>, StoreError> {
            self.inner.list(filter).await
        }
    }

    struct Fixture {
        rotation: RefreshRotation,
        codec: TokenCodec,
        sessions: Arc<CountingStore>,
        user: User,
    }

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

    async fn fixture() -> Fixture {
        fixture_with(CountingStore::default()).await
    }

    async fn fixture_with(store: CountingStore) -> Fixture {
        let codec = codec();
        let sessions = Arc::new(store);
        let users = Arc::new(InMemoryUserStore::new());
        let user = User::new(
            "alice".to_string(),
            "Alice Liddell".to_string(),
            "alice@example.com".to_string(),
            "digest".to_string(),
            Role::User,
        );
        users.create(&user).await.unwrap();

        Fixture {
            rotation: RefreshRotation::new(codec.clone(), sessions.clone(), users),
            codec,
            sessions,
            user,
        }
    }

    async fn login(f: &Fixture) -> TokenPair {
        let pair = f
            .codec
            .issue_pair(f.user.id, &f.user.email, &f.user.username, &f.user.roles())
            .unwrap();
        let session = Session::new(
            pair.session_id,
            f.user.id,
            "10.0.0.1".to_string(),
            "agent/1".to_string(),
            hash_token(&pair.refresh_token),
            pair.refresh_expires_at,
        );
        f.sessions.create(&session).await.unwrap();
        pair
    }

    async fn rotate(f: &Fixture, token: &str) -> Result<(TokenPair, User), AppError> {
        f.rotation
            .rotate(token, "10.0.0.2".to_string(), "agent/2".to_string())
            .await
    }

    #[tokio::test]
    async fn test_two_rotations_keep_session_id() {
        let f = fixture().await;
        let p1 = login(&f).await;
        let h1 = hash_token(&p1.refresh_token);

        let (p2, user) = rotate(&f, &p1.refresh_token).await.unwrap();
        let h2 = f.sessions.get_by_id(p1.session_id).await.unwrap().unwrap().refresh_token_hash;
        let (p3, _) = rotate(&f, &p2.refresh_token).await.unwrap();
        let stored = f.sessions.get_by_id(p1.session_id).await.unwrap().unwrap();

        assert_eq!(user.id, f.user.id);
        assert_eq!(p2.session_id, p1.session_id);
        assert_eq!(p3.session_id, p1.session_id);
        assert_ne!(p2.refresh_token, p1.refresh_token);
        assert_ne!(h1, h2);
        assert_ne!(h2, stored.refresh_token_hash);
        assert_eq!(stored.refresh_token_hash, hash_token(&p3.refresh_token));
        assert_eq!(stored.ip_address, "10.0.0.2");
        assert_eq!(stored.user_agent, "agent/2");
    }

    #[tokio::test]
    async fn test_stale_token_deletes_session() {
        let f = fixture().await;
        let p1 = login(&f).await;
        let (p2, _) = rotate(&f, &p1.refresh_token).await.unwrap();

        assert!(matches!(
            rotate(&f, &p1.refresh_token).await,
            Err(AppError::Auth(AuthError::ReuseDetected))
        ));
        assert_eq!(f.sessions.get_by_id(p1.session_id).await.unwrap(), None);

        assert!(matches!(
            rotate(&f, &p2.refresh_token).await,
            Err(AppError::Auth(AuthError::SessionRevoked))
        ));
    }

    #[tokio::test]
    async fn test_invalid_token_skips_store() {
        let f = fixture().await;
        let p1 = login(&f).await;

        for token in ["", "not-a-jwt", p1.access_token.as_str()] {
            assert!(matches!(
                rotate(&f, token).await,
                Err(AppError::Auth(AuthError::TokenInvalid))
            ));
        }
        assert_eq!(f.sessions.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalidated_session_rejected() {
        let f = fixture().await;
        let p1 = login(&f).await;
        f.sessions.invalidate(p1.session_id).await.unwrap();

        assert!(matches!(
            rotate(&f, &p1.refresh_token).await,
            Err(AppError::Auth(AuthError::SessionRevoked))
        ));
        // Revocation is not a reuse signal; the record stays for audit.
        assert!(f.sessions.get_by_id(p1.session_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expired_session_rejected() {
        let f = fixture().await;
        let p1 = login(&f).await;
        f.sessions
            .update(
                p1.session_id,
                SessionPatch {
                    expires_at: Some(Utc::now() - chrono::Duration::seconds(1)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert!(matches!(
            rotate(&f, &p1.refresh_token).await,
            Err(AppError::Auth(AuthError::SessionRevoked))
        ));
    }

    #[tokio::test]
    async fn test_cas_conflict_deletes_session() {
        let f = fixture().await;
        let p1 = login(&f).await;
        f.sessions.reject_cas.store(true, Ordering::SeqCst);

        assert!(matches!(
            rotate(&f, &p1.refresh_token).await,
            Err(AppError::Auth(AuthError::ReuseDetected))
        ));
        assert_eq!(f.sessions.cas_calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.sessions.get_by_id(p1.session_id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sequential_replay_single_winner() {
        let f = fixture().await;
        let p1 = login(&f).await;

        let (a, b) = tokio::join!(rotate(&f, &p1.refresh_token), rotate(&f, &p1.refresh_token));

        let winners = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(winners, 1);
        let loser = if a.is_ok() { b } else { a };
        assert!(matches!(loser, Err(AppError::Auth(AuthError::ReuseDetected))));
    }

    #[tokio::test]
    async fn test_racing_rotations_lose_at_cas() {
        let f = fixture_with(CountingStore {
            cas_barrier: Some(Barrier::new(2)),
            ..Default::default()
        })
        .await;
        let p1 = login(&f).await;

        let (a, b) = tokio::join!(rotate(&f, &p1.refresh_token), rotate(&f, &p1.refresh_token));

        // Both passed the digest check and reached the conditional write.
        assert_eq!(f.sessions.cas_calls.load(Ordering::SeqCst), 2);
        let winners = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(winners, 1);
        let loser = if a.is_ok() { b } else { a };
        assert!(matches!(loser, Err(AppError::Auth(AuthError::ReuseDetected))));
        assert_eq!(f.sessions.get_by_id(p1.session_id).await.unwrap(), None);
    }
}
