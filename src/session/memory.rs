use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Session, SessionFilter, SessionPatch, SessionStore};
use crate::auth::digests_match;
use crate::error::StoreError;

/// Process-local session store.
///
/// Every write takes the map's write lock, which serialises read-modify-write
/// sequences on the same id.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, session: &Session) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(StoreError::Conflict);
        }
        sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn invalidate(&self, id: Uuid) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&id).ok_or(StoreError::NotFound)?;
        session.valid = false;
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.sessions
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn update(&self, id: Uuid, patch: SessionPatch) -> Result<Session, StoreError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&id).ok_or(StoreError::NotFound)?;
        patch.apply(session);
        Ok(session.clone())
    }

    async fn compare_and_update(
        &self,
        id: Uuid,
        expected_hash: &str,
        patch: SessionPatch,
    ) -> Result<Session, StoreError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&id).ok_or(StoreError::NotFound)?;
        if !digests_match(&session.refresh_token_hash, expected_hash) {
            return Err(StoreError::Conflict);
        }
        patch.apply(session);
        Ok(session.clone())
    }

    async fn list(&self, filter: SessionFilter) -> Result<Vec<Session>, StoreError> {
        let sessions = self.sessions.read().await;
        let mut matching: Vec<Session> = sessions
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        matching.sort_by_key(|s| s.created_at);
        Ok(matching)
    }
}
