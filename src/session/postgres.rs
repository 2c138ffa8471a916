use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use super::{Session, SessionFilter, SessionPatch, SessionStore};
use crate::error::StoreError;

const UNIQUE_VIOLATION: &str = "23505";

// Empty strings and NULLs keep the stored value.
const PATCH_SET_CLAUSE: &str = r#"
    UPDATE sessions SET
        refresh_token_hash = COALESCE(NULLIF($2, ''), refresh_token_hash),
        expires_at = COALESCE($3, expires_at),
        ip_address = COALESCE(NULLIF($4, ''), ip_address),
        user_agent = COALESCE(NULLIF($5, ''), user_agent),
        valid = COALESCE($6, valid),
        updated_at = COALESCE($7, updated_at)
    WHERE id = $1
"#;

const RETURNING: &str = r#"
    RETURNING id, user_id, ip_address, user_agent, valid, expires_at,
              refresh_token_hash, created_at, updated_at
"#;

/// Postgres-backed session store (`sessions` table)
#[derive(Debug, Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn exists(&self, id: Uuid) -> Result<bool, StoreError> {
        let found = sqlx::query_scalar::<_, i32>("SELECT 1 FROM sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }
}

fn bind_patch<'q>(
    query: sqlx::query::QueryAs<'q, sqlx::Postgres, Session, sqlx::postgres::PgArguments>,
    id: Uuid,
    patch: SessionPatch,
) -> sqlx::query::QueryAs<'q, sqlx::Postgres, Session, sqlx::postgres::PgArguments> {
    query
        .bind(id)
        .bind(patch.refresh_token_hash)
        .bind(patch.expires_at)
        .bind(patch.ip_address)
        .bind(patch.user_agent)
        .bind(patch.valid)
        .bind(patch.updated_at)
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(&self, session: &Session) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO sessions
                (id, user_id, ip_address, user_agent, valid, expires_at,
                 refresh_token_hash, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(&session.ip_address)
        .bind(&session.user_agent)
        .bind(session.valid)
        .bind(session.expires_at)
        .bind(&session.refresh_token_hash)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            let duplicate = e
                .as_database_error()
                .and_then(|db| db.code())
                .map_or(false, |code| code == UNIQUE_VIOLATION);
            if duplicate {
                StoreError::Conflict
            } else {
                StoreError::from(e)
            }
        })?;

        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        let session = sqlx::query_as::<_, Session>(
            r#"
            SELECT id, user_id, ip_address, user_agent, valid, expires_at,
                   refresh_token_hash, created_at, updated_at
            FROM sessions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    async fn invalidate(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE sessions SET valid = false, updated_at = $2 WHERE id = $1")
            .bind(id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn update(&self, id: Uuid, patch: SessionPatch) -> Result<Session, StoreError> {
        let sql = format!("{}{}", PATCH_SET_CLAUSE, RETURNING);
        bind_patch(sqlx::query_as::<_, Session>(&sql), id, patch)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn compare_and_update(
        &self,
        id: Uuid,
        expected_hash: &str,
        patch: SessionPatch,
    ) -> Result<Session, StoreError> {
        // The hash predicate makes the write conditional within one statement.
        let sql = format!("{} AND refresh_token_hash = $8 {}", PATCH_SET_CLAUSE, RETURNING);
        let updated = bind_patch(sqlx::query_as::<_, Session>(&sql), id, patch)
            .bind(expected_hash)
            .fetch_optional(&self.pool)
            .await?;

        match updated {
            Some(session) => Ok(session),
            None if self.exists(id).await? => Err(StoreError::Conflict),
            None => Err(StoreError::NotFound),
        }
    }

    async fn list(&self, filter: SessionFilter) -> Result<Vec<Session>, StoreError> {
        let sessions = sqlx::query_as::<_, Session>(
            r#"
            SELECT id, user_id, ip_address, user_agent, valid, expires_at,
                   refresh_token_hash, created_at, updated_at
            FROM sessions
            WHERE ($1::uuid IS NULL OR user_id = $1)
              AND ($2::boolean IS NULL OR valid = $2)
            ORDER BY created_at ASC
            "#,
        )
        .bind(filter.user_id)
        .bind(filter.valid)
        .fetch_all(&self.pool)
        .await?;

        Ok(sessions)
    }
}
