//! Postgres-backed store.
//!
//! Uses runtime-checked queries so the crate builds without a live database.
//! Rotation revokes the presented token with an `AND revoked_at IS NULL`
//! guard inside the same transaction that inserts the successor.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use super::{DirectoryStore, OAuthClientStore, SessionStore, StoreError, TokenStore};
use crate::models::{
    HashEnvelope, OAuthClientRecord, Session, TokenRecord, TokenType, User, WorkspaceMembership,
};

const TOKEN_COLUMNS: &str = "id, user_id, session_id, workspace_id, type AS token_type, \
     token_hash, scopes, name, family_id, metadata, expires_at, revoked_at, last_used_at, \
     created_at";

const SESSION_COLUMNS: &str = "id, user_id, client_type, client_id, expires_at, \
     absolute_expires_at, revoked_at, mfa_level, created_at";

/// Store over a shared Postgres pool.
#[derive(Clone)]
pub struct PgAuthStore {
    pool: PgPool,
}

impl PgAuthStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded migrations from `tollgate_core/migrations/`.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

#[derive(sqlx::FromRow)]
struct TokenRow {
    id: Uuid,
    user_id: String,
    session_id: Option<Uuid>,
    workspace_id: Option<String>,
    token_type: String,
    token_hash: Json<HashEnvelope>,
    scopes: Vec<String>,
    name: Option<String>,
    family_id: Option<Uuid>,
    metadata: Json<Map<String, Value>>,
    expires_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
    last_used_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TokenRow> for TokenRecord {
    type Error = StoreError;

    fn try_from(row: TokenRow) -> Result<Self, Self::Error> {
        Ok(TokenRecord {
            id: row.id,
            user_id: row.user_id,
            session_id: row.session_id,
            workspace_id: row.workspace_id,
            token_type: row
                .token_type
                .parse()
                .map_err(|e| StoreError::Corrupt(format!("token {}: {e}", row.id)))?,
            token_hash: row.token_hash.0,
            scopes: row.scopes,
            name: row.name,
            family_id: row.family_id,
            metadata: row.metadata.0,
            expires_at: row.expires_at,
            revoked_at: row.revoked_at,
            last_used_at: row.last_used_at,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    user_id: String,
    client_type: String,
    client_id: Option<String>,
    expires_at: DateTime<Utc>,
    absolute_expires_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
    mfa_level: i16,
    created_at: DateTime<Utc>,
}

impl TryFrom<SessionRow> for Session {
    type Error = StoreError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        Ok(Session {
            id: row.id,
            user_id: row.user_id,
            client_type: row
                .client_type
                .parse()
                .map_err(|e| StoreError::Corrupt(format!("session {}: {e}", row.id)))?,
            client_id: row.client_id,
            expires_at: row.expires_at,
            absolute_expires_at: row.absolute_expires_at,
            revoked_at: row.revoked_at,
            mfa_level: row.mfa_level,
            created_at: row.created_at,
        })
    }
}

async fn insert_token_with<'e, E>(executor: E, record: &TokenRecord) -> Result<(), StoreError>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO tokens (id, user_id, session_id, workspace_id, type, token_hash, scopes, \
         name, family_id, metadata, expires_at, revoked_at, last_used_at, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
    )
    .bind(record.id)
    .bind(&record.user_id)
    .bind(record.session_id)
    .bind(&record.workspace_id)
    .bind(record.token_type.as_str())
    .bind(Json(&record.token_hash))
    .bind(&record.scopes)
    .bind(&record.name)
    .bind(record.family_id)
    .bind(Json(&record.metadata))
    .bind(record.expires_at)
    .bind(record.revoked_at)
    .bind(record.last_used_at)
    .bind(record.created_at)
    .execute(executor)
    .await?;
    Ok(())
}

async fn insert_session_with<'e, E>(executor: E, session: &Session) -> Result<(), StoreError>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO sessions (id, user_id, client_type, client_id, expires_at, \
         absolute_expires_at, revoked_at, mfa_level, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(session.id)
    .bind(&session.user_id)
    .bind(session.client_type.as_str())
    .bind(&session.client_id)
    .bind(session.expires_at)
    .bind(session.absolute_expires_at)
    .bind(session.revoked_at)
    .bind(session.mfa_level)
    .bind(session.created_at)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl TokenStore for PgAuthStore {
    async fn insert_token(&self, record: &TokenRecord) -> Result<(), StoreError> {
        insert_token_with(&self.pool, record).await
    }

    async fn find_token(&self, id: Uuid) -> Result<Option<TokenRecord>, StoreError> {
        let row = sqlx::query_as::<_, TokenRow>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM tokens WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TokenRecord::try_from).transpose()
    }

    async fn rotate_token(
        &self,
        old_id: Uuid,
        successor: &TokenRecord,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE tokens \
             SET revoked_at = $2, metadata = metadata || jsonb_build_object('replacedBy', $3::text) \
             WHERE id = $1 AND revoked_at IS NULL",
        )
        .bind(old_id)
        .bind(now)
        .bind(successor.id.to_string())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        insert_token_with(&mut *tx, successor).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn open_session(&self, session: &Session, first: &TokenRecord) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        insert_session_with(&mut *tx, session).await?;
        insert_token_with(&mut *tx, first).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn revoke_token(
        &self,
        id: Uuid,
        metadata: &Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let updated = sqlx::query(
            "UPDATE tokens SET revoked_at = $2, metadata = $3 \
             WHERE id = $1 AND revoked_at IS NULL",
        )
        .bind(id)
        .bind(now)
        .bind(Json(metadata))
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    async fn revoke_family(&self, family_id: Uuid, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let updated = sqlx::query(
            "UPDATE tokens SET revoked_at = $2 \
             WHERE family_id = $1 AND revoked_at IS NULL",
        )
        .bind(family_id)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated)
    }

    async fn revoke_session_tokens(
        &self,
        session_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let updated = sqlx::query(
            "UPDATE tokens SET revoked_at = $2 \
             WHERE session_id = $1 AND revoked_at IS NULL",
        )
        .bind(session_id)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated)
    }

    async fn touch_token(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE tokens SET last_used_at = $2 WHERE id = $1")
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_tokens(
        &self,
        user_id: &str,
        token_type: TokenType,
    ) -> Result<Vec<TokenRecord>, StoreError> {
        let rows = sqlx::query_as::<_, TokenRow>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM tokens \
             WHERE user_id = $1 AND type = $2 \
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(user_id)
        .bind(token_type.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TokenRecord::try_from).collect()
    }
}

#[async_trait]
impl SessionStore for PgAuthStore {
    async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        insert_session_with(&self.pool, session).await
    }

    async fn find_session(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Session::try_from).transpose()
    }

    async fn revoke_session(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let updated = sqlx::query(
            "UPDATE sessions SET revoked_at = $2 WHERE id = $1 AND revoked_at IS NULL",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    async fn extend_session(
        &self,
        id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let updated = sqlx::query(
            "UPDATE sessions SET expires_at = LEAST($2, absolute_expires_at) \
             WHERE id = $1 AND revoked_at IS NULL",
        )
        .bind(id)
        .bind(expires_at)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }
}

#[async_trait]
impl DirectoryStore for PgAuthStore {
    async fn find_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, (String, String, Option<String>, Option<DateTime<Utc>>)>(
            "SELECT id, email, name, disabled_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, email, name, disabled_at)| User {
            id,
            email,
            name,
            disabled_at,
        }))
    }

    async fn list_memberships(
        &self,
        profile_id: &str,
    ) -> Result<Vec<WorkspaceMembership>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String, String, DateTime<Utc>)>(
            "SELECT workspace_id, profile_id, role, created_at \
             FROM workspace_memberships \
             WHERE profile_id = $1 \
             ORDER BY created_at ASC, workspace_id ASC",
        )
        .bind(profile_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(workspace_id, profile_id, role, created_at)| {
                let role = role
                    .parse()
                    .map_err(|e| StoreError::Corrupt(format!("membership {workspace_id}: {e}")))?;
                Ok(WorkspaceMembership {
                    workspace_id,
                    profile_id,
                    role,
                    created_at,
                })
            })
            .collect()
    }
}

#[async_trait]
impl OAuthClientStore for PgAuthStore {
    async fn find_client(&self, client_id: &str) -> Result<Option<OAuthClientRecord>, StoreError> {
        let row = sqlx::query_as::<
            _,
            (
                String,
                String,
                String,
                Vec<String>,
                String,
                bool,
                Option<DateTime<Utc>>,
            ),
        >(
            "SELECT client_id, name, client_type, redirect_uris, token_endpoint_auth_method, \
             is_first_party, disabled_at \
             FROM oauth_clients WHERE client_id = $1",
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(
            |(client_id, name, client_type, redirect_uris, auth_method, is_first_party, disabled_at)| {
                Ok(OAuthClientRecord {
                    client_type: client_type
                        .parse()
                        .map_err(|e| StoreError::Corrupt(format!("client {client_id}: {e}")))?,
                    token_endpoint_auth_method: auth_method
                        .parse()
                        .map_err(|e| StoreError::Corrupt(format!("client {client_id}: {e}")))?,
                    client_id,
                    name,
                    redirect_uris,
                    is_first_party,
                    disabled_at,
                })
            },
        )
        .transpose()
    }
}
