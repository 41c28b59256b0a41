//! SQLite-backed session registry rows.
//!
//! Every write publishes a [`SessionChange`] so subscribers see the new state
//! without polling.

use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use tokio::sync::broadcast;

use super::{millis_to_datetime, now_millis};
use crate::client::{
    ChangeKind, DeviceInfo, RegistryError, Session, SessionChange, SessionRepository,
    SessionSubscription,
};

#[derive(sqlx::FromRow)]
struct SessionRow {
    session_id: String,
    is_active: i32,
    browser: String,
    os: String,
    location: String,
    created_at: i64,
    last_login_at: i64,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Self {
            device_info: DeviceInfo {
                session_id: row.session_id,
                browser: row.browser,
                os: row.os,
                location: row.location,
            },
            is_active: row.is_active != 0,
            created_at: millis_to_datetime(row.created_at),
            last_login_at: millis_to_datetime(row.last_login_at),
            current_session: false,
        }
    }
}

/// Store for the per-identity session collection.
#[derive(Clone)]
pub struct SessionStore {
    pool: SqlitePool,
    events: broadcast::Sender<SessionChange>,
}

impl SessionStore {
    pub fn new(pool: SqlitePool, events: broadcast::Sender<SessionChange>) -> Self {
        Self { pool, events }
    }

    fn publish(&self, identity_id: &str, session_id: &str, kind: ChangeKind) {
        // No receivers is fine: nobody is watching this identity.
        let _ = self.events.send(SessionChange {
            identity_id: identity_id.to_string(),
            session_id: session_id.to_string(),
            kind,
        });
    }
}

#[async_trait]
impl SessionRepository for SessionStore {
    async fn upsert_session(
        &self,
        identity_id: &str,
        device: &DeviceInfo,
        is_active: bool,
    ) -> Result<Session, RegistryError> {
        let now = now_millis();

        // Single statement: concurrent upserts from the same device cannot
        // create duplicate rows, and created_at survives every update.
        let row: SessionRow = sqlx::query_as(
            "INSERT INTO sessions (identity_id, session_id, is_active, browser, os, location, created_at, last_login_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (identity_id, session_id) DO UPDATE SET
                 is_active = excluded.is_active,
                 browser = excluded.browser,
                 os = excluded.os,
                 location = excluded.location,
                 last_login_at = MAX(excluded.last_login_at, sessions.last_login_at + 1)
             RETURNING session_id, is_active, browser, os, location, created_at, last_login_at",
        )
        .bind(identity_id)
        .bind(&device.session_id)
        .bind(is_active as i32)
        .bind(&device.browser)
        .bind(&device.os)
        .bind(&device.location)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        self.publish(identity_id, &device.session_id, ChangeKind::Upserted);
        Ok(row.into())
    }

    async fn deactivate_session(
        &self,
        identity_id: &str,
        session_id: &str,
    ) -> Result<bool, RegistryError> {
        let result = sqlx::query(
            "UPDATE sessions SET is_active = 0, last_login_at = MAX(?, last_login_at + 1)
             WHERE identity_id = ? AND session_id = ?",
        )
        .bind(now_millis())
        .bind(identity_id)
        .bind(session_id)
        .execute(&self.pool)
        .await?;

        let found = result.rows_affected() > 0;
        if found {
            self.publish(identity_id, session_id, ChangeKind::Deactivated);
        }
        Ok(found)
    }

    async fn remove_session(
        &self,
        identity_id: &str,
        session_id: &str,
    ) -> Result<bool, RegistryError> {
        let result = sqlx::query("DELETE FROM sessions WHERE identity_id = ? AND session_id = ?")
            .bind(identity_id)
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        let found = result.rows_affected() > 0;
        if found {
            self.publish(identity_id, session_id, ChangeKind::Removed);
        }
        Ok(found)
    }

    async fn list_sessions(&self, identity_id: &str) -> Result<Vec<Session>, RegistryError> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            "SELECT session_id, is_active, browser, os, location, created_at, last_login_at
             FROM sessions WHERE identity_id = ? ORDER BY last_login_at DESC, session_id",
        )
        .bind(identity_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Session::from).collect())
    }

    async fn get_session(
        &self,
        identity_id: &str,
        session_id: &str,
    ) -> Result<Option<Session>, RegistryError> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT session_id, is_active, browser, os, location, created_at, last_login_at
             FROM sessions WHERE identity_id = ? AND session_id = ?",
        )
        .bind(identity_id)
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Session::from))
    }

    fn subscribe(&self, identity_id: &str) -> SessionSubscription {
        SessionSubscription::new(identity_id, self.events.subscribe())
    }
}
