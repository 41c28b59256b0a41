//! Account metadata mirrored from the identity on every sign-in.

use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;

use super::{millis_to_datetime, now_millis};
use crate::client::{AccountMetadata, AccountMetadataStore, Identity, RegistryError};

#[derive(sqlx::FromRow)]
struct AccountRow {
    email: Option<String>,
    display_name: Option<String>,
    photo_url: Option<String>,
    created_at: i64,
    last_login_at: i64,
}

impl From<AccountRow> for AccountMetadata {
    fn from(row: AccountRow) -> Self {
        Self {
            created_at: millis_to_datetime(row.created_at),
            last_login_at: millis_to_datetime(row.last_login_at),
            display_name: row.display_name,
            email: row.email,
            photo_url: row.photo_url,
        }
    }
}

#[derive(Clone)]
pub struct AccountStore {
    pool: SqlitePool,
}

impl AccountStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, uid: &str) -> Result<Option<AccountMetadata>, sqlx::Error> {
        let row: Option<AccountRow> = sqlx::query_as(
            "SELECT email, display_name, photo_url, created_at, last_login_at FROM accounts WHERE uid = ?",
        )
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(AccountMetadata::from))
    }
}

#[async_trait]
impl AccountMetadataStore for AccountStore {
    /// Merge the identity's profile fields into its account row. `created_at`
    /// is written on first sight, and reset for a freshly created identity.
    async fn record_sign_in(
        &self,
        identity: &Identity,
        is_new_user: bool,
    ) -> Result<AccountMetadata, RegistryError> {
        let now = now_millis();
        let row: AccountRow = sqlx::query_as(
            "INSERT INTO accounts (uid, email, display_name, photo_url, created_at, last_login_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (uid) DO UPDATE SET
                 email = excluded.email,
                 display_name = excluded.display_name,
                 photo_url = excluded.photo_url,
                 last_login_at = excluded.last_login_at,
                 created_at = CASE WHEN ? THEN excluded.created_at ELSE accounts.created_at END
             RETURNING email, display_name, photo_url, created_at, last_login_at",
        )
        .bind(&identity.uid)
        .bind(&identity.email)
        .bind(&identity.display_name)
        .bind(&identity.photo_url)
        .bind(now)
        .bind(now)
        .bind(is_new_user)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }
}
