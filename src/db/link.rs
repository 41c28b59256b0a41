//! One-time passwordless sign-in codes.

use sqlx::sqlite::SqlitePool;

use super::now_millis;

/// Sign-in links are valid for one hour.
pub const SIGN_IN_LINK_TTL_MILLIS: i64 = 60 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignInLinkRecord {
    pub code: String,
    pub email: String,
}

pub struct SignInLinkStore {
    pool: SqlitePool,
}

impl SignInLinkStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Store a new code for `email`.
    pub async fn create(&self, code: &str, email: &str) -> Result<(), sqlx::Error> {
        let now = now_millis();
        sqlx::query(
            "INSERT INTO sign_in_links (code, email, created_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(code)
        .bind(email)
        .bind(now)
        .bind(now + SIGN_IN_LINK_TTL_MILLIS)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Consume a code atomically. Returns the record if it existed and had not expired.
    pub async fn consume(&self, code: &str) -> Result<Option<SignInLinkRecord>, sqlx::Error> {
        let row: Option<(String, String)> = sqlx::query_as(
            "DELETE FROM sign_in_links WHERE code = ? AND expires_at > ? RETURNING code, email",
        )
        .bind(code)
        .bind(now_millis())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(code, email)| SignInLinkRecord { code, email }))
    }

    /// Delete all expired codes.
    pub async fn cleanup_expired(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM sign_in_links WHERE expires_at <= ?")
            .bind(now_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
