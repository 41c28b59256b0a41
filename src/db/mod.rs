mod account;
mod link;
mod session;
mod user;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tokio::sync::broadcast;

use crate::client::SessionChange;

pub use account::AccountStore;
pub use link::{SignInLinkRecord, SignInLinkStore};
pub use session::SessionStore;
pub use user::{NewUser, User, UserStore};

/// Capacity of the session change channel. Slow subscribers that fall
/// further behind than this resynchronise from a full listing.
const SESSION_EVENT_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    session_events: broadcast::Sender<SessionChange>,
}

impl Database {
    /// Open or create a database at the given path.
    /// Use ":memory:" for an in-memory database.
    pub async fn open(path: &str) -> Result<Self, sqlx::Error> {
        let (url, max_connections) = if path == ":memory:" {
            // Every in-memory connection shares one cache; a single connection
            // avoids table-level lock contention between them.
            ("sqlite::memory:".to_string(), 1)
        } else {
            (format!("sqlite:{}?mode=rwc", path), 5)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(&url)
            .await?;

        let (session_events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        let db = Self {
            pool,
            session_events,
        };
        db.migrate().await?;
        Ok(db)
    }

    /// Get the current schema version.
    async fn get_version(&self) -> Result<i32, sqlx::Error> {
        let result: Option<(i32,)> = sqlx::query_as("SELECT version FROM schema_version LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(result.map(|r| r.0).unwrap_or(0))
    }

    /// Set the schema version within a transaction.
    async fn set_version(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        version: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM schema_version")
            .execute(&mut **tx)
            .await?;
        sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
            .bind(version)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Run database migrations.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
            .execute(&self.pool)
            .await?;

        let version = self.get_version().await?;

        if version < 1 {
            self.migrate_v1().await?;
        }

        if version < 2 {
            self.migrate_v2().await?;
        }

        Ok(())
    }

    /// Execute a list of queries in a transaction, then set the version.
    async fn run_migration(
        &self,
        version: i32,
        queries: &[&'static str],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for query in queries {
            sqlx::query(*query).execute(&mut *tx).await?;
        }
        Self::set_version(&mut tx, version).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn migrate_v1(&self) -> Result<(), sqlx::Error> {
        self.run_migration(
            1,
            &[
                // Identity provider principals
                "CREATE TABLE users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uid TEXT UNIQUE NOT NULL,
                    email TEXT UNIQUE NOT NULL COLLATE NOCASE,
                    password_hash TEXT,
                    display_name TEXT,
                    photo_url TEXT,
                    email_verified INTEGER NOT NULL DEFAULT 0,
                    admin INTEGER NOT NULL DEFAULT 0,
                    disabled INTEGER NOT NULL DEFAULT 0,
                    provider TEXT NOT NULL DEFAULT 'password',
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                )",
                "CREATE INDEX idx_users_uid ON users(uid)",
                "CREATE INDEX idx_users_email ON users(email)",
                // Session registry, one row per (identity, device session id)
                "CREATE TABLE sessions (
                    identity_id TEXT NOT NULL,
                    session_id TEXT NOT NULL,
                    is_active INTEGER NOT NULL,
                    browser TEXT NOT NULL,
                    os TEXT NOT NULL,
                    location TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    last_login_at INTEGER NOT NULL,
                    PRIMARY KEY (identity_id, session_id)
                )",
                "CREATE INDEX idx_sessions_identity ON sessions(identity_id)",
                // Account metadata mirrored on every sign-in
                "CREATE TABLE accounts (
                    uid TEXT PRIMARY KEY,
                    email TEXT,
                    display_name TEXT,
                    photo_url TEXT,
                    created_at INTEGER NOT NULL,
                    last_login_at INTEGER NOT NULL
                )",
            ],
        )
        .await
    }

    async fn migrate_v2(&self) -> Result<(), sqlx::Error> {
        self.run_migration(
            2,
            &[
                // One-time passwordless sign-in codes
                "CREATE TABLE sign_in_links (
                    code TEXT PRIMARY KEY,
                    email TEXT NOT NULL COLLATE NOCASE,
                    created_at INTEGER NOT NULL,
                    expires_at INTEGER NOT NULL
                )",
                "CREATE INDEX idx_sign_in_links_expires_at ON sign_in_links(expires_at)",
            ],
        )
        .await
    }

    /// Get the user store.
    pub fn users(&self) -> UserStore {
        UserStore::new(self.pool.clone())
    }

    /// Get the session registry store.
    pub fn sessions(&self) -> SessionStore {
        SessionStore::new(self.pool.clone(), self.session_events.clone())
    }

    /// Get the account metadata store.
    pub fn accounts(&self) -> AccountStore {
        AccountStore::new(self.pool.clone())
    }

    /// Get the passwordless sign-in link store.
    pub fn sign_in_links(&self) -> SignInLinkStore {
        SignInLinkStore::new(self.pool.clone())
    }

    /// Get the underlying connection pool (for tests that need raw SQL access).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Current time as Unix milliseconds.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Convert stored Unix milliseconds into a UTC timestamp.
pub(crate) fn millis_to_datetime(millis: i64) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp_millis(millis).unwrap_or_default()
}
