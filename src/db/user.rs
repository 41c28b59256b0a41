use sqlx::sqlite::SqlitePool;

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

/// A principal known to the local identity provider.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub uid: String,
    pub email: String,
    /// Argon2 PHC string. `None` for accounts created by federated or link sign-in.
    pub password_hash: Option<String>,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub email_verified: bool,
    pub admin: bool,
    pub disabled: bool,
    pub provider: String,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    uid: String,
    email: String,
    password_hash: Option<String>,
    display_name: Option<String>,
    photo_url: Option<String>,
    email_verified: i32,
    admin: i32,
    disabled: i32,
    provider: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            uid: row.uid,
            email: row.email,
            password_hash: row.password_hash,
            display_name: row.display_name,
            photo_url: row.photo_url,
            email_verified: row.email_verified != 0,
            admin: row.admin != 0,
            disabled: row.disabled != 0,
            provider: row.provider,
        }
    }
}

/// Fields for inserting a new user.
#[derive(Debug, Clone, Default)]
pub struct NewUser<'a> {
    pub uid: &'a str,
    pub email: &'a str,
    pub password_hash: Option<&'a str>,
    pub display_name: Option<&'a str>,
    pub photo_url: Option<&'a str>,
    pub email_verified: bool,
    pub provider: &'a str,
}

const USER_COLUMNS: &str = "id, uid, email, password_hash, display_name, photo_url, email_verified, admin, disabled, provider";

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new user. Returns the row ID.
    /// Fails with a unique constraint violation if the email is taken.
    pub async fn create(&self, user: &NewUser<'_>) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO users (uid, email, password_hash, display_name, photo_url, email_verified, provider)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(user.uid)
        .bind(user.email)
        .bind(user.password_hash)
        .bind(user.display_name)
        .bind(user.photo_url)
        .bind(user.email_verified as i32)
        .bind(user.provider)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Get a user by their stable uid.
    pub async fn get_by_uid(&self, uid: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> =
            sqlx::query_as(sqlx::AssertSqlSafe(format!("SELECT {} FROM users WHERE uid = ?", USER_COLUMNS)))
                .bind(uid)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(User::from))
    }

    /// Get a user by email (case-insensitive).
    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> =
            sqlx::query_as(sqlx::AssertSqlSafe(format!("SELECT {} FROM users WHERE email = ?", USER_COLUMNS)))
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(User::from))
    }

    /// Set the admin role claim. Returns false if the user does not exist.
    pub async fn set_admin(&self, uid: &str, admin: bool) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET admin = ? WHERE uid = ?")
            .bind(admin as i32)
            .bind(uid)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Enable or disable an account. Returns false if the user does not exist.
    pub async fn set_disabled(&self, uid: &str, disabled: bool) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET disabled = ? WHERE uid = ?")
            .bind(disabled as i32)
            .bind(uid)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark the email address as verified (after a link sign-in).
    pub async fn mark_email_verified(&self, uid: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET email_verified = 1 WHERE uid = ?")
            .bind(uid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
