//! Domain types shared by the session lifecycle core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::jwt::IdentityClaims;

/// The authenticated principal, as cached by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub uid: String,
    pub email: String,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub email_verified: bool,
    /// Role claim of the token this identity was read from.
    pub admin: bool,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Identity {
    pub fn from_claims(claims: &IdentityClaims) -> Self {
        Self {
            uid: claims.sub.clone(),
            email: claims.email.clone(),
            display_name: claims.name.clone(),
            photo_url: claims.picture.clone(),
            email_verified: claims.email_verified,
            admin: claims.admin,
            issued_at: unix_to_datetime(claims.iat),
            expires_at: unix_to_datetime(claims.exp),
        }
    }
}

fn unix_to_datetime(secs: u64) -> DateTime<Utc> {
    DateTime::from_timestamp(i64::try_from(secs).unwrap_or(i64::MAX), 0).unwrap_or_default()
}

/// Fingerprint of one browser instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub session_id: String,
    pub browser: String,
    pub os: String,
    pub location: String,
}

/// One row of the session registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub device_info: DeviceInfo,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_login_at: DateTime<Utc>,
    /// Derived at read time, never stored.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub current_session: bool,
}

impl Session {
    pub fn session_id(&self) -> &str {
        &self.device_info.session_id
    }
}

/// Mark the row belonging to `current_session_id`, clearing the flag on all others.
pub fn tag_current_session(sessions: &mut [Session], current_session_id: &str) {
    for session in sessions.iter_mut() {
        session.current_session = session.device_info.session_id == current_session_id;
    }
}

/// Supplementary account data mirrored on every sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountMetadata {
    pub created_at: DateTime<Utc>,
    pub last_login_at: DateTime<Utc>,
    pub display_name: Option<String>,
    pub email: Option<String>,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
}

/// What happened to a session row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Upserted,
    Deactivated,
    Removed,
}

/// A change notification published by the session store after every write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionChange {
    pub identity_id: String,
    pub session_id: String,
    pub kind: ChangeKind,
}
