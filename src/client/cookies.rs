//! Token cookie bridge.
//!
//! The client keeps its cookies in a [`CookieJar`], the shared cross-tab store
//! the edge gate reads from. Only [`TokenCookieBridge`] writes to it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};

/// Seven days, the lifetime of both the identity and device cookies.
pub const DEFAULT_COOKIE_MAX_AGE_SECS: i64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn as_str(self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// Attributes of a cookie written by the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieOptions {
    pub secure: bool,
    pub same_site: SameSite,
    pub max_age_secs: i64,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            secure: false,
            same_site: SameSite::Lax,
            max_age_secs: DEFAULT_COOKIE_MAX_AGE_SECS,
        }
    }
}

impl CookieOptions {
    /// Production attributes: `Secure`, `SameSite=Lax`, seven days.
    pub fn secure() -> Self {
        Self {
            secure: true,
            ..Self::default()
        }
    }

    /// Render a `Set-Cookie` header value that deletes `name`.
    pub fn clear_cookie_header(&self, name: &str) -> String {
        let secure = if self.secure { "; Secure" } else { "" };
        format!(
            "{}=; SameSite={}; Path=/; Max-Age=0{}",
            name,
            self.same_site.as_str(),
            secure
        )
    }
}

#[derive(Debug, Clone)]
struct StoredCookie {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Shared cookie store. Clones share the same cookies.
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    cookies: Arc<Mutex<HashMap<String, StoredCookie>>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_cookies<R>(&self, f: impl FnOnce(&mut HashMap<String, StoredCookie>) -> R) -> R {
        let mut cookies = self.cookies.lock().unwrap_or_else(PoisonError::into_inner);
        cookies.retain(|_, c| c.expires_at > Utc::now());
        f(&mut cookies)
    }

    /// Read an unexpired cookie.
    pub fn get(&self, name: &str) -> Option<String> {
        self.with_cookies(|cookies| cookies.get(name).map(|c| c.value.clone()))
    }

    pub fn set(&self, name: &str, value: &str, options: &CookieOptions) {
        let expires_at = Utc::now() + Duration::seconds(options.max_age_secs);
        self.with_cookies(|cookies| {
            cookies.insert(
                name.to_string(),
                StoredCookie {
                    value: value.to_string(),
                    expires_at,
                },
            );
        });
    }

    pub fn remove(&self, name: &str) {
        self.with_cookies(|cookies| {
            cookies.remove(name);
        });
    }

    /// Value for a `Cookie` request header carrying every live cookie, sorted by name.
    pub fn header_value(&self) -> String {
        self.with_cookies(|cookies| {
            let mut pairs: Vec<String> = cookies
                .iter()
                .map(|(name, c)| format!("{}={}", name, c.value))
                .collect();
            pairs.sort();
            pairs.join("; ")
        })
    }
}

/// Per-origin key/value storage, used to carry the passwordless sign-in email
/// between the request and completion steps.
#[derive(Debug, Clone, Default)]
pub struct LocalStorage {
    items: Arc<Mutex<HashMap<String, String>>>,
}

impl LocalStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_item(&self, key: &str) -> Option<String> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn set_item(&self, key: &str, value: &str) {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
    }

    pub fn remove_item(&self, key: &str) {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

/// Writes one named cookie. Used for the identity token cookie and,
/// independently, for the device session cookie.
#[derive(Debug, Clone)]
pub struct TokenCookieBridge {
    jar: CookieJar,
    name: String,
    options: CookieOptions,
}

impl TokenCookieBridge {
    pub fn new(jar: CookieJar, name: impl Into<String>, options: CookieOptions) -> Self {
        Self {
            jar,
            name: name.into(),
            options,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn persist_token(&self, token: &str) {
        self.jar.set(&self.name, token, &self.options);
    }

    pub fn clear_token(&self) {
        self.jar.remove(&self.name);
    }

    pub fn read(&self) -> Option<String> {
        self.jar.get(&self.name)
    }
}
