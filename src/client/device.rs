//! Device fingerprint collector.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::cookies::TokenCookieBridge;
use super::types::DeviceInfo;

pub const UNKNOWN: &str = "Unknown";
pub const UNKNOWN_LOCATION: &str = "Unknown Location";

/// Geolocation lookups must not hold up sign-in.
const GEOLOCATION_TIMEOUT: Duration = Duration::from_secs(3);

pub const DEFAULT_GEOLOCATION_URL: &str = "https://ipapi.co/json/";

/// Return the device session id stored in the device cookie, creating and
/// persisting a fresh one if none is present.
pub fn get_or_create_device_session_id(device_cookie: &TokenCookieBridge) -> String {
    if let Some(existing) = device_cookie.read().filter(|id| !id.is_empty()) {
        return existing;
    }
    let session_id = uuid::Uuid::new_v4().to_string();
    device_cookie.persist_token(&session_id);
    debug!(session_id = %session_id, "Generated new device session id");
    session_id
}

/// Classify the browser from a user-agent string.
pub fn detect_browser(user_agent: &str) -> &'static str {
    let ua = user_agent;
    if ua.contains("Edg") {
        "Edge"
    } else if ua.contains("Chrome") {
        "Chrome"
    } else if ua.contains("Firefox") {
        "Firefox"
    } else if ua.contains("Safari") {
        "Safari"
    } else if ua.contains("Opera") || ua.contains("OPR") {
        "Opera"
    } else if ua.contains("MSIE") || ua.contains("Trident") {
        "Internet Explorer"
    } else {
        UNKNOWN
    }
}

/// Classify the operating system from a user-agent string.
pub fn detect_os(user_agent: &str) -> &'static str {
    let ua = user_agent;
    // Mobile user agents also mention "Linux" or "Mac OS X".
    if ua.contains("Windows") {
        "Windows"
    } else if ua.contains("Android") {
        "Android"
    } else if ua.contains("iPhone") || ua.contains("iPad") || ua.contains("iPod") {
        "iOS"
    } else if ua.contains("Mac OS") || ua.contains("Macintosh") {
        "macOS"
    } else if ua.contains("Linux") {
        "Linux"
    } else {
        UNKNOWN
    }
}

/// Best-effort "city, region" lookup.
#[async_trait]
pub trait GeoLocator: Send + Sync + 'static {
    /// `None` when the location cannot be determined.
    async fn locate(&self) -> Option<String>;
}

/// A locator that always answers the same way.
#[derive(Debug, Clone, Default)]
pub struct FixedLocator(pub Option<String>);

#[async_trait]
impl GeoLocator for FixedLocator {
    async fn locate(&self) -> Option<String> {
        self.0.clone()
    }
}

#[derive(Deserialize)]
struct IpApiResponse {
    city: Option<String>,
    region: Option<String>,
}

/// IP geolocation over HTTP, answering `{ "city": .., "region": .. }`.
#[derive(Debug, Clone)]
pub struct IpApiLocator {
    client: reqwest::Client,
    endpoint: String,
}

impl IpApiLocator {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(GEOLOCATION_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

impl Default for IpApiLocator {
    fn default() -> Self {
        Self::new(DEFAULT_GEOLOCATION_URL)
    }
}

#[async_trait]
impl GeoLocator for IpApiLocator {
    async fn locate(&self) -> Option<String> {
        let response = match self.client.get(&self.endpoint).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, "Geolocation lookup failed");
                return None;
            }
        };
        let body: IpApiResponse = match response.error_for_status() {
            Ok(response) => response.json().await.ok()?,
            Err(e) => {
                debug!(error = %e, "Geolocation lookup rejected");
                return None;
            }
        };
        format_location(body.city.as_deref(), body.region.as_deref())
    }
}

fn format_location(city: Option<&str>, region: Option<&str>) -> Option<String> {
    let city = city.map(str::trim).filter(|s| !s.is_empty());
    let region = region.map(str::trim).filter(|s| !s.is_empty());
    match (city, region) {
        (Some(city), Some(region)) => Some(format!("{}, {}", city, region)),
        (Some(only), None) | (None, Some(only)) => Some(only.to_string()),
        (None, None) => None,
    }
}

/// Gather the fingerprint of this browser instance. Never fails: an unknown
/// location becomes [`UNKNOWN_LOCATION`].
pub async fn collect_device_info(
    device_cookie: &TokenCookieBridge,
    user_agent: &str,
    locator: &dyn GeoLocator,
) -> DeviceInfo {
    let session_id = get_or_create_device_session_id(device_cookie);
    describe_device(session_id, user_agent, locator).await
}

/// Fingerprint for an already known device session id.
pub async fn describe_device(
    session_id: String,
    user_agent: &str,
    locator: &dyn GeoLocator,
) -> DeviceInfo {
    let location = locator
        .locate()
        .await
        .unwrap_or_else(|| UNKNOWN_LOCATION.to_string());

    DeviceInfo {
        session_id,
        browser: detect_browser(user_agent).to_string(),
        os: detect_os(user_agent).to_string(),
        location,
    }
}
