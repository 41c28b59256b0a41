//! Open-redirect protection for `callbackUrl` parameters.

use tracing::debug;
use url::Url;

/// True when `url` is an absolute http(s) URL on the same host as `app_url`.
///
/// Relative URLs are rejected here; use [`resolve_callback_url`] to honour
/// them against the app origin.
pub fn is_valid_callback_url(url: &str, app_url: &str) -> bool {
    let (target, app) = match (Url::parse(url), Url::parse(app_url)) {
        (Ok(target), Ok(app)) => (target, app),
        (Err(e), _) | (_, Err(e)) => {
            debug!(url = %url, error = %e, "Invalid callback URL");
            return false;
        }
    };
    matches!(target.scheme(), "http" | "https")
        && target.host_str().is_some()
        && target.host_str() == app.host_str()
}

/// Resolve a callback against the app origin and validate it.
///
/// Returns the redirect target: a local `path?query` when the callback stays
/// on the app's own origin, the absolute URL when only the host matches, and
/// `None` when the callback points elsewhere.
pub fn resolve_callback_url(callback: &str, app_origin: &Url) -> Option<String> {
    let callback = callback.trim();
    if callback.is_empty() {
        return None;
    }
    let target = app_origin.join(callback).ok()?;
    if !is_valid_callback_url(target.as_str(), app_origin.as_str()) {
        debug!(callback = %callback, "Rejected off-origin callback");
        return None;
    }

    if target.origin() == app_origin.origin() {
        let mut local = target.path().to_string();
        if let Some(query) = target.query() {
            local.push('?');
            local.push_str(query);
        }
        Some(local)
    } else {
        Some(target.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Url {
        Url::parse("https://app.example").unwrap()
    }

    #[test]
    fn test_is_valid_callback_url() {
        assert!(is_valid_callback_url(
            "https://app.example/dashboard",
            "https://app.example"
        ));
        assert!(is_valid_callback_url(
            "http://app.example:8080/x",
            "https://app.example"
        ));
        assert!(!is_valid_callback_url("https://evil.example/x", "https://app.example"));
        assert!(!is_valid_callback_url(
            "javascript:alert(1)",
            "https://app.example"
        ));
        assert!(!is_valid_callback_url("/dashboard", "https://app.example"));
        assert!(!is_valid_callback_url("https://app.example/x", "not a url"));
    }

    #[test]
    fn test_resolve_relative_callback() {
        assert_eq!(
            resolve_callback_url("/admin/users?tab=2", &origin()).as_deref(),
            Some("/admin/users?tab=2")
        );
    }

    #[test]
    fn test_resolve_rejects_other_hosts() {
        assert_eq!(resolve_callback_url("https://evil.example/x", &origin()), None);
        assert_eq!(resolve_callback_url("//evil.example/x", &origin()), None);
        assert_eq!(resolve_callback_url("", &origin()), None);
    }

    #[test]
    fn test_resolve_same_host_other_port_stays_absolute() {
        assert_eq!(
            resolve_callback_url("https://app.example:8443/x", &origin()).as_deref(),
            Some("https://app.example:8443/x")
        );
    }
}
