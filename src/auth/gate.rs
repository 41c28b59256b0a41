//! Edge authorization gate.
//!
//! Runs in front of every page route and decides, from the request path and
//! the identity cookie alone, whether the page is served or the browser is
//! redirected. No database or provider round trip is made: the cookie token
//! is verified locally and its admin claim is trusted until it expires.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use tracing::debug;
use url::{Url, form_urlencoded};

use super::callback::resolve_callback_url;
use super::cookie::get_non_empty_cookie;
use crate::client::CookieOptions;
use crate::jwt::JwtConfig;

/// Query parameter carrying the page to return to after signing in.
pub const CALLBACK_PARAM: &str = "callbackUrl";

/// Path tables consulted by [`decide`].
///
/// Private and admin entries match a whole path segment prefix: `/admin`
/// covers `/admin` and `/admin/users` but not `/administrator`.
#[derive(Debug, Clone)]
pub struct GatePolicy {
    pub private_paths: Vec<String>,
    pub admin_paths: Vec<String>,
    pub auth_pages: Vec<String>,
    /// Exact-path redirects applied before any authorization check.
    pub redirects: Vec<(String, String)>,
    /// Never gated (API routes, static assets).
    pub bypass_prefixes: Vec<String>,
    pub login_path: String,
    pub unauthorized_path: String,
    pub dashboard_path: String,
}

fn owned(paths: &[&str]) -> Vec<String> {
    paths.iter().map(|p| p.to_string()).collect()
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            private_paths: owned(&[
                "/dashboard",
                "/profile",
                "/settings",
                "/account",
                "/feature",
                "/help",
            ]),
            admin_paths: owned(&["/admin"]),
            auth_pages: owned(&["/login", "/signup"]),
            redirects: vec![
                ("/home".to_string(), "/dashboard".to_string()),
                ("/admin".to_string(), "/admin/dashboard".to_string()),
            ],
            bypass_prefixes: owned(&["/api", "/static", "/assets", "/favicon.ico"]),
            login_path: "/login".to_string(),
            unauthorized_path: "/unauthorized".to_string(),
            dashboard_path: "/dashboard".to_string(),
        }
    }
}

fn path_matches(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/'),
        None => false,
    }
}

impl GatePolicy {
    fn any_match(paths: &[String], path: &str) -> bool {
        paths.iter().any(|p| path_matches(path, p))
    }

    pub fn is_bypassed(&self, path: &str) -> bool {
        Self::any_match(&self.bypass_prefixes, path)
    }

    pub fn is_private(&self, path: &str) -> bool {
        Self::any_match(&self.private_paths, path)
    }

    pub fn is_admin_only(&self, path: &str) -> bool {
        Self::any_match(&self.admin_paths, path)
    }

    pub fn is_auth_page(&self, path: &str) -> bool {
        self.auth_pages.iter().any(|p| p == path)
    }

    fn redirect_for(&self, path: &str) -> Option<&str> {
        self.redirects
            .iter()
            .find(|(from, _)| from == path)
            .map(|(_, to)| to.as_str())
    }

    /// `/login?callbackUrl=<path>`
    pub fn login_url(&self, callback: &str) -> String {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair(CALLBACK_PARAM, callback)
            .finish();
        format!("{}?{}", self.login_path, query)
    }
}

/// Who is asking, as far as the cookie can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateViewer {
    Anonymous,
    Authenticated { is_admin: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    /// A static redirect or an honoured callback.
    Redirect(String),
    RedirectToLogin { callback: String },
    RedirectToUnauthorized,
    RedirectToDashboard,
}

/// Pure decision table of the gate.
///
/// `callback` is the raw `callbackUrl` query value, honoured only when an
/// authenticated viewer hits an auth page and it resolves onto `app_origin`.
pub fn decide(
    policy: &GatePolicy,
    path: &str,
    viewer: GateViewer,
    callback: Option<&str>,
    app_origin: &Url,
) -> GateDecision {
    if policy.is_bypassed(path) {
        return GateDecision::Proceed;
    }

    if let Some(target) = policy.redirect_for(path) {
        return GateDecision::Redirect(target.to_string());
    }

    if policy.is_admin_only(path) {
        return match viewer {
            GateViewer::Anonymous => GateDecision::RedirectToLogin {
                callback: path.to_string(),
            },
            GateViewer::Authenticated { is_admin: false } => GateDecision::RedirectToUnauthorized,
            GateViewer::Authenticated { is_admin: true } => GateDecision::Proceed,
        };
    }

    if policy.is_private(path) && viewer == GateViewer::Anonymous {
        return GateDecision::RedirectToLogin {
            callback: path.to_string(),
        };
    }

    if policy.is_auth_page(path) && viewer != GateViewer::Anonymous {
        return match callback.and_then(|cb| resolve_callback_url(cb, app_origin)) {
            Some(target) => GateDecision::Redirect(target),
            None => GateDecision::RedirectToDashboard,
        };
    }

    GateDecision::Proceed
}

/// State for the [`edge_gate`] middleware.
#[derive(Clone)]
pub struct GateState {
    pub jwt: Arc<JwtConfig>,
    pub policy: Arc<GatePolicy>,
    pub cookie_name: String,
    /// Attributes used when expiring a stale identity cookie.
    pub cookie_options: CookieOptions,
    pub app_origin: Url,
}

impl GateState {
    /// The viewer, and whether the request carried an identity cookie that
    /// failed verification.
    fn viewer(&self, request: &Request) -> (GateViewer, bool) {
        let Some(token) = get_non_empty_cookie(request.headers(), &self.cookie_name) else {
            return (GateViewer::Anonymous, false);
        };
        match self.jwt.validate_id_token(token) {
            Ok(claims) => (
                GateViewer::Authenticated {
                    is_admin: claims.admin,
                },
                false,
            ),
            Err(e) => {
                debug!(error = %e, "Ignoring invalid identity cookie");
                (GateViewer::Anonymous, true)
            }
        }
    }
}

fn callback_param(request: &Request) -> Option<String> {
    let query = request.uri().query()?;
    form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == CALLBACK_PARAM)
        .map(|(_, value)| value.into_owned())
}

/// Axum middleware applying [`decide`] to every request it wraps. A cookie
/// that fails verification is expired on whatever response goes back.
pub async fn edge_gate(State(state): State<GateState>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let (viewer, stale_cookie) = state.viewer(&request);
    let callback = callback_param(&request);

    let decision = decide(
        &state.policy,
        &path,
        viewer,
        callback.as_deref(),
        &state.app_origin,
    );
    if decision != GateDecision::Proceed {
        debug!(path = %path, ?viewer, ?decision, "Edge gate redirect");
    }

    let mut response = match decision {
        GateDecision::Proceed => next.run(request).await,
        GateDecision::Redirect(target) => Redirect::temporary(&target).into_response(),
        GateDecision::RedirectToLogin { callback } => {
            Redirect::temporary(&state.policy.login_url(&callback)).into_response()
        }
        GateDecision::RedirectToUnauthorized => {
            Redirect::temporary(&state.policy.unauthorized_path).into_response()
        }
        GateDecision::RedirectToDashboard => {
            Redirect::temporary(&state.policy.dashboard_path).into_response()
        }
    };

    if stale_cookie {
        let clear = state.cookie_options.clear_cookie_header(&state.cookie_name);
        if let Ok(value) = HeaderValue::from_str(&clear) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADMIN: GateViewer = GateViewer::Authenticated { is_admin: true };
    const MEMBER: GateViewer = GateViewer::Authenticated { is_admin: false };
    const ANON: GateViewer = GateViewer::Anonymous;

    fn check(path: &str, viewer: GateViewer) -> GateDecision {
        let origin = Url::parse("https://app.example").unwrap();
        decide(&GatePolicy::default(), path, viewer, None, &origin)
    }

    fn login(callback: &str) -> GateDecision {
        GateDecision::RedirectToLogin {
            callback: callback.to_string(),
        }
    }

    #[test]
    fn test_private_paths_need_a_token() {
        assert_eq!(check("/dashboard", ANON), login("/dashboard"));
        assert_eq!(check("/settings/security", ANON), login("/settings/security"));
        assert_eq!(check("/dashboard", MEMBER), GateDecision::Proceed);
    }

    #[test]
    fn test_admin_paths_need_the_claim() {
        assert_eq!(check("/admin/users", ANON), login("/admin/users"));
        assert_eq!(check("/admin/users", MEMBER), GateDecision::RedirectToUnauthorized);
        assert_eq!(check("/admin/users", ADMIN), GateDecision::Proceed);
    }

    #[test]
    fn test_static_redirects_come_first() {
        assert_eq!(
            check("/admin", ANON),
            GateDecision::Redirect("/admin/dashboard".to_string())
        );
        assert_eq!(
            check("/home", MEMBER),
            GateDecision::Redirect("/dashboard".to_string())
        );
    }

    #[test]
    fn test_prefixes_match_whole_segments() {
        assert_eq!(check("/administrator", ANON), GateDecision::Proceed);
        assert_eq!(check("/helpful", ANON), GateDecision::Proceed);
    }

    #[test]
    fn test_auth_pages_bounce_signed_in_users() {
        assert_eq!(check("/login", MEMBER), GateDecision::RedirectToDashboard);
        assert_eq!(check("/signup", ADMIN), GateDecision::RedirectToDashboard);
        assert_eq!(check("/login", ANON), GateDecision::Proceed);
    }

    #[test]
    fn test_callback_is_honoured_only_on_origin() {
        let origin = Url::parse("https://app.example").unwrap();
        let policy = GatePolicy::default();
        assert_eq!(
            decide(&policy, "/login", MEMBER, Some("/profile"), &origin),
            GateDecision::Redirect("/profile".to_string())
        );
        assert_eq!(
            decide(&policy, "/login", MEMBER, Some("https://evil.example/x"), &origin),
            GateDecision::RedirectToDashboard
        );
    }

    #[test]
    fn test_bypass_and_public() {
        assert_eq!(check("/api/users/role", ANON), GateDecision::Proceed);
        assert_eq!(check("/favicon.ico", ANON), GateDecision::Proceed);
        assert_eq!(check("/", ANON), GateDecision::Proceed);
        assert_eq!(check("/pricing", ANON), GateDecision::Proceed);
    }

    #[test]
    fn test_login_url_encodes_callback() {
        let policy = GatePolicy::default();
        assert_eq!(
            policy.login_url("/admin/users"),
            "/login?callbackUrl=%2Fadmin%2Fusers"
        );
    }
}
