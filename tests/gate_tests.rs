//! Tests for the edge gate and the session validation endpoint.
//!
//! Tests cover:
//! - Redirects for anonymous, member and admin viewers
//! - Callback honouring and open-redirect rejection
//! - Stale identity cookies are expired
//! - Cookies written by a signed-in controller pass the gate
//! - `GET /api/sessions/validate`

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
    response::Response,
};
use common::Backend;
use gatehouse::jwt::TokenSubject;
use tower::ServiceExt;

fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(value) = cookie {
        builder = builder.header(header::COOKIE, value);
    }
    builder.body(Body::empty()).unwrap()
}

fn location(response: &Response) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .expect("Missing Location header")
        .to_str()
        .unwrap()
}

fn cookie_for(backend: &Backend, admin: bool) -> String {
    let token = backend
        .jwt
        .generate_id_token(&TokenSubject {
            uid: "uid-1",
            email: "viewer@example.com",
            admin,
            ..Default::default()
        })
        .unwrap();
    format!("app_auth_token={}", token.token)
}

#[tokio::test]
async fn test_anonymous_is_sent_to_login_with_callback() {
    let backend = Backend::new().await;
    let response = backend.app().oneshot(get("/dashboard", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&response), "/login?callbackUrl=%2Fdashboard");

    let response = backend
        .app()
        .oneshot(get("/admin/users", None))
        .await
        .unwrap();
    assert_eq!(location(&response), "/login?callbackUrl=%2Fadmin%2Fusers");
}

#[tokio::test]
async fn test_invalid_cookie_counts_as_anonymous() {
    let backend = Backend::new().await;
    let response = backend
        .app()
        .oneshot(get("/profile", Some("app_auth_token=forged.token.value")))
        .await
        .unwrap();
    assert_eq!(location(&response), "/login?callbackUrl=%2Fprofile");

    let response = backend
        .app()
        .oneshot(get("/profile", Some("app_auth_token=")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
}

#[tokio::test]
async fn test_stale_cookie_is_expired() {
    let backend = Backend::new().await;
    let response = backend
        .app()
        .oneshot(get("/", Some("app_auth_token=forged.token.value")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("Missing Set-Cookie header")
        .to_str()
        .unwrap();
    assert_eq!(
        set_cookie,
        "app_auth_token=; SameSite=Lax; Path=/; Max-Age=0; Secure"
    );

    let response = backend
        .app()
        .oneshot(get("/dashboard", Some(&cookie_for(&backend, false))))
        .await
        .unwrap();
    assert!(response.headers().get(header::SET_COOKIE).is_none());

    let response = backend.app().oneshot(get("/", None)).await.unwrap();
    assert!(response.headers().get(header::SET_COOKIE).is_none());
}

#[tokio::test]
async fn test_member_and_admin_viewers() {
    let backend = Backend::new().await;
    let member = cookie_for(&backend, false);
    let admin = cookie_for(&backend, true);

    let response = backend
        .app()
        .oneshot(get("/dashboard", Some(&member)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = backend
        .app()
        .oneshot(get("/admin/users", Some(&member)))
        .await
        .unwrap();
    assert_eq!(location(&response), "/unauthorized");

    let response = backend
        .app()
        .oneshot(get("/admin/users", Some(&admin)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_static_redirects() {
    let backend = Backend::new().await;
    let response = backend.app().oneshot(get("/home", None)).await.unwrap();
    assert_eq!(location(&response), "/dashboard");

    let response = backend.app().oneshot(get("/admin", None)).await.unwrap();
    assert_eq!(location(&response), "/admin/dashboard");
}

#[tokio::test]
async fn test_auth_pages_honour_only_same_origin_callbacks() {
    let backend = Backend::new().await;
    let member = cookie_for(&backend, false);

    let response = backend
        .app()
        .oneshot(get("/login?callbackUrl=%2Fsettings", Some(&member)))
        .await
        .unwrap();
    assert_eq!(location(&response), "/settings");

    let response = backend
        .app()
        .oneshot(get(
            "/login?callbackUrl=https%3A%2F%2Fevil.example%2Fsteal",
            Some(&member),
        ))
        .await
        .unwrap();
    assert_eq!(location(&response), "/dashboard");

    let response = backend
        .app()
        .oneshot(get("/signup", Some(&member)))
        .await
        .unwrap();
    assert_eq!(location(&response), "/dashboard");

    let response = backend.app().oneshot(get("/login", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_public_pages_are_served() {
    let backend = Backend::new().await;
    for path in ["/", "/about", "/pricing", "/unauthorized"] {
        let response = backend.app().oneshot(get(path, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{}", path);
    }
}

#[tokio::test]
async fn test_controller_cookie_passes_the_gate() {
    let backend = Backend::new().await;
    let browser = backend.browser();
    let tab = backend.tab(&browser);

    tab.sign_up("alice@example.com", "secret123").await.unwrap();
    let cookies = browser.cookies.header_value();
    let response = backend
        .app()
        .oneshot(get("/dashboard", Some(&cookies)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    tab.sign_out().await.unwrap();
    let cookies = browser.cookies.header_value();
    let response = backend
        .app()
        .oneshot(get("/dashboard", Some(&cookies)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
}

async fn is_valid(backend: &Backend, uid: &str, sid: &str) -> bool {
    let uri = format!("/api/sessions/validate?userId={}&sessionId={}", uid, sid);
    let response = backend.app().oneshot(get(&uri, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    json["isValid"].as_bool().unwrap()
}

#[tokio::test]
async fn test_validate_session_endpoint() {
    let backend = Backend::new().await;
    let browser = backend.browser();
    let tab = backend.tab(&browser);

    let alice = tab.sign_up("alice@example.com", "secret123").await.unwrap();
    let session_id = tab.device_session_id().unwrap();

    assert!(is_valid(&backend, &alice.uid, &session_id).await);
    assert!(!is_valid(&backend, &alice.uid, "unknown").await);

    tab.sign_out().await.unwrap();
    assert!(!is_valid(&backend, &alice.uid, &session_id).await);

    let response = backend
        .app()
        .oneshot(get("/api/sessions/validate?userId=abc", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
