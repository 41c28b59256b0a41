//! Tests for the privileged role-update endpoint and its client.
//!
//! Tests cover:
//! - Bearer header parsing and admin claim enforcement
//! - Body validation and unknown targets
//! - Role propagation through `update_user_role` and a forced refresh

mod common;

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use common::{Backend, default_config};
use gatehouse::client::{AuthError, HttpRoleEndpoint, RoleEndpoint, RoleUpdateError};
use gatehouse::db::NewUser;
use gatehouse::jwt::TokenSubject;
use gatehouse::start_server;
use tower::ServiceExt;

async fn create_user(backend: &Backend, uid: &str, email: &str, admin: bool) {
    backend
        .db
        .users()
        .create(&NewUser {
            uid,
            email,
            provider: "password",
            ..Default::default()
        })
        .await
        .expect("Failed to create user");
    if admin {
        backend.db.users().set_admin(uid, true).await.unwrap();
    }
}

fn bearer(backend: &Backend, uid: &str, admin: bool) -> String {
    let token = backend
        .jwt
        .generate_id_token(&TokenSubject {
            uid,
            email: "caller@example.com",
            admin,
            ..Default::default()
        })
        .expect("Failed to mint token");
    format!("Bearer {}", token.token)
}

fn role_request(authorization: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/users/role")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(value) = authorization {
        builder = builder.header(header::AUTHORIZATION, value);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_missing_header_is_unauthorized() {
    let backend = Backend::new().await;
    let response = backend
        .app()
        .oneshot(role_request(None, r#"{"userId":"x","isAdmin":true}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        body_json(response).await["error"],
        "Missing or invalid authorization header"
    );
}

#[tokio::test]
async fn test_malformed_header_and_bad_token_are_unauthorized() {
    let backend = Backend::new().await;

    let response = backend
        .app()
        .oneshot(role_request(Some("Token abc"), r#"{"userId":"x"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = backend
        .app()
        .oneshot(role_request(Some("Bearer not.a.jwt"), r#"{"userId":"x"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_non_admin_caller_is_forbidden() {
    let backend = Backend::new().await;
    create_user(&backend, "target", "target@example.com", false).await;

    let auth = bearer(&backend, "member", false);
    let response = backend
        .app()
        .oneshot(role_request(Some(&auth), r#"{"userId":"target","isAdmin":true}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        body_json(response).await["error"],
        "Unauthorized: Requires admin privileges"
    );
    let target = backend.db.users().get_by_uid("target").await.unwrap().unwrap();
    assert!(!target.admin);
}

#[tokio::test]
async fn test_missing_target_is_bad_request() {
    let backend = Backend::new().await;
    let auth = bearer(&backend, "root", true);

    let response = backend
        .app()
        .oneshot(role_request(Some(&auth), r#"{"isAdmin":true}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["error"],
        "Missing userId in request body"
    );
}

#[tokio::test]
async fn test_unknown_target_is_not_found() {
    let backend = Backend::new().await;
    let auth = bearer(&backend, "root", true);

    let response = backend
        .app()
        .oneshot(role_request(Some(&auth), r#"{"targetUid":"ghost","isAdmin":true}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_can_grant_and_revoke() {
    let backend = Backend::new().await;
    create_user(&backend, "target", "target@example.com", false).await;
    let auth = bearer(&backend, "root", true);

    let response = backend
        .app()
        .oneshot(role_request(Some(&auth), r#"{"userId":"target","isAdmin":true}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["success"], true);
    assert!(backend.db.users().get_by_uid("target").await.unwrap().unwrap().admin);

    let response = backend
        .app()
        .oneshot(role_request(Some(&auth), r#"{"userId":"target","isAdmin":false}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!backend.db.users().get_by_uid("target").await.unwrap().unwrap().admin);
}

#[tokio::test]
async fn test_http_role_endpoint_maps_statuses() {
    let backend = Backend::new().await;
    create_user(&backend, "target", "target@example.com", false).await;
    let (_handle, addr) = start_server(backend.server_config(), 0)
        .await
        .expect("Failed to start server");
    let endpoint = HttpRoleEndpoint::new(format!("http://{}/api/users/role", addr));

    let member = bearer(&backend, "member", false);
    let member = member.trim_start_matches("Bearer ");
    assert!(matches!(
        endpoint.update_role(member, "target", true).await,
        Err(RoleUpdateError::Forbidden)
    ));

    assert!(matches!(
        endpoint.update_role("garbage", "target", true).await,
        Err(RoleUpdateError::Unauthorized)
    ));

    let admin = bearer(&backend, "root", true);
    let admin = admin.trim_start_matches("Bearer ");
    assert!(matches!(
        endpoint.update_role(admin, "ghost", true).await,
        Err(RoleUpdateError::NotFound)
    ));
    endpoint.update_role(admin, "target", true).await.unwrap();
    assert!(backend.db.users().get_by_uid("target").await.unwrap().unwrap().admin);
}

#[tokio::test]
async fn test_role_propagates_after_forced_refresh() {
    let backend = Backend::new().await;
    let (_handle, addr) = start_server(backend.server_config(), 0)
        .await
        .expect("Failed to start server");
    let endpoint: Arc<dyn RoleEndpoint> =
        Arc::new(HttpRoleEndpoint::new(format!("http://{}/api/users/role", addr)));

    let (admin_browser, member_browser) = (backend.browser(), backend.browser());
    let admin_tab = backend.tab_with(&admin_browser, Some(endpoint.clone()), default_config());
    let member_tab = backend.tab_with(&member_browser, Some(endpoint), default_config());

    let root = admin_tab.sign_up("root@example.com", "secret123").await.unwrap();
    let member = member_tab.sign_up("member@example.com", "secret123").await.unwrap();

    // A member cannot promote anyone.
    let err = member_tab.update_user_role(&member.uid, true).await.unwrap_err();
    assert!(matches!(err, AuthError::RoleUpdate(RoleUpdateError::Forbidden)));

    // Out-of-band bootstrap of the first admin.
    backend.db.users().set_admin(&root.uid, true).await.unwrap();
    assert!(!admin_tab.is_admin());
    assert!(admin_tab.refresh_token_now().await.unwrap());
    assert!(admin_tab.is_admin());

    admin_tab.update_user_role(&member.uid, true).await.unwrap();

    // Eventual: the member's cached token still carries the old claim.
    assert!(!member_tab.is_admin());
    assert!(member_tab.refresh_token_now().await.unwrap());
    assert!(member_tab.is_admin());

    let cookie = member_browser.cookies.get("app_auth_token").unwrap();
    assert!(backend.jwt.validate_id_token(&cookie).unwrap().admin);
}

#[tokio::test]
async fn test_update_role_requires_sign_in() {
    let backend = Backend::new().await;
    let browser = backend.browser();
    let tab = backend.tab(&browser);
    let err = tab.update_user_role("anyone", true).await.unwrap_err();
    assert!(matches!(err, AuthError::NotSignedIn));
}
