//! Session and authentication lifecycle for a web application.
//!
//! The [`client`] module is the in-process half: it signs identities in and
//! out, tracks one session row per device, and watches those rows for remote
//! revocation. The server half is the axum app built by [`create_app`]: an
//! edge gate in front of every page and the small API the client talks to.

pub mod api;
pub mod auth;
pub mod cleanup;
pub mod cli;
pub mod client;
pub mod db;
pub mod jwt;
pub mod rate_limit;

use api::create_api_router;
use auth::{GatePolicy, GateState, edge_gate};
use axum::{
    Router, middleware,
    response::{Html, IntoResponse},
};
use client::CookieOptions;
use db::Database;
use jwt::JwtConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use url::Url;

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// JWT secret for signing and verifying identity tokens
    pub jwt_secret: Vec<u8>,
    /// Public origin of the app; callbacks must stay on its host
    pub app_origin: Url,
    /// Name of the identity token cookie inspected by the edge gate
    pub cookie_name: String,
    /// Whether clients should set the Secure flag on their cookies
    pub secure_cookies: bool,
    /// Path tables for the edge gate
    pub gate_policy: GatePolicy,
}

const PAGE_SHELL: &str = "<!doctype html><html><head><meta charset=\"utf-8\"></head><body><div id=\"root\"></div></body></html>";

/// Pages are rendered by the front end; the server only needs to answer
/// once the gate has let a navigation through.
async fn page() -> impl IntoResponse {
    Html(PAGE_SHELL)
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig) -> Router {
    let jwt = Arc::new(JwtConfig::new(&config.jwt_secret));

    let gate_state = GateState {
        jwt: jwt.clone(),
        policy: Arc::new(config.gate_policy.clone()),
        cookie_name: config.cookie_name.clone(),
        cookie_options: CookieOptions {
            secure: config.secure_cookies,
            ..CookieOptions::default()
        },
        app_origin: config.app_origin.clone(),
    };

    Router::new()
        .nest("/api", create_api_router(config.db.clone(), jwt))
        .fallback(page)
        .layer(middleware::from_fn_with_state(gate_state, edge_gate))
}

/// Run cleanup tasks and spawn background scheduler.
/// Call this before starting the server.
pub async fn init_cleanup(db: &Database) {
    cleanup::run_cleanup(db).await;
    cleanup::spawn_cleanup_scheduler(db.clone());
}

/// Run the server on the given listener. This function blocks until the server exits.
/// Call `init_cleanup` before this to run cleanup on startup.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let app = create_app(&config);
    axum::serve(listener, app.into_make_service()).await
}

/// Start the server on the given port in a background task. Use port 0 to let the OS choose a random port.
/// Returns the actual address the server is listening on.
/// Note: For production use, prefer `run_server` directly in main.
pub async fn start_server(
    config: ServerConfig,
    port: u16,
) -> Result<(tokio::task::JoinHandle<()>, SocketAddr), std::io::Error> {
    // Run cleanup tasks on startup
    init_cleanup(&config.db).await;

    let addr = format!("127.0.0.1:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    info!(address = %local_addr, "Listening");

    let handle = tokio::spawn(async move {
        run_server(config, listener).await.ok();
    });

    Ok((handle, local_addr))
}
