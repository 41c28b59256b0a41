#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use gatehouse::auth::GatePolicy;
use gatehouse::client::{
    AuthSnapshot, ControllerConfig, ControllerParts, CookieJar, FixedLocator, LocalIdentityProvider,
    LocalStorage, RefreshChannel, RoleEndpoint, SessionController, SessionRegistry,
};
use gatehouse::db::Database;
use gatehouse::jwt::JwtConfig;
use gatehouse::{ServerConfig, create_app};
use url::Url;

pub const JWT_SECRET: &[u8] = b"test-jwt-secret-that-is-long-enough";
pub const APP_ORIGIN: &str = "https://app.example";
pub const CHROME_MAC: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Shared backend: one database, one identity provider.
pub struct Backend {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
    pub provider: Arc<LocalIdentityProvider>,
    pub registry: SessionRegistry,
}

impl Backend {
    pub async fn new() -> Self {
        let db = Database::open(":memory:")
            .await
            .expect("Failed to open test database");
        let jwt = Arc::new(JwtConfig::new(JWT_SECRET));
        let provider = Arc::new(LocalIdentityProvider::new(db.clone(), jwt.clone()));
        Self::with_provider(db, jwt, provider)
    }

    pub fn with_provider(
        db: Database,
        jwt: Arc<JwtConfig>,
        provider: Arc<LocalIdentityProvider>,
    ) -> Self {
        let registry = SessionRegistry::new(Arc::new(db.sessions()));
        Self {
            db,
            jwt,
            provider,
            registry,
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            db: self.db.clone(),
            jwt_secret: JWT_SECRET.to_vec(),
            app_origin: Url::parse(APP_ORIGIN).expect("Invalid URL"),
            cookie_name: "app_auth_token".to_string(),
            secure_cookies: true,
            gate_policy: GatePolicy::default(),
        }
    }

    pub fn app(&self) -> axum::Router {
        create_app(&self.server_config())
    }

    /// A fresh browser profile: its own cookies, storage and tabs channel.
    pub fn browser(&self) -> Browser {
        Browser {
            cookies: CookieJar::new(),
            storage: LocalStorage::new(),
            refresh_channel: RefreshChannel::new(),
        }
    }

    /// Open a tab in `browser`.
    pub fn tab(&self, browser: &Browser) -> SessionController {
        self.tab_with(browser, None, default_config())
    }

    pub fn tab_with(
        &self,
        browser: &Browser,
        role_endpoint: Option<Arc<dyn RoleEndpoint>>,
        config: ControllerConfig,
    ) -> SessionController {
        let mut parts = ControllerParts::new(self.provider.clone(), self.registry.clone());
        parts.accounts = Some(Arc::new(self.db.accounts()));
        parts.locator = Arc::new(FixedLocator(Some("Berlin, Land Berlin".to_string())));
        parts.role_endpoint = role_endpoint;
        parts.cookies = browser.cookies.clone();
        parts.storage = browser.storage.clone();
        parts.refresh_channel = browser.refresh_channel.clone();
        SessionController::new(parts, config)
    }
}

pub fn default_config() -> ControllerConfig {
    ControllerConfig {
        user_agent: CHROME_MAC.to_string(),
        ..ControllerConfig::default()
    }
}

#[derive(Clone)]
pub struct Browser {
    pub cookies: CookieJar,
    pub storage: LocalStorage,
    pub refresh_channel: RefreshChannel,
}

/// Wait until the controller publishes a snapshot matching `predicate`.
pub async fn wait_for<F>(controller: &SessionController, predicate: F) -> AuthSnapshot
where
    F: FnMut(&AuthSnapshot) -> bool,
{
    let mut rx = controller.subscribe();
    let snapshot = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(predicate))
        .await
        .expect("Timed out waiting for snapshot")
        .expect("Controller dropped");
    snapshot.clone()
}
