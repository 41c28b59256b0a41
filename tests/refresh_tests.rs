//! Scheduled token refresh across tabs of one browser, and refresh
//! failures that must not sign the user out.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::{Backend, default_config};
use gatehouse::client::{
    AuthFailure, ControllerConfig, ControllerParts, Credential, FederatedAssertion,
    IdentityProvider, LocalIdentityProvider, ProviderEvent, RefreshKind, RefreshSignal,
    SessionController,
};
use gatehouse::jwt::IdTokenResult;
use tokio::sync::broadcast;

const INTERVAL: Duration = Duration::from_millis(250);

fn fast_refresh() -> ControllerConfig {
    ControllerConfig {
        refresh_interval: INTERVAL,
        refresh_debounce: Duration::from_millis(25),
        ..default_config()
    }
}

fn google(email: &str) -> FederatedAssertion {
    FederatedAssertion {
        provider: "google.com".to_string(),
        email: email.to_string(),
        display_name: None,
        photo_url: None,
    }
}

/// Collect every refresh signal published during `window`.
async fn collect(rx: &mut broadcast::Receiver<RefreshSignal>, window: Duration) -> Vec<RefreshSignal> {
    let mut signals = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(Ok(signal)) = tokio::time::timeout_at(deadline, rx.recv()).await {
        signals.push(signal);
    }
    signals
}

#[tokio::test]
async fn test_sibling_tabs_share_the_refresh() {
    let backend = Backend::new().await;
    let browser = backend.browser();
    let first = backend.tab_with(&browser, None, fast_refresh());
    let second = backend.tab_with(&browser, None, fast_refresh());

    first.sign_in_with_federated_provider(&google("rupert@example.com")).await.unwrap();
    second.sign_in_with_federated_provider(&google("rupert@example.com")).await.unwrap();

    let mut rx = browser.refresh_channel.subscribe();
    let signals = collect(&mut rx, INTERVAL * 6).await;

    assert!(signals.len() >= 2, "expected scheduled refreshes, got {:?}", signals);
    assert!(signals.iter().all(|s| s.kind == RefreshKind::TokenRefreshed));
    // Two uncoordinated tabs would refresh about twelve times in this window.
    assert!(signals.len() <= 8, "tabs did not coordinate: {:?}", signals);

    let origins: HashSet<&str> = signals.iter().map(|s| s.origin.as_str()).collect();
    assert!(origins.iter().all(|o| *o == first.tab_id() || *o == second.tab_id()));
    assert!(first.state().is_signed_in() && second.state().is_signed_in());
}

#[tokio::test]
async fn test_hidden_tab_does_not_refresh() {
    let backend = Backend::new().await;
    let browser = backend.browser();
    let tab = backend.tab_with(&browser, None, fast_refresh());
    tab.sign_in_with_federated_provider(&google("sybil@example.com")).await.unwrap();

    tab.set_visible(false);
    let mut rx = browser.refresh_channel.subscribe();
    let signals = collect(&mut rx, INTERVAL * 3).await;
    assert!(signals.is_empty(), "hidden tab refreshed: {:?}", signals);

    tab.set_visible(true);
    let signals = collect(&mut rx, INTERVAL * 3).await;
    assert!(!signals.is_empty());
    assert!(signals.iter().all(|s| s.origin == tab.tab_id()));
}

#[tokio::test]
async fn test_refresh_stops_after_sign_out() {
    let backend = Backend::new().await;
    let browser = backend.browser();
    let tab = backend.tab_with(&browser, None, fast_refresh());
    tab.sign_in_with_federated_provider(&google("oscar@example.com")).await.unwrap();
    tab.sign_out().await.unwrap();

    let mut rx = browser.refresh_channel.subscribe();
    let signals = collect(&mut rx, INTERVAL * 3).await;
    assert!(signals.is_empty());
    assert_eq!(browser.cookies.get("app_auth_token"), None);
}

/// Provider whose forced token fetches fail while `offline` is set.
struct FlakyNetwork {
    inner: Arc<LocalIdentityProvider>,
    offline: AtomicBool,
    failed_refreshes: AtomicUsize,
}

#[async_trait]
impl IdentityProvider for FlakyNetwork {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Credential, AuthFailure> {
        self.inner.sign_in_with_password(email, password).await
    }

    async fn create_user(&self, email: &str, password: &str) -> Result<Credential, AuthFailure> {
        self.inner.create_user(email, password).await
    }

    async fn sign_in_with_federated(
        &self,
        assertion: &FederatedAssertion,
    ) -> Result<Credential, AuthFailure> {
        self.inner.sign_in_with_federated(assertion).await
    }

    async fn send_sign_in_link(&self, email: &str, continue_url: &str) -> Result<(), AuthFailure> {
        self.inner.send_sign_in_link(email, continue_url).await
    }

    fn is_sign_in_link(&self, link: &str) -> bool {
        self.inner.is_sign_in_link(link)
    }

    async fn sign_in_with_email_link(
        &self,
        email: &str,
        link: &str,
    ) -> Result<Credential, AuthFailure> {
        self.inner.sign_in_with_email_link(email, link).await
    }

    async fn id_token(&self, uid: &str, force: bool) -> Result<IdTokenResult, AuthFailure> {
        if force && self.offline.load(Ordering::SeqCst) {
            self.failed_refreshes.fetch_add(1, Ordering::SeqCst);
            return Err(AuthFailure::NetworkRequestFailed);
        }
        self.inner.id_token(uid, force).await
    }

    async fn sign_out(&self, uid: &str) -> Result<(), AuthFailure> {
        self.inner.sign_out(uid).await
    }

    fn subscribe_events(&self) -> broadcast::Receiver<ProviderEvent> {
        self.inner.subscribe_events()
    }
}

#[tokio::test]
async fn test_failed_refresh_keeps_tab_signed_in() {
    let backend = Backend::new().await;
    let browser = backend.browser();
    let provider = Arc::new(FlakyNetwork {
        inner: backend.provider.clone(),
        offline: AtomicBool::new(false),
        failed_refreshes: AtomicUsize::new(0),
    });
    let mut parts = ControllerParts::new(provider.clone(), backend.registry.clone());
    parts.cookies = browser.cookies.clone();
    parts.refresh_channel = browser.refresh_channel.clone();
    let tab = SessionController::new(parts, fast_refresh());

    tab.sign_in_with_federated_provider(&google("trent@example.com")).await.unwrap();
    let token = browser.cookies.get("app_auth_token").expect("identity cookie missing");

    provider.offline.store(true, Ordering::SeqCst);
    tokio::time::sleep(INTERVAL * 4).await;

    assert!(provider.failed_refreshes.load(Ordering::SeqCst) >= 2);
    assert!(tab.state().is_signed_in());
    assert_eq!(browser.cookies.get("app_auth_token"), Some(token));

    provider.offline.store(false, Ordering::SeqCst);
    let mut rx = browser.refresh_channel.subscribe();
    let signals = collect(&mut rx, INTERVAL * 3).await;
    assert!(!signals.is_empty());
    assert!(tab.state().is_signed_in());
}
