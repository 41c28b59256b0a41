//! Identity session controller.
//!
//! Owns the auth state of one tab. Every sign-in opens a new epoch; the
//! epoch's watchers and refresh timer are torn down before the next epoch
//! starts, and any late callback carrying an old epoch is dropped. Cookie and
//! state writes happen under the same lock as the epoch check, so a stale
//! callback can never resurrect cleared state.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::cookies::{CookieJar, CookieOptions, LocalStorage, TokenCookieBridge};
use super::device::{FixedLocator, GeoLocator, describe_device, get_or_create_device_session_id};
use super::errors::{AuthError, AuthFailure, RoleUpdateError};
use super::provider::{Credential, FederatedAssertion, IdentityProvider, ProviderEvent};
use super::refresh::{
    DEFAULT_REFRESH_DEBOUNCE, DEFAULT_REFRESH_INTERVAL, RefreshChannel, RefreshSchedule,
    run_refresh_loop,
};
use super::registry::{AccountMetadataStore, SessionRegistry, SessionSubscription};
use super::role::RoleEndpoint;
use super::types::{AccountMetadata, Identity, Session, tag_current_session};
use super::watcher::{SessionWatcher, WatchHandle};

pub const DEFAULT_AUTH_COOKIE_NAME: &str = "app_auth_token";
pub const DEFAULT_DEVICE_COOKIE_NAME: &str = "app_session_id";
pub const DEFAULT_EMAIL_STORAGE_KEY: &str = "emailForSignIn";

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub auth_cookie_name: String,
    pub device_cookie_name: String,
    pub cookie_options: CookieOptions,
    pub refresh_interval: Duration,
    /// Quiet period after a sibling tab's refresh before rescheduling.
    pub refresh_debounce: Duration,
    /// Storage key holding the email of a pending passwordless sign-in.
    pub email_storage_key: String,
    pub user_agent: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            auth_cookie_name: DEFAULT_AUTH_COOKIE_NAME.to_string(),
            device_cookie_name: DEFAULT_DEVICE_COOKIE_NAME.to_string(),
            cookie_options: CookieOptions::default(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            refresh_debounce: DEFAULT_REFRESH_DEBOUNCE,
            email_storage_key: DEFAULT_EMAIL_STORAGE_KEY.to_string(),
            user_agent: String::new(),
        }
    }
}

/// Collaborators of a controller. Tabs of the same browser share `cookies`,
/// `storage` and `refresh_channel`.
pub struct ControllerParts {
    pub provider: Arc<dyn IdentityProvider>,
    pub registry: SessionRegistry,
    pub accounts: Option<Arc<dyn AccountMetadataStore>>,
    pub locator: Arc<dyn GeoLocator>,
    pub role_endpoint: Option<Arc<dyn RoleEndpoint>>,
    pub cookies: CookieJar,
    pub storage: LocalStorage,
    pub refresh_channel: RefreshChannel,
}

impl ControllerParts {
    pub fn new(provider: Arc<dyn IdentityProvider>, registry: SessionRegistry) -> Self {
        Self {
            provider,
            registry,
            accounts: None,
            locator: Arc::new(FixedLocator(None)),
            role_endpoint: None,
            cookies: CookieJar::new(),
            storage: LocalStorage::new(),
            refresh_channel: RefreshChannel::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AuthState {
    #[default]
    SignedOut,
    Authenticating,
    SignedIn {
        identity: Identity,
        /// Read from the token's role claim, never from local state.
        is_admin: bool,
    },
    /// Signed out, carrying the last authentication failure.
    Error(String),
}

impl AuthState {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            AuthState::SignedIn { identity, .. } => Some(identity),
            _ => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, AuthState::SignedIn { is_admin: true, .. })
    }

    pub fn is_signed_in(&self) -> bool {
        matches!(self, AuthState::SignedIn { .. })
    }
}

/// Everything collaborators observe about the current auth session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthSnapshot {
    pub state: AuthState,
    pub sessions: Vec<Session>,
    pub metadata: Option<AccountMetadata>,
}

#[derive(Debug, Clone)]
struct ActiveIdentity {
    uid: String,
    session_id: String,
}

struct Shared {
    epoch: u64,
    active: Option<ActiveIdentity>,
    tasks: Vec<WatchHandle>,
}

enum ControlEvent {
    /// The own-session watcher of `epoch` saw its row revoked.
    Revoked { epoch: u64 },
}

struct Inner {
    provider: Arc<dyn IdentityProvider>,
    registry: SessionRegistry,
    watcher: SessionWatcher,
    accounts: Option<Arc<dyn AccountMetadataStore>>,
    locator: Arc<dyn GeoLocator>,
    role_endpoint: Option<Arc<dyn RoleEndpoint>>,
    storage: LocalStorage,
    refresh_channel: RefreshChannel,
    auth_cookie: TokenCookieBridge,
    device_cookie: TokenCookieBridge,
    config: ControllerConfig,
    tab_id: String,
    shared: Mutex<Shared>,
    /// Held across writes to this device's own row, so a sign-out's
    /// deactivation always lands after an in-flight sign-in upsert.
    row_writes: tokio::sync::Mutex<()>,
    snapshot: watch::Sender<AuthSnapshot>,
    visible: watch::Sender<bool>,
    control: mpsc::UnboundedSender<ControlEvent>,
}

/// Handle to a tab's auth state. Clones share the same state.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    /// Create a signed-out controller. Must be called within a Tokio runtime.
    pub fn new(parts: ControllerParts, config: ControllerConfig) -> Self {
        let ControllerParts {
            provider,
            registry,
            accounts,
            locator,
            role_endpoint,
            cookies,
            storage,
            refresh_channel,
        } = parts;

        let auth_cookie = TokenCookieBridge::new(
            cookies.clone(),
            config.auth_cookie_name.clone(),
            config.cookie_options.clone(),
        );
        let device_cookie = TokenCookieBridge::new(
            cookies,
            config.device_cookie_name.clone(),
            config.cookie_options.clone(),
        );
        let (snapshot, _) = watch::channel(AuthSnapshot::default());
        let (visible, _) = watch::channel(true);
        let (control, control_rx) = mpsc::unbounded_channel();
        let provider_events = provider.subscribe_events();

        let inner = Arc::new(Inner {
            watcher: SessionWatcher::new(registry.clone()),
            provider,
            registry,
            accounts,
            locator,
            role_endpoint,
            storage,
            refresh_channel,
            auth_cookie,
            device_cookie,
            config,
            tab_id: uuid::Uuid::new_v4().to_string(),
            shared: Mutex::new(Shared {
                epoch: 0,
                active: None,
                tasks: Vec::new(),
            }),
            row_writes: tokio::sync::Mutex::new(()),
            snapshot,
            visible,
            control,
        });

        tokio::spawn(drive_control_events(
            Arc::downgrade(&inner),
            control_rx,
            provider_events,
        ));

        Self { inner }
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.inner.snapshot.subscribe()
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub fn state(&self) -> AuthState {
        self.inner.snapshot.borrow().state.clone()
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.inner.snapshot.borrow().state.identity().cloned()
    }

    pub fn is_admin(&self) -> bool {
        self.inner.snapshot.borrow().state.is_admin()
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.inner.snapshot.borrow().sessions.clone()
    }

    pub fn metadata(&self) -> Option<AccountMetadata> {
        self.inner.snapshot.borrow().metadata.clone()
    }

    /// This browser's device session id, if one has been issued.
    pub fn device_session_id(&self) -> Option<String> {
        self.inner.device_cookie.read()
    }

    pub fn tab_id(&self) -> &str {
        &self.inner.tab_id
    }

    /// Pause (hidden) or resume (visible) the refresh timer.
    pub fn set_visible(&self, visible: bool) {
        self.inner.visible.send_replace(visible);
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        self.authenticate(
            "password",
            self.inner.provider.sign_in_with_password(email, password),
        )
        .await
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        self.authenticate("sign_up", self.inner.provider.create_user(email, password))
            .await
    }

    pub async fn sign_in_with_federated_provider(
        &self,
        assertion: &FederatedAssertion,
    ) -> Result<Identity, AuthError> {
        self.authenticate(
            "federated",
            self.inner.provider.sign_in_with_federated(assertion),
        )
        .await
    }

    /// Send a one-time sign-in link and remember `email` for the completion
    /// step. Does not change state.
    pub async fn request_passwordless_link(
        &self,
        email: &str,
        continue_url: &str,
    ) -> Result<(), AuthError> {
        self.inner
            .provider
            .send_sign_in_link(email, continue_url)
            .await
            .inspect_err(|e| warn!(code = e.code(), "Failed to send sign-in link"))?;
        self.inner
            .storage
            .set_item(&self.inner.config.email_storage_key, email);
        info!(email = %email, "Sign-in link requested");
        Ok(())
    }

    /// Sign in with a link produced by [`Self::request_passwordless_link`].
    /// The remembered email is cleared whether or not this succeeds.
    pub async fn complete_passwordless_link(&self, link: &str) -> Result<Identity, AuthError> {
        let key = &self.inner.config.email_storage_key;
        let Some(email) = self.inner.storage.get_item(key) else {
            return Err(AuthError::MissingLinkEmail);
        };

        let result = if self.inner.provider.is_sign_in_link(link) {
            self.authenticate(
                "email_link",
                self.inner.provider.sign_in_with_email_link(&email, link),
            )
            .await
        } else {
            Err(AuthFailure::InvalidActionCode.into())
        };
        self.inner.storage.remove_item(key);
        result
    }

    /// Deactivate this device's session row, drop the identity token cookie
    /// and return to `SignedOut`. Watchers and timers are cancelled before
    /// any await.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let (epoch, active) = {
            let mut shared = self.inner.lock();
            shared.tasks.clear();
            shared.epoch += 1;
            (shared.epoch, shared.active.take())
        };

        if let Some(active) = &active {
            let row_writes = self.inner.row_writes.lock().await;
            // A sign-in of the same identity on this device may own the row again.
            if !self.inner.holds_row(active) {
                // Bookkeeping failures are logged by the registry.
                let _ = self
                    .inner
                    .registry
                    .deactivate_session(&active.uid, &active.session_id)
                    .await;
            }
            drop(row_writes);
            if let Err(e) = self.inner.provider.sign_out(&active.uid).await {
                warn!(uid = %active.uid, error = %e, "Identity provider sign-out failed");
            }
        }

        let shared = self.inner.lock();
        if shared.epoch == epoch {
            self.inner.auth_cookie.clear_token();
            self.inner.snapshot.send_replace(AuthSnapshot::default());
        }
        drop(shared);

        if let Some(active) = active {
            info!(uid = %active.uid, session_id = %active.session_id, "Signed out");
        }
        Ok(())
    }

    /// Sign out another (or this) device. The local list is updated first
    /// and restored if the registry write fails.
    pub async fn sign_out_session(&self, session_id: &str) -> Result<(), AuthError> {
        let (epoch, active) = self.inner.active().ok_or(AuthError::NotSignedIn)?;

        let mut previous = None;
        self.inner.with_epoch(epoch, |_| {
            self.inner.snapshot.send_modify(|s| {
                if let Some(row) = s.sessions.iter_mut().find(|r| r.session_id() == session_id) {
                    previous = Some(row.is_active);
                    row.is_active = false;
                }
            });
        });

        match self
            .inner
            .registry
            .deactivate_session(&active.uid, session_id)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                if let Some(was_active) = previous {
                    self.inner.with_epoch(epoch, |_| {
                        self.inner.snapshot.send_modify(|s| {
                            if let Some(row) =
                                s.sessions.iter_mut().find(|r| r.session_id() == session_id)
                            {
                                row.is_active = was_active;
                            }
                        });
                    });
                }
                Err(e.into())
            }
        }
    }

    /// Permanently delete a session row. Removing a still-active session is
    /// allowed; that device stays signed in until its own watcher notices.
    pub async fn remove_session(&self, session_id: &str) -> Result<(), AuthError> {
        let (epoch, active) = self.inner.active().ok_or(AuthError::NotSignedIn)?;

        let mut removed = None;
        self.inner.with_epoch(epoch, |_| {
            self.inner.snapshot.send_modify(|s| {
                if let Some(index) = s.sessions.iter().position(|r| r.session_id() == session_id) {
                    removed = Some((index, s.sessions.remove(index)));
                }
            });
        });

        match self
            .inner
            .registry
            .remove_session(&active.uid, session_id)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                if let Some((index, row)) = removed {
                    self.inner.with_epoch(epoch, |_| {
                        self.inner.snapshot.send_modify(|s| {
                            if !s.sessions.iter().any(|r| r.session_id() == session_id) {
                                let index = index.min(s.sessions.len());
                                s.sessions.insert(index, row);
                            }
                        });
                    });
                }
                Err(e.into())
            }
        }
    }

    /// Set the admin claim of `target_uid` through the privileged endpoint,
    /// then force a token refresh so a changed claim of our own applies now.
    pub async fn update_user_role(&self, target_uid: &str, is_admin: bool) -> Result<(), AuthError> {
        let (_, active) = self.inner.active().ok_or(AuthError::NotSignedIn)?;
        let endpoint = self.inner.role_endpoint.as_ref().ok_or_else(|| {
            RoleUpdateError::Rejected("No role endpoint configured".to_string())
        })?;

        let token = self.inner.provider.id_token(&active.uid, false).await?;
        endpoint
            .update_role(&token.token, target_uid, is_admin)
            .await
            .inspect_err(|e| warn!(target_uid = %target_uid, error = %e, "Role update failed"))?;
        info!(uid = %active.uid, target_uid = %target_uid, is_admin, "Role update accepted");

        self.refresh_token_now().await?;
        Ok(())
    }

    /// Re-fetch the ID token now, re-persist the cookie and recompute
    /// `is_admin`. Returns the new admin flag.
    pub async fn refresh_token_now(&self) -> Result<bool, AuthError> {
        let (epoch, active) = self.inner.active().ok_or(AuthError::NotSignedIn)?;
        self.inner
            .refresh(epoch, &active.uid)
            .await?
            .ok_or(AuthError::NotSignedIn)
    }

    async fn authenticate<Fut>(&self, method: &'static str, attempt: Fut) -> Result<Identity, AuthError>
    where
        Fut: Future<Output = Result<Credential, AuthFailure>>,
    {
        self.inner.begin_authenticating();
        match attempt.await {
            Ok(credential) => {
                info!(uid = %credential.identity.uid, method, is_new_user = credential.is_new_user, "Signed in");
                Ok(self.inner.establish(credential).await)
            }
            Err(failure) => {
                warn!(method, code = failure.code(), "Authentication failed");
                self.inner.fail_authenticating(&failure);
                Err(failure.into())
            }
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn active(&self) -> Option<(u64, ActiveIdentity)> {
        let shared = self.lock();
        shared.active.clone().map(|active| (shared.epoch, active))
    }

    /// Run `f` only if `epoch` is still the live signed-in epoch.
    fn with_epoch<R>(&self, epoch: u64, f: impl FnOnce(&mut Shared) -> R) -> Option<R> {
        let mut shared = self.lock();
        if shared.epoch == epoch && shared.active.is_some() {
            Some(f(&mut shared))
        } else {
            None
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.with_epoch(epoch, |_| ()).is_some()
    }

    fn holds_row(&self, row: &ActiveIdentity) -> bool {
        self.lock()
            .active
            .as_ref()
            .is_some_and(|a| a.uid == row.uid && a.session_id == row.session_id)
    }

    fn begin_authenticating(&self) {
        let shared = self.lock();
        if shared.active.is_none() {
            self.snapshot
                .send_modify(|s| s.state = AuthState::Authenticating);
        }
    }

    fn fail_authenticating(&self, failure: &AuthFailure) {
        let shared = self.lock();
        if shared.active.is_none() {
            self.snapshot.send_replace(AuthSnapshot {
                state: AuthState::Error(failure.to_string()),
                ..AuthSnapshot::default()
            });
        }
    }

    /// Switch to `credential`'s identity: new epoch, cookie, state, then
    /// best-effort registry and metadata bookkeeping, then watchers.
    async fn establish(self: &Arc<Self>, credential: Credential) -> Identity {
        let Credential {
            identity,
            token,
            is_new_user,
        } = credential;
        let is_admin = token.claims.admin;
        let uid = identity.uid.clone();
        let session_id = get_or_create_device_session_id(&self.device_cookie);

        let epoch = {
            let mut shared = self.lock();
            shared.tasks.clear();
            shared.epoch += 1;
            shared.active = Some(ActiveIdentity {
                uid: uid.clone(),
                session_id: session_id.clone(),
            });
            self.auth_cookie.persist_token(&token.token);
            self.snapshot.send_replace(AuthSnapshot {
                state: AuthState::SignedIn {
                    identity: identity.clone(),
                    is_admin,
                },
                ..AuthSnapshot::default()
            });
            shared.epoch
        };

        // Subscribed before the upsert, so a revocation landing before the
        // watcher starts is still delivered to it.
        let own_feed = self.registry.subscribe(&uid);

        let device = describe_device(
            session_id.clone(),
            &self.config.user_agent,
            self.locator.as_ref(),
        )
        .await;

        {
            let _row_writes = self.row_writes.lock().await;
            if !self.is_current(epoch) {
                return identity;
            }
            // Registry failures never undo the sign-in; the registry logs them.
            if let Ok(session) = self.registry.upsert_session(&uid, &device, true).await {
                self.with_epoch(epoch, |_| {
                    self.snapshot
                        .send_modify(|s| merge_session(&mut s.sessions, session, &session_id));
                });
            }
        }

        if let Some(accounts) = &self.accounts {
            match accounts.record_sign_in(&identity, is_new_user).await {
                Ok(metadata) => {
                    self.with_epoch(epoch, |_| {
                        self.snapshot.send_modify(|s| s.metadata = Some(metadata));
                    });
                }
                Err(e) => warn!(uid = %uid, error = %e, "Failed to record account metadata"),
            }
        }

        self.start_epoch_tasks(epoch, &uid, &session_id, own_feed);
        identity
    }

    fn start_epoch_tasks(
        self: &Arc<Self>,
        epoch: u64,
        uid: &str,
        session_id: &str,
        own_feed: SessionSubscription,
    ) {
        let weak = Arc::downgrade(self);

        let all_sessions = {
            let weak = weak.clone();
            self.watcher
                .watch_all_sessions(uid, session_id, move |sessions| {
                    if let Some(inner) = weak.upgrade() {
                        inner.with_epoch(epoch, |_| {
                            inner.snapshot.send_modify(|s| s.sessions = sessions);
                        });
                    }
                })
        };

        let own_session = {
            let control = self.control.clone();
            self.watcher
                .watch_own_session_from(own_feed, uid, session_id, move || {
                    let _ = control.send(ControlEvent::Revoked { epoch });
                })
        };

        let refresh = {
            let schedule = RefreshSchedule {
                interval: self.config.refresh_interval,
                debounce: self.config.refresh_debounce,
                tab_id: self.tab_id.clone(),
            };
            let uid = uid.to_string();
            WatchHandle::from_task(tokio::spawn(run_refresh_loop(
                schedule,
                self.refresh_channel.subscribe(),
                self.visible.subscribe(),
                move || {
                    let weak = weak.clone();
                    let uid = uid.clone();
                    async move {
                        let Some(inner) = weak.upgrade() else {
                            return false;
                        };
                        if let Err(e) = inner.refresh(epoch, &uid).await {
                            warn!(uid = %uid, error = %e, "Scheduled token refresh failed");
                        }
                        inner.is_current(epoch)
                    }
                },
            )))
        };

        // If the epoch ended meanwhile the handles drop here, aborting the tasks.
        self.with_epoch(epoch, |shared| {
            shared.tasks.extend([all_sessions, own_session, refresh]);
        });
    }

    /// Fetch a fresh token and apply it if `epoch` is still live. Returns
    /// the new admin flag, or `None` when the epoch ended meanwhile.
    async fn refresh(&self, epoch: u64, uid: &str) -> Result<Option<bool>, AuthFailure> {
        let token = self.provider.id_token(uid, true).await?;
        let is_admin = token.claims.admin;
        let identity = Identity::from_claims(&token.claims);

        let applied = self.with_epoch(epoch, |_| {
            self.auth_cookie.persist_token(&token.token);
            self.snapshot.send_modify(|s| {
                s.state = AuthState::SignedIn { identity, is_admin };
            });
        });
        if applied.is_none() {
            return Ok(None);
        }

        self.refresh_channel.publish(&self.tab_id);
        debug!(uid = %uid, is_admin, "Token refreshed");
        Ok(Some(is_admin))
    }

    /// Sign out without user action. Ignored when `expected_epoch` is stale
    /// or `uid` is not the signed-in identity.
    async fn force_sign_out(&self, expected_epoch: Option<u64>, uid: Option<&str>, reason: &str) {
        let active = {
            let mut shared = self.lock();
            if expected_epoch.is_some_and(|epoch| epoch != shared.epoch) {
                debug!(reason, "Ignoring stale sign-out signal");
                return;
            }
            match (&shared.active, uid) {
                (None, _) => return,
                (Some(active), Some(uid)) if active.uid != uid => return,
                _ => {}
            }
            shared.tasks.clear();
            shared.epoch += 1;
            self.auth_cookie.clear_token();
            self.snapshot.send_replace(AuthSnapshot::default());
            shared.active.take()
        };

        if let Some(active) = active {
            info!(uid = %active.uid, session_id = %active.session_id, reason, "Forced sign-out");
            if let Err(e) = self.provider.sign_out(&active.uid).await {
                warn!(uid = %active.uid, error = %e, "Identity provider sign-out failed");
            }
        }
    }
}

/// Replace or append `session` in the local list and re-tag the current row.
fn merge_session(sessions: &mut Vec<Session>, session: Session, current_session_id: &str) {
    match sessions
        .iter_mut()
        .find(|r| r.session_id() == session.session_id())
    {
        Some(row) => *row = session,
        None => sessions.push(session),
    }
    tag_current_session(sessions, current_session_id);
}

async fn drive_control_events(
    inner: Weak<Inner>,
    mut control: mpsc::UnboundedReceiver<ControlEvent>,
    mut provider_events: broadcast::Receiver<ProviderEvent>,
) {
    let mut provider_open = true;
    loop {
        tokio::select! {
            event = control.recv() => {
                let Some(ControlEvent::Revoked { epoch }) = event else {
                    return;
                };
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                inner.force_sign_out(Some(epoch), None, "session revoked").await;
            }
            event = provider_events.recv(), if provider_open => match event {
                Ok(ProviderEvent::SignedOut { uid }) => {
                    let Some(inner) = inner.upgrade() else {
                        return;
                    };
                    inner
                        .force_sign_out(None, Some(&uid), "identity provider signed out")
                        .await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Missed identity provider events");
                }
                Err(RecvError::Closed) => provider_open = false,
            },
        }
    }
}
