//! Client-side session lifecycle: identity state, device fingerprinting,
//! the session registry and its watchers, and token refresh.
//!
//! [`SessionController`] is the entry point. It drives an
//! [`IdentityProvider`] and a [`SessionRegistry`], and mirrors the result into
//! an [`AuthSnapshot`] that the rest of an application can subscribe to.

mod controller;
mod cookies;
mod device;
mod errors;
mod local_provider;
mod provider;
mod refresh;
mod registry;
mod role;
mod types;
mod watcher;

pub use controller::{
    AuthSnapshot, AuthState, ControllerConfig, ControllerParts, DEFAULT_AUTH_COOKIE_NAME,
    DEFAULT_DEVICE_COOKIE_NAME, DEFAULT_EMAIL_STORAGE_KEY, SessionController,
};
pub use cookies::{
    CookieJar, CookieOptions, DEFAULT_COOKIE_MAX_AGE_SECS, LocalStorage, SameSite,
    TokenCookieBridge,
};
pub use device::{
    DEFAULT_GEOLOCATION_URL, FixedLocator, GeoLocator, IpApiLocator, UNKNOWN_LOCATION,
    collect_device_info, describe_device, detect_browser, detect_os,
    get_or_create_device_session_id,
};
pub use errors::{AuthError, AuthFailure, RegistryError, RoleUpdateError};
pub use local_provider::{
    LocalIdentityProvider, LocalProviderConfig, MIN_PASSWORD_LENGTH, SignInLinkMessage,
};
pub use provider::{Credential, FederatedAssertion, IdentityProvider, ProviderEvent};
pub use refresh::{
    DEFAULT_REFRESH_DEBOUNCE, DEFAULT_REFRESH_INTERVAL, RefreshChannel, RefreshKind,
    RefreshSignal,
};
pub use registry::{
    AccountMetadataStore, SessionRegistry, SessionRepository, SessionSubscription,
    SubscriptionEvent,
};
pub use role::{HttpRoleEndpoint, RoleEndpoint, RoleUpdateRequest};
pub use types::{
    AccountMetadata, ChangeKind, DeviceInfo, Identity, Session, SessionChange,
    tag_current_session,
};
pub use watcher::{SessionWatcher, WatchHandle};
