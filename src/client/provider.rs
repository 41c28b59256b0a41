//! Identity provider abstraction.
//!
//! The controller never decides on its own whether a user is signed in; it
//! asks the provider and mirrors its answer.

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::errors::AuthFailure;
use super::types::Identity;
use crate::jwt::IdTokenResult;

/// Outcome of a successful sign-in or sign-up.
#[derive(Debug, Clone)]
pub struct Credential {
    pub identity: Identity,
    pub token: IdTokenResult,
    /// True when this call created the account.
    pub is_new_user: bool,
}

/// Verified profile returned by a federated (OAuth) provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedAssertion {
    /// Provider id, e.g. `google.com`.
    pub provider: String,
    pub email: String,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

/// Asynchronous notifications from the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// The provider no longer considers `uid` signed in (account disabled,
    /// credentials revoked).
    SignedOut { uid: String },
}

#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Credential, AuthFailure>;

    async fn create_user(&self, email: &str, password: &str) -> Result<Credential, AuthFailure>;

    async fn sign_in_with_federated(
        &self,
        assertion: &FederatedAssertion,
    ) -> Result<Credential, AuthFailure>;

    /// Deliver a one-time sign-in link for `email` out of band. The link
    /// points at `continue_url`.
    async fn send_sign_in_link(&self, email: &str, continue_url: &str)
    -> Result<(), AuthFailure>;

    fn is_sign_in_link(&self, link: &str) -> bool;

    async fn sign_in_with_email_link(
        &self,
        email: &str,
        link: &str,
    ) -> Result<Credential, AuthFailure>;

    /// Current ID token for `uid`. `force` re-mints it with fresh claims.
    async fn id_token(&self, uid: &str, force: bool) -> Result<IdTokenResult, AuthFailure>;

    async fn sign_out(&self, uid: &str) -> Result<(), AuthFailure>;

    fn subscribe_events(&self) -> broadcast::Receiver<ProviderEvent>;
}
