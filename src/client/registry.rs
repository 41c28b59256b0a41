//! Session registry: CRUD over an account's login sessions, keyed by the
//! device session id, plus change subscriptions.
//!
//! The registry only depends on [`SessionRepository`], so any store that
//! offers point writes and change notification can back it.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use super::errors::RegistryError;
use super::types::{AccountMetadata, DeviceInfo, Identity, Session, SessionChange};

/// Storage backend of the session registry.
#[async_trait]
pub trait SessionRepository: Send + Sync + 'static {
    /// Create the row for `device.session_id`, or update `last_login_at`,
    /// device details and `is_active` if it already exists. `created_at` is
    /// set once.
    async fn upsert_session(
        &self,
        identity_id: &str,
        device: &DeviceInfo,
        is_active: bool,
    ) -> Result<Session, RegistryError>;

    /// Set `is_active = false` and bump `last_login_at`. Returns false if no row matched.
    async fn deactivate_session(
        &self,
        identity_id: &str,
        session_id: &str,
    ) -> Result<bool, RegistryError>;

    /// Delete the row permanently. Returns false if no row matched.
    async fn remove_session(&self, identity_id: &str, session_id: &str)
    -> Result<bool, RegistryError>;

    async fn list_sessions(&self, identity_id: &str) -> Result<Vec<Session>, RegistryError>;

    async fn get_session(
        &self,
        identity_id: &str,
        session_id: &str,
    ) -> Result<Option<Session>, RegistryError>;

    /// Subscribe to changes of any session row under `identity_id`.
    fn subscribe(&self, identity_id: &str) -> SessionSubscription;
}

/// Account metadata sink, updated on every sign-in.
#[async_trait]
pub trait AccountMetadataStore: Send + Sync + 'static {
    async fn record_sign_in(
        &self,
        identity: &Identity,
        is_new_user: bool,
    ) -> Result<AccountMetadata, RegistryError>;
}

/// Event delivered by a [`SessionSubscription`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent {
    Changed(SessionChange),
    /// Notifications were dropped; the subscriber must re-read everything.
    Resync,
}

/// Change feed for one identity's session rows.
pub struct SessionSubscription {
    identity_id: String,
    receiver: broadcast::Receiver<SessionChange>,
}

impl SessionSubscription {
    pub fn new(identity_id: &str, receiver: broadcast::Receiver<SessionChange>) -> Self {
        Self {
            identity_id: identity_id.to_string(),
            receiver,
        }
    }

    /// Wait for the next change under this identity. Returns `None` once the
    /// store has shut down.
    pub async fn next(&mut self) -> Option<SubscriptionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(change) if change.identity_id == self.identity_id => {
                    return Some(SubscriptionEvent::Changed(change));
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(identity_id = %self.identity_id, skipped, "Session subscription lagged");
                    return Some(SubscriptionEvent::Resync);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// Logging front of a [`SessionRepository`].
#[derive(Clone)]
pub struct SessionRegistry {
    repo: Arc<dyn SessionRepository>,
}

impl SessionRegistry {
    pub fn new(repo: Arc<dyn SessionRepository>) -> Self {
        Self { repo }
    }

    pub async fn upsert_session(
        &self,
        identity_id: &str,
        device: &DeviceInfo,
        is_active: bool,
    ) -> Result<Session, RegistryError> {
        let session = self
            .repo
            .upsert_session(identity_id, device, is_active)
            .await
            .inspect_err(|e| {
                warn!(uid = %identity_id, session_id = %device.session_id, error = %e, "Failed to upsert session");
            })?;
        debug!(uid = %identity_id, session_id = %device.session_id, is_active, "Session upserted");
        Ok(session)
    }

    pub async fn deactivate_session(
        &self,
        identity_id: &str,
        session_id: &str,
    ) -> Result<bool, RegistryError> {
        let found = self
            .repo
            .deactivate_session(identity_id, session_id)
            .await
            .inspect_err(|e| {
                warn!(uid = %identity_id, session_id = %session_id, error = %e, "Failed to deactivate session");
            })?;
        if found {
            info!(uid = %identity_id, session_id = %session_id, "Session deactivated");
        }
        Ok(found)
    }

    /// Delete a session row. Removing a row that is still active is allowed;
    /// the device holding it keeps believing it is signed in until its own
    /// watcher notices the deletion.
    pub async fn remove_session(
        &self,
        identity_id: &str,
        session_id: &str,
    ) -> Result<bool, RegistryError> {
        if let Ok(Some(existing)) = self.repo.get_session(identity_id, session_id).await {
            if existing.is_active {
                warn!(uid = %identity_id, session_id = %session_id, "Removing a session that is still active");
            }
        }

        let found = self
            .repo
            .remove_session(identity_id, session_id)
            .await
            .inspect_err(|e| {
                warn!(uid = %identity_id, session_id = %session_id, error = %e, "Failed to remove session");
            })?;
        if found {
            info!(uid = %identity_id, session_id = %session_id, "Session removed");
        }
        Ok(found)
    }

    pub async fn list_sessions(&self, identity_id: &str) -> Result<Vec<Session>, RegistryError> {
        self.repo.list_sessions(identity_id).await
    }

    pub async fn get_session(
        &self,
        identity_id: &str,
        session_id: &str,
    ) -> Result<Option<Session>, RegistryError> {
        self.repo.get_session(identity_id, session_id).await
    }

    pub fn subscribe(&self, identity_id: &str) -> SessionSubscription {
        self.repo.subscribe(identity_id)
    }
}
