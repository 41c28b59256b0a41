//! Session watcher: live views over the session registry.
//!
//! Each watch runs as its own task and is cancelled when its [`WatchHandle`]
//! is dropped. Subscriptions are taken before the call returns, so no change
//! made after `watch_*` returns can be missed.

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::registry::{SessionRegistry, SessionSubscription, SubscriptionEvent};
use super::types::{Session, tag_current_session};

/// Owns a watch task. Dropping it aborts the task.
#[derive(Debug)]
pub struct WatchHandle {
    task: JoinHandle<()>,
}

impl WatchHandle {
    pub(crate) fn from_task(task: JoinHandle<()>) -> Self {
        Self { task }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Clone)]
pub struct SessionWatcher {
    registry: SessionRegistry,
}

impl SessionWatcher {
    pub fn new(registry: SessionRegistry) -> Self {
        Self { registry }
    }

    /// Publish the full, tagged session list of `identity_id` now and after
    /// every change to any of its rows.
    pub fn watch_all_sessions<F>(
        &self,
        identity_id: &str,
        current_session_id: &str,
        on_change: F,
    ) -> WatchHandle
    where
        F: Fn(Vec<Session>) + Send + Sync + 'static,
    {
        let registry = self.registry.clone();
        let mut subscription = registry.subscribe(identity_id);
        let identity_id = identity_id.to_string();
        let current_session_id = current_session_id.to_string();

        WatchHandle::from_task(tokio::spawn(async move {
            loop {
                match registry.list_sessions(&identity_id).await {
                    Ok(mut sessions) => {
                        tag_current_session(&mut sessions, &current_session_id);
                        on_change(sessions);
                    }
                    Err(e) => {
                        warn!(uid = %identity_id, error = %e, "Failed to list sessions");
                    }
                }
                if subscription.next().await.is_none() {
                    debug!(uid = %identity_id, "Session feed closed");
                    return;
                }
            }
        }))
    }

    /// Call `on_revoked` once if this device's row is deleted or deactivated.
    ///
    /// Only changes observed after this call count: a row that was never
    /// written does not revoke anything.
    pub fn watch_own_session<F>(
        &self,
        identity_id: &str,
        session_id: &str,
        on_revoked: F,
    ) -> WatchHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let subscription = self.registry.subscribe(identity_id);
        self.watch_own_session_from(subscription, identity_id, session_id, on_revoked)
    }

    /// Like [`watch_own_session`](Self::watch_own_session), counting changes
    /// from when `subscription` was taken.
    pub fn watch_own_session_from<F>(
        &self,
        mut subscription: SessionSubscription,
        identity_id: &str,
        session_id: &str,
        on_revoked: F,
    ) -> WatchHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let registry = self.registry.clone();
        let identity_id = identity_id.to_string();
        let session_id = session_id.to_string();

        WatchHandle::from_task(tokio::spawn(async move {
            loop {
                match subscription.next().await {
                    Some(SubscriptionEvent::Changed(change)) if change.session_id != session_id => {
                        continue;
                    }
                    Some(_) => {}
                    None => return,
                }

                match registry.get_session(&identity_id, &session_id).await {
                    Ok(Some(row)) if row.is_active => continue,
                    Ok(_) => {
                        info!(uid = %identity_id, session_id = %session_id, "Own session revoked remotely");
                        on_revoked();
                        return;
                    }
                    Err(e) => {
                        warn!(uid = %identity_id, session_id = %session_id, error = %e, "Failed to read own session");
                    }
                }
            }
        }))
    }
}
