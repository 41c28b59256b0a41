//! Token refresh scheduling and cross-tab coordination.
//!
//! Every tab runs a refresh loop while signed in. After refreshing it
//! publishes a [`RefreshSignal`] on the shared [`RefreshChannel`]; siblings
//! that hear it push their own next refresh back by a full interval, after a
//! short debounce so a burst of signals reschedules only once.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::debug;

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_REFRESH_DEBOUNCE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefreshKind {
    #[serde(rename = "token-refreshed")]
    TokenRefreshed,
}

/// Message announcing that some tab just refreshed the shared token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshSignal {
    pub kind: RefreshKind,
    pub at: DateTime<Utc>,
    /// Tab that performed the refresh.
    pub origin: String,
}

/// Pub/sub channel shared by every tab of one browser profile.
#[derive(Debug, Clone)]
pub struct RefreshChannel {
    sender: broadcast::Sender<RefreshSignal>,
}

impl RefreshChannel {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self { sender }
    }

    pub fn publish(&self, origin: &str) {
        let _ = self.sender.send(RefreshSignal {
            kind: RefreshKind::TokenRefreshed,
            at: Utc::now(),
            origin: origin.to_string(),
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RefreshSignal> {
        self.sender.subscribe()
    }
}

impl Default for RefreshChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RefreshSchedule {
    pub interval: Duration,
    pub debounce: Duration,
    pub tab_id: String,
}

/// Drive `tick` every `schedule.interval` while `visible` is true.
///
/// A refresh from another tab postpones the next tick to one interval after
/// the debounce settles. Becoming visible again restarts the interval from
/// now. Returns when `tick` reports false or the visibility sender is gone.
pub(crate) async fn run_refresh_loop<F, Fut>(
    schedule: RefreshSchedule,
    mut signals: broadcast::Receiver<RefreshSignal>,
    mut visible: watch::Receiver<bool>,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let mut deadline = Instant::now() + schedule.interval;
    let mut settle_at: Option<Instant> = None;
    let mut signals_open = true;

    loop {
        if !*visible.borrow_and_update() {
            if visible.changed().await.is_err() {
                return;
            }
            deadline = Instant::now() + schedule.interval;
            settle_at = None;
            continue;
        }

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                if !tick().await {
                    return;
                }
                deadline = Instant::now() + schedule.interval;
            }
            _ = tokio::time::sleep_until(settle_at.unwrap_or(deadline)), if settle_at.is_some() => {
                settle_at = None;
                deadline = Instant::now() + schedule.interval;
                debug!(tab_id = %schedule.tab_id, "Refresh rescheduled after sibling refresh");
            }
            changed = visible.changed() => {
                if changed.is_err() {
                    return;
                }
                if *visible.borrow() {
                    deadline = Instant::now() + schedule.interval;
                }
            }
            signal = signals.recv(), if signals_open => match signal {
                Ok(signal) if signal.origin != schedule.tab_id => {
                    settle_at = Some(Instant::now() + schedule.debounce);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    settle_at = Some(Instant::now() + schedule.debounce);
                }
                Err(broadcast::error::RecvError::Closed) => signals_open = false,
            },
        }
    }
}
