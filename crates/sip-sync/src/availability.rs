//! # Account Availability
//!
//! Asks the remote store for the account status and publishes the result as
//! an [`AvailabilityState`]. A failed check is `Indeterminate`, never an
//! error: the engine keeps running and waits for the next account signal.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use sip_core::AvailabilityState;

use crate::remote::RemoteStore;

/// Tracks the latest known account availability.
pub struct AvailabilityTracker {
    remote: Arc<dyn RemoteStore>,
    state_tx: watch::Sender<AvailabilityState>,
}

impl AvailabilityTracker {
    /// Creates a tracker starting in [`AvailabilityState::Unknown`].
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        let (state_tx, _) = watch::channel(AvailabilityState::Unknown);
        AvailabilityTracker { remote, state_tx }
    }

    /// Queries the account status once and publishes it.
    pub async fn check(&self) -> AvailabilityState {
        let state = match self.remote.account_status().await {
            Ok(status) => AvailabilityState::from(status),
            Err(err) => {
                warn!(error = %err, "Account status check failed");
                AvailabilityState::Indeterminate
            }
        };

        let previous = self.state_tx.send_replace(state);
        if previous != state {
            info!(from = %previous, to = %state, "Account availability changed");
        }
        state
    }

    /// Last published state.
    pub fn current(&self) -> AvailabilityState {
        *self.state_tx.borrow()
    }

    /// Subscribes to availability changes.
    pub fn subscribe(&self) -> watch::Receiver<AvailabilityState> {
        self.state_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemoryRemoteStore, RemoteError, RemoteOp};
    use sip_core::AccountStatus;

    #[tokio::test]
    async fn test_status_mapping() {
        let remote = Arc::new(MemoryRemoteStore::new(AccountStatus::Restricted));
        let tracker = AvailabilityTracker::new(remote.clone());
        assert_eq!(tracker.current(), AvailabilityState::Unknown);

        assert_eq!(tracker.check().await, AvailabilityState::Restricted);

        remote.set_account_status(AccountStatus::Available).await;
        assert_eq!(tracker.check().await, AvailabilityState::Available);
        assert_eq!(tracker.current(), AvailabilityState::Available);
    }

    #[tokio::test]
    async fn test_failed_check_is_indeterminate() {
        let remote = Arc::new(MemoryRemoteStore::default());
        remote
            .fail_next(RemoteOp::AccountStatus, RemoteError::Network("offline".into()))
            .await;

        let tracker = AvailabilityTracker::new(remote);
        let mut rx = tracker.subscribe();

        assert_eq!(tracker.check().await, AvailabilityState::Indeterminate);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), AvailabilityState::Indeterminate);
    }
}
