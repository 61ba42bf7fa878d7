//! # Subscription Manager
//!
//! Registers the push subscription that wakes other devices when a record
//! is saved. The remote store only accepts it once the record type exists,
//! so registration is attempted after writes and change reports until it
//! sticks.
//!
//! ```text
//!   trigger ──► enabled? ──no──► Disabled
//!                  │
//!                 yes
//!                  ▼
//!            registered? ──yes──► AlreadyRegistered
//!                  │
//!                  no
//!                  ▼
//!            try_lock ──busy──► InFlight
//!                  │
//!                  ▼
//!          save_subscription ──► Registered
//!                  │
//!                  └── UnknownRecordType ──► SubscriptionNotYetPossible
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use sip_core::SUBSCRIPTION_FLAG_KEY;
use sip_db::LocalCacheRepository;

use crate::error::{SyncError, SyncResult};
use crate::remote::{RemoteStore, SubscriptionSpec};

/// Result of one registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionOutcome {
    /// This attempt registered the subscription; persist the flag.
    Registered,
    AlreadyRegistered,
    /// Another attempt is running.
    InFlight,
    /// Subscriptions are turned off in the configuration.
    Disabled,
}

/// Guards subscription registration.
pub struct SubscriptionManager {
    remote: Arc<dyn RemoteStore>,
    spec: SubscriptionSpec,
    enabled: bool,
    registered: AtomicBool,
    attempt: Mutex<()>,
}

impl SubscriptionManager {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        spec: SubscriptionSpec,
        enabled: bool,
        registered: bool,
    ) -> Self {
        SubscriptionManager {
            remote,
            spec,
            enabled,
            registered: AtomicBool::new(registered),
            attempt: Mutex::new(()),
        }
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    pub fn spec(&self) -> &SubscriptionSpec {
        &self.spec
    }

    /// Makes one registration attempt unless one is pointless.
    pub async fn ensure_subscription(&self) -> SyncResult<SubscriptionOutcome> {
        if !self.enabled {
            return Ok(SubscriptionOutcome::Disabled);
        }
        if self.is_registered() {
            return Ok(SubscriptionOutcome::AlreadyRegistered);
        }

        let Ok(_guard) = self.attempt.try_lock() else {
            debug!(subscription_id = %self.spec.id, "Subscription attempt already in flight");
            return Ok(SubscriptionOutcome::InFlight);
        };

        // Someone may have finished while we waited for the lock.
        if self.is_registered() {
            return Ok(SubscriptionOutcome::AlreadyRegistered);
        }

        match self.remote.save_subscription(&self.spec).await {
            Ok(()) => {
                self.registered.store(true, Ordering::Release);
                info!(
                    subscription_id = %self.spec.id,
                    record_type = %self.spec.record_type,
                    "Subscription registered"
                );
                Ok(SubscriptionOutcome::Registered)
            }
            Err(err) => {
                let err = SyncError::from(err);
                if err.is_benign() {
                    debug!(record_type = %self.spec.record_type, "Record type not provisioned yet");
                }
                Err(err)
            }
        }
    }
}

/// Reads the persisted "registered" flag from the local cache.
pub async fn load_subscription_flag(cache: &LocalCacheRepository) -> SyncResult<bool> {
    Ok(cache.get_flag(SUBSCRIPTION_FLAG_KEY).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemoryRemoteStore, RemoteOp};
    use sip_core::{FieldValue, DEFAULT_RECORD_TYPE, DEFAULT_SUBSCRIPTION_ID};
    use sip_db::{Database, DbConfig};

    fn spec() -> SubscriptionSpec {
        SubscriptionSpec {
            id: DEFAULT_SUBSCRIPTION_ID.into(),
            record_type: DEFAULT_RECORD_TYPE.into(),
        }
    }

    #[tokio::test]
    async fn test_not_yet_possible_then_registered() {
        let remote = Arc::new(MemoryRemoteStore::default());
        let manager = SubscriptionManager::new(remote.clone(), spec(), true, false);

        let err = manager.ensure_subscription().await.unwrap_err();
        assert!(err.is_benign());
        assert!(!manager.is_registered());

        remote.provision_record_type(DEFAULT_RECORD_TYPE).await;
        assert_eq!(
            manager.ensure_subscription().await.unwrap(),
            SubscriptionOutcome::Registered
        );
        assert_eq!(
            manager.ensure_subscription().await.unwrap(),
            SubscriptionOutcome::AlreadyRegistered
        );
        assert_eq!(remote.count(RemoteOp::SaveSubscription).await, 2);
    }

    #[tokio::test]
    async fn test_disabled_and_preregistered_skip_remote() {
        let remote = Arc::new(MemoryRemoteStore::default());

        let disabled = SubscriptionManager::new(remote.clone(), spec(), false, false);
        assert_eq!(
            disabled.ensure_subscription().await.unwrap(),
            SubscriptionOutcome::Disabled
        );

        let done = SubscriptionManager::new(remote.clone(), spec(), true, true);
        assert_eq!(
            done.ensure_subscription().await.unwrap(),
            SubscriptionOutcome::AlreadyRegistered
        );

        assert!(remote.requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_attempts_collapse() {
        let remote = Arc::new(
            MemoryRemoteStore::default().with_latency(std::time::Duration::from_millis(20)),
        );
        remote.provision_record_type(DEFAULT_RECORD_TYPE).await;
        let manager = Arc::new(SubscriptionManager::new(remote.clone(), spec(), true, false));

        let (a, b) = tokio::join!(manager.ensure_subscription(), manager.ensure_subscription());
        let mut outcomes = vec![a.unwrap(), b.unwrap()];
        outcomes.sort_by_key(|o| *o == SubscriptionOutcome::Registered);

        assert_eq!(
            outcomes,
            vec![SubscriptionOutcome::InFlight, SubscriptionOutcome::Registered]
        );
        assert_eq!(remote.count(RemoteOp::SaveSubscription).await, 1);
    }

    #[tokio::test]
    async fn test_flag_roundtrip_through_cache() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let cache = db.cache();
        assert!(!load_subscription_flag(&cache).await.unwrap());

        cache
            .put_value(SUBSCRIPTION_FLAG_KEY, &FieldValue::Bool(true))
            .await
            .unwrap();
        assert!(load_subscription_flag(&cache).await.unwrap());
    }
}
