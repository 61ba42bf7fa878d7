//! # Partition Manager
//!
//! Makes sure the device's zone exists remotely before anything is written
//! to it. Creation is a single batched request and is idempotent on the
//! remote side; the "ready" flag lives only in memory.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use sip_core::{AvailabilityState, DeviceIdentity, PartitionId};

use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteStore;

/// Creates and remembers the device partition.
pub struct PartitionManager {
    remote: Arc<dyn RemoteStore>,
    zone_suffix: String,
    ready: RwLock<Option<PartitionId>>,
}

impl PartitionManager {
    pub fn new(remote: Arc<dyn RemoteStore>, zone_suffix: impl Into<String>) -> Self {
        PartitionManager {
            remote,
            zone_suffix: zone_suffix.into(),
            ready: RwLock::new(None),
        }
    }

    /// Zone name for `device`.
    pub fn partition_for(&self, device: &DeviceIdentity) -> PartitionId {
        PartitionId::for_device(device, &self.zone_suffix)
    }

    /// Ensures the partition for `device` exists.
    pub async fn ensure_partition(
        &self,
        device: &DeviceIdentity,
        availability: AvailabilityState,
    ) -> SyncResult<PartitionId> {
        let zone = self.partition_for(device);
        self.ensure_zone(&zone, availability).await?;
        Ok(zone)
    }

    /// Ensures `zone` exists.
    ///
    /// Fails with `AccountUnavailable` without contacting the remote store
    /// unless the account permits writes.
    pub async fn ensure_zone(
        &self,
        zone: &PartitionId,
        availability: AvailabilityState,
    ) -> SyncResult<()> {
        if !availability.permits_writes() {
            debug!(zone = %zone, state = %availability, "Skipping zone creation");
            return Err(SyncError::AccountUnavailable {
                state: availability,
            });
        }

        if self.ready.read().await.as_ref() == Some(zone) {
            return Ok(());
        }

        match self.remote.create_zones(std::slice::from_ref(zone)).await {
            Ok(()) => {
                info!(zone = %zone, "Partition ready");
                *self.ready.write().await = Some(zone.clone());
                Ok(())
            }
            Err(err) => {
                warn!(zone = %zone, error = %err, "Partition creation failed");
                Err(err.into())
            }
        }
    }

    /// The partition created so far, if any.
    pub async fn ready_partition(&self) -> Option<PartitionId> {
        self.ready.read().await.clone()
    }

    pub async fn is_ready(&self, zone: &PartitionId) -> bool {
        self.ready.read().await.as_ref() == Some(zone)
    }

    /// Forgets the ready flag, e.g. after the account went away.
    pub async fn invalidate(&self) {
        *self.ready.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemoryRemoteStore, RemoteError, RemoteOp};
    use sip_core::DEFAULT_ZONE_SUFFIX;

    fn device() -> DeviceIdentity {
        DeviceIdentity::new("iPhone").unwrap()
    }

    #[tokio::test]
    async fn test_creation_is_idempotent() {
        let remote = Arc::new(MemoryRemoteStore::default());
        let manager = PartitionManager::new(remote.clone(), DEFAULT_ZONE_SUFFIX);

        let zone = manager
            .ensure_partition(&device(), AvailabilityState::Available)
            .await
            .unwrap();
        assert_eq!(zone.as_str(), "iPhone Zone");
        manager
            .ensure_partition(&device(), AvailabilityState::Available)
            .await
            .unwrap();

        assert_eq!(remote.count(RemoteOp::CreateZones).await, 1);
        assert_eq!(remote.zone_count().await, 1);
        assert!(manager.is_ready(&zone).await);

        // Forgetting the flag re-issues a request but still yields one zone.
        manager.invalidate().await;
        manager
            .ensure_partition(&device(), AvailabilityState::Available)
            .await
            .unwrap();
        assert_eq!(remote.zone_count().await, 1);
    }

    #[tokio::test]
    async fn test_unavailable_account_never_contacts_remote() {
        let remote = Arc::new(MemoryRemoteStore::default());
        let manager = PartitionManager::new(remote.clone(), DEFAULT_ZONE_SUFFIX);

        let err = manager
            .ensure_partition(&device(), AvailabilityState::Indeterminate)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::AccountUnavailable { .. }));
        assert!(remote.requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_failure_leaves_partition_unready() {
        let remote = Arc::new(MemoryRemoteStore::default());
        remote
            .fail_next(RemoteOp::CreateZones, RemoteError::ServiceUnavailable("503".into()))
            .await;
        let manager = PartitionManager::new(remote.clone(), DEFAULT_ZONE_SUFFIX);

        let err = manager
            .ensure_partition(&device(), AvailabilityState::Available)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(manager.ready_partition().await.is_none());
    }
}
