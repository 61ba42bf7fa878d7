//! # In-Memory Remote Store
//!
//! A complete [`RemoteStore`] held in process memory. Several engines can
//! share one instance (wrap it in an `Arc`) to model a phone and a watch
//! talking to the same account.
//!
//! ## Test Hooks
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  set_account_status(NoAccount)       account signal                     │
//! │  fail_next(SaveRecord, Network)      next matching call fails           │
//! │  fail_after(FetchZoneChanges, 1, e)  let 1 call through, fail the next  │
//! │  with_latency(50ms)                  every call sleeps first            │
//! │  requests() / count(op)              what the engine actually asked     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use sip_core::{AccountStatus, EventRecord, NewEventRecord, PartitionId, QualityOfService, RecordId};

use super::{
    decode_seq, encode_seq, DatabaseChangesPage, DatabaseChangesRequest, RemoteError,
    RemoteResult, RemoteStore, SubscriptionSpec, ZoneChangesPage, ZoneChangesRequest,
};

// =============================================================================
// Request Log
// =============================================================================

/// Kind of remote call, used for fault targeting and counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    AccountStatus,
    CreateZones,
    SaveRecord,
    FetchDatabaseChanges,
    FetchZoneChanges,
    SaveSubscription,
}

/// One logged call with its interesting arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteRequest {
    AccountStatus,
    CreateZones(Vec<PartitionId>),
    SaveRecord { zone: PartitionId },
    FetchDatabaseChanges { since: i64, qos: QualityOfService },
    FetchZoneChanges { zone: PartitionId, since: i64, qos: QualityOfService },
    SaveSubscription { id: String },
}

impl RemoteRequest {
    pub fn op(&self) -> RemoteOp {
        match self {
            RemoteRequest::AccountStatus => RemoteOp::AccountStatus,
            RemoteRequest::CreateZones(_) => RemoteOp::CreateZones,
            RemoteRequest::SaveRecord { .. } => RemoteOp::SaveRecord,
            RemoteRequest::FetchDatabaseChanges { .. } => RemoteOp::FetchDatabaseChanges,
            RemoteRequest::FetchZoneChanges { .. } => RemoteOp::FetchZoneChanges,
            RemoteRequest::SaveSubscription { .. } => RemoteOp::SaveSubscription,
        }
    }
}

#[derive(Debug)]
struct Fault {
    op: RemoteOp,
    skip: usize,
    error: RemoteError,
}

// =============================================================================
// State
// =============================================================================

#[derive(Debug)]
struct MemoryState {
    account: AccountStatus,
    zones: BTreeSet<PartitionId>,
    /// (seq, record) in seq order.
    records: Vec<(i64, EventRecord)>,
    record_types: HashSet<String>,
    subscriptions: BTreeMap<String, String>,
    last_seq: i64,
    faults: VecDeque<Fault>,
    log: Vec<RemoteRequest>,
}

impl MemoryState {
    /// Logs the request and returns the injected failure for it, if any.
    fn begin(&mut self, request: RemoteRequest) -> RemoteResult<()> {
        let op = request.op();
        self.log.push(request);

        let Some(index) = self.faults.iter().position(|f| f.op == op) else {
            return Ok(());
        };

        if self.faults[index].skip > 0 {
            self.faults[index].skip -= 1;
            return Ok(());
        }

        match self.faults.remove(index) {
            Some(fault) => {
                debug!(?op, error = %fault.error, "Injected remote failure");
                Err(fault.error)
            }
            None => Ok(()),
        }
    }
}

// =============================================================================
// Store
// =============================================================================

/// In-process remote record store.
#[derive(Debug)]
pub struct MemoryRemoteStore {
    state: Mutex<MemoryState>,
    latency: Option<Duration>,
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new(AccountStatus::Available)
    }
}

impl MemoryRemoteStore {
    /// Creates an empty store reporting `account` as the account status.
    pub fn new(account: AccountStatus) -> Self {
        MemoryRemoteStore {
            state: Mutex::new(MemoryState {
                account,
                zones: BTreeSet::new(),
                records: Vec::new(),
                record_types: HashSet::new(),
                subscriptions: BTreeMap::new(),
                last_seq: 0,
                faults: VecDeque::new(),
                log: Vec::new(),
            }),
            latency: None,
        }
    }

    /// Makes every call sleep for `latency` before doing anything.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Changes the reported account status.
    pub async fn set_account_status(&self, status: AccountStatus) {
        self.state.lock().await.account = status;
    }

    /// Fails the next call of kind `op` with `error`.
    pub async fn fail_next(&self, op: RemoteOp, error: RemoteError) {
        self.fail_after(op, 0, error).await;
    }

    /// Lets `skip` calls of kind `op` succeed, then fails the following one.
    pub async fn fail_after(&self, op: RemoteOp, skip: usize, error: RemoteError) {
        self.state
            .lock()
            .await
            .faults
            .push_back(Fault { op, skip, error });
    }

    /// Marks a record type as existing without saving a record.
    pub async fn provision_record_type(&self, record_type: &str) {
        self.state
            .lock()
            .await
            .record_types
            .insert(record_type.to_string());
    }

    /// Every call made so far, in order.
    pub async fn requests(&self) -> Vec<RemoteRequest> {
        self.state.lock().await.log.clone()
    }

    /// Number of calls of kind `op` made so far.
    pub async fn count(&self, op: RemoteOp) -> usize {
        self.state
            .lock()
            .await
            .log
            .iter()
            .filter(|r| r.op() == op)
            .count()
    }

    /// Forgets the request log.
    pub async fn clear_requests(&self) {
        self.state.lock().await.log.clear();
    }

    /// Returns true if the zone exists.
    pub async fn has_zone(&self, zone: &PartitionId) -> bool {
        self.state.lock().await.zones.contains(zone)
    }

    /// Number of zones that exist.
    pub async fn zone_count(&self) -> usize {
        self.state.lock().await.zones.len()
    }

    /// All records stored in `zone`.
    pub async fn records_in(&self, zone: &PartitionId) -> Vec<EventRecord> {
        self.state
            .lock()
            .await
            .records
            .iter()
            .filter(|(_, r)| &r.partition_id == zone)
            .map(|(_, r)| r.clone())
            .collect()
    }

    /// Returns true if subscription `id` is registered.
    pub async fn has_subscription(&self, id: &str) -> bool {
        self.state.lock().await.subscriptions.contains_key(id)
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn account_status(&self) -> RemoteResult<AccountStatus> {
        self.delay().await;
        let mut state = self.state.lock().await;
        state.begin(RemoteRequest::AccountStatus)?;
        Ok(state.account)
    }

    async fn create_zones(&self, zones: &[PartitionId]) -> RemoteResult<()> {
        self.delay().await;
        let mut state = self.state.lock().await;
        state.begin(RemoteRequest::CreateZones(zones.to_vec()))?;

        for zone in zones {
            state.zones.insert(zone.clone());
        }
        Ok(())
    }

    async fn save_record(&self, record: &NewEventRecord) -> RemoteResult<RecordId> {
        self.delay().await;
        let mut state = self.state.lock().await;
        state.begin(RemoteRequest::SaveRecord {
            zone: record.partition_id.clone(),
        })?;

        if !state.zones.contains(&record.partition_id) {
            return Err(RemoteError::ZoneNotFound(record.partition_id.to_string()));
        }

        let id = RecordId::new(Uuid::new_v4().to_string());
        state.last_seq += 1;
        let seq = state.last_seq;
        state.record_types.insert(record.record_type.clone());
        state.records.push((seq, record.clone().confirm(id.clone())));

        Ok(id)
    }

    async fn fetch_database_changes(
        &self,
        request: DatabaseChangesRequest,
    ) -> RemoteResult<DatabaseChangesPage> {
        self.delay().await;
        let mut state = self.state.lock().await;
        let since = decode_seq(request.since.as_ref());
        state.begin(RemoteRequest::FetchDatabaseChanges {
            since: *since.as_ref().unwrap_or(&-1),
            qos: request.qos,
        })?;
        let since = since?;

        // First change after `since`, per zone.
        let mut first: BTreeMap<&PartitionId, i64> = BTreeMap::new();
        for (seq, record) in state.records.iter().filter(|(seq, _)| *seq > since) {
            first.entry(&record.partition_id).or_insert(*seq);
        }
        let mut zones: Vec<(PartitionId, i64)> =
            first.into_iter().map(|(z, s)| (z.clone(), s)).collect();
        zones.sort_by_key(|(_, seq)| *seq);

        let limit = request.page_size.max(1) as usize;
        let (cursor_seq, more_coming) = if zones.len() > limit {
            (zones[limit].1 - 1, true)
        } else {
            (state.last_seq.max(since), false)
        };
        zones.truncate(limit);

        Ok(DatabaseChangesPage {
            changed_zones: zones.into_iter().map(|(z, _)| z).collect(),
            cursor: encode_seq(cursor_seq),
            more_coming,
        })
    }

    async fn fetch_zone_changes(&self, request: ZoneChangesRequest) -> RemoteResult<ZoneChangesPage> {
        self.delay().await;
        let mut state = self.state.lock().await;
        let since = decode_seq(request.since.as_ref());
        state.begin(RemoteRequest::FetchZoneChanges {
            zone: request.zone.clone(),
            since: *since.as_ref().unwrap_or(&-1),
            qos: request.qos,
        })?;
        let since = since?;

        if !state.zones.contains(&request.zone) {
            return Err(RemoteError::ZoneNotFound(request.zone.to_string()));
        }

        let limit = request.page_size.max(1) as usize;
        let mut matching = state
            .records
            .iter()
            .filter(|(seq, r)| *seq > since && r.partition_id == request.zone);

        let page: Vec<(i64, EventRecord)> = matching.by_ref().take(limit).cloned().collect();
        let more_coming = matching.next().is_some();
        let cursor_seq = page.last().map(|(seq, _)| *seq).unwrap_or(since);

        Ok(ZoneChangesPage {
            records: page.into_iter().map(|(_, r)| r).collect(),
            cursor: encode_seq(cursor_seq),
            more_coming,
        })
    }

    async fn save_subscription(&self, subscription: &SubscriptionSpec) -> RemoteResult<()> {
        self.delay().await;
        let mut state = self.state.lock().await;
        state.begin(RemoteRequest::SaveSubscription {
            id: subscription.id.clone(),
        })?;

        if !state.record_types.contains(&subscription.record_type) {
            return Err(RemoteError::UnknownRecordType(subscription.record_type.clone()));
        }

        state
            .subscriptions
            .insert(subscription.id.clone(), subscription.record_type.clone());
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sip_core::{event_payload, DeviceIdentity, DEFAULT_RECORD_TYPE, DEFAULT_ZONE_SUFFIX};

    fn zone(name: &str) -> PartitionId {
        PartitionId::for_device(&DeviceIdentity::new(name).unwrap(), DEFAULT_ZONE_SUFFIX)
    }

    fn new_record(zone: &PartitionId) -> NewEventRecord {
        NewEventRecord {
            partition_id: zone.clone(),
            record_type: DEFAULT_RECORD_TYPE.to_string(),
            payload: event_payload(Utc::now()),
            created_at: Utc::now(),
        }
    }

    fn db_request(since: Option<sip_core::ChangeCursor>, page_size: u32) -> DatabaseChangesRequest {
        DatabaseChangesRequest {
            since,
            page_size,
            qos: QualityOfService::UserInitiated,
        }
    }

    #[tokio::test]
    async fn test_save_requires_zone() {
        let store = MemoryRemoteStore::default();
        let err = store.save_record(&new_record(&zone("iPhone"))).await.unwrap_err();
        assert!(matches!(err, RemoteError::ZoneNotFound(_)));

        store.create_zones(&[zone("iPhone")]).await.unwrap();
        store.create_zones(&[zone("iPhone")]).await.unwrap();
        assert_eq!(store.zone_count().await, 1);
        assert!(store.save_record(&new_record(&zone("iPhone"))).await.is_ok());
    }

    #[tokio::test]
    async fn test_database_paging_never_skips_a_zone() {
        let store = MemoryRemoteStore::default();
        let (phone, watch) = (zone("iPhone"), zone("Apple Watch"));
        store.create_zones(&[phone.clone(), watch.clone()]).await.unwrap();

        store.save_record(&new_record(&phone)).await.unwrap(); // 1
        store.save_record(&new_record(&watch)).await.unwrap(); // 2
        store.save_record(&new_record(&phone)).await.unwrap(); // 3

        let page = store.fetch_database_changes(db_request(None, 1)).await.unwrap();
        assert_eq!(page.changed_zones, vec![phone.clone()]);
        assert!(page.more_coming);

        // The watch zone's change at seq 2 is still ahead of the cursor.
        let page = store
            .fetch_database_changes(db_request(Some(page.cursor), 1))
            .await
            .unwrap();
        assert_eq!(page.changed_zones, vec![watch.clone()]);
        assert_eq!(decode_seq(Some(&page.cursor)).unwrap(), 2);
        assert!(page.more_coming);

        let page = store
            .fetch_database_changes(db_request(Some(page.cursor), 1))
            .await
            .unwrap();
        assert_eq!(page.changed_zones, vec![phone]);
        assert!(!page.more_coming);
        assert_eq!(decode_seq(Some(&page.cursor)).unwrap(), 3);
    }

    #[tokio::test]
    async fn test_zone_paging() {
        let store = MemoryRemoteStore::default();
        let phone = zone("iPhone");
        store.create_zones(&[phone.clone()]).await.unwrap();
        for _ in 0..3 {
            store.save_record(&new_record(&phone)).await.unwrap();
        }

        let request = |since| ZoneChangesRequest {
            zone: phone.clone(),
            since,
            page_size: 2,
            qos: QualityOfService::Utility,
        };

        let first = store.fetch_zone_changes(request(None)).await.unwrap();
        assert_eq!(first.records.len(), 2);
        assert!(first.more_coming);

        let second = store.fetch_zone_changes(request(Some(first.cursor))).await.unwrap();
        assert_eq!(second.records.len(), 1);
        assert!(!second.more_coming);

        let empty = store
            .fetch_zone_changes(request(Some(second.cursor.clone())))
            .await
            .unwrap();
        assert!(empty.records.is_empty());
        assert_eq!(empty.cursor, second.cursor);
    }

    #[tokio::test]
    async fn test_subscription_needs_record_type() {
        let store = MemoryRemoteStore::default();
        let spec = SubscriptionSpec {
            id: "newSipEvent".into(),
            record_type: DEFAULT_RECORD_TYPE.into(),
        };

        assert_eq!(
            store.save_subscription(&spec).await,
            Err(RemoteError::UnknownRecordType(DEFAULT_RECORD_TYPE.into()))
        );

        store.provision_record_type(DEFAULT_RECORD_TYPE).await;
        store.save_subscription(&spec).await.unwrap();
        store.save_subscription(&spec).await.unwrap();
        assert!(store.has_subscription("newSipEvent").await);
    }

    #[tokio::test]
    async fn test_fault_injection_and_log() {
        let store = MemoryRemoteStore::default();
        store
            .fail_after(RemoteOp::AccountStatus, 1, RemoteError::Network("down".into()))
            .await;

        assert_eq!(store.account_status().await.unwrap(), AccountStatus::Available);
        assert!(store.account_status().await.is_err());
        assert_eq!(store.account_status().await.unwrap(), AccountStatus::Available);

        assert_eq!(store.count(RemoteOp::AccountStatus).await, 3);
        assert_eq!(store.requests().await[0], RemoteRequest::AccountStatus);
    }

    #[tokio::test]
    async fn test_foreign_cursor_is_expired() {
        let store = MemoryRemoteStore::default();
        let err = store
            .fetch_database_changes(db_request(
                Some(sip_core::ChangeCursor::from_bytes(b"bogus".to_vec())),
                10,
            ))
            .await
            .unwrap_err();
        assert_eq!(err, RemoteError::ChangeTokenExpired);
    }
}
