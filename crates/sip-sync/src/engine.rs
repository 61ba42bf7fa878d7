//! # Sync Engine
//!
//! Ties availability, partition, cursor and subscription handling together
//! behind one cloneable handle.
//!
//! ## Paths
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          SyncEngine                                     │
//! │                                                                         │
//! │  check_availability ─┐                                                  │
//! │  set_device_identity ┴──► ReadinessMachine ──► effects                  │
//! │                              │                  CreatePartition         │
//! │                              │                  PromptSignIn            │
//! │                              ▼                  EnteredReady ──► flush  │
//! │                          SyncPhase (watch)                   relays     │
//! │                                                                         │
//! │  push_event ──► save_record ──► gateway.apply ──► ensure_subscription   │
//! │                                                                         │
//! │  pull_changes ──► [coalesce] ──► spawn                                  │
//! │        for each database page:                                          │
//! │            for each changed zone: drain pages ──► gateway.apply         │
//! │            save page cursor                                             │
//! │        completion ──► main context                                      │
//! │                                                                         │
//! │  record_event ──► Ready? push : relay to peer                           │
//! │  merge_peer_message ──► Event: push or queue │ Snapshot: cache values   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//! - Push and pull only run in [`SyncPhase::Ready`]; otherwise they fail
//!   with `PartitionNotReady` before any remote request.
//! - At most one pull runs at a time. Pulls requested meanwhile join it.
//! - The cursor is saved after each database page, so an interrupted pull
//!   resumes at the last finished page and re-applies at worst one page.
//! - Nothing is retried internally.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{oneshot, watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use sip_core::validation::validate_payload;
use sip_core::{
    AvailabilityState, ChangeCursor, DeviceIdentity, FieldValue, NewEventRecord, PartitionId,
    Payload, PullTrigger, QualityOfService, ReadinessEffect, ReadinessEvent, ReadinessMachine,
    RecordId, SyncPhase, SUBSCRIPTION_FLAG_KEY,
};
use sip_db::Database;

use crate::availability::AvailabilityTracker;
use crate::config::SyncConfig;
use crate::cursor::{CursorStore, MemoryCursorStore, SqliteCursorStore};
use crate::error::{SyncError, SyncResult};
use crate::main_context::MainContextHandle;
use crate::partition::PartitionManager;
use crate::peer::{PeerLink, PeerMessage};
use crate::remote::{DatabaseChangesRequest, RemoteStore, SubscriptionSpec, ZoneChangesRequest};
use crate::subscription::{load_subscription_flag, SubscriptionManager, SubscriptionOutcome};

// =============================================================================
// Public Types
// =============================================================================

/// What a finished pull did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullSummary {
    pub trigger: PullTrigger,
    /// Database-changes pages fetched.
    pub pages: usize,
    /// Zones reported changed, summed over pages.
    pub zones_changed: usize,
    /// Records handed to the gateway (duplicates included).
    pub records_applied: usize,
}

impl PullSummary {
    fn new(trigger: PullTrigger) -> Self {
        PullSummary {
            trigger,
            pages: 0,
            zones_changed: 0,
            records_applied: 0,
        }
    }
}

/// Outcome of [`SyncEngine::record_event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Saved remotely under this id.
    Pushed(RecordId),
    /// Handed to the paired device for it to push.
    Relayed,
}

type PullResult = SyncResult<PullSummary>;

/// Receipt for a requested pull.
#[derive(Debug)]
pub struct PullTicket {
    rx: oneshot::Receiver<PullResult>,
}

impl PullTicket {
    /// Waits for the pull this ticket joined.
    pub async fn wait(self) -> PullResult {
        self.rx.await.map_err(|_| SyncError::ShuttingDown)?
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`SyncEngine`].
pub struct SyncEngineBuilder {
    config: SyncConfig,
    remote: Arc<dyn RemoteStore>,
    main: MainContextHandle,
    cursors: Option<Arc<dyn CursorStore>>,
    peer: Option<Arc<dyn PeerLink>>,
    subscription_registered: bool,
}

impl SyncEngineBuilder {
    /// Uses `cursors` for the change cursor.
    ///
    /// Without this (or [`local_cache`](Self::local_cache)) the cursor only
    /// lives in memory.
    pub fn cursor_store(mut self, cursors: Arc<dyn CursorStore>) -> Self {
        self.cursors = Some(cursors);
        self
    }

    /// Keeps the cursor in `db` and picks up the persisted subscription flag.
    pub async fn local_cache(mut self, db: &Database) -> SyncResult<Self> {
        let cache = db.cache();
        self.subscription_registered = load_subscription_flag(&cache).await?;
        self.cursors = Some(Arc::new(SqliteCursorStore::new(cache)));
        Ok(self)
    }

    /// Connects a paired device.
    pub fn peer(mut self, peer: Arc<dyn PeerLink>) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Whether the push subscription is already known to be registered.
    pub fn subscription_registered(mut self, registered: bool) -> Self {
        self.subscription_registered = registered;
        self
    }

    /// Validates the configuration and builds the engine.
    pub fn build(self) -> SyncResult<SyncEngine> {
        self.config.validate()?;

        let mut machine = ReadinessMachine::new(self.config.remote.zone_suffix.clone());
        if let Some(identity) = self.config.device_identity()? {
            machine.apply(ReadinessEvent::DeviceIdentitySet(identity));
        }

        let spec = SubscriptionSpec {
            id: self.config.remote.subscription_id.clone(),
            record_type: self.config.remote.record_type.clone(),
        };
        let subscriptions = SubscriptionManager::new(
            self.remote.clone(),
            spec,
            self.config.subscriptions_enabled(),
            self.subscription_registered,
        );

        let (phase_tx, _) = watch::channel(machine.phase());
        let cursors = self
            .cursors
            .unwrap_or_else(|| Arc::new(MemoryCursorStore::new()));

        info!(
            device = ?machine.identity().map(|d| d.as_str().to_string()),
            name = %self.config.device.name,
            record_type = %self.config.remote.record_type,
            subscriptions = self.config.subscriptions_enabled(),
            peer = self.peer.is_some(),
            "Sync engine created"
        );

        Ok(SyncEngine {
            inner: Arc::new(EngineInner {
                availability: AvailabilityTracker::new(self.remote.clone()),
                partitions: PartitionManager::new(
                    self.remote.clone(),
                    self.config.remote.zone_suffix.clone(),
                ),
                subscriptions,
                config: self.config,
                remote: self.remote,
                cursors,
                main: self.main,
                peer: self.peer,
                machine: Mutex::new(machine),
                phase_tx,
                ready_zone: RwLock::new(None),
                pull_waiters: Mutex::new(None),
                pending_relays: Mutex::new(VecDeque::new()),
                shut_down: AtomicBool::new(false),
            }),
        })
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Handle to the sync engine. Clones share one engine.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

struct EngineInner {
    config: SyncConfig,
    remote: Arc<dyn RemoteStore>,
    cursors: Arc<dyn CursorStore>,
    main: MainContextHandle,
    peer: Option<Arc<dyn PeerLink>>,
    availability: AvailabilityTracker,
    partitions: PartitionManager,
    subscriptions: SubscriptionManager,
    /// Held for a whole transition including its effects.
    machine: Mutex<ReadinessMachine>,
    phase_tx: watch::Sender<SyncPhase>,
    /// Set while the phase is `Ready`.
    ready_zone: RwLock<Option<PartitionId>>,
    /// `Some` while a pull runs; everyone waiting on it.
    pull_waiters: Mutex<Option<Vec<oneshot::Sender<PullResult>>>>,
    /// Peer events waiting for `Ready`, oldest first.
    pending_relays: Mutex<VecDeque<Payload>>,
    shut_down: AtomicBool,
}

impl SyncEngine {
    /// Starts building an engine.
    pub fn builder(
        config: SyncConfig,
        remote: Arc<dyn RemoteStore>,
        main: MainContextHandle,
    ) -> SyncEngineBuilder {
        SyncEngineBuilder {
            config,
            remote,
            main,
            cursors: None,
            peer: None,
            subscription_registered: false,
        }
    }

    // =========================================================================
    // Readiness
    // =========================================================================

    /// Asks the remote store for the account status and reacts to it.
    ///
    /// Partition creation failures are logged, not returned; the next
    /// availability or identity signal tries again.
    pub async fn check_availability(&self) -> AvailabilityState {
        let state = self.inner.availability.check().await;
        if let Some(err) = self.drive(ReadinessEvent::AvailabilityChanged(state)).await {
            warn!(error = %err, "Partition not created after availability check");
        }
        state
    }

    /// Reacts to an "account changed" signal from the platform.
    pub async fn account_changed(&self) -> AvailabilityState {
        info!("Account changed, re-checking availability");
        self.check_availability().await
    }

    /// Records the device identity. Creates the partition if the account
    /// is available; a creation failure is returned.
    pub async fn set_device_identity(&self, identity: DeviceIdentity) -> SyncResult<SyncPhase> {
        info!(device = %identity, "Device identity set");
        match self.drive(ReadinessEvent::DeviceIdentitySet(identity)).await {
            Some(err) => Err(err),
            None => Ok(self.phase()),
        }
    }

    pub fn phase(&self) -> SyncPhase {
        *self.inner.phase_tx.borrow()
    }

    /// Subscribes to phase changes.
    pub fn subscribe_phase(&self) -> watch::Receiver<SyncPhase> {
        self.inner.phase_tx.subscribe()
    }

    pub fn availability(&self) -> AvailabilityState {
        self.inner.availability.current()
    }

    /// Subscribes to availability changes.
    pub fn subscribe_availability(&self) -> watch::Receiver<AvailabilityState> {
        self.inner.availability.subscribe()
    }

    /// The device partition, once ready.
    pub async fn partition(&self) -> Option<PartitionId> {
        self.inner.ready_zone.read().await.clone()
    }

    pub fn is_subscription_registered(&self) -> bool {
        self.inner.subscriptions.is_registered()
    }

    /// Feeds `event` through the machine and runs the resulting effects
    /// until nothing is left. Returns the last partition creation error.
    async fn drive(&self, event: ReadinessEvent) -> Option<SyncError> {
        let inner = &self.inner;
        let mut machine = inner.machine.lock().await;
        let mut events = VecDeque::from([event]);
        let mut failure = None;
        let mut entered_ready = false;

        while let Some(event) = events.pop_front() {
            let transition = machine.apply(event);

            if transition.changed() {
                info!(from = %transition.from, to = %transition.to, "Sync phase changed");
                if transition.to != SyncPhase::Ready {
                    *inner.ready_zone.write().await = None;
                }
                if transition.to == SyncPhase::NotReady {
                    inner.partitions.invalidate().await;
                }
            }

            for effect in transition.effects {
                match effect {
                    ReadinessEffect::CreatePartition(zone) => {
                        match inner.partitions.ensure_zone(&zone, machine.availability()).await {
                            Ok(()) => events.push_back(ReadinessEvent::PartitionCreated(zone)),
                            Err(err) => {
                                failure = Some(err);
                                events.push_back(ReadinessEvent::PartitionCreationFailed(zone));
                            }
                        }
                    }
                    ReadinessEffect::PromptSignIn => {
                        if let Err(err) = inner.main.prompt_sign_in().await {
                            warn!(error = %err, "Could not queue sign-in prompt");
                        }
                    }
                    ReadinessEffect::EnteredReady(zone) => {
                        *inner.ready_zone.write().await = Some(zone);
                        entered_ready = true;
                    }
                }
            }

            inner.phase_tx.send_replace(transition.to);
        }

        if machine.phase() == SyncPhase::Ready {
            failure = None;
        }
        drop(machine);

        if entered_ready {
            self.flush_pending_relays().await;
        }
        failure
    }

    /// The ready partition, or why there is none.
    async fn ready_partition(&self) -> SyncResult<PartitionId> {
        if self.inner.shut_down.load(Ordering::Acquire) {
            return Err(SyncError::ShuttingDown);
        }

        let phase = self.phase();
        match self.inner.ready_zone.read().await.clone() {
            Some(zone) if phase.permits_sync() => Ok(zone),
            _ => Err(SyncError::PartitionNotReady { phase }),
        }
    }

    // =========================================================================
    // Push
    // =========================================================================

    /// Saves one event in the device partition.
    ///
    /// On success the confirmed record goes through the gateway and the
    /// push subscription is registered if it is not yet. Neither of those
    /// follow-ups can fail the push.
    pub async fn push_event(&self, payload: Payload) -> SyncResult<RecordId> {
        let zone = self.ready_partition().await?;
        validate_payload(&payload)?;

        let record = NewEventRecord {
            partition_id: zone,
            record_type: self.inner.config.remote.record_type.clone(),
            payload,
            created_at: Utc::now(),
        };

        let id = match self.inner.remote.save_record(&record).await {
            Ok(id) => id,
            Err(err) => {
                warn!(zone = %record.partition_id, error = %err, "Push failed");
                return Err(err.into());
            }
        };
        info!(zone = %record.partition_id, record_id = %id, "Event pushed");

        if let Err(err) = self.inner.main.apply_record(record.confirm(id.clone())).await {
            error!(record_id = %id, error = %err, "Pushed record not applied locally");
        }

        self.register_subscription().await;
        Ok(id)
    }

    /// One subscription attempt; persists the flag when it succeeds.
    async fn register_subscription(&self) {
        match self.inner.subscriptions.ensure_subscription().await {
            Ok(SubscriptionOutcome::Registered) => {
                if let Err(err) = self
                    .inner
                    .main
                    .cache_value(SUBSCRIPTION_FLAG_KEY, FieldValue::Bool(true))
                    .await
                {
                    warn!(error = %err, "Subscription flag not cached");
                }
            }
            Ok(_) => {}
            Err(err) if err.is_benign() => {
                debug!(error = %err, "Subscription deferred");
            }
            Err(err) => {
                warn!(error = %err, "Subscription registration failed");
            }
        }
    }

    // =========================================================================
    // Pull
    // =========================================================================

    /// Starts a pull, or joins the one already running.
    ///
    /// Returns right away; the work runs on a background task.
    pub async fn pull_changes(&self, trigger: PullTrigger) -> SyncResult<PullTicket> {
        self.ready_partition().await?;

        let (tx, rx) = oneshot::channel();
        let mut waiters = self.inner.pull_waiters.lock().await;

        match waiters.as_mut() {
            Some(joined) => {
                debug!(%trigger, waiting = joined.len() + 1, "Joining in-flight pull");
                joined.push(tx);
            }
            None => {
                *waiters = Some(vec![tx]);
                let engine = self.clone();
                tokio::spawn(async move {
                    let worker = engine.clone();
                    let result = tokio::spawn(async move { worker.run_pull(trigger).await })
                        .await
                        .unwrap_or_else(|err| {
                            error!(%trigger, error = %err, "Pull task failed");
                            Err(SyncError::Internal(format!("pull task failed: {err}")))
                        });

                    // Runs even if the pull panicked.
                    let joined = engine.inner.pull_waiters.lock().await.take();
                    for waiter in joined.unwrap_or_default() {
                        let _ = waiter.send(result.clone());
                    }
                });
            }
        }

        Ok(PullTicket { rx })
    }

    /// Starts a pull and runs `completion` with its outcome on the main
    /// context, after every record it applied.
    ///
    /// `completion` runs exactly once, also when the pull could not start.
    pub fn pull_changes_with<F>(&self, trigger: PullTrigger, completion: F)
    where
        F: FnOnce(PullResult) + Send + 'static,
    {
        let engine = self.clone();
        tokio::spawn(async move {
            let result = match engine.pull_changes(trigger).await {
                Ok(ticket) => ticket.wait().await,
                Err(err) => Err(err),
            };

            if let Err(err) = engine.inner.main.invoke(move || completion(result)).await {
                error!(error = %err, "Pull completion dropped");
            }
        });
    }

    async fn run_pull(&self, trigger: PullTrigger) -> PullResult {
        let qos = trigger.quality_of_service();
        info!(%trigger, %qos, "Pull started");

        match self.fetch_all(trigger, qos).await {
            Ok(summary) => {
                if summary.zones_changed > 0 {
                    self.register_subscription().await;
                }
                info!(
                    %trigger,
                    pages = summary.pages,
                    zones = summary.zones_changed,
                    records = summary.records_applied,
                    "Pull finished"
                );
                Ok(summary)
            }
            Err(SyncError::CursorExpired) => {
                warn!("Change cursor expired, next pull starts over");
                self.inner.cursors.reset().await?;
                Err(SyncError::CursorExpired)
            }
            Err(err) => {
                warn!(%trigger, error = %err, "Pull aborted");
                Err(err)
            }
        }
    }

    /// Drains every database page, saving the cursor after each one.
    async fn fetch_all(&self, trigger: PullTrigger, qos: QualityOfService) -> PullResult {
        let inner = &self.inner;
        let mut summary = PullSummary::new(trigger);
        let mut cursor = inner.cursors.load().await?;

        loop {
            let page = inner
                .remote
                .fetch_database_changes(DatabaseChangesRequest {
                    since: cursor.clone(),
                    page_size: inner.config.pull.database_page_size,
                    qos,
                })
                .await?;
            summary.pages += 1;

            debug!(
                page = summary.pages,
                zones = page.changed_zones.len(),
                more_coming = page.more_coming,
                "Database changes page"
            );

            // Zones on this page are read from where the page started.
            for zone in &page.changed_zones {
                summary.records_applied += self.drain_zone(zone, cursor.clone(), qos).await?;
            }
            summary.zones_changed += page.changed_zones.len();

            inner.cursors.save(&page.cursor).await?;
            cursor = Some(page.cursor);

            if !page.more_coming {
                return Ok(summary);
            }
        }
    }

    /// Applies every record of `zone` after `since`. Returns how many.
    async fn drain_zone(
        &self,
        zone: &PartitionId,
        since: Option<ChangeCursor>,
        qos: QualityOfService,
    ) -> SyncResult<usize> {
        let mut since = since;
        let mut applied = 0;

        loop {
            let page = self
                .inner
                .remote
                .fetch_zone_changes(ZoneChangesRequest {
                    zone: zone.clone(),
                    since: since.clone(),
                    page_size: self.inner.config.pull.zone_page_size,
                    qos,
                })
                .await?;

            for record in page.records {
                self.inner.main.apply_record(record).await?;
                applied += 1;
            }

            if !page.more_coming {
                debug!(zone = %zone, applied, "Zone drained");
                return Ok(applied);
            }
            since = Some(page.cursor);
        }
    }

    // =========================================================================
    // Peer Bridge
    // =========================================================================

    /// Records an event: pushed when ready, otherwise relayed to the
    /// paired device.
    pub async fn record_event(&self, payload: Payload) -> SyncResult<RecordOutcome> {
        let not_ready = match self.ready_partition().await {
            Ok(_) => return self.push_event(payload).await.map(RecordOutcome::Pushed),
            Err(err) => err,
        };

        let Some(peer) = &self.inner.peer else {
            return Err(not_ready);
        };
        if matches!(not_ready, SyncError::ShuttingDown) {
            return Err(not_ready);
        }

        validate_payload(&payload)?;
        peer.send_user_info(payload).await?;
        info!(phase = %self.phase(), "Event relayed to paired device");
        Ok(RecordOutcome::Relayed)
    }

    /// Handles one message from the paired device.
    pub async fn merge_peer_message(&self, message: PeerMessage) -> SyncResult<()> {
        match message {
            PeerMessage::Event(payload) => {
                let mut pending = self.inner.pending_relays.lock().await;
                if self.ready_partition().await.is_err() {
                    pending.push_back(payload);
                    debug!(queued = pending.len(), "Relayed event held until ready");
                    return Ok(());
                }

                // Earlier events that are still held go out first.
                validate_payload(&payload)?;
                pending.push_back(payload);
                self.drain_relays(&mut pending).await
            }
            PeerMessage::Snapshot(context) => {
                debug!(keys = context.len(), "Merging peer snapshot");
                for (key, value) in context {
                    self.inner.main.cache_value(key, value).await?;
                }
                Ok(())
            }
        }
    }

    /// Pushes held peer events after entering `Ready`.
    async fn flush_pending_relays(&self) {
        let mut pending = self.inner.pending_relays.lock().await;
        if pending.is_empty() {
            return;
        }
        info!(count = pending.len(), "Flushing relayed events");

        if let Err(err) = self.drain_relays(&mut pending).await {
            warn!(remaining = pending.len(), error = %err, "Relay flush stopped");
        }
    }

    /// Pushes held peer events in order, stopping at the first failure.
    ///
    /// The failed event stays at the front of the queue.
    async fn drain_relays(&self, pending: &mut VecDeque<Payload>) -> SyncResult<()> {
        while let Some(payload) = pending.front().cloned() {
            match self.push_event(payload).await {
                Ok(_) => {
                    pending.pop_front();
                }
                Err(err @ SyncError::InvalidPayload(_)) => {
                    warn!(error = %err, "Dropping invalid relayed event");
                    pending.pop_front();
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Number of peer events waiting for `Ready`.
    pub async fn pending_relays(&self) -> usize {
        self.inner.pending_relays.lock().await.len()
    }

    /// Sends the application's counters to the paired device.
    pub async fn publish_snapshot(&self, context: Payload) -> SyncResult<()> {
        let peer = self.inner.peer.as_ref().ok_or(SyncError::PeerUnavailable)?;
        peer.send_context(context).await
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Refuses new work and stops the main context once it is idle.
    pub async fn shutdown(&self) -> SyncResult<()> {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("Sync engine shutting down");
        self.inner.main.shutdown().await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
