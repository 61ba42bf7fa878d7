//! # Reference Replica
//!
//! A ready-made [`LocalCacheGateway`] for applications that only need to
//! count events: records are tallied by id (so re-delivery is harmless) and
//! cached values are optionally written through to the SQLite local cache.
//!
//! ```text
//!   MainContext ──► ReplicaGateway ──► RwLock<ReplicaState> ◄── ReplicaView
//!                        │                                      (any task)
//!                        └──► LocalCacheRepository (optional)
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use sip_core::{EventRecord, FieldValue, RecordId};
use sip_db::LocalCacheRepository;

use crate::gateway::{GatewayError, LocalCacheGateway};

// =============================================================================
// Tally
// =============================================================================

/// Events counted once per record id.
#[derive(Debug, Clone, Default)]
pub struct EventTally {
    events: HashMap<RecordId, DateTime<Utc>>,
}

impl EventTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts `record` unless it was counted before. Returns true if new.
    ///
    /// The event time is the record's `date` field, or its creation time
    /// when it has none.
    pub fn apply(&mut self, record: &EventRecord) -> Result<bool, GatewayError> {
        if self.events.contains_key(&record.id) {
            return Ok(false);
        }

        let date = record
            .event_date()
            .map_err(|e| GatewayError::new(e.to_string()))?
            .unwrap_or(record.created_at);
        self.events.insert(record.id.clone(), date);
        Ok(true)
    }

    pub fn total(&self) -> usize {
        self.events.len()
    }

    /// Events at or after `start`.
    pub fn total_since(&self, start: DateTime<Utc>) -> usize {
        self.events.values().filter(|d| **d >= start).count()
    }

    /// Most recent event time.
    pub fn latest(&self) -> Option<DateTime<Utc>> {
        self.events.values().max().copied()
    }
}

// =============================================================================
// Gateway
// =============================================================================

#[derive(Debug, Default)]
struct ReplicaState {
    tally: EventTally,
    values: BTreeMap<String, FieldValue>,
    sign_in_prompts: usize,
    apply_calls: usize,
}

/// Gateway keeping an [`EventTally`] and a key/value map.
#[derive(Debug)]
pub struct ReplicaGateway {
    state: Arc<RwLock<ReplicaState>>,
    cache: Option<LocalCacheRepository>,
}

/// Read side of a [`ReplicaGateway`].
#[derive(Debug, Clone)]
pub struct ReplicaView {
    state: Arc<RwLock<ReplicaState>>,
}

impl ReplicaGateway {
    /// Creates an in-memory replica and a view onto it.
    pub fn new() -> (Self, ReplicaView) {
        let state = Arc::new(RwLock::new(ReplicaState::default()));
        (
            ReplicaGateway {
                state: state.clone(),
                cache: None,
            },
            ReplicaView { state },
        )
    }

    /// Writes cached values through to `cache` as well.
    pub fn with_cache(mut self, cache: LocalCacheRepository) -> Self {
        self.cache = Some(cache);
        self
    }
}

#[async_trait]
impl LocalCacheGateway for ReplicaGateway {
    async fn apply_remote_record(&mut self, record: EventRecord) -> Result<(), GatewayError> {
        let mut state = self.state.write().await;
        state.apply_calls += 1;
        if state.tally.apply(&record)? {
            debug!(record_id = %record.id, total = state.tally.total(), "Event counted");
        }
        Ok(())
    }

    async fn cache_key_value(&mut self, key: &str, value: FieldValue) -> Result<(), GatewayError> {
        if let Some(cache) = &self.cache {
            cache
                .put_value(key, &value)
                .await
                .map_err(|e| GatewayError::new(e.to_string()))?;
        }
        self.state.write().await.values.insert(key.to_string(), value);
        Ok(())
    }

    async fn prompt_sign_in(&mut self) {
        self.state.write().await.sign_in_prompts += 1;
    }
}

impl ReplicaView {
    /// Copy of the current tally.
    pub async fn tally(&self) -> EventTally {
        self.state.read().await.tally.clone()
    }

    pub async fn total(&self) -> usize {
        self.state.read().await.tally.total()
    }

    pub async fn value(&self, key: &str) -> Option<FieldValue> {
        self.state.read().await.values.get(key).cloned()
    }

    pub async fn values(&self) -> BTreeMap<String, FieldValue> {
        self.state.read().await.values.clone()
    }

    /// How often the user was asked to sign in.
    pub async fn sign_in_prompts(&self) -> usize {
        self.state.read().await.sign_in_prompts
    }

    /// Calls to `apply_remote_record`, duplicates included.
    pub async fn apply_calls(&self) -> usize {
        self.state.read().await.apply_calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use sip_core::{event_payload, PartitionId, Payload};
    use sip_db::{Database, DbConfig};

    fn record(id: &str, payload: Payload) -> EventRecord {
        EventRecord {
            id: RecordId::new(id),
            partition_id: PartitionId::from_name("iPhone Zone"),
            record_type: "SipEvent".into(),
            payload,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_tally_is_idempotent() {
        let now = Utc::now();
        let mut tally = EventTally::new();

        assert!(tally.apply(&record("a", event_payload(now))).unwrap());
        assert!(!tally.apply(&record("a", event_payload(now))).unwrap());
        assert!(tally
            .apply(&record("b", event_payload(now - Duration::days(2))))
            .unwrap());

        assert_eq!(tally.total(), 2);
        assert_eq!(tally.total_since(now - Duration::hours(1)), 1);
        assert_eq!(tally.latest(), Some(now));
    }

    #[test]
    fn test_wrong_date_type_is_rejected() {
        let mut payload = Payload::new();
        payload.insert("date".into(), FieldValue::Text("yesterday".into()));

        let mut tally = EventTally::new();
        assert!(tally.apply(&record("a", payload)).is_err());
        assert_eq!(tally.total(), 0);
    }

    #[tokio::test]
    async fn test_gateway_writes_through_to_cache() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let (gateway, view) = ReplicaGateway::new();
        let mut gateway = gateway.with_cache(db.cache());

        gateway
            .cache_key_value("drinkTotal", FieldValue::Integer(4))
            .await
            .unwrap();
        gateway.prompt_sign_in().await;

        assert_eq!(view.value("drinkTotal").await, Some(FieldValue::Integer(4)));
        assert_eq!(
            db.cache().get_value("drinkTotal").await.unwrap(),
            Some(FieldValue::Integer(4))
        );
        assert_eq!(view.sign_in_prompts().await, 1);
    }
}
