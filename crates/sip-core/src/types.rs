//! # Domain Types
//!
//! Core domain types used throughout Sip Sync.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │ DeviceIdentity  │   │   PartitionId   │   │  EventRecord    │       │
//! │  │  ─────────────  │──►│  ─────────────  │◄──│  ─────────────  │       │
//! │  │  "Apple Watch"  │   │  "Apple Watch   │   │  id (remote)    │       │
//! │  │                 │   │   Zone"         │   │  record_type    │       │
//! │  └─────────────────┘   └─────────────────┘   │  payload        │       │
//! │                                              │  created_at     │       │
//! │                                              └─────────────────┘       │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │  ChangeCursor   │   │  Availability   │   │   PullTrigger   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  opaque bytes   │   │  Unknown        │   │  Interactive    │       │
//! │  │  (never parsed  │   │  Available      │   │  RemoteNotif.   │       │
//! │  │   by the client)│   │  Unavailable    │   │       │         │       │
//! │  └─────────────────┘   │  Restricted     │   │       ▼         │       │
//! │                        │  Indeterminate  │   │ QualityOfService│       │
//! │                        └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ownership
//! Event records are owned by the partition that created them and are never
//! mutated after the remote store assigns their id.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::validation::{validate_device_identity, ValidationResult};

// =============================================================================
// Well-Known Keys
// =============================================================================

/// Record type used for event records unless configured otherwise.
pub const DEFAULT_RECORD_TYPE: &str = "SipEvent";

/// Subscription id registered for the default record type.
pub const DEFAULT_SUBSCRIPTION_ID: &str = "newSipEvent";

/// Suffix appended to the device identity to form the partition name.
pub const DEFAULT_ZONE_SUFFIX: &str = " Zone";

/// Local cache key holding the serialized change cursor.
pub const CHANGE_TOKEN_KEY: &str = "changeToken";

/// Local cache key holding the "subscription registered" flag.
pub const SUBSCRIPTION_FLAG_KEY: &str = "subscriptionsSaved";

/// Payload key carrying the event timestamp.
pub const EVENT_DATE_KEY: &str = "date";

// =============================================================================
// Device Identity
// =============================================================================

/// Identifier of the device that owns a partition (e.g. a model name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    /// Creates a validated device identity.
    pub fn new(identity: impl Into<String>) -> ValidationResult<Self> {
        let identity = identity.into();
        validate_device_identity(&identity)?;
        Ok(DeviceIdentity(identity.trim().to_string()))
    }

    /// Returns the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Partition
// =============================================================================

/// Name of a per-device logical namespace ("zone") in the remote store.
///
/// Derived deterministically from the device identity, so the same device
/// always maps to the same partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionId(String);

impl PartitionId {
    /// Derives the partition for a device using the given zone suffix.
    ///
    /// ```rust
    /// use sip_core::{DeviceIdentity, PartitionId};
    ///
    /// let device = DeviceIdentity::new("Apple Watch").unwrap();
    /// let zone = PartitionId::for_device(&device, " Zone");
    /// assert_eq!(zone.as_str(), "Apple Watch Zone");
    /// ```
    pub fn for_device(device: &DeviceIdentity, suffix: &str) -> Self {
        PartitionId(format!("{}{}", device.as_str(), suffix))
    }

    /// Wraps a partition name received from the remote store.
    pub fn from_name(name: impl Into<String>) -> Self {
        PartitionId(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Event Record
// =============================================================================

/// Remote-assigned identifier of an event record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        RecordId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single value inside a record payload or the local cache.
///
/// Tagged on the wire so timestamps and byte blobs survive a JSON round trip:
/// `{ "type": "timestamp", "value": "2016-09-01T08:00:00Z" }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Double(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Bytes(Vec<u8>),
}

impl FieldValue {
    /// Short name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Text(_) => "text",
            FieldValue::Integer(_) => "integer",
            FieldValue::Double(_) => "double",
            FieldValue::Bool(_) => "bool",
            FieldValue::Timestamp(_) => "timestamp",
            FieldValue::Bytes(_) => "bytes",
        }
    }

    /// Approximate encoded size, used for payload limits.
    pub fn approx_size(&self) -> usize {
        match self {
            FieldValue::Text(s) => s.len(),
            FieldValue::Bytes(b) => b.len(),
            FieldValue::Integer(_) | FieldValue::Double(_) | FieldValue::Timestamp(_) => 8,
            FieldValue::Bool(_) => 1,
        }
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

/// Opaque key/value content of an event record.
pub type Payload = BTreeMap<String, FieldValue>;

/// Builds the canonical single-field payload for an event at `date`.
pub fn event_payload(date: DateTime<Utc>) -> Payload {
    let mut payload = Payload::new();
    payload.insert(EVENT_DATE_KEY.to_string(), FieldValue::Timestamp(date));
    payload
}

/// An immutable, append-only fact written by one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Remote-assigned identifier.
    pub id: RecordId,

    /// Partition the record was written to.
    pub partition_id: PartitionId,

    /// Remote record type (e.g. "SipEvent").
    pub record_type: String,

    /// Record content.
    pub payload: Payload,

    /// When the record was created by the writing device.
    pub created_at: DateTime<Utc>,
}

impl EventRecord {
    /// Returns the timestamp stored under `key`.
    pub fn timestamp(&self, key: &str) -> CoreResult<Option<DateTime<Utc>>> {
        match self.payload.get(key) {
            None => Ok(None),
            Some(FieldValue::Timestamp(ts)) => Ok(Some(*ts)),
            Some(other) => Err(CoreError::UnexpectedFieldType {
                key: key.to_string(),
                expected: "timestamp",
                actual: other.type_name(),
            }),
        }
    }

    /// Returns the event date (the `date` field), if present.
    pub fn event_date(&self) -> CoreResult<Option<DateTime<Utc>>> {
        self.timestamp(EVENT_DATE_KEY)
    }
}

/// A record that has not yet been assigned an id by the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEventRecord {
    pub partition_id: PartitionId,
    pub record_type: String,
    pub payload: Payload,
    pub created_at: DateTime<Utc>,
}

impl NewEventRecord {
    /// Attaches the remote-assigned id.
    pub fn confirm(self, id: RecordId) -> EventRecord {
        EventRecord {
            id,
            partition_id: self.partition_id,
            record_type: self.record_type,
            payload: self.payload,
            created_at: self.created_at,
        }
    }
}

// =============================================================================
// Change Cursor
// =============================================================================

/// Opaque progress marker for incremental fetch.
///
/// Only the remote store that issued a cursor may interpret its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeCursor(Vec<u8>);

impl ChangeCursor {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        ChangeCursor(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

// =============================================================================
// Availability
// =============================================================================

/// Reachability of the remote store for the signed-in account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityState {
    /// No check has completed yet.
    #[default]
    Unknown,
    /// Account signed in and the store is usable.
    Available,
    /// No account; the user must sign in.
    Unavailable,
    /// Account exists but is restricted (parental controls, MDM).
    Restricted,
    /// The check itself failed; do not attempt writes yet.
    Indeterminate,
}

impl AvailabilityState {
    /// Returns true if remote writes may proceed.
    pub fn permits_writes(&self) -> bool {
        matches!(self, AvailabilityState::Available)
    }

    /// Returns true if the user has to act (sign in) before sync can work.
    pub fn requires_sign_in(&self) -> bool {
        matches!(
            self,
            AvailabilityState::Unavailable | AvailabilityState::Restricted
        )
    }
}

impl fmt::Display for AvailabilityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AvailabilityState::Unknown => write!(f, "unknown"),
            AvailabilityState::Available => write!(f, "available"),
            AvailabilityState::Unavailable => write!(f, "unavailable"),
            AvailabilityState::Restricted => write!(f, "restricted"),
            AvailabilityState::Indeterminate => write!(f, "indeterminate"),
        }
    }
}

impl FromStr for AvailabilityState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unknown" => Ok(AvailabilityState::Unknown),
            "available" => Ok(AvailabilityState::Available),
            "unavailable" | "no_account" => Ok(AvailabilityState::Unavailable),
            "restricted" => Ok(AvailabilityState::Restricted),
            "indeterminate" | "could_not_determine" => Ok(AvailabilityState::Indeterminate),
            other => Err(CoreError::UnknownAvailabilityState(other.to_string())),
        }
    }
}

/// Raw account status as reported by the remote account service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Available,
    NoAccount,
    Restricted,
    CouldNotDetermine,
}

impl From<AccountStatus> for AvailabilityState {
    fn from(status: AccountStatus) -> Self {
        match status {
            AccountStatus::Available => AvailabilityState::Available,
            AccountStatus::NoAccount => AvailabilityState::Unavailable,
            AccountStatus::Restricted => AvailabilityState::Restricted,
            AccountStatus::CouldNotDetermine => AvailabilityState::Indeterminate,
        }
    }
}

// =============================================================================
// Pull Trigger
// =============================================================================

/// Scheduling priority requested from the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityOfService {
    /// Background work (push-triggered fetches).
    Utility,
    /// The user is waiting on the result.
    UserInitiated,
}

impl fmt::Display for QualityOfService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityOfService::Utility => write!(f, "utility"),
            QualityOfService::UserInitiated => write!(f, "user_initiated"),
        }
    }
}

/// What caused a pull to be requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullTrigger {
    /// Explicit pull at startup or from a user action.
    Interactive,
    /// Silent push from a registered subscription.
    RemoteNotification,
}

impl PullTrigger {
    /// Interactive pulls outrank background pulls.
    pub fn quality_of_service(&self) -> QualityOfService {
        match self {
            PullTrigger::Interactive => QualityOfService::UserInitiated,
            PullTrigger::RemoteNotification => QualityOfService::Utility,
        }
    }
}

impl fmt::Display for PullTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PullTrigger::Interactive => write!(f, "interactive"),
            PullTrigger::RemoteNotification => write!(f, "remote_notification"),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_partition_derived_from_device() {
        let device = DeviceIdentity::new("iPhone").unwrap();
        let a = PartitionId::for_device(&device, DEFAULT_ZONE_SUFFIX);
        let b = PartitionId::for_device(&device, DEFAULT_ZONE_SUFFIX);
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "iPhone Zone");
    }

    #[test]
    fn test_device_identity_is_trimmed() {
        let device = DeviceIdentity::new("  Apple Watch ").unwrap();
        assert_eq!(device.as_str(), "Apple Watch");
        assert!(DeviceIdentity::new("   ").is_err());
    }

    #[test]
    fn test_account_status_mapping() {
        assert_eq!(
            AvailabilityState::from(AccountStatus::Available),
            AvailabilityState::Available
        );
        assert_eq!(
            AvailabilityState::from(AccountStatus::NoAccount),
            AvailabilityState::Unavailable
        );
        assert_eq!(
            AvailabilityState::from(AccountStatus::CouldNotDetermine),
            AvailabilityState::Indeterminate
        );
        assert!(AvailabilityState::Restricted.requires_sign_in());
        assert!(!AvailabilityState::Indeterminate.requires_sign_in());
        assert!(!AvailabilityState::Indeterminate.permits_writes());
    }

    #[test]
    fn test_availability_parsing() {
        assert_eq!(
            "no_account".parse::<AvailabilityState>().unwrap(),
            AvailabilityState::Unavailable
        );
        assert!("signed_in".parse::<AvailabilityState>().is_err());
    }

    #[test]
    fn test_trigger_priority() {
        assert_eq!(
            PullTrigger::Interactive.quality_of_service(),
            QualityOfService::UserInitiated
        );
        assert!(
            PullTrigger::Interactive.quality_of_service()
                > PullTrigger::RemoteNotification.quality_of_service()
        );
    }

    #[test]
    fn test_field_value_tagged_json() {
        let ts = Utc.with_ymd_and_hms(2016, 9, 1, 8, 0, 0).unwrap();
        let json = serde_json::to_string(&FieldValue::Timestamp(ts)).unwrap();
        assert!(json.contains("\"type\":\"timestamp\""));
        let back: FieldValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, FieldValue::Timestamp(ts));
    }

    #[test]
    fn test_event_date_accessor() {
        let ts = Utc.with_ymd_and_hms(2016, 9, 1, 8, 0, 0).unwrap();
        let device = DeviceIdentity::new("iPhone").unwrap();
        let mut record = NewEventRecord {
            partition_id: PartitionId::for_device(&device, DEFAULT_ZONE_SUFFIX),
            record_type: DEFAULT_RECORD_TYPE.to_string(),
            payload: event_payload(ts),
            created_at: ts,
        }
        .confirm(RecordId::new("r-1"));

        assert_eq!(record.event_date().unwrap(), Some(ts));

        record
            .payload
            .insert(EVENT_DATE_KEY.to_string(), FieldValue::Integer(3));
        assert!(matches!(
            record.event_date(),
            Err(CoreError::UnexpectedFieldType { .. })
        ));
    }
}
