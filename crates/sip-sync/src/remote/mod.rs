//! # Remote Record Store
//!
//! The boundary between the engine and whatever hosts the records.
//!
//! ## Operations
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       RemoteStore                                       │
//! │                                                                         │
//! │  account_status()            ──► Available | NoAccount | ...            │
//! │  create_zones([zone])        ──► ()          batched, idempotent        │
//! │  save_record(new)            ──► RecordId                               │
//! │  fetch_database_changes(c)   ──► { changed_zones, cursor, more_coming } │
//! │  fetch_zone_changes(z, c)    ──► { records, cursor, more_coming }       │
//! │  save_subscription(spec)     ──► ()          idempotent;                │
//! │                                  UnknownRecordType before first save    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Implementations
//! - [`memory::MemoryRemoteStore`] - in-process store with fault injection
//! - [`sqlite::SqliteRemoteStore`] - self-hosted store over `sip-db`
//!
//! Both issue cursors that encode a position in a global change sequence.
//! Only the store that issued a cursor decodes it.

use async_trait::async_trait;
use thiserror::Error;

use sip_core::{
    AccountStatus, ChangeCursor, EventRecord, NewEventRecord, PartitionId, QualityOfService,
    RecordId,
};

pub mod memory;
pub mod sqlite;

pub use memory::{MemoryRemoteStore, RemoteOp, RemoteRequest};
pub use sqlite::SqliteRemoteStore;

// =============================================================================
// Errors
// =============================================================================

/// Failures reported by a remote store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("network unavailable: {0}")]
    Network(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("zone not found: {0}")]
    ZoneNotFound(String),

    #[error("unknown record type: {0}")]
    UnknownRecordType(String),

    #[error("change token expired")]
    ChangeTokenExpired,

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

// =============================================================================
// Requests & Pages
// =============================================================================

/// Request for the zones changed since a cursor.
#[derive(Debug, Clone)]
pub struct DatabaseChangesRequest {
    /// `None` fetches everything.
    pub since: Option<ChangeCursor>,
    pub page_size: u32,
    pub qos: QualityOfService,
}

/// One page of changed zones.
#[derive(Debug, Clone)]
pub struct DatabaseChangesPage {
    pub changed_zones: Vec<PartitionId>,
    /// Position after this page.
    pub cursor: ChangeCursor,
    pub more_coming: bool,
}

/// Request for the records of one zone since a cursor.
#[derive(Debug, Clone)]
pub struct ZoneChangesRequest {
    pub zone: PartitionId,
    pub since: Option<ChangeCursor>,
    pub page_size: u32,
    pub qos: QualityOfService,
}

/// One page of records from a zone.
#[derive(Debug, Clone)]
pub struct ZoneChangesPage {
    pub records: Vec<EventRecord>,
    /// Continuation cursor for the next page.
    pub cursor: ChangeCursor,
    pub more_coming: bool,
}

/// A push subscription on a record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSpec {
    pub id: String,
    pub record_type: String,
}

// =============================================================================
// Trait
// =============================================================================

/// A remote record store.
///
/// Every method is a single round trip. Implementations never retry.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Reports the status of the signed-in account.
    async fn account_status(&self) -> RemoteResult<AccountStatus>;

    /// Creates the given zones in one batch. Existing zones are left alone.
    async fn create_zones(&self, zones: &[PartitionId]) -> RemoteResult<()>;

    /// Saves a new record and returns the id the store assigned to it.
    async fn save_record(&self, record: &NewEventRecord) -> RemoteResult<RecordId>;

    /// Lists zones with changes after `request.since`.
    async fn fetch_database_changes(
        &self,
        request: DatabaseChangesRequest,
    ) -> RemoteResult<DatabaseChangesPage>;

    /// Lists records of one zone after `request.since`.
    async fn fetch_zone_changes(&self, request: ZoneChangesRequest) -> RemoteResult<ZoneChangesPage>;

    /// Registers a push subscription.
    async fn save_subscription(&self, subscription: &SubscriptionSpec) -> RemoteResult<()>;
}

// =============================================================================
// Sequence Cursors
// =============================================================================

/// Encodes a change sequence position as an 8-byte big-endian cursor.
pub(crate) fn encode_seq(seq: i64) -> ChangeCursor {
    ChangeCursor::from_bytes(seq.to_be_bytes().to_vec())
}

/// Decodes a cursor issued by [`encode_seq`]. `None` is position 0.
///
/// A cursor of the wrong shape was not issued by this store and is reported
/// as expired so the caller falls back to a full resync.
pub(crate) fn decode_seq(cursor: Option<&ChangeCursor>) -> RemoteResult<i64> {
    let Some(cursor) = cursor else {
        return Ok(0);
    };

    let bytes: [u8; 8] = cursor
        .as_bytes()
        .try_into()
        .map_err(|_| RemoteError::ChangeTokenExpired)?;
    let seq = i64::from_be_bytes(bytes);
    if seq < 0 {
        return Err(RemoteError::ChangeTokenExpired);
    }
    Ok(seq)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_cursor_shape() {
        assert_eq!(decode_seq(None).unwrap(), 0);
        assert_eq!(decode_seq(Some(&encode_seq(42))).unwrap(), 42);
        assert_eq!(encode_seq(1).as_bytes().len(), 8);
        assert_eq!(
            decode_seq(Some(&ChangeCursor::from_bytes(vec![1, 2, 3]))),
            Err(RemoteError::ChangeTokenExpired)
        );
        assert_eq!(
            decode_seq(Some(&encode_seq(-5))),
            Err(RemoteError::ChangeTokenExpired)
        );
    }
}
