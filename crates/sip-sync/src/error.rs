//! # Sync Error Types
//!
//! Error types for sync operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Readiness     │  │     Remote              │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  AccountUnavail.│  │  TransportFailure       │ │
//! │  │  ConfigLoad/Save│  │  PartitionNot-  │  │  RemoteRejected         │ │
//! │  │                 │  │   Ready         │  │  CursorExpired          │ │
//! │  └─────────────────┘  └─────────────────┘  │  SubscriptionNotYet-    │ │
//! │                                            │   Possible (benign)     │ │
//! │  ┌─────────────────┐  ┌─────────────────┐  └─────────────────────────┘ │
//! │  │    Local        │  │     Peer        │  ┌─────────────────────────┐ │
//! │  │                 │  │                 │  │      Internal           │ │
//! │  │  Cache          │  │  PeerUnavailable│  │                         │ │
//! │  │  Gateway        │  │                 │  │  ChannelError           │ │
//! │  │  InvalidPayload │  │                 │  │  ShuttingDown           │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use sip_core::{AvailabilityState, CoreError, SyncPhase, ValidationError};

use crate::remote::RemoteError;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible sync failures.
///
/// `Clone` so a coalesced pull can hand the same outcome to every waiter.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Readiness Errors
    // =========================================================================
    /// The account is not in a state that allows remote writes.
    #[error("Remote account unavailable ({state})")]
    AccountUnavailable { state: AvailabilityState },

    /// Push or pull attempted before the device partition is ready.
    #[error("Partition not ready (phase: {phase})")]
    PartitionNotReady { phase: SyncPhase },

    // =========================================================================
    // Remote Errors
    // =========================================================================
    /// Network or service failure talking to the remote store.
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// The remote store refused the request permanently.
    #[error("Remote store rejected request: {0}")]
    RemoteRejected(String),

    /// The saved change cursor is no longer accepted; the next pull is a full resync.
    #[error("Change cursor expired")]
    CursorExpired,

    /// The record type does not exist remotely yet, so no subscription can target it.
    #[error("Subscription not yet possible: record type '{record_type}' is not provisioned")]
    SubscriptionNotYetPossible { record_type: String },

    // =========================================================================
    // Local Errors
    // =========================================================================
    /// Payload failed validation before leaving the device.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Local cache (SQLite) failure.
    #[error("Local cache error: {0}")]
    Cache(String),

    /// The application's gateway refused an update.
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// Failed to encode or decode a value.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    // =========================================================================
    // Peer Errors
    // =========================================================================
    /// No paired device link, or its receiving side is gone.
    #[error("Paired device unavailable")]
    PeerUnavailable,

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal sync engine error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Engine is shutting down.
    #[error("Sync engine is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Network(msg) | RemoteError::ServiceUnavailable(msg) => {
                SyncError::TransportFailure(msg)
            }
            RemoteError::NotAuthenticated => SyncError::AccountUnavailable {
                state: AvailabilityState::Unavailable,
            },
            RemoteError::UnknownRecordType(record_type) => {
                SyncError::SubscriptionNotYetPossible { record_type }
            }
            RemoteError::ChangeTokenExpired => SyncError::CursorExpired,
            RemoteError::ZoneNotFound(zone) => {
                SyncError::RemoteRejected(format!("zone '{}' does not exist", zone))
            }
            RemoteError::Rejected(msg) => SyncError::RemoteRejected(msg),
            RemoteError::Internal(msg) => SyncError::TransportFailure(msg),
        }
    }
}

impl From<sip_db::DbError> for SyncError {
    fn from(err: sip_db::DbError) -> Self {
        SyncError::Cache(err.to_string())
    }
}

impl From<ValidationError> for SyncError {
    fn from(err: ValidationError) -> Self {
        SyncError::InvalidPayload(err.to_string())
    }
}

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        SyncError::InvalidPayload(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if calling the same operation again later may succeed
    /// without anything else changing.
    ///
    /// The engine itself never retries; this is advice for the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::TransportFailure(_) | SyncError::CursorExpired | SyncError::Cache(_)
        )
    }

    /// Returns true for failures that are expected and need no reporting.
    pub fn is_benign(&self) -> bool {
        matches!(self, SyncError::SubscriptionNotYetPossible { .. })
    }

    /// Returns true if the user has to act (sign in) before sync can work.
    pub fn needs_user_action(&self) -> bool {
        matches!(self, SyncError::AccountUnavailable { state } if state.requires_sign_in())
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_mapping() {
        assert!(matches!(
            SyncError::from(RemoteError::Network("offline".into())),
            SyncError::TransportFailure(_)
        ));
        assert!(matches!(
            SyncError::from(RemoteError::UnknownRecordType("SipEvent".into())),
            SyncError::SubscriptionNotYetPossible { .. }
        ));
        assert!(matches!(
            SyncError::from(RemoteError::ChangeTokenExpired),
            SyncError::CursorExpired
        ));
        assert!(SyncError::from(RemoteError::NotAuthenticated).needs_user_action());
    }

    #[test]
    fn test_categories() {
        assert!(SyncError::TransportFailure("timeout".into()).is_retryable());
        assert!(!SyncError::PartitionNotReady {
            phase: SyncPhase::NotReady
        }
        .is_retryable());

        assert!(SyncError::SubscriptionNotYetPossible {
            record_type: "SipEvent".into()
        }
        .is_benign());

        assert!(!SyncError::AccountUnavailable {
            state: AvailabilityState::Indeterminate
        }
        .needs_user_action());

        assert!(SyncError::InvalidConfig("page size".into()).is_config_error());
        assert!(!SyncError::ShuttingDown.is_config_error());
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::PartitionNotReady {
            phase: SyncPhase::AwaitingAccount,
        };
        assert_eq!(err.to_string(), "Partition not ready (phase: awaiting_account)");
    }
}
