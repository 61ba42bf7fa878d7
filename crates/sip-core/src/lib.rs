//! # sip-core: Pure Domain Logic for Sip Sync
//!
//! Types, the readiness state machine and validation shared by the local
//! cache and the sync engine. Nothing in here touches a disk or a socket.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sip Sync Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    Application (phone / watch)                   │   │
//! │  │     record_event ──► pull_changes ──► LocalCacheGateway          │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    sip-sync (engine)                             │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ sip-core (THIS CRATE) ★                         │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌─────────────┐  ┌─────────────┐              │   │
//! │  │   │   types   │  │  readiness  │  │ validation  │              │   │
//! │  │   │  Record   │  │  SyncPhase  │  │  payloads   │              │   │
//! │  │   │  Cursor   │  │  effects    │  │  keys       │              │   │
//! │  │   └───────────┘  └─────────────┘  └─────────────┘              │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    sip-db (Database Layer)                       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (EventRecord, PartitionId, ChangeCursor, etc.)
//! - [`readiness`] - Availability × partition state machine
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use sip_core::{AvailabilityState, DeviceIdentity, ReadinessEvent, ReadinessMachine, SyncPhase};
//!
//! let mut machine = ReadinessMachine::default();
//! machine.apply(ReadinessEvent::AvailabilityChanged(AvailabilityState::Available));
//! let t = machine.apply(ReadinessEvent::DeviceIdentitySet(DeviceIdentity::new("iPhone").unwrap()));
//! assert_eq!(t.to, SyncPhase::PartitionPending);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod readiness;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use readiness::{ReadinessEffect, ReadinessEvent, ReadinessMachine, SyncPhase, Transition};
pub use types::*;
