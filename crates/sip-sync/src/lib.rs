//! # sip-sync: Sync Engine for Sip Sync
//!
//! Keeps the event replicas of a phone and its paired watch consistent
//! through a remote record store, and through each other when the store is
//! out of reach.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Engine Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                  SyncEngine (cloneable handle)                   │  │
//! │  │                                                                  │  │
//! │  │  ReadinessMachine: NotReady → AwaitingAccount →                  │  │
//! │  │                    PartitionPending → Ready                      │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ Availability   │  │ Partition      │  │ Subscription           │    │
//! │  │ Tracker        │  │ Manager        │  │ Manager                │    │
//! │  │ account status │  │ zone per device│  │ push trigger, once     │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ RemoteStore    │  │ CursorStore    │  │ PeerLink               │    │
//! │  │ memory | sqlite│  │ changeToken    │  │ context + user info    │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  MainContext: one task owning the application's gateway          │   │
//! │  │  apply_remote_record • cache_key_value • prompt_sign_in          │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`engine`] - `SyncEngine`: push, pull, record and merge paths
//! - [`availability`] - Account availability tracking
//! - [`partition`] - Per-device zone creation
//! - [`cursor`] - Change cursor persistence
//! - [`subscription`] - Push subscription registration
//! - [`gateway`] - Application callback trait
//! - [`main_context`] - Serial task the gateway runs on
//! - [`peer`] - Paired-device link and listener
//! - [`remote`] - Remote store trait and implementations
//! - [`replica`] - Counting gateway for simple applications
//! - [`config`] - Configuration (TOML + environment)
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sip_sync::{MainContext, PullTrigger, ReplicaGateway, SqliteRemoteStore, SyncConfig, SyncEngine};
//!
//! let config = SyncConfig::load_or_default(None);
//! let db = sip_db::Database::new(sip_db::DbConfig::new(config.database_path()?)).await?;
//!
//! let (gateway, view) = ReplicaGateway::new();
//! let main = MainContext::spawn(gateway.with_cache(db.cache()));
//!
//! let engine = SyncEngine::builder(config, Arc::new(SqliteRemoteStore::new(&db)), main)
//!     .local_cache(&db)
//!     .await?
//!     .build()?;
//!
//! engine.check_availability().await;
//! engine.push_event(sip_core::event_payload(chrono::Utc::now())).await?;
//! engine.pull_changes(PullTrigger::Interactive).await?.wait().await?;
//! println!("Events: {}", view.total().await);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod availability;
pub mod config;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod main_context;
pub mod partition;
pub mod peer;
pub mod remote;
pub mod replica;
pub mod subscription;

// =============================================================================
// Re-exports
// =============================================================================

pub use availability::AvailabilityTracker;
pub use config::{CacheSettings, DeviceConfig, PullSettings, RemoteSettings, SyncConfig};
pub use cursor::{CursorStore, MemoryCursorStore, SqliteCursorStore};
pub use engine::{PullSummary, PullTicket, RecordOutcome, SyncEngine, SyncEngineBuilder};
pub use error::{SyncError, SyncResult};
pub use gateway::{GatewayError, LocalCacheGateway, NoOpGateway};
pub use main_context::{MainContext, MainContextHandle};
pub use partition::PartitionManager;
pub use peer::{spawn_peer_listener, ChannelPeerLink, PeerEndpoint, PeerInbox, PeerLink, PeerMessage};
pub use remote::{
    MemoryRemoteStore, RemoteError, RemoteOp, RemoteRequest, RemoteStore, SqliteRemoteStore,
};
pub use replica::{EventTally, ReplicaGateway, ReplicaView};
pub use subscription::{SubscriptionManager, SubscriptionOutcome};

pub use sip_core::{PullTrigger, SyncPhase};
