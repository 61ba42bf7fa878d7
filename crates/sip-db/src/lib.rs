//! # sip-db: Database Layer for Sip Sync
//!
//! SQLite persistence through sqlx: the device-local key/value cache and the
//! tables behind the self-hosted record store.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sip Sync Data Flow                               │
//! │                                                                         │
//! │  SyncEngine (sip-sync)                                                  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     sip-db (THIS CRATE)                         │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐   ┌───────────────┐  │   │
//! │  │   │   Database    │    │  Repositories  │   │  Migrations   │  │   │
//! │  │   │   (pool.rs)   │◄───│  cache.rs      │   │  001_cache    │  │   │
//! │  │   │  SqlitePool   │    │  records.rs    │   │  002_records  │  │   │
//! │  │   └───────────────┘    └────────────────┘   └───────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │   <data dir>/com.sip.sync/sip.db                                │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sip_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/sip.db")).await?;
//! db.cache().put("changeToken", &bytes).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::cache::LocalCacheRepository;
pub use repository::records::{
    ChangedZone, ChangedZones, Page, RecordStoreRepository, StoredRecord, RECORD_TYPE_ENTITY, ZONE_ENTITY,
};
