//! # Repository Module
//!
//! Database repository implementations for Sip Sync.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repositories                                         │
//! │                                                                         │
//! │  sip-sync                                                               │
//! │       │                                                                 │
//! │       ├── db.cache().put("changeToken", bytes)                          │
//! │       │        ▼                                                        │
//! │       │   LocalCacheRepository ──► local_cache                          │
//! │       │                                                                 │
//! │       └── db.records().insert_record(zone, ..)                          │
//! │                ▼                                                        │
//! │           RecordStoreRepository ──► zones / records /                   │
//! │                                      record_types / subscriptions       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`LocalCacheRepository`](cache::LocalCacheRepository) - key/value blobs
//! - [`RecordStoreRepository`](records::RecordStoreRepository) - self-hosted record store

pub mod cache;
pub mod records;
