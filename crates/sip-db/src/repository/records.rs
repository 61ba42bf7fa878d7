//! # Record Store Repository
//!
//! SQL behind the self-hosted remote record store: zones, append-only
//! records, record types and subscriptions.
//!
//! ## Change Sequence
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  records                                                                │
//! │  seq │ zone_name          │ id        │ record_type                     │
//! │  ────┼────────────────────┼───────────┼──────────                       │
//! │   1  │ iPhone Zone        │ 6f1c…     │ SipEvent                        │
//! │   2  │ Apple Watch Zone   │ 0b9e…     │ SipEvent                        │
//! │   3  │ iPhone Zone        │ a771…     │ SipEvent                        │
//! │                                                                         │
//! │  changed_zones_since(1)  → [Apple Watch Zone @2, iPhone Zone @3]        │
//! │  records_since("iPhone Zone", 1) → [seq 3]                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `seq` is global and strictly increasing, so a single integer serves as
//! both the database-level and the zone-level change position.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use sip_core::{EventRecord, PartitionId, Payload, RecordId};

/// Entity name used in `NotFound` errors for zones.
pub const ZONE_ENTITY: &str = "zone";

/// Entity name used in `NotFound` errors for record types.
pub const RECORD_TYPE_ENTITY: &str = "record type";

// =============================================================================
// Row Types
// =============================================================================

/// A record row as stored.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredRecord {
    pub seq: i64,
    pub id: String,
    pub zone_name: String,
    pub record_type: String,
    /// JSON-encoded [`Payload`].
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

impl StoredRecord {
    /// Decodes the row into a domain record.
    pub fn into_event_record(self) -> DbResult<EventRecord> {
        let payload: Payload = serde_json::from_str(&self.payload)?;
        Ok(EventRecord {
            id: RecordId::new(self.id),
            partition_id: PartitionId::from_name(self.zone_name),
            record_type: self.record_type,
            payload,
            created_at: self.created_at,
        })
    }
}

/// A zone with changes past some sequence, and its oldest such change.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ChangedZone {
    pub zone_name: String,
    pub first_seq: i64,
}

/// One page of changed zones.
///
/// `cursor_seq` is chosen so every zone *not* on this page has no changes at
/// or below it: the page can be resumed from `cursor_seq` without skipping.
#[derive(Debug, Clone)]
pub struct ChangedZones {
    pub zones: Vec<ChangedZone>,
    pub cursor_seq: i64,
    pub more_coming: bool,
}

/// One page of results plus whether more rows remain.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub more_coming: bool,
}

impl<T> Page<T> {
    fn from_overfetch(mut items: Vec<T>, limit: u32) -> Self {
        let more_coming = items.len() > limit as usize;
        items.truncate(limit as usize);
        Page { items, more_coming }
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for the self-hosted record store.
#[derive(Debug, Clone)]
pub struct RecordStoreRepository {
    pool: SqlitePool,
}

impl RecordStoreRepository {
    /// Creates a new RecordStoreRepository.
    pub fn new(pool: SqlitePool) -> Self {
        RecordStoreRepository { pool }
    }

    /// Creates every zone in `names` that does not exist yet.
    ///
    /// Runs as one transaction. Returns how many zones were new.
    pub async fn create_zones(&self, names: &[String]) -> DbResult<usize> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        let mut created = 0;

        for name in names {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO zones (name, created_at) VALUES (?1, ?2)",
            )
            .bind(name)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            created += result.rows_affected() as usize;
        }

        tx.commit().await?;

        debug!(requested = names.len(), created, "Zones ensured");
        Ok(created)
    }

    /// Returns true if the zone exists.
    pub async fn zone_exists(&self, name: &str) -> DbResult<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM zones WHERE name = ?1")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;

        Ok(count > 0)
    }

    /// Appends a record to `zone` and assigns it a fresh id and sequence.
    ///
    /// Fails with `NotFound(zone)` if the zone was never created. Saving the
    /// first record of a type provisions that record type.
    pub async fn insert_record(
        &self,
        zone: &str,
        record_type: &str,
        payload: &Payload,
        created_at: DateTime<Utc>,
    ) -> DbResult<StoredRecord> {
        let payload_json = serde_json::to_string(payload)?;
        let id = Uuid::new_v4().to_string();

        let mut tx = self.pool.begin().await?;

        let zone_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM zones WHERE name = ?1")
            .bind(zone)
            .fetch_one(&mut *tx)
            .await?;
        if zone_count == 0 {
            return Err(DbError::not_found(ZONE_ENTITY, zone));
        }

        sqlx::query("INSERT OR IGNORE INTO record_types (name, created_at) VALUES (?1, ?2)")
            .bind(record_type)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query(
            r#"
            INSERT INTO records (id, zone_name, record_type, payload, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&id)
        .bind(zone)
        .bind(record_type)
        .bind(&payload_json)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let seq = result.last_insert_rowid();
        debug!(zone = %zone, record_id = %id, seq, "Record inserted");

        Ok(StoredRecord {
            seq,
            id,
            zone_name: zone.to_string(),
            record_type: record_type.to_string(),
            payload: payload_json,
            created_at,
        })
    }

    /// Highest sequence assigned so far (0 when empty).
    pub async fn latest_seq(&self) -> DbResult<i64> {
        let seq: Option<i64> = sqlx::query_scalar("SELECT MAX(seq) FROM records")
            .fetch_one(&self.pool)
            .await?;

        Ok(seq.unwrap_or(0))
    }

    /// Zones with records past `after_seq`, ordered by their oldest change.
    ///
    /// When the page is full, the cursor stops just before the first change
    /// of the first zone left off the page. Otherwise it jumps to the newest
    /// change in the store.
    pub async fn changed_zones_since(&self, after_seq: i64, limit: u32) -> DbResult<ChangedZones> {
        // Read first: anything inserted after this point lands past the cursor.
        let latest = self.latest_seq().await?;

        let mut rows: Vec<ChangedZone> = sqlx::query_as(
            r#"
            SELECT zone_name, MIN(seq) AS first_seq
            FROM records
            WHERE seq > ?1
            GROUP BY zone_name
            ORDER BY first_seq ASC
            LIMIT ?2
            "#,
        )
        .bind(after_seq)
        .bind(i64::from(limit) + 1)
        .fetch_all(&self.pool)
        .await?;

        if rows.len() > limit as usize {
            let cursor_seq = rows[limit as usize].first_seq - 1;
            rows.truncate(limit as usize);
            return Ok(ChangedZones {
                zones: rows,
                cursor_seq,
                more_coming: true,
            });
        }

        let cursor_seq = latest.max(after_seq);
        Ok(ChangedZones {
            zones: rows,
            cursor_seq,
            more_coming: false,
        })
    }

    /// Records in `zone` past `after_seq`, oldest first.
    pub async fn records_since(
        &self,
        zone: &str,
        after_seq: i64,
        limit: u32,
    ) -> DbResult<Page<StoredRecord>> {
        let rows: Vec<StoredRecord> = sqlx::query_as(
            r#"
            SELECT seq, id, zone_name, record_type, payload, created_at
            FROM records
            WHERE zone_name = ?1 AND seq > ?2
            ORDER BY seq ASC
            LIMIT ?3
            "#,
        )
        .bind(zone)
        .bind(after_seq)
        .bind(i64::from(limit) + 1)
        .fetch_all(&self.pool)
        .await?;

        Ok(Page::from_overfetch(rows, limit))
    }

    /// Registers subscription `id` for `record_type`.
    ///
    /// Idempotent. Fails with `NotFound(record type)` until the first record
    /// of that type has been saved. Returns true if the subscription is new.
    pub async fn save_subscription(&self, id: &str, record_type: &str) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;

        let known: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM record_types WHERE name = ?1")
            .bind(record_type)
            .fetch_one(&mut *tx)
            .await?;
        if known == 0 {
            return Err(DbError::not_found(RECORD_TYPE_ENTITY, record_type));
        }

        let result = sqlx::query(
            "INSERT OR IGNORE INTO subscriptions (id, record_type, created_at) VALUES (?1, ?2, ?3)",
        )
        .bind(id)
        .bind(record_type)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    /// Returns true if subscription `id` exists.
    pub async fn subscription_exists(&self, id: &str) -> DbResult<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subscriptions WHERE id = ?1")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count > 0)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
