//! # Self-Hosted Remote Store
//!
//! [`RemoteStore`] backed by the `sip-db` record store tables. Point two
//! engines at the same database file and they share one account.

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use sip_core::{AccountStatus, NewEventRecord, PartitionId, RecordId};
use sip_db::{Database, DbError, RecordStoreRepository, RECORD_TYPE_ENTITY, ZONE_ENTITY};

use super::{
    decode_seq, encode_seq, DatabaseChangesPage, DatabaseChangesRequest, RemoteError,
    RemoteResult, RemoteStore, SubscriptionSpec, ZoneChangesPage, ZoneChangesRequest,
};

/// Remote store over a SQLite database.
#[derive(Debug)]
pub struct SqliteRemoteStore {
    records: RecordStoreRepository,
    account: RwLock<AccountStatus>,
}

impl SqliteRemoteStore {
    /// Wraps an open database. The account starts out available.
    pub fn new(db: &Database) -> Self {
        SqliteRemoteStore {
            records: db.records(),
            account: RwLock::new(AccountStatus::Available),
        }
    }

    /// Changes the reported account status.
    pub async fn set_account_status(&self, status: AccountStatus) {
        *self.account.write().await = status;
    }

    async fn require_zone(&self, zone: &PartitionId) -> RemoteResult<()> {
        if self.records.zone_exists(zone.as_str()).await.map_err(map_db_error)? {
            Ok(())
        } else {
            Err(RemoteError::ZoneNotFound(zone.to_string()))
        }
    }
}

/// Maps storage failures onto the remote error vocabulary.
fn map_db_error(err: DbError) -> RemoteError {
    match &err {
        DbError::NotFound { entity, id } if entity == ZONE_ENTITY => {
            RemoteError::ZoneNotFound(id.clone())
        }
        DbError::NotFound { entity, id } if entity == RECORD_TYPE_ENTITY => {
            RemoteError::UnknownRecordType(id.clone())
        }
        DbError::PoolExhausted | DbError::ConnectionFailed(_) => {
            RemoteError::ServiceUnavailable(err.to_string())
        }
        _ => {
            warn!(error = %err, "Record store failure");
            RemoteError::Internal(err.to_string())
        }
    }
}

#[async_trait]
impl RemoteStore for SqliteRemoteStore {
    async fn account_status(&self) -> RemoteResult<AccountStatus> {
        Ok(*self.account.read().await)
    }

    async fn create_zones(&self, zones: &[PartitionId]) -> RemoteResult<()> {
        let names: Vec<String> = zones.iter().map(|z| z.as_str().to_string()).collect();
        let created = self.records.create_zones(&names).await.map_err(map_db_error)?;
        debug!(requested = names.len(), created, "Zones saved");
        Ok(())
    }

    async fn save_record(&self, record: &NewEventRecord) -> RemoteResult<RecordId> {
        let stored = self
            .records
            .insert_record(
                record.partition_id.as_str(),
                &record.record_type,
                &record.payload,
                record.created_at,
            )
            .await
            .map_err(map_db_error)?;

        Ok(RecordId::new(stored.id))
    }

    async fn fetch_database_changes(
        &self,
        request: DatabaseChangesRequest,
    ) -> RemoteResult<DatabaseChangesPage> {
        let since = decode_seq(request.since.as_ref())?;
        let page = self
            .records
            .changed_zones_since(since, request.page_size.max(1))
            .await
            .map_err(map_db_error)?;

        Ok(DatabaseChangesPage {
            changed_zones: page
                .zones
                .into_iter()
                .map(|z| PartitionId::from_name(z.zone_name))
                .collect(),
            cursor: encode_seq(page.cursor_seq),
            more_coming: page.more_coming,
        })
    }

    async fn fetch_zone_changes(&self, request: ZoneChangesRequest) -> RemoteResult<ZoneChangesPage> {
        let since = decode_seq(request.since.as_ref())?;
        self.require_zone(&request.zone).await?;

        let page = self
            .records
            .records_since(request.zone.as_str(), since, request.page_size.max(1))
            .await
            .map_err(map_db_error)?;

        let cursor_seq = page.items.last().map(|r| r.seq).unwrap_or(since);
        let records = page
            .items
            .into_iter()
            .map(|row| row.into_event_record().map_err(map_db_error))
            .collect::<RemoteResult<Vec<_>>>()?;

        Ok(ZoneChangesPage {
            records,
            cursor: encode_seq(cursor_seq),
            more_coming: page.more_coming,
        })
    }

    async fn save_subscription(&self, subscription: &SubscriptionSpec) -> RemoteResult<()> {
        let created = self
            .records
            .save_subscription(&subscription.id, &subscription.record_type)
            .await
            .map_err(map_db_error)?;

        if created {
            debug!(subscription_id = %subscription.id, "Subscription saved");
        }
        Ok(())
    }
}
