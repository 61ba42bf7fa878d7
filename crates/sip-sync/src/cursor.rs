//! # Change Cursor Persistence
//!
//! The database-level change cursor survives restarts so a pull only fetches
//! what is new. It is saved after every database-changes page; a pull that
//! dies halfway resumes from the last completed page.
//!
//! ```text
//!   page 1 ──► save(c1) ──► page 2 ──► save(c2) ──► ✗ network
//!                                                     │
//!   next pull: load() == c2 ◄─────────────────────────┘
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use sip_core::{ChangeCursor, CHANGE_TOKEN_KEY};
use sip_db::LocalCacheRepository;

use crate::error::SyncResult;

/// Durable home of the database-level change cursor.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Last saved cursor, or `None` before the first pull.
    async fn load(&self) -> SyncResult<Option<ChangeCursor>>;

    /// Replaces the saved cursor.
    async fn save(&self, cursor: &ChangeCursor) -> SyncResult<()>;

    /// Forgets the cursor; the next pull starts from the beginning.
    async fn reset(&self) -> SyncResult<()>;
}

// =============================================================================
// SQLite
// =============================================================================

/// Cursor kept in the local cache under [`CHANGE_TOKEN_KEY`].
#[derive(Debug, Clone)]
pub struct SqliteCursorStore {
    cache: LocalCacheRepository,
}

impl SqliteCursorStore {
    pub fn new(cache: LocalCacheRepository) -> Self {
        SqliteCursorStore { cache }
    }
}

#[async_trait]
impl CursorStore for SqliteCursorStore {
    async fn load(&self) -> SyncResult<Option<ChangeCursor>> {
        Ok(self
            .cache
            .get(CHANGE_TOKEN_KEY)
            .await?
            .map(ChangeCursor::from_bytes))
    }

    async fn save(&self, cursor: &ChangeCursor) -> SyncResult<()> {
        self.cache.put(CHANGE_TOKEN_KEY, cursor.as_bytes()).await?;
        debug!(len = cursor.as_bytes().len(), "Change cursor saved");
        Ok(())
    }

    async fn reset(&self) -> SyncResult<()> {
        self.cache.delete(CHANGE_TOKEN_KEY).await?;
        Ok(())
    }
}

// =============================================================================
// Memory
// =============================================================================

#[derive(Debug, Default)]
struct MemoryCursorState {
    current: Option<ChangeCursor>,
    saves: Vec<ChangeCursor>,
}

/// Cursor held in memory, with a history of every save.
///
/// Cloning shares the same state, so a test can keep one clone and hand the
/// other to an engine.
#[derive(Debug, Clone, Default)]
pub struct MemoryCursorStore {
    state: Arc<Mutex<MemoryCursorState>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every cursor saved so far, oldest first.
    pub async fn saves(&self) -> Vec<ChangeCursor> {
        self.state.lock().await.saves.clone()
    }

    /// The cursor that `load` would return.
    pub async fn current(&self) -> Option<ChangeCursor> {
        self.state.lock().await.current.clone()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&self) -> SyncResult<Option<ChangeCursor>> {
        Ok(self.state.lock().await.current.clone())
    }

    async fn save(&self, cursor: &ChangeCursor) -> SyncResult<()> {
        let mut state = self.state.lock().await;
        state.current = Some(cursor.clone());
        state.saves.push(cursor.clone());
        Ok(())
    }

    async fn reset(&self) -> SyncResult<()> {
        self.state.lock().await.current = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sip_db::{Database, DbConfig};

    #[tokio::test]
    async fn test_sqlite_cursor_lifecycle() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let store = SqliteCursorStore::new(db.cache());

        assert!(store.load().await.unwrap().is_none());

        let cursor = ChangeCursor::from_bytes(vec![0, 0, 0, 0, 0, 0, 0, 7]);
        store.save(&cursor).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(cursor));

        // Stored under the well-known key.
        assert!(db.cache().get(CHANGE_TOKEN_KEY).await.unwrap().is_some());

        store.reset().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_cursor_history() {
        let store = MemoryCursorStore::new();
        let observer = store.clone();

        store.save(&ChangeCursor::from_bytes(vec![1])).await.unwrap();
        store.save(&ChangeCursor::from_bytes(vec![2])).await.unwrap();
        store.reset().await.unwrap();

        assert_eq!(observer.saves().await.len(), 2);
        assert!(observer.current().await.is_none());
    }
}
