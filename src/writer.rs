//! Single-writer persistence of fetched items.
//!
//! SQLite allows one writer at a time, so all writes funnel through one dedicated
//! connection behind an async mutex. Fetch tasks call [`ItemWriter::write`]
//! concurrently; the statements themselves run strictly one after another.

use crate::config::CommitStrategy;
use crate::db::Database;
use crate::error::{Result, WriteError};
use crate::types::{Item, ItemId};
use sqlx::Sqlite;
use sqlx::pool::PoolConnection;
use tokio::sync::Mutex;

/// What a successful [`ItemWriter::write`] did
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    /// False when a row with this ID was already present (the insert was ignored)
    pub inserted: bool,
    /// Kid rows actually added
    pub kids_written: u64,
}

struct WriterState {
    conn: PoolConnection<Sqlite>,
    in_batch: bool,
}

/// Serializes item writes onto one connection
pub struct ItemWriter {
    state: Mutex<WriterState>,
    strategy: CommitStrategy,
}

impl ItemWriter {
    /// Check out the writer connection from `db`
    pub async fn new(db: &Database, strategy: CommitStrategy) -> Result<Self> {
        let conn = db.acquire_writer().await?;
        Ok(Self {
            state: Mutex::new(WriterState {
                conn,
                in_batch: false,
            }),
            strategy,
        })
    }

    /// The commit strategy this writer was built with
    pub fn strategy(&self) -> CommitStrategy {
        self.strategy
    }

    /// Persist one item: its `items` row, then one `kids` row per child in order
    ///
    /// An item whose ID is already stored is left untouched. If the kid rows fail
    /// after the item row went in, the item row stays and [`WriteError::Kids`] is
    /// returned.
    pub async fn write(&self, item: &Item) -> std::result::Result<WriteOutcome, WriteError> {
        let mut state = self.state.lock().await;

        let inserted = Database::insert_item_row(&mut state.conn, item)
            .await
            .map_err(|source| WriteError::Item {
                id: item.id,
                source,
            })?;

        let kids_written = if item.kids.is_empty() {
            0
        } else {
            Database::insert_child_refs(&mut state.conn, item)
                .await
                .map_err(|source| WriteError::Kids {
                    id: item.id,
                    source,
                })?
        };

        Ok(WriteOutcome {
            inserted,
            kids_written,
        })
    }

    /// Record that the upstream has no item under `id`
    ///
    /// Runs on the writer connection, so under [`CommitStrategy::PerBatch`] it
    /// commits together with the batch. Returns `true` if the ID was new.
    pub async fn record_missing(&self, id: ItemId) -> std::result::Result<bool, WriteError> {
        let mut state = self.state.lock().await;
        Database::insert_missing_row(&mut state.conn, id)
            .await
            .map_err(|source| WriteError::Missing { id, source })
    }

    /// Open the batch transaction (no-op for [`CommitStrategy::PerItem`])
    pub async fn begin_batch(&self) -> std::result::Result<(), WriteError> {
        if self.strategy != CommitStrategy::PerBatch {
            return Ok(());
        }

        let mut state = self.state.lock().await;
        if state.in_batch {
            return Ok(());
        }

        sqlx::query("BEGIN")
            .execute(&mut *state.conn)
            .await
            .map_err(|source| WriteError::Transaction {
                operation: "begin",
                source,
            })?;
        state.in_batch = true;

        Ok(())
    }

    /// Commit the batch transaction opened by [`begin_batch`](Self::begin_batch)
    ///
    /// On failure the transaction is rolled back, losing that batch's writes.
    pub async fn commit_batch(&self) -> std::result::Result<(), WriteError> {
        let mut state = self.state.lock().await;
        if !state.in_batch {
            return Ok(());
        }
        state.in_batch = false;

        if let Err(source) = sqlx::query("COMMIT").execute(&mut *state.conn).await {
            if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *state.conn).await {
                tracing::debug!(error = %e, "Rollback after failed commit also failed");
            }
            return Err(WriteError::Transaction {
                operation: "commit",
                source,
            });
        }

        Ok(())
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn story(id: i64, kids: Vec<i64>) -> Item {
        Item {
            id: ItemId(id),
            kind: "story".to_string(),
            by: "pg".to_string(),
            title: format!("Story {id}"),
            kids,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_per_item_writes_are_visible_immediately() {
        let dir = tempdir().unwrap();
        let db = Database::new(&dir.path().join("items.db")).await.unwrap();
        let writer = ItemWriter::new(&db, CommitStrategy::PerItem).await.unwrap();

        writer.begin_batch().await.unwrap();
        let outcome = writer.write(&story(10, vec![11, 12])).await.unwrap();

        assert_eq!(
            outcome,
            WriteOutcome {
                inserted: true,
                kids_written: 2
            }
        );
        assert!(db.get_item(ItemId(10)).await.unwrap().is_some());
        assert_eq!(db.get_kids(ItemId(10)).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_per_batch_writes_become_visible_on_commit() {
        let dir = tempdir().unwrap();
        let db = Database::new(&dir.path().join("items.db")).await.unwrap();
        let writer = ItemWriter::new(&db, CommitStrategy::PerBatch).await.unwrap();

        writer.begin_batch().await.unwrap();
        writer.write(&story(20, vec![21])).await.unwrap();
        writer.write(&story(19, vec![])).await.unwrap();

        // readers on other connections only see committed data
        assert_eq!(db.count_items().await.unwrap(), 0);

        writer.commit_batch().await.unwrap();

        assert_eq!(db.count_items().await.unwrap(), 2);
        assert_eq!(db.count_kids().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_commit_without_begin_is_noop() {
        let dir = tempdir().unwrap();
        let db = Database::new(&dir.path().join("items.db")).await.unwrap();
        let writer = ItemWriter::new(&db, CommitStrategy::PerBatch).await.unwrap();

        writer.commit_batch().await.unwrap();
        writer.begin_batch().await.unwrap();
        writer.begin_batch().await.unwrap();
        writer.commit_batch().await.unwrap();
        writer.commit_batch().await.unwrap();
    }

    #[tokio::test]
    async fn test_rewriting_stored_item_is_ignored() {
        let dir = tempdir().unwrap();
        let db = Database::new(&dir.path().join("items.db")).await.unwrap();
        let writer = ItemWriter::new(&db, CommitStrategy::PerItem).await.unwrap();

        writer.write(&story(30, vec![31, 32])).await.unwrap();

        let mut changed = story(30, vec![31, 32]);
        changed.title = "Edited".to_string();
        let outcome = writer.write(&changed).await.unwrap();

        assert!(!outcome.inserted);
        assert_eq!(outcome.kids_written, 0);
        let stored = db.get_item(ItemId(30)).await.unwrap().unwrap();
        assert_eq!(stored.title.as_deref(), Some("Story 30"));
        assert_eq!(db.count_kids().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_kid_failure_keeps_item_row() {
        let dir = tempdir().unwrap();
        let db = Database::new(&dir.path().join("items.db")).await.unwrap();
        let writer = ItemWriter::new(&db, CommitStrategy::PerItem).await.unwrap();

        sqlx::query("DROP TABLE kids")
            .execute(db.pool())
            .await
            .unwrap();

        let err = writer.write(&story(40, vec![41])).await.unwrap_err();
        assert!(matches!(err, WriteError::Kids { id, .. } if id == ItemId(40)));
        assert!(db.get_item(ItemId(40)).await.unwrap().is_some());

        // items without kids never touch the kids table
        writer.write(&story(42, vec![])).await.unwrap();
    }

    #[tokio::test]
    async fn test_record_missing_commits_with_batch() {
        let dir = tempdir().unwrap();
        let db = Database::new(&dir.path().join("items.db")).await.unwrap();
        let writer = ItemWriter::new(&db, CommitStrategy::PerBatch).await.unwrap();

        writer.begin_batch().await.unwrap();
        assert!(writer.record_missing(ItemId(50)).await.unwrap());
        assert!(!writer.record_missing(ItemId(50)).await.unwrap());
        assert!(!db.is_known_missing(ItemId(50)).await.unwrap());

        writer.commit_batch().await.unwrap();
        assert!(db.is_known_missing(ItemId(50)).await.unwrap());
        assert_eq!(db.count_items().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_writes_are_serialized() {
        let dir = tempdir().unwrap();
        let db = Database::new(&dir.path().join("items.db")).await.unwrap();
        let writer = std::sync::Arc::new(
            ItemWriter::new(&db, CommitStrategy::PerBatch).await.unwrap(),
        );

        writer.begin_batch().await.unwrap();
        let mut tasks = tokio::task::JoinSet::new();
        for id in 1..=50 {
            let writer = writer.clone();
            tasks.spawn(async move { writer.write(&story(id, vec![id * 1000])).await });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap().unwrap();
        }
        writer.commit_batch().await.unwrap();

        assert_eq!(db.count_items().await.unwrap(), 50);
        assert_eq!(db.count_kids().await.unwrap(), 50);
    }
}
