//! Item and kid statements.
//!
//! The insert functions take a bare connection so the writer can run them inside
//! whatever transaction scope its commit strategy calls for.

use crate::error::DatabaseError;
use crate::types::{ChildRef, Item, ItemId, StoredItem};
use crate::{Error, Result};
use sqlx::SqliteConnection;

use super::Database;

/// SQLite's default SQLITE_MAX_VARIABLE_NUMBER is 999; each kid row binds 3.
const MAX_KIDS_PER_INSERT: usize = 333;

/// Encode an integer list as comma-joined decimals (`[1, 22, 333]` -> `"1,22,333"`)
pub fn encode_parts(parts: &[i64]) -> String {
    parts
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Decode the comma-joined format written by [`encode_parts`], skipping malformed entries
pub fn decode_parts(encoded: &str) -> Vec<i64> {
    encoded
        .split(',')
        .filter_map(|p| p.trim().parse().ok())
        .collect()
}

impl Database {
    /// Insert-or-ignore the `items` row for `item`
    ///
    /// Returns `true` if a new row was written, `false` if the ID already existed.
    pub(crate) async fn insert_item_row(
        conn: &mut SqliteConnection,
        item: &Item,
    ) -> std::result::Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO items (
                id, deleted, type, by, time, text, dead, parent, poll, url, score, title, parts, descendants
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(item.id)
        .bind(item.deleted)
        .bind(&item.kind)
        .bind(&item.by)
        .bind(item.time)
        .bind(&item.text)
        .bind(item.dead)
        .bind(item.parent)
        .bind(item.poll)
        .bind(&item.url)
        .bind(item.score)
        .bind(&item.title)
        .bind(encode_parts(&item.parts))
        .bind(item.descendants)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Insert one `kids` row per entry of `item.kids`, in list order
    ///
    /// Rows already present under the natural key are ignored. Returns the number
    /// of rows actually written.
    pub(crate) async fn insert_child_refs(
        conn: &mut SqliteConnection,
        item: &Item,
    ) -> std::result::Result<u64, sqlx::Error> {
        let refs = item.child_refs();
        let mut written = 0;

        for chunk in refs.chunks(MAX_KIDS_PER_INSERT) {
            let mut query_builder =
                sqlx::QueryBuilder::new("INSERT OR IGNORE INTO kids (item, kid, display_order) ");

            query_builder.push_values(chunk, |mut b, child| {
                b.push_bind(child.item)
                    .push_bind(child.kid)
                    .push_bind(child.display_order);
            });

            let result = query_builder.build().execute(&mut *conn).await?;
            written += result.rows_affected();
        }

        Ok(written)
    }

    /// Remember that the upstream has no item under `id`
    ///
    /// Returns `true` if the ID was not already recorded.
    pub(crate) async fn insert_missing_row(
        conn: &mut SqliteConnection,
        id: ItemId,
    ) -> std::result::Result<bool, sqlx::Error> {
        let result =
            sqlx::query("INSERT OR IGNORE INTO missing_items (id, recorded_at) VALUES (?, ?)")
                .bind(id)
                .bind(chrono::Utc::now().timestamp())
                .execute(&mut *conn)
                .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Whether `id` was recorded as nonexistent upstream
    pub async fn is_known_missing(&self, id: ItemId) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT id FROM missing_items WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to look up missing item: {}",
                    e
                )))
            })?;

        Ok(found.is_some())
    }

    /// Number of IDs recorded as nonexistent upstream
    pub async fn count_known_missing(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM missing_items")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to count missing items: {}",
                    e
                )))
            })
    }

    /// Get a stored item by ID
    pub async fn get_item(&self, id: ItemId) -> Result<Option<StoredItem>> {
        sqlx::query_as::<_, StoredItem>(
            r#"
            SELECT id, deleted, type, by, time, text, dead, parent, poll, url, score, title, parts, descendants
            FROM items
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get item: {}",
                e
            )))
        })
    }

    /// Get the kid rows of `parent`, ordered by position
    pub async fn get_kids(&self, parent: ItemId) -> Result<Vec<ChildRef>> {
        sqlx::query_as::<_, ChildRef>(
            "SELECT item, kid, display_order FROM kids WHERE item = ? ORDER BY display_order ASC",
        )
        .bind(parent)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get kids: {}",
                e
            )))
        })
    }

    /// Total number of stored items
    pub async fn count_items(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM items")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to count items: {}",
                    e
                )))
            })
    }

    /// Total number of stored kid rows
    pub async fn count_kids(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM kids")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to count kids: {}",
                    e
                )))
            })
    }

    /// Highest stored item ID, or `None` for an empty store
    pub async fn max_item_id(&self) -> Result<Option<ItemId>> {
        let max = sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(id) FROM items")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to query max item ID: {}",
                    e
                )))
            })?;

        Ok(max.map(ItemId))
    }

    /// IDs in `[floor, ceiling]` that have no `items` row, highest first
    ///
    /// IDs recorded in `missing_items` are left out.
    pub async fn missing_ids(&self, floor: ItemId, ceiling: ItemId) -> Result<Vec<ItemId>> {
        if ceiling < floor {
            return Ok(Vec::new());
        }

        let present: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM items WHERE id BETWEEN ? AND ?
            UNION
            SELECT id FROM missing_items WHERE id BETWEEN ? AND ?
            ORDER BY id DESC
            "#,
        )
        .bind(floor)
        .bind(ceiling)
        .bind(floor)
        .bind(ceiling)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list stored IDs: {}",
                e
            )))
        })?;

        let span = (ceiling.0 - floor.0 + 1) as usize;
        let mut missing = Vec::with_capacity(span.saturating_sub(present.len()));
        let mut known = present.into_iter().peekable();

        for id in (floor.0..=ceiling.0).rev() {
            if known.next_if_eq(&id).is_some() {
                continue;
            }
            missing.push(ItemId(id));
        }

        Ok(missing)
    }
}
