//! Database lifecycle and schema bootstrap.
//!
//! Every statement is `IF NOT EXISTS`, so a store created by another loader is
//! picked up as-is and only the `schema_version` bookkeeping is added.

use crate::config::PersistenceConfig;
use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqliteSynchronous};
use sqlx::{Sqlite, SqliteConnection};
use std::path::Path;
use std::str::FromStr;

use super::Database;

impl Database {
    /// Open (or create) a database with durable defaults and bootstrap the schema
    pub async fn new(path: &Path) -> Result<Self> {
        Self::open(&PersistenceConfig {
            database_path: path.to_path_buf(),
            fast_writes: false,
        })
        .await
    }

    /// Open (or create) the database described by `config` and bootstrap the schema
    pub async fn open(config: &PersistenceConfig) -> Result<Self> {
        let path = &config.database_path;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to create database directory: {}",
                    e
                )))
            })?;
        }

        let options = Self::connect_options(path, config.fast_writes)?;

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to connect to database: {}",
                e
            )))
        })?;

        let db = Self { pool };
        db.run_migrations().await?;

        tracing::debug!(
            path = %path.display(),
            fast_writes = config.fast_writes,
            "Database opened"
        );

        Ok(db)
    }

    fn connect_options(path: &Path, fast_writes: bool) -> Result<SqliteConnectOptions> {
        let mut options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to parse database path: {}",
                    e
                )))
            })?
            .create_if_missing(true)
            // kid rows may point at items outside the fetched range
            .foreign_keys(false)
            .journal_mode(SqliteJournalMode::Wal);

        if fast_writes {
            options = options
                .synchronous(SqliteSynchronous::Off)
                .pragma("cache_size", "1000000")
                .pragma("temp_store", "MEMORY");
        }

        Ok(options)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create schema_version table: {}",
                e
            )))
        })?;

        let current_version =
            sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(version) FROM schema_version")
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to query schema version: {}",
                        e
                    )))
                })?
                .flatten();

        if current_version.unwrap_or(0) < 1 {
            Self::migrate_v1(&mut conn).await?;
        }

        if current_version.unwrap_or(0) < 2 {
            Self::migrate_v2(&mut conn).await?;
        }

        // Outside the versioned migration: an externally created store may already
        // hold duplicate kid rows, in which case the index cannot be built.
        Self::ensure_kids_natural_key(&mut conn).await;

        Ok(())
    }

    /// Migration v1: items and kids tables
    async fn migrate_v1(conn: &mut SqliteConnection) -> Result<()> {
        tracing::info!("Applying database migration v1");

        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to begin transaction: {}",
                    e
                )))
            })?;

        let result = async {
            Self::create_items_table(conn).await?;
            Self::create_kids_schema(conn).await?;
            Self::record_migration(conn, 1).await?;
            Ok::<(), Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| {
                        Error::Database(DatabaseError::MigrationFailed(format!(
                            "Failed to commit migration v1: {}",
                            e
                        )))
                    })?;
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                return Err(e);
            }
        }

        tracing::info!("Database migration v1 complete");
        Ok(())
    }

    /// Migration v2: IDs the upstream reported as nonexistent
    async fn migrate_v2(conn: &mut SqliteConnection) -> Result<()> {
        tracing::info!("Applying database migration v2");

        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to begin transaction: {}",
                    e
                )))
            })?;

        let result = async {
            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS missing_items (
                    id INTEGER PRIMARY KEY,
                    recorded_at INTEGER NOT NULL
                )
                "#,
            )
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to create missing_items table: {}",
                    e
                )))
            })?;

            Self::record_migration(conn, 2).await?;
            Ok::<(), Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| {
                        Error::Database(DatabaseError::MigrationFailed(format!(
                            "Failed to commit migration v2: {}",
                            e
                        )))
                    })?;
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                return Err(e);
            }
        }

        tracing::info!("Database migration v2 complete");
        Ok(())
    }

    async fn create_items_table(conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                id INTEGER PRIMARY KEY,
                deleted BOOLEAN,
                type TEXT,
                by TEXT,
                time INTEGER,
                text TEXT,
                dead BOOLEAN,
                parent INTEGER,
                poll INTEGER,
                url TEXT,
                score INTEGER,
                title TEXT,
                parts TEXT,
                descendants INTEGER
            ) WITHOUT ROWID
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create items table: {}",
                e
            )))
        })?;

        Ok(())
    }

    async fn create_kids_schema(conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kids (
                item INTEGER,
                kid INTEGER,
                display_order INTEGER,
                FOREIGN KEY (item) REFERENCES items (id)
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create kids table: {}",
                e
            )))
        })?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_kids_item ON kids(item)")
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to create index: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Unique index backing `INSERT OR IGNORE` on kids
    ///
    /// Failure is logged, not returned: kid inserts still work, they just stop
    /// de-duplicating for this store.
    async fn ensure_kids_natural_key(conn: &mut SqliteConnection) {
        let result = sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_kids_natural_key ON kids(item, kid, display_order)",
        )
        .execute(&mut *conn)
        .await;

        if let Err(e) = result {
            tracing::warn!(
                error = %e,
                "Could not create unique index on kids; re-fetched parents may duplicate kid rows"
            );
        }
    }

    async fn record_migration(conn: &mut SqliteConnection, version: i64) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to record migration v{}: {}",
                    version, e
                )))
            })?;

        Ok(())
    }

    /// Check out the connection that will serve as the single writer
    pub async fn acquire_writer(&self) -> Result<PoolConnection<Sqlite>> {
        self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire write connection: {}",
                e
            )))
        })
    }

    /// Close the database connection
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
