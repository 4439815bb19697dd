use std::{future::Future, str::FromStr, time::Duration};

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use tracing::info;

use crate::error::{Error, Result};

pub mod guesses;
pub mod hunts;
pub mod outcomes;

pub type StoreTransaction = sqlx::Transaction<'static, sqlx::Sqlite>;

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

/// Handle to the transactional store. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    timeout: Duration,
}

impl Store {
    /// Open the database at `url` and apply the schema.
    ///
    /// In-memory databases are pinned to a single long-lived connection, since
    /// every new sqlite connection to `:memory:` opens an empty database.
    pub async fn connect(url: &str, max_connections: u32, timeout: Duration) -> Result<Self> {
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let mut options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(timeout);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool_options = SqlitePoolOptions::new().acquire_timeout(timeout);
        let pool_options = if in_memory {
            pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_options.max_connections(max_connections.max(1))
        };
        let pool = pool_options.connect_with(options).await?;

        let store = Self { pool, timeout };
        store.migrate().await?;
        info!(in_memory, "store ready");
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<StoreTransaction> {
        Ok(self.pool.begin().await?)
    }

    /// Bound a unit of store work by the configured timeout. On expiry the
    /// future is dropped, which rolls back any open transaction. Writes hand
    /// their transaction back out and commit after this returns, so a commit
    /// is never cut short once sqlite may have applied it.
    pub async fn timed<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(Error::from)?
    }

    pub async fn close(&self) {
        self.pool.close().await
    }
}
