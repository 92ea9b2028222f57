//! Durable record of the last block each listener has fully processed.
//!
//! Heights are keyed by (chain name, configured start block) so a restart
//! with a different start block gets its own cursor. The listener only ever
//! writes; the resume height is read once at startup.

use std::path::Path;

use async_trait::async_trait;
use eyre::{Result, WrapErr};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

/// Write-side contract the listeners depend on.
#[async_trait]
pub trait Blockstorer: Send + Sync {
    async fn store_block(&self, height: u64) -> Result<()>;
}

/// SQLite-backed blockstore.
pub struct Blockstore {
    pool: SqlitePool,
    chain_name: String,
    start_block: u64,
}

impl Blockstore {
    /// Open (creating if missing) the blockstore file and run migrations.
    pub async fn open(path: &Path, chain_name: &str, start_block: u64) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .wrap_err_with(|| format!("Failed to open blockstore at {}", path.display()))?;
        Self::with_pool(pool, chain_name, start_block).await
    }

    /// In-memory blockstore, used in tests.
    pub async fn open_in_memory(chain_name: &str, start_block: u64) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .wrap_err("Failed to open in-memory blockstore")?;
        Self::with_pool(pool, chain_name, start_block).await
    }

    async fn with_pool(pool: SqlitePool, chain_name: &str, start_block: u64) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .wrap_err("Failed to run blockstore migrations")?;
        Ok(Blockstore {
            pool,
            chain_name: chain_name.to_string(),
            start_block,
        })
    }

    /// Highest successfully processed height recorded for this chain and
    /// start block, if any.
    pub async fn latest_block(&self) -> Result<Option<u64>> {
        let row = sqlx::query(
            "SELECT last_block FROM blockstore WHERE chain_name = ?1 AND start_block = ?2",
        )
        .bind(&self.chain_name)
        .bind(self.start_block as i64)
        .fetch_optional(&self.pool)
        .await
        .wrap_err("Failed to read blockstore")?;
        Ok(row.map(|r| r.get::<i64, _>("last_block") as u64))
    }

    /// Height the listener should resume from: one past the stored height,
    /// floored at the configured start block.
    pub async fn resume_height(&self) -> Result<u64> {
        Ok(match self.latest_block().await? {
            Some(stored) if stored + 1 > self.start_block => stored + 1,
            _ => self.start_block,
        })
    }
}

#[async_trait]
impl Blockstorer for Blockstore {
    async fn store_block(&self, height: u64) -> Result<()> {
        sqlx::query(
            "INSERT INTO blockstore (chain_name, start_block, last_block) VALUES (?1, ?2, ?3) \
             ON CONFLICT (chain_name, start_block) DO UPDATE \
             SET last_block = excluded.last_block, updated_at = datetime('now')",
        )
        .bind(&self.chain_name)
        .bind(self.start_block as i64)
        .bind(height as i64)
        .execute(&self.pool)
        .await
        .wrap_err("Failed to write to blockstore")?;
        Ok(())
    }
}
