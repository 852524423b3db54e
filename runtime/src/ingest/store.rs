// Copyright 2026 VFat Loader Contributors
// SPDX-License-Identifier: Apache-2.0

//! SQLite store behind the ingestion API.
//!
//! Tables: `vfat_batches`, `tokens` (unique by raw address), `vfat_infos`
//! (one row per scraped pool, owned by a batch) and `vfat_rewards` (owned by
//! an info). Foreign keys are enforced on every connection.

use anyhow::Context;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use vfat_core::{AddressError, Batch};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS vfat_batches (
        batch_id INTEGER PRIMARY KEY AUTOINCREMENT,
        created_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS tokens (
        token_id INTEGER PRIMARY KEY AUTOINCREMENT,
        token_address BLOB NOT NULL UNIQUE,
        symbol TEXT,
        name TEXT
    );
    CREATE TABLE IF NOT EXISTS vfat_infos (
        info_id INTEGER PRIMARY KEY AUTOINCREMENT,
        batch_id INTEGER NOT NULL REFERENCES vfat_batches(batch_id),
        staked_token_id INTEGER NOT NULL REFERENCES tokens(token_id),
        staking_contract_address BLOB NOT NULL,
        pool_address BLOB,
        staked_usd REAL,
        staked_token_price REAL,
        staked_token_tvl REAL
    );
    CREATE TABLE IF NOT EXISTS vfat_rewards (
        reward_id INTEGER PRIMARY KEY AUTOINCREMENT,
        info_id INTEGER NOT NULL REFERENCES vfat_infos(info_id),
        reward_token_id INTEGER NOT NULL REFERENCES tokens(token_id),
        reward_daily_usd REAL,
        reward_token_price REAL,
        apr REAL
    );
";

/// Server-side ingestion failures. Every variant maps to HTTP 500.
#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    #[error("invalid request body: {0}")]
    Body(String),

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error("batch {0} does not exist")]
    UnknownBatch(i64),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("store task failed: {0}")]
    Task(String),
}

/// A token to connect to, or create if its address is new.
#[derive(Debug, Clone, PartialEq)]
pub struct NewToken {
    pub address: Vec<u8>,
    pub symbol: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewReward {
    pub token: NewToken,
    pub daily_usd: Option<f64>,
    pub token_price: Option<f64>,
    pub apr: Option<f64>,
}

/// A decoded `vfat_infos` row with its rewards.
#[derive(Debug, Clone, PartialEq)]
pub struct NewInfo {
    pub staking_contract: Vec<u8>,
    pub pool: Option<Vec<u8>>,
    pub staked_token: NewToken,
    pub staked_usd: Option<f64>,
    pub staked_token_price: Option<f64>,
    pub staked_token_tvl: Option<f64>,
    pub rewards: Vec<NewReward>,
}

/// SQLite-backed record store. The connection is shared behind a mutex;
/// callers on the async side go through `spawn_blocking`.
pub struct IngestStore {
    db: Mutex<Connection>,
}

impl IngestStore {
    /// Open or create a store at `path`, creating parent directories.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let db = Connection::open(path)
            .with_context(|| format!("failed to open store: {}", path.display()))?;
        Self::init(db)
    }

    /// A store that lives only as long as this process.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let db = Connection::open_in_memory().context("failed to open in-memory store")?;
        Self::init(db)
    }

    fn init(db: Connection) -> anyhow::Result<Self> {
        db.execute_batch("PRAGMA foreign_keys = ON;")
            .context("failed to enable foreign keys")?;
        db.execute_batch(SCHEMA)
            .context("failed to create ingestion tables")?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Issue a fresh batch for a production run.
    pub fn create_batch(&self) -> Result<Batch, IngestError> {
        let db = self.conn();
        db.execute(
            "INSERT INTO vfat_batches (created_at) VALUES (?1)",
            params![chrono::Utc::now().to_rfc3339()],
        )?;
        let id = db.last_insert_rowid();
        Batch::issued(id).ok_or(IngestError::UnknownBatch(id))
    }

    /// Make sure the test-mode sentinel batch row exists.
    pub fn ensure_test_batch(&self) -> Result<Batch, IngestError> {
        self.conn().execute(
            "INSERT OR IGNORE INTO vfat_batches (batch_id, created_at) VALUES (?1, ?2)",
            params![Batch::TEST_ID, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(Batch::test())
    }

    pub fn batch_exists(&self, batch: Batch) -> Result<bool, IngestError> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM vfat_batches WHERE batch_id = ?1",
                params![batch.id()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Insert one info row and its rewards under `batch`, connecting tokens
    /// by address or creating them. All or nothing.
    pub fn insert_info(&self, batch: Batch, info: &NewInfo) -> Result<i64, IngestError> {
        let mut db = self.conn();
        let tx = db.transaction()?;

        let known: Option<i64> = tx
            .query_row(
                "SELECT batch_id FROM vfat_batches WHERE batch_id = ?1",
                params![batch.id()],
                |row| row.get(0),
            )
            .optional()?;
        if known.is_none() {
            return Err(IngestError::UnknownBatch(batch.id()));
        }

        let staked_token_id = connect_or_create_token(&tx, &info.staked_token)?;
        tx.execute(
            "INSERT INTO vfat_infos (batch_id, staked_token_id, staking_contract_address,
                pool_address, staked_usd, staked_token_price, staked_token_tvl)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                batch.id(),
                staked_token_id,
                info.staking_contract,
                info.pool,
                info.staked_usd,
                info.staked_token_price,
                info.staked_token_tvl,
            ],
        )?;
        let info_id = tx.last_insert_rowid();

        for reward in &info.rewards {
            let token_id = connect_or_create_token(&tx, &reward.token)?;
            tx.execute(
                "INSERT INTO vfat_rewards (info_id, reward_token_id, reward_daily_usd,
                    reward_token_price, apr)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    info_id,
                    token_id,
                    reward.daily_usd,
                    reward.token_price,
                    reward.apr
                ],
            )?;
        }

        tx.commit()?;
        Ok(info_id)
    }

    /// Number of info rows stored under `batch`.
    pub fn info_count(&self, batch: Batch) -> Result<u64, IngestError> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM vfat_infos WHERE batch_id = ?1",
            params![batch.id()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn reward_count(&self, info_id: i64) -> Result<u64, IngestError> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM vfat_rewards WHERE info_id = ?1",
            params![info_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Symbol of the token stored at `address`, if any.
    pub fn token_symbol(&self, address: &[u8]) -> Result<Option<Option<String>>, IngestError> {
        Ok(self
            .conn()
            .query_row(
                "SELECT symbol FROM tokens WHERE token_address = ?1",
                params![address],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn token_count(&self) -> Result<u64, IngestError> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM tokens", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

/// Existing tokens keep their first-seen symbol and name.
fn connect_or_create_token(tx: &Transaction<'_>, token: &NewToken) -> Result<i64, IngestError> {
    tx.execute(
        "INSERT INTO tokens (token_address, symbol, name) VALUES (?1, ?2, ?3)
         ON CONFLICT(token_address) DO NOTHING",
        params![token.address, token.symbol, token.name],
    )?;
    Ok(tx.query_row(
        "SELECT token_id FROM tokens WHERE token_address = ?1",
        params![token.address],
        |row| row.get(0),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(byte: u8, symbol: &str) -> NewToken {
        NewToken {
            address: vec![byte; 20],
            symbol: Some(symbol.to_string()),
            name: Some(format!("{symbol} Token")),
        }
    }

    fn info(rewards: Vec<NewReward>) -> NewInfo {
        NewInfo {
            staking_contract: vec![0xaa; 20],
            pool: None,
            staked_token: token(0x01, "SLP"),
            staked_usd: Some(1000.0),
            staked_token_price: Some(2.5),
            staked_token_tvl: Some(50_000.0),
            rewards,
        }
    }

    fn reward(byte: u8, symbol: &str) -> NewReward {
        NewReward {
            token: token(byte, symbol),
            daily_usd: Some(12.0),
            token_price: Some(1.1),
            apr: Some(7.5),
        }
    }

    #[test]
    fn test_batches() {
        let dir = tempfile::tempdir().unwrap();
        let store = IngestStore::open(&dir.path().join("nested/vfat.db")).unwrap();

        let first = store.create_batch().unwrap();
        let second = store.create_batch().unwrap();
        assert!(second.id() > first.id());
        assert!(!first.is_test());
        assert!(store.batch_exists(first).unwrap());
        assert!(!store.batch_exists(Batch::test()).unwrap());

        let test = store.ensure_test_batch().unwrap();
        store.ensure_test_batch().unwrap();
        assert!(test.is_test());
        assert!(store.batch_exists(test).unwrap());
    }

    #[test]
    fn test_insert_info_with_rewards() {
        let store = IngestStore::open_in_memory().unwrap();
        let batch = store.create_batch().unwrap();

        let id = store
            .insert_info(batch, &info(vec![reward(0x02, "SUSHI"), reward(0x03, "ALCX")]))
            .unwrap();
        assert_eq!(store.info_count(batch).unwrap(), 1);
        assert_eq!(store.reward_count(id).unwrap(), 2);
        assert_eq!(store.token_count().unwrap(), 3);
    }

    #[test]
    fn test_tokens_connected_by_address() {
        let store = IngestStore::open_in_memory().unwrap();
        let batch = store.create_batch().unwrap();

        store.insert_info(batch, &info(vec![reward(0x02, "SUSHI")])).unwrap();
        let mut renamed = info(vec![reward(0x01, "SLP")]);
        renamed.staked_token.symbol = Some("RENAMED".into());
        store.insert_info(batch, &renamed).unwrap();

        assert_eq!(store.info_count(batch).unwrap(), 2);
        assert_eq!(store.token_count().unwrap(), 2);
        assert_eq!(
            store.token_symbol(&[0x01; 20]).unwrap(),
            Some(Some("SLP".to_string()))
        );
        assert_eq!(store.token_symbol(&[0x09; 20]).unwrap(), None);
    }

    #[test]
    fn test_unknown_batch_rolls_back() {
        let store = IngestStore::open_in_memory().unwrap();
        let err = store
            .insert_info(Batch::issued(42).unwrap(), &info(vec![reward(0x02, "SUSHI")]))
            .unwrap_err();
        assert!(matches!(err, IngestError::UnknownBatch(42)));
        assert_eq!(store.token_count().unwrap(), 0);
    }

    #[test]
    fn test_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vfat.db");
        let batch = {
            let store = IngestStore::open(&path).unwrap();
            let batch = store.create_batch().unwrap();
            store.insert_info(batch, &info(vec![])).unwrap();
            batch
        };

        let store = IngestStore::open(&path).unwrap();
        assert_eq!(store.info_count(batch).unwrap(), 1);
    }
}
