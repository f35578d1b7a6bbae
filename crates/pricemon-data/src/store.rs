//! SQLite storage for price and deviation samples.
//!
//! Uses WAL mode and one transaction per batch. Both tables are keyed by their
//! natural key, and writes are upserts, so replaying a block range overwrites
//! rows instead of duplicating them.

use bigdecimal::{BigDecimal, ToPrimitive};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

use crate::types::{DeviationSample, PairSummary, PoolType, PriceSample};

/// Persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store connection lock poisoned")]
    Poisoned,
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Creates or opens a SQLite database with WAL mode enabled.
    ///
    /// # Errors
    /// Returns error if the database cannot be opened or migrations fail.
    pub fn new(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn run_migrations(&self) -> Result<(), StoreError> {
        self.conn()?.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS price_samples (
                pair_name TEXT NOT NULL,
                block_number INTEGER NOT NULL,
                pool_address TEXT NOT NULL,
                pool_type TEXT NOT NULL,
                price_base_in_quote TEXT NOT NULL,
                price_approx REAL NOT NULL,
                base_symbol TEXT NOT NULL,
                quote_symbol TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                datetime TEXT NOT NULL,
                PRIMARY KEY (pair_name, block_number)
            );

            CREATE TABLE IF NOT EXISTS price_deviations (
                pair_a TEXT NOT NULL,
                pair_b TEXT NOT NULL,
                block_number INTEGER NOT NULL,
                deviation_pct TEXT NOT NULL,
                deviation_approx REAL NOT NULL,
                PRIMARY KEY (pair_a, pair_b, block_number)
            );

            CREATE INDEX IF NOT EXISTS idx_price_samples_block
                ON price_samples (block_number);
            ",
        )?;
        Ok(())
    }

    /// Insert or replace price samples keyed by `(pair_name, block_number)`.
    ///
    /// # Errors
    /// Returns error if the transaction fails; nothing from the batch is kept then.
    pub fn upsert_prices(&self, samples: &[PriceSample]) -> Result<usize, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO price_samples (
                    pair_name, block_number, pool_address, pool_type,
                    price_base_in_quote, price_approx, base_symbol, quote_symbol,
                    timestamp, datetime
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (pair_name, block_number) DO UPDATE SET
                    pool_address = excluded.pool_address,
                    pool_type = excluded.pool_type,
                    price_base_in_quote = excluded.price_base_in_quote,
                    price_approx = excluded.price_approx,
                    base_symbol = excluded.base_symbol,
                    quote_symbol = excluded.quote_symbol,
                    timestamp = excluded.timestamp,
                    datetime = excluded.datetime
                ",
            )?;

            for s in samples {
                stmt.execute(rusqlite::params![
                    s.pair_name,
                    s.block_number,
                    format!("{:#x}", s.pool_address),
                    s.pool_type.as_str(),
                    s.price_base_in_quote.to_string(),
                    s.price_base_in_quote.to_f64().unwrap_or(f64::NAN),
                    s.base_symbol,
                    s.quote_symbol,
                    s.timestamp,
                    s.datetime(),
                ])?;
            }
        }

        let count = samples.len();
        tx.commit()?;
        Ok(count)
    }

    /// Insert or replace deviation samples keyed by `(pair_a, pair_b, block_number)`.
    ///
    /// # Errors
    /// Returns error if the transaction fails.
    pub fn upsert_deviations(&self, deviations: &[DeviationSample]) -> Result<usize, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO price_deviations (
                    pair_a, pair_b, block_number, deviation_pct, deviation_approx
                ) VALUES (?, ?, ?, ?, ?)
                ON CONFLICT (pair_a, pair_b, block_number) DO UPDATE SET
                    deviation_pct = excluded.deviation_pct,
                    deviation_approx = excluded.deviation_approx
                ",
            )?;

            for d in deviations {
                stmt.execute(rusqlite::params![
                    d.pair_a,
                    d.pair_b,
                    d.block_number,
                    d.deviation_pct.to_string(),
                    d.deviation_pct.to_f64().unwrap_or(f64::NAN),
                ])?;
            }
        }

        let count = deviations.len();
        tx.commit()?;
        Ok(count)
    }

    /// Stored sample for `pair_name` at `block_number`.
    ///
    /// # Errors
    /// Returns error if the query fails or a stored value cannot be parsed.
    pub fn price_at(
        &self,
        pair_name: &str,
        block_number: u64,
    ) -> Result<Option<PriceSample>, StoreError> {
        let conn = self.conn()?;
        let sample = conn
            .query_row(
                "
                SELECT block_number, pool_address, pool_type, pair_name,
                       price_base_in_quote, base_symbol, quote_symbol, timestamp
                FROM price_samples
                WHERE pair_name = ? AND block_number = ?
                ",
                rusqlite::params![pair_name, block_number],
                row_to_sample,
            )
            .optional()?;
        Ok(sample)
    }

    /// Samples for `pair_name` with `from <= block_number <= to`, ascending.
    ///
    /// # Errors
    /// Returns error if the query fails.
    pub fn prices_for_pair(
        &self,
        pair_name: &str,
        from: u64,
        to: u64,
    ) -> Result<Vec<PriceSample>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "
            SELECT block_number, pool_address, pool_type, pair_name,
                   price_base_in_quote, base_symbol, quote_symbol, timestamp
            FROM price_samples
            WHERE pair_name = ? AND block_number BETWEEN ? AND ?
            ORDER BY block_number ASC
            ",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![pair_name, from, to], row_to_sample)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Stored deviation (decimal text) for a canonical pair combination.
    ///
    /// # Errors
    /// Returns error if the query fails.
    pub fn deviation_at(
        &self,
        pair_a: &str,
        pair_b: &str,
        block_number: u64,
    ) -> Result<Option<String>, StoreError> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "
                SELECT deviation_pct FROM price_deviations
                WHERE pair_a = ? AND pair_b = ? AND block_number = ?
                ",
                rusqlite::params![pair_a, pair_b, block_number],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Total number of stored price samples.
    ///
    /// # Errors
    /// Returns error if the query fails.
    pub fn count_prices(&self) -> Result<u64, StoreError> {
        let conn = self.conn()?;
        let count = conn.query_row("SELECT COUNT(*) FROM price_samples", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Per-pair sample counts, block range and latest price.
    ///
    /// # Errors
    /// Returns error if the query fails.
    pub fn pair_summaries(&self) -> Result<Vec<PairSummary>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "
            SELECT p.pair_name, COUNT(*), MIN(p.block_number), MAX(p.block_number),
                   (SELECT l.price_base_in_quote FROM price_samples l
                    WHERE l.pair_name = p.pair_name
                    ORDER BY l.block_number DESC LIMIT 1)
            FROM price_samples p
            GROUP BY p.pair_name
            ORDER BY p.pair_name
            ",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(PairSummary {
                    pair_name: row.get(0)?,
                    samples: row.get(1)?,
                    first_block: row.get(2)?,
                    last_block: row.get(3)?,
                    last_price: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn row_to_sample(row: &Row<'_>) -> rusqlite::Result<PriceSample> {
    let pool_address: String = row.get(1)?;
    let pool_type: String = row.get(2)?;
    let price: String = row.get(4)?;

    Ok(PriceSample {
        block_number: row.get(0)?,
        pool_address: pool_address
            .parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?,
        pool_type: PoolType::from_str(&pool_type)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, e.into()))?,
        pair_name: row.get(3)?,
        price_base_in_quote: BigDecimal::from_str(&price)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?,
        base_symbol: row.get(5)?,
        quote_symbol: row.get(6)?,
        timestamp: row.get(7)?,
    })
}
