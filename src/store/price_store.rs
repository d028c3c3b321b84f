/// Durable per-instrument daily bar store. Single-writer, many-reader,
/// backed by a WAL-mode sqlite file so readers never block the collector.
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::path::Path;

use super::schema::SCHEMA_SQL;
use crate::error::Result;
use crate::types::{DailyBar, StoreStatistics};

pub struct PriceStore {
    conn: Mutex<Connection>,
}

impl PriceStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(PriceStore {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(PriceStore {
            conn: Mutex::new(conn),
        })
    }

    /// Idempotent batch upsert within a single transaction: applying the
    /// same batch twice leaves row count and values unchanged.
    pub fn upsert_batch(&self, instrument: &str, bars: &[DailyBar]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO daily_prices
                    (instrument, trade_date, open, high, low, close, volume, inserted_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                 ON CONFLICT(instrument, trade_date) DO UPDATE SET
                    open = excluded.open,
                    high = excluded.high,
                    low = excluded.low,
                    close = excluded.close,
                    volume = excluded.volume,
                    updated_at = excluded.updated_at",
            )?;
            for bar in bars {
                stmt.execute(params![
                    instrument,
                    bar.trade_date.to_string(),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume as i64,
                    now,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Newest-first, bounded to `limit` rows.
    pub fn bars(&self, instrument: &str, limit: usize) -> Result<Vec<DailyBar>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT trade_date, open, high, low, close, volume
             FROM daily_prices WHERE instrument = ?1
             ORDER BY trade_date DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![instrument, limit as i64], |row| {
            let date_str: String = row.get(0)?;
            Ok(DailyBar {
                trade_date: NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
                    .unwrap_or_default(),
                open: row.get(1)?,
                high: row.get(2)?,
                low: row.get(3)?,
                close: row.get(4)?,
                volume: row.get::<_, i64>(5)? as u64,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    pub fn latest_date(&self, instrument: &str) -> Result<Option<NaiveDate>> {
        let conn = self.conn.lock();
        let result: Option<String> = conn
            .query_row(
                "SELECT trade_date FROM daily_prices WHERE instrument = ?1
                 ORDER BY trade_date DESC LIMIT 1",
                params![instrument],
                |row| row.get(0),
            )
            .ok();
        Ok(result.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()))
    }

    pub fn all_instruments_with_bars(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT DISTINCT instrument FROM daily_prices")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    /// Removes bars older than `today - horizon_days`. Run only during
    /// full-backfill finalisation, never during incremental update.
    pub fn prune_older_than(&self, horizon_days: i64) -> Result<usize> {
        let cutoff = (Utc::now().date_naive() - chrono::Duration::days(horizon_days)).to_string();
        let conn = self.conn.lock();
        let affected = conn.execute(
            "DELETE FROM daily_prices WHERE trade_date < ?1",
            params![cutoff],
        )?;
        Ok(affected)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO db_metadata (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT value FROM db_metadata WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .ok())
    }

    pub fn statistics(&self) -> Result<StoreStatistics> {
        let conn = self.conn.lock();
        let instrument_count: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT instrument) FROM daily_prices",
            [],
            |row| row.get(0),
        )?;
        let bar_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM daily_prices", [], |row| row.get(0))?;
        let oldest: Option<String> = conn
            .query_row("SELECT MIN(trade_date) FROM daily_prices", [], |row| {
                row.get(0)
            })
            .ok()
            .flatten();
        let newest: Option<String> = conn
            .query_row("SELECT MAX(trade_date) FROM daily_prices", [], |row| {
                row.get(0)
            })
            .ok()
            .flatten();
        drop(conn);

        Ok(StoreStatistics {
            instrument_count: instrument_count as u64,
            bar_count: bar_count as u64,
            oldest_date: oldest.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
            newest_date: newest.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
            last_full_init: self.get_meta("last_full_init")?,
            last_daily_update: self.get_meta("last_daily_update")?,
        })
    }

    pub fn has_any_bars(&self) -> Result<bool> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM daily_prices LIMIT 1", [], |row| {
            row.get(0)
        })?;
        Ok(count > 0)
    }

    /// Transactional full replace of the instrument master: a failure
    /// mid-refresh rolls back entirely rather than leaving a partial
    /// snapshot visible.
    pub fn refresh_master(&self, instruments: &[crate::types::Instrument]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        tx.execute("DELETE FROM stock_master", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO stock_master (code, market, name, is_active, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for inst in instruments {
                stmt.execute(params![
                    inst.code,
                    inst.market.as_str(),
                    inst.name,
                    inst.is_active as i64,
                    now,
                ])?;
            }
        }
        tx.commit()?;
        drop(conn);
        self.set_meta("stock_master_refreshed_at", &now)?;
        Ok(())
    }

    /// Replaces only the rows for one market, leaving other markets' rows
    /// untouched. Used by operator uploads, which submit one listing file
    /// per market and must not clobber markets not present in this upload.
    pub fn replace_market_instruments(
        &self,
        market: crate::types::Market,
        instruments: &[crate::types::Instrument],
    ) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        tx.execute("DELETE FROM stock_master WHERE market = ?1", params![market.as_str()])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO stock_master (code, market, name, is_active, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for inst in instruments {
                stmt.execute(params![
                    inst.code,
                    inst.market.as_str(),
                    inst.name,
                    inst.is_active as i64,
                    now,
                ])?;
            }
        }
        tx.commit()?;
        drop(conn);
        self.set_meta("stock_master_refreshed_at", &now)?;
        Ok(())
    }

    pub fn all_active_instruments(&self) -> Result<Vec<crate::types::Instrument>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT code, market, name, is_active FROM stock_master WHERE is_active = 1")?;
        let rows = stmt.query_map([], Self::row_to_instrument)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    pub fn instruments_by_market(
        &self,
        market: crate::types::Market,
    ) -> Result<Vec<crate::types::Instrument>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT code, market, name, is_active FROM stock_master WHERE market = ?1 AND is_active = 1",
        )?;
        let rows = stmt.query_map(params![market.as_str()], Self::row_to_instrument)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    pub fn instrument_name(&self, code: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT name FROM stock_master WHERE code = ?1",
                params![code],
                |row| row.get(0),
            )
            .ok())
    }

    pub fn master_instrument_count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM stock_master", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn master_counts_by_market(&self) -> Result<Vec<(String, u64)>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT market, COUNT(*) FROM stock_master GROUP BY market")?;
        let rows = stmt.query_map([], |row| {
            let market: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((market, count as u64))
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    fn row_to_instrument(
        row: &rusqlite::Row,
    ) -> rusqlite::Result<crate::types::Instrument> {
        let market_str: String = row.get(1)?;
        let market = match market_str.as_str() {
            "KOSPI" => crate::types::Market::Kospi,
            "KOSDAQ" => crate::types::Market::Kosdaq,
            "NYSE" => crate::types::Market::Nyse,
            "AMEX" => crate::types::Market::Amex,
            _ => crate::types::Market::Nasdaq,
        };
        Ok(crate::types::Instrument {
            code: row.get(0)?,
            name: row.get(2)?,
            market,
            is_etf: false,
            is_etn: false,
            is_active: row.get::<_, i64>(3)? != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(date: &str, close: f64) -> DailyBar {
        DailyBar {
            trade_date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1000,
        }
    }

    #[test]
    fn upsert_is_idempotent() {
        let store = PriceStore::open_in_memory().unwrap();
        let bars = vec![bar("2026-07-01", 100.0), bar("2026-07-02", 101.0)];
        store.upsert_batch("005930", &bars).unwrap();
        store.upsert_batch("005930", &bars).unwrap();

        let stats = store.statistics().unwrap();
        assert_eq!(stats.bar_count, 2);
        assert_eq!(store.latest_date("005930").unwrap().unwrap(), bars[1].trade_date);
    }

    #[test]
    fn prune_removes_only_old_rows() {
        let store = PriceStore::open_in_memory().unwrap();
        let old_date = (Utc::now().date_naive() - chrono::Duration::days(500)).to_string();
        let recent_date = Utc::now().date_naive().to_string();
        store
            .upsert_batch(
                "AAPL",
                &[
                    bar(&old_date, 10.0),
                    bar(&recent_date, 20.0),
                ],
            )
            .unwrap();

        let removed = store.prune_older_than(400).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.bars("AAPL", 10).unwrap().len(), 1);
    }

    #[test]
    fn meta_roundtrips() {
        let store = PriceStore::open_in_memory().unwrap();
        store.set_meta("last_full_init", "2026-07-01").unwrap();
        assert_eq!(
            store.get_meta("last_full_init").unwrap(),
            Some("2026-07-01".to_string())
        );
    }
}
