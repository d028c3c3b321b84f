/// Durable instrument master cache. Source precedence on refresh:
/// durable store (if fresh) -> operator upload -> packaged CSV fallback ->
/// hard-coded minimal universe. Structurally adapted from a broker-backed
/// token/instrument cache: the TTL-gated refresh shape survives, the
/// NIFTY-specific lookups do not.
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{Result, ScreenerError};
use crate::market::MarketCapability;
use crate::store::PriceStore;
use crate::types::{Instrument, Market};

/// Snapshot of the master cache's own contents, as opposed to `StoreStatistics`
/// which reports price-bar coverage.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MasterStats {
    pub total: u64,
    pub per_market: HashMap<String, u64>,
    pub last_refresh: Option<String>,
}

/// `code,name,market[,sector]`, packaged into the binary as a last-resort
/// listing when no durable snapshot or operator upload is available.
const PACKAGED_CSV: &str = include_str!("../../assets/instrument_master_fallback.csv");

pub struct InstrumentMasterCache {
    store: Arc<PriceStore>,
    ttl_days: i64,
}

impl InstrumentMasterCache {
    pub fn new(store: Arc<PriceStore>, ttl_days: i64) -> Self {
        InstrumentMasterCache { store, ttl_days }
    }

    pub fn needs_refresh(&self) -> Result<bool> {
        let refreshed_at = self.store.get_meta("stock_master_refreshed_at")?;
        let count = self.store.master_instrument_count()?;
        if count == 0 {
            return Ok(true);
        }
        let Some(refreshed_at) = refreshed_at else {
            return Ok(true);
        };
        let Ok(refreshed_at) = chrono::DateTime::parse_from_rfc3339(&refreshed_at) else {
            return Ok(true);
        };
        let age = chrono::Utc::now().signed_duration_since(refreshed_at);
        Ok(age > chrono::Duration::days(self.ttl_days))
    }

    /// Ensures the durable master is populated, falling back through the
    /// precedence chain when the store is empty or stale and no operator
    /// upload has occurred.
    pub fn ensure_fresh(&self, capabilities: &[Arc<dyn MarketCapability>]) -> Result<()> {
        if !self.needs_refresh()? {
            return Ok(());
        }

        match self.load_packaged_csv() {
            Ok(instruments) if !instruments.is_empty() => {
                info!(count = instruments.len(), "refreshing instrument master from packaged csv");
                self.store.refresh_master(&instruments)?;
            }
            _ => {
                warn!("packaged csv unavailable or empty, falling back to hard-coded universe");
                let instruments: Vec<Instrument> = capabilities
                    .iter()
                    .flat_map(|c| c.packaged_universe())
                    .collect();
                self.store.refresh_master(&instruments)?;
            }
        }
        Ok(())
    }

    fn load_packaged_csv(&self) -> Result<Vec<Instrument>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(PACKAGED_CSV.as_bytes());
        let mut instruments = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| ScreenerError::StoreFailure(e.to_string()))?;
            if record.len() < 3 {
                continue;
            }
            let market = match record.get(2).unwrap_or("") {
                "KOSPI" => Market::Kospi,
                "KOSDAQ" => Market::Kosdaq,
                "NASDAQ" => Market::Nasdaq,
                "NYSE" => Market::Nyse,
                "AMEX" => Market::Amex,
                _ => continue,
            };
            instruments.push(Instrument {
                code: record.get(0).unwrap_or("").to_string(),
                name: record.get(1).unwrap_or("").to_string(),
                market,
                is_etf: false,
                is_etn: false,
                is_active: true,
            });
        }
        Ok(instruments)
    }

    /// Parses an operator-uploaded fixed-width listing file: a 6-character
    /// leading numeric code followed by a 40-character name field.
    /// `filename_hint` supplies the market (substring match on "kospi"/"kosdaq").
    pub fn load_from_upload(&self, filename_hint: &str, content: &str) -> Result<Vec<Instrument>> {
        let market = if filename_hint.to_lowercase().contains("kosdaq") {
            Market::Kosdaq
        } else {
            Market::Kospi
        };

        let mut instruments = Vec::new();
        for line in content.lines() {
            // Slice on char boundaries, not byte offsets: the name field
            // routinely holds Korean text, and indexing a `str` by byte
            // range panics if a multibyte character straddles the cut.
            let chars: Vec<char> = line.chars().collect();
            if chars.len() < 46 {
                continue;
            }
            let code: String = chars[0..6].iter().collect::<String>().trim().to_string();
            let name: String = chars[6..46].iter().collect::<String>().trim().to_string();
            if code.is_empty() || !code.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            instruments.push(Instrument {
                code,
                name,
                market,
                is_etf: false,
                is_etn: false,
                is_active: true,
            });
        }

        if instruments.is_empty() {
            return Err(ScreenerError::InvalidInput(
                "uploaded listing file contained no parseable rows".to_string(),
            ));
        }

        self.store.replace_market_instruments(market, &instruments)?;
        Ok(instruments)
    }

    pub fn all_active(&self) -> Result<Vec<Instrument>> {
        self.store.all_active_instruments()
    }

    pub fn by_market(&self, market: Market) -> Result<Vec<Instrument>> {
        self.store.instruments_by_market(market)
    }

    pub fn name_of(&self, code: &str) -> Result<Option<String>> {
        self.store.instrument_name(code)
    }

    pub fn stats(&self) -> Result<MasterStats> {
        let total = self.store.master_instrument_count()?;
        let per_market = self.store.master_counts_by_market()?.into_iter().collect();
        let last_refresh = self.store.get_meta("stock_master_refreshed_at")?;
        Ok(MasterStats { total, per_market, last_refresh })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> InstrumentMasterCache {
        let store = Arc::new(PriceStore::open_in_memory().unwrap());
        InstrumentMasterCache::new(store, 7)
    }

    #[test]
    fn load_from_upload_handles_multibyte_names_without_panicking() {
        let cache = cache();
        // 6-digit code, 40-char name field padded with trailing spaces; the
        // name holds Korean text whose UTF-8 encoding is multi-byte per char.
        let name = "삼성전자";
        let padded_name = format!("{:<40}", name);
        let line = format!("005930{}", padded_name);

        let instruments = cache.load_from_upload("kospi_master.txt", &line).unwrap();

        assert_eq!(instruments.len(), 1);
        assert_eq!(instruments[0].code, "005930");
        assert_eq!(instruments[0].name, name);
        assert_eq!(instruments[0].market, Market::Kospi);
    }

    #[test]
    fn stats_reports_total_per_market_and_last_refresh() {
        let cache = cache();
        let instruments = vec![
            Instrument {
                code: "005930".to_string(),
                name: "Samsung".to_string(),
                market: Market::Kospi,
                is_etf: false,
                is_etn: false,
                is_active: true,
            },
            Instrument {
                code: "AAPL".to_string(),
                name: "Apple".to_string(),
                market: Market::Nasdaq,
                is_etf: false,
                is_etn: false,
                is_active: true,
            },
        ];
        cache.store.refresh_master(&instruments).unwrap();

        let stats = cache.stats().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.per_market.get("KOSPI"), Some(&1));
        assert_eq!(stats.per_market.get("NASDAQ"), Some(&1));
        assert!(stats.last_refresh.is_some());
    }

    #[test]
    fn stats_on_empty_store_has_zero_total_and_no_refresh() {
        let cache = cache();
        let stats = cache.stats().unwrap();
        assert_eq!(stats.total, 0);
        assert!(stats.per_market.is_empty());
        assert!(stats.last_refresh.is_none());
    }
}
