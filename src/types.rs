/// Core domain types for the screener
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Market an instrument is listed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Market {
    Kospi,
    Kosdaq,
    Nasdaq,
    Nyse,
    Amex,
}

impl Market {
    pub fn is_korean(&self) -> bool {
        matches!(self, Market::Kospi | Market::Kosdaq)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Market::Kospi => "KOSPI",
            Market::Kosdaq => "KOSDAQ",
            Market::Nasdaq => "NASDAQ",
            Market::Nyse => "NYSE",
            Market::Amex => "AMEX",
        }
    }
}

/// A recognised instrument: identity is (market, code).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub code: String,
    pub name: String,
    pub market: Market,
    pub is_etf: bool,
    pub is_etn: bool,
    pub is_active: bool,
}

/// One daily OHLCV bar.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DailyBar {
    pub trade_date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// A broker-issued access token and its validity window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub issued_at: chrono::DateTime<Utc>,
    pub expires_at: chrono::DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, safety_margin: chrono::Duration) -> bool {
        Utc::now() + safety_margin >= self.expires_at
    }
}

/// Current snapshot quote with optional fundamentals (nullable by broker).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub price: f64,
    pub market_cap: Option<i64>,
    pub per: Option<f64>,
    pub pbr: Option<f64>,
    pub eps: Option<f64>,
    pub bps: Option<f64>,
}

/// Which side of a Bollinger band the current price sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BandPosition {
    Upper,
    Middle,
    Lower,
}

/// Running progress snapshot for a backfill or incremental update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    pub operation: String,
    pub total: usize,
    pub current: usize,
    pub current_stock: Option<String>,
    pub started_at: chrono::DateTime<Utc>,
    pub finished_at: Option<chrono::DateTime<Utc>>,
    pub failures: Vec<String>,
}

impl Progress {
    pub fn new(operation: &str, total: usize) -> Self {
        Progress {
            operation: operation.to_string(),
            total,
            current: 0,
            current_stock: None,
            started_at: Utc::now(),
            finished_at: None,
            failures: Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.finished_at.is_none()
    }
}

/// Statistics over the full price store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStatistics {
    pub instrument_count: u64,
    pub bar_count: u64,
    pub oldest_date: Option<NaiveDate>,
    pub newest_date: Option<NaiveDate>,
    pub last_full_init: Option<String>,
    pub last_daily_update: Option<String>,
}
