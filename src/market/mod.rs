/// Per-market capability record: binds universe source, broker fetchers,
/// identifier validation and ETF heuristics so the collector and screening
/// engine stay generic over Korean vs US instruments. Adding a third market
/// family means adding a new impl here, not new branches in the engine.
use std::sync::Arc;

use crate::broker::BrokerClient;
use crate::error::Result;
use crate::types::{DailyBar, Instrument, Market, Quote};

const US_ETF_TICKERS: &[&str] = &["QQQ", "SPY", "DIA", "IWM", "EEM", "GLD", "SLV"];

const KR_PACKAGED_UNIVERSE: &[(&str, &str, Market)] = &[
    ("005930", "Samsung Electronics", Market::Kospi),
    ("000660", "SK Hynix", Market::Kospi),
    ("035420", "NAVER", Market::Kospi),
    ("005380", "Hyundai Motor", Market::Kospi),
    ("051910", "LG Chem", Market::Kospi),
    ("035720", "Kakao", Market::Kospi),
    ("247540", "Ecopro BM", Market::Kosdaq),
    ("086520", "Ecopro", Market::Kosdaq),
];

const US_PACKAGED_UNIVERSE: &[(&str, &str, Market)] = &[
    ("AAPL", "Apple Inc", Market::Nasdaq),
    ("MSFT", "Microsoft Corp", Market::Nasdaq),
    ("NVDA", "NVIDIA Corp", Market::Nasdaq),
    ("AMZN", "Amazon.com Inc", Market::Nasdaq),
    ("JPM", "JPMorgan Chase & Co", Market::Nyse),
    ("XOM", "Exxon Mobil Corp", Market::Nyse),
];

/// Currency-specific rounding rule applied to scalar price fields (§4.H item 12).
pub trait Rounding: Send + Sync {
    fn round_price(&self, value: f64) -> f64;
}

pub struct KrwRounding;
impl Rounding for KrwRounding {
    fn round_price(&self, value: f64) -> f64 {
        value.round()
    }
}

pub struct UsdRounding;
impl Rounding for UsdRounding {
    fn round_price(&self, value: f64) -> f64 {
        (value * 100.0).round() / 100.0
    }
}

#[async_trait::async_trait]
pub trait MarketCapability: Send + Sync {
    /// Default universe when no durable or uploaded listing is available.
    fn packaged_universe(&self) -> Vec<Instrument>;

    /// Structural validity of an identifier before it ever reaches the broker.
    fn validate_id(&self, id: &str) -> bool;

    /// Extra exclusion signal beyond the name-based ETF/ETN check shared by
    /// every market (§4.H item 3); only US carries a hard-coded ticker list.
    fn is_heuristic_etf(&self, id: &str) -> bool;

    fn rounding(&self) -> &dyn Rounding;

    async fn daily_fetch(
        &self,
        broker: &BrokerClient,
        id: &str,
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    ) -> Result<Vec<DailyBar>>;

    async fn recent_fetch(&self, broker: &BrokerClient, id: &str, n: usize) -> Result<Vec<DailyBar>>;

    async fn quote_fetch(&self, broker: &BrokerClient, id: &str) -> Result<Quote>;

    async fn name_fetch(&self, broker: &BrokerClient, id: &str) -> Result<String>;
}

pub struct Kr;

#[async_trait::async_trait]
impl MarketCapability for Kr {
    fn packaged_universe(&self) -> Vec<Instrument> {
        KR_PACKAGED_UNIVERSE
            .iter()
            .map(|(code, name, market)| Instrument {
                code: code.to_string(),
                name: name.to_string(),
                market: *market,
                is_etf: false,
                is_etn: false,
                is_active: true,
            })
            .collect()
    }

    fn validate_id(&self, id: &str) -> bool {
        id.len() == 6 && id.chars().all(|c| c.is_ascii_digit())
    }

    fn is_heuristic_etf(&self, _id: &str) -> bool {
        false
    }

    fn rounding(&self) -> &dyn Rounding {
        &KrwRounding
    }

    async fn daily_fetch(
        &self,
        broker: &BrokerClient,
        id: &str,
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    ) -> Result<Vec<DailyBar>> {
        broker.period_daily(Market::Kospi, id, start, end).await
    }

    async fn recent_fetch(&self, broker: &BrokerClient, id: &str, n: usize) -> Result<Vec<DailyBar>> {
        broker.recent_daily(Market::Kospi, id, n).await
    }

    async fn quote_fetch(&self, broker: &BrokerClient, id: &str) -> Result<Quote> {
        broker.current_quote(Market::Kospi, id).await
    }

    async fn name_fetch(&self, broker: &BrokerClient, id: &str) -> Result<String> {
        broker.lookup_name(id).await
    }
}

pub struct Us {
    pub exchange: Market,
}

#[async_trait::async_trait]
impl MarketCapability for Us {
    fn packaged_universe(&self) -> Vec<Instrument> {
        US_PACKAGED_UNIVERSE
            .iter()
            .map(|(code, name, market)| Instrument {
                code: code.to_string(),
                name: name.to_string(),
                market: *market,
                is_etf: US_ETF_TICKERS.contains(code),
                is_etn: false,
                is_active: true,
            })
            .collect()
    }

    fn validate_id(&self, id: &str) -> bool {
        !id.is_empty() && id.len() <= 6 && id.chars().all(|c| c.is_ascii_alphanumeric())
    }

    fn is_heuristic_etf(&self, id: &str) -> bool {
        US_ETF_TICKERS.contains(&id)
    }

    fn rounding(&self) -> &dyn Rounding {
        &UsdRounding
    }

    async fn daily_fetch(
        &self,
        broker: &BrokerClient,
        id: &str,
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    ) -> Result<Vec<DailyBar>> {
        broker.period_daily(self.exchange, id, start, end).await
    }

    async fn recent_fetch(&self, broker: &BrokerClient, id: &str, n: usize) -> Result<Vec<DailyBar>> {
        broker.recent_daily(self.exchange, id, n).await
    }

    async fn quote_fetch(&self, broker: &BrokerClient, id: &str) -> Result<Quote> {
        broker.current_quote(self.exchange, id).await
    }

    async fn name_fetch(&self, broker: &BrokerClient, id: &str) -> Result<String> {
        broker.lookup_name(id).await
    }
}

pub fn capability_for(market: Market) -> Arc<dyn MarketCapability> {
    match market {
        Market::Kospi | Market::Kosdaq => Arc::new(Kr),
        other => Arc::new(Us { exchange: other }),
    }
}
