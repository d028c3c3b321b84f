/// Orchestrates full backfill and incremental update by composing the
/// broker client, instrument master cache and price store. Structurally
/// descended from a coordinator that composed the same three roles to
/// produce a step-by-step sync report; the per-instrument domain logic
/// here is entirely new.
pub mod progress;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::broker::BrokerClient;
use crate::error::{Result, ScreenerError};
use crate::market::capability_for;
use crate::store::{InstrumentMasterCache, PriceStore};
use crate::types::{DailyBar, Progress};

pub use progress::ProgressHandle;

const BACKFILL_WINDOW_DAYS: i64 = 100;
const BACKFILL_WINDOWS: i64 = 6;

pub struct Collector {
    broker: Arc<BrokerClient>,
    master: Arc<InstrumentMasterCache>,
    store: Arc<PriceStore>,
    progress: ProgressHandle,
    retention_days: i64,
}

impl Collector {
    pub fn new(
        broker: Arc<BrokerClient>,
        master: Arc<InstrumentMasterCache>,
        store: Arc<PriceStore>,
        progress: ProgressHandle,
        retention_days: i64,
    ) -> Self {
        Collector {
            broker,
            master,
            store,
            progress,
            retention_days,
        }
    }

    pub fn progress_handle(&self) -> ProgressHandle {
        self.progress.clone()
    }

    /// Builds the store from scratch. Returns `AlreadyInitialised` unless
    /// `force_rebuild` is set and the store already holds bars.
    pub async fn full_backfill(&self, force_rebuild: bool) -> Result<()> {
        if !force_rebuild && self.store.has_any_bars()? {
            return Err(ScreenerError::AlreadyInitialised);
        }

        let universe = self.master.all_active()?;
        self.progress.start("full_backfill", universe.len()).await;

        let today = chrono::Utc::now().date_naive();

        for inst in &universe {
            if !force_rebuild {
                if let Ok(Some(_)) = self.store.latest_date(&inst.code) {
                    self.progress.advance(Some(inst.code.clone())).await;
                    continue;
                }
            }

            let capability = capability_for(inst.market);
            let mut collected: HashMap<NaiveDate, DailyBar> = HashMap::new();
            let mut first_batch_failed = false;

            for window in 0..BACKFILL_WINDOWS {
                let end = today - chrono::Duration::days(window * BACKFILL_WINDOW_DAYS);
                let start = end - chrono::Duration::days(BACKFILL_WINDOW_DAYS - 1);

                match capability.daily_fetch(&self.broker, &inst.code, start, end).await {
                    Ok(bars) => {
                        for bar in bars {
                            collected.insert(bar.trade_date, bar);
                        }
                    }
                    Err(e) => {
                        warn!(code = %inst.code, window, error = %e, "backfill window failed");
                        if window == 0 {
                            first_batch_failed = true;
                            self.progress
                                .record_failure(format!("{}: {}", inst.code, e))
                                .await;
                            break;
                        }
                        // batches 2..6 failing: persist whatever we already have
                        break;
                    }
                }
            }

            if !first_batch_failed && !collected.is_empty() {
                let mut bars: Vec<DailyBar> = collected.into_values().collect();
                bars.sort_by_key(|b| b.trade_date);
                self.store.upsert_batch(&inst.code, &bars)?;
            } else if !first_batch_failed {
                warn!(code = %inst.code, "no bars returned across all backfill windows");
            }

            self.progress.advance(Some(inst.code.clone())).await;
        }

        self.store.prune_older_than(self.retention_days)?;
        self.store
            .set_meta("last_full_init", &today.to_string())?;
        self.progress.finish().await;
        info!("full backfill complete");
        Ok(())
    }

    /// Gap-fills every instrument already present in the store. No
    /// retention prune runs here (§3 invariant).
    pub async fn incremental_update(&self) -> Result<()> {
        let known = self.store.all_instruments_with_bars()?;
        let active = self.master.all_active()?;
        let by_code: HashMap<&str, _> = active.iter().map(|i| (i.code.as_str(), i)).collect();

        let targets: Vec<_> = known
            .iter()
            .filter_map(|code| by_code.get(code.as_str()).map(|inst| (*inst).clone()))
            .collect();

        self.progress.start("incremental_update", targets.len()).await;
        let today = chrono::Utc::now().date_naive();

        for inst in &targets {
            let capability = capability_for(inst.market);
            let latest = self.store.latest_date(&inst.code)?;

            let n = match latest {
                None => 1,
                Some(latest) => {
                    let days_missing = (today - latest).num_days();
                    (days_missing + 1).clamp(1, 100) as usize
                }
            };

            match capability.recent_fetch(&self.broker, &inst.code, n).await {
                Ok(bars) => {
                    let fresh: Vec<DailyBar> = bars
                        .into_iter()
                        .filter(|b| match latest {
                            Some(l) => b.trade_date > l,
                            None => true,
                        })
                        .collect();
                    if !fresh.is_empty() {
                        self.store.upsert_batch(&inst.code, &fresh)?;
                    }
                }
                Err(e) => {
                    warn!(code = %inst.code, error = %e, "incremental update failed for instrument");
                    self.progress
                        .record_failure(format!("{}: {}", inst.code, e))
                        .await;
                }
            }

            self.progress.advance(Some(inst.code.clone())).await;
        }

        self.store
            .set_meta("last_daily_update", &today.to_string())?;
        self.progress.finish().await;
        info!("incremental update complete");
        Ok(())
    }
}

pub type CollectorProgress = Progress;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionManager;
    use crate::store::InstrumentMasterCache;
    use crate::types::Instrument;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn broker_against(server: &MockServer) -> Arc<BrokerClient> {
        let tmp = tempfile::tempdir().unwrap();
        Mock::given(method("POST"))
            .and(path("/oauth2/tokenP"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok",
                "token_type": "Bearer",
                "expires_in": 86400,
            })))
            .mount(server)
            .await;

        let session = SessionManager::new(tmp.path().join("token.json"), 5);
        Arc::new(BrokerClient::new(
            server.uri(),
            "app-key".to_string(),
            "app-secret".to_string(),
            session,
            Arc::new(crate::ratelimit::RateLimiter::new(50)),
        ))
    }

    fn seeded_master(store: Arc<PriceStore>) -> Arc<InstrumentMasterCache> {
        store
            .refresh_master(&[Instrument {
                code: "005930".to_string(),
                name: "Samsung Electronics".to_string(),
                market: crate::types::Market::Kospi,
                is_etf: false,
                is_etn: false,
                is_active: true,
            }])
            .unwrap();
        Arc::new(InstrumentMasterCache::new(store, 7))
    }

    #[tokio::test]
    async fn second_backfill_without_force_rebuild_is_rejected_without_calling_broker() {
        let server = MockServer::start().await;
        let store = Arc::new(PriceStore::open_in_memory().unwrap());
        let master = seeded_master(store.clone());
        let broker = broker_against(&server).await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        store
            .upsert_batch(
                "005930",
                &[DailyBar {
                    trade_date: chrono::Utc::now().date_naive(),
                    open: 100.0,
                    high: 100.0,
                    low: 100.0,
                    close: 100.0,
                    volume: 10,
                }],
            )
            .unwrap();

        let collector = Collector::new(broker, master, store, ProgressHandle::new(), 400);
        let err = collector.full_backfill(false).await.unwrap_err();
        assert!(matches!(err, ScreenerError::AlreadyInitialised));
    }

    #[tokio::test]
    async fn incremental_update_requests_exactly_the_missing_window() {
        let server = MockServer::start().await;
        let store = Arc::new(PriceStore::open_in_memory().unwrap());
        let master = seeded_master(store.clone());
        let broker = broker_against(&server).await;

        let today = chrono::Utc::now().date_naive();
        let ten_days_ago = today - chrono::Duration::days(10);
        store
            .upsert_batch(
                "005930",
                &[DailyBar {
                    trade_date: ten_days_ago,
                    open: 100.0,
                    high: 100.0,
                    low: 100.0,
                    close: 100.0,
                    volume: 10,
                }],
            )
            .unwrap();

        Mock::given(method("GET"))
            .and(path("/uapi/domestic-stock/v1/quotations/inquire-daily-price"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "rt_cd": "0",
                "msg1": "ok",
                "output": [{
                    "stck_bsop_date": today.format("%Y%m%d").to_string(),
                    "stck_oprc": "100",
                    "stck_hgpr": "105",
                    "stck_lwpr": "95",
                    "stck_clpr": "101",
                    "acml_vol": "500",
                }]
            })))
            .mount(&server)
            .await;

        let collector = Collector::new(broker, master, store.clone(), ProgressHandle::new(), 400);
        collector.incremental_update().await.unwrap();

        assert_eq!(store.latest_date("005930").unwrap(), Some(today));
        assert_eq!(store.bars("005930", 10).unwrap().len(), 2);
    }
}
