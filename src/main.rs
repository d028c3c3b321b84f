/// Entry point for the screener service.
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use stockhunter::collector::ProgressHandle;
use stockhunter::config::load_config;
use stockhunter::error::Result;
use stockhunter::http::{build_router, AppState};
use stockhunter::market::capability_for;
use stockhunter::store::{InstrumentMasterCache, PriceStore};
use stockhunter::types::Market;

const ALL_MARKETS: [Market; 5] = [
    Market::Kospi,
    Market::Kosdaq,
    Market::Nasdaq,
    Market::Nyse,
    Market::Amex,
];

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::var("STOCKHUNTER_CONFIG").unwrap_or_else(|_| "stockhunter.toml".to_string());
    let config = Arc::new(load_config(&config_path)?);

    tracing_subscriber::fmt()
        .with_env_filter(format!("stockhunter={0},tower_http={0}", config.log_level))
        .init();

    info!(home = %config.home.display(), "starting stockhunter");

    let store = Arc::new(PriceStore::open(config.price_db_path())?);
    let master = Arc::new(InstrumentMasterCache::new(store.clone(), config.master_cache_ttl_days));

    let capabilities: Vec<_> = ALL_MARKETS.iter().map(|m| capability_for(*m)).collect();
    if let Err(e) = master.ensure_fresh(&capabilities) {
        warn!(error = %e, "instrument master refresh failed at startup, continuing with whatever is on disk");
    }

    let state = Arc::new(AppState::new(config.clone(), store, master, ProgressHandle::new()));
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr, "listening");

    axum::serve(listener, app).await?;
    Ok(())
}
