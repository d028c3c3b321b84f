/// Typed, layered configuration for the screener service.
pub mod loader;

use serde::Deserialize;
use std::path::PathBuf;

pub use loader::load_config;

/// Resolved configuration for one process lifetime. Immutable once loaded.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // HTTP
    pub port: u16,

    // Logging
    pub log_level: String,

    // Persisted state
    pub home: PathBuf,

    // Broker
    pub broker_base_url_prod: String,
    pub broker_base_url_paper: String,

    // Store
    pub retention_days: i64,
    pub screening_lookback_days: usize,
    pub master_cache_ttl_days: i64,

    // Rate limiting
    pub rate_limit_backfill_per_sec: u32,
    pub rate_limit_interactive_per_sec: u32,

    // Session
    pub token_safety_margin_minutes: i64,

    // Screening
    pub screening_chunk_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 3000,
            log_level: "info".to_string(),
            home: default_home(),
            broker_base_url_prod: "https://openapi.koreainvestment.com:9443".to_string(),
            broker_base_url_paper: "https://openapivts.koreainvestment.com:29443".to_string(),
            retention_days: 400,
            screening_lookback_days: 280,
            master_cache_ttl_days: 7,
            rate_limit_backfill_per_sec: 15,
            rate_limit_interactive_per_sec: 20,
            token_safety_margin_minutes: 5,
            screening_chunk_size: 100,
        }
    }
}

fn default_home() -> PathBuf {
    dirs_home().join(".stockhunter")
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

impl Config {
    pub fn broker_base_url(&self, is_production: bool) -> &str {
        if is_production {
            &self.broker_base_url_prod
        } else {
            &self.broker_base_url_paper
        }
    }

    pub fn price_db_path(&self) -> PathBuf {
        self.home.join("price_data.db")
    }

    pub fn token_path(&self, environment: &str, app_key_hash: &str) -> PathBuf {
        self.home
            .join(format!("token_{environment}_{app_key_hash}.json"))
    }
}
