/// Layered configuration loading: defaults -> TOML file -> environment overrides.
use super::Config;
use crate::error::{Result, ScreenerError};
use std::path::Path;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let defaults = Config::default();
    let mut builder = ::config::Config::builder()
        .set_default("port", defaults.port as i64)
        .map_err(cfg_err)?
        .set_default("log_level", defaults.log_level.clone())
        .map_err(cfg_err)?
        .set_default("home", defaults.home.to_string_lossy().to_string())
        .map_err(cfg_err)?
        .set_default("broker_base_url_prod", defaults.broker_base_url_prod.clone())
        .map_err(cfg_err)?
        .set_default(
            "broker_base_url_paper",
            defaults.broker_base_url_paper.clone(),
        )
        .map_err(cfg_err)?
        .set_default("retention_days", defaults.retention_days)
        .map_err(cfg_err)?
        .set_default(
            "screening_lookback_days",
            defaults.screening_lookback_days as i64,
        )
        .map_err(cfg_err)?
        .set_default("master_cache_ttl_days", defaults.master_cache_ttl_days)
        .map_err(cfg_err)?
        .set_default(
            "rate_limit_backfill_per_sec",
            defaults.rate_limit_backfill_per_sec as i64,
        )
        .map_err(cfg_err)?
        .set_default(
            "rate_limit_interactive_per_sec",
            defaults.rate_limit_interactive_per_sec as i64,
        )
        .map_err(cfg_err)?
        .set_default(
            "token_safety_margin_minutes",
            defaults.token_safety_margin_minutes,
        )
        .map_err(cfg_err)?
        .set_default("screening_chunk_size", defaults.screening_chunk_size as i64)
        .map_err(cfg_err)?;

    let path = path.as_ref();
    if path.exists() {
        builder = builder.add_source(::config::File::from(path));
    }

    let config = builder
        .add_source(::config::Environment::with_prefix("STOCKHUNTER").separator("__"))
        .build()
        .map_err(cfg_err)?;

    let config: Config = config.try_deserialize().map_err(cfg_err)?;
    validate_config(&config)?;
    Ok(config)
}

fn cfg_err(e: impl std::fmt::Display) -> ScreenerError {
    ScreenerError::ConfigError(e.to_string())
}

fn validate_config(config: &Config) -> Result<()> {
    if config.rate_limit_backfill_per_sec == 0 || config.rate_limit_interactive_per_sec == 0 {
        return Err(ScreenerError::ConfigError(
            "rate limiter rates must be positive".to_string(),
        ));
    }

    if (config.retention_days as usize) < config.screening_lookback_days {
        return Err(ScreenerError::ConfigError(format!(
            "retention_days ({}) must be >= screening_lookback_days ({})",
            config.retention_days, config.screening_lookback_days
        )));
    }

    for url in [&config.broker_base_url_prod, &config.broker_base_url_paper] {
        reqwest::Url::parse(url)
            .map_err(|e| ScreenerError::ConfigError(format!("invalid broker base url {url}: {e}")))?;
    }

    if config.screening_chunk_size == 0 {
        return Err(ScreenerError::ConfigError(
            "screening_chunk_size must be positive".to_string(),
        ));
    }

    Ok(())
}
