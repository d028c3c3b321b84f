/// Request handlers for the HTTP adapter. Each handler validates its own
/// input, delegates to the core, and lets `AppError` translate the result.
use std::sync::Arc;

use axum::extract::{Multipart, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::error::AppError;
use super::AppState;
use crate::collector::Collector;
use crate::error::ScreenerError;
use crate::market::capability_for;
use crate::screening::{ScreeningCondition, ScreeningEngine, ScreeningResult};
use crate::types::Market;

pub async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    #[serde(rename = "appKey")]
    app_key: String,
    #[serde(rename = "appSecret")]
    app_secret: String,
    #[serde(rename = "isProduction", default)]
    is_production: bool,
}

pub async fn validate_credentials(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CredentialsRequest>,
) -> Result<Json<Value>, AppError> {
    let broker = state.broker_for(
        &req.app_key,
        &req.app_secret,
        req.is_production,
        state.config.rate_limit_interactive_per_sec,
    );
    broker.validate().await.map_err(AppError::credential_failure)?;
    state.remember_active(
        &req.app_key,
        req.is_production,
        state.config.rate_limit_interactive_per_sec,
        broker,
    );
    Ok(Json(json!({ "valid": true })))
}

async fn run_screen(
    state: &AppState,
    mut condition: ScreeningCondition,
    markets: &[Market],
    label: &str,
) -> crate::error::Result<ScreeningResult> {
    if !state.store.has_any_bars()? {
        return Err(ScreenerError::NotInitialised);
    }

    if condition.target_codes.is_empty() {
        let mut codes = Vec::new();
        for market in markets {
            for inst in state.master.by_market(*market)? {
                codes.push(inst.code);
            }
        }
        condition.target_codes = codes;
    }

    let engine = ScreeningEngine::new(
        state.store.clone(),
        state.master.clone(),
        state.active_broker(),
        state.config.screening_chunk_size,
        state.config.screening_lookback_days,
    );
    engine.screen(&condition, label).await
}

pub async fn screen_kr(
    State(state): State<Arc<AppState>>,
    Json(condition): Json<ScreeningCondition>,
) -> Result<Json<ScreeningResult>, AppError> {
    let result = run_screen(&state, condition, &[Market::Kospi, Market::Kosdaq], "kr").await?;
    Ok(Json(result))
}

pub async fn screen_us(
    State(state): State<Arc<AppState>>,
    Json(condition): Json<ScreeningCondition>,
) -> Result<Json<ScreeningResult>, AppError> {
    let result = run_screen(
        &state,
        condition,
        &[Market::Nasdaq, Market::Nyse, Market::Amex],
        "us",
    )
    .await?;
    Ok(Json(result))
}

pub async fn stock_codes(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let codes: Vec<String> = state
        .master
        .by_market(Market::Kospi)?
        .into_iter()
        .chain(state.master.by_market(Market::Kosdaq)?)
        .map(|i| i.code)
        .collect();
    Ok(Json(json!({ "codes": codes })))
}

#[derive(Debug, Deserialize)]
pub struct UsSymbolsQuery {
    exchange: Option<String>,
}

pub async fn us_symbols(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UsSymbolsQuery>,
) -> Result<Json<Value>, AppError> {
    let market = match q.exchange.as_deref() {
        Some("NYS") => Market::Nyse,
        Some("AMS") => Market::Amex,
        _ => Market::Nasdaq,
    };
    let instruments = state.master.by_market(market)?;
    Ok(Json(json!({ "symbols": instruments })))
}

pub async fn database_status(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let stats = state.store.statistics()?;
    Ok(Json(serde_json::to_value(stats).map_err(ScreenerError::from)?))
}

pub async fn database_progress(State(state): State<Arc<AppState>>) -> Json<Value> {
    let snapshot = state.progress.snapshot().await;
    Json(json!({ "progress": snapshot }))
}

#[derive(Debug, Deserialize)]
pub struct InitializeRequest {
    #[serde(rename = "appKey")]
    app_key: String,
    #[serde(rename = "appSecret")]
    app_secret: String,
    #[serde(rename = "isProduction", default)]
    is_production: bool,
    #[serde(rename = "forceRebuild", default)]
    force_rebuild: bool,
}

pub async fn database_initialize(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InitializeRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    if !req.force_rebuild && state.store.has_any_bars()? {
        return Err(ScreenerError::AlreadyInitialised.into());
    }

    let broker = state.broker_for(
        &req.app_key,
        &req.app_secret,
        req.is_production,
        state.config.rate_limit_backfill_per_sec,
    );
    state.remember_active(
        &req.app_key,
        req.is_production,
        state.config.rate_limit_backfill_per_sec,
        broker.clone(),
    );

    let collector = Collector::new(
        broker,
        state.master.clone(),
        state.store.clone(),
        state.progress.clone(),
        state.config.retention_days,
    );
    let force_rebuild = req.force_rebuild;
    tokio::spawn(async move {
        if let Err(e) = collector.full_backfill(force_rebuild).await {
            warn!(error = %e, "full backfill task failed");
        }
    });

    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "started" }))))
}

pub async fn database_update(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let broker = state.active_broker().ok_or_else(|| {
        ScreenerError::AuthFailure("no active broker session; validate credentials first".to_string())
    })?;

    let collector = Collector::new(
        broker,
        state.master.clone(),
        state.store.clone(),
        state.progress.clone(),
        state.config.retention_days,
    );
    tokio::spawn(async move {
        if let Err(e) = collector.incremental_update().await {
            warn!(error = %e, "incremental update task failed");
        }
    });

    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "started" }))))
}

pub async fn sync_stock_names(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let broker = state.active_broker().ok_or_else(|| {
        ScreenerError::AuthFailure("no active broker session; validate credentials first".to_string())
    })?;

    let mut instruments = state.master.all_active()?;
    let mut updated = 0usize;
    for inst in instruments.iter_mut() {
        let capability = capability_for(inst.market);
        match capability.name_fetch(&broker, &inst.code).await {
            Ok(name) if !name.is_empty() && name != inst.name => {
                inst.name = name;
                updated += 1;
            }
            Ok(_) => {}
            Err(e) => warn!(code = %inst.code, error = %e, "name lookup failed, keeping existing name"),
        }
    }

    state.store.refresh_master(&instruments)?;
    info!(updated, "stock name sync complete");
    Ok(Json(json!({ "updated": updated })))
}

#[derive(Debug, Serialize)]
struct UploadSummary {
    filename: String,
    instruments: usize,
}

pub async fn upload_stock_master(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<Value>, AppError> {
    let mut summaries = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ScreenerError::InvalidInput(format!("malformed multipart body: {e}")))?
    {
        let filename = field.file_name().unwrap_or("upload").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ScreenerError::InvalidInput(format!("could not read field: {e}")))?;
        let content = String::from_utf8_lossy(&bytes);

        let instruments = state.master.load_from_upload(&filename, &content)?;
        summaries.push(UploadSummary {
            filename,
            instruments: instruments.len(),
        });
    }

    if summaries.is_empty() {
        return Err(ScreenerError::InvalidInput("no files in upload".to_string()).into());
    }

    Ok(Json(json!({ "files": summaries })))
}
