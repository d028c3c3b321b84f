/// Thin HTTP adapter: wires core components behind a small route table.
/// Request/response contracts only; no business policy lives here. Router
/// and middleware stack grounded on a service that builds its axum app the
/// same way — public routes, a shared `AppState`, CORS, trace, catch-panic.
pub mod error;
pub mod routes;

use std::collections::HashMap;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use parking_lot::RwLock;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::broker::BrokerClient;
use crate::collector::ProgressHandle;
use crate::config::Config;
use crate::ratelimit::RateLimiter;
use crate::session::{hash_app_key, SessionManager};
use crate::store::{InstrumentMasterCache, PriceStore};

/// Identifies one (environment, app key) broker session within the registry.
fn registry_key(app_key: &str, is_production: bool) -> String {
    format!("{}:{}", if is_production { "prod" } else { "paper" }, hash_app_key(app_key))
}

/// Shared application state. `brokers` is a registry rather than a single
/// client because credentials arrive per-request (`/validate-credentials`,
/// `/database/initialize`), not from startup configuration.
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<PriceStore>,
    pub master: Arc<InstrumentMasterCache>,
    pub progress: ProgressHandle,
    brokers: RwLock<HashMap<String, Arc<BrokerClient>>>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        store: Arc<PriceStore>,
        master: Arc<InstrumentMasterCache>,
        progress: ProgressHandle,
    ) -> Self {
        AppState {
            config,
            store,
            master,
            progress,
            brokers: RwLock::new(HashMap::new()),
        }
    }

    /// Builds a broker client for `(app_key, is_production)` at the given
    /// rate. Never cached here — callers only register a client via
    /// `remember_active` once its credentials have actually been proven to
    /// work, so a failed `/validate-credentials` never leaks into
    /// `active_broker()`. Two clients for the same identity still share one
    /// on-disk token cache via `SessionManager`'s file path, so minting
    /// happens at most once regardless of which one asks first.
    pub fn broker_for(&self, app_key: &str, app_secret: &str, is_production: bool, rate: u32) -> Arc<BrokerClient> {
        let env = if is_production { "prod" } else { "paper" };
        let hash = hash_app_key(app_key);
        let session = SessionManager::new(
            self.config.token_path(env, &hash),
            self.config.token_safety_margin_minutes,
        );
        let limiter = Arc::new(RateLimiter::new(rate));
        let client = Arc::new(BrokerClient::new(
            self.config.broker_base_url(is_production).to_string(),
            app_key.to_string(),
            app_secret.to_string(),
            session,
            limiter,
        ));

        client
    }

    /// The most recently validated interactive broker, if any. Screening
    /// endpoints use this to fetch fundamentals; if none is set yet, gates
    /// that require it simply exclude (see `ScreeningEngine`).
    pub fn active_broker(&self) -> Option<Arc<BrokerClient>> {
        self.brokers.read().values().next().cloned()
    }

    pub fn remember_active(&self, app_key: &str, is_production: bool, rate: u32, client: Arc<BrokerClient>) {
        let key = format!("{}:{}", registry_key(app_key, is_production), rate);
        self.brokers.write().insert(key, client);
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/api/v1/screen", post(routes::screen_kr))
        .route("/api/v1/us/screen", post(routes::screen_us))
        .route("/api/v1/validate-credentials", post(routes::validate_credentials))
        .route("/api/v1/stock-codes", get(routes::stock_codes))
        .route("/api/v1/us/symbols", get(routes::us_symbols))
        .route("/api/v1/database/status", get(routes::database_status))
        .route("/api/v1/database/progress", get(routes::database_progress))
        .route("/api/v1/database/initialize", post(routes::database_initialize))
        .route("/api/v1/database/update", post(routes::database_update))
        .route("/api/v1/database/sync-stock-names", post(routes::sync_stock_names))
        .route("/api/v1/database/upload-stock-master", post(routes::upload_stock_master))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_state() -> Arc<AppState> {
        state_with_config(Config::default())
    }

    fn state_with_config(config: Config) -> Arc<AppState> {
        let config = Arc::new(config);
        let store = Arc::new(PriceStore::open_in_memory().unwrap());
        let master = Arc::new(InstrumentMasterCache::new(store.clone(), config.master_cache_ttl_days));
        Arc::new(AppState::new(config, store, master, ProgressHandle::new()))
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let app = build_router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn screen_against_empty_store_is_rejected() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/screen")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn database_update_without_credentials_is_rejected() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/database/update")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        // AuthFailure outside credential validation means the caller skipped
        // validation, not that credentials were rejected, so this is a 400.
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn invalid_credentials_are_rejected_with_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/tokenP"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let mut config = Config::default();
        config.broker_base_url_paper = server.uri();
        let app = build_router(state_with_config(config));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/validate-credentials")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"appKey":"bad","appSecret":"bad","isProduction":false}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
