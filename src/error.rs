/// Centralized error type for the screener
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScreenerError {
    // Authentication / session
    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    // Network
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    // Broker
    #[error("Broker API error: {code} - {message}")]
    BrokerError { code: String, message: String },

    #[error("Instrument not found: {0}")]
    InstrumentNotFound(String),

    // Store
    #[error("Sqlite error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    #[error("Store failure: {0}")]
    StoreFailure(String),

    #[error("Store has not been initialised")]
    NotInitialised,

    #[error("Store is already initialised; pass force_rebuild to rebuild")]
    AlreadyInitialised,

    // Input / config
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // File I/O
    #[error("File I/O error: {0}")]
    FileError(#[from] std::io::Error),

    #[error("Deserialization failed: {0}")]
    DeserializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ScreenerError>;

impl ScreenerError {
    /// Per-instrument failures that a collector or screening run should
    /// log and skip rather than abort on.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ScreenerError::Transport(_)
                | ScreenerError::HttpError(_)
                | ScreenerError::BrokerError { .. }
                | ScreenerError::InstrumentNotFound(_)
        )
    }

    /// Startup-time errors that should abort the process before it binds.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScreenerError::ConfigError(_))
    }

    /// Stable code for logging/monitoring, grouped by subsystem.
    pub fn error_code(&self) -> &str {
        match self {
            ScreenerError::AuthFailure(_) => "AUTH_001",
            ScreenerError::HttpError(_) => "NET_001",
            ScreenerError::Transport(_) => "NET_002",
            ScreenerError::BrokerError { .. } => "BROKER_001",
            ScreenerError::InstrumentNotFound(_) => "BROKER_002",
            ScreenerError::SqliteError(_) => "STORE_001",
            ScreenerError::StoreFailure(_) => "STORE_002",
            ScreenerError::NotInitialised => "STORE_003",
            ScreenerError::AlreadyInitialised => "STORE_004",
            ScreenerError::InvalidInput(_) => "INPUT_001",
            ScreenerError::ConfigError(_) => "CFG_001",
            ScreenerError::FileError(_) => "FILE_001",
            ScreenerError::DeserializationError(_) => "DATA_001",
        }
    }
}
