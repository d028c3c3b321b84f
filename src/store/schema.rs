/// Sqlite schema for the embedded price store.
pub const SCHEMA_SQL: &str = "
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS stock_master (
    code        TEXT NOT NULL,
    market      TEXT NOT NULL,
    name        TEXT NOT NULL,
    is_active   INTEGER NOT NULL DEFAULT 1,
    updated_at  TEXT NOT NULL,
    PRIMARY KEY (code)
);

CREATE TABLE IF NOT EXISTS daily_prices (
    instrument  TEXT NOT NULL,
    trade_date  TEXT NOT NULL,
    open        REAL NOT NULL,
    high        REAL NOT NULL,
    low         REAL NOT NULL,
    close       REAL NOT NULL,
    volume      INTEGER NOT NULL,
    inserted_at TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    PRIMARY KEY (instrument, trade_date)
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_daily_prices_instrument_date
    ON daily_prices (instrument, trade_date DESC);

CREATE INDEX IF NOT EXISTS idx_daily_prices_date
    ON daily_prices (trade_date DESC);

CREATE TABLE IF NOT EXISTS db_metadata (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    updated_at TEXT NOT NULL
) WITHOUT ROWID;
";
