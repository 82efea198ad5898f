use std::time::Duration;

use crate::TradingMode;

/// All configuration loaded from environment variables at startup.
/// Missing required variables cause an immediate panic with a clear message.
#[derive(Debug, Clone)]
pub struct Config {
    // Exchange credentials (required in live mode only)
    pub binance_api_key: String,
    pub binance_secret: String,

    // Trading
    pub trading_mode: TradingMode,
    pub paper_slippage_bps: f64,
    pub paper_initial_balance_usd: f64,

    // Persistence: SQLite when set, JSON file otherwise
    pub database_url: Option<String>,
    pub snapshot_path: String,

    // Pipeline config file path
    pub pipeline_config_path: String,

    /// Pause before the single retry of a failed historical-data fetch.
    pub history_retry_delay: Duration,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on any missing required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let trading_mode: TradingMode = optional_env("TRADING_MODE")
            .unwrap_or_else(|| "paper".to_string())
            .parse()
            .unwrap_or_else(|e| panic!("ERROR: {e}"));

        let (binance_api_key, binance_secret) = match trading_mode {
            TradingMode::Live => (required_env("BINANCE_API_KEY"), required_env("BINANCE_SECRET")),
            TradingMode::Paper => (
                optional_env("BINANCE_API_KEY").unwrap_or_default(),
                optional_env("BINANCE_SECRET").unwrap_or_default(),
            ),
        };

        Config {
            binance_api_key,
            binance_secret,
            trading_mode,
            paper_slippage_bps: optional_env("PAPER_SLIPPAGE_BPS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(10.0),
            paper_initial_balance_usd: optional_env("PAPER_INITIAL_BALANCE_USD")
                .and_then(|v| v.parse().ok())
                .unwrap_or(10_000.0),
            database_url: optional_env("DATABASE_URL"),
            snapshot_path: optional_env("SNAPSHOT_PATH")
                .unwrap_or_else(|| "data/snapshot.json".to_string()),
            pipeline_config_path: optional_env("PIPELINE_CONFIG_PATH")
                .unwrap_or_else(|| "config/pipeline.toml".to_string()),
            history_retry_delay: Duration::from_secs(
                optional_env("HISTORY_RETRY_DELAY_SECS")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5),
            ),
        }
    }
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}
