//! Engine configuration.
//!
//! Everything the workers need is carried explicitly; there is no
//! process-wide mutable state. Defaults mirror the production deployment:
//! level2 channel, batches of 20 symbols per socket, five reconnect
//! attempts on a 5 s base delay capped at 60 s, 30 s heartbeats with a
//! 10 s pong deadline, snapshots flushed at most once a minute.

pub mod credentials;

pub use credentials::{NotifierCredentials, Secret};

use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use crate::orderbook::alerts::AlertThresholds;

/// Default duplex endpoint for the level2 channel.
pub const DEFAULT_WS_URL: &str = "wss://advanced-trade-ws.coinbase.com";

/// Transport/session settings for one stream client.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub ws_url: String,
    pub channel: String,
    pub reconnect_attempts: u32,
    /// Base delay; attempt n sleeps `delay * 2^(n-1)`, capped at 60 s.
    pub reconnect_delay: Duration,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ws_url: std::env::var("DEPTHWATCH_WS_URL")
                .unwrap_or_else(|_| DEFAULT_WS_URL.to_string()),
            channel: "level2".to_string(),
            reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(5),
            ping_interval: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(10),
        }
    }
}

/// Full engine configuration handed to the supervisor.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// All symbols to track, before batching.
    pub symbols: Vec<String>,
    /// Symbols persisted in Full mode with tightened price tracking.
    pub special: HashSet<String>,
    /// Root of the on-disk output tree.
    pub out_dir: PathBuf,
    pub stream: StreamConfig,
    /// Maximum symbols per WebSocket connection.
    pub max_per_ws: usize,
    /// Depth used for periodic statistics and alert volume sums.
    pub depth_levels: usize,
    /// Interval between persisted book snapshots.
    pub write_interval: Duration,
    /// Per-symbol alert threshold overrides; `default_thresholds`
    /// otherwise.
    pub alert_overrides: HashMap<String, AlertThresholds>,
    pub default_thresholds: AlertThresholds,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            special: HashSet::new(),
            out_dir: PathBuf::from("./data"),
            stream: StreamConfig::default(),
            max_per_ws: 20,
            depth_levels: 10,
            write_interval: Duration::from_secs(60),
            alert_overrides: HashMap::new(),
            default_thresholds: AlertThresholds::default(),
        }
    }
}

impl EngineConfig {
    /// Alert thresholds for one symbol, falling back to the defaults.
    pub fn thresholds_for(&self, symbol: &str) -> AlertThresholds {
        self.alert_overrides
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| self.default_thresholds.clone())
    }

    pub fn is_special(&self, symbol: &str) -> bool {
        self.special.contains(symbol)
    }
}

/// Sampling gates for one symbol's price history.
#[derive(Debug, Clone)]
pub struct PriceHistoryConfig {
    /// Append when the relative move reaches this fraction.
    pub min_change_pct: Decimal,
    /// Send an urgent notification at or above this relative move.
    pub big_change_pct: Decimal,
    /// Append when the absolute move reaches this amount.
    pub min_change_abs: Decimal,
    /// Minimum spacing between recorded samples.
    pub min_time_interval: Duration,
    /// Minimum spacing between history flushes to disk.
    pub write_interval: Duration,
    /// Ring capacity; the oldest entry is evicted beyond this.
    pub max_size: usize,
}

impl Default for PriceHistoryConfig {
    fn default() -> Self {
        Self {
            min_change_pct: Decimal::new(1, 3), // 0.1%
            big_change_pct: Decimal::new(5, 2), // 5%
            min_change_abs: Decimal::ZERO,
            min_time_interval: Duration::from_secs(5),
            write_interval: Duration::from_secs(30),
            max_size: 100,
        }
    }
}

impl PriceHistoryConfig {
    /// Tightened gates for closely-watched symbols: finer change
    /// thresholds, faster sampling, a much deeper ring.
    pub fn special() -> Self {
        Self {
            min_change_pct: Decimal::new(5, 3), // 0.5%
            min_change_abs: Decimal::new(1, 2), // 0.01
            min_time_interval: Duration::from_secs(2),
            max_size: 15_000,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn threshold_overrides_fall_back_to_default() {
        let mut config = EngineConfig::default();
        config.alert_overrides.insert(
            "BTC-USD".to_string(),
            AlertThresholds {
                spread: dec!(25),
                ..AlertThresholds::default()
            },
        );
        assert_eq!(config.thresholds_for("BTC-USD").spread, dec!(25));
        assert_eq!(config.thresholds_for("ETH-USD").spread, dec!(5));
    }

    #[test]
    fn special_history_gates_are_tighter() {
        let default = PriceHistoryConfig::default();
        let special = PriceHistoryConfig::special();
        assert!(special.min_time_interval < default.min_time_interval);
        assert!(special.max_size > default.max_size);
        assert_eq!(special.big_change_pct, default.big_change_pct);
    }
}
