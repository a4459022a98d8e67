//! Stateful detectors over successive book states.
//!
//! The engine observes a book by read-only borrow and keeps only its own
//! rolling state: the previous statistics record, the previous top-D
//! levels per side, and a bounded mid-price ring for volatility.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::VecDeque;

use crate::orderbook::book::{OrderedBook, Side};
use crate::orderbook::stats::{self, Statistics};

/// Mid-price samples kept for the volatility window.
const VOLATILITY_WINDOW: usize = 20;
/// Minimum samples before the volatility detector arms.
const MIN_VOLATILITY_SAMPLES: usize = 10;
/// A tracked level "evaporates" when it falls below this fraction of its
/// previous size.
const EVAPORATION_RATIO: Decimal = Decimal::from_parts(5, 0, 0, false, 1);
const STRONG_BUY_IMBALANCE: Decimal = Decimal::from_parts(9, 0, 0, false, 1);
const STRONG_SELL_IMBALANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    WallEvaporated,
    StrongBuyImbalance,
    StrongSellImbalance,
    SpreadWide,
    VolatilitySpike,
}

/// One fired alert with its kind-specific payload.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// Per-symbol detection thresholds, injected from configuration.
#[derive(Debug, Clone)]
pub struct AlertThresholds {
    /// Levels per side considered by the volume and evaporation detectors.
    pub depth_levels: usize,
    /// Fire `SpreadWide` above this absolute spread.
    pub spread: Decimal,
    /// Fire `VolatilitySpike` above this mid-price standard deviation.
    pub volatility: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            depth_levels: 10,
            spread: Decimal::from(5),
            volatility: 10.0,
        }
    }
}

#[derive(Debug)]
pub struct AlertEngine {
    symbol: String,
    thresholds: AlertThresholds,
    previous_stats: Option<Statistics>,
    previous_bids: Vec<(Decimal, Decimal)>,
    previous_asks: Vec<(Decimal, Decimal)>,
    mid_history: VecDeque<f64>,
}

impl AlertEngine {
    pub fn new(symbol: impl Into<String>, thresholds: AlertThresholds) -> Self {
        Self {
            symbol: symbol.into(),
            thresholds,
            previous_stats: None,
            previous_bids: Vec::new(),
            previous_asks: Vec::new(),
            mid_history: VecDeque::with_capacity(VOLATILITY_WINDOW),
        }
    }

    /// Run all detectors against the current book, then rotate internal
    /// state. Returns the alerts fired by this transition, in detector
    /// order.
    pub fn update(&mut self, book: &OrderedBook, timestamp: DateTime<Utc>) -> Vec<Alert> {
        let stats = stats::compute(&self.symbol, book, timestamp, self.thresholds.depth_levels);

        if let Some(mid) = stats.mid_price.and_then(|mid| mid.to_f64()) {
            if self.mid_history.len() == VOLATILITY_WINDOW {
                self.mid_history.pop_front();
            }
            self.mid_history.push_back(mid);
        }

        let mut alerts = Vec::new();
        self.check_wall_evaporation(book, &stats, &mut alerts);
        self.check_imbalance(&stats, &mut alerts);
        self.check_spread(&stats, &mut alerts);
        self.check_volatility(&stats, &mut alerts);

        self.previous_bids = book.top_n(Side::Bid, self.thresholds.depth_levels);
        self.previous_asks = book.top_n(Side::Ask, self.thresholds.depth_levels);
        self.previous_stats = Some(stats);
        alerts
    }

    pub fn previous_stats(&self) -> Option<&Statistics> {
        self.previous_stats.as_ref()
    }

    fn check_wall_evaporation(
        &self,
        book: &OrderedBook,
        stats: &Statistics,
        alerts: &mut Vec<Alert>,
    ) {
        if self.previous_bids.is_empty() && self.previous_asks.is_empty() {
            return;
        }
        for (side, previous) in [
            (Side::Bid, &self.previous_bids),
            (Side::Ask, &self.previous_asks),
        ] {
            for &(price, prev_size) in previous {
                if prev_size <= Decimal::ZERO {
                    continue;
                }
                let curr_size = book.level_size(side, price).unwrap_or(Decimal::ZERO);
                if curr_size < prev_size * EVAPORATION_RATIO {
                    alerts.push(Alert {
                        kind: AlertKind::WallEvaporated,
                        symbol: self.symbol.clone(),
                        timestamp: stats.timestamp,
                        payload: serde_json::json!({
                            "side": side.as_str(),
                            "price": price,
                            "previous_size": prev_size,
                            "current_size": curr_size,
                        }),
                    });
                }
            }
        }
    }

    fn check_imbalance(&self, stats: &Statistics, alerts: &mut Vec<Alert>) {
        let Some(imbalance) = stats.imbalance else {
            return;
        };
        let kind = if imbalance > STRONG_BUY_IMBALANCE {
            AlertKind::StrongBuyImbalance
        } else if imbalance < STRONG_SELL_IMBALANCE {
            AlertKind::StrongSellImbalance
        } else {
            return;
        };
        alerts.push(Alert {
            kind,
            symbol: self.symbol.clone(),
            timestamp: stats.timestamp,
            payload: serde_json::json!({
                "imbalance": imbalance,
                "depth_levels": stats.depth_levels,
            }),
        });
    }

    fn check_spread(&self, stats: &Statistics, alerts: &mut Vec<Alert>) {
        let Some(spread) = stats.spread else {
            return;
        };
        if spread > self.thresholds.spread {
            alerts.push(Alert {
                kind: AlertKind::SpreadWide,
                symbol: self.symbol.clone(),
                timestamp: stats.timestamp,
                payload: serde_json::json!({
                    "spread": spread,
                    "threshold": self.thresholds.spread,
                }),
            });
        }
    }

    fn check_volatility(&self, stats: &Statistics, alerts: &mut Vec<Alert>) {
        if self.mid_history.len() < MIN_VOLATILITY_SAMPLES {
            return;
        }
        let n = self.mid_history.len() as f64;
        let mean = self.mid_history.iter().sum::<f64>() / n;
        let variance = self
            .mid_history
            .iter()
            .map(|mid| (mid - mean).powi(2))
            .sum::<f64>()
            / n;
        let std_dev = variance.sqrt();
        if std_dev > self.thresholds.volatility {
            alerts.push(Alert {
                kind: AlertKind::VolatilitySpike,
                symbol: self.symbol.clone(),
                timestamp: stats.timestamp,
                payload: serde_json::json!({
                    "std_dev": std_dev,
                    "samples": self.mid_history.len(),
                }),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn balanced_book() -> OrderedBook {
        let mut book = OrderedBook::new();
        book.apply(Side::Bid, dec!(100), dec!(5));
        book.apply(Side::Ask, dec!(101), dec!(5));
        book
    }

    fn engine() -> AlertEngine {
        AlertEngine::new("BTC-USD", AlertThresholds::default())
    }

    #[test]
    fn imbalance_fires_above_point_nine() {
        let mut engine = engine();
        let mut book = OrderedBook::new();
        book.apply(Side::Bid, dec!(100), dec!(91));
        book.apply(Side::Ask, dec!(101), dec!(9));

        let alerts = engine.update(&book, Utc::now());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::StrongBuyImbalance);

        // Level-triggered: refires while the condition keeps holding.
        let alerts = engine.update(&book, Utc::now());
        assert_eq!(alerts[0].kind, AlertKind::StrongBuyImbalance);
    }

    #[test]
    fn sell_imbalance_fires_below_point_one() {
        let mut engine = engine();
        let mut book = OrderedBook::new();
        book.apply(Side::Bid, dec!(100), dec!(5));
        book.apply(Side::Ask, dec!(101), dec!(95));
        let alerts = engine.update(&book, Utc::now());
        assert_eq!(alerts[0].kind, AlertKind::StrongSellImbalance);
    }

    #[test]
    fn wall_evaporation_fires_on_half_loss_only() {
        let mut engine = engine();
        let mut book = OrderedBook::new();
        book.apply(Side::Bid, dec!(100), dec!(10));
        book.apply(Side::Ask, dec!(101), dec!(10));
        assert!(engine.update(&book, Utc::now()).is_empty());

        // 10 -> 6 stays above half: no alert.
        book.apply(Side::Bid, dec!(100), dec!(6));
        assert!(engine.update(&book, Utc::now()).is_empty());

        // 6 -> 2 falls below half of 6.
        book.apply(Side::Bid, dec!(100), dec!(2));
        let alerts = engine.update(&book, Utc::now());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::WallEvaporated);
        assert_eq!(alerts[0].payload["side"], "bid");
        assert_eq!(alerts[0].payload["previous_size"], "6");
        assert_eq!(alerts[0].payload["current_size"], "2");
    }

    #[test]
    fn removed_level_counts_as_evaporated() {
        let mut engine = engine();
        let mut book = balanced_book();
        engine.update(&book, Utc::now());
        book.apply(Side::Ask, dec!(101), dec!(0));
        book.apply(Side::Ask, dec!(102), dec!(5));
        let alerts = engine.update(&book, Utc::now());
        assert!(alerts
            .iter()
            .any(|alert| alert.kind == AlertKind::WallEvaporated
                && alert.payload["side"] == "ask"));
    }

    #[test]
    fn spread_alert_uses_injected_threshold() {
        let thresholds = AlertThresholds {
            spread: dec!(0.5),
            ..AlertThresholds::default()
        };
        let mut engine = AlertEngine::new("BTC-USD", thresholds);
        let book = balanced_book();
        let alerts = engine.update(&book, Utc::now());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::SpreadWide);
    }

    #[test]
    fn volatility_needs_ten_samples_then_fires_on_swings() {
        let thresholds = AlertThresholds {
            volatility: 1.0,
            ..AlertThresholds::default()
        };
        let mut engine = AlertEngine::new("BTC-USD", thresholds);

        for i in 0..12 {
            let mut book = OrderedBook::new();
            // Alternate mids between 95.5 and 105.5.
            let bid = if i % 2 == 0 { dec!(95) } else { dec!(105) };
            book.apply(Side::Bid, bid, dec!(5));
            book.apply(Side::Ask, bid + dec!(1), dec!(5));
            let alerts = engine.update(&book, Utc::now());
            let fired = alerts
                .iter()
                .any(|alert| alert.kind == AlertKind::VolatilitySpike);
            if i < MIN_VOLATILITY_SAMPLES - 1 {
                assert!(!fired, "armed too early at sample {i}");
            } else {
                assert!(fired, "expected spike once armed at sample {i}");
            }
        }
    }

    #[test]
    fn quiet_book_stays_silent() {
        let mut engine = engine();
        let book = balanced_book();
        for _ in 0..25 {
            assert!(engine.update(&book, Utc::now()).is_empty());
        }
    }
}
