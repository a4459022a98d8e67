//! Throttled mid-price sampling per symbol.
//!
//! Samples pass a minimum-spacing gate, then absolute/relative change
//! gates; a large relative move additionally pushes the whole recorded
//! window through the notifier. The ring is bounded and flushed to disk at
//! most once per write interval.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::info;

use crate::config::PriceHistoryConfig;
use crate::notify::Notifier;
use crate::persist::{PriceHistoryRecord, SnapshotWriter};

#[derive(Debug)]
pub struct PriceHistory {
    symbol: String,
    config: PriceHistoryConfig,
    notifier: Arc<Notifier>,
    history: VecDeque<(DateTime<Utc>, Decimal)>,
    last_time: Option<DateTime<Utc>>,
    last_price: Option<Decimal>,
    writer: SnapshotWriter,
}

impl PriceHistory {
    pub fn new(
        symbol: impl Into<String>,
        config: PriceHistoryConfig,
        notifier: Arc<Notifier>,
        writer: SnapshotWriter,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            config,
            notifier,
            history: VecDeque::new(),
            last_time: None,
            last_price: None,
            writer,
        }
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn last_sample(&self) -> Option<(DateTime<Utc>, Decimal)> {
        self.last_time.zip(self.last_price)
    }

    /// Record a price observation.
    ///
    /// The first sample is always stored. Later observations are dropped
    /// while closer than `min_time_interval` to the previous recorded
    /// sample; past that, a move of at least `big_change_pct` sends the
    /// full window through the notifier, and the sample is appended when
    /// it clears either change gate.
    pub async fn record(&mut self, now: DateTime<Utc>, price: Option<Decimal>) {
        let Some(price) = price else {
            return;
        };
        let (Some(last_time), Some(last_price)) = (self.last_time, self.last_price) else {
            self.append(now, price);
            return;
        };

        let elapsed = now.signed_duration_since(last_time);
        if elapsed.num_milliseconds() < self.config.min_time_interval.as_millis() as i64 {
            return;
        }

        let abs_change = (price - last_price).abs();
        let pct_change = if last_price.is_zero() {
            Decimal::ZERO
        } else {
            abs_change / last_price
        };

        if pct_change >= self.config.big_change_pct {
            info!(
                symbol = %self.symbol,
                pct_change = %pct_change,
                price = %price,
                "urgent price move, notifying"
            );
            let window: Vec<_> = self.history.iter().copied().collect();
            self.notifier.send(&self.symbol, &window).await;
        }
        if pct_change >= self.config.min_change_pct || abs_change >= self.config.min_change_abs {
            self.append(now, price);
        }
    }

    fn append(&mut self, now: DateTime<Utc>, price: Decimal) {
        self.history.push_back((now, price));
        self.last_time = Some(now);
        self.last_price = Some(price);
        if self.history.len() > self.config.max_size {
            self.history.pop_front();
        }
    }

    /// Clear the recorded window. Called when the owning book is replaced
    /// by a fresh snapshot; the disk writer and its gate carry over.
    pub fn reset(&mut self) {
        self.history.clear();
        self.last_time = None;
        self.last_price = None;
    }

    /// Flush the current window to disk at most once per write interval.
    pub fn flush_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.history.is_empty() {
            return false;
        }
        let record = || PriceHistoryRecord {
            timestamp: now,
            product_id: self.symbol.clone(),
            times: self.history.iter().map(|(time, _)| *time).collect(),
            prices: self
                .history
                .iter()
                .map(|(_, price)| price.to_f64().unwrap_or(0.0))
                .collect(),
            last_price: self.last_price.and_then(|price| price.to_f64()),
            last_time: self.last_time,
        };
        self.writer.maybe_write(now, record)
    }
}
