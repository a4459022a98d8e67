//! Pure statistics over a book.
//!
//! Every summation here is decimal arithmetic; conversion to binary floats
//! is reserved for display layers so identical books always produce
//! identical records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::orderbook::book::{OrderedBook, Side};

/// Snapshot-in-time microstructure record for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub best_bid: Option<Decimal>,
    pub best_bid_size: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub best_ask_size: Option<Decimal>,
    pub spread: Option<Decimal>,
    pub mid_price: Option<Decimal>,
    /// Depth used for the volume aggregates below.
    pub depth_levels: usize,
    /// `bid_volume / (bid_volume + ask_volume)`; `None` when both sides
    /// are empty over the window.
    pub imbalance: Option<Decimal>,
    pub bid_volume: Decimal,
    pub ask_volume: Decimal,
}

/// Compute the statistics record over the top `depth_levels` of each side.
pub fn compute(
    symbol: &str,
    book: &OrderedBook,
    timestamp: DateTime<Utc>,
    depth_levels: usize,
) -> Statistics {
    let best_bid = book.best(Side::Bid);
    let best_ask = book.best(Side::Ask);

    let spread = match (best_bid, best_ask) {
        (Some((bid, _)), Some((ask, _))) => Some(ask - bid),
        _ => None,
    };
    let mid_price = match (best_bid, best_ask) {
        (Some((bid, _)), Some((ask, _))) => Some((bid + ask) / Decimal::TWO),
        _ => None,
    };

    let bid_volume = book.sum_volume(Side::Bid, depth_levels);
    let ask_volume = book.sum_volume(Side::Ask, depth_levels);
    let total = bid_volume + ask_volume;
    let imbalance = if total > Decimal::ZERO {
        Some(bid_volume / total)
    } else {
        None
    };

    Statistics {
        timestamp,
        symbol: symbol.to_string(),
        best_bid: best_bid.map(|(price, _)| price),
        best_bid_size: best_bid.map(|(_, size)| size),
        best_ask: best_ask.map(|(price, _)| price),
        best_ask_size: best_ask.map(|(_, size)| size),
        spread,
        mid_price,
        depth_levels,
        imbalance,
        bid_volume,
        ask_volume,
    }
}

/// A detected liquidity wall near the mid price.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WallReport {
    pub mid_price: Decimal,
    /// Bucketed price where cumulative size first dominates the average.
    pub wall_price: Decimal,
    /// Cumulative size from the mid out to (and including) the wall bucket.
    pub cum_wall_size: Decimal,
    pub wall_total_value: Decimal,
    pub avg_bucket_size: Decimal,
}

/// Find the nearest price cluster whose cumulative size dominates nearby
/// liquidity.
///
/// Levels of `side` within `price_window` of the mid are grouped into
/// `tick_group`-wide buckets; walking buckets outward from the mid, the
/// first whose cumulative size reaches `wall_factor` times the average
/// bucket size is the wall.
pub fn find_wall(
    book: &OrderedBook,
    side: Side,
    price_window: Decimal,
    wall_factor: Decimal,
    tick_group: Decimal,
) -> Option<WallReport> {
    if price_window <= Decimal::ZERO || tick_group <= Decimal::ZERO {
        return None;
    }
    let (best_bid, _) = book.best(Side::Bid)?;
    let (best_ask, _) = book.best(Side::Ask)?;
    let mid_price = (best_bid + best_ask) / Decimal::TWO;

    // Band bounds: bids in [mid*(1-w), mid), asks in (mid, mid*(1+w)].
    let lower = mid_price * (Decimal::ONE - price_window);
    let upper = mid_price * (Decimal::ONE + price_window);
    let in_band = |price: Decimal| match side {
        Side::Bid => price >= lower && price < mid_price,
        Side::Ask => price > mid_price && price <= upper,
    };

    // Side iteration is best-first, i.e. ascending distance from the mid,
    // so bucketing is a run-length accumulation.
    let mut buckets: Vec<(Decimal, Decimal)> = Vec::new();
    for (price, size) in book.iter(side) {
        if !in_band(price) {
            // Ladder prices move monotonically away from the mid; once the
            // band is left it is never re-entered.
            if !buckets.is_empty() {
                break;
            }
            continue;
        }
        let bucket = (price / tick_group).round() * tick_group;
        match buckets.last_mut() {
            Some((last, total)) if *last == bucket => *total += size,
            _ => buckets.push((bucket, size)),
        }
    }
    if buckets.is_empty() {
        return None;
    }

    let total: Decimal = buckets.iter().map(|(_, size)| *size).sum();
    let avg_bucket_size = total / Decimal::from(buckets.len());
    let threshold = wall_factor * avg_bucket_size;

    let mut cumulative = Decimal::ZERO;
    for (bucket, size) in &buckets {
        cumulative += *size;
        if cumulative >= threshold {
            return Some(WallReport {
                mid_price,
                wall_price: *bucket,
                cum_wall_size: cumulative,
                wall_total_value: *bucket * cumulative,
                avg_bucket_size,
            });
        }
    }
    None
}
