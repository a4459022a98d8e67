//! Offline pass over the engine's own Full-mode snapshot files.
//!
//! Reconstructs a book per record, recomputes statistics and runs the
//! alert detectors over the successive states, exactly as the live path
//! would have seen them.

use anyhow::{Context, Result};
use std::path::Path;

use rust_decimal::Decimal;

use crate::orderbook::stats::find_wall;
use crate::orderbook::{Alert, AlertEngine, AlertThresholds, Side, Statistics, WallReport};
use crate::persist::{read_records, FullSnapshotRecord};

/// Band width around the mid when scanning for resting walls.
const WALL_PRICE_WINDOW: Decimal = Decimal::from_parts(5, 0, 0, false, 2);
/// A bucket must dominate the average by this factor to count as a wall.
const WALL_FACTOR: Decimal = Decimal::from_parts(10, 0, 0, false, 0);
/// Price bucket width for wall grouping.
const WALL_TICK_GROUP: Decimal = Decimal::from_parts(1, 0, 0, false, 1);

/// Statistics, fired alerts and nearby walls for one replayed record.
#[derive(Debug)]
pub struct ReplayStep {
    pub stats: Statistics,
    pub alerts: Vec<Alert>,
    pub bid_wall: Option<WallReport>,
    pub ask_wall: Option<WallReport>,
}

/// Replay a Full-mode snapshot file through statistics and alerting.
pub fn replay_snapshots(
    path: &Path,
    thresholds: AlertThresholds,
    depth_levels: usize,
) -> Result<Vec<ReplayStep>> {
    let records: Vec<FullSnapshotRecord> =
        read_records(path).with_context(|| format!("replaying {}", path.display()))?;
    let mut engine: Option<AlertEngine> = None;
    let mut steps = Vec::with_capacity(records.len());

    for record in records {
        let engine = engine
            .get_or_insert_with(|| AlertEngine::new(record.symbol.clone(), thresholds.clone()));
        let book = record.to_book();
        let alerts = engine.update(&book, record.timestamp);
        let stats =
            crate::orderbook::stats::compute(&record.symbol, &book, record.timestamp, depth_levels);
        let bid_wall = find_wall(&book, Side::Bid, WALL_PRICE_WINDOW, WALL_FACTOR, WALL_TICK_GROUP);
        let ask_wall = find_wall(&book, Side::Ask, WALL_PRICE_WINDOW, WALL_FACTOR, WALL_TICK_GROUP);
        steps.push(ReplayStep {
            stats,
            alerts,
            bid_wall,
            ask_wall,
        });
    }
    Ok(steps)
}
