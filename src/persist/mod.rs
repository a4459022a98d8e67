//! Append-only gzip NDJSON persistence.
//!
//! Each flush appends one complete gzip member holding a single
//! newline-terminated JSON record, so a file interrupted between flushes is
//! still fully readable. Write failures are logged and never abort
//! ingestion; the in-memory book stays authoritative.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::orderbook::book::{OrderedBook, Side};
use crate::orderbook::state::BookStateMachine;

/// Full-mode record: the entire book with sides in sort order. Prices and
/// sizes serialize as decimal strings, so a reloaded book is equal to the
/// original under ordered-map equality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullSnapshotRecord {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub sequence: i64,
    pub bids: Vec<(Decimal, Decimal)>,
    pub asks: Vec<(Decimal, Decimal)>,
}

/// Light-mode record: top-of-book summary with short keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightSnapshotRecord {
    pub t: DateTime<Utc>,
    /// Symbol.
    pub p: String,
    /// Sequence.
    pub s: i64,
    pub bb: Option<Decimal>,
    pub ba: Option<Decimal>,
    pub sp: Option<Decimal>,
    pub mp: Option<Decimal>,
    pub ib: Option<Decimal>,
}

/// One flushed price-history window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceHistoryRecord {
    pub timestamp: DateTime<Utc>,
    pub product_id: String,
    pub times: Vec<DateTime<Utc>>,
    pub prices: Vec<f64>,
    pub last_price: Option<f64>,
    pub last_time: Option<DateTime<Utc>>,
}

impl FullSnapshotRecord {
    pub fn from_machine(machine: &BookStateMachine) -> Self {
        let book = machine.book();
        Self {
            timestamp: machine.timestamp(),
            symbol: machine.symbol().to_string(),
            sequence: machine.sequence(),
            bids: book.iter(Side::Bid).collect(),
            asks: book.iter(Side::Ask).collect(),
        }
    }

    /// Rebuild the ordered book this record was taken from.
    pub fn to_book(&self) -> OrderedBook {
        let mut book = OrderedBook::new();
        for &(price, size) in &self.bids {
            book.apply(Side::Bid, price, size);
        }
        for &(price, size) in &self.asks {
            book.apply(Side::Ask, price, size);
        }
        book
    }
}

impl LightSnapshotRecord {
    pub fn from_machine(machine: &BookStateMachine) -> Self {
        let book = machine.book();
        let best_bid = book.best(Side::Bid).map(|(price, _)| price);
        let best_ask = book.best(Side::Ask).map(|(price, _)| price);
        let spread = best_bid.zip(best_ask).map(|(bid, ask)| ask - bid);
        let mid = best_bid
            .zip(best_ask)
            .map(|(bid, ask)| (bid + ask) / Decimal::TWO);
        let bid_volume: Decimal = book.iter(Side::Bid).map(|(_, size)| size).sum();
        let ask_volume: Decimal = book.iter(Side::Ask).map(|(_, size)| size).sum();
        let total = bid_volume + ask_volume;
        let imbalance = (total > Decimal::ZERO).then(|| bid_volume / total);

        Self {
            t: machine.timestamp(),
            p: machine.symbol().to_string(),
            s: machine.sequence(),
            bb: best_bid,
            ba: best_ask,
            sp: spread,
            mp: mid,
            ib: imbalance,
        }
    }
}

/// ISO 8601 instant made filesystem-safe: colons become dashes, the zone
/// `+` becomes `_`, sub-second precision is dropped.
pub fn sanitize_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
        .replace(':', "-")
        .replace('+', "_")
}

/// Book snapshot file for one (symbol, session-start) pair.
pub fn snapshot_path(out_dir: &Path, symbol: &str, session_start: DateTime<Utc>) -> PathBuf {
    out_dir.join(format!(
        "order_book_{symbol}_{}.jsonl.gz",
        sanitize_timestamp(session_start)
    ))
}

/// Price-history file for one (symbol, session-start) pair. Closely-watched
/// symbols go to their own subdirectory.
pub fn price_history_path(
    out_dir: &Path,
    symbol: &str,
    session_start: DateTime<Utc>,
    special: bool,
) -> PathBuf {
    let subdir = if special {
        "special_track_prices"
    } else {
        "track_prices"
    };
    out_dir.join(subdir).join(format!(
        "prices_{symbol}_{}.jsonl.gz",
        sanitize_timestamp(session_start)
    ))
}

/// Append one record to a gzip NDJSON file, creating parent directories on
/// demand.
pub fn append_record<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let mut encoder = GzEncoder::new(file, Compression::default());
    serde_json::to_writer(&mut encoder, record).context("encoding record")?;
    encoder.write_all(b"\n").context("terminating record")?;
    encoder.finish().context("finishing gzip member")?;
    Ok(())
}

/// Read every record of a multi-member gzip NDJSON file.
pub fn read_records<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    let file = fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader = BufReader::new(MultiGzDecoder::new(file));
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line.context("reading record line")?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line).context("decoding record")?);
    }
    Ok(records)
}

/// Interval-gated append-only writer for one symbol's output file.
#[derive(Debug)]
pub struct SnapshotWriter {
    path: PathBuf,
    write_interval: Duration,
    last_write_time: Option<DateTime<Utc>>,
}

impl SnapshotWriter {
    pub fn new(path: PathBuf, write_interval: Duration) -> Self {
        Self {
            path,
            write_interval,
            last_write_time: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn due(&self, now: DateTime<Utc>) -> bool {
        match self.last_write_time {
            None => true,
            Some(last) => {
                now.signed_duration_since(last).num_milliseconds()
                    >= self.write_interval.as_millis() as i64
            }
        }
    }

    /// Append one record if at least `write_interval` has passed since the
    /// previous write; otherwise a no-op. The payload is only produced
    /// when due. Returns whether the gate opened; IO failures are logged
    /// and reported as a normal (gated) write so ingestion continues.
    pub fn maybe_write<T, F>(&mut self, now: DateTime<Utc>, payload: F) -> bool
    where
        T: Serialize,
        F: FnOnce() -> T,
    {
        if !self.due(now) {
            return false;
        }
        self.last_write_time = Some(now);
        if let Err(e) = append_record(&self.path, &payload()) {
            warn!(path = %self.path.display(), error = %e, "snapshot write failed");
        }
        true
    }
}
