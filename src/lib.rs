//! depthwatch: real-time multi-symbol L2 order-book ingestion and
//! analytics.
//!
//! A supervisor partitions the symbol universe into batches; each batch
//! runs one duplex stream session that reconstructs per-symbol books from
//! snapshot + update events, derives microstructure statistics, raises
//! alerts on anomalous transitions, and persists periodic gzip NDJSON
//! snapshots and price-change histories.

pub mod broker;
pub mod config;
pub mod error;
pub mod notify;
pub mod orderbook;
pub mod persist;
pub mod replay;
pub mod stream;
pub mod supervisor;

pub use error::{EngineError, Result};
