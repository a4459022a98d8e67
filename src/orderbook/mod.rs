//! Order-book reconstruction and analytics.
//!
//! One [`state::BookStateMachine`] per symbol drives an ordered price
//! ladder from snapshot + update events; pure statistics, stateful alert
//! detection and throttled price-history sampling layer on top.

pub mod alerts;
pub mod book;
pub mod history;
pub mod state;
pub mod stats;

pub use alerts::{Alert, AlertEngine, AlertKind, AlertThresholds};
pub use book::{OrderedBook, Side};
pub use history::PriceHistory;
pub use state::{BookMode, BookStateMachine, Phase};
pub use stats::{Statistics, WallReport};
