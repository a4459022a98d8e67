use rust_decimal::Decimal;
use thiserror::Error;

/// Engine error taxonomy.
///
/// Everything except `FatalConfig` and reconnect exhaustion is handled at
/// the level where it occurs; see the per-variant docs for the local
/// reaction.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Decode or schema failure on an inbound frame. Logged at warn, the
    /// event is dropped and the book is left untouched.
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// An update arrived with a sequence number at or below the current
    /// one, or the symbol has no live book. The symbol is reset to
    /// uninitialized and resubscribed so the exchange resends a snapshot.
    #[error("sequence gap for {symbol}: have {current}, received {received}")]
    SequenceGap {
        symbol: String,
        current: i64,
        received: i64,
    },

    /// `best_bid >= best_ask` after applying an update. Upstream bug:
    /// logged at error, symbol reset and resubscribed.
    #[error("crossed book for {symbol}: bid {best_bid} >= ask {best_ask}")]
    CrossedBook {
        symbol: String,
        best_bid: Decimal,
        best_ask: Decimal,
    },

    /// Transport-level failure. Recoverable via reconnect-with-backoff;
    /// surfaces to the supervisor only once the attempt limit is reached.
    #[error("transport error: {0}")]
    Transport(String),

    /// File/gzip IO failure while persisting. Logged, never fatal; the
    /// in-memory book stays authoritative.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Invalid symbol list, unreadable credentials, or an unusable output
    /// directory. The process exits non-zero.
    #[error("configuration error: {0}")]
    FatalConfig(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::MalformedEvent(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for EngineError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        EngineError::Transport(err.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Persistence(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
