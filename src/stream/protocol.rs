//! Wire contract for the level2 market-data channel.
//!
//! Outbound control frames are `{type, channel, product_ids}` JSON objects.
//! Inbound frames are JSON with an optional top-level `sequence_num` and an
//! `events` array whose first entry carries the payload; update sides come
//! in as `"bid"` / `"offer"`, prices and sizes as decimal strings.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{EngineError, Result};
use crate::orderbook::Side;

/// Outbound subscribe/unsubscribe control frame.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub channel: String,
    pub product_ids: Vec<String>,
}

impl ChannelRequest {
    pub fn subscribe(channel: &str, product_ids: &[String]) -> Self {
        Self {
            kind: "subscribe".to_string(),
            channel: channel.to_string(),
            product_ids: product_ids.to_vec(),
        }
    }

    pub fn unsubscribe(channel: &str, product_ids: &[String]) -> Self {
        Self {
            kind: "unsubscribe".to_string(),
            channel: channel.to_string(),
            product_ids: product_ids.to_vec(),
        }
    }

    pub fn to_json(&self) -> String {
        // Serialization of three plain fields cannot fail.
        serde_json::to_string(self).expect("control frame serialization")
    }
}

/// One decoded per-price change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelChange {
    pub side: Side,
    pub price: Decimal,
    pub new_size: Decimal,
}

/// Snapshot or update payload for a single symbol.
#[derive(Debug, Clone)]
pub struct BookEvent {
    pub symbol: String,
    /// Stream sequence number, when the venue provides one.
    pub sequence: Option<i64>,
    /// Venue-side timestamp of the message, when present.
    pub origin_ts: Option<DateTime<Utc>>,
    /// Local wall-clock instant stamped on receive.
    pub received_at: DateTime<Utc>,
    pub updates: Vec<LevelChange>,
}

/// Decoded inbound message.
#[derive(Debug, Clone)]
pub enum Event {
    /// Subscription confirmation; payload kept only for logging.
    Subscriptions { symbols: Vec<String> },
    Snapshot(BookEvent),
    Update(BookEvent),
    /// On-wire error report from the venue.
    StreamError { message: String },
}

#[derive(Debug, Deserialize)]
struct InboundMessage {
    #[serde(default)]
    sequence_num: Option<i64>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    events: Vec<InboundEvent>,
}

#[derive(Debug, Deserialize)]
struct InboundEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    product_id: Option<String>,
    #[serde(default)]
    updates: Option<Vec<WireLevel>>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    subscriptions: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct WireLevel {
    side: WireSide,
    price_level: String,
    new_quantity: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum WireSide {
    Bid,
    Offer,
}

impl From<WireSide> for Side {
    fn from(side: WireSide) -> Side {
        match side {
            WireSide::Bid => Side::Bid,
            WireSide::Offer => Side::Ask,
        }
    }
}

/// Decode one inbound text frame, stamping `received_at` with the local
/// receive instant. Schema violations come back as `MalformedEvent`.
pub fn decode_frame(text: &str, received_at: DateTime<Utc>) -> Result<Event> {
    let msg: InboundMessage = serde_json::from_str(text)?;
    let event = msg
        .events
        .into_iter()
        .next()
        .ok_or_else(|| EngineError::MalformedEvent("empty events array".to_string()))?;

    match event.kind.as_str() {
        "subscriptions" => {
            let symbols = event
                .subscriptions
                .as_ref()
                .and_then(|subs| subs.as_object())
                .map(|channels| {
                    channels
                        .values()
                        .filter_map(|ids| ids.as_array())
                        .flatten()
                        .filter_map(|id| id.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            Ok(Event::Subscriptions { symbols })
        }
        "error" => Ok(Event::StreamError {
            message: event
                .message
                .unwrap_or_else(|| "unspecified stream error".to_string()),
        }),
        "snapshot" | "update" => {
            let is_snapshot = event.kind == "snapshot";
            let symbol = event.product_id.ok_or_else(|| {
                EngineError::MalformedEvent(format!("{} event without product_id", event.kind))
            })?;
            let updates = decode_levels(event.updates.unwrap_or_default())?;
            let book_event = BookEvent {
                symbol,
                sequence: msg.sequence_num,
                origin_ts: msg.timestamp,
                received_at,
                updates,
            };
            if is_snapshot {
                Ok(Event::Snapshot(book_event))
            } else {
                Ok(Event::Update(book_event))
            }
        }
        other => Err(EngineError::MalformedEvent(format!(
            "unknown event type {other:?}"
        ))),
    }
}

fn decode_levels(levels: Vec<WireLevel>) -> Result<Vec<LevelChange>> {
    levels
        .into_iter()
        .map(|level| {
            let price = Decimal::from_str(&level.price_level).map_err(|e| {
                EngineError::MalformedEvent(format!(
                    "bad price_level {:?}: {e}",
                    level.price_level
                ))
            })?;
            let new_size = Decimal::from_str(&level.new_quantity).map_err(|e| {
                EngineError::MalformedEvent(format!(
                    "bad new_quantity {:?}: {e}",
                    level.new_quantity
                ))
            })?;
            Ok(LevelChange {
                side: level.side.into(),
                price,
                new_size,
            })
        })
        .collect()
}
