//! Duplex transport layer: wire protocol and the per-batch stream client.

pub mod client;
pub mod protocol;

pub use client::StreamClient;
pub use protocol::{decode_frame, BookEvent, ChannelRequest, Event, LevelChange};
