//! Duplex stream session for one batch of symbols.
//!
//! A client owns one persistent WebSocket connection, the per-symbol book
//! state machines behind it, and their analytics. Frames are handled in
//! receive order on this one task, which keeps the per-symbol state
//! machines lock-free; the only suspension points are transport I/O, file
//! writes and the reconnect backoff.

use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::config::{EngineConfig, PriceHistoryConfig};
use crate::error::{EngineError, Result};
use crate::notify::Notifier;
use crate::orderbook::{AlertEngine, BookMode, BookStateMachine, Phase, PriceHistory};
use crate::persist::{
    price_history_path, snapshot_path, FullSnapshotRecord, LightSnapshotRecord, SnapshotWriter,
};
use crate::stream::protocol::{decode_frame, BookEvent, ChannelRequest, Event};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Reconnect backoff ceiling.
const MAX_BACKOFF_SECS: u64 = 60;

/// Everything the client keeps per live symbol.
struct SymbolTrack {
    machine: BookStateMachine,
    alerts: AlertEngine,
    history: PriceHistory,
    writer: SnapshotWriter,
}

/// How one connected session ended.
enum SessionEnd {
    Shutdown,
    Disconnected,
}

pub struct StreamClient {
    config: Arc<EngineConfig>,
    symbols: Vec<String>,
    notifier: Arc<Notifier>,
    shutdown: watch::Receiver<bool>,
    tracks: HashMap<String, SymbolTrack>,
    reconnect_count: u32,
}

impl StreamClient {
    pub fn new(
        config: Arc<EngineConfig>,
        symbols: Vec<String>,
        notifier: Arc<Notifier>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            symbols,
            notifier,
            shutdown,
            tracks: HashMap::new(),
            reconnect_count: 0,
        }
    }

    /// Drive the session until shutdown or reconnect exhaustion.
    ///
    /// Returns `Ok` on cooperative shutdown; `Err(Transport)` once
    /// `reconnect_attempts` consecutive attempts failed, which the
    /// supervisor treats as fatal for this worker.
    pub async fn run(mut self) -> Result<()> {
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            match self.session().await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::Disconnected) => {
                    warn!(symbols = self.symbols.len(), "stream disconnected");
                }
                Err(e) => {
                    warn!(error = %e, "stream session failed");
                }
            }

            self.reconnect_count += 1;
            if self.reconnect_count > self.config.stream.reconnect_attempts {
                error!(
                    attempts = self.config.stream.reconnect_attempts,
                    "reconnect attempts exhausted"
                );
                self.close_all();
                return Err(EngineError::Transport(
                    "reconnect attempts exhausted".to_string(),
                ));
            }

            let delay = backoff_delay(
                self.config.stream.reconnect_delay.as_secs(),
                self.reconnect_count,
            );
            info!(attempt = self.reconnect_count, delay_secs = delay, "reconnecting");
            let mut shutdown = self.shutdown.clone();
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs(delay)) => {}
                _ = shutdown.changed() => {}
            }
        }
        self.close_all();
        info!("stream client drained");
        Ok(())
    }

    /// One connect → subscribe → pump cycle.
    async fn session(&mut self) -> Result<SessionEnd> {
        let url = self.config.stream.ws_url.clone();
        info!(url = %url, symbols = self.symbols.len(), "connecting");
        let (ws, _) = connect_async(&url).await?;
        let (mut sink, mut source) = ws.split();

        let subscribe = ChannelRequest::subscribe(&self.config.stream.channel, &self.symbols);
        sink.send(Message::Text(subscribe.to_json().into())).await?;
        info!(
            channel = %self.config.stream.channel,
            symbols = ?self.symbols,
            "subscribed"
        );
        self.reconnect_count = 0;

        let end = self.pump(&mut sink, &mut source).await;
        if matches!(end, Ok(SessionEnd::Shutdown)) {
            self.finish(&mut sink).await;
        }
        end
    }

    /// Frame loop for one established session.
    async fn pump(&mut self, sink: &mut WsSink, source: &mut WsSource) -> Result<SessionEnd> {
        let mut shutdown = self.shutdown.clone();
        let mut heartbeat = tokio::time::interval(self.config.stream.ping_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let pong_deadline = self.config.stream.ping_interval + self.config.stream.ping_timeout;
        let mut last_pong = Instant::now();

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(SessionEnd::Shutdown);
                    }
                }
                _ = heartbeat.tick() => {
                    if last_pong.elapsed() > pong_deadline {
                        warn!("heartbeat deadline missed, disconnecting");
                        return Ok(SessionEnd::Disconnected);
                    }
                    sink.send(Message::Ping(Vec::new().into())).await?;
                }
                frame = source.next() => {
                    match frame {
                        None => {
                            warn!("stream ended");
                            return Ok(SessionEnd::Disconnected);
                        }
                        Some(Err(e)) => return Err(e.into()),
                        Some(Ok(Message::Text(text))) => {
                            let received_at = Utc::now();
                            match decode_frame(&text, received_at) {
                                Ok(event) => self.dispatch(event, sink).await?,
                                Err(e) => warn!(error = %e, "dropping malformed frame"),
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            sink.send(Message::Pong(payload)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            last_pong = Instant::now();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!(frame = ?frame, "close frame received");
                            return Ok(SessionEnd::Disconnected);
                        }
                        Some(Ok(_)) => {}
                    }
                }
            }
        }
    }

    async fn dispatch(&mut self, event: Event, sink: &mut WsSink) -> Result<()> {
        match event {
            Event::Subscriptions { symbols } => {
                info!(symbols = ?symbols, "subscription confirmed");
                Ok(())
            }
            Event::StreamError { message } => {
                error!(message = %message, "stream error event");
                Ok(())
            }
            Event::Snapshot(evt) => {
                self.on_snapshot(evt);
                Ok(())
            }
            Event::Update(evt) => self.on_update(evt, sink).await,
        }
    }

    fn on_snapshot(&mut self, evt: BookEvent) {
        let symbol = evt.symbol.clone();
        if !self.tracks.contains_key(&symbol) {
            let track = self.make_track(&evt);
            self.tracks.insert(symbol.clone(), track);
        }
        let track = self
            .tracks
            .get_mut(&symbol)
            .expect("track inserted above");

        match track.machine.on_snapshot(&evt) {
            Ok(()) => {
                track.history.reset();
                info!(
                    symbol = %symbol,
                    sequence = track.machine.sequence(),
                    "order book initialized"
                );
            }
            Err(e) => warn!(symbol = %symbol, error = %e, "dropping bad snapshot"),
        }
    }

    async fn on_update(&mut self, evt: BookEvent, sink: &mut WsSink) -> Result<()> {
        let symbol = evt.symbol.clone();
        let Some(track) = self.tracks.get_mut(&symbol) else {
            debug!(symbol = %symbol, "update for untracked symbol, dropping");
            return Ok(());
        };
        if track.machine.phase() == Phase::Uninitialized {
            // Resubscribe already requested; wait for the fresh snapshot.
            debug!(symbol = %symbol, "awaiting snapshot, dropping update");
            return Ok(());
        }

        match track.machine.on_update(&evt) {
            Ok(()) => {
                let alerts = track.alerts.update(track.machine.book(), evt.received_at);
                for alert in &alerts {
                    warn!(
                        symbol = %alert.symbol,
                        kind = ?alert.kind,
                        payload = %alert.payload,
                        "book alert"
                    );
                }
                let mid = track
                    .alerts
                    .previous_stats()
                    .and_then(|stats| stats.mid_price);
                track.history.record(evt.received_at, mid).await;
                track.history.flush_if_due(evt.received_at);

                let flushed = match track.machine.mode() {
                    BookMode::Full => track
                        .writer
                        .maybe_write(evt.received_at, || {
                            FullSnapshotRecord::from_machine(&track.machine)
                        }),
                    BookMode::Light => track
                        .writer
                        .maybe_write(evt.received_at, || {
                            LightSnapshotRecord::from_machine(&track.machine)
                        }),
                };
                if flushed {
                    info!(symbol = %symbol, "order book snapshot flushed");
                }
                Ok(())
            }
            Err(e @ EngineError::MalformedEvent(_)) => {
                warn!(symbol = %symbol, error = %e, "dropping malformed update");
                Ok(())
            }
            Err(e @ EngineError::SequenceGap { .. }) => {
                warn!(symbol = %symbol, error = %e, "sequence gap, resubscribing");
                self.resubscribe(&symbol, sink).await
            }
            Err(e @ EngineError::CrossedBook { .. }) => {
                error!(symbol = %symbol, error = %e, "crossed book, resubscribing");
                self.resubscribe(&symbol, sink).await
            }
            Err(e) => Err(e),
        }
    }

    fn make_track(&self, evt: &BookEvent) -> SymbolTrack {
        let symbol = evt.symbol.as_str();
        let special = self.config.is_special(symbol);
        let mode = if special {
            BookMode::Full
        } else {
            BookMode::Light
        };
        let history_config = if special {
            PriceHistoryConfig::special()
        } else {
            PriceHistoryConfig::default()
        };
        let session_start = evt.received_at;

        let writer = SnapshotWriter::new(
            snapshot_path(&self.config.out_dir, symbol, session_start),
            self.config.write_interval,
        );
        let history_writer = SnapshotWriter::new(
            price_history_path(&self.config.out_dir, symbol, session_start, special),
            history_config.write_interval,
        );

        SymbolTrack {
            machine: BookStateMachine::new(symbol, mode),
            alerts: AlertEngine::new(symbol, self.config.thresholds_for(symbol)),
            history: PriceHistory::new(
                symbol,
                history_config,
                Arc::clone(&self.notifier),
                history_writer,
            ),
            writer,
        }
    }

    /// Drop one symbol back to a fresh snapshot by cycling its
    /// subscription.
    async fn resubscribe(&mut self, symbol: &str, sink: &mut WsSink) -> Result<()> {
        let products = vec![symbol.to_string()];
        let channel = &self.config.stream.channel;
        let unsubscribe = ChannelRequest::unsubscribe(channel, &products);
        sink.send(Message::Text(unsubscribe.to_json().into())).await?;
        let subscribe = ChannelRequest::subscribe(channel, &products);
        sink.send(Message::Text(subscribe.to_json().into())).await?;
        info!(symbol = %symbol, "resubscribed for fresh snapshot");
        Ok(())
    }

    /// Cooperative shutdown inside a live session: unsubscribe everything
    /// and close the socket. Failures only get logged; the session is
    /// ending either way.
    async fn finish(&mut self, sink: &mut WsSink) {
        let unsubscribe =
            ChannelRequest::unsubscribe(&self.config.stream.channel, &self.symbols);
        if let Err(e) = sink.send(Message::Text(unsubscribe.to_json().into())).await {
            warn!(error = %e, "failed to send unsubscribe");
        } else {
            info!("unsubscribed");
        }
        if let Err(e) = sink.send(Message::Close(None)).await {
            debug!(error = %e, "close frame not sent");
        }
    }

    fn close_all(&mut self) {
        for track in self.tracks.values_mut() {
            track.machine.close();
        }
    }
}

fn backoff_delay(base_secs: u64, attempt: u32) -> u64 {
    let exp = attempt.saturating_sub(1).min(10);
    base_secs
        .saturating_mul(1u64 << exp)
        .min(MAX_BACKOFF_SECS)
}
