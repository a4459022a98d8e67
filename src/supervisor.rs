//! Worker supervision.
//!
//! Partitions the symbol universe into batches, runs one stream client per
//! batch, and owns the shutdown signal. Workers observe shutdown
//! cooperatively; the supervisor waits for every worker to drain before
//! returning.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::notify::Notifier;
use crate::stream::StreamClient;

/// Split `symbols` into batches of at most `max_per_ws`.
pub fn partition(symbols: &[String], max_per_ws: usize) -> Vec<Vec<String>> {
    assert!(max_per_ws > 0, "batch size must be positive");
    symbols
        .chunks(max_per_ws)
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Run the engine until interrupted.
///
/// Returns `Ok` on clean shutdown. If every worker dies of a fatal
/// transport error the first error propagates, and the process exits
/// non-zero.
pub async fn run(config: EngineConfig, notifier: Arc<Notifier>) -> Result<()> {
    if config.symbols.is_empty() {
        return Err(EngineError::FatalConfig("no symbols to track".to_string()));
    }

    let config = Arc::new(config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_listener(shutdown_tx);

    let batches = partition(&config.symbols, config.max_per_ws);
    info!(
        symbols = config.symbols.len(),
        batches = batches.len(),
        out_dir = %config.out_dir.display(),
        "starting workers"
    );

    let mut workers: Vec<JoinHandle<Result<()>>> = Vec::with_capacity(batches.len());
    for (index, batch) in batches.into_iter().enumerate() {
        // Stagger connections so a large universe does not hammer the
        // endpoint in one burst.
        if index > 0 {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        let client = StreamClient::new(
            Arc::clone(&config),
            batch,
            Arc::clone(&notifier),
            shutdown_rx.clone(),
        );
        workers.push(tokio::spawn(async move { client.run().await }));
    }

    let total = workers.len();
    let mut first_error = None;
    let mut failed = 0usize;
    for worker in workers {
        match worker.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                failed += 1;
                error!(error = %e, "worker terminated with fatal error");
                first_error.get_or_insert(e);
            }
            Err(e) => {
                failed += 1;
                error!(error = %e, "worker panicked");
                first_error.get_or_insert(EngineError::Transport(e.to_string()));
            }
        }
    }

    if failed == total {
        // Every worker is gone; nothing left to supervise.
        return Err(first_error.expect("failed workers imply an error"));
    }
    if failed > 0 {
        warn!(failed, total, "some workers terminated early");
    }
    info!("all workers drained");
    Ok(())
}

/// Resolve interrupt/terminate into the shutdown watch channel.
fn spawn_signal_listener(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        let interrupted = wait_for_signal().await;
        info!(signal = interrupted, "shutdown signal received");
        let _ = shutdown_tx.send(true);
    });
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};
    let mut terminate =
        signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => "interrupt",
        _ = terminate.recv() => "terminate",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "interrupt"
}
