//! Urgent price-move notification collaborator.
//!
//! Delivery is best-effort and side-effect-only: failures are logged at
//! warn and never propagate into the ingestion path. When no channel is
//! configured the notifier degrades to a no-op.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::credentials::NotifierCredentials;

/// Telegram bot channel settings.
#[derive(Clone)]
struct TelegramChannel {
    url: String,
    chat_id: String,
}

/// Best-effort notifier for urgent price moves.
#[derive(Clone)]
pub struct Notifier {
    client: reqwest::Client,
    telegram: Option<TelegramChannel>,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("telegram", &self.telegram.as_ref().map(|_| "***"))
            .finish()
    }
}

impl Notifier {
    /// Build from credentials loaded from the environment; unconfigured
    /// credentials yield a disabled notifier.
    pub fn from_credentials(credentials: Option<NotifierCredentials>) -> Self {
        let telegram = credentials.map(|creds| TelegramChannel {
            url: format!(
                "https://api.telegram.org/bot{}/sendMessage",
                creds.bot_token.reveal()
            ),
            chat_id: creds.chat_id,
        });
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("failed to create HTTP client"),
            telegram,
        }
    }

    /// No-op notifier.
    pub fn disabled() -> Self {
        Self::from_credentials(None)
    }

    pub fn is_enabled(&self) -> bool {
        self.telegram.is_some()
    }

    /// Send the recorded history for `symbol` as one message. Errors are
    /// swallowed with a log line.
    pub async fn send(&self, symbol: &str, history: &[(DateTime<Utc>, Decimal)]) {
        let Some(telegram) = &self.telegram else {
            debug!(symbol, "notifier disabled, dropping urgent notification");
            return;
        };

        let text = format_history(symbol, history);
        let result = self
            .client
            .post(&telegram.url)
            .json(&serde_json::json!({
                "chat_id": telegram.chat_id,
                "text": text,
            }))
            .send()
            .await;

        match result {
            Ok(resp) if !resp.status().is_success() => {
                warn!(symbol, status = %resp.status(), "notification rejected");
            }
            Ok(_) => debug!(symbol, "urgent notification delivered"),
            Err(e) => warn!(symbol, error = %e, "notification failed"),
        }
    }
}

fn format_history(symbol: &str, history: &[(DateTime<Utc>, Decimal)]) -> String {
    let mut lines = Vec::with_capacity(history.len() + 1);
    lines.push(format!("Price history for {symbol}"));
    for (time, price) in history {
        lines.push(format!("{}: {}", time.format("%Y-%m-%d %H:%M"), price));
    }
    lines.join("\n")
}
