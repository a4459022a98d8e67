//! Credential material for the notifier collaborator.
//!
//! The core engine itself requires no credentials; only the urgent-move
//! notifier carries a bot token, held opaquely so it cannot leak through
//! `Debug` output or log lines.

use std::fmt;

/// Opaque holder for the notifier bot token.
///
/// The token is read exactly once, when the outbound send URL is built;
/// everywhere else the wrapper renders as `Secret(redacted)`.
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    /// The wrapped value. Only for building the request URL; never log
    /// what this returns.
    pub fn reveal(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(redacted)")
    }
}

/// Telegram-bot credentials for the urgent-change notifier.
#[derive(Clone, Debug)]
pub struct NotifierCredentials {
    pub bot_token: Secret,
    pub chat_id: String,
}

impl NotifierCredentials {
    /// Loads `DEPTHWATCH_TG_BOT_TOKEN` / `DEPTHWATCH_TG_CHAT_ID`.
    ///
    /// Returns `Ok(None)` when neither is set (notifications disabled) and
    /// an error when only one of the pair is present.
    pub fn from_env() -> Result<Option<Self>, String> {
        let bot_token = std::env::var("DEPTHWATCH_TG_BOT_TOKEN").ok();
        let chat_id = std::env::var("DEPTHWATCH_TG_CHAT_ID").ok();

        match (bot_token, chat_id) {
            (None, None) => Ok(None),
            (Some(token), Some(chat_id)) => {
                let token = token.trim();
                let chat_id = chat_id.trim();
                if token.is_empty() || chat_id.is_empty() {
                    return Err(
                        "DEPTHWATCH_TG_BOT_TOKEN / DEPTHWATCH_TG_CHAT_ID are empty".to_string()
                    );
                }
                Ok(Some(Self {
                    bot_token: Secret::new(token),
                    chat_id: chat_id.to_string(),
                }))
            }
            _ => Err(
                "DEPTHWATCH_TG_BOT_TOKEN and DEPTHWATCH_TG_CHAT_ID must be set together"
                    .to_string(),
            ),
        }
    }
}
