//! Broker REST collaborator.
//!
//! The engine's only use of the trading API surface: listing the tradable
//! products for a fiat currency, queried once by the supervisor at startup
//! when no explicit symbol list is given.

use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{EngineError, Result};

/// Default REST base for product discovery.
pub const DEFAULT_BASE_URL: &str = "https://api.exchange.coinbase.com";

/// Thin REST client for product discovery.
#[derive(Clone)]
pub struct BrokerClient {
    client: reqwest::Client,
    base_url: String,
}

impl std::fmt::Debug for BrokerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct Product {
    id: String,
    quote_currency: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    trading_disabled: bool,
}

impl Product {
    fn tradable_in(&self, fiat: &str) -> bool {
        self.quote_currency.eq_ignore_ascii_case(fiat)
            && self.status == "online"
            && !self.trading_disabled
    }
}

impl BrokerClient {
    pub fn new() -> Self {
        let base_url =
            std::env::var("DEPTHWATCH_BROKER_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::with_base_url(base_url)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .user_agent(concat!("depthwatch/", env!("CARGO_PKG_VERSION")))
                .build()
                .expect("failed to create HTTP client"),
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// List product ids quoted in `fiat` that are online and tradable.
    ///
    /// Failure here is fatal configuration: without a symbol universe the
    /// engine has nothing to do.
    pub async fn list_trade_pairs(&self, fiat: &str) -> Result<Vec<String>> {
        let url = format!("{}/products", self.base_url);
        debug!(url = %url, fiat, "listing trade pairs");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::FatalConfig(format!("product listing failed: {e}")))?;
        if !response.status().is_success() {
            return Err(EngineError::FatalConfig(format!(
                "product listing returned {}",
                response.status()
            )));
        }
        let products: Vec<Product> = response
            .json()
            .await
            .map_err(|e| EngineError::FatalConfig(format!("bad product listing: {e}")))?;

        let mut pairs: Vec<String> = products
            .into_iter()
            .filter(|product| product.tradable_in(fiat))
            .map(|product| product.id)
            .collect();
        pairs.sort();

        if pairs.is_empty() {
            return Err(EngineError::FatalConfig(format!(
                "no tradable {fiat}-quoted products"
            )));
        }
        info!(fiat, count = pairs.len(), "trade pairs discovered");
        Ok(pairs)
    }
}

impl Default for BrokerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(id: &str, quote: &str, status: &str, disabled: bool) -> Product {
        Product {
            id: id.to_string(),
            quote_currency: quote.to_string(),
            status: status.to_string(),
            trading_disabled: disabled,
        }
    }

    #[test]
    fn tradable_filter_checks_quote_status_and_flag() {
        assert!(product("BTC-USD", "USD", "online", false).tradable_in("USD"));
        assert!(product("BTC-USD", "usd", "online", false).tradable_in("USD"));
        assert!(!product("BTC-EUR", "EUR", "online", false).tradable_in("USD"));
        assert!(!product("OLD-USD", "USD", "delisted", false).tradable_in("USD"));
        assert!(!product("HALT-USD", "USD", "online", true).tradable_in("USD"));
    }

    #[test]
    fn product_listing_decodes_wire_shape() {
        let json = r#"[
            {"id": "BTC-USD", "quote_currency": "USD", "status": "online"},
            {"id": "ETH-BTC", "quote_currency": "BTC", "status": "online", "trading_disabled": true}
        ]"#;
        let products: Vec<Product> = serde_json::from_str(json).unwrap();
        assert_eq!(products.len(), 2);
        assert!(products[0].tradable_in("USD"));
        assert!(!products[1].tradable_in("BTC"));
    }
}
