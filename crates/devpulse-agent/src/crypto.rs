//! Crypto quotes from a CoinGecko-compatible API
//!
//! Queries `simple/price?ids=bitcoin,ethereum&vs_currencies=usd`. A failed
//! lookup never fails a collection cycle: `collect` yields empty metrics
//! and the snapshot goes out without prices.

use crate::error::{AgentError, AgentResult};
use devpulse_core::CryptoMetrics;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const COIN_IDS: &str = "bitcoin,ethereum";
const VS_CURRENCY: &str = "usd";

#[derive(Debug, Default, Deserialize)]
struct PriceResponse {
    #[serde(default)]
    bitcoin: Option<UsdQuote>,
    #[serde(default)]
    ethereum: Option<UsdQuote>,
}

#[derive(Debug, Deserialize)]
struct UsdQuote {
    usd: Option<f64>,
}

/// Fetches BTC and ETH prices in USD
#[derive(Clone)]
pub struct CryptoCollector {
    client: Client,
    endpoint: String,
}

impl CryptoCollector {
    /// Create a collector for an API base URL such as `https://api.coingecko.com/api/v3`
    pub fn new(endpoint: &str, timeout: Duration) -> AgentResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("devpulse-agent/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Fetch current prices
    pub async fn fetch(&self) -> AgentResult<CryptoMetrics> {
        let url = format!("{}/simple/price", self.endpoint);
        let response = self
            .client
            .get(&url)
            .query(&[("ids", COIN_IDS), ("vs_currencies", VS_CURRENCY)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::QuoteStatus(status.as_u16()));
        }

        let prices: PriceResponse = response.json().await?;
        let metrics = CryptoMetrics::new(
            prices.bitcoin.and_then(|q| q.usd),
            prices.ethereum.and_then(|q| q.usd),
        )?;
        debug!("Fetched crypto quotes: {:?}", metrics);
        Ok(metrics)
    }

    /// Fetch current prices, yielding empty metrics on any failure
    pub async fn collect(&self) -> CryptoMetrics {
        match self.fetch().await {
            Ok(metrics) => metrics,
            Err(e) => {
                warn!("Crypto quotes unavailable: {}", e);
                CryptoMetrics::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn collector(server: &MockServer) -> CryptoCollector {
        CryptoCollector::new(&server.uri(), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_prices() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/simple/price"))
            .and(query_param("ids", "bitcoin,ethereum"))
            .and(query_param("vs_currencies", "usd"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "bitcoin": {"usd": 42000.5},
                "ethereum": {"usd": 2500.0},
            })))
            .mount(&server)
            .await;

        let metrics = collector(&server).fetch().await.unwrap();
        assert_eq!(metrics.bitcoin_price_usd, Some(42000.5));
        assert_eq!(metrics.ethereum_price_usd, Some(2500.0));
    }

    #[tokio::test]
    async fn test_partial_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/simple/price"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"bitcoin": {"usd": 1.0}})),
            )
            .mount(&server)
            .await;

        let metrics = collector(&server).collect().await;
        assert_eq!(metrics.bitcoin_price_usd, Some(1.0));
        assert_eq!(metrics.ethereum_price_usd, None);
    }

    #[tokio::test]
    async fn test_failure_yields_empty_metrics() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/simple/price"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let collector = collector(&server);
        assert!(matches!(
            collector.fetch().await,
            Err(AgentError::QuoteStatus(429))
        ));
        assert!(collector.collect().await.is_empty());
    }

    #[tokio::test]
    async fn test_negative_price_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/simple/price"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"bitcoin": {"usd": -3.0}})),
            )
            .mount(&server)
            .await;

        let collector = collector(&server);
        assert!(matches!(
            collector.fetch().await,
            Err(AgentError::Validation(_))
        ));
        assert!(collector.collect().await.is_empty());
    }

    #[test]
    fn test_endpoint_trailing_slash() {
        let collector =
            CryptoCollector::new("https://example.com/api/v3/", Duration::from_secs(1)).unwrap();
        assert_eq!(collector.endpoint(), "https://example.com/api/v3");
    }
}
