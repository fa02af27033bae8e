use crate::core::asset::{AssetClass, Quote};
use crate::core::error::SourceError;
use crate::core::source::PriceSource;
use crate::providers::util::{get_json, strip_quote_suffix};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};

// trading pair ticker layout
const BID: usize = 1;
const ASK: usize = 3;
const LAST_PRICE: usize = 7;

pub struct BitfinexSource {
    base_url: String,
    client: reqwest::Client,
}

impl BitfinexSource {
    pub fn new(base_url: &str, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

/// `tBTCUSD` -> `BTC`. Funding tickers (`f` prefix) and colon-separated
/// pairs such as `tAVAX:USD` are skipped.
fn normalize_symbol(symbol: &str) -> Option<&str> {
    let pair = symbol.strip_prefix('t')?;
    strip_quote_suffix(pair, &["USDT", "USD"]).filter(|base| !base.contains(':'))
}

fn positive(ticker: &[Value], index: usize) -> Option<f64> {
    ticker
        .get(index)?
        .as_f64()
        .filter(|p| p.is_finite() && *p > 0.0)
}

/// Last traded price, or the bid/ask midpoint when there is no last trade.
fn ticker_price(ticker: &[Value]) -> Option<f64> {
    positive(ticker, LAST_PRICE)
        .or_else(|| Some((positive(ticker, BID)? + positive(ticker, ASK)?) / 2.0))
}

#[async_trait]
impl PriceSource for BitfinexSource {
    fn name(&self) -> &str {
        "bitfinex"
    }

    fn asset_class(&self) -> AssetClass {
        AssetClass::Crypto
    }

    #[instrument(name = "BitfinexFetch", skip(self))]
    async fn fetch(&self) -> Result<Vec<Quote>, SourceError> {
        let url = format!("{}/v2/tickers?symbols=ALL", self.base_url);
        let tickers: Vec<Vec<Value>> = get_json(&self.client, self.name(), &url).await?;

        let quotes: Vec<Quote> = tickers
            .iter()
            .filter_map(|ticker| {
                let asset = normalize_symbol(ticker.first()?.as_str()?)?;
                let price = ticker_price(ticker)?;
                Some(Quote::usd(self.name(), asset, price))
            })
            .collect();
        debug!(count = quotes.len(), "Bitfinex quotes fetched");
        Ok(quotes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_normalize_symbol() {
        assert_eq!(normalize_symbol("tBTCUSD"), Some("BTC"));
        assert_eq!(normalize_symbol("tETHUSDT"), Some("ETH"));
        assert_eq!(normalize_symbol("tAVAX:USD"), None);
        assert_eq!(normalize_symbol("fUSD"), None);
        assert_eq!(normalize_symbol("tETHBTC"), None);
    }

    #[test]
    fn test_ticker_price_falls_back_to_midpoint() {
        let ticker: Vec<Value> = serde_json::from_value(json!([
            "tXYZUSD", 10.0, 1.0, 12.0, 1.0, 0.0, 0.0, 0.0, 5.0, 12.0, 9.0
        ]))
        .unwrap();
        assert_eq!(ticker_price(&ticker), Some(11.0));

        let short: Vec<Value> = serde_json::from_value(json!(["tXYZUSD", 0.0])).unwrap();
        assert_eq!(ticker_price(&short), None);
    }

    #[tokio::test]
    async fn test_bitfinex_fetch() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/tickers"))
            .and(query_param("symbols", "ALL"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[
                    ["tBTCUSD", 64990, 1.2, 65010, 0.8, 120, 0.002, 65000, 900.5, 65500, 64000],
                    ["tETHBTC", 0.046, 10, 0.047, 5, 0, 0, 0.0465, 100, 0.05, 0.04],
                    ["tAVAX:USD", 30, 1, 31, 1, 0, 0, 30.5, 10, 32, 29],
                    ["fUSD", 0.0001, 0.00008, 2, 1000, 0.0002, 30, 5000, 0, 0, 0.0001, 0.0001, null, null, 3000]
                ]"#,
            ))
            .mount(&mock_server)
            .await;

        let client = crate::providers::util::http_client(Duration::from_secs(5)).unwrap();
        let source = BitfinexSource::new(&mock_server.uri(), client);
        let quotes = source.fetch().await.unwrap();

        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].asset, "BTC");
        assert_eq!(quotes[0].price, 65000.0);
    }

    #[tokio::test]
    async fn test_bitfinex_http_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/tickers"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let client = crate::providers::util::http_client(Duration::from_secs(5)).unwrap();
        let source = BitfinexSource::new(&mock_server.uri(), client);
        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, SourceError::Status { status: 503, .. }));
    }
}
