use crate::core::asset::{AssetClass, Quote};
use crate::core::error::SourceError;
use crate::core::source::PriceSource;
use crate::providers::util::{get_json, parse_price, strip_quote_suffix};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

pub struct BingXSource {
    base_url: String,
    client: reqwest::Client,
}

impl BingXSource {
    pub fn new(base_url: &str, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[derive(Deserialize, Debug)]
struct BingXResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Vec<BingXTicker>,
}

#[derive(Deserialize, Debug)]
struct BingXTicker {
    symbol: String,
    price: String,
}

#[async_trait]
impl PriceSource for BingXSource {
    fn name(&self) -> &str {
        "bingx"
    }

    fn asset_class(&self) -> AssetClass {
        AssetClass::Crypto
    }

    #[instrument(name = "BingXFetch", skip(self))]
    async fn fetch(&self) -> Result<Vec<Quote>, SourceError> {
        let url = format!("{}/openApi/swap/v1/ticker/price", self.base_url);
        let response: BingXResponse = get_json(&self.client, self.name(), &url).await?;

        if response.code != 0 {
            return Err(SourceError::Api {
                source_name: self.name().to_string(),
                message: format!("error code {}: {}", response.code, response.msg),
            });
        }

        let quotes: Vec<Quote> = response
            .data
            .iter()
            .filter_map(|ticker| {
                let asset = strip_quote_suffix(&ticker.symbol, &["-USDT", "-USD"])?;
                let price = parse_price(&ticker.price)?;
                Some(Quote::usd(self.name(), asset, price))
            })
            .collect();
        debug!(count = quotes.len(), "BingX quotes fetched");
        Ok(quotes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_bingx_fetch() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/openApi/swap/v1/ticker/price"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{
                    "code": 0,
                    "msg": "",
                    "data": [
                        {"symbol": "BTC-USDT", "price": "65010.5", "time": 1718000000000},
                        {"symbol": "ETH-USD", "price": "3001"},
                        {"symbol": "ETH-BTC", "price": "0.046"},
                        {"symbol": "DOGE-USDT", "price": "0"}
                    ]
                }"#,
            ))
            .mount(&mock_server)
            .await;

        let client = crate::providers::util::http_client(Duration::from_secs(5)).unwrap();
        let source = BingXSource::new(&mock_server.uri(), client);
        let quotes = source.fetch().await.unwrap();

        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes[0].asset, "BTC");
        assert_eq!(quotes[0].price, 65010.5);
        assert_eq!(quotes[1].asset, "ETH");
        assert_eq!(quotes[1].source, "bingx");
    }

    #[tokio::test]
    async fn test_bingx_error_code() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/openApi/swap/v1/ticker/price"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"code": 100410, "msg": "rate limited"}"#),
            )
            .mount(&mock_server)
            .await;

        let client = crate::providers::util::http_client(Duration::from_secs(5)).unwrap();
        let source = BingXSource::new(&mock_server.uri(), client);
        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, SourceError::Api { .. }));
        assert!(err.to_string().contains("rate limited"));
    }
}
