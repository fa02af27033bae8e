use crate::core::asset::{AssetClass, Quote, USD};
use crate::core::cache::Cache;
use crate::core::error::SourceError;
use crate::core::source::PriceSource;
use crate::providers::util::get_json;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

const SOURCE_NAME: &str = "metals.dev";
const LATEST_KEY: &str = "latest";

#[derive(Deserialize, Debug)]
struct MetalsDevResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    /// USD per gram.
    #[serde(default)]
    metals: BTreeMap<String, f64>,
    /// USD per unit of currency.
    #[serde(default)]
    currencies: BTreeMap<String, f64>,
}

/// One `/v1/latest` response feeds both the metal and the currency source,
/// so it is cached for a short while.
pub struct MetalsDevClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    cache: Cache<&'static str, Arc<MetalsDevResponse>>,
}

impl MetalsDevClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        client: reqwest::Client,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
            cache: Cache::new(cache_ttl),
        }
    }

    async fn latest(&self) -> Result<Arc<MetalsDevResponse>, SourceError> {
        if let Some(cached) = self.cache.get(&LATEST_KEY).await {
            return Ok(cached);
        }

        let url = format!(
            "{}/v1/latest?api_key={}&currency={}&unit=g",
            self.base_url, self.api_key, USD
        );
        let response: MetalsDevResponse = get_json(&self.client, SOURCE_NAME, &url).await?;
        if response.status != "success" {
            return Err(SourceError::Api {
                source_name: SOURCE_NAME.to_string(),
                message: response
                    .error_message
                    .unwrap_or_else(|| format!("status {}", response.status)),
            });
        }

        let response = Arc::new(response);
        self.cache.put(LATEST_KEY, Arc::clone(&response)).await;
        Ok(response)
    }
}

/// metals.dev as a source of either metal or currency prices.
pub struct MetalsDevSource {
    client: Arc<MetalsDevClient>,
    class: AssetClass,
}

impl MetalsDevSource {
    pub fn metals(client: Arc<MetalsDevClient>) -> Self {
        Self {
            client,
            class: AssetClass::Metal,
        }
    }

    pub fn currencies(client: Arc<MetalsDevClient>) -> Self {
        Self {
            client,
            class: AssetClass::Currency,
        }
    }
}

#[async_trait]
impl PriceSource for MetalsDevSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn asset_class(&self) -> AssetClass {
        self.class
    }

    #[instrument(name = "MetalsDevFetch", skip(self), fields(class = %self.class))]
    async fn fetch(&self) -> Result<Vec<Quote>, SourceError> {
        let latest = self.client.latest().await?;

        let quotes: Vec<Quote> = match self.class {
            // keys such as `lbma_gold_am` are fixings, not spot prices
            AssetClass::Metal => latest
                .metals
                .iter()
                .filter(|(metal, _)| !metal.contains('_'))
                .map(|(metal, price)| Quote::usd(SOURCE_NAME, metal.to_uppercase(), *price))
                .collect(),
            _ => latest
                .currencies
                .iter()
                .filter(|(code, _)| code.as_str() != USD)
                .map(|(code, price)| Quote::usd(SOURCE_NAME, code.to_uppercase(), *price))
                .collect(),
        };
        let quotes: Vec<Quote> = quotes.into_iter().filter(Quote::is_valid).collect();
        debug!(count = quotes.len(), "metals.dev quotes fetched");
        Ok(quotes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BODY: &str = r#"{
        "status": "success",
        "currency": "USD",
        "unit": "g",
        "metals": {"gold": 80.12, "silver": 0.95, "lbma_gold_am": 80.0},
        "currencies": {"EUR": 1.085, "GBP": 1.27, "USD": 1.0}
    }"#;

    #[tokio::test]
    async fn test_metals_dev_serves_both_classes_from_one_request() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/latest"))
            .and(query_param("api_key", "k"))
            .and(query_param("unit", "g"))
            .respond_with(ResponseTemplate::new(200).set_body_string(BODY))
            .expect(1)
            .mount(&mock_server)
            .await;

        let http = crate::providers::util::http_client(Duration::from_secs(5)).unwrap();
        let client = Arc::new(MetalsDevClient::new(
            &mock_server.uri(),
            "k",
            http,
            Duration::from_secs(60),
        ));
        let metals = MetalsDevSource::metals(Arc::clone(&client)).fetch().await.unwrap();
        let currencies = MetalsDevSource::currencies(client).fetch().await.unwrap();

        assert_eq!(metals.len(), 2);
        assert_eq!(metals[0].asset, "GOLD");
        assert_eq!(metals[0].price, 80.12);
        assert_eq!(metals[1].asset, "SILVER");

        assert_eq!(currencies.len(), 2);
        assert_eq!(currencies[0].asset, "EUR");
        assert_eq!(currencies[0].price, 1.085);
    }

    #[tokio::test]
    async fn test_metals_dev_failure_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"status": "failure", "error_code": 1101, "error_message": "Invalid API key"}"#,
            ))
            .mount(&mock_server)
            .await;

        let http = crate::providers::util::http_client(Duration::from_secs(5)).unwrap();
        let client = Arc::new(MetalsDevClient::new(
            &mock_server.uri(),
            "bad",
            http,
            Duration::from_secs(60),
        ));
        let err = MetalsDevSource::metals(client).fetch().await.unwrap_err();
        assert_eq!(err.to_string(), "API error from metals.dev: Invalid API key");
    }
}
