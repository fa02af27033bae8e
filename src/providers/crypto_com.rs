use crate::core::asset::{AssetClass, Quote};
use crate::core::error::SourceError;
use crate::core::source::PriceSource;
use crate::providers::util::{get_json, parse_price, strip_quote_suffix};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

pub struct CryptoComSource {
    base_url: String,
    client: reqwest::Client,
}

impl CryptoComSource {
    pub fn new(base_url: &str, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[derive(Deserialize, Debug)]
struct CryptoComResponse {
    code: i64,
    #[serde(default)]
    message: String,
    result: Option<CryptoComResult>,
}

#[derive(Deserialize, Debug)]
struct CryptoComResult {
    #[serde(default)]
    data: Vec<CryptoComTicker>,
}

/// Tickers use one-letter keys: `i` instrument, `a` last traded price.
#[derive(Deserialize, Debug)]
struct CryptoComTicker {
    i: String,
    a: Option<String>,
}

#[async_trait]
impl PriceSource for CryptoComSource {
    fn name(&self) -> &str {
        "crypto.com"
    }

    fn asset_class(&self) -> AssetClass {
        AssetClass::Crypto
    }

    #[instrument(name = "CryptoComFetch", skip(self))]
    async fn fetch(&self) -> Result<Vec<Quote>, SourceError> {
        let url = format!("{}/exchange/v1/public/get-tickers", self.base_url);
        let response: CryptoComResponse = get_json(&self.client, self.name(), &url).await?;

        if response.code != 0 {
            return Err(SourceError::Api {
                source_name: self.name().to_string(),
                message: format!("error code {}: {}", response.code, response.message),
            });
        }

        let quotes: Vec<Quote> = response
            .result
            .map(|r| r.data)
            .unwrap_or_default()
            .iter()
            .filter_map(|ticker| {
                let asset = strip_quote_suffix(&ticker.i, &["_USDT", "_USD"])?;
                let price = parse_price(ticker.a.as_deref()?)?;
                Some(Quote::usd(self.name(), asset, price))
            })
            .collect();
        debug!(count = quotes.len(), "Crypto.com quotes fetched");
        Ok(quotes)
    }
}
