use crate::core::asset::{AssetClass, Quote};
use crate::core::error::SourceError;
use crate::core::source::PriceSource;
use crate::providers::util::{get_json, parse_price, strip_quote_suffix};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

pub struct BybitSource {
    base_url: String,
    client: reqwest::Client,
}

impl BybitSource {
    pub fn new(base_url: &str, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[derive(Deserialize, Debug)]
struct BybitResponse {
    #[serde(alias = "retCode")]
    ret_code: i64,
    #[serde(alias = "retMsg", default)]
    ret_msg: String,
    result: Option<BybitResult>,
}

#[derive(Deserialize, Debug)]
struct BybitResult {
    #[serde(default)]
    list: Vec<BybitTicker>,
}

#[derive(Deserialize, Debug)]
struct BybitTicker {
    symbol: String,
    #[serde(alias = "lastPrice")]
    last_price: String,
}

#[async_trait]
impl PriceSource for BybitSource {
    fn name(&self) -> &str {
        "bybit"
    }

    fn asset_class(&self) -> AssetClass {
        AssetClass::Crypto
    }

    #[instrument(name = "BybitFetch", skip(self))]
    async fn fetch(&self) -> Result<Vec<Quote>, SourceError> {
        let url = format!("{}/v5/market/tickers?category=spot", self.base_url);
        let response: BybitResponse = get_json(&self.client, self.name(), &url).await?;

        if response.ret_code != 0 {
            return Err(SourceError::Api {
                source_name: self.name().to_string(),
                message: format!("error code {}: {}", response.ret_code, response.ret_msg),
            });
        }

        let quotes: Vec<Quote> = response
            .result
            .map(|r| r.list)
            .unwrap_or_default()
            .iter()
            .filter_map(|ticker| {
                let asset = strip_quote_suffix(&ticker.symbol, &["USDT", "USD"])?;
                let price = parse_price(&ticker.last_price)?;
                Some(Quote::usd(self.name(), asset, price))
            })
            .collect();
        debug!(count = quotes.len(), "Bybit quotes fetched");
        Ok(quotes)
    }
}
