use crate::core::asset::{AssetClass, Quote};
use crate::core::error::SourceError;
use crate::core::source::PriceSource;
use crate::providers::util::{get_json, parse_price};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, instrument};

const SUCCESS_CODE: &str = "200000";

pub struct KuCoinSource {
    base_url: String,
    client: reqwest::Client,
}

impl KuCoinSource {
    pub fn new(base_url: &str, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

/// `/api/v1/prices` returns fiat prices keyed by currency, USD by default.
#[derive(Deserialize, Debug)]
struct KuCoinPrices {
    code: String,
    #[serde(default)]
    data: BTreeMap<String, String>,
}

#[async_trait]
impl PriceSource for KuCoinSource {
    fn name(&self) -> &str {
        "kucoin"
    }

    fn asset_class(&self) -> AssetClass {
        AssetClass::Crypto
    }

    #[instrument(name = "KuCoinFetch", skip(self))]
    async fn fetch(&self) -> Result<Vec<Quote>, SourceError> {
        let url = format!("{}/api/v1/prices", self.base_url);
        let response: KuCoinPrices = get_json(&self.client, self.name(), &url).await?;

        if response.code != SUCCESS_CODE {
            return Err(SourceError::Api {
                source_name: self.name().to_string(),
                message: format!("error code {}", response.code),
            });
        }

        let quotes: Vec<Quote> = response
            .data
            .iter()
            .filter_map(|(asset, price)| {
                Some(Quote::usd(self.name(), asset.to_uppercase(), parse_price(price)?))
            })
            .collect();
        debug!(count = quotes.len(), "KuCoin quotes fetched");
        Ok(quotes)
    }
}
