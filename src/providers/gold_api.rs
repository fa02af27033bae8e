use crate::core::asset::{AssetClass, Quote};
use crate::core::error::SourceError;
use crate::core::source::PriceSource;
use crate::providers::util::get_json;
use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

pub const GRAMS_PER_TROY_OUNCE: f64 = 31.1034768;
pub const GRAMS_PER_POUND: f64 = 453.59237;

/// Upstream symbol, canonical code and grams per quoted unit.
const METALS: [(&str, &str, f64); 4] = [
    ("XAU", "GOLD", GRAMS_PER_TROY_OUNCE),
    ("XAG", "SILVER", GRAMS_PER_TROY_OUNCE),
    ("XPD", "PALLADIUM", GRAMS_PER_TROY_OUNCE),
    ("HG", "COPPER", GRAMS_PER_POUND),
];

/// gold-api.com spot prices, converted to USD per gram.
pub struct GoldApiSource {
    base_url: String,
    client: reqwest::Client,
}

impl GoldApiSource {
    pub fn new(base_url: &str, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    async fn fetch_metal(&self, symbol: &str) -> Result<f64, SourceError> {
        let url = format!("{}/price/{}", self.base_url, symbol);
        let data: GoldApiPrice = get_json(&self.client, self.name(), &url).await?;
        match data.price {
            Some(price) if price.is_finite() && price > 0.0 => Ok(price),
            other => Err(SourceError::Parse {
                source_name: self.name().to_string(),
                message: format!("invalid price for {}: {:?}", symbol, other),
            }),
        }
    }
}

#[derive(Deserialize, Debug)]
struct GoldApiPrice {
    price: Option<f64>,
}

#[async_trait]
impl PriceSource for GoldApiSource {
    fn name(&self) -> &str {
        "gold-api"
    }

    fn asset_class(&self) -> AssetClass {
        AssetClass::Metal
    }

    #[instrument(name = "GoldApiFetch", skip(self))]
    async fn fetch(&self) -> Result<Vec<Quote>, SourceError> {
        let results = join_all(METALS.iter().map(|(symbol, _, _)| self.fetch_metal(symbol))).await;

        let mut quotes = Vec::new();
        let mut last_error = None;
        for ((symbol, code, grams), result) in METALS.iter().zip(results) {
            match result {
                Ok(price) => quotes.push(Quote::usd(self.name(), *code, price / grams)),
                Err(e) => {
                    warn!(symbol, error = %e, "Failed to fetch metal price");
                    last_error = Some(e);
                }
            }
        }

        match (quotes.is_empty(), last_error) {
            (true, Some(e)) => Err(e),
            _ => {
                debug!(count = quotes.len(), "gold-api quotes fetched");
                Ok(quotes)
            }
        }
    }
}
