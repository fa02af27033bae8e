use crate::core::asset::{AssetClass, Quote};
use crate::core::error::SourceError;
use crate::core::source::PriceSource;
use crate::providers::util::{get_json, parse_price, strip_quote_suffix};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

pub struct GateSource {
    base_url: String,
    client: reqwest::Client,
}

impl GateSource {
    pub fn new(base_url: &str, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[derive(Deserialize, Debug)]
struct GateTicker {
    currency_pair: String,
    last: String,
}

#[async_trait]
impl PriceSource for GateSource {
    fn name(&self) -> &str {
        "gate"
    }

    fn asset_class(&self) -> AssetClass {
        AssetClass::Crypto
    }

    #[instrument(name = "GateFetch", skip(self))]
    async fn fetch(&self) -> Result<Vec<Quote>, SourceError> {
        let url = format!("{}/api/v4/spot/tickers", self.base_url);
        let tickers: Vec<GateTicker> = get_json(&self.client, self.name(), &url).await?;

        let quotes: Vec<Quote> = tickers
            .iter()
            .filter_map(|ticker| {
                let asset = strip_quote_suffix(&ticker.currency_pair, &["_USDT", "_USD"])?;
                let price = parse_price(&ticker.last)?;
                Some(Quote::usd(self.name(), asset, price))
            })
            .collect();
        debug!(count = quotes.len(), "Gate quotes fetched");
        Ok(quotes)
    }
}
