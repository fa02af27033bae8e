use crate::core::asset::{AssetClass, Quote};
use crate::core::error::SourceError;
use crate::core::source::PriceSource;
use crate::providers::util::{get_json, parse_price, strip_quote_suffix};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

pub struct BinanceSource {
    base_url: String,
    client: reqwest::Client,
}

impl BinanceSource {
    pub fn new(base_url: &str, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[derive(Deserialize, Debug)]
struct BinanceTicker {
    symbol: String,
    price: String,
}

#[async_trait]
impl PriceSource for BinanceSource {
    fn name(&self) -> &str {
        "binance"
    }

    fn asset_class(&self) -> AssetClass {
        AssetClass::Crypto
    }

    #[instrument(name = "BinanceFetch", skip(self))]
    async fn fetch(&self) -> Result<Vec<Quote>, SourceError> {
        let url = format!("{}/api/v3/ticker/price", self.base_url);
        let tickers: Vec<BinanceTicker> = get_json(&self.client, self.name(), &url).await?;

        let quotes: Vec<Quote> = tickers
            .iter()
            .filter_map(|ticker| {
                let asset = strip_quote_suffix(&ticker.symbol, &["USDT"])?;
                let price = parse_price(&ticker.price)?;
                Some(Quote::usd(self.name(), asset, price))
            })
            .collect();
        debug!(count = quotes.len(), "Binance quotes fetched");
        Ok(quotes)
    }
}
