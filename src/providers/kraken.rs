use crate::core::asset::{AssetClass, Quote};
use crate::core::error::SourceError;
use crate::core::source::PriceSource;
use crate::providers::util::{get_json, parse_price, strip_quote_suffix};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, instrument};

pub struct KrakenSource {
    base_url: String,
    client: reqwest::Client,
}

impl KrakenSource {
    pub fn new(base_url: &str, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[derive(Deserialize, Debug)]
struct KrakenResponse {
    #[serde(default)]
    error: Vec<String>,
    #[serde(default)]
    result: HashMap<String, KrakenTicker>,
}

#[derive(Deserialize, Debug)]
struct KrakenTicker {
    /// Last trade: `[price, lot volume]`.
    c: Vec<String>,
}

/// Maps a Kraken USD pair to a canonical asset code. Kraken still uses
/// legacy `X`-prefixed four letter codes for older assets, and `Z`-prefixed
/// codes for fiat, which are skipped.
fn normalize_pair(pair: &str) -> Option<String> {
    let base = strip_quote_suffix(pair, &["USDT", "USD"])?;
    // XXBTZUSD -> XXBT, USDTZUSD -> USDT
    let base = match base.strip_suffix('Z') {
        Some(fiat) if fiat.len() == 4 && fiat.starts_with('Z') => return None,
        Some(code) if code.len() == 4 => code,
        _ => base,
    };
    let canonical = match base {
        "XBT" | "XXBT" => "BTC",
        "XETH" => "ETH",
        "XDG" | "XXDG" => "DOGE",
        "XXRP" => "XRP",
        "XXMR" => "XMR",
        "XXLM" => "XLM",
        "XZEC" => "ZEC",
        "XLTC" => "LTC",
        "XETC" => "ETC",
        other => other,
    };
    Some(canonical.to_string())
}

#[async_trait]
impl PriceSource for KrakenSource {
    fn name(&self) -> &str {
        "kraken"
    }

    fn asset_class(&self) -> AssetClass {
        AssetClass::Crypto
    }

    #[instrument(name = "KrakenFetch", skip(self))]
    async fn fetch(&self) -> Result<Vec<Quote>, SourceError> {
        let url = format!("{}/0/public/Ticker", self.base_url);
        let response: KrakenResponse = get_json(&self.client, self.name(), &url).await?;

        if !response.error.is_empty() {
            return Err(SourceError::Api {
                source_name: self.name().to_string(),
                message: response.error.join(", "),
            });
        }

        let mut quotes: Vec<Quote> = response
            .result
            .iter()
            .filter_map(|(pair, ticker)| {
                let asset = normalize_pair(pair)?;
                let price = parse_price(ticker.c.first()?)?;
                Some(Quote::usd(self.name(), asset, price))
            })
            .collect();
        quotes.sort_by(|a, b| a.asset.cmp(&b.asset));
        debug!(count = quotes.len(), "Kraken quotes fetched");
        Ok(quotes)
    }
}
