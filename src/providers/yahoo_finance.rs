use crate::core::asset::{AssetClass, Quote, USD};
use crate::core::error::SourceError;
use crate::core::source::PriceSource;
use crate::providers::util::get_json;
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

const SOURCE_NAME: &str = "yahoo";

#[derive(Deserialize, Debug)]
struct YahooChartResponse {
    chart: ChartResult,
}

#[derive(Deserialize, Debug)]
struct ChartResult {
    result: Option<Vec<ChartItem>>,
}

#[derive(Deserialize, Debug)]
struct ChartItem {
    meta: ChartMeta,
}

#[derive(Deserialize, Debug)]
struct ChartMeta {
    #[serde(alias = "regularMarketPrice")]
    regular_market_price: Option<f64>,
    currency: Option<String>,
}

/// Yahoo quotes a few markets in minor units (pence, cents, agorot).
fn normalize_minor_unit(price: f64, currency: &str) -> (f64, String) {
    match currency {
        "GBp" | "GBX" => (price / 100.0, "GBP".to_string()),
        "ZAc" | "ZAC" => (price / 100.0, "ZAR".to_string()),
        "ILA" => (price / 100.0, "ILS".to_string()),
        other => (price, other.to_uppercase()),
    }
}

/// Shared chart endpoint access for the currency and stock sources.
struct YahooChart {
    base_url: String,
    client: reqwest::Client,
}

impl YahooChart {
    fn new(base_url: &str, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    #[instrument(name = "YahooChartFetch", skip(self), fields(symbol = %symbol))]
    async fn price(&self, symbol: &str) -> Result<(f64, Option<String>), SourceError> {
        let url = format!("{}/v8/finance/chart/{}", self.base_url, symbol);
        let data: YahooChartResponse = get_json(&self.client, SOURCE_NAME, &url).await?;
        let meta = data
            .chart
            .result
            .and_then(|items| items.into_iter().next())
            .map(|item| item.meta)
            .ok_or_else(|| SourceError::Api {
                source_name: SOURCE_NAME.to_string(),
                message: format!("No price data found for symbol: {}", symbol),
            })?;
        match meta.regular_market_price {
            Some(price) if price.is_finite() && price > 0.0 => Ok((price, meta.currency)),
            _ => Err(SourceError::Parse {
                source_name: SOURCE_NAME.to_string(),
                message: format!("missing market price for {}", symbol),
            }),
        }
    }

    /// Fetches every symbol concurrently. Individual failures are logged and
    /// skipped; the call fails only when nothing could be fetched.
    async fn prices(
        &self,
        symbols: &[String],
    ) -> Result<Vec<(String, f64, Option<String>)>, SourceError> {
        let results = join_all(symbols.iter().map(|symbol| self.price(symbol))).await;

        let mut prices = Vec::new();
        let mut last_error = None;
        for (symbol, result) in symbols.iter().zip(results) {
            match result {
                Ok((price, currency)) => prices.push((symbol.clone(), price, currency)),
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Yahoo Finance request failed");
                    last_error = Some(e);
                }
            }
        }
        match (prices.is_empty(), last_error) {
            (true, Some(e)) => Err(e),
            _ => Ok(prices),
        }
    }
}

/// Fiat currencies through the `{CODE}USD=X` pairs, i.e. USD per unit.
pub struct YahooCurrencySource {
    chart: YahooChart,
    currencies: Vec<String>,
}

impl YahooCurrencySource {
    pub fn new(base_url: &str, client: reqwest::Client, currencies: &[String]) -> Self {
        Self {
            chart: YahooChart::new(base_url, client),
            currencies: currencies
                .iter()
                .map(|c| c.to_uppercase())
                .filter(|c| c != USD)
                .collect(),
        }
    }
}

#[async_trait]
impl PriceSource for YahooCurrencySource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn asset_class(&self) -> AssetClass {
        AssetClass::Currency
    }

    async fn fetch(&self) -> Result<Vec<Quote>, SourceError> {
        let symbols: Vec<String> = self
            .currencies
            .iter()
            .map(|code| format!("{code}{USD}=X"))
            .collect();
        let prices = self.chart.prices(&symbols).await?;

        let quotes: Vec<Quote> = prices
            .into_iter()
            .filter_map(|(symbol, price, _)| {
                let code = symbol.strip_suffix("USD=X")?;
                Some(Quote::usd(SOURCE_NAME, code, price))
            })
            .collect();
        debug!(count = quotes.len(), "Yahoo currency quotes fetched");
        Ok(quotes)
    }
}

/// Equities in their native trading currency.
pub struct YahooStockSource {
    chart: YahooChart,
    symbols: Vec<String>,
}

impl YahooStockSource {
    pub fn new(base_url: &str, client: reqwest::Client, symbols: &[String]) -> Self {
        Self {
            chart: YahooChart::new(base_url, client),
            symbols: symbols.iter().map(|s| s.to_uppercase()).collect(),
        }
    }
}

#[async_trait]
impl PriceSource for YahooStockSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn asset_class(&self) -> AssetClass {
        AssetClass::Stock
    }

    async fn fetch(&self) -> Result<Vec<Quote>, SourceError> {
        let prices = self.chart.prices(&self.symbols).await?;
        let observed_at = Utc::now();

        let quotes: Vec<Quote> = prices
            .into_iter()
            .map(|(symbol, price, currency)| {
                let (price, currency) =
                    normalize_minor_unit(price, currency.as_deref().unwrap_or(USD));
                Quote {
                    source: SOURCE_NAME.to_string(),
                    asset: symbol,
                    price,
                    currency,
                    observed_at,
                }
            })
            .collect();
        debug!(count = quotes.len(), "Yahoo stock quotes fetched");
        Ok(quotes)
    }
}
