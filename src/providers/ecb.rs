use crate::core::asset::{AssetClass, Quote, USD};
use crate::core::error::SourceError;
use crate::core::source::PriceSource;
use crate::providers::util::{get_xml, parse_price};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, instrument};

const SOURCE_NAME: &str = "ecb";
const EUR: &str = "EUR";

/// European Central Bank daily reference rates. Published once per working
/// day as units of each currency per euro; re-expressed here as USD per unit.
pub struct EcbSource {
    base_url: String,
    client: reqwest::Client,
    currencies: Vec<String>,
}

impl EcbSource {
    pub fn new(base_url: &str, client: reqwest::Client, currencies: &[String]) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            currencies: currencies
                .iter()
                .map(|c| c.to_uppercase())
                .filter(|c| c != USD)
                .collect(),
        }
    }
}

#[derive(Deserialize, Debug)]
struct Envelope {
    #[serde(rename = "Cube")]
    cube: OuterCube,
}

#[derive(Deserialize, Debug)]
struct OuterCube {
    #[serde(rename = "Cube")]
    day: DayCube,
}

#[derive(Deserialize, Debug)]
struct DayCube {
    #[serde(rename = "@time")]
    time: String,
    #[serde(rename = "Cube", default)]
    rates: Vec<RateCube>,
}

#[derive(Deserialize, Debug)]
struct RateCube {
    #[serde(rename = "@currency")]
    currency: String,
    #[serde(rename = "@rate")]
    rate: String,
}

/// USD per unit of every currency in `per_eur`, EUR included.
fn usd_prices(per_eur: &HashMap<String, f64>) -> Option<HashMap<String, f64>> {
    let usd_per_eur = *per_eur.get(USD)?;
    let mut prices: HashMap<String, f64> = per_eur
        .iter()
        .filter(|(code, _)| code.as_str() != USD)
        .map(|(code, rate)| (code.clone(), usd_per_eur / rate))
        .collect();
    prices.insert(EUR.to_string(), usd_per_eur);
    Some(prices)
}

#[async_trait]
impl PriceSource for EcbSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn asset_class(&self) -> AssetClass {
        AssetClass::Currency
    }

    #[instrument(name = "EcbFetch", skip(self))]
    async fn fetch(&self) -> Result<Vec<Quote>, SourceError> {
        let url = format!("{}/stats/eurofxref/eurofxref-daily.xml", self.base_url);
        let envelope: Envelope = get_xml(&self.client, SOURCE_NAME, &url).await?;
        let day = envelope.cube.day;

        let per_eur: HashMap<String, f64> = day
            .rates
            .iter()
            .filter_map(|cube| Some((cube.currency.to_uppercase(), parse_price(&cube.rate)?)))
            .collect();
        let prices = usd_prices(&per_eur).ok_or_else(|| SourceError::Api {
            source_name: SOURCE_NAME.to_string(),
            message: format!("no USD reference rate published for {}", day.time),
        })?;

        let quotes: Vec<Quote> = self
            .currencies
            .iter()
            .filter_map(|code| {
                let price = prices.get(code)?;
                Some(Quote::usd(SOURCE_NAME, code.as_str(), *price))
            })
            .collect();
        debug!(count = quotes.len(), date = %day.time, "ECB reference rates fetched");
        Ok(quotes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DAILY_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gesmes:Envelope xmlns:gesmes="http://www.gesmes.org/xml/2002-08-01" xmlns="http://www.ecb.int/vocabulary/2002-08-01/eurofxref">
    <gesmes:subject>Reference rates</gesmes:subject>
    <gesmes:Sender>
        <gesmes:name>European Central Bank</gesmes:name>
    </gesmes:Sender>
    <Cube>
        <Cube time='2025-03-14'>
            <Cube currency='USD' rate='1.25'/>
            <Cube currency='JPY' rate='160.00'/>
            <Cube currency='GBP' rate='0.8'/>
            <Cube currency='CHF' rate='0.95'/>
        </Cube>
    </Cube>
</gesmes:Envelope>"#;

    fn currencies(codes: &[&str]) -> Vec<String> {
        codes.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_usd_prices_from_euro_rates() {
        let per_eur = HashMap::from([("USD".to_string(), 1.25), ("GBP".to_string(), 0.8)]);
        let prices = usd_prices(&per_eur).unwrap();
        assert_eq!(prices.get("EUR"), Some(&1.25));
        assert!((prices["GBP"] - 1.5625).abs() < 1e-12);
        assert!(!prices.contains_key("USD"));

        let no_usd = HashMap::from([("GBP".to_string(), 0.8)]);
        assert!(usd_prices(&no_usd).is_none());
    }

    #[tokio::test]
    async fn test_ecb_fetch() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stats/eurofxref/eurofxref-daily.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(DAILY_XML))
            .mount(&mock_server)
            .await;

        let client = crate::providers::util::http_client(Duration::from_secs(5)).unwrap();
        let source = EcbSource::new(
            &mock_server.uri(),
            client,
            &currencies(&["eur", "JPY", "GBP", "USD", "KRW"]),
        );
        let quotes = source.fetch().await.unwrap();

        assert_eq!(quotes.len(), 3);
        assert_eq!(quotes[0].asset, "EUR");
        assert_eq!(quotes[0].price, 1.25);
        assert_eq!(quotes[1].asset, "JPY");
        assert!((quotes[1].price - 1.25 / 160.0).abs() < 1e-12);
        assert_eq!(quotes[2].asset, "GBP");
        assert!((quotes[2].price - 1.5625).abs() < 1e-12);
        assert!(quotes.iter().all(|q| q.currency == USD && q.source == "ecb"));
    }

    #[tokio::test]
    async fn test_ecb_without_usd_rate_fails() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stats/eurofxref/eurofxref-daily.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<gesmes:Envelope><Cube><Cube time='2025-03-14'><Cube currency='GBP' rate='0.8'/></Cube></Cube></gesmes:Envelope>"#,
            ))
            .mount(&mock_server)
            .await;

        let client = crate::providers::util::http_client(Duration::from_secs(5)).unwrap();
        let source = EcbSource::new(&mock_server.uri(), client, &currencies(&["GBP"]));
        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, SourceError::Api { .. }));
        assert!(err.to_string().contains("2025-03-14"));
    }

    #[tokio::test]
    async fn test_ecb_malformed_body_is_parse_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stats/eurofxref/eurofxref-daily.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&mock_server)
            .await;

        let client = crate::providers::util::http_client(Duration::from_secs(5)).unwrap();
        let source = EcbSource::new(&mock_server.uri(), client, &currencies(&["GBP"]));
        let err = source.fetch().await.unwrap_err();
        assert!(matches!(err, SourceError::Parse { .. }));
    }
}
