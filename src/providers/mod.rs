pub mod binance;
pub mod bingx;
pub mod bitfinex;
pub mod bybit;
pub mod crypto_com;
pub mod ecb;
pub mod gate;
pub mod gold_api;
pub mod kraken;
pub mod kucoin;
pub mod metals_dev;
pub mod util;
pub mod yahoo_finance;

use crate::core::config::AppConfig;
use crate::core::source::PriceSource;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, warn};

/// Instantiates every source enabled in `config`.
pub fn build_sources(config: &AppConfig) -> Result<Vec<Arc<dyn PriceSource>>> {
    let client = util::http_client(config.consensus.source_timeout())
        .context("Failed to create HTTP client")?;
    let providers = &config.providers;
    let mut sources: Vec<Arc<dyn PriceSource>> = Vec::new();

    if let Some(p) = &providers.binance {
        sources.push(Arc::new(binance::BinanceSource::new(&p.base_url, client.clone())));
    }
    if let Some(p) = &providers.kraken {
        sources.push(Arc::new(kraken::KrakenSource::new(&p.base_url, client.clone())));
    }
    if let Some(p) = &providers.kucoin {
        sources.push(Arc::new(kucoin::KuCoinSource::new(&p.base_url, client.clone())));
    }
    if let Some(p) = &providers.bybit {
        sources.push(Arc::new(bybit::BybitSource::new(&p.base_url, client.clone())));
    }
    if let Some(p) = &providers.gate {
        sources.push(Arc::new(gate::GateSource::new(&p.base_url, client.clone())));
    }
    if let Some(p) = &providers.bingx {
        sources.push(Arc::new(bingx::BingXSource::new(&p.base_url, client.clone())));
    }
    if let Some(p) = &providers.crypto_com {
        sources.push(Arc::new(crypto_com::CryptoComSource::new(&p.base_url, client.clone())));
    }
    if let Some(p) = &providers.bitfinex {
        sources.push(Arc::new(bitfinex::BitfinexSource::new(&p.base_url, client.clone())));
    }
    if let Some(p) = &providers.gold_api {
        sources.push(Arc::new(gold_api::GoldApiSource::new(&p.base_url, client.clone())));
    }
    if let Some(p) = &providers.metals_dev {
        match p.resolved_api_key() {
            Some(key) => {
                let shared = Arc::new(metals_dev::MetalsDevClient::new(
                    &p.base_url,
                    &key,
                    client.clone(),
                    p.cache_ttl(&config.refresh),
                ));
                sources.push(Arc::new(metals_dev::MetalsDevSource::metals(Arc::clone(&shared))));
                sources.push(Arc::new(metals_dev::MetalsDevSource::currencies(shared)));
            }
            None => warn!(
                "metals.dev is enabled but no API key is configured (set {}); skipping it",
                crate::core::config::METALS_DEV_API_KEY_ENV
            ),
        }
    }
    if let Some(p) = &providers.ecb {
        if !config.assets.currencies.is_empty() {
            sources.push(Arc::new(ecb::EcbSource::new(
                &p.base_url,
                client.clone(),
                &config.assets.currencies,
            )));
        }
    }
    if let Some(p) = &providers.yahoo {
        if !config.assets.currencies.is_empty() {
            sources.push(Arc::new(yahoo_finance::YahooCurrencySource::new(
                &p.base_url,
                client.clone(),
                &config.assets.currencies,
            )));
        }
        if !config.assets.stocks.is_empty() {
            sources.push(Arc::new(yahoo_finance::YahooStockSource::new(
                &p.base_url,
                client,
                &config.assets.stocks,
            )));
        }
    }

    debug!(count = sources.len(), "Price sources configured");
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::asset::AssetClass;
    use crate::core::config::ProvidersConfig;

    #[test]
    fn test_default_sources_cover_every_class() {
        let mut config = AppConfig::default();
        if let Some(metals_dev) = config.providers.metals_dev.as_mut() {
            metals_dev.api_key = Some("key".to_string());
        }
        let sources = build_sources(&config).unwrap();
        for class in AssetClass::ALL {
            assert!(
                sources.iter().any(|s| s.asset_class() == class),
                "no source for {class}"
            );
        }
        assert_eq!(
            sources
                .iter()
                .filter(|s| s.asset_class() == AssetClass::Crypto)
                .count(),
            8
        );
        assert_eq!(
            sources
                .iter()
                .filter(|s| s.asset_class() == AssetClass::Currency)
                .count(),
            3
        );
    }

    #[test]
    fn test_missing_providers_are_disabled() {
        let config = AppConfig {
            providers: ProvidersConfig {
                binance: None,
                kraken: None,
                kucoin: None,
                bybit: None,
                gate: None,
                bingx: None,
                crypto_com: None,
                bitfinex: None,
                gold_api: None,
                metals_dev: None,
                yahoo: None,
                ecb: None,
            },
            ..AppConfig::default()
        };
        assert!(build_sources(&config).unwrap().is_empty());
    }
}
