use crate::core::asset::AssetClass;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::debug;

pub const METALS_DEV_API_KEY_ENV: &str = "METALS_DEV_API_KEY";

/// Shortest accepted fetch interval for any asset class.
pub const MIN_REFRESH_SECS: u64 = 10;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ProviderConfig {
    pub base_url: String,
}

impl ProviderConfig {
    fn new(base_url: &str) -> Option<Self> {
        Some(Self {
            base_url: base_url.to_string(),
        })
    }
}

/// Default lifetime of one metals.dev response. The API is keyed and
/// quota-limited, so metals refreshed faster than this reuse the cached one.
pub const METALS_DEV_CACHE_SECS: u64 = 3600;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct MetalsDevConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    #[serde(default = "default_metals_dev_cache_secs")]
    pub cache_secs: u64,
}

fn default_metals_dev_cache_secs() -> u64 {
    METALS_DEV_CACHE_SECS
}

impl MetalsDevConfig {
    /// How long one response is served. Never shorter than the metal refresh
    /// interval, so each upstream call covers at least a full metal cycle and
    /// the currency cycles within it.
    pub fn cache_ttl(&self, refresh: &RefreshConfig) -> Duration {
        Duration::from_secs(self.cache_secs).max(refresh.interval(AssetClass::Metal))
    }

    /// The configured key, or the one from `METALS_DEV_API_KEY`.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(METALS_DEV_API_KEY_ENV).ok())
            .filter(|key| !key.trim().is_empty())
    }
}

/// Upstream sources. A provider absent from a user-supplied `providers`
/// section is disabled.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ProvidersConfig {
    pub binance: Option<ProviderConfig>,
    pub kraken: Option<ProviderConfig>,
    pub kucoin: Option<ProviderConfig>,
    pub bybit: Option<ProviderConfig>,
    pub gate: Option<ProviderConfig>,
    pub bingx: Option<ProviderConfig>,
    pub crypto_com: Option<ProviderConfig>,
    pub bitfinex: Option<ProviderConfig>,
    pub gold_api: Option<ProviderConfig>,
    pub metals_dev: Option<MetalsDevConfig>,
    pub yahoo: Option<ProviderConfig>,
    pub ecb: Option<ProviderConfig>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        ProvidersConfig {
            binance: ProviderConfig::new("https://api.binance.com"),
            kraken: ProviderConfig::new("https://api.kraken.com"),
            kucoin: ProviderConfig::new("https://api.kucoin.com"),
            bybit: ProviderConfig::new("https://api.bybit.com"),
            gate: ProviderConfig::new("https://api.gateio.ws"),
            bingx: ProviderConfig::new("https://open-api.bingx.com"),
            crypto_com: ProviderConfig::new("https://api.crypto.com"),
            bitfinex: ProviderConfig::new("https://api-pub.bitfinex.com"),
            gold_api: ProviderConfig::new("https://api.gold-api.com"),
            metals_dev: Some(MetalsDevConfig {
                base_url: "https://api.metals.dev".to_string(),
                api_key: None,
                cache_secs: METALS_DEV_CACHE_SECS,
            }),
            yahoo: ProviderConfig::new("https://query1.finance.yahoo.com"),
            ecb: ProviderConfig::new("https://www.ecb.europa.eu"),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct AssetsConfig {
    /// Fiat currencies priced through Yahoo Finance.
    pub currencies: Vec<String>,
    pub stocks: Vec<String>,
    /// When set, only these crypto assets are kept.
    pub crypto: Option<Vec<String>>,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        let to_vec = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            currencies: to_vec(&[
                "EUR", "GBP", "JPY", "CHF", "CAD", "AUD", "NZD", "CNY", "HKD", "SGD", "INR",
                "SEK", "NOK", "DKK", "PLN", "CZK", "HUF", "TRY", "MXN", "BRL", "ZAR", "KRW",
            ]),
            stocks: to_vec(&["AAPL", "MSFT", "NVDA", "GOOGL", "AMZN", "META", "TSLA"]),
            crypto: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct RefreshConfig {
    pub currency_secs: u64,
    pub metal_secs: u64,
    pub crypto_secs: u64,
    pub stock_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            currency_secs: 3600,
            metal_secs: 30,
            crypto_secs: 30,
            stock_secs: 30,
        }
    }
}

impl RefreshConfig {
    pub fn interval(&self, class: AssetClass) -> Duration {
        let secs = match class {
            AssetClass::Currency => self.currency_secs,
            AssetClass::Metal => self.metal_secs,
            AssetClass::Crypto => self.crypto_secs,
            AssetClass::Stock => self.stock_secs,
        };
        Duration::from_secs(secs.max(MIN_REFRESH_SECS))
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Accepted distance from the median, as a fraction of it.
    pub outlier_band: f64,
    pub source_timeout_secs: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            outlier_band: crate::core::consensus::DEFAULT_OUTLIER_BAND,
            source_timeout_secs: 5,
        }
    }
}

impl ConsensusConfig {
    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs.max(1))
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Disk,
    Memory,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct HistoryConfig {
    pub enabled: bool,
    pub storage: StorageKind,
    pub record_interval_secs: u64,
    pub batch_size: usize,
    pub batch_latency_secs: u64,
    /// Upper bound on buffered points while the store is unreachable.
    pub max_buffer: usize,
    pub aggregation_interval_secs: u64,
    pub raw_retention_hours: i64,
    pub hourly_retention_days: i64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            storage: StorageKind::Disk,
            record_interval_secs: 60,
            batch_size: 1000,
            batch_latency_secs: 5,
            max_buffer: 100_000,
            aggregation_interval_secs: 600,
            raw_retention_hours: 24,
            hourly_retention_days: 90,
        }
    }
}

impl HistoryConfig {
    pub fn raw_retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.raw_retention_hours.max(1))
    }

    pub fn hourly_retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.hourly_retention_days.max(1))
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub assets: AssetsConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub consensus: ConsensusConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    pub data_path: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("dev", "xrate", "xrate")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn default_data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        let proj_dirs = ProjectDirs::from("dev", "xrate", "xrate")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        config.validate()?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let band = self.consensus.outlier_band;
        if !(band.is_finite() && band > 0.0) {
            anyhow::bail!("consensus.outlier_band must be a positive number, got {}", band);
        }
        if self.history.batch_size == 0 {
            anyhow::bail!("history.batch_size must be at least 1");
        }
        Ok(())
    }
}
