//! Asset classes, source quotes and consensus prices

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

/// The pivot currency every price is ultimately expressed against.
pub const USD: &str = "USD";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Currency,
    Metal,
    Crypto,
    Stock,
}

impl AssetClass {
    pub const ALL: [AssetClass; 4] = [
        AssetClass::Currency,
        AssetClass::Metal,
        AssetClass::Crypto,
        AssetClass::Stock,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::Currency => "currency",
            AssetClass::Metal => "metal",
            AssetClass::Crypto => "crypto",
            AssetClass::Stock => "stock",
        }
    }

    /// Stable single-byte tag used in store keys.
    pub fn tag(&self) -> u8 {
        match self {
            AssetClass::Currency => 1,
            AssetClass::Metal => 2,
            AssetClass::Crypto => 3,
            AssetClass::Stock => 4,
        }
    }
}

impl Display for AssetClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetClass {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "currency" | "fiat" | "forex" => Ok(AssetClass::Currency),
            "metal" | "metals" => Ok(AssetClass::Metal),
            "crypto" | "cryptocurrency" => Ok(AssetClass::Crypto),
            "stock" | "stocks" | "equity" => Ok(AssetClass::Stock),
            _ => Err(anyhow!("Invalid asset type: {}", s)),
        }
    }
}

/// One source's observation of one asset within a fetch cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub source: String,
    pub asset: String,
    pub price: f64,
    /// Currency the price is expressed in. `USD` for everything but stocks,
    /// which are quoted in their native trading currency.
    pub currency: String,
    pub observed_at: DateTime<Utc>,
}

impl Quote {
    pub fn usd(source: &str, asset: impl Into<String>, price: f64) -> Self {
        Self {
            source: source.to_string(),
            asset: asset.into(),
            price,
            currency: USD.to_string(),
            observed_at: Utc::now(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.price.is_finite() && self.price > 0.0 && !self.asset.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusPrice {
    pub asset: String,
    pub price: f64,
    pub currency: String,
    pub sources: Vec<String>,
    pub computed_at: DateTime<Utc>,
    /// Carried over from an earlier cycle because no source answered.
    #[serde(default)]
    pub stale: bool,
}
