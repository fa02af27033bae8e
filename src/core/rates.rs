//! Cross-rate matrices derived from USD pivot prices.
//!
//! Currencies and metals share one forex matrix, crypto gets its own matrix
//! against itself and every forex asset, and stocks pivot through their
//! native trading currency. Pairs that no single matrix covers are resolved
//! with two hops through USD.
//!
//! Matrices keep full precision. Rounding happens in [`round_rate`] when a
//! rate is handed to a caller.

use crate::core::asset::{AssetClass, USD};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

const ROUNDING_STEPS: [(f64, i32); 7] = [
    (1.0, 4),
    (0.1, 5),
    (0.01, 6),
    (0.001, 7),
    (0.0001, 8),
    (0.00001, 9),
    (0.000001, 10),
];

/// Rounds a rate with magnitude-adaptive precision: 4 decimals at or above 1,
/// one more decimal for every order of magnitude below that, and no rounding
/// at all under 1e-6 so tiny crypto-denominated rates never collapse to 0.
pub fn round_rate(rate: f64) -> f64 {
    if !rate.is_finite() {
        return rate;
    }
    for (floor, decimals) in ROUNDING_STEPS {
        if rate >= floor {
            let factor = 10f64.powi(decimals);
            return (rate * factor).round() / factor;
        }
    }
    rate
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RateMatrix {
    rates: HashMap<String, HashMap<String, f64>>,
}

impl RateMatrix {
    pub fn get(&self, from: &str, to: &str) -> Option<f64> {
        self.rates.get(from).and_then(|row| row.get(to)).copied()
    }

    pub fn contains(&self, asset: &str) -> bool {
        self.rates.contains_key(asset)
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    fn set(&mut self, from: &str, to: &str, rate: f64) {
        if rate.is_finite() && rate > 0.0 {
            self.rates
                .entry(from.to_string())
                .or_default()
                .insert(to.to_string(), rate);
        }
    }

    /// Full pairwise matrix over assets priced in USD. `usd` must contain the
    /// pivot itself for USD rows and columns to be present.
    pub fn from_usd_prices(usd: &BTreeMap<String, f64>) -> Self {
        let mut matrix = Self::default();
        for (from, from_usd) in usd {
            for (to, to_usd) in usd {
                let rate = if from == to {
                    1.0
                } else if from == USD {
                    1.0 / to_usd
                } else if to == USD {
                    *from_usd
                } else {
                    from_usd / to_usd
                };
                matrix.set(from, to, rate);
            }
        }
        matrix
    }

    /// Crypto rows against every crypto and forex asset, plus the forex rows
    /// pointing back at crypto.
    pub fn crypto(crypto_usd: &BTreeMap<String, f64>, forex_usd: &BTreeMap<String, f64>) -> Self {
        let mut matrix = Self::default();
        for (crypto, price) in crypto_usd {
            for (other, other_price) in crypto_usd {
                let rate = if crypto == other { 1.0 } else { price / other_price };
                matrix.set(crypto, other, rate);
            }
            matrix.set(crypto, USD, *price);
            matrix.set(USD, crypto, 1.0 / price);

            for (forex, forex_price) in forex_usd {
                if forex == USD {
                    continue;
                }
                matrix.set(crypto, forex, price / forex_price);
                matrix.set(forex, crypto, forex_price / price);
            }
        }
        matrix
    }

    /// Stock rows against every forex asset, priced through the stock's
    /// native currency. The forex matrix is complete, so a native currency it
    /// knows reaches every target and one it does not leaves the stock
    /// without rows.
    pub fn stocks(stocks: &BTreeMap<String, NativePrice>, forex: &RateMatrix) -> Self {
        let mut matrix = Self::default();
        for (stock, native) in stocks {
            let Some(row) = forex.rates.get(&native.currency) else {
                continue;
            };
            matrix.set(stock, stock, 1.0);
            for (target, rate) in row {
                let value = native.price * rate;
                matrix.set(stock, target, value);
                matrix.set(target, stock, 1.0 / value);
            }
        }
        matrix
    }
}

/// A price in an instrument's own trading currency.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NativePrice {
    pub price: f64,
    pub currency: String,
}

/// Per-class pivot prices a [`Rates`] snapshot is built from.
#[derive(Debug, Clone, Default)]
pub struct RateInputs {
    pub currencies: BTreeMap<String, f64>,
    pub metals: BTreeMap<String, f64>,
    pub crypto: BTreeMap<String, f64>,
    pub stocks: BTreeMap<String, NativePrice>,
}

/// Every matrix of one consistent snapshot, plus the class and USD value of
/// each asset they cover.
#[derive(Debug, Clone, Default)]
pub struct Rates {
    forex: RateMatrix,
    crypto: RateMatrix,
    stocks: RateMatrix,
    classes: HashMap<String, AssetClass>,
    usd_values: HashMap<String, f64>,
}

impl Rates {
    pub fn build(inputs: &RateInputs) -> Self {
        let mut forex_usd = BTreeMap::new();
        forex_usd.extend(inputs.currencies.iter().map(|(k, v)| (k.clone(), *v)));
        forex_usd.extend(inputs.metals.iter().map(|(k, v)| (k.clone(), *v)));
        forex_usd.insert(USD.to_string(), 1.0);

        let forex = RateMatrix::from_usd_prices(&forex_usd);
        let crypto = RateMatrix::crypto(&inputs.crypto, &forex_usd);
        let stocks = RateMatrix::stocks(&inputs.stocks, &forex);

        let mut classes = HashMap::new();
        classes.insert(USD.to_string(), AssetClass::Currency);
        let groups = [
            (AssetClass::Currency, inputs.currencies.keys().collect::<Vec<_>>()),
            (AssetClass::Metal, inputs.metals.keys().collect()),
            (AssetClass::Crypto, inputs.crypto.keys().collect()),
            (AssetClass::Stock, inputs.stocks.keys().collect()),
        ];
        for (class, assets) in groups {
            for asset in assets {
                classes.entry(asset.clone()).or_insert(class);
            }
        }

        let mut rates = Self {
            forex,
            crypto,
            stocks,
            classes,
            usd_values: HashMap::new(),
        };
        rates.usd_values = rates
            .classes
            .keys()
            .filter_map(|asset| {
                rates
                    .matrix_for(asset)
                    .get(asset, USD)
                    .map(|v| (asset.clone(), v))
            })
            .collect();
        rates
    }

    fn matrix_for(&self, asset: &str) -> &RateMatrix {
        match self.classes.get(asset) {
            Some(AssetClass::Crypto) => &self.crypto,
            Some(AssetClass::Stock) => &self.stocks,
            _ => &self.forex,
        }
    }

    pub fn class_of(&self, asset: &str) -> Option<AssetClass> {
        self.classes.get(asset).copied()
    }

    /// USD value of one unit of `asset`, unrounded.
    pub fn usd_value(&self, asset: &str) -> Option<f64> {
        self.usd_values.get(asset).copied()
    }

    /// Unrounded rate, or `None` when either side has no pivot.
    pub fn raw_rate(&self, from: &str, to: &str) -> Option<f64> {
        let from_class = self.class_of(from)?;
        let to_class = self.class_of(to)?;
        if from == to {
            return self.usd_value(from).map(|_| 1.0);
        }

        let is_forex = |c: AssetClass| matches!(c, AssetClass::Currency | AssetClass::Metal);
        let direct = match (from_class, to_class) {
            (a, b) if is_forex(a) && is_forex(b) => self.forex.get(from, to),
            (AssetClass::Crypto, b) if b != AssetClass::Stock => self.crypto.get(from, to),
            (a, AssetClass::Crypto) if a != AssetClass::Stock => self.crypto.get(from, to),
            (AssetClass::Stock, b) if is_forex(b) => self.stocks.get(from, to),
            (a, AssetClass::Stock) if is_forex(a) => self.stocks.get(from, to),
            _ => None,
        };

        direct.or_else(|| Some(self.usd_value(from)? / self.usd_value(to)?))
    }

    /// Rate rounded for external consumption.
    pub fn get_rate(&self, from: &str, to: &str) -> Option<f64> {
        self.raw_rate(from, to).map(round_rate)
    }

    pub fn convert(&self, amount: f64, from: &str, to: &str) -> Option<f64> {
        self.raw_rate(from, to).map(|rate| amount * rate)
    }

    /// Rounded rates from `base` to every asset with a defined pivot.
    pub fn rates_from(&self, base: &str) -> BTreeMap<String, f64> {
        self.classes
            .keys()
            .filter_map(|to| self.get_rate(base, to).map(|r| (to.clone(), r)))
            .collect()
    }

    pub fn assets(&self) -> impl Iterator<Item = (&String, &AssetClass)> {
        self.classes.iter()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
