//! Outlier-resistant consensus over the quotes of a single asset.

use crate::core::asset::{ConsensusPrice, Quote};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use tracing::trace;

pub const DEFAULT_OUTLIER_BAND: f64 = 0.2;

/// Median of a non-empty slice. Even lengths average the two middle values.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Computes the consensus price for one asset from the quotes gathered in one
/// cycle. Returns `None` when no usable quote exists.
///
/// With two or more quotes, anything further than `band` (a fraction, 0.2 for
/// 20%) from the median is rejected. The survivors are averaged; a single
/// survivor is used as-is, and if nothing survives the plain median of all
/// quotes is used instead.
pub fn build_consensus(asset: &str, quotes: &[Quote], band: f64) -> Option<ConsensusPrice> {
    let quotes: Vec<&Quote> = quotes.iter().filter(|q| q.is_valid()).collect();
    let first = quotes.first()?;
    let currency = first.currency.clone();

    let (price, sources) = if quotes.len() == 1 {
        (first.price, vec![first.source.clone()])
    } else {
        let prices: Vec<f64> = quotes.iter().map(|q| q.price).collect();
        let mid = median(&prices)?;
        let max_deviation = mid * band;
        let inliers: Vec<&&Quote> = quotes
            .iter()
            .filter(|q| (q.price - mid).abs() <= max_deviation)
            .collect();

        match inliers.as_slice() {
            [] => {
                trace!(asset, median = mid, "All quotes rejected as outliers, using median");
                (mid, quotes.iter().map(|q| q.source.clone()).collect())
            }
            [only] => (only.price, vec![only.source.clone()]),
            _ => {
                if inliers.len() < quotes.len() {
                    trace!(
                        asset,
                        removed = quotes.len() - inliers.len(),
                        "Removed outlier quotes"
                    );
                }
                let mean = inliers.iter().map(|q| q.price).sum::<f64>() / inliers.len() as f64;
                (mean, inliers.iter().map(|q| q.source.clone()).collect())
            }
        }
    };

    Some(ConsensusPrice {
        asset: asset.to_string(),
        price,
        currency,
        sources,
        computed_at: Utc::now(),
        stale: false,
    })
}

/// Builds consensus prices for every asset present in `quotes`.
///
/// When one asset is quoted in several currencies (stocks listed on more than
/// one venue), only the currency reported by most sources takes part.
pub fn build_all(quotes: Vec<Quote>, band: f64) -> BTreeMap<String, ConsensusPrice> {
    let mut by_asset: BTreeMap<String, Vec<Quote>> = BTreeMap::new();
    for quote in quotes.into_iter().filter(Quote::is_valid) {
        by_asset.entry(quote.asset.clone()).or_default().push(quote);
    }

    by_asset
        .into_iter()
        .filter_map(|(asset, quotes)| {
            let quotes = dominant_currency(quotes);
            build_consensus(&asset, &quotes, band).map(|c| (asset, c))
        })
        .collect()
}

fn dominant_currency(quotes: Vec<Quote>) -> Vec<Quote> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for quote in &quotes {
        *counts.entry(quote.currency.as_str()).or_default() += 1;
    }
    if counts.len() <= 1 {
        return quotes;
    }
    let Some(winner) = counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(currency, _)| currency.to_string())
    else {
        return quotes;
    };
    quotes.into_iter().filter(|q| q.currency == winner).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quotes(values: &[(&str, f64)]) -> Vec<Quote> {
        values
            .iter()
            .map(|(source, price)| Quote::usd(source, "BTC", *price))
            .collect()
    }

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn test_no_quotes_yields_nothing() {
        assert!(build_consensus("BTC", &[], DEFAULT_OUTLIER_BAND).is_none());
    }

    #[test]
    fn test_single_quote_is_consensus() {
        let result = build_consensus("BTC", &quotes(&[("kraken", 123.45)]), 0.2).unwrap();
        assert_eq!(result.price, 123.45);
        assert_eq!(result.sources, vec!["kraken"]);
        assert!(!result.stale);
    }

    #[test]
    fn test_all_within_band_is_mean() {
        let q = quotes(&[("a", 100.0), ("b", 110.0), ("c", 90.0), ("d", 104.0)]);
        let result = build_consensus("BTC", &q, 0.2).unwrap();
        assert!((result.price - 101.0).abs() < 1e-9);
        assert_eq!(result.sources, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_extreme_outlier_is_excluded() {
        let q = quotes(&[("a", 100.0), ("b", 100.0), ("c", 100.0), ("d", 1000.0)]);
        let result = build_consensus("BTC", &q, 0.2).unwrap();
        assert_eq!(result.price, 100.0);
        assert_eq!(result.sources, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_all_outliers_fall_back_to_median() {
        let q = quotes(&[("a", 10.0), ("b", 1000.0)]);
        let result = build_consensus("BTC", &q, 0.2).unwrap();
        assert_eq!(result.price, 505.0);
        assert_eq!(result.sources, vec!["a", "b"]);
    }

    #[test]
    fn test_single_inlier_is_used_alone() {
        // median 100, band [80, 120]: only "b" survives
        let q = quotes(&[("a", 10.0), ("b", 100.0), ("c", 1000.0)]);
        let result = build_consensus("BTC", &q, 0.2).unwrap();
        assert_eq!(result.price, 100.0);
        assert_eq!(result.sources, vec!["b"]);
    }

    #[test]
    fn test_band_boundary_is_inclusive() {
        let q = quotes(&[("a", 80.0), ("b", 100.0), ("c", 120.0)]);
        let result = build_consensus("BTC", &q, 0.2).unwrap();
        assert!((result.price - 100.0).abs() < 1e-9);
        assert_eq!(result.sources.len(), 3);
    }

    #[test]
    fn test_invalid_quotes_are_ignored() {
        let q = quotes(&[("a", f64::NAN), ("b", -4.0), ("c", 42.0)]);
        let result = build_consensus("BTC", &q, 0.2).unwrap();
        assert_eq!(result.price, 42.0);
        assert_eq!(result.sources, vec!["c"]);
    }

    #[test]
    fn test_build_all_groups_by_asset() {
        let mut all = quotes(&[("a", 100.0), ("b", 102.0)]);
        all.push(Quote::usd("a", "ETH", 3000.0));
        let result = build_all(all, 0.2);
        assert_eq!(result.len(), 2);
        assert!((result["BTC"].price - 101.0).abs() < 1e-9);
        assert_eq!(result["ETH"].sources, vec!["a"]);
    }

    #[test]
    fn test_build_all_keeps_dominant_currency() {
        let q = |source: &str, price: f64, currency: &str| Quote {
            source: source.to_string(),
            asset: "SHEL".to_string(),
            price,
            currency: currency.to_string(),
            observed_at: Utc::now(),
        };
        let all = vec![q("a", 27.0, "GBP"), q("b", 27.2, "GBP"), q("c", 68.0, "USD")];
        let result = build_all(all, 0.2);
        assert_eq!(result["SHEL"].currency, "GBP");
        assert!((result["SHEL"].price - 27.1).abs() < 1e-9);
    }
}
