//! Price history tiers: raw samples and hourly/daily aggregate buckets.

use crate::core::asset::AssetClass;
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPricePoint {
    pub symbol: String,
    pub asset_class: AssetClass,
    pub price_usd: f64,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate tiers. Raw points are stored separately and never bucketed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Hourly,
    Daily,
}

impl Tier {
    fn width_secs(&self) -> i64 {
        match self {
            Tier::Hourly => 3600,
            Tier::Daily => 86_400,
        }
    }

    /// Start of the bucket `ts` falls into. Buckets are aligned to UTC.
    pub fn bucket_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let secs = ts.timestamp();
        let start = secs - secs.rem_euclid(self.width_secs());
        DateTime::from_timestamp(start, 0).unwrap_or(ts)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Hourly => "hourly",
            Tier::Daily => "daily",
        }
    }
}

impl Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Raw,
    Hourly,
    Daily,
}

impl Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Resolution::Raw => "raw",
            Resolution::Hourly => "hourly",
            Resolution::Daily => "daily",
        })
    }
}

impl FromStr for Resolution {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "raw" => Ok(Resolution::Raw),
            "hourly" | "hour" | "1h" => Ok(Resolution::Hourly),
            "daily" | "day" | "1d" => Ok(Resolution::Daily),
            _ => Err(anyhow!("Invalid resolution: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct BucketKey {
    pub asset_class: AssetClass,
    pub symbol: String,
    pub bucket_start: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedBucket {
    pub symbol: String,
    pub asset_class: AssetClass,
    pub bucket_start: DateTime<Utc>,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub open: f64,
    pub close: f64,
    pub sample_count: u64,
}

impl AggregatedBucket {
    pub fn key(&self) -> BucketKey {
        BucketKey {
            asset_class: self.asset_class,
            symbol: self.symbol.clone(),
            bucket_start: self.bucket_start,
        }
    }

    /// A bucket only replaces another for the same key when it was folded
    /// from strictly more samples.
    pub fn supersedes(&self, existing: &AggregatedBucket) -> bool {
        self.sample_count > existing.sample_count
    }
}

/// Folds raw points that share a bucket. `None` for an empty input.
pub fn fold_points<'a, I>(points: I, key: &BucketKey) -> Option<AggregatedBucket>
where
    I: IntoIterator<Item = &'a RawPricePoint>,
{
    let mut iter = points.into_iter();
    let first = iter.next()?;
    let mut bucket = AggregatedBucket {
        symbol: key.symbol.clone(),
        asset_class: key.asset_class,
        bucket_start: key.bucket_start,
        min: first.price_usd,
        max: first.price_usd,
        avg: 0.0,
        open: first.price_usd,
        close: first.price_usd,
        sample_count: 1,
    };
    let mut sum = first.price_usd;
    let (mut earliest, mut latest) = (first.timestamp, first.timestamp);

    for point in iter {
        bucket.min = bucket.min.min(point.price_usd);
        bucket.max = bucket.max.max(point.price_usd);
        sum += point.price_usd;
        bucket.sample_count += 1;
        if point.timestamp < earliest {
            earliest = point.timestamp;
            bucket.open = point.price_usd;
        }
        if point.timestamp >= latest {
            latest = point.timestamp;
            bucket.close = point.price_usd;
        }
    }
    bucket.avg = sum / bucket.sample_count as f64;
    Some(bucket)
}

/// Folds finer buckets into one coarser bucket: extremes of the extremes, a
/// sample-weighted average, open of the earliest and close of the latest.
pub fn fold_buckets<'a, I>(buckets: I, key: &BucketKey) -> Option<AggregatedBucket>
where
    I: IntoIterator<Item = &'a AggregatedBucket>,
{
    let mut iter = buckets.into_iter();
    let first = iter.next()?;
    let mut bucket = AggregatedBucket {
        symbol: key.symbol.clone(),
        asset_class: key.asset_class,
        bucket_start: key.bucket_start,
        ..first.clone()
    };
    let mut weighted = first.avg * first.sample_count as f64;
    let mut plain = first.avg;
    let mut parts = 1usize;
    let (mut earliest, mut latest) = (first.bucket_start, first.bucket_start);

    for part in iter {
        bucket.min = bucket.min.min(part.min);
        bucket.max = bucket.max.max(part.max);
        weighted += part.avg * part.sample_count as f64;
        plain += part.avg;
        parts += 1;
        bucket.sample_count += part.sample_count;
        if part.bucket_start < earliest {
            earliest = part.bucket_start;
            bucket.open = part.open;
        }
        if part.bucket_start >= latest {
            latest = part.bucket_start;
            bucket.close = part.close;
        }
    }
    bucket.avg = if bucket.sample_count > 0 {
        weighted / bucket.sample_count as f64
    } else {
        plain / parts as f64
    };
    Some(bucket)
}

/// Groups raw points by `(asset class, symbol, bucket)` and folds each group.
pub fn rollup_points(points: &[RawPricePoint], tier: Tier) -> Vec<AggregatedBucket> {
    let mut groups: BTreeMap<BucketKey, Vec<&RawPricePoint>> = BTreeMap::new();
    for point in points {
        let key = BucketKey {
            asset_class: point.asset_class,
            symbol: point.symbol.clone(),
            bucket_start: tier.bucket_start(point.timestamp),
        };
        groups.entry(key).or_default().push(point);
    }
    groups
        .iter()
        .filter_map(|(key, group)| fold_points(group.iter().copied(), key))
        .collect()
}

/// Groups finer buckets into `tier` buckets and folds each group.
pub fn rollup_buckets(buckets: &[AggregatedBucket], tier: Tier) -> Vec<AggregatedBucket> {
    let mut groups: BTreeMap<BucketKey, Vec<&AggregatedBucket>> = BTreeMap::new();
    for bucket in buckets {
        let key = BucketKey {
            asset_class: bucket.asset_class,
            symbol: bucket.symbol.clone(),
            bucket_start: tier.bucket_start(bucket.bucket_start),
        };
        groups.entry(key).or_default().push(bucket);
    }
    groups
        .iter()
        .filter_map(|(key, group)| fold_buckets(group.iter().copied(), key))
        .collect()
}
