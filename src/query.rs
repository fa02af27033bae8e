//! Historical series: durable buckets merged with a live tail.

use crate::core::asset::{AssetClass, USD};
use crate::core::config::HistoryConfig;
use crate::core::error::HistoryError;
use crate::core::history::{
    AggregatedBucket, RawPricePoint, Resolution, Tier, rollup_buckets, rollup_points,
};
use crate::core::store::PriceStore;
use crate::exchange::Exchange;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Rounding applied to history values handed to callers: 4 decimals from 1
/// up, 8 decimals down to 1e-4, untouched below.
pub fn round_history_price(value: f64) -> f64 {
    let decimals = if value.abs() >= 1.0 {
        4
    } else if value.abs() >= 1e-4 {
        8
    } else {
        return value;
    };
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPoint {
    pub timestamp: DateTime<Utc>,
    /// The sampled price for raw points, the average for buckets.
    pub price: f64,
    pub min: f64,
    pub max: f64,
    pub open: f64,
    pub close: f64,
    pub sample_count: u64,
    /// Set on the still-open bucket, whose values will keep changing.
    pub partial: bool,
}

impl HistoryPoint {
    fn from_raw(point: &RawPricePoint, rate: f64) -> Self {
        let price = round_history_price(point.price_usd * rate);
        Self {
            timestamp: point.timestamp,
            price,
            min: price,
            max: price,
            open: price,
            close: price,
            sample_count: 1,
            partial: false,
        }
    }

    fn from_bucket(bucket: &AggregatedBucket, rate: f64, partial: bool) -> Self {
        let convert = |v: f64| round_history_price(v * rate);
        Self {
            timestamp: bucket.bucket_start,
            price: convert(bucket.avg),
            min: convert(bucket.min),
            max: convert(bucket.max),
            open: convert(bucket.open),
            close: convert(bucket.close),
            sample_count: bucket.sample_count,
            partial,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistorySeries {
    pub symbol: String,
    pub asset_class: AssetClass,
    pub resolution: Resolution,
    pub currency: String,
    /// Oldest first.
    pub points: Vec<HistoryPoint>,
}

/// Keeps the stored bucket unless the live one was folded from more samples.
fn merge_live(
    stored: Vec<AggregatedBucket>,
    live: Vec<AggregatedBucket>,
) -> Vec<AggregatedBucket> {
    let mut merged: BTreeMap<DateTime<Utc>, AggregatedBucket> = stored
        .into_iter()
        .map(|b| (b.bucket_start, b))
        .collect();
    for bucket in live {
        match merged.get(&bucket.bucket_start) {
            Some(existing) if !bucket.supersedes(existing) => {}
            _ => {
                merged.insert(bucket.bucket_start, bucket);
            }
        }
    }
    merged.into_values().collect()
}

pub struct HistoryQueryService {
    exchange: Arc<Exchange>,
    store: Option<Arc<dyn PriceStore>>,
    raw_retention: ChronoDuration,
    hourly_retention: ChronoDuration,
}

impl HistoryQueryService {
    /// `store` is `None` when history is disabled; every query then fails
    /// with [`HistoryError::Unavailable`].
    pub fn new(
        exchange: Arc<Exchange>,
        store: Option<Arc<dyn PriceStore>>,
        config: &HistoryConfig,
    ) -> Self {
        Self {
            exchange,
            store,
            raw_retention: config.raw_retention(),
            hourly_retention: config.hourly_retention(),
        }
    }

    /// Series for one asset, expressed in `currency` at the current rate.
    #[instrument(name = "HistoryQuery", skip(self, now))]
    pub async fn get_history(
        &self,
        symbol: &str,
        asset_class: AssetClass,
        resolution: Resolution,
        currency: &str,
        now: DateTime<Utc>,
    ) -> Result<HistorySeries, HistoryError> {
        let store = self.store.as_ref().ok_or(HistoryError::Unavailable)?;
        let symbol = symbol.trim().to_uppercase();
        let currency = currency.trim().to_uppercase();
        let rate = self
            .exchange
            .snapshot()
            .rates()
            .raw_rate(USD, &currency)
            .ok_or_else(|| HistoryError::UnknownCurrency(currency.clone()))?;

        let end = now + ChronoDuration::seconds(1);
        let raw_from = Tier::Hourly.bucket_start(now - self.raw_retention);
        let points = match resolution {
            Resolution::Raw => store
                .raw_points(asset_class, &symbol, now - self.raw_retention, end)
                .await?
                .iter()
                .map(|p| HistoryPoint::from_raw(p, rate))
                .collect(),
            Resolution::Hourly => {
                let current = Tier::Hourly.bucket_start(now);
                let from = now - self.hourly_retention;
                let stored = store
                    .buckets(Tier::Hourly, asset_class, &symbol, from, current)
                    .await?;
                let raw = store.raw_points(asset_class, &symbol, raw_from, end).await?;
                merge_live(stored, rollup_points(&raw, Tier::Hourly))
                    .iter()
                    .map(|b| HistoryPoint::from_bucket(b, rate, b.bucket_start == current))
                    .collect()
            }
            Resolution::Daily => {
                let today = Tier::Daily.bucket_start(now);
                let current_hour = Tier::Hourly.bucket_start(now);
                let recent_from = Tier::Daily.bucket_start(raw_from);
                let stored = store
                    .buckets(Tier::Daily, asset_class, &symbol, DateTime::UNIX_EPOCH, today)
                    .await?;
                let stored_hours = store
                    .buckets(Tier::Hourly, asset_class, &symbol, recent_from, current_hour)
                    .await?;
                let raw = store.raw_points(asset_class, &symbol, raw_from, end).await?;
                let hours = merge_live(stored_hours, rollup_points(&raw, Tier::Hourly));
                merge_live(stored, rollup_buckets(&hours, Tier::Daily))
                    .iter()
                    .map(|b| HistoryPoint::from_bucket(b, rate, b.bucket_start == today))
                    .collect()
            }
        };

        let series = HistorySeries {
            symbol,
            asset_class,
            resolution,
            currency,
            points,
        };
        debug!(count = series.points.len(), "History series built");
        Ok(series)
    }
}
