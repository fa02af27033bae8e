use crate::core::asset::AssetClass;
use crate::core::error::{StoreError, StoreResult};
use crate::core::history::{AggregatedBucket, BucketKey, RawPricePoint, Tier};
use crate::core::store::PriceStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Default)]
struct Tiers {
    raw: Vec<RawPricePoint>,
    buckets: HashMap<Tier, BTreeMap<BucketKey, AggregatedBucket>>,
}

/// In-memory price store. Nothing survives the process.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Tiers>>,
    available: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Tiers::default())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Makes every subsequent call fail with `StoreError::Unavailable` until
    /// switched back on.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store switched off".to_string()))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn in_range(ts: DateTime<Utc>, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
    ts >= from && ts < to
}

#[async_trait]
impl PriceStore for MemoryStore {
    async fn insert_raw_points(&self, points: &[RawPricePoint]) -> StoreResult<()> {
        self.check()?;
        let mut tiers = self.inner.lock().await;
        tiers.raw.extend_from_slice(points);
        debug!(count = points.len(), "Stored raw points in memory");
        Ok(())
    }

    async fn raw_points(
        &self,
        asset_class: AssetClass,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<RawPricePoint>> {
        self.check()?;
        let tiers = self.inner.lock().await;
        let mut points: Vec<RawPricePoint> = tiers
            .raw
            .iter()
            .filter(|p| p.asset_class == asset_class && p.symbol == symbol)
            .filter(|p| in_range(p.timestamp, from, to))
            .cloned()
            .collect();
        points.sort_by_key(|p| p.timestamp);
        Ok(points)
    }

    async fn raw_points_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<RawPricePoint>> {
        self.check()?;
        let tiers = self.inner.lock().await;
        let mut points: Vec<RawPricePoint> = tiers
            .raw
            .iter()
            .filter(|p| in_range(p.timestamp, from, to))
            .cloned()
            .collect();
        points.sort_by_key(|p| p.timestamp);
        Ok(points)
    }

    async fn buckets(
        &self,
        tier: Tier,
        asset_class: AssetClass,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<AggregatedBucket>> {
        self.check()?;
        let tiers = self.inner.lock().await;
        Ok(tiers
            .buckets
            .get(&tier)
            .map(|buckets| {
                buckets
                    .values()
                    .filter(|b| b.asset_class == asset_class && b.symbol == symbol)
                    .filter(|b| in_range(b.bucket_start, from, to))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn buckets_between(
        &self,
        tier: Tier,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<AggregatedBucket>> {
        self.check()?;
        let tiers = self.inner.lock().await;
        let mut buckets: Vec<AggregatedBucket> = tiers
            .buckets
            .get(&tier)
            .map(|buckets| {
                buckets
                    .values()
                    .filter(|b| in_range(b.bucket_start, from, to))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        buckets.sort_by_key(|b| b.bucket_start);
        Ok(buckets)
    }

    async fn upsert_bucket(&self, tier: Tier, bucket: &AggregatedBucket) -> StoreResult<bool> {
        self.check()?;
        let mut tiers = self.inner.lock().await;
        let buckets = tiers.buckets.entry(tier).or_default();
        let key = bucket.key();
        if let Some(existing) = buckets.get(&key) {
            if !bucket.supersedes(existing) {
                return Ok(false);
            }
        }
        buckets.insert(key, bucket.clone());
        Ok(true)
    }

    async fn purge_raw_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        self.check()?;
        let mut tiers = self.inner.lock().await;
        let before = tiers.raw.len();
        tiers.raw.retain(|p| p.timestamp >= cutoff);
        Ok(before - tiers.raw.len())
    }

    async fn purge_buckets_before(&self, tier: Tier, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        self.check()?;
        let mut tiers = self.inner.lock().await;
        let Some(buckets) = tiers.buckets.get_mut(&tier) else {
            return Ok(0);
        };
        let before = buckets.len();
        buckets.retain(|key, _| key.bucket_start >= cutoff);
        Ok(before - buckets.len())
    }
}
