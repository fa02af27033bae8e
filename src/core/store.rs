use crate::core::asset::AssetClass;
use crate::core::error::StoreResult;
use crate::core::history::{AggregatedBucket, RawPricePoint, Tier};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Durable storage for the three history tiers.
///
/// Ranges are half-open, `[from, to)`, and results are ordered by timestamp.
#[async_trait]
pub trait PriceStore: Send + Sync {
    async fn insert_raw_points(&self, points: &[RawPricePoint]) -> StoreResult<()>;

    async fn raw_points(
        &self,
        asset_class: AssetClass,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<RawPricePoint>>;

    /// Raw points of every symbol inside the range.
    async fn raw_points_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<RawPricePoint>>;

    async fn buckets(
        &self,
        tier: Tier,
        asset_class: AssetClass,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<AggregatedBucket>>;

    /// Buckets of every symbol starting inside the range.
    async fn buckets_between(
        &self,
        tier: Tier,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<AggregatedBucket>>;

    /// Writes `bucket` unless a bucket with the same key and an equal or
    /// higher sample count is already stored. Returns whether it was written.
    async fn upsert_bucket(&self, tier: Tier, bucket: &AggregatedBucket) -> StoreResult<bool>;

    async fn purge_raw_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize>;

    async fn purge_buckets_before(&self, tier: Tier, cutoff: DateTime<Utc>) -> StoreResult<usize>;
}
