use crate::core::asset::AssetClass;
use crate::core::error::{StoreError, StoreResult};
use crate::core::history::{AggregatedBucket, RawPricePoint, Tier};
use crate::core::store::PriceStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fjall::{Batch, Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::de::DeserializeOwned;
use std::path::Path;
use tokio::sync::Mutex;
use tracing::debug;

const RAW_PARTITION: &str = "raw";
const TS_LEN: usize = 8;

/// One tier's entries plus a time-ordered index over them.
///
/// Entry keys are `[class tag][symbol][0x00][timestamp millis, big endian]`,
/// so a symbol's entries are contiguous and sorted by time. Index keys are
/// `[timestamp millis, big endian][entry key]` with empty values, which lets
/// cross-symbol scans and purges seek straight to a time range.
struct Series {
    name: &'static str,
    entries: PartitionHandle,
    by_time: PartitionHandle,
}

impl Series {
    fn open(keyspace: &Keyspace, name: &'static str) -> StoreResult<Self> {
        let entries = keyspace.open_partition(name, PartitionCreateOptions::default())?;
        let index_name = format!("{name}_by_time");
        let by_time = keyspace.open_partition(&index_name, PartitionCreateOptions::default())?;
        Ok(Self {
            name,
            entries,
            by_time,
        })
    }

    fn insert(&self, batch: &mut Batch, entry_key: Vec<u8>, ts: DateTime<Utc>, value: Vec<u8>) {
        batch.insert(&self.by_time, index_key(ts, &entry_key), Vec::<u8>::new());
        batch.insert(&self.entries, entry_key, value);
    }

    fn range<T: DeserializeOwned>(
        &self,
        asset_class: AssetClass,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<T>> {
        if from >= to {
            return Ok(Vec::new());
        }
        let start = entry_key(asset_class, symbol, from);
        let end = entry_key(asset_class, symbol, to);
        let mut items = Vec::new();
        for entry in self.entries.range(start..end) {
            let (_, value) = entry?;
            items.push(serde_json::from_slice(&value)?);
        }
        Ok(items)
    }

    /// Entries of every symbol in `[from, to)`, oldest first.
    fn between<T: DeserializeOwned>(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<T>> {
        if from >= to {
            return Ok(Vec::new());
        }
        let mut items = Vec::new();
        for entry in self.by_time.range(time_bytes(from)..time_bytes(to)) {
            let (key, _) = entry?;
            let entry_key = self.entry_key_of(&key)?;
            match self.entries.get(entry_key)? {
                Some(value) => items.push(serde_json::from_slice(&value)?),
                None => debug!(partition = self.name, "Index entry without data, skipping"),
            }
        }
        Ok(items)
    }

    fn purge_before(&self, keyspace: &Keyspace, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let mut batch = keyspace.batch();
        let mut count = 0;
        for entry in self.by_time.range(..time_bytes(cutoff)) {
            let key = entry?.0;
            batch.remove(&self.entries, self.entry_key_of(&key)?.to_vec());
            batch.remove(&self.by_time, key.to_vec());
            count += 1;
        }
        if count == 0 {
            return Ok(0);
        }
        batch.commit()?;
        debug!(partition = self.name, count, "Purged expired entries");
        Ok(count)
    }

    fn entry_key_of<'a>(&self, index_key: &'a [u8]) -> StoreResult<&'a [u8]> {
        index_key
            .get(TS_LEN..)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| StoreError::CorruptKey {
                partition: format!("{}_by_time", self.name),
            })
    }
}

/// Price store on an embedded fjall keyspace, one [`Series`] per tier.
/// Values are JSON.
pub struct DiskStore {
    keyspace: Keyspace,
    raw: Series,
    hourly: Series,
    daily: Series,
    write_lock: Mutex<()>,
}

impl DiskStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(path)?;
        let keyspace = fjall::Config::new(path).open()?;
        let raw = Series::open(&keyspace, RAW_PARTITION)?;
        let hourly = Series::open(&keyspace, Tier::Hourly.as_str())?;
        let daily = Series::open(&keyspace, Tier::Daily.as_str())?;
        debug!(path = %path.display(), "Opened history store");
        Ok(Self {
            keyspace,
            raw,
            hourly,
            daily,
            write_lock: Mutex::new(()),
        })
    }

    fn series(&self, tier: Tier) -> &Series {
        match tier {
            Tier::Hourly => &self.hourly,
            Tier::Daily => &self.daily,
        }
    }
}

// pre-epoch timestamps clamp to zero so big-endian order stays time order
fn time_bytes(ts: DateTime<Utc>) -> [u8; TS_LEN] {
    ts.timestamp_millis().max(0).to_be_bytes()
}

fn entry_key(asset_class: AssetClass, symbol: &str, ts: DateTime<Utc>) -> Vec<u8> {
    let mut key = Vec::with_capacity(symbol.len() + 2 + TS_LEN);
    key.push(asset_class.tag());
    key.extend_from_slice(symbol.as_bytes());
    key.push(0);
    key.extend_from_slice(&time_bytes(ts));
    key
}

fn index_key(ts: DateTime<Utc>, entry_key: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(TS_LEN + entry_key.len());
    key.extend_from_slice(&time_bytes(ts));
    key.extend_from_slice(entry_key);
    key
}

#[async_trait]
impl PriceStore for DiskStore {
    async fn insert_raw_points(&self, points: &[RawPricePoint]) -> StoreResult<()> {
        if points.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;
        let mut batch = self.keyspace.batch();
        for point in points {
            let key = entry_key(point.asset_class, &point.symbol, point.timestamp);
            self.raw.insert(&mut batch, key, point.timestamp, serde_json::to_vec(point)?);
        }
        batch.commit()?;
        debug!(count = points.len(), "Stored raw points");
        Ok(())
    }

    async fn raw_points(
        &self,
        asset_class: AssetClass,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<RawPricePoint>> {
        self.raw.range(asset_class, symbol, from, to)
    }

    async fn raw_points_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<RawPricePoint>> {
        self.raw.between(from, to)
    }

    async fn buckets(
        &self,
        tier: Tier,
        asset_class: AssetClass,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<AggregatedBucket>> {
        self.series(tier).range(asset_class, symbol, from, to)
    }

    async fn buckets_between(
        &self,
        tier: Tier,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<AggregatedBucket>> {
        self.series(tier).between(from, to)
    }

    async fn upsert_bucket(&self, tier: Tier, bucket: &AggregatedBucket) -> StoreResult<bool> {
        let series = self.series(tier);
        let key = entry_key(bucket.asset_class, &bucket.symbol, bucket.bucket_start);

        let _guard = self.write_lock.lock().await;
        if let Some(existing) = series.entries.get(&key)? {
            let existing: AggregatedBucket = serde_json::from_slice(&existing)?;
            if !bucket.supersedes(&existing) {
                return Ok(false);
            }
        }
        let mut batch = self.keyspace.batch();
        series.insert(&mut batch, key, bucket.bucket_start, serde_json::to_vec(bucket)?);
        batch.commit()?;
        Ok(true)
    }

    async fn purge_raw_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let _guard = self.write_lock.lock().await;
        self.raw.purge_before(&self.keyspace, cutoff)
    }

    async fn purge_buckets_before(&self, tier: Tier, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let _guard = self.write_lock.lock().await;
        self.series(tier).purge_before(&self.keyspace, cutoff)
    }
}
