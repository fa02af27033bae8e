//! Hourly and daily rollups of the recorded history.

use crate::core::config::HistoryConfig;
use crate::core::error::StoreError;
use crate::core::history::{AggregatedBucket, Tier, rollup_buckets, rollup_points};
use crate::core::store::PriceStore;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregationReport {
    pub hourly_examined: usize,
    pub hourly_written: usize,
    pub daily_examined: usize,
    pub daily_written: usize,
    pub raw_purged: usize,
    pub hourly_purged: usize,
}

/// Clears the running flag when a run ends, whichever way it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct AggregationJob {
    store: Arc<dyn PriceStore>,
    raw_retention: ChronoDuration,
    hourly_retention: ChronoDuration,
    running: AtomicBool,
}

impl AggregationJob {
    pub fn new(store: Arc<dyn PriceStore>, config: &HistoryConfig) -> Self {
        Self {
            store,
            raw_retention: config.raw_retention(),
            hourly_retention: config.hourly_retention(),
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Runs once unless a run is already in progress, in which case the
    /// trigger is dropped and `None` returned.
    ///
    /// With `backfill`, the daily rollup covers every day still present in
    /// the hourly tier instead of only the days raw data can still touch.
    pub async fn trigger(
        &self,
        now: DateTime<Utc>,
        backfill: bool,
    ) -> Option<Result<AggregationReport, StoreError>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Aggregation already running, skipping trigger");
            return None;
        }
        let _guard = RunGuard(&self.running);
        Some(self.run_once(now, backfill).await)
    }

    #[instrument(name = "Aggregation", skip(self))]
    async fn run_once(
        &self,
        now: DateTime<Utc>,
        backfill: bool,
    ) -> Result<AggregationReport, StoreError> {
        let mut report = AggregationReport::default();
        let current_hour = Tier::Hourly.bucket_start(now);
        let today = Tier::Daily.bucket_start(now);
        let raw_cutoff = now - self.raw_retention;
        let hourly_cutoff = now - self.hourly_retention;

        // every raw point still stored is rolled before the purge below, so a
        // run after downtime catches up instead of dropping samples. A partly
        // expired hour folds fewer samples and never supersedes what was
        // written while it was complete.
        let raw = self
            .store
            .raw_points_between(DateTime::UNIX_EPOCH, current_hour)
            .await?;
        let hourly = rollup_points(&raw, Tier::Hourly);
        report.hourly_examined = hourly.len();
        report.hourly_written = self.write_all(Tier::Hourly, &hourly).await?;

        let mut daily_from = if backfill {
            Tier::Daily.bucket_start(hourly_cutoff)
        } else {
            Tier::Daily.bucket_start(raw_cutoff)
        };
        if let Some(oldest) = hourly.iter().map(|b| b.bucket_start).min() {
            daily_from = daily_from.min(Tier::Daily.bucket_start(oldest));
        }
        let hours = self
            .store
            .buckets_between(Tier::Hourly, daily_from, today)
            .await?;
        let daily = rollup_buckets(&hours, Tier::Daily);
        report.daily_examined = daily.len();
        report.daily_written = self.write_all(Tier::Daily, &daily).await?;

        report.raw_purged = self.store.purge_raw_before(raw_cutoff).await?;
        report.hourly_purged = self
            .store
            .purge_buckets_before(Tier::Hourly, hourly_cutoff)
            .await?;

        info!(?report, "Aggregation finished");
        Ok(report)
    }

    async fn write_all(
        &self,
        tier: Tier,
        buckets: &[AggregatedBucket],
    ) -> Result<usize, StoreError> {
        let mut written = 0;
        for bucket in buckets {
            if self.store.upsert_bucket(tier, bucket).await? {
                written += 1;
            }
        }
        debug!(%tier, examined = buckets.len(), written, "Rollup written");
        Ok(written)
    }

    /// Aggregates every `period` until `shutdown` flips to true. Failed runs
    /// are logged and retried on the next tick.
    pub async fn run(self: Arc<Self>, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut timer = tokio::time::interval(period);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(period_secs = period.as_secs(), "Starting aggregation job");

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    if let Some(Err(e)) = self.trigger(Utc::now(), false).await {
                        error!(error = %e, "Aggregation run failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Aggregation job stopped");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::asset::AssetClass;
    use crate::core::history::RawPricePoint;
    use crate::store::memory::MemoryStore;
    use chrono::TimeZone;

    fn at(day: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, h, m, 0).unwrap()
    }

    fn point(symbol: &str, price: f64, ts: DateTime<Utc>) -> RawPricePoint {
        RawPricePoint {
            symbol: symbol.to_string(),
            asset_class: AssetClass::Crypto,
            price_usd: price,
            timestamp: ts,
        }
    }

    fn job(store: &MemoryStore) -> AggregationJob {
        AggregationJob::new(Arc::new(store.clone()), &HistoryConfig::default())
    }

    async fn hourly(store: &MemoryStore) -> Vec<AggregatedBucket> {
        store
            .buckets_between(Tier::Hourly, at(1, 0, 0), at(28, 0, 0))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_rolls_only_completed_hours() {
        let store = MemoryStore::new();
        store
            .insert_raw_points(&[
                point("BTC", 100.0, at(14, 10, 5)),
                point("BTC", 110.0, at(14, 10, 30)),
                point("BTC", 90.0, at(14, 10, 55)),
                point("BTC", 95.0, at(14, 11, 10)),
            ])
            .await
            .unwrap();

        let report = job(&store).trigger(at(14, 11, 20), false).await.unwrap().unwrap();
        assert_eq!(report.hourly_examined, 1);
        assert_eq!(report.hourly_written, 1);

        let buckets = hourly(&store).await;
        assert_eq!(buckets.len(), 1);
        let b = &buckets[0];
        assert_eq!(b.bucket_start, at(14, 10, 0));
        assert_eq!((b.min, b.max, b.open, b.close), (90.0, 110.0, 100.0, 90.0));
        assert_eq!(b.avg, 100.0);
        assert_eq!(b.sample_count, 3);
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let store = MemoryStore::new();
        store
            .insert_raw_points(&[
                point("ETH", 10.0, at(14, 9, 0)),
                point("ETH", 12.0, at(14, 9, 1)),
            ])
            .await
            .unwrap();
        let job = job(&store);
        let now = at(14, 12, 0);

        job.trigger(now, false).await.unwrap().unwrap();
        let first = hourly(&store).await;
        let report = job.trigger(now, false).await.unwrap().unwrap();

        assert_eq!(report.hourly_written, 0);
        assert_eq!(report.daily_written, 0);
        assert_eq!(hourly(&store).await, first);
    }

    #[tokio::test]
    async fn test_late_points_supersede_with_higher_count() {
        let store = MemoryStore::new();
        store
            .insert_raw_points(&[
                point("ETH", 10.0, at(14, 9, 0)),
                point("ETH", 12.0, at(14, 9, 1)),
            ])
            .await
            .unwrap();
        let job = job(&store);
        job.trigger(at(14, 12, 0), false).await.unwrap().unwrap();

        store
            .insert_raw_points(&[point("ETH", 8.0, at(14, 9, 30))])
            .await
            .unwrap();
        let report = job.trigger(at(14, 12, 10), false).await.unwrap().unwrap();
        assert_eq!(report.hourly_written, 1);

        let b = &hourly(&store).await[0];
        assert_eq!(b.sample_count, 3);
        assert_eq!((b.min, b.max), (8.0, 12.0));
    }

    #[tokio::test]
    async fn test_daily_rollup_of_completed_days() {
        let store = MemoryStore::new();
        store
            .insert_raw_points(&[
                point("BTC", 100.0, at(14, 22, 0)),
                point("BTC", 120.0, at(14, 23, 0)),
                point("BTC", 140.0, at(14, 23, 30)),
                point("BTC", 200.0, at(15, 0, 10)),
            ])
            .await
            .unwrap();

        let report = job(&store).trigger(at(15, 1, 0), false).await.unwrap().unwrap();
        assert_eq!(report.hourly_written, 3);
        assert_eq!(report.daily_written, 1);

        let days = store
            .buckets_between(Tier::Daily, at(1, 0, 0), at(28, 0, 0))
            .await
            .unwrap();
        assert_eq!(days.len(), 1);
        let d = &days[0];
        assert_eq!(d.bucket_start, at(14, 0, 0));
        assert_eq!(d.sample_count, 3);
        assert_eq!((d.open, d.close, d.min, d.max), (100.0, 140.0, 100.0, 140.0));
        assert!((d.avg - 120.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_expired_raw_points_are_rolled_before_purge() {
        let store = MemoryStore::new();
        store
            .insert_raw_points(&[point("BTC", 1.0, at(10, 8, 0)), point("BTC", 2.0, at(14, 8, 0))])
            .await
            .unwrap();

        let report = job(&store).trigger(at(14, 12, 0), false).await.unwrap().unwrap();
        assert_eq!(report.hourly_written, 2);
        assert_eq!(report.daily_written, 1);
        assert_eq!(report.raw_purged, 1);

        let left = store
            .raw_points_between(at(1, 0, 0), at(28, 0, 0))
            .await
            .unwrap();
        assert_eq!(left.len(), 1);

        let hours = hourly(&store).await;
        assert_eq!(hours.len(), 2);
        assert_eq!(hours[0].bucket_start, at(10, 8, 0));
        assert_eq!((hours[0].avg, hours[0].sample_count), (1.0, 1));

        let days = store
            .buckets_between(Tier::Daily, at(1, 0, 0), at(28, 0, 0))
            .await
            .unwrap();
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].bucket_start, at(10, 0, 0));
    }

    #[tokio::test]
    async fn test_catches_up_after_downtime() {
        let store = MemoryStore::new();
        store
            .insert_raw_points(&[point("BTC", 50.0, at(10, 8, 0))])
            .await
            .unwrap();
        let job = job(&store);

        let report = job.trigger(at(14, 12, 0), false).await.unwrap().unwrap();
        assert_eq!(report.hourly_written, 1);
        assert_eq!(report.raw_purged, 1);

        // the raw point is gone; a second run must not touch the bucket
        let report = job.trigger(at(14, 13, 0), false).await.unwrap().unwrap();
        assert_eq!(report.hourly_examined, 0);
        let hours = hourly(&store).await;
        assert_eq!(hours.len(), 1);
        assert_eq!(hours[0].avg, 50.0);
    }

    #[tokio::test]
    async fn test_failed_run_returns_to_idle() {
        let store = MemoryStore::new();
        store.set_available(false);
        let job = job(&store);

        assert!(job.trigger(at(14, 12, 0), false).await.unwrap().is_err());
        assert!(!job.is_running());

        store.set_available(true);
        assert!(job.trigger(at(14, 12, 0), false).await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_overlapping_trigger_is_dropped() {
        let store = MemoryStore::new();
        let job = job(&store);
        job.running.store(true, Ordering::SeqCst);

        assert!(job.trigger(at(14, 12, 0), false).await.is_none());
        // the dropped trigger must not clear the flag of the run in progress
        assert!(job.is_running());
    }
}
