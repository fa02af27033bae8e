//! Periodic snapshots of consensus prices into the raw history tier.

use crate::core::asset::{AssetClass, USD};
use crate::core::config::HistoryConfig;
use crate::core::error::StoreError;
use crate::core::history::RawPricePoint;
use crate::core::store::PriceStore;
use crate::exchange::Exchange;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct RecorderSettings {
    pub batch_size: usize,
    pub batch_latency: Duration,
    pub max_buffer: usize,
}

impl From<&HistoryConfig> for RecorderSettings {
    fn from(config: &HistoryConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            batch_latency: Duration::from_secs(config.batch_latency_secs),
            max_buffer: config.max_buffer.max(config.batch_size),
        }
    }
}

#[derive(Default)]
struct Buffer {
    points: VecDeque<RawPricePoint>,
    first_buffered_at: Option<Instant>,
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

pub struct HistoryRecorder {
    exchange: Arc<Exchange>,
    store: Arc<dyn PriceStore>,
    settings: RecorderSettings,
    buffer: Mutex<Buffer>,
    flush_lock: Mutex<()>,
    dropped: AtomicU64,
}

impl HistoryRecorder {
    pub fn new(
        exchange: Arc<Exchange>,
        store: Arc<dyn PriceStore>,
        settings: RecorderSettings,
    ) -> Self {
        Self {
            exchange,
            store,
            settings,
            buffer: Mutex::new(Buffer::default()),
            flush_lock: Mutex::new(()),
            dropped: AtomicU64::new(0),
        }
    }

    /// Current USD price of every tracked, non-stale asset.
    ///
    /// Stocks are converted through their quote currency; assets without a
    /// USD pivot are skipped. `USD` itself is always recorded at 1.
    pub fn snapshot_points(&self, timestamp: DateTime<Utc>) -> Vec<RawPricePoint> {
        let snapshot = self.exchange.snapshot();
        let rates = snapshot.rates();
        let mut points = vec![RawPricePoint {
            symbol: USD.to_string(),
            asset_class: AssetClass::Currency,
            price_usd: 1.0,
            timestamp,
        }];

        for class in AssetClass::ALL {
            let Some(book) = snapshot.book(class) else {
                continue;
            };
            for (asset, consensus) in book.iter().filter(|(_, c)| !c.stale) {
                let price_usd = match class {
                    AssetClass::Stock => rates.usd_value(asset),
                    _ => Some(consensus.price),
                };
                match price_usd {
                    Some(price_usd) if price_usd.is_finite() && price_usd > 0.0 => {
                        points.push(RawPricePoint {
                            symbol: asset.clone(),
                            asset_class: class,
                            price_usd,
                            timestamp,
                        })
                    }
                    _ => debug!(asset = %asset, "No USD price to record"),
                }
            }
        }
        points
    }

    /// Buffers one snapshot, flushing when the batch size is reached.
    pub async fn record(&self, timestamp: DateTime<Utc>) -> usize {
        let points = self.snapshot_points(timestamp);
        let count = points.len();
        let full = {
            let mut buffer = self.buffer.lock().await;
            if buffer.first_buffered_at.is_none() {
                buffer.first_buffered_at = Some(Instant::now());
            }
            buffer.points.extend(points);
            self.enforce_bound(&mut buffer);
            buffer.points.len() >= self.settings.batch_size
        };
        debug!(count, "Queued price points");

        if full {
            if let Err(e) = self.flush().await {
                error!(error = %e, "Failed to flush price history batch, will retry");
            }
        }
        count
    }

    fn enforce_bound(&self, buffer: &mut Buffer) {
        let overflow = buffer.points.len().saturating_sub(self.settings.max_buffer);
        if overflow > 0 {
            buffer.points.drain(..overflow);
            let overflow = overflow as u64;
            let total = self.dropped.fetch_add(overflow, Ordering::Relaxed) + overflow;
            warn!(
                dropped = overflow,
                total_dropped = total,
                "History buffer full, dropped oldest points"
            );
        }
    }

    /// Writes everything buffered to the raw tier. On failure the batch goes
    /// back to the front of the buffer.
    pub async fn flush(&self) -> Result<usize, StoreError> {
        let _flushing = self.flush_lock.lock().await;
        let batch: Vec<RawPricePoint> = {
            let mut buffer = self.buffer.lock().await;
            buffer.first_buffered_at = None;
            buffer.points.drain(..).collect()
        };
        if batch.is_empty() {
            return Ok(0);
        }

        match self.store.insert_raw_points(&batch).await {
            Ok(()) => {
                debug!(count = batch.len(), "Flushed price history batch");
                Ok(batch.len())
            }
            Err(e) => {
                let mut buffer = self.buffer.lock().await;
                for point in batch.into_iter().rev() {
                    buffer.points.push_front(point);
                }
                buffer.first_buffered_at = Some(Instant::now());
                self.enforce_bound(&mut buffer);
                Err(e)
            }
        }
    }

    async fn flush_deadline(&self) -> Option<Instant> {
        let buffer = self.buffer.lock().await;
        buffer
            .first_buffered_at
            .map(|first| first + self.settings.batch_latency)
    }

    pub async fn buffered(&self) -> usize {
        self.buffer.lock().await.points.len()
    }

    /// Points discarded because the buffer hit its bound.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Records every `period` and flushes on the latency deadline until
    /// `shutdown` flips to true, then flushes one last time.
    pub async fn run(self: Arc<Self>, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut timer = tokio::time::interval(period);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // first snapshot only after the exchange had a chance to fill
        timer.tick().await;
        info!(period_secs = period.as_secs(), "Starting history recorder");

        loop {
            let deadline = self.flush_deadline().await;
            tokio::select! {
                _ = timer.tick() => {
                    self.record(Utc::now()).await;
                }
                _ = sleep_until_deadline(deadline), if deadline.is_some() => {
                    if let Err(e) = self.flush().await {
                        error!(error = %e, "Failed to flush price history batch, will retry");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        match self.flush().await {
            Ok(count) => info!(count, "History recorder stopped"),
            Err(e) => {
                let lost = self.buffered().await;
                error!(error = %e, lost, "Final history flush failed");
            }
        }
    }
}
