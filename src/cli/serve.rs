use crate::aggregation::AggregationJob;
use crate::core::config::AppConfig;
use crate::core::store::PriceStore;
use crate::exchange::Exchange;
use crate::recorder::{HistoryRecorder, RecorderSettings};
use anyhow::Result;
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Runs every periodic task until `shutdown_signal` resolves, then stops
/// them and waits for the final history flush.
pub async fn run_until<F>(
    config: &AppConfig,
    exchange: Arc<Exchange>,
    store: Option<Arc<dyn PriceStore>>,
    shutdown_signal: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    let (tx, rx) = watch::channel(false);
    let mut handles = Vec::new();

    for class in exchange.classes() {
        let period = config.refresh.interval(class);
        handles.push(tokio::spawn(Arc::clone(&exchange).run(class, period, rx.clone())));
    }

    if let Some(store) = store {
        let history = &config.history;
        let recorder = Arc::new(HistoryRecorder::new(
            Arc::clone(&exchange),
            Arc::clone(&store),
            RecorderSettings::from(history),
        ));
        let record_every = Duration::from_secs(history.record_interval_secs.max(1));
        handles.push(tokio::spawn(recorder.run(record_every, rx.clone())));

        let job = Arc::new(AggregationJob::new(store, history));
        let aggregate_every = Duration::from_secs(history.aggregation_interval_secs.max(1));
        handles.push(tokio::spawn(job.run(aggregate_every, rx.clone())));
    }

    info!(tasks = handles.len(), "xrate is running, press Ctrl-C to stop");
    shutdown_signal.await;
    info!("Shutting down");

    if tx.send(true).is_err() {
        debug!("All tasks already stopped");
    }
    for result in join_all(handles).await {
        if let Err(e) = result {
            error!(error = %e, "Task ended abnormally");
        }
    }
    Ok(())
}

pub async fn run(
    config: &AppConfig,
    exchange: Arc<Exchange>,
    store: Option<Arc<dyn PriceStore>>,
) -> Result<()> {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
        }
    };
    run_until(config, exchange, store, ctrl_c).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::asset::AssetClass;
    use crate::core::config::HistoryConfig;
    use crate::exchange::tests::{StaticSource, exchange};
    use crate::store::memory::MemoryStore;
    use chrono::{Duration as ChronoDuration, Utc};

    #[tokio::test(start_paused = true)]
    async fn test_serve_records_until_shutdown() {
        let ex = Arc::new(exchange(vec![Arc::new(StaticSource::new(
            "a",
            AssetClass::Crypto,
            &[("BTC", 100.0)],
        ))]));
        let store = MemoryStore::new();
        let config = AppConfig {
            history: HistoryConfig {
                record_interval_secs: 10,
                ..HistoryConfig::default()
            },
            ..AppConfig::default()
        };

        let shutdown = tokio::time::sleep(Duration::from_secs(15));
        run_until(&config, Arc::clone(&ex), Some(Arc::new(store.clone())), async {
            shutdown.await
        })
        .await
        .unwrap();

        assert_eq!(ex.get_rate("BTC", "USD"), Some(100.0));
        let day = ChronoDuration::days(1);
        let points = store
            .raw_points_between(Utc::now() - day, Utc::now() + day)
            .await
            .unwrap();
        // one snapshot at t=10s: USD and BTC
        assert_eq!(points.len(), 2);
    }
}
