//! Per-class fetch cycles and the consensus/rate snapshot they maintain.

use crate::core::asset::{AssetClass, ConsensusPrice, Quote, USD};
use crate::core::consensus::build_all;
use crate::core::error::SourceError;
use crate::core::rates::{NativePrice, RateInputs, Rates};
use crate::core::source::PriceSource;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, instrument, warn};

/// One consistent view of every consensus book and the rates derived from
/// them. Never mutated after construction.
#[derive(Debug)]
pub struct Snapshot {
    books: HashMap<AssetClass, BTreeMap<String, ConsensusPrice>>,
    rates: Rates,
    updated_at: HashMap<AssetClass, DateTime<Utc>>,
}

impl Default for Snapshot {
    /// No prices yet, only the USD pivot.
    fn default() -> Self {
        Self::new(HashMap::new(), HashMap::new())
    }
}

impl Snapshot {
    fn new(
        books: HashMap<AssetClass, BTreeMap<String, ConsensusPrice>>,
        updated_at: HashMap<AssetClass, DateTime<Utc>>,
    ) -> Self {
        let book = |class| books.get(&class).into_iter().flat_map(|b| b.iter());
        let usd = |class| {
            book(class)
                .map(|(asset, c)| (asset.clone(), c.price))
                .collect::<BTreeMap<_, _>>()
        };
        let inputs = RateInputs {
            currencies: usd(AssetClass::Currency),
            metals: usd(AssetClass::Metal),
            crypto: usd(AssetClass::Crypto),
            stocks: book(AssetClass::Stock)
                .map(|(asset, c)| {
                    let native = NativePrice {
                        price: c.price,
                        currency: c.currency.clone(),
                    };
                    (asset.clone(), native)
                })
                .collect(),
        };
        let rates = Rates::build(&inputs);
        Self {
            books,
            rates,
            updated_at,
        }
    }

    pub fn rates(&self) -> &Rates {
        &self.rates
    }

    pub fn book(&self, class: AssetClass) -> Option<&BTreeMap<String, ConsensusPrice>> {
        self.books.get(&class)
    }

    pub fn consensus(&self, asset: &str) -> Option<&ConsensusPrice> {
        AssetClass::ALL
            .iter()
            .find_map(|class| self.books.get(class)?.get(asset))
    }

    pub fn updated_at(&self, class: AssetClass) -> Option<DateTime<Utc>> {
        self.updated_at.get(&class).copied()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefreshReport {
    pub class: AssetClass,
    pub sources_ok: usize,
    pub sources_failed: usize,
    pub fresh: usize,
    pub stale: usize,
}

/// Owns the consensus books and rate matrices and keeps them current.
pub struct Exchange {
    sources: Vec<Arc<dyn PriceSource>>,
    outlier_band: f64,
    source_timeout: Duration,
    crypto_allow_list: Option<BTreeSet<String>>,
    snapshot: RwLock<Arc<Snapshot>>,
    writer: Mutex<()>,
}

impl Exchange {
    pub fn new(
        sources: Vec<Arc<dyn PriceSource>>,
        outlier_band: f64,
        source_timeout: Duration,
    ) -> Self {
        Self {
            sources,
            outlier_band,
            source_timeout,
            crypto_allow_list: None,
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
            writer: Mutex::new(()),
        }
    }

    pub fn with_crypto_allow_list(mut self, allowed: Option<&[String]>) -> Self {
        self.crypto_allow_list =
            allowed.map(|assets| assets.iter().map(|a| a.to_uppercase()).collect());
        self
    }

    /// Current snapshot. Cheap; readers never see a half-applied update.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        let guard = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    fn publish(&self, snapshot: Snapshot) {
        let mut guard = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(snapshot);
    }

    pub fn classes(&self) -> BTreeSet<AssetClass> {
        self.sources.iter().map(|s| s.asset_class()).collect()
    }

    pub fn get_rate(&self, from: &str, to: &str) -> Option<f64> {
        self.snapshot()
            .rates()
            .get_rate(&from.to_uppercase(), &to.to_uppercase())
    }

    pub fn get_consensus(&self, asset: &str) -> Option<ConsensusPrice> {
        self.snapshot().consensus(&asset.to_uppercase()).cloned()
    }

    pub fn convert(&self, amount: f64, from: &str, to: &str) -> Option<f64> {
        self.snapshot()
            .rates()
            .convert(amount, &from.to_uppercase(), &to.to_uppercase())
    }

    pub fn supported_assets(&self, class: AssetClass) -> Vec<String> {
        let snapshot = self.snapshot();
        let mut assets: Vec<String> = snapshot
            .book(class)
            .map(|book| book.keys().cloned().collect())
            .unwrap_or_default();
        if class == AssetClass::Currency && !assets.iter().any(|a| a == USD) {
            assets.push(USD.to_string());
            assets.sort();
        }
        assets
    }

    async fn fetch_source(&self, source: &Arc<dyn PriceSource>) -> Result<Vec<Quote>, SourceError> {
        match tokio::time::timeout(self.source_timeout, source.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout(source.name().to_string())),
        }
    }

    fn accepts(&self, class: AssetClass, quote: &Quote) -> bool {
        match class {
            AssetClass::Currency => quote.asset != USD,
            AssetClass::Crypto => self
                .crypto_allow_list
                .as_ref()
                .is_none_or(|allowed| allowed.contains(&quote.asset)),
            _ => true,
        }
    }

    /// Runs one fetch cycle for `class`: every source in parallel, each under
    /// the source timeout, then consensus and a new snapshot.
    ///
    /// Assets nobody quoted this cycle keep their previous price, marked
    /// stale.
    #[instrument(name = "RefreshCycle", skip(self), fields(class = %class))]
    pub async fn refresh(&self, class: AssetClass) -> RefreshReport {
        let sources: Vec<&Arc<dyn PriceSource>> = self
            .sources
            .iter()
            .filter(|s| s.asset_class() == class)
            .collect();
        let results = join_all(sources.iter().map(|s| self.fetch_source(s))).await;

        let mut quotes = Vec::new();
        let (mut sources_ok, mut sources_failed) = (0, 0);
        for (source, result) in sources.iter().zip(results) {
            match result {
                Ok(fetched) => {
                    sources_ok += 1;
                    debug!(source = source.name(), count = fetched.len(), "Source answered");
                    quotes.extend(fetched.into_iter().map(|mut q| {
                        q.asset = q.asset.to_uppercase();
                        q
                    }));
                }
                Err(e) => {
                    sources_failed += 1;
                    warn!(
                        source = source.name(),
                        error = %e,
                        "Source failed, excluded from this cycle"
                    );
                }
            }
        }
        quotes.retain(|q| self.accepts(class, q));

        let mut book = build_all(quotes, self.outlier_band);
        let fresh = book.len();

        let _writer = self.writer.lock().await;
        let current = self.snapshot();
        let mut stale = 0;
        if let Some(previous) = current.book(class) {
            for (asset, price) in previous {
                if !book.contains_key(asset) {
                    stale += 1;
                    let mut retained = price.clone();
                    retained.stale = true;
                    book.insert(asset.clone(), retained);
                }
            }
        }

        let mut books = current.books.clone();
        books.insert(class, book);
        let mut updated_at = current.updated_at.clone();
        if fresh > 0 {
            updated_at.insert(class, Utc::now());
        }
        self.publish(Snapshot::new(books, updated_at));

        let report = RefreshReport {
            class,
            sources_ok,
            sources_failed,
            fresh,
            stale,
        };
        debug!(?report, "Refresh cycle complete");
        report
    }

    /// Refreshes every class that has at least one source, concurrently.
    pub async fn refresh_all(&self) -> Vec<RefreshReport> {
        join_all(self.classes().into_iter().map(|class| self.refresh(class))).await
    }

    /// Refreshes `class` every `period` until `shutdown` flips to true.
    pub async fn run(
        self: Arc<Self>,
        class: AssetClass,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut timer = tokio::time::interval(period);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(class = %class, period_secs = period.as_secs(), "Starting refresh loop");

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    self.refresh(class).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(class = %class, "Refresh loop shutting down");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Source returning fixed quotes, or failing while switched off.
    pub(crate) struct StaticSource {
        name: String,
        class: AssetClass,
        quotes: std::sync::Mutex<Vec<Quote>>,
        failing: AtomicBool,
        delay: Option<Duration>,
    }

    impl StaticSource {
        pub(crate) fn new(name: &str, class: AssetClass, quotes: &[(&str, f64)]) -> Self {
            Self::with_currency(name, class, quotes, USD)
        }

        pub(crate) fn with_currency(
            name: &str,
            class: AssetClass,
            quotes: &[(&str, f64)],
            currency: &str,
        ) -> Self {
            let quotes = quotes
                .iter()
                .map(|(asset, price)| Quote {
                    currency: currency.to_string(),
                    ..Quote::usd(name, *asset, *price)
                })
                .collect();
            Self {
                name: name.to_string(),
                class,
                quotes: std::sync::Mutex::new(quotes),
                failing: AtomicBool::new(false),
                delay: None,
            }
        }

        fn slow(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub(crate) fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl PriceSource for StaticSource {
        fn name(&self) -> &str {
            &self.name
        }

        fn asset_class(&self) -> AssetClass {
            self.class
        }

        async fn fetch(&self) -> Result<Vec<Quote>, SourceError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(SourceError::Api {
                    source_name: self.name.clone(),
                    message: "switched off".to_string(),
                });
            }
            Ok(self.quotes.lock().unwrap().clone())
        }
    }

    pub(crate) fn exchange(sources: Vec<Arc<dyn PriceSource>>) -> Exchange {
        Exchange::new(sources, 0.2, Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_refresh_builds_consensus_and_rates() {
        let ex = exchange(vec![
            Arc::new(StaticSource::new("a", AssetClass::Crypto, &[("BTC", 100.0), ("eth", 10.0)])),
            Arc::new(StaticSource::new("b", AssetClass::Crypto, &[("BTC", 102.0)])),
            Arc::new(StaticSource::new("c", AssetClass::Crypto, &[("BTC", 1000.0)])),
            Arc::new(StaticSource::new("fx", AssetClass::Currency, &[("EUR", 1.25), ("USD", 1.0)])),
        ]);
        let reports = ex.refresh_all().await;
        assert_eq!(reports.len(), 2);

        let btc = ex.get_consensus("btc").unwrap();
        assert_eq!(btc.price, 101.0);
        assert_eq!(btc.sources, vec!["a", "b"]);
        assert_eq!(ex.get_consensus("ETH").unwrap().price, 10.0);

        assert_eq!(ex.get_rate("BTC", "USD"), Some(101.0));
        assert_eq!(ex.get_rate("BTC", "EUR"), Some(80.8));
        assert_eq!(ex.get_rate("EUR", "EUR"), Some(1.0));
        assert_eq!(ex.convert(2.0, "EUR", "USD"), Some(2.5));
        assert_eq!(ex.get_rate("BTC", "XYZ"), None);
        assert_eq!(ex.supported_assets(AssetClass::Currency), vec!["EUR", "USD"]);
    }

    #[tokio::test]
    async fn test_failed_and_slow_sources_are_excluded() {
        let failing = Arc::new(StaticSource::new("down", AssetClass::Metal, &[("GOLD", 1.0)]));
        failing.set_failing(true);
        let ex = exchange(vec![
            Arc::new(StaticSource::new("up", AssetClass::Metal, &[("GOLD", 80.0)])),
            Arc::new(
                StaticSource::new("slow", AssetClass::Metal, &[("GOLD", 500.0)])
                    .slow(Duration::from_secs(5)),
            ),
            failing,
        ]);

        let report = ex.refresh(AssetClass::Metal).await;
        assert_eq!(report.sources_ok, 1);
        assert_eq!(report.sources_failed, 2);
        let gold = ex.get_consensus("GOLD").unwrap();
        assert_eq!(gold.price, 80.0);
        assert_eq!(gold.sources, vec!["up"]);
    }

    #[tokio::test]
    async fn test_unanswered_assets_are_kept_stale() {
        let source = Arc::new(StaticSource::new("a", AssetClass::Crypto, &[("BTC", 100.0)]));
        let ex = exchange(vec![source.clone()]);

        ex.refresh(AssetClass::Crypto).await;
        let before = ex.snapshot();
        source.set_failing(true);
        let report = ex.refresh(AssetClass::Crypto).await;

        assert_eq!(report.fresh, 0);
        assert_eq!(report.stale, 1);
        let btc = ex.get_consensus("BTC").unwrap();
        assert!(btc.stale);
        assert_eq!(btc.price, 100.0);
        assert_eq!(ex.get_rate("BTC", "USD"), Some(100.0));
        // readers holding the old snapshot are unaffected
        assert!(!before.consensus("BTC").unwrap().stale);

        source.set_failing(false);
        ex.refresh(AssetClass::Crypto).await;
        assert!(!ex.get_consensus("BTC").unwrap().stale);
    }

    #[tokio::test]
    async fn test_crypto_allow_list() {
        let ex = exchange(vec![Arc::new(StaticSource::new(
            "a",
            AssetClass::Crypto,
            &[("BTC", 100.0), ("DOGE", 0.1)],
        ))])
        .with_crypto_allow_list(Some(&["btc".to_string()]));
        ex.refresh(AssetClass::Crypto).await;
        assert!(ex.get_consensus("BTC").is_some());
        assert!(ex.get_consensus("DOGE").is_none());
    }

    #[tokio::test]
    async fn test_stock_rates_use_native_currency() {
        let ex = exchange(vec![
            Arc::new(StaticSource::with_currency(
                "y",
                AssetClass::Stock,
                &[("SHEL.L", 27.5)],
                "GBP",
            )),
            Arc::new(StaticSource::new("fx", AssetClass::Currency, &[("GBP", 1.2)])),
        ]);
        ex.refresh_all().await;
        assert_eq!(ex.get_rate("SHEL.L", "GBP"), Some(27.5));
        assert_eq!(ex.get_rate("SHEL.L", "USD"), Some(33.0));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let ex = Arc::new(exchange(vec![Arc::new(StaticSource::new(
            "a",
            AssetClass::Crypto,
            &[("BTC", 100.0)],
        ))]));
        let (tx, rx) = watch::channel(false);
        let period = Duration::from_secs(30);
        let handle = tokio::spawn(Arc::clone(&ex).run(AssetClass::Crypto, period, rx));

        // the first tick fires immediately
        for _ in 0..50 {
            if ex.get_consensus("BTC").is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(ex.get_consensus("BTC").is_some());
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
