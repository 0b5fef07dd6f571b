use super::{
    backfill::{BackfillResult, backfill_month},
    kline::{BinanceRest, KlineSource},
    live::{RollingVolatility, restore_samples},
    stream::{ConnectionStatus, DepthStreamConfig, spawn_depth_stream},
};
use crate::{
    cache::{self, SharedCache, symbol_prefix},
    config::CalendarConfig,
    error::CalendarError,
    store::{MarketStore, SharedStore, SymbolTag},
};
use chrono::NaiveDate;
use std::sync::Arc;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{info, warn};

/// Owns every ingestion task for the tracked symbol.
///
/// Each [`Self::start`] spawns a month backfill, the live depth stream and the rolling
/// volatility timer, all stamped with the store's current [`SymbolTag`]. Switching symbol
/// aborts the live tasks and resets the store. Backfills are left to run out, their writes fail
/// the tag check. Dropping the tracker aborts everything.
pub struct MarketTracker {
    config: CalendarConfig,
    store: SharedStore,
    cache: SharedCache,
    source: Arc<dyn KlineSource>,
    status_tx: watch::Sender<ConnectionStatus>,
    live_tasks: Vec<JoinHandle<()>>,
    backfills: Vec<JoinHandle<BackfillResult>>,
}

impl std::fmt::Debug for MarketTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketTracker")
            .field("symbol", &self.symbol())
            .field("live_tasks", &self.live_tasks.len())
            .field("backfills", &self.backfills.len())
            .finish_non_exhaustive()
    }
}

impl MarketTracker {
    pub fn new(config: CalendarConfig, source: Arc<dyn KlineSource>, cache: SharedCache) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            store: MarketStore::shared(config.symbol.clone()),
            config,
            cache,
            source,
            status_tx,
            live_tasks: Vec::new(),
            backfills: Vec::new(),
        }
    }

    /// Tracker backed by the Binance REST API and the cache `config` names.
    pub fn from_config(config: CalendarConfig) -> Result<Self, CalendarError> {
        let source = Arc::new(BinanceRest::new(
            config.rest_url.clone(),
            config.request_timeout,
        ));
        let cache = cache::open(config.cache_dir.as_deref())?;
        Ok(Self::new(config, source, cache))
    }

    pub fn store(&self) -> SharedStore {
        Arc::clone(&self.store)
    }

    pub fn cache(&self) -> SharedCache {
        Arc::clone(&self.cache)
    }

    pub fn config(&self) -> &CalendarConfig {
        &self.config
    }

    pub fn symbol(&self) -> String {
        self.store.read().symbol().to_string()
    }

    /// Subscribe to depth stream connection status.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// Restore cached samples, backfill the month of `today` and start live ingestion.
    pub fn start(&mut self, today: NaiveDate) {
        self.stop_live();

        let tag = self.store.read().tag();
        info!(%tag, %today, live_stream = self.config.live_stream, "starting market tracker");

        restore_samples(&self.store, self.cache.as_ref(), &tag);
        self.backfill_month(today);

        if self.config.live_stream {
            let config = DepthStreamConfig::new(self.config.ws_url.clone())
                .with_reconnect_delay(self.config.reconnect_delay);
            self.live_tasks.push(spawn_depth_stream(
                config,
                self.store(),
                tag.clone(),
                self.status_tx.clone(),
            ));
        }

        self.live_tasks.push(
            RollingVolatility::new(self.config.sample_retention).spawn(
                self.store(),
                self.cache(),
                tag,
                self.config.volatility_interval,
            ),
        );
    }

    /// Spawn a backfill of every day in the month containing `month` for the current symbol.
    pub fn backfill_month(&mut self, month: NaiveDate) {
        self.backfills.retain(|handle| !handle.is_finished());

        let tag = self.store.read().tag();
        let source = Arc::clone(&self.source);
        let store = self.store();

        self.backfills.push(tokio::spawn(async move {
            backfill_month(source.as_ref(), &store, &tag, month).await
        }));
    }

    /// Stop tracking the current symbol and start over with `symbol`.
    ///
    /// Bars, samples and cached entries of the previous symbol are dropped.
    pub fn switch_symbol(&mut self, symbol: &str, today: NaiveDate) -> SymbolTag {
        self.stop_live();

        let previous = self.symbol();
        let tag = self.store.write().reset(symbol.trim().to_uppercase());
        self.config.symbol = tag.symbol.clone();

        match self.cache.clear_prefix(&symbol_prefix(&previous)) {
            Ok(removed) => info!(%previous, %tag, removed, "switched symbol"),
            Err(error) => warn!(%previous, %tag, %error, "failed to clear cache of previous symbol"),
        }

        self.start(today);
        tag
    }

    /// Wait for every outstanding backfill.
    pub async fn join_backfills(&mut self) -> Vec<BackfillResult> {
        let mut results = Vec::with_capacity(self.backfills.len());
        for handle in self.backfills.drain(..) {
            match handle.await {
                Ok(result) => results.push(result),
                Err(error) => warn!(%error, "backfill task did not complete"),
            }
        }
        results
    }

    /// Abort every task, backfills included.
    pub fn shutdown(&mut self) {
        info!(symbol = %self.symbol(), "shutting down market tracker");
        self.stop_live();
        for handle in self.backfills.drain(..) {
            handle.abort();
        }
    }

    fn stop_live(&mut self) {
        for handle in self.live_tasks.drain(..) {
            handle.abort();
        }
        self.status_tx.send_replace(ConnectionStatus::Disconnected);
    }
}

impl Drop for MarketTracker {
    fn drop(&mut self) {
        self.live_tasks.iter().for_each(JoinHandle::abort);
        self.backfills.iter().for_each(JoinHandle::abort);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::{KeyValueCache, MemoryCache, mid_prices_key},
        ingest::kline::Kline,
        types::BarField,
    };
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;

    /// One kline per day whose close encodes the symbol: 1 for BTCUSDT, 2 otherwise.
    #[derive(Debug)]
    struct FakeSource;

    #[async_trait]
    impl KlineSource for FakeSource {
        async fn fetch_day(
            &self,
            symbol: &str,
            _day: NaiveDate,
        ) -> Result<Vec<Kline>, CalendarError> {
            let close = if symbol == "BTCUSDT" { 1.0 } else { 2.0 };
            Ok(vec![Kline {
                open_time: 0,
                open: close,
                high: close,
                low: close,
                close,
                volume: 1.0,
                quote_volume: close,
            }])
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 12).unwrap()
    }

    fn tracker(cache: SharedCache) -> MarketTracker {
        let config = CalendarConfig::new("BTCUSDT")
            .with_live_stream(false)
            .with_volatility_interval(Duration::from_secs(3600));
        MarketTracker::new(config, Arc::new(FakeSource), cache)
    }

    #[tokio::test]
    async fn test_start_backfills_month() {
        let mut tracker = tracker(Arc::new(MemoryCache::default()));

        tracker.start(today());
        let results = tracker.join_backfills().await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].days_written, 30);

        let store = tracker.store();
        let store = store.read();
        assert_eq!(store.series().len(), 30);
        assert!(
            store
                .series()
                .field_values(BarField::Close)
                .iter()
                .all(|close| *close == Some(1.0))
        );
    }

    #[tokio::test]
    async fn test_start_restores_cached_samples() {
        let cache: SharedCache = Arc::new(MemoryCache::default());
        let now_ms = Utc::now().timestamp_millis();
        cache
            .set(
                &mid_prices_key("BTCUSDT"),
                json!([{ "price": 1.0, "timestamp": now_ms }]),
            )
            .unwrap();
        let mut tracker = tracker(cache);

        tracker.start(today());

        assert_eq!(tracker.store().read().samples().len(), 1);
        tracker.shutdown();
    }

    #[tokio::test]
    async fn test_switch_symbol_clears_previous_symbol() {
        let cache: SharedCache = Arc::new(MemoryCache::default());
        let mut tracker = tracker(Arc::clone(&cache));

        tracker.start(today());
        tracker.join_backfills().await;
        cache.set(&mid_prices_key("BTCUSDT"), json!([])).unwrap();
        cache.set(&mid_prices_key("SOLUSDT"), json!([])).unwrap();

        let tag = tracker.switch_symbol("ethusdt", today());

        assert_eq!(tag, SymbolTag::new("ETHUSDT".to_string(), 1));
        assert_eq!(tracker.symbol(), "ETHUSDT");
        assert_eq!(tracker.config().symbol, "ETHUSDT");
        assert!(tracker.store().read().series().is_empty());
        assert_eq!(cache.get(&mid_prices_key("BTCUSDT")).unwrap(), None);
        assert_eq!(cache.get(&mid_prices_key("SOLUSDT")).unwrap(), Some(json!([])));

        tracker.join_backfills().await;

        let store = tracker.store();
        let store = store.read();
        assert_eq!(store.series().len(), 30);
        assert!(
            store
                .series()
                .field_values(BarField::Close)
                .iter()
                .all(|close| *close == Some(2.0))
        );
    }

    #[tokio::test]
    async fn test_shutdown_aborts_backfills() {
        let mut tracker = tracker(Arc::new(MemoryCache::default()));

        tracker.start(today());
        tracker.shutdown();

        assert!(tracker.join_backfills().await.is_empty());
        assert_eq!(*tracker.status().borrow(), ConnectionStatus::Disconnected);
    }
}
