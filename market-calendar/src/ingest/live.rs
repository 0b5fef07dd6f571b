use crate::{
    cache::{self, KeyValueCache, SharedCache, mid_prices_key, volatility_key},
    stats::standard_deviation,
    store::{SharedStore, SymbolTag},
    types::{BarUpdate, MidPriceSample, Volatility},
};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, info, warn};

/// Shortest period [`RollingVolatility::spawn`] accepts.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Recomputes today's volatility from the live mid price samples of the last `retention`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollingVolatility {
    pub retention: Duration,
}

impl Default for RollingVolatility {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl RollingVolatility {
    pub fn new(retention: Duration) -> Self {
        Self { retention }
    }

    /// One recomputation at `now`.
    ///
    /// Prunes samples older than the retention window, takes the standard deviation of the
    /// remaining prices and overwrites the volatility of today's (UTC) bar. The pruned sample
    /// list and the volatility snapshot are then persisted to `cache`. With no samples left
    /// nothing is written.
    pub fn tick(
        &self,
        store: &SharedStore,
        cache: &dyn KeyValueCache,
        tag: &SymbolTag,
        now: DateTime<Utc>,
    ) -> Option<Volatility> {
        let retention_ms = i64::try_from(self.retention.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now.timestamp_millis().saturating_sub(retention_ms);
        let today = now.date_naive();

        let samples: Vec<MidPriceSample> = {
            let mut store = store.write();
            if !store.is_current(tag) {
                return None;
            }
            let pruned = store.prune_samples(cutoff);
            if pruned > 0 {
                debug!(%tag, pruned, "pruned expired mid price samples");
            }
            store.samples().iter().copied().collect()
        };

        if samples.is_empty() {
            debug!(%tag, "no live samples, skipping volatility update");
            return None;
        }

        let prices: Vec<f64> = samples.iter().map(|sample| sample.price).collect();
        let volatility = Volatility::from_std(standard_deviation(&prices))?;

        {
            // Cache writes stay under the write guard, ordered against symbol switches.
            let mut store = store.write();
            if !store.apply(tag, today, BarUpdate::volatility(volatility)) {
                return None;
            }

            if let Err(error) = cache::save(cache, &mid_prices_key(&tag.symbol), &samples) {
                warn!(%tag, %error, "failed to persist mid price samples");
            }
            if let Err(error) = cache::save(cache, &volatility_key(&tag.symbol, today), &volatility)
            {
                warn!(%tag, %error, "failed to persist volatility snapshot");
            }
        }

        debug!(
            %tag,
            %today,
            samples = samples.len(),
            value = volatility.value,
            level = %volatility.level,
            "updated live volatility"
        );

        Some(volatility)
    }

    /// Run [`Self::tick`] every `interval` (at least 1 ms) until `tag` is stale. The first tick
    /// fires at once.
    pub fn spawn(
        self,
        store: SharedStore,
        cache: SharedCache,
        tag: SymbolTag,
        interval: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(MIN_INTERVAL));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                if !store.read().is_current(&tag) {
                    break;
                }
                self.tick(&store, cache.as_ref(), &tag, Utc::now());
            }

            info!(%tag, "live volatility timer stopped");
        })
    }
}

/// Reload the samples persisted for `tag` into the store, returning how many were restored.
pub fn restore_samples(store: &SharedStore, cache: &dyn KeyValueCache, tag: &SymbolTag) -> usize {
    let samples = match cache::load::<Vec<MidPriceSample>>(cache, &mid_prices_key(&tag.symbol)) {
        Ok(Some(samples)) => samples,
        Ok(None) => return 0,
        Err(error) => {
            warn!(%tag, %error, "ignoring unreadable cached mid price samples");
            return 0;
        }
    };

    let count = samples.len();
    if store.write().restore_samples(tag, samples) {
        info!(%tag, count, "restored cached mid price samples");
        count
    } else {
        0
    }
}
