use super::kline::{KlineSource, summarize_day};
use crate::{
    store::{SharedStore, SymbolTag},
    views::{days_between, month_bounds},
};
use chrono::NaiveDate;
use tracing::{debug, info, warn};

/// Backfill result for a date range
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillResult {
    pub days_requested: usize,
    pub days_written: usize,
    /// Days the exchange answered with no klines.
    pub days_empty: usize,
    pub days_failed: usize,
    /// The tracked symbol changed before the range completed.
    pub stale: bool,
}

/// Fetch and store one bar per UTC day from `first` to `last`, ascending and one request at a
/// time.
///
/// A failed or empty day is left without a bar and the loop moves on. Once `tag` is stale the
/// remaining days are not requested.
pub async fn backfill_range<S>(
    source: &S,
    store: &SharedStore,
    tag: &SymbolTag,
    first: NaiveDate,
    last: NaiveDate,
) -> BackfillResult
where
    S: KlineSource + ?Sized,
{
    let mut result = BackfillResult::default();

    for day in days_between(first, last) {
        if !store.read().is_current(tag) {
            result.stale = true;
            break;
        }
        result.days_requested += 1;

        let klines = match source.fetch_day(&tag.symbol, day).await {
            Ok(klines) => klines,
            Err(error) if error.is_transient() => {
                warn!(%tag, %day, %error, "backfill request failed");
                result.days_failed += 1;
                continue;
            }
            Err(error) => {
                debug!(%tag, %day, %error, "backfill day rejected");
                result.days_failed += 1;
                continue;
            }
        };

        let Some(update) = summarize_day(&klines) else {
            debug!(%tag, %day, "no klines for day");
            result.days_empty += 1;
            continue;
        };

        if store.write().apply(tag, day, update) {
            result.days_written += 1;
        } else {
            result.stale = true;
            break;
        }
    }

    info!(
        %tag,
        %first,
        %last,
        written = result.days_written,
        empty = result.days_empty,
        failed = result.days_failed,
        stale = result.stale,
        "backfill finished"
    );

    result
}

/// [`backfill_range`] over every day of the month containing `month`.
pub async fn backfill_month<S>(
    source: &S,
    store: &SharedStore,
    tag: &SymbolTag,
    month: NaiveDate,
) -> BackfillResult
where
    S: KlineSource + ?Sized,
{
    let (first, last) = month_bounds(month);
    backfill_range(source, store, tag, first, last).await
}
