//! Owned market state shared between ingestion and the query functions.
//!
//! Ingestion is the only writer. Every write carries the [`SymbolTag`] captured when the data
//! was requested, and is discarded if the tracked symbol changed in the meantime.

use crate::types::{BarField, BarUpdate, DailyBar, MidPriceSample};
use chrono::NaiveDate;
use derive_more::{Constructor, Display};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, VecDeque},
    sync::Arc,
};

/// Handle to the single [`MarketStore`] shared by every ingestion task.
///
/// Locks are only ever held for synchronous reads/writes, never across an `.await`.
pub type SharedStore = Arc<RwLock<MarketStore>>;

/// Identifies which symbol (and which tracking session of it) a write belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize, Constructor, Display)]
#[display("{symbol}#{generation}")]
pub struct SymbolTag {
    pub symbol: String,
    pub generation: u64,
}

/// Date ordered bars for one instrument symbol.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct TimeSeries {
    symbol: String,
    bars: BTreeMap<NaiveDate, DailyBar>,
}

impl TimeSeries {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            bars: BTreeMap::new(),
        }
    }

    /// Build a series from bars. A later bar for an already present date replaces it.
    pub fn from_bars(symbol: impl Into<String>, bars: impl IntoIterator<Item = DailyBar>) -> Self {
        let mut series = Self::new(symbol);
        for bar in bars {
            series.insert(bar);
        }
        series
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn get(&self, date: NaiveDate) -> Option<&DailyBar> {
        self.bars.get(&date)
    }

    /// Insert or replace a whole bar.
    pub fn insert(&mut self, bar: DailyBar) {
        self.bars.insert(bar.date, bar);
    }

    /// Merge `update` into the bar for `date`, creating it if needed. Empty updates are ignored
    /// so a date never gains a bar with nothing in it.
    pub fn upsert(&mut self, date: NaiveDate, update: BarUpdate) -> bool {
        if update.is_empty() {
            return false;
        }
        let bar = self
            .bars
            .entry(date)
            .or_insert_with(|| DailyBar::empty(date));
        update.apply(bar);
        true
    }

    /// Bars in ascending date order.
    pub fn bars(&self) -> impl Iterator<Item = &DailyBar> {
        self.bars.values()
    }

    /// Bars with `first <= date <= last`, ascending.
    pub fn range(&self, first: NaiveDate, last: NaiveDate) -> Vec<&DailyBar> {
        if first > last {
            return Vec::new();
        }
        self.bars.range(first..=last).map(|(_, bar)| bar).collect()
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.bars.keys().copied()
    }

    /// Project one column into the ordered `Option` shape the statistics functions consume.
    /// One slot per stored bar; dates without a bar are not slots.
    pub fn field_values(&self, field: BarField) -> Vec<Option<f64>> {
        self.bars.values().map(|bar| bar.value(field)).collect()
    }

    /// Same as [`Self::field_values`] but keeping the date alongside each slot.
    pub fn field_points(&self, field: BarField) -> Vec<(NaiveDate, Option<f64>)> {
        self.bars
            .values()
            .map(|bar| (bar.date, bar.value(field)))
            .collect()
    }

    fn reset(&mut self, symbol: String) {
        self.symbol = symbol;
        self.bars.clear();
    }
}

/// The single owned state of the calendar: tracked symbol, its bars and live mid price samples.
#[derive(Debug)]
pub struct MarketStore {
    generation: u64,
    series: TimeSeries,
    samples: VecDeque<MidPriceSample>,
}

impl MarketStore {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            generation: 0,
            series: TimeSeries::new(symbol),
            samples: VecDeque::new(),
        }
    }

    /// Construct a new store wrapped in a [`SharedStore`].
    pub fn shared(symbol: impl Into<String>) -> SharedStore {
        Arc::new(RwLock::new(Self::new(symbol)))
    }

    pub fn symbol(&self) -> &str {
        self.series.symbol()
    }

    /// Tag to stamp on requests issued for the currently tracked symbol.
    pub fn tag(&self) -> SymbolTag {
        SymbolTag::new(self.symbol().to_string(), self.generation)
    }

    pub fn is_current(&self, tag: &SymbolTag) -> bool {
        tag.generation == self.generation && tag.symbol == self.symbol()
    }

    pub fn series(&self) -> &TimeSeries {
        &self.series
    }

    /// Write `update` into the bar for `date` if `tag` is still current.
    pub fn apply(&mut self, tag: &SymbolTag, date: NaiveDate, update: BarUpdate) -> bool {
        if !self.is_current(tag) {
            return false;
        }
        self.series.upsert(date, update)
    }

    /// Append a live sample if `tag` is still current.
    pub fn push_sample(&mut self, tag: &SymbolTag, sample: MidPriceSample) -> bool {
        if !self.is_current(tag) {
            return false;
        }
        self.samples.push_back(sample);
        true
    }

    /// Replace the live samples with a previously persisted list, if `tag` is still current.
    pub fn restore_samples(&mut self, tag: &SymbolTag, samples: Vec<MidPriceSample>) -> bool {
        if !self.is_current(tag) {
            return false;
        }
        self.samples = samples.into();
        true
    }

    pub fn samples(&self) -> &VecDeque<MidPriceSample> {
        &self.samples
    }

    /// Drop samples with `timestamp < cutoff_ms`, returning how many were removed.
    pub fn prune_samples(&mut self, cutoff_ms: i64) -> usize {
        let before = self.samples.len();
        self.samples.retain(|sample| sample.timestamp >= cutoff_ms);
        before - self.samples.len()
    }

    /// Start tracking `symbol` from scratch. Every bar and sample of the previous symbol is
    /// dropped and outstanding tags become stale.
    pub fn reset(&mut self, symbol: impl Into<String>) -> SymbolTag {
        self.generation += 1;
        self.series.reset(symbol.into());
        self.samples.clear();
        self.tag()
    }
}
