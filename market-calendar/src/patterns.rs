//! Recurring pattern detection over a daily series.
//!
//! Detection is always a full scan of the series. Rules run in a fixed order and each emits
//! at most one [`PatternEvent`].

use crate::{
    stats::pearson_correlation,
    store::TimeSeries,
    types::DailyBar,
};
use chrono::{Datelike, NaiveDate, Weekday};
use derive_more::Display;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Detection thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct PatternConfig {
    /// Daily standard deviation above which a date is a volatility spike.
    pub volatility_threshold: f64,
    /// Multiple of mean volume above which a date is a volume anomaly.
    pub volume_spike_multiplier: f64,
    /// Absolute day-over-day close change (%) above which a date is a large move.
    pub price_change_threshold: f64,
    /// Minimum gap between weekend and weekday mean volatility.
    pub weekend_difference: f64,
    /// Minimum |r| between close and volume.
    pub correlation_threshold: f64,
    /// Dates with close and volume required before correlating them.
    pub correlation_min_samples: usize,
    /// Qualifying dates required before a discrete pattern is emitted.
    pub min_occurrences: usize,
    /// Bars required before any detection runs.
    pub min_history: usize,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            volatility_threshold: 5.0,
            volume_spike_multiplier: 2.0,
            price_change_threshold: 10.0,
            weekend_difference: 1.0,
            correlation_threshold: 0.7,
            correlation_min_samples: 5,
            min_occurrences: 2,
            min_history: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Display)]
#[serde(rename_all = "kebab-case")]
pub enum PatternKind {
    #[display("volatility-spikes")]
    VolatilitySpikes,
    #[display("volume-anomalies")]
    VolumeAnomalies,
    #[display("price-movements")]
    PriceMovements,
    #[display("weekend-effect")]
    WeekendEffect,
    #[display("price-volume-correlation")]
    PriceVolumeCorrelation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[display("low")]
    Low,
    #[display("medium")]
    Medium,
    #[display("high")]
    High,
}

/// How often a pattern's occurrences recur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Display)]
pub enum Frequency {
    Weekly,
    Monthly,
    Quarterly,
    Rare,
    /// Continuous relationship rather than discrete occurrences.
    Ongoing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[display("up")]
    Up,
    #[display("down")]
    Down,
}

/// The metric that put a date into a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(tag = "metric", rename_all = "snake_case")]
pub enum Trigger {
    Volatility { value: f64 },
    Volume { volume: f64 },
    PriceChange { change_percent: f64, direction: Direction },
    WeekendVolatility { volatility: f64 },
    PriceVolume { price: f64, volume: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Occurrence {
    pub date: NaiveDate,
    pub trigger: Trigger,
}

impl Occurrence {
    fn new(date: NaiveDate, trigger: Trigger) -> Self {
        Self { date, trigger }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PatternEvent {
    pub kind: PatternKind,
    pub severity: Severity,
    pub occurrences: Vec<Occurrence>,
    pub description: String,
    pub frequency: Frequency,
}

/// Run every rule over `series`, returning patterns in rule order.
pub fn detect_patterns(series: &TimeSeries, config: &PatternConfig) -> Vec<PatternEvent> {
    if series.len() < config.min_history {
        return Vec::new();
    }

    let bars: Vec<&DailyBar> = series.bars().collect();

    [
        volatility_spikes(&bars, config),
        volume_anomalies(&bars, config),
        price_movements(&bars, config),
        weekend_effect(&bars, config),
        price_volume_correlation(&bars, config),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// Classify the mean day gap between consecutive occurrence dates.
///
/// `<= 7` is weekly, `<= 30` monthly, `<= 90` quarterly, anything else (or fewer than two
/// dates) rare.
pub fn classify_frequency(dates: &[NaiveDate]) -> Frequency {
    if dates.len() < 2 {
        return Frequency::Rare;
    }

    let sorted: Vec<NaiveDate> = dates.iter().copied().sorted().collect();
    let gaps: Vec<i64> = sorted
        .iter()
        .tuple_windows()
        .map(|(prev, next)| (*next - *prev).num_days())
        .collect();
    let mean_gap = gaps.iter().sum::<i64>() as f64 / gaps.len() as f64;

    match mean_gap {
        gap if gap <= 7.0 => Frequency::Weekly,
        gap if gap <= 30.0 => Frequency::Monthly,
        gap if gap <= 90.0 => Frequency::Quarterly,
        _ => Frequency::Rare,
    }
}

fn discrete_pattern(
    kind: PatternKind,
    severity: Severity,
    occurrences: Vec<Occurrence>,
    description: String,
    config: &PatternConfig,
) -> Option<PatternEvent> {
    if occurrences.len() < config.min_occurrences.max(1) {
        return None;
    }

    let dates: Vec<NaiveDate> = occurrences.iter().map(|occurrence| occurrence.date).collect();
    Some(PatternEvent {
        kind,
        severity,
        frequency: classify_frequency(&dates),
        occurrences,
        description,
    })
}

fn volatility_spikes(bars: &[&DailyBar], config: &PatternConfig) -> Option<PatternEvent> {
    let spikes: Vec<Occurrence> = bars
        .iter()
        .filter_map(|bar| {
            let value = bar.volatility?.value;
            (value > config.volatility_threshold)
                .then(|| Occurrence::new(bar.date, Trigger::Volatility { value }))
        })
        .collect();

    let description = format!("{} high volatility events detected", spikes.len());
    discrete_pattern(
        PatternKind::VolatilitySpikes,
        Severity::High,
        spikes,
        description,
        config,
    )
}

fn volume_anomalies(bars: &[&DailyBar], config: &PatternConfig) -> Option<PatternEvent> {
    let volumes: Vec<(NaiveDate, f64)> = bars
        .iter()
        .filter_map(|bar| Some((bar.date, bar.volume?)))
        .collect();
    if volumes.is_empty() {
        return None;
    }

    let mean = volumes.iter().map(|(_, volume)| volume).sum::<f64>() / volumes.len() as f64;
    let threshold = mean * config.volume_spike_multiplier;

    let anomalies: Vec<Occurrence> = volumes
        .into_iter()
        .filter(|(_, volume)| *volume > threshold)
        .map(|(date, volume)| Occurrence::new(date, Trigger::Volume { volume }))
        .collect();

    let description = format!(
        "{} unusual volume events ({}x average)",
        anomalies.len(),
        config.volume_spike_multiplier
    );
    discrete_pattern(
        PatternKind::VolumeAnomalies,
        Severity::Medium,
        anomalies,
        description,
        config,
    )
}

fn price_movements(bars: &[&DailyBar], config: &PatternConfig) -> Option<PatternEvent> {
    let movements: Vec<Occurrence> = bars
        .iter()
        .tuple_windows()
        .filter_map(|(prev, curr)| {
            let (prev_close, curr_close) = (prev.close?, curr.close?);
            if prev_close <= 0.0 {
                return None;
            }

            let change_percent = ((curr_close - prev_close) / prev_close * 100.0).abs();
            let direction = if curr_close > prev_close {
                Direction::Up
            } else {
                Direction::Down
            };

            (change_percent > config.price_change_threshold).then(|| {
                Occurrence::new(
                    curr.date,
                    Trigger::PriceChange {
                        change_percent,
                        direction,
                    },
                )
            })
        })
        .collect();

    let description = format!(
        "{} major price changes (>{}%)",
        movements.len(),
        config.price_change_threshold
    );
    discrete_pattern(
        PatternKind::PriceMovements,
        Severity::Medium,
        movements,
        description,
        config,
    )
}

fn weekend_effect(bars: &[&DailyBar], config: &PatternConfig) -> Option<PatternEvent> {
    let (weekend, weekday): (Vec<(NaiveDate, f64)>, Vec<(NaiveDate, f64)>) = bars
        .iter()
        .filter_map(|bar| Some((bar.date, bar.volatility?.value)))
        .partition(|(date, _)| matches!(date.weekday(), Weekday::Sat | Weekday::Sun));

    if weekend.len() < 2 || weekday.len() < 2 {
        return None;
    }

    let mean = |set: &[(NaiveDate, f64)]| {
        set.iter().map(|(_, volatility)| volatility).sum::<f64>() / set.len() as f64
    };
    let (weekend_mean, weekday_mean) = (mean(&weekend), mean(&weekday));

    if (weekend_mean - weekday_mean).abs() <= config.weekend_difference {
        return None;
    }

    let description = format!(
        "Weekend volatility {} than weekdays ({:.2} vs {:.2})",
        if weekend_mean > weekday_mean {
            "higher"
        } else {
            "lower"
        },
        weekend_mean,
        weekday_mean
    );
    let occurrences: Vec<Occurrence> = weekend
        .into_iter()
        .map(|(date, volatility)| Occurrence::new(date, Trigger::WeekendVolatility { volatility }))
        .collect();
    let dates: Vec<NaiveDate> = occurrences.iter().map(|occurrence| occurrence.date).collect();

    Some(PatternEvent {
        kind: PatternKind::WeekendEffect,
        severity: Severity::Low,
        frequency: classify_frequency(&dates),
        occurrences,
        description,
    })
}

fn price_volume_correlation(bars: &[&DailyBar], config: &PatternConfig) -> Option<PatternEvent> {
    let pairs: Vec<(NaiveDate, f64, f64)> = bars
        .iter()
        .filter_map(|bar| {
            let (price, volume) = (bar.close?, bar.volume?);
            (volume > 0.0).then_some((bar.date, price, volume))
        })
        .collect();

    if pairs.len() < config.correlation_min_samples {
        return None;
    }

    let prices: Vec<f64> = pairs.iter().map(|(_, price, _)| *price).collect();
    let volumes: Vec<f64> = pairs.iter().map(|(_, _, volume)| *volume).collect();
    let correlation = pearson_correlation(&prices, &volumes);

    if correlation.abs() <= config.correlation_threshold {
        return None;
    }

    let (severity, sign) = if correlation > 0.0 {
        (Severity::Medium, "Positive")
    } else {
        (Severity::High, "Negative")
    };

    Some(PatternEvent {
        kind: PatternKind::PriceVolumeCorrelation,
        severity,
        occurrences: pairs
            .into_iter()
            .map(|(date, price, volume)| {
                Occurrence::new(date, Trigger::PriceVolume { price, volume })
            })
            .collect(),
        description: format!("{} correlation ({:.1}%)", sign, correlation * 100.0),
        frequency: Frequency::Ongoing,
    })
}
