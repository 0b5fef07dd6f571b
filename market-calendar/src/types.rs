//! Core data types for the market calendar.
//!
//! Every numeric field on a [`DailyBar`] is optional: `None` means the exchange had no data for
//! that date and every aggregation must skip it rather than read it as zero.

use chrono::NaiveDate;
use derive_more::{Constructor, Display};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Standard deviation below which a day is classified [`VolatilityLevel::Low`].
pub const LOW_VOLATILITY_CEILING: f64 = 1.0;

/// Standard deviation from which a day is classified [`VolatilityLevel::High`].
pub const HIGH_VOLATILITY_FLOOR: f64 = 5.0;

/// Classification of a standard deviation value.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "lowercase")]
pub enum VolatilityLevel {
    #[display("low")]
    Low,
    #[display("medium")]
    Medium,
    #[display("high")]
    High,
}

impl VolatilityLevel {
    /// `value < 1` is low, `1 <= value < 5` is medium, anything else is high.
    pub fn from_std(value: f64) -> Self {
        if value < LOW_VOLATILITY_CEILING {
            VolatilityLevel::Low
        } else if value < HIGH_VOLATILITY_FLOOR {
            VolatilityLevel::Medium
        } else {
            VolatilityLevel::High
        }
    }
}

/// A standard deviation together with its derived [`VolatilityLevel`].
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Volatility {
    pub level: VolatilityLevel,
    pub value: f64,
}

impl Volatility {
    /// Build from a raw standard deviation, deriving the level. Negative or non-finite values
    /// are not a standard deviation and yield `None`.
    pub fn from_std(value: f64) -> Option<Self> {
        (value.is_finite() && value >= 0.0).then(|| Self {
            level: VolatilityLevel::from_std(value),
            value,
        })
    }

    /// Normalise the loosely shaped volatility payloads seen at the ingestion boundary.
    ///
    /// Accepts a bare number (`5.2`), a numeric string (`"5.2"`), or an object carrying the
    /// number under `value`, `volatility` or `price`. Any `level` in the payload is ignored and
    /// re-derived from the number.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        fn number(value: &Value) -> Option<f64> {
            match value {
                Value::Number(number) => number.as_f64(),
                Value::String(text) => text.trim().parse().ok(),
                _ => None,
            }
        }

        let raw = match payload {
            Value::Object(fields) => ["value", "volatility", "price"]
                .iter()
                .find_map(|key| fields.get(*key).and_then(number)),
            other => number(other),
        }?;

        Self::from_std(raw)
    }
}

/// One calendar date's market summary.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
    /// Quote asset volume, used as a stand-in for market depth.
    pub liquidity: Option<f64>,
    pub volatility: Option<Volatility>,
}

impl DailyBar {
    /// Construct a bar with every value missing.
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            open: None,
            high: None,
            low: None,
            close: None,
            volume: None,
            liquidity: None,
            volatility: None,
        }
    }

    /// Read a single numeric field. Volatility reads as its standard deviation.
    pub fn value(&self, field: BarField) -> Option<f64> {
        match field {
            BarField::Open => self.open,
            BarField::High => self.high,
            BarField::Low => self.low,
            BarField::Close => self.close,
            BarField::Volume => self.volume,
            BarField::Liquidity => self.liquidity,
            BarField::Volatility => self.volatility.map(|volatility| volatility.value),
        }
    }
}

/// Selector for one numeric column of a [`DailyBar`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum BarField {
    #[display("open")]
    Open,
    #[display("high")]
    High,
    #[display("low")]
    Low,
    #[display("close")]
    Close,
    #[display("volume")]
    Volume,
    #[display("liquidity")]
    Liquidity,
    #[display("volatility")]
    Volatility,
}

/// Normalised partial write into a [`DailyBar`].
///
/// Applying an update overwrites only the fields it carries. Backfill carries everything, the
/// live rolling volatility carries only `volatility`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct BarUpdate {
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
    pub liquidity: Option<f64>,
    pub volatility: Option<Volatility>,
}

impl BarUpdate {
    /// Update carrying only a volatility value.
    pub fn volatility(volatility: Volatility) -> Self {
        Self {
            volatility: Some(volatility),
            ..Default::default()
        }
    }

    /// Merge into `bar`. Non-finite numbers are malformed input and are not carried.
    pub fn apply(self, bar: &mut DailyBar) {
        fn overwrite(slot: &mut Option<f64>, value: Option<f64>) {
            if let Some(value) = value.filter(|value| value.is_finite()) {
                *slot = Some(value);
            }
        }

        overwrite(&mut bar.open, self.open);
        overwrite(&mut bar.high, self.high);
        overwrite(&mut bar.low, self.low);
        overwrite(&mut bar.close, self.close);
        overwrite(&mut bar.volume, self.volume);
        overwrite(&mut bar.liquidity, self.liquidity);
        if let Some(volatility) = self.volatility {
            bar.volatility = Some(volatility);
        }
    }

    /// True if applying this update would change nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Mid price observed on a live order book update.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize, Constructor)]
pub struct MidPriceSample {
    pub price: f64,
    /// Epoch milliseconds.
    pub timestamp: i64,
}
