//! Threshold alerts over today's bar.

use crate::{config::DEFAULT_SYMBOL, error::CalendarError, store::TimeSeries, types::DailyBar};
use chrono::NaiveDate;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashSet},
    fmt,
    str::FromStr,
};
use tracing::debug;

/// Observed value and threshold count as equal within this distance.
pub const EQUALS_TOLERANCE: f64 = 0.01;

/// Volume and liquidity are compared in millions.
const MILLION: f64 = 1_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    #[display("volatility")]
    Volatility,
    #[display("volume")]
    Volume,
    #[display("price")]
    Price,
    #[display("liquidity")]
    Liquidity,
}

impl AlertKind {
    /// Value of `bar` this kind of alert watches, `None` if the bar lacks it.
    pub fn observe(self, bar: &DailyBar) -> Option<f64> {
        match self {
            AlertKind::Volatility => bar.volatility.map(|volatility| volatility.value),
            AlertKind::Volume => bar.volume.map(|volume| volume / MILLION),
            AlertKind::Price => bar.close,
            AlertKind::Liquidity => bar.liquidity.map(|liquidity| liquidity / MILLION),
        }
    }

    /// Render `value` in this kind's unit.
    pub fn format_value(self, value: f64) -> String {
        match self {
            AlertKind::Volatility => format!("{value:.2}%"),
            AlertKind::Volume | AlertKind::Liquidity => format!("{value:.2}M"),
            AlertKind::Price => format!("${value:.2}"),
        }
    }
}

impl FromStr for AlertKind {
    type Err = CalendarError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "volatility" => Ok(AlertKind::Volatility),
            "volume" => Ok(AlertKind::Volume),
            "price" => Ok(AlertKind::Price),
            "liquidity" => Ok(AlertKind::Liquidity),
            _ => Err(CalendarError::InvalidAlert(input.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum AlertCondition {
    #[display("above")]
    Above,
    #[display("below")]
    Below,
    #[display("equals")]
    Equals,
}

impl AlertCondition {
    pub fn holds(self, observed: f64, threshold: f64) -> bool {
        match self {
            AlertCondition::Above => observed > threshold,
            AlertCondition::Below => observed < threshold,
            AlertCondition::Equals => (observed - threshold).abs() < EQUALS_TOLERANCE,
        }
    }

    fn symbol(self) -> char {
        match self {
            AlertCondition::Above => '>',
            AlertCondition::Below => '<',
            AlertCondition::Equals => '=',
        }
    }
}

/// A user defined threshold on one metric of one symbol.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AlertRule {
    pub symbol: String,
    pub kind: AlertKind,
    pub condition: AlertCondition,
    pub threshold: f64,
    pub enabled: bool,
}

impl AlertRule {
    pub fn new(
        symbol: impl Into<String>,
        kind: AlertKind,
        condition: AlertCondition,
        threshold: f64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            kind,
            condition,
            threshold,
            enabled: true,
        }
    }

    /// Re-target the rule at `symbol`.
    pub fn for_symbol(self, symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            ..self
        }
    }

    /// Observed value of `bar` if it satisfies the rule.
    pub fn check(&self, bar: &DailyBar) -> Option<f64> {
        let observed = self.kind.observe(bar)?;
        self.condition
            .holds(observed, self.threshold)
            .then_some(observed)
    }
}

impl fmt::Display for AlertRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}{}{}",
            self.symbol,
            self.kind,
            self.condition.symbol(),
            self.threshold
        )
    }
}

/// Parses `<kind><op><threshold>`, eg/ `volatility>5`, `price<60000`, `volume=1.5`.
///
/// The rule targets [`DEFAULT_SYMBOL`] until re-targeted with [`AlertRule::for_symbol`].
impl FromStr for AlertRule {
    type Err = CalendarError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = || CalendarError::InvalidAlert(input.to_string());

        let split = input.find(['>', '<', '=']).ok_or_else(invalid)?;
        let (kind, rest) = input.split_at(split);

        let condition = match rest.chars().next() {
            Some('>') => AlertCondition::Above,
            Some('<') => AlertCondition::Below,
            Some('=') => AlertCondition::Equals,
            _ => return Err(invalid()),
        };

        let threshold = rest[1..]
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|threshold| threshold.is_finite())
            .ok_or_else(invalid)?;

        let kind = kind.parse::<AlertKind>().map_err(|_| invalid())?;

        Ok(Self::new(DEFAULT_SYMBOL, kind, condition, threshold))
    }
}

pub type AlertId = u64;

/// A rule that fired for a given date.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TriggeredAlert {
    pub rule_id: AlertId,
    pub rule: AlertRule,
    pub date: NaiveDate,
    pub observed: f64,
    /// Epoch milliseconds of the evaluation that raised it.
    pub timestamp: i64,
}

impl fmt::Display for TriggeredAlert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} on {}: now {}",
            self.rule.symbol,
            self.rule.kind,
            self.rule.condition,
            self.rule.kind.format_value(self.rule.threshold),
            self.date,
            self.rule.kind.format_value(self.observed),
        )
    }
}

/// Alert rules and the alerts they have raised.
///
/// A rule fires at most once per date. Dismissing an alert does not make it fire again for
/// the same date.
#[derive(Debug, Clone, Default)]
pub struct AlertBook {
    next_id: AlertId,
    rules: BTreeMap<AlertId, AlertRule>,
    active: Vec<TriggeredAlert>,
    raised: HashSet<(AlertId, NaiveDate)>,
}

impl AlertBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct a book holding `rules`, ids assigned in order.
    pub fn with_rules(rules: impl IntoIterator<Item = AlertRule>) -> Self {
        let mut book = Self::new();
        for rule in rules {
            book.add(rule);
        }
        book
    }

    pub fn add(&mut self, rule: AlertRule) -> AlertId {
        let id = self.next_id;
        self.next_id += 1;
        self.rules.insert(id, rule);
        id
    }

    /// Delete a rule. Alerts it already raised stay active until dismissed.
    pub fn remove(&mut self, id: AlertId) -> Option<AlertRule> {
        self.rules.remove(&id)
    }

    /// Flip a rule's enabled flag, returning the new state.
    pub fn toggle(&mut self, id: AlertId) -> Option<bool> {
        let rule = self.rules.get_mut(&id)?;
        rule.enabled = !rule.enabled;
        Some(rule.enabled)
    }

    /// Remove the active alert `id` raised for `date`.
    pub fn dismiss(&mut self, id: AlertId, date: NaiveDate) -> bool {
        let before = self.active.len();
        self.active
            .retain(|alert| !(alert.rule_id == id && alert.date == date));
        before != self.active.len()
    }

    pub fn rules(&self) -> impl Iterator<Item = (AlertId, &AlertRule)> {
        self.rules.iter().map(|(id, rule)| (*id, rule))
    }

    pub fn active(&self) -> &[TriggeredAlert] {
        &self.active
    }

    /// Check every enabled rule for `series.symbol()` against the bar for `today`.
    ///
    /// Returns only the alerts raised by this call. Without a bar for `today` nothing fires.
    pub fn evaluate(
        &mut self,
        series: &TimeSeries,
        today: NaiveDate,
        now_ms: i64,
    ) -> Vec<TriggeredAlert> {
        let Some(bar) = series.get(today) else {
            debug!(symbol = series.symbol(), %today, "no bar to evaluate alerts against");
            return Vec::new();
        };

        let fired: Vec<TriggeredAlert> = self
            .rules
            .iter()
            .filter(|(_, rule)| rule.enabled && rule.symbol == series.symbol())
            .filter(|(id, _)| !self.raised.contains(&(**id, today)))
            .filter_map(|(id, rule)| {
                rule.check(bar).map(|observed| TriggeredAlert {
                    rule_id: *id,
                    rule: rule.clone(),
                    date: today,
                    observed,
                    timestamp: now_ms,
                })
            })
            .collect();

        for alert in &fired {
            self.raised.insert((alert.rule_id, alert.date));
        }
        self.active.extend(fired.iter().cloned());

        fired
    }
}
