//! Calendar grid and drill-down views over a [`TimeSeries`].
//!
//! Weeks run Sunday to Saturday. Every view lists each calendar day of its window, with
//! absent dates rendered as an empty [`DailyBar`].

use crate::{
    stats::{Aggregate, aggregate},
    store::TimeSeries,
    types::{DailyBar, VolatilityLevel},
};
use chrono::{Datelike, Days, Months, NaiveDate};
use derive_more::Display;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    #[display("day")]
    Day,
    #[display("week")]
    Week,
    #[display("month")]
    Month,
}

/// Detail of one day, week or month.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrillDown {
    pub timeframe: Timeframe,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub rows: Vec<DailyBar>,
    /// Rollup of `rows`. Only week and month views carry one.
    pub summary: Option<Aggregate>,
    /// Close against the previous calendar day's close, in percent. Day view only.
    pub day_change_percent: Option<f64>,
}

/// One square of the month calendar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalendarCell {
    pub date: NaiveDate,
    /// False for the padding days of the neighbouring months.
    pub in_month: bool,
    pub is_today: bool,
    pub level: Option<VolatilityLevel>,
    pub volatility: Option<f64>,
}

/// Sunday on or before `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    let offset = u64::from(date.weekday().num_days_from_sunday());
    date.checked_sub_days(Days::new(offset)).unwrap_or(date)
}

/// Saturday on or after `date`.
pub fn week_end(date: NaiveDate) -> NaiveDate {
    let offset = 6 - u64::from(date.weekday().num_days_from_sunday());
    date.checked_add_days(Days::new(offset)).unwrap_or(date)
}

/// First and last day of the month containing `date`.
pub fn month_bounds(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let first = date.with_day(1).unwrap_or(date);
    let last = first
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(NaiveDate::MAX);
    (first, last)
}

/// Every date from `start` to `end` inclusive.
pub fn days_between(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    start.iter_days().take_while(move |date| *date <= end)
}

/// Dates shown for the month containing `month`: the Sunday before its first day through the
/// Saturday after its last, so the grid is always whole weeks.
pub fn calendar_grid(month: NaiveDate) -> Vec<NaiveDate> {
    let (first, last) = month_bounds(month);
    days_between(week_start(first), week_end(last)).collect()
}

/// Calendar cells for the month containing `month`.
pub fn month_cells(series: &TimeSeries, month: NaiveDate, today: NaiveDate) -> Vec<CalendarCell> {
    let (first, last) = month_bounds(month);
    calendar_grid(month)
        .into_iter()
        .map(|date| {
            let volatility = series.get(date).and_then(|bar| bar.volatility);
            CalendarCell {
                date,
                in_month: (first..=last).contains(&date),
                is_today: date == today,
                level: volatility.map(|volatility| volatility.level),
                volatility: volatility.map(|volatility| volatility.value),
            }
        })
        .collect()
}

pub fn drill_down(series: &TimeSeries, date: NaiveDate, timeframe: Timeframe) -> DrillDown {
    let (start, end) = match timeframe {
        Timeframe::Day => (date, date),
        Timeframe::Week => (week_start(date), week_end(date)),
        Timeframe::Month => month_bounds(date),
    };

    let rows: Vec<DailyBar> = days_between(start, end)
        .map(|day| {
            series
                .get(day)
                .cloned()
                .unwrap_or_else(|| DailyBar::empty(day))
        })
        .collect();

    let (summary, day_change_percent) = match timeframe {
        Timeframe::Day => (None, day_change_percent(series, date)),
        Timeframe::Week | Timeframe::Month => (Some(aggregate(&rows)), None),
    };

    DrillDown {
        timeframe,
        start,
        end,
        rows,
        summary,
        day_change_percent,
    }
}

fn day_change_percent(series: &TimeSeries, date: NaiveDate) -> Option<f64> {
    let close = series.get(date)?.close?;
    let previous = series.get(date.pred_opt()?)?.close?;
    (previous != 0.0).then(|| (close - previous) / previous * 100.0)
}
