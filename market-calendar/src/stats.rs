//! Statistics engine: pure numeric reductions over daily series.
//!
//! Rolling functions take one `Option<f64>` slot per stored bar (see
//! [`TimeSeries::field_values`](crate::store::TimeSeries::field_values)). A `None` slot is
//! missing data and is never read as zero.

use crate::types::{DailyBar, VolatilityLevel};
use serde::{Deserialize, Serialize};

/// Lookback used by [`relative_strength_index`] when the caller has no preference.
pub const DEFAULT_RSI_PERIOD: usize = 14;

/// Floor applied to the summed losses so an all-gains window stays finite.
pub const RSI_LOSS_EPSILON: f64 = 1e-10;

/// Population standard deviation (divides by N). Returns 0 for empty input.
///
/// Callers filter out missing values first.
pub fn standard_deviation(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values
        .iter()
        .map(|value| {
            let diff = value - mean;
            diff * diff
        })
        .sum::<f64>()
        / n;

    variance.sqrt()
}

/// Threshold classification of a standard deviation.
pub fn classify_volatility(std: f64) -> VolatilityLevel {
    VolatilityLevel::from_std(std)
}

/// Strict simple moving average.
///
/// Output `i` is the mean of slots `i + 1 - period ..= i` if every one of them is present,
/// otherwise `None`. Indices before the first full window are `None`.
///
/// # Panics
/// If `period` is zero.
pub fn simple_moving_average(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    assert!(period > 0, "simple_moving_average period must be positive");

    (0..values.len())
        .map(|index| {
            if index + 1 < period {
                return None;
            }
            let window = &values[index + 1 - period..=index];
            let sum = window.iter().copied().sum::<Option<f64>>()?;
            Some(sum / period as f64)
        })
        .collect()
}

/// Relative strength index using simple sums over the trailing `period` day-over-day diffs.
///
/// Output `i` (for `i >= period`) looks at the diffs `values[j] - values[j - 1]` for
/// `j in i + 1 - period ..= i`. A diff touching a missing close is skipped. With no gains and
/// no losses the index is a neutral 50.
///
/// # Panics
/// If `period` is zero.
pub fn relative_strength_index(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    assert!(period > 0, "relative_strength_index period must be positive");

    (0..values.len())
        .map(|index| {
            if index < period {
                return None;
            }

            let (gains, losses) = (index + 1 - period..=index).fold(
                (0.0, 0.0),
                |(gains, losses), j| match (values[j - 1], values[j]) {
                    (Some(prev), Some(curr)) => {
                        let diff = curr - prev;
                        if diff > 0.0 {
                            (gains + diff, losses)
                        } else {
                            (gains, losses - diff)
                        }
                    }
                    _ => (gains, losses),
                },
            );

            if gains == 0.0 && losses == 0.0 {
                return Some(50.0);
            }

            let rs = gains / losses.max(RSI_LOSS_EPSILON);
            Some(100.0 - 100.0 / (1.0 + rs))
        })
        .collect()
}

/// Pearson correlation coefficient over the first `min(x.len(), y.len())` pairs.
///
/// Returns 0 for empty input or when either side has no variance.
pub fn pearson_correlation(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n == 0 {
        return 0.0;
    }

    let (x, y) = (&x[..n], &y[..n]);
    let mean_x = x.iter().sum::<f64>() / n as f64;
    let mean_y = y.iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    let mut squares_x = 0.0;
    let mut squares_y = 0.0;

    for (xi, yi) in x.iter().zip(y) {
        let diff_x = xi - mean_x;
        let diff_y = yi - mean_y;
        cov += diff_x * diff_y;
        var_x += diff_x * diff_x;
        var_y += diff_y * diff_y;
        squares_x += xi * xi;
        squares_y += yi * yi;
    }

    // Deviations within rounding noise of the values themselves mean a constant series.
    if is_constant(var_x, squares_x) || is_constant(var_y, squares_y) {
        return 0.0;
    }

    (cov / (var_x.sqrt() * var_y.sqrt())).clamp(-1.0, 1.0)
}

fn is_constant(variance: f64, sum_of_squares: f64) -> bool {
    variance <= f64::EPSILON * sum_of_squares
}

/// Rollup of a date range, each figure computed over the bars that have it.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize, Serialize)]
pub struct Aggregate {
    pub avg_volatility: Option<f64>,
    pub total_volume: Option<f64>,
    pub price_range_low: Option<f64>,
    pub price_range_high: Option<f64>,
    pub open_of_first: Option<f64>,
    pub close_of_last: Option<f64>,
    /// Percent change from the first to the last present close. Needs two closes.
    pub percent_performance: Option<f64>,
}

/// Summarise `bars` (ascending by date).
pub fn aggregate(bars: &[DailyBar]) -> Aggregate {
    let closes: Vec<f64> = bars.iter().filter_map(|bar| bar.close).collect();
    let volumes: Vec<f64> = bars.iter().filter_map(|bar| bar.volume).collect();
    let volatilities: Vec<f64> = bars
        .iter()
        .filter_map(|bar| bar.volatility.map(|volatility| volatility.value))
        .collect();

    let avg_volatility = (!volatilities.is_empty())
        .then(|| volatilities.iter().sum::<f64>() / volatilities.len() as f64);
    let total_volume = (!volumes.is_empty()).then(|| volumes.iter().sum::<f64>());

    let price_range_low = closes.iter().copied().reduce(f64::min);
    let price_range_high = closes.iter().copied().reduce(f64::max);

    let percent_performance = match (closes.first(), closes.last()) {
        (Some(&first), Some(&last)) if closes.len() >= 2 && first != 0.0 => {
            Some((last - first) / first * 100.0)
        }
        _ => None,
    };

    Aggregate {
        avg_volatility,
        total_volume,
        price_range_low,
        price_range_high,
        open_of_first: bars.iter().find_map(|bar| bar.open),
        close_of_last: closes.last().copied(),
        percent_performance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Volatility;
    use chrono::NaiveDate;

    fn approx(actual: f64, expected: f64) -> bool {
        (actual - expected).abs() < 1e-4
    }

    fn present(values: &[f64]) -> Vec<Option<f64>> {
        values.iter().copied().map(Some).collect()
    }

    #[test]
    fn test_standard_deviation() {
        assert_eq!(standard_deviation(&[]), 0.0);
        assert_eq!(standard_deviation(&[5.0, 5.0, 5.0, 5.0]), 0.0);
        assert!(approx(
            standard_deviation(&[1.0, 2.0, 3.0, 4.0, 5.0]),
            1.4142
        ));
    }

    #[test]
    fn test_classify_volatility() {
        assert_eq!(classify_volatility(0.5), VolatilityLevel::Low);
        assert_eq!(classify_volatility(1.0), VolatilityLevel::Medium);
        assert_eq!(classify_volatility(4.999), VolatilityLevel::Medium);
        assert_eq!(classify_volatility(5.0), VolatilityLevel::High);
    }

    #[test]
    fn test_sma_full_windows() {
        let closes = present(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        let sma = simple_moving_average(&closes, 3);

        assert_eq!(sma.len(), 7);
        assert_eq!(sma[0], None);
        assert_eq!(sma[1], None);
        assert_eq!(sma[2], Some(2.0));
        assert_eq!(sma[6], Some(6.0));
    }

    #[test]
    fn test_sma_missing_value_poisons_window() {
        let closes = vec![Some(1.0), Some(2.0), None, Some(4.0), Some(5.0), Some(6.0)];
        let sma = simple_moving_average(&closes, 3);

        // Windows ending at 2, 3 and 4 contain the gap.
        assert_eq!(sma[2], None);
        assert_eq!(sma[3], None);
        assert_eq!(sma[4], None);
        assert_eq!(sma[5], Some(5.0));
    }

    #[test]
    fn test_sma_period_one_is_identity() {
        let closes = vec![Some(1.5), None, Some(3.0)];
        assert_eq!(simple_moving_average(&closes, 1), closes);
    }

    #[test]
    #[should_panic(expected = "period must be positive")]
    fn test_sma_zero_period_panics() {
        simple_moving_average(&present(&[1.0]), 0);
    }

    #[test]
    fn test_rsi_strictly_increasing() {
        let closes = present(&(1..=20).map(f64::from).collect::<Vec<_>>());
        let rsi = relative_strength_index(&closes, DEFAULT_RSI_PERIOD);

        assert!(rsi[..DEFAULT_RSI_PERIOD].iter().all(Option::is_none));
        for value in &rsi[DEFAULT_RSI_PERIOD..] {
            assert!(value.unwrap() > 99.999);
        }
    }

    #[test]
    fn test_rsi_flat_series_is_neutral() {
        let closes = present(&[10.0; 6]);
        let rsi = relative_strength_index(&closes, 3);
        assert_eq!(rsi, vec![None, None, None, Some(50.0), Some(50.0), Some(50.0)]);
    }

    #[test]
    fn test_rsi_mixed_window() {
        // Diffs: +2, -1, +1 -> gains 3, losses 1 -> 100 - 100/4 = 75
        let closes = present(&[10.0, 12.0, 11.0, 12.0]);
        let rsi = relative_strength_index(&closes, 3);
        assert!(approx(rsi[3].unwrap(), 75.0));
    }

    #[test]
    fn test_rsi_skips_diffs_touching_missing_close() {
        // Diffs 10->None and None->12 are skipped, 12->9 is a loss of 3.
        let closes = vec![Some(10.0), None, Some(12.0), Some(9.0)];
        let rsi = relative_strength_index(&closes, 3);
        assert!(approx(rsi[3].unwrap(), 0.0));
    }

    #[test]
    fn test_rsi_all_diffs_missing_is_neutral() {
        let closes = vec![Some(10.0), None, None, None];
        let rsi = relative_strength_index(&closes, 3);
        assert_eq!(rsi[3], Some(50.0));
    }

    #[test]
    fn test_pearson_correlation() {
        let x = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let y = vec![2.0, 1.0, 4.0, 3.0, 7.0];

        assert!(approx(pearson_correlation(&x, &x), 1.0));
        assert_eq!(pearson_correlation(&x, &y), pearson_correlation(&y, &x));

        let negated: Vec<f64> = x.iter().map(|v| -v).collect();
        assert!(approx(pearson_correlation(&x, &negated), -1.0));
    }

    #[test]
    fn test_pearson_correlation_guards() {
        let x = vec![1.0, 2.0, 3.0];
        assert_eq!(pearson_correlation(&x, &[0.1, 0.1, 0.1]), 0.0);
        assert_eq!(pearson_correlation(&[], &x), 0.0);
    }

    #[test]
    fn test_pearson_correlation_is_scale_free() {
        struct TestCase {
            input: Vec<f64>,
        }

        let tests = vec![
            TestCase {
                // TC0: fractional volumes
                input: vec![1e-7, 2e-7, 3e-7, 4e-7, 5e-7],
            },
            TestCase {
                // TC1: sub-cent token prices
                input: vec![0.000_012, 0.000_013, 0.000_011, 0.000_014],
            },
            TestCase {
                // TC2: large notional figures
                input: vec![3.1e12, 3.4e12, 2.9e12],
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = pearson_correlation(&test.input, &test.input);
            assert!(approx(actual, 1.0), "TC{} failed", index);
        }

        let constant = vec![1e-7, 1e-7, 1e-7];
        assert_eq!(pearson_correlation(&[1e-7, 2e-7, 3e-7], &constant), 0.0);
    }

    #[test]
    fn test_pearson_correlation_uses_shortest_prefix() {
        let x = vec![1.0, 2.0, 3.0, 100.0];
        let y = vec![2.0, 4.0, 6.0];
        assert!(approx(pearson_correlation(&x, &y), 1.0));
    }

    #[test]
    fn test_aggregate_skips_missing_values() {
        let date = |day| NaiveDate::from_ymd_opt(2024, 2, day).unwrap();
        let mut first = DailyBar::empty(date(1));
        first.open = Some(99.0);
        first.close = Some(100.0);
        first.volume = Some(10.0);
        first.volatility = Volatility::from_std(2.0);

        let gap = DailyBar::empty(date(2));

        let mut last = DailyBar::empty(date(3));
        last.close = Some(110.0);
        last.volatility = Volatility::from_std(4.0);

        let summary = aggregate(&[first, gap, last]);

        assert_eq!(summary.avg_volatility, Some(3.0));
        assert_eq!(summary.total_volume, Some(10.0));
        assert_eq!(summary.price_range_low, Some(100.0));
        assert_eq!(summary.price_range_high, Some(110.0));
        assert_eq!(summary.open_of_first, Some(99.0));
        assert_eq!(summary.close_of_last, Some(110.0));
        assert!(approx(summary.percent_performance.unwrap(), 10.0));
    }

    #[test]
    fn test_aggregate_needs_two_closes_for_performance() {
        let mut only = DailyBar::empty(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        only.close = Some(100.0);

        let summary = aggregate(&[only]);
        assert_eq!(summary.percent_performance, None);
        assert_eq!(summary.total_volume, None);
        assert_eq!(aggregate(&[]), Aggregate::default());
    }
}
