use crate::{
    error::CalendarError,
    stats::standard_deviation,
    types::{BarUpdate, Volatility},
};
use async_trait::async_trait;
use chrono::{NaiveDate, TimeDelta};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// Binance kline response format
#[derive(Debug, Deserialize)]
struct BinanceKline(
    i64,    // 0: Open time
    String, // 1: Open
    String, // 2: High
    String, // 3: Low
    String, // 4: Close
    String, // 5: Volume
    i64,    // 6: Close time
    String, // 7: Quote asset volume
    i64,    // 8: Number of trades
    String, // 9: Taker buy base asset volume
    String, // 10: Taker buy quote asset volume
    String, // 11: Ignore
);

/// One 1-minute candle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kline {
    /// Epoch milliseconds.
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
}

impl Kline {
    /// (high + low) / 2
    pub fn mid(&self) -> f64 {
        (self.high + self.low) / 2.0
    }
}

impl TryFrom<BinanceKline> for Kline {
    type Error = CalendarError;

    fn try_from(kline: BinanceKline) -> Result<Self, Self::Error> {
        let number = |field: &str, index: usize| -> Result<f64, CalendarError> {
            field
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .ok_or_else(|| {
                    CalendarError::Decode(format!("kline field {index} is not a number: {field}"))
                })
        };

        Ok(Self {
            open_time: kline.0,
            open: number(&kline.1, 1)?,
            high: number(&kline.2, 2)?,
            low: number(&kline.3, 3)?,
            close: number(&kline.4, 4)?,
            volume: number(&kline.5, 5)?,
            quote_volume: number(&kline.7, 7)?,
        })
    }
}

/// Decode a klines REST response body.
pub fn parse_klines(body: &str) -> Result<Vec<Kline>, CalendarError> {
    serde_json::from_str::<Vec<BinanceKline>>(body)?
        .into_iter()
        .map(Kline::try_from)
        .collect()
}

/// Source of historical 1-minute klines for one UTC day.
#[async_trait]
pub trait KlineSource: Send + Sync {
    async fn fetch_day(&self, symbol: &str, day: NaiveDate) -> Result<Vec<Kline>, CalendarError>;
}

/// Binance spot REST klines endpoint.
#[derive(Debug, Clone)]
pub struct BinanceRest {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl BinanceRest {
    pub const KLINES_PATH: &'static str = "/api/v3/klines";
    pub const INTERVAL: &'static str = "1m";

    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            timeout,
        }
    }

    /// Request URL covering `day` from 00:00:00.000 to 23:59:59.999 UTC.
    pub fn day_url(&self, symbol: &str, day: NaiveDate) -> Result<Url, CalendarError> {
        let (start, end) = day_bounds_ms(day);
        let base = format!("{}{}", self.base_url.trim_end_matches('/'), Self::KLINES_PATH);

        Url::parse_with_params(
            &base,
            &[
                ("symbol", symbol.to_string()),
                ("interval", Self::INTERVAL.to_string()),
                ("startTime", start.to_string()),
                ("endTime", end.to_string()),
            ],
        )
        .map_err(|error| CalendarError::Http(format!("invalid klines url {base}: {error}")))
    }
}

#[async_trait]
impl KlineSource for BinanceRest {
    async fn fetch_day(&self, symbol: &str, day: NaiveDate) -> Result<Vec<Kline>, CalendarError> {
        let url = self.day_url(symbol, day)?;

        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CalendarError::HttpStatus(response.status().as_u16()));
        }

        let body = response.text().await?;
        parse_klines(&body)
    }
}

/// Epoch millisecond bounds of a UTC day, both inclusive.
pub fn day_bounds_ms(day: NaiveDate) -> (i64, i64) {
    let start = day.and_time(chrono::NaiveTime::MIN).and_utc();
    let end = start + TimeDelta::days(1) - TimeDelta::milliseconds(1);
    (start.timestamp_millis(), end.timestamp_millis())
}

/// Reduce one day of klines to a bar update. `None` when there are no klines.
///
/// Volatility is the population standard deviation of the per-kline mid prices. Volume and
/// liquidity (quote volume) are summed.
pub fn summarize_day(klines: &[Kline]) -> Option<BarUpdate> {
    let first = klines.first()?;
    let last = klines.last()?;

    let mids: Vec<f64> = klines.iter().map(Kline::mid).collect();

    Some(BarUpdate {
        open: Some(first.open),
        high: klines.iter().map(|kline| kline.high).reduce(f64::max),
        low: klines.iter().map(|kline| kline.low).reduce(f64::min),
        close: Some(last.close),
        volume: Some(klines.iter().map(|kline| kline.volume).sum()),
        liquidity: Some(klines.iter().map(|kline| kline.quote_volume).sum()),
        volatility: Volatility::from_std(standard_deviation(&mids)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VolatilityLevel;

    fn kline(open: f64, high: f64, low: f64, close: f64, volume: f64) -> Kline {
        Kline {
            open_time: 0,
            open,
            high,
            low,
            close,
            volume,
            quote_volume: volume * close,
        }
    }

    #[test]
    fn test_parse_klines() {
        let body = r#"[
            [1717200000000,"67000.10","67010.00","66990.00","67005.50","12.5",1717200059999,"837568.75",120,"6.1","408000.0","0"],
            [1717200060000,"67005.50","67020.00","67000.00","67015.00","3.0",1717200119999,"201045.0",44,"1.2","80000.0","0"]
        ]"#;

        let klines = parse_klines(body).unwrap();

        assert_eq!(klines.len(), 2);
        assert_eq!(klines[0].open_time, 1_717_200_000_000);
        assert_eq!(klines[0].high, 67_010.0);
        assert_eq!(klines[0].quote_volume, 837_568.75);
        assert_eq!(klines[1].mid(), 67_010.0);
    }

    #[test]
    fn test_parse_klines_rejects_bad_number() {
        let body = r#"[[0,"1","x","1","1","1",0,"1",0,"0","0","0"]]"#;
        assert!(matches!(parse_klines(body), Err(CalendarError::Decode(_))));
        assert!(matches!(parse_klines("{}"), Err(CalendarError::Decode(_))));
    }

    #[test]
    fn test_summarize_day() {
        let klines = vec![
            kline(10.0, 12.0, 8.0, 11.0, 1.0),
            kline(11.0, 15.0, 9.0, 14.0, 2.0),
            kline(14.0, 14.0, 10.0, 13.0, 3.0),
        ];

        let update = summarize_day(&klines).unwrap();

        assert_eq!(update.open, Some(10.0));
        assert_eq!(update.high, Some(15.0));
        assert_eq!(update.low, Some(8.0));
        assert_eq!(update.close, Some(13.0));
        assert_eq!(update.volume, Some(6.0));
        assert_eq!(update.liquidity, Some(11.0 + 28.0 + 39.0));

        // Mids 10, 12, 12
        let volatility = update.volatility.unwrap();
        assert!((volatility.value - 0.9428).abs() < 1e-4);
        assert_eq!(volatility.level, VolatilityLevel::Low);
    }

    #[test]
    fn test_summarize_empty_day() {
        assert_eq!(summarize_day(&[]), None);
    }

    #[test]
    fn test_day_bounds_ms() {
        let day = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        assert_eq!(day_bounds_ms(day), (1_717_200_000_000, 1_717_286_399_999));
    }

    #[test]
    fn test_day_url() {
        let rest = BinanceRest::new("https://api.binance.com/", Duration::from_secs(10));
        let day = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();

        let url = rest.day_url("BTCUSDT", day).unwrap();

        assert_eq!(
            url.as_str(),
            "https://api.binance.com/api/v3/klines?symbol=BTCUSDT&interval=1m&startTime=1717200000000&endTime=1717286399999"
        );
    }
}
