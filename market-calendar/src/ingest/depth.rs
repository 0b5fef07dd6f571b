use crate::types::MidPriceSample;
use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};

/// Binance diff depth stream message.
///
/// #### Raw Payload Examples
/// See docs: <https://developers.binance.com/docs/binance-spot-api-docs/web-socket-streams#diff-depth-stream>
///
/// ```json
/// {
///     "e": "depthUpdate",
///     "E": 1672515782136,
///     "s": "BNBBTC",
///     "U": 157,
///     "u": 160,
///     "b": [["0.0024", "10"]],
///     "a": [["0.0026", "100"]]
/// }
/// ```
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct BinanceDepthUpdate {
    #[serde(rename = "E", default)]
    pub event_time: Option<i64>,
    #[serde(rename = "b")]
    pub bids: Vec<BinanceLevel>,
    #[serde(rename = "a")]
    pub asks: Vec<BinanceLevel>,
}

/// Binance OrderBook level.
///
/// ```json
/// ["16493.50", "0.006"]
/// ```
#[derive(Clone, Copy, PartialEq, PartialOrd, Debug, Deserialize, Serialize)]
pub struct BinanceLevel {
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
}

impl BinanceDepthUpdate {
    /// (first bid + first ask) / 2, if both sides carry a level.
    pub fn mid_price(&self) -> Option<Decimal> {
        let bid = self.bids.first()?;
        let ask = self.asks.first()?;
        Some((bid.price + ask.price) / Decimal::TWO)
    }

    /// Sample the mid price at `received_ms`.
    pub fn sample(&self, received_ms: i64) -> Option<MidPriceSample> {
        let price = self.mid_price()?.to_f64()?;
        Some(MidPriceSample::new(price, received_ms))
    }
}

/// Parse a depth stream text frame. Frames that are not depth updates (subscription acks,
/// errors) yield `None`.
pub fn parse_depth(text: &str) -> Option<BinanceDepthUpdate> {
    serde_json::from_str(text).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).unwrap()
    }

    #[test]
    fn test_binance_level() {
        let input = r#"["16493.50", "0.006"]"#;
        assert_eq!(
            serde_json::from_str::<BinanceLevel>(input).unwrap(),
            BinanceLevel {
                price: dec("16493.50"),
                amount: dec("0.006"),
            },
        )
    }

    #[test]
    fn test_depth_sample() {
        struct TestCase {
            input: &'static str,
            expected: Option<MidPriceSample>,
        }

        let tests = vec![
            TestCase {
                // TC0: both sides present
                input: r#"{"e":"depthUpdate","E":1672515782136,"s":"BTCUSDT","U":1,"u":2,"b":[["100.00","1"],["99.00","2"]],"a":[["102.00","1"]]}"#,
                expected: Some(MidPriceSample::new(101.0, 7)),
            },
            TestCase {
                // TC1: empty bids
                input: r#"{"b":[],"a":[["102.00","1"]]}"#,
                expected: None,
            },
            TestCase {
                // TC2: empty asks
                input: r#"{"b":[["100.00","1"]],"a":[]}"#,
                expected: None,
            },
            TestCase {
                // TC3: subscription ack
                input: r#"{"result":null,"id":1}"#,
                expected: None,
            },
            TestCase {
                // TC4: not json
                input: "pong",
                expected: None,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = parse_depth(test.input).and_then(|update| update.sample(7));
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_mid_price_keeps_decimal_precision() {
        let update = parse_depth(r#"{"b":[["0.10000001","1"]],"a":[["0.10000002","1"]]}"#).unwrap();
        assert_eq!(update.mid_price(), Some(dec("0.100000015")));
    }
}
