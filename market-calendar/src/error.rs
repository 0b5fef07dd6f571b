use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors generated in `market-calendar`.
///
/// None of these are fatal to a running tracker: a failed backfill day is left absent, a
/// failed socket is re-dialled and a failed cache write is logged. Only [`CalendarError::Config`]
/// and [`CalendarError::InvalidAlert`] stop the feed, and only at startup.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Error)]
pub enum CalendarError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("HTTP error status: {0}")]
    HttpStatus(u16),

    #[error("failed to decode payload: {0}")]
    Decode(String),

    #[error("SocketError: {0}")]
    Socket(String),

    #[error("cache entry {key} unavailable: {reason}")]
    Cache { key: String, reason: String },

    #[error("invalid configuration value for {key}: {value}")]
    Config { key: String, value: String },

    #[error("invalid alert rule: {0}")]
    InvalidAlert(String),
}

impl CalendarError {
    /// Determine if the error is likely to clear up on its own (network blips, exchange
    /// overload, rate limiting) as opposed to a request the exchange will keep rejecting.
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_transient(&self) -> bool {
        match self {
            CalendarError::Http(_) | CalendarError::Socket(_) => true,
            CalendarError::HttpStatus(status) => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for CalendarError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::Decode(value.to_string())
        } else {
            Self::Http(value.to_string())
        }
    }
}

impl From<serde_json::Error> for CalendarError {
    fn from(value: serde_json::Error) -> Self {
        Self::Decode(value.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for CalendarError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Socket(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calendar_error_is_transient() {
        struct TestCase {
            input: CalendarError,
            expected: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: is transient w/ CalendarError::Http
                input: CalendarError::Http("connection reset".to_string()),
                expected: true,
            },
            TestCase {
                // TC1: is transient w/ exchange overload
                input: CalendarError::HttpStatus(503),
                expected: true,
            },
            TestCase {
                // TC2: is transient w/ rate limit
                input: CalendarError::HttpStatus(429),
                expected: true,
            },
            TestCase {
                // TC3: is not transient w/ rejected request
                input: CalendarError::HttpStatus(400),
                expected: false,
            },
            TestCase {
                // TC4: is not transient w/ malformed payload
                input: CalendarError::Decode("expected value at line 1".to_string()),
                expected: false,
            },
            TestCase {
                // TC5: is transient w/ socket failure
                input: CalendarError::Socket("WebSocket error: ConnectionClosed".to_string()),
                expected: true,
            },
            TestCase {
                // TC6: is not transient w/ bad configuration
                input: CalendarError::Config {
                    key: "CALENDAR_SYMBOL".to_string(),
                    value: String::new(),
                },
                expected: false,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = test.input.is_transient();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_serde_json_error_maps_to_decode() {
        let error = serde_json::from_str::<Vec<f64>>("not json").unwrap_err();
        assert!(matches!(CalendarError::from(error), CalendarError::Decode(_)));
    }
}
