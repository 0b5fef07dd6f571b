//! Environment driven configuration.
//!
//! Every value has a default; unset variables fall back to it, set-but-invalid values are a
//! [`CalendarError::Config`].

use crate::{alerts::AlertRule, error::CalendarError, patterns::PatternConfig};
use std::{path::PathBuf, str::FromStr, time::Duration};

pub const DEFAULT_SYMBOL: &str = "BTCUSDT";
pub const DEFAULT_REST_URL: &str = "https://api.binance.com";
pub const DEFAULT_WS_URL: &str = "wss://stream.binance.com:9443/ws";

/// Configuration for a [`MarketTracker`](crate::ingest::tracker::MarketTracker) and the feed
/// binary driving it.
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarConfig {
    /// Instrument tracked at startup, e.g. `BTCUSDT`.
    pub symbol: String,
    /// Base URL of the exchange REST API.
    pub rest_url: String,
    /// Base URL of the exchange WebSocket stream endpoint.
    pub ws_url: String,
    /// Timeout for one backfill day request.
    pub request_timeout: Duration,
    /// Period of the rolling live volatility recomputation.
    pub volatility_interval: Duration,
    /// Age after which live mid price samples are pruned.
    pub sample_retention: Duration,
    /// Delay before re-dialling a dropped depth stream.
    pub reconnect_delay: Duration,
    /// Period of alert and pattern polling.
    pub alert_interval: Duration,
    /// Whether to open the live depth stream at all.
    pub live_stream: bool,
    /// Directory for the JSON file cache. `None` keeps the cache in memory.
    pub cache_dir: Option<PathBuf>,
    pub alerts: Vec<AlertRule>,
    pub patterns: PatternConfig,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            symbol: DEFAULT_SYMBOL.to_string(),
            rest_url: DEFAULT_REST_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            request_timeout: Duration::from_secs(10),
            volatility_interval: Duration::from_secs(60),
            sample_retention: Duration::from_secs(24 * 60 * 60),
            reconnect_delay: Duration::from_secs(5),
            alert_interval: Duration::from_secs(5),
            live_stream: true,
            cache_dir: None,
            alerts: Vec::new(),
            patterns: PatternConfig::default(),
        }
    }
}

impl CalendarConfig {
    /// Create a new configuration with a custom symbol
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            ..Default::default()
        }
    }

    /// Load from process environment variables.
    pub fn from_env() -> Result<Self, CalendarError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup, see [`Self::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CalendarError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let env = Lookup(&lookup);

        // Periods and timeouts must be non-zero: tokio intervals panic on a zero period.
        let secs = |key: &str, default: Duration| -> Result<Duration, CalendarError> {
            match env.parse::<u64>(key)? {
                Some(0) => Err(config_error(key, "0")),
                Some(secs) => Ok(Duration::from_secs(secs)),
                None => Ok(default),
            }
        };

        let symbol = match env.text("CALENDAR_SYMBOL") {
            Some(symbol) if symbol.trim().is_empty() => {
                return Err(config_error("CALENDAR_SYMBOL", &symbol));
            }
            Some(symbol) => symbol.trim().to_uppercase(),
            None => defaults.symbol,
        };

        let alerts = match env.text("CALENDAR_ALERTS") {
            Some(rules) => rules
                .split(',')
                .map(str::trim)
                .filter(|rule| !rule.is_empty())
                .map(|rule| rule.parse::<AlertRule>().map(|alert| alert.for_symbol(&symbol)))
                .collect::<Result<Vec<_>, _>>()?,
            None => defaults.alerts,
        };

        let patterns = PatternConfig {
            volatility_threshold: env
                .parse("PATTERN_VOLATILITY_THRESHOLD")?
                .unwrap_or(defaults.patterns.volatility_threshold),
            volume_spike_multiplier: env
                .parse("PATTERN_VOLUME_MULTIPLIER")?
                .unwrap_or(defaults.patterns.volume_spike_multiplier),
            price_change_threshold: env
                .parse("PATTERN_PRICE_CHANGE_PCT")?
                .unwrap_or(defaults.patterns.price_change_threshold),
            weekend_difference: env
                .parse("PATTERN_WEEKEND_DIFFERENCE")?
                .unwrap_or(defaults.patterns.weekend_difference),
            correlation_threshold: env
                .parse("PATTERN_CORRELATION_THRESHOLD")?
                .unwrap_or(defaults.patterns.correlation_threshold),
            min_history: env
                .parse("PATTERN_MIN_HISTORY")?
                .unwrap_or(defaults.patterns.min_history),
            ..defaults.patterns
        };

        Ok(Self {
            rest_url: env.text("CALENDAR_REST_URL").unwrap_or(defaults.rest_url),
            ws_url: env.text("CALENDAR_WS_URL").unwrap_or(defaults.ws_url),
            request_timeout: secs("CALENDAR_REQUEST_TIMEOUT_SECS", defaults.request_timeout)?,
            volatility_interval: secs(
                "CALENDAR_VOLATILITY_INTERVAL_SECS",
                defaults.volatility_interval,
            )?,
            sample_retention: match env.parse::<u64>("CALENDAR_SAMPLE_RETENTION_HOURS")? {
                Some(hours) => hours
                    .checked_mul(60 * 60)
                    .filter(|secs| *secs > 0)
                    .map(Duration::from_secs)
                    .ok_or_else(|| {
                        config_error("CALENDAR_SAMPLE_RETENTION_HOURS", &hours.to_string())
                    })?,
                None => defaults.sample_retention,
            },
            reconnect_delay: secs("CALENDAR_RECONNECT_DELAY_SECS", defaults.reconnect_delay)?,
            alert_interval: secs("CALENDAR_ALERT_INTERVAL_SECS", defaults.alert_interval)?,
            live_stream: env.parse("CALENDAR_LIVE_STREAM")?.unwrap_or(defaults.live_stream),
            cache_dir: env.text("CALENDAR_CACHE_DIR").map(PathBuf::from),
            symbol,
            alerts,
            patterns,
        })
    }

    /// Set the REST base URL
    pub fn with_rest_url(mut self, url: impl Into<String>) -> Self {
        self.rest_url = url.into();
        self
    }

    /// Set the WebSocket base URL
    pub fn with_ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = url.into();
        self
    }

    /// Set the rolling volatility interval
    pub fn with_volatility_interval(mut self, interval: Duration) -> Self {
        self.volatility_interval = interval;
        self
    }

    /// Set the live sample retention window
    pub fn with_sample_retention(mut self, retention: Duration) -> Self {
        self.sample_retention = retention;
        self
    }

    /// Enable or disable the live depth stream
    pub fn with_live_stream(mut self, enabled: bool) -> Self {
        self.live_stream = enabled;
        self
    }

    /// Persist the cache as JSON files under `dir`
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Set pattern detection thresholds
    pub fn with_patterns(mut self, patterns: PatternConfig) -> Self {
        self.patterns = patterns;
        self
    }
}

struct Lookup<'a, F>(&'a F);

impl<F> Lookup<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn text(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|value| !value.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str) -> Result<Option<T>, CalendarError> {
        self.text(key)
            .map(|value| {
                value
                    .trim()
                    .parse()
                    .map_err(|_| config_error(key, &value))
            })
            .transpose()
    }
}

fn config_error(key: &str, value: &str) -> CalendarError {
    CalendarError::Config {
        key: key.to_string(),
        value: value.to_string(),
    }
}
