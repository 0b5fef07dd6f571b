//! Market Calendar
//!
//! Per-day crypto market statistics for one instrument: volatility, volume, OHLC and
//! liquidity, kept fresh from the Binance REST and WebSocket APIs.
//!
//! The library provides:
//! - A date keyed store of daily bars shared between ingestion tasks
//! - Statistics over daily series (standard deviation, SMA, RSI, correlation, range rollups)
//! - Pattern detection over a whole series
//! - Calendar grid and drill-down views
//! - Threshold alerts
//! - Ingestion with symbol switching and a restart-surviving sample cache

/// All [`Error`](std::error::Error)s generated in the market calendar.
pub mod error;

/// Environment driven configuration.
pub mod config;

/// Core data types: [`DailyBar`], [`BarUpdate`], [`Volatility`].
pub mod types;

/// [`TimeSeries`] and the shared [`MarketStore`].
pub mod store;

pub mod stats;
pub mod patterns;
pub mod views;
pub mod alerts;
pub mod cache;
pub mod ingest;

pub use alerts::{AlertBook, AlertCondition, AlertKind, AlertRule, TriggeredAlert};
pub use config::CalendarConfig;
pub use error::CalendarError;
pub use ingest::{ConnectionStatus, MarketTracker};
pub use patterns::{PatternConfig, PatternEvent, PatternKind, detect_patterns};
pub use store::{MarketStore, SharedStore, SymbolTag, TimeSeries};
pub use types::{BarField, BarUpdate, DailyBar, MidPriceSample, Volatility, VolatilityLevel};
pub use views::{CalendarCell, DrillDown, Timeframe, calendar_grid, drill_down, month_cells};
