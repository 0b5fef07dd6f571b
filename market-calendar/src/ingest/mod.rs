//! Market data ingestion: historical kline backfill, the live depth stream and the rolling
//! volatility timer, tied together by [`MarketTracker`].

pub mod backfill;
pub mod depth;
pub mod kline;
pub mod live;
pub mod stream;
pub mod tracker;

pub use backfill::{BackfillResult, backfill_month, backfill_range};
pub use depth::{BinanceDepthUpdate, BinanceLevel, parse_depth};
pub use kline::{BinanceRest, Kline, KlineSource, day_bounds_ms, parse_klines, summarize_day};
pub use live::{RollingVolatility, restore_samples};
pub use stream::{ConnectionStatus, DepthStreamConfig, spawn_depth_stream};
pub use tracker::MarketTracker;
