//! Aggregator/storage service: consumes the market topics, maintains depth
//! books and rolling candle builders, persists snapshots to the hot store,
//! and republishes every output on the ephemeral pub/sub bus.

pub mod depth;
pub mod kline;
pub mod service;

pub use depth::{DepthHandler, DepthManager};
pub use kline::{KlineAggregator, KlineHandler};
pub use service::ProcessorService;
