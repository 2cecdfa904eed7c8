//! Upstream ingestion for MDS: venue WebSocket adapters, the internal-engine
//! HTTP receiver, and the collector service that routes normalized records
//! through fusion onto the topic bus.

pub mod adapter;
pub mod binance;
pub mod error;
pub mod internal;
pub mod okx;
mod numeric;
pub mod service;
pub mod session;

pub use adapter::{AdapterFactory, ExchangeAdapter, MessageSink};
pub use binance::BinanceAdapter;
pub use error::FeedError;
pub use internal::InternalAdapter;
pub use okx::OkxAdapter;
pub use service::{CollectorService, ExchangeSection, HybridSection};
pub use session::{AdapterState, Decoded, StreamSpec, VenueCodec, WsClient};
