//! Canonical market data model shared across the MDS pipeline.

pub mod consts;
pub mod model;
pub mod time;

pub use model::{
    DataKind, InternalDepthMessage, InternalTradeMessage, Interval, Kline, MarketData,
    MarketPayload, MergeStrategy, OrderBook, OrderBookWithSource, PriceLevel,
    PriceLevelWithSource, Side, Source, SymbolConfig, SymbolMode, Ticker, TickerWithSource, Trade,
};
