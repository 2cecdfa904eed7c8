//! Policy-driven fusion of internal and external market data views.

pub mod merger;

pub use merger::{CachedSide, DataMerger};
