//! Common adapter contract and the construction-time adapter registry.

use std::collections::HashMap;
use std::sync::Arc;

use mds_core::consts::{EXCHANGE_BINANCE, EXCHANGE_INTERNAL, EXCHANGE_OKX};
use mds_core::{DataKind, MarketData};

use crate::error::FeedError;
use crate::internal::InternalAdapter;
use crate::{BinanceAdapter, OkxAdapter};

/// Single callback invoked for every normalized record an adapter produces.
pub type MessageSink = Arc<dyn Fn(MarketData) + Send + Sync>;

/// Contract every upstream driver satisfies, whether it pulls from a venue
/// WebSocket or accepts pushes from the matching engine.
#[async_trait::async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Establish the upstream session and start its background tasks.
    async fn connect(&self) -> Result<(), FeedError>;

    /// Register interest in `(symbol, kind)` pairs. Idempotent within a
    /// session; the set is retained and replayed verbatim after reconnects.
    async fn subscribe(&self, symbols: &[String], kinds: &[DataKind]) -> Result<(), FeedError>;

    /// Install the sink that receives every normalized record.
    fn on_message(&self, sink: MessageSink);

    /// Disable reconnection and terminate the session. Idempotent.
    async fn close(&self);

    /// Last known transport state.
    fn is_connected(&self) -> bool;

    /// Stable adapter identifier.
    fn name(&self) -> &str;
}

type AdapterCtor = Box<dyn Fn(&str) -> Arc<dyn ExchangeAdapter> + Send + Sync>;

/// Explicit name → constructor table, built at startup and passed to the
/// collector. For the internal receiver the "ws_url" carries the listen
/// port in `:{port}` form.
#[derive(Default)]
pub struct AdapterFactory {
    creators: HashMap<String, AdapterCtor>,
}

impl AdapterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut factory = Self::new();
        factory.register(EXCHANGE_BINANCE, |ws_url| {
            Arc::new(BinanceAdapter::new(ws_url))
        });
        factory.register(EXCHANGE_OKX, |ws_url| Arc::new(OkxAdapter::new(ws_url)));
        factory.register(EXCHANGE_INTERNAL, |ws_url| {
            let port = ws_url
                .trim_start_matches(':')
                .parse()
                .unwrap_or(InternalAdapter::DEFAULT_PORT);
            Arc::new(InternalAdapter::new(port))
        });
        factory
    }

    pub fn register(
        &mut self,
        name: &str,
        ctor: impl Fn(&str) -> Arc<dyn ExchangeAdapter> + Send + Sync + 'static,
    ) {
        self.creators.insert(name.to_string(), Box::new(ctor));
    }

    pub fn create(&self, name: &str, ws_url: &str) -> Option<Arc<dyn ExchangeAdapter>> {
        self.creators.get(name).map(|ctor| ctor(ws_url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_factory_knows_all_builtin_adapters() {
        let factory = AdapterFactory::with_defaults();
        for name in [EXCHANGE_BINANCE, EXCHANGE_OKX, EXCHANGE_INTERNAL] {
            let adapter = factory.create(name, "").expect(name);
            assert_eq!(adapter.name(), name);
            assert!(!adapter.is_connected());
        }
        assert!(factory.create("bybit", "").is_none());
    }
}
