//! Per-symbol depth books. Every incoming snapshot is a full replace; the
//! manager resorts both sides and caps them at the storage depth limit.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use mds_bus::PubSub;
use mds_core::consts::{market_channel, MAX_DEPTH_LEVEL};
use mds_core::{DataKind, OrderBook, PriceLevel};
use mds_store::MarketStore;
use tracing::warn;

pub struct DepthManager {
    symbol: String,
    book: Mutex<OrderBook>,
}

impl DepthManager {
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            book: Mutex::new(OrderBook {
                symbol: symbol.to_string(),
                ..Default::default()
            }),
        }
    }

    /// Full replace: the stored sides become the incoming arrays, resorted
    /// (bids descending, asks ascending) and truncated to the storage cap.
    /// Returns the canonical snapshot.
    pub fn update(&self, incoming: OrderBook) -> OrderBook {
        let mut book = self.book.lock().unwrap();
        book.bids = incoming.bids;
        book.asks = incoming.asks;
        book.timestamp = incoming.timestamp;
        book.bids.sort_by(|a, b| {
            b.price
                .partial_cmp(&a.price)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        book.asks.sort_by(|a, b| {
            a.price
                .partial_cmp(&b.price)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        book.bids.truncate(MAX_DEPTH_LEVEL);
        book.asks.truncate(MAX_DEPTH_LEVEL);
        book.symbol = self.symbol.clone();
        book.clone()
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.book.lock().unwrap().bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.book.lock().unwrap().asks.first().copied()
    }

    pub fn spread(&self) -> f64 {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => ask.price - bid.price,
            _ => 0.0,
        }
    }
}

pub struct DepthHandler {
    managers: Mutex<HashMap<String, Arc<DepthManager>>>,
    store: Arc<dyn MarketStore>,
    pubsub: Arc<dyn PubSub>,
}

impl DepthHandler {
    pub fn new(store: Arc<dyn MarketStore>, pubsub: Arc<dyn PubSub>) -> Self {
        Self {
            managers: Mutex::new(HashMap::new()),
            store,
            pubsub,
        }
    }

    pub fn manager(&self, symbol: &str) -> Arc<DepthManager> {
        let mut managers = self.managers.lock().unwrap();
        Arc::clone(
            managers
                .entry(symbol.to_string())
                .or_insert_with(|| Arc::new(DepthManager::new(symbol))),
        )
    }

    pub async fn handle(&self, incoming: OrderBook) {
        let manager = self.manager(&incoming.symbol);
        let snapshot = manager.update(incoming);
        // Storage failures are logged; the in-memory book is already current.
        if let Err(err) = self.store.save_depth(&snapshot).await {
            warn!(symbol = %snapshot.symbol, ?err, "failed to persist depth");
        }
        match serde_json::to_vec(&snapshot) {
            Ok(payload) => {
                let channel = market_channel(DataKind::Depth, &snapshot.symbol);
                if let Err(err) = self.pubsub.publish(&channel, payload).await {
                    warn!(symbol = %snapshot.symbol, ?err, "failed to publish depth");
                }
            }
            Err(err) => warn!(symbol = %snapshot.symbol, ?err, "failed to serialize depth"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mds_bus::LocalPubSub;
    use mds_store::MemoryStore;

    fn level(price: f64, amount: f64) -> PriceLevel {
        PriceLevel { price, amount }
    }

    #[test]
    fn update_resorts_both_sides() {
        let manager = DepthManager::new("BTCUSDT");
        let snapshot = manager.update(OrderBook {
            symbol: "BTCUSDT".to_string(),
            bids: vec![level(44_998.0, 1.0), level(44_999.0, 2.0)],
            asks: vec![level(45_002.0, 1.0), level(45_001.0, 2.0)],
            timestamp: 1,
        });
        assert_eq!(snapshot.bids[0].price, 44_999.0);
        assert_eq!(snapshot.asks[0].price, 45_001.0);
        assert_eq!(manager.best_bid().unwrap().price, 44_999.0);
        assert_eq!(manager.best_ask().unwrap().price, 45_001.0);
        assert_eq!(manager.spread(), 2.0);
    }

    #[test]
    fn update_is_a_full_replace_and_caps_depth() {
        let manager = DepthManager::new("BTCUSDT");
        manager.update(OrderBook {
            symbol: "BTCUSDT".to_string(),
            bids: vec![level(1.0, 1.0)],
            asks: vec![],
            timestamp: 1,
        });
        let big: Vec<PriceLevel> = (0..150).map(|n| level(50_000.0 - n as f64, 1.0)).collect();
        let snapshot = manager.update(OrderBook {
            symbol: "BTCUSDT".to_string(),
            bids: big,
            asks: vec![],
            timestamp: 2,
        });
        // The earlier level is gone and the side is capped.
        assert_eq!(snapshot.bids.len(), MAX_DEPTH_LEVEL);
        assert!(snapshot.bids.iter().all(|l| l.price > 1.0));
        for pair in snapshot.bids.windows(2) {
            assert!(pair[0].price >= pair[1].price);
        }
    }

    #[tokio::test]
    async fn handle_persists_and_publishes() {
        let store = Arc::new(MemoryStore::new());
        let pubsub = Arc::new(LocalPubSub::new());
        let mut sub = pubsub.psubscribe("market:depth:*").await.unwrap();
        let handler = DepthHandler::new(store.clone(), pubsub);

        handler
            .handle(OrderBook {
                symbol: "ETHUSDT".to_string(),
                bids: vec![level(2_500.0, 1.0)],
                asks: vec![level(2_501.0, 1.0)],
                timestamp: 42,
            })
            .await;

        let stored = store.get_depth("ETHUSDT").await.unwrap().unwrap();
        assert_eq!(stored.bids[0].price, 2_500.0);
        let message = sub.recv().await.unwrap();
        assert_eq!(message.channel, "market:depth:ETHUSDT");
        let published: OrderBook = serde_json::from_slice(&message.payload).unwrap();
        assert_eq!(published, stored);
    }
}
