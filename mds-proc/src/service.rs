//! Topic consumption and dispatch. One consumer task per topic under a
//! single group; malformed records are committed and skipped so they never
//! poison the stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use mds_bus::{PubSub, TopicBus};
use mds_core::consts::{
    kline_channel, market_channel, TOPIC_MARKET_DEPTH, TOPIC_MARKET_KLINE, TOPIC_MARKET_TICKER,
    TOPIC_MARKET_TRADE,
};
use mds_core::{DataKind, MarketData, MarketPayload, Ticker, Trade};
use mds_service::{Service, ServiceId};
use mds_store::MarketStore;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::depth::DepthHandler;
use crate::kline::KlineHandler;

pub struct ProcessorService {
    id: ServiceId,
    bus: Arc<dyn TopicBus>,
    group: String,
    worker: Arc<Worker>,
    shutdown: watch::Sender<bool>,
    started: AtomicBool,
}

impl ProcessorService {
    pub fn new(
        id: ServiceId,
        bus: Arc<dyn TopicBus>,
        store: Arc<dyn MarketStore>,
        pubsub: Arc<dyn PubSub>,
        group: impl Into<String>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            id,
            bus,
            group: group.into(),
            worker: Arc::new(Worker {
                depth: DepthHandler::new(Arc::clone(&store), Arc::clone(&pubsub)),
                kline: KlineHandler::new(Arc::clone(&store), Arc::clone(&pubsub)),
                store,
                pubsub,
            }),
            shutdown,
            started: AtomicBool::new(false),
        }
    }

    pub fn kline_handler(&self) -> &KlineHandler {
        &self.worker.kline
    }

    pub fn depth_handler(&self) -> &DepthHandler {
        &self.worker.depth
    }
}

#[async_trait::async_trait]
impl Service for ProcessorService {
    fn id(&self) -> &ServiceId {
        &self.id
    }

    async fn start(&self) -> Result<()> {
        let topics = [
            TOPIC_MARKET_TICKER,
            TOPIC_MARKET_DEPTH,
            TOPIC_MARKET_TRADE,
            TOPIC_MARKET_KLINE,
        ];
        for topic in topics {
            let mut stream = self.bus.subscribe(&self.group, topic).await?;
            let worker = Arc::clone(&self.worker);
            let mut shutdown = self.shutdown.subscribe();
            tokio::spawn(async move {
                info!(topic, "consuming");
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => return,
                        record = stream.next() => {
                            let Some(record) = record else { return };
                            match serde_json::from_slice::<MarketData>(&record.payload) {
                                Ok(data) => worker.handle(data).await,
                                Err(err) => {
                                    warn!(topic, %err, "skipping malformed record");
                                }
                            }
                            stream.commit(&record);
                        }
                    }
                }
            });
        }
        self.started.store(true, Ordering::SeqCst);
        info!(group = %self.group, "processor started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let _ = self.shutdown.send(true);
        self.started.store(false, Ordering::SeqCst);
        info!("processor stopped");
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        if self.started.load(Ordering::SeqCst) {
            Ok(())
        } else {
            anyhow::bail!("processor not started")
        }
    }
}

struct Worker {
    store: Arc<dyn MarketStore>,
    pubsub: Arc<dyn PubSub>,
    depth: DepthHandler,
    kline: KlineHandler,
}

impl Worker {
    async fn handle(&self, data: MarketData) {
        match data.payload {
            MarketPayload::Ticker(ticker) => {
                let wire = serde_json::to_vec(&ticker).ok();
                self.save_ticker(ticker, wire).await;
            }
            MarketPayload::MergedTicker(merged) => {
                // The flat hash gets the combined volume; subscribers get the
                // full merged shape.
                let wire = serde_json::to_vec(&merged).ok();
                self.save_ticker(merged.flatten(), wire).await;
            }
            MarketPayload::Depth(book) => self.depth.handle(book).await,
            MarketPayload::MergedDepth(merged) => self.depth.handle(merged.flatten()).await,
            MarketPayload::Trade(trade) => self.handle_trade(trade).await,
            MarketPayload::Kline(kline) => {
                // Venue-produced candles are republished but never written
                // into the aggregator-owned lists.
                match serde_json::to_vec(&kline) {
                    Ok(payload) => {
                        let channel = kline_channel(&kline.symbol, kline.interval);
                        if let Err(err) = self.pubsub.publish(&channel, payload).await {
                            warn!(symbol = %kline.symbol, ?err, "failed to publish kline");
                        }
                    }
                    Err(err) => warn!(?err, "failed to serialize kline"),
                }
            }
        }
    }

    async fn save_ticker(&self, ticker: Ticker, wire: Option<Vec<u8>>) {
        if let Err(err) = self.store.save_ticker(&ticker).await {
            warn!(symbol = %ticker.symbol, ?err, "failed to persist ticker");
        }
        if let Some(payload) = wire {
            let channel = market_channel(DataKind::Ticker, &ticker.symbol);
            if let Err(err) = self.pubsub.publish(&channel, payload).await {
                warn!(symbol = %ticker.symbol, ?err, "failed to publish ticker");
            }
        }
    }

    async fn handle_trade(&self, trade: Trade) {
        if let Err(err) = self.store.save_trade(&trade).await {
            warn!(symbol = %trade.symbol, ?err, "failed to persist trade");
        }
        match serde_json::to_vec(&trade) {
            Ok(payload) => {
                let channel = market_channel(DataKind::Trade, &trade.symbol);
                if let Err(err) = self.pubsub.publish(&channel, payload).await {
                    warn!(symbol = %trade.symbol, ?err, "failed to publish trade");
                }
            }
            Err(err) => warn!(?err, "failed to serialize trade"),
        }
        self.kline.handle_trade(&trade).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mds_bus::{LocalPubSub, PartitionedBus};
    use mds_core::{Side, Source, TickerWithSource};
    use mds_store::MemoryStore;
    use tokio::time::{timeout, Duration};

    fn ticker_record(symbol: &str, last: f64) -> MarketData {
        MarketData::new(
            "binance",
            symbol,
            Source::External,
            1_700_000_000_000,
            MarketPayload::Ticker(Ticker {
                symbol: symbol.to_string(),
                last_price: last,
                bid_price: last - 1.0,
                ask_price: last + 1.0,
                high_24h: last + 10.0,
                low_24h: last - 10.0,
                volume_24h: 5.0,
                timestamp: 1_700_000_000_000,
            }),
        )
    }

    #[tokio::test]
    async fn consumes_topics_end_to_end() {
        let bus: Arc<dyn TopicBus> = Arc::new(PartitionedBus::new(4));
        let store = Arc::new(MemoryStore::new());
        let pubsub = Arc::new(LocalPubSub::new());
        let mut sub = pubsub.psubscribe("market:*").await.unwrap();

        let service = ProcessorService::new(
            "proc".to_string(),
            Arc::clone(&bus),
            store.clone(),
            pubsub,
            "market-processor",
        );
        service.start().await.unwrap();

        let record = ticker_record("BTCUSDT", 45_000.0);
        bus.publish(
            TOPIC_MARKET_TICKER,
            "BTCUSDT",
            serde_json::to_vec(&record).unwrap(),
        )
        .await
        .unwrap();

        let message = timeout(Duration::from_secs(2), sub.recv())
            .await
            .expect("no pubsub message")
            .unwrap();
        assert_eq!(message.channel, "market:ticker:BTCUSDT");
        let stored = store.get_ticker("BTCUSDT").await.unwrap().unwrap();
        assert_eq!(stored.last_price, 45_000.0);

        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn malformed_records_are_skipped_not_fatal() {
        let bus: Arc<dyn TopicBus> = Arc::new(PartitionedBus::new(4));
        let store = Arc::new(MemoryStore::new());
        let pubsub = Arc::new(LocalPubSub::new());
        let service = ProcessorService::new(
            "proc".to_string(),
            Arc::clone(&bus),
            store.clone(),
            pubsub,
            "market-processor",
        );
        service.start().await.unwrap();

        bus.publish(TOPIC_MARKET_TICKER, "BTCUSDT", b"{garbage".to_vec())
            .await
            .unwrap();
        let record = ticker_record("BTCUSDT", 45_100.0);
        bus.publish(
            TOPIC_MARKET_TICKER,
            "BTCUSDT",
            serde_json::to_vec(&record).unwrap(),
        )
        .await
        .unwrap();

        // The good record behind the poison one still lands.
        timeout(Duration::from_secs(2), async {
            loop {
                if store.get_ticker("BTCUSDT").await.unwrap().is_some() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("ticker never stored");

        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn merged_ticker_stores_combined_volume_and_publishes_merged_shape() {
        let bus: Arc<dyn TopicBus> = Arc::new(PartitionedBus::new(4));
        let store = Arc::new(MemoryStore::new());
        let pubsub = Arc::new(LocalPubSub::new());
        let mut sub = pubsub.psubscribe("market:ticker:*").await.unwrap();
        let service = ProcessorService::new(
            "proc".to_string(),
            Arc::clone(&bus),
            store.clone(),
            pubsub,
            "market-processor",
        );
        service.start().await.unwrap();

        let merged = TickerWithSource {
            symbol: "BTCUSDT".to_string(),
            last_price: 45_000.0,
            last_price_source: Source::Internal,
            bid_price: 44_999.0,
            ask_price: 45_001.0,
            high_24h: 46_000.0,
            low_24h: 44_000.0,
            internal_volume_24h: 10.0,
            external_volume_24h: 20.0,
            total_volume_24h: 30.0,
            timestamp: 1_700_000_000_000,
        };
        let record = MarketData::new(
            "merged",
            "BTCUSDT",
            Source::Merged,
            1_700_000_000_000,
            MarketPayload::MergedTicker(merged),
        );
        bus.publish(
            TOPIC_MARKET_TICKER,
            "BTCUSDT",
            serde_json::to_vec(&record).unwrap(),
        )
        .await
        .unwrap();

        let message = timeout(Duration::from_secs(2), sub.recv())
            .await
            .expect("no pubsub message")
            .unwrap();
        let published: TickerWithSource = serde_json::from_slice(&message.payload).unwrap();
        assert_eq!(published.total_volume_24h, 30.0);
        let stored = store.get_ticker("BTCUSDT").await.unwrap().unwrap();
        assert_eq!(stored.volume_24h, 30.0);

        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn trades_feed_store_channel_and_candles() {
        let bus: Arc<dyn TopicBus> = Arc::new(PartitionedBus::new(4));
        let store = Arc::new(MemoryStore::new());
        let pubsub = Arc::new(LocalPubSub::new());
        let mut sub = pubsub.psubscribe("market:trade:*").await.unwrap();
        let service = ProcessorService::new(
            "proc".to_string(),
            Arc::clone(&bus),
            store.clone(),
            pubsub,
            "market-processor",
        );
        service.start().await.unwrap();

        let trade = Trade {
            symbol: "BTCUSDT".to_string(),
            trade_id: "1".to_string(),
            price: 45_000.0,
            amount: 0.5,
            side: Side::Buy,
            timestamp: 1_700_000_000_000,
        };
        let record = MarketData::new(
            "binance",
            "BTCUSDT",
            Source::External,
            trade.timestamp,
            MarketPayload::Trade(trade),
        );
        bus.publish(
            TOPIC_MARKET_TRADE,
            "BTCUSDT",
            serde_json::to_vec(&record).unwrap(),
        )
        .await
        .unwrap();

        let message = timeout(Duration::from_secs(2), sub.recv())
            .await
            .expect("no pubsub message")
            .unwrap();
        assert_eq!(message.channel, "market:trade:BTCUSDT");
        let trades = store.get_trades("BTCUSDT", 10).await.unwrap();
        assert_eq!(trades.len(), 1);
        let current = service
            .kline_handler()
            .current("BTCUSDT", mds_core::Interval::M1)
            .unwrap();
        assert_eq!(current.volume, 0.5);

        service.stop().await.unwrap();
    }
}
