//! Trade-driven candle building. One aggregator per (symbol, interval)
//! holds the currently-open candle; a candle is persisted only when a trade
//! from a later period arrives, so "latest candle" reads come from memory.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use mds_bus::PubSub;
use mds_core::consts::kline_channel;
use mds_core::time::{kline_close_time, kline_open_time};
use mds_core::{Interval, Kline, Trade};
use mds_store::MarketStore;
use tracing::{debug, warn};

pub struct KlineAggregator {
    symbol: String,
    interval: Interval,
    current: Option<Kline>,
}

impl KlineAggregator {
    pub fn new(symbol: &str, interval: Interval) -> Self {
        Self {
            symbol: symbol.to_string(),
            interval,
            current: None,
        }
    }

    /// Fold one trade into the open candle. When the trade belongs to a
    /// later period, the finished candle is returned for persistence and a
    /// fresh one is seeded from this trade.
    pub fn add_trade(&mut self, trade: &Trade) -> Option<Kline> {
        let open_time = kline_open_time(trade.timestamp, self.interval);
        let mut closed = None;

        let rolls = self
            .current
            .as_ref()
            .map_or(true, |candle| candle.open_time != open_time);
        if rolls {
            closed = self.current.take();
            self.current = Some(Kline {
                symbol: self.symbol.clone(),
                interval: self.interval,
                open_time,
                close_time: kline_close_time(open_time, self.interval),
                open: trade.price,
                high: trade.price,
                low: trade.price,
                close: trade.price,
                volume: 0.0,
                quote_vol: 0.0,
                trade_num: 0,
            });
        }

        if let Some(candle) = self.current.as_mut() {
            if trade.price > candle.high {
                candle.high = trade.price;
            }
            if trade.price < candle.low {
                candle.low = trade.price;
            }
            candle.close = trade.price;
            candle.volume += trade.amount;
            candle.quote_vol += trade.price * trade.amount;
            candle.trade_num += 1;
        }
        closed
    }

    pub fn current(&self) -> Option<&Kline> {
        self.current.as_ref()
    }
}

pub struct KlineHandler {
    aggregators: Mutex<HashMap<(String, Interval), Arc<Mutex<KlineAggregator>>>>,
    store: Arc<dyn MarketStore>,
    pubsub: Arc<dyn PubSub>,
}

impl KlineHandler {
    pub fn new(store: Arc<dyn MarketStore>, pubsub: Arc<dyn PubSub>) -> Self {
        Self {
            aggregators: Mutex::new(HashMap::new()),
            store,
            pubsub,
        }
    }

    fn aggregator(&self, symbol: &str, interval: Interval) -> Arc<Mutex<KlineAggregator>> {
        let mut aggregators = self.aggregators.lock().unwrap();
        Arc::clone(
            aggregators
                .entry((symbol.to_string(), interval))
                .or_insert_with(|| Arc::new(Mutex::new(KlineAggregator::new(symbol, interval)))),
        )
    }

    /// The currently-open candle, read from memory.
    pub fn current(&self, symbol: &str, interval: Interval) -> Option<Kline> {
        let aggregator = self.aggregator(symbol, interval);
        let guard = aggregator.lock().unwrap();
        guard.current().cloned()
    }

    pub async fn handle_trade(&self, trade: &Trade) {
        for interval in Interval::ALL {
            let aggregator = self.aggregator(&trade.symbol, interval);
            let closed = aggregator.lock().unwrap().add_trade(trade);
            if let Some(candle) = closed {
                debug!(
                    symbol = %candle.symbol,
                    interval = %candle.interval,
                    open = candle.open,
                    close = candle.close,
                    volume = candle.volume,
                    "candle closed"
                );
                // A failed write is logged only; the new in-memory candle is
                // already live.
                if let Err(err) = self.store.save_kline(&candle).await {
                    warn!(symbol = %candle.symbol, ?err, "failed to persist kline");
                }
                match serde_json::to_vec(&candle) {
                    Ok(payload) => {
                        let channel = kline_channel(&candle.symbol, candle.interval);
                        if let Err(err) = self.pubsub.publish(&channel, payload).await {
                            warn!(symbol = %candle.symbol, ?err, "failed to publish kline");
                        }
                    }
                    Err(err) => warn!(?err, "failed to serialize kline"),
                }
            }
        }
    }
}
