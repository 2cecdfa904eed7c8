//! Wire names, key patterns and operational limits shared by every service.

use std::time::Duration;

use crate::model::{DataKind, Interval};

// Broker topics, one per data kind. Message key is always the symbol so all
// updates for one symbol land on one partition.
pub const TOPIC_MARKET_TICKER: &str = "market.ticker";
pub const TOPIC_MARKET_DEPTH: &str = "market.depth";
pub const TOPIC_MARKET_TRADE: &str = "market.trade";
pub const TOPIC_MARKET_KLINE: &str = "market.kline";

pub fn topic_for(kind: DataKind) -> &'static str {
    match kind {
        DataKind::Ticker => TOPIC_MARKET_TICKER,
        DataKind::Depth => TOPIC_MARKET_DEPTH,
        DataKind::Trade => TOPIC_MARKET_TRADE,
        DataKind::Kline => TOPIC_MARKET_KLINE,
    }
}

// Hot KV store key prefixes.
pub const KEY_TICKER_PREFIX: &str = "ticker:";
pub const KEY_DEPTH_PREFIX: &str = "depth:";
pub const KEY_TRADE_PREFIX: &str = "trade:";
pub const KEY_KLINE_PREFIX: &str = "kline:";

// Ephemeral pub/sub channels: `market:{kind}:{symbol}` and
// `market:kline:{symbol}:{interval}`.
pub const CHANNEL_MARKET_PREFIX: &str = "market:";
pub const CHANNEL_MARKET_PATTERN: &str = "market:*";

pub fn market_channel(kind: DataKind, symbol: &str) -> String {
    format!("{}{}:{}", CHANNEL_MARKET_PREFIX, kind.as_str(), symbol)
}

pub fn kline_channel(symbol: &str, interval: Interval) -> String {
    format!(
        "{}kline:{}:{}",
        CHANNEL_MARKET_PREFIX,
        symbol,
        interval.as_str()
    )
}

// Exchange identifiers.
pub const EXCHANGE_BINANCE: &str = "binance";
pub const EXCHANGE_OKX: &str = "okx";
pub const EXCHANGE_INTERNAL: &str = "internal";
pub const EXCHANGE_MERGED: &str = "merged";

// Upstream session policy.
pub const MAX_RECONNECT_RETRIES: usize = 10;
pub const INIT_RECONNECT_DELAY: Duration = Duration::from_secs(1);
pub const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(60);
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);
pub const PING_INTERVAL: Duration = Duration::from_secs(20);
pub const PONG_TIMEOUT_MS: i64 = 60_000;
pub const MAX_MESSAGE_SIZE: usize = 512 * 1024;

// Downstream client sessions.
pub const CLIENT_SEND_QUEUE: usize = 256;
pub const CLIENT_PONG_WAIT: Duration = Duration::from_secs(60);
pub const CLIENT_PING_PERIOD: Duration = Duration::from_secs(54);
pub const MAX_SUBSCRIPTIONS_PER_CONN: usize = 20;

// Depth levels.
pub const DEFAULT_DEPTH_LEVEL: usize = 20;
pub const MAX_DEPTH_LEVEL: usize = 100;

// Bounded histories in the hot store.
pub const TRADE_HISTORY_LIMIT: usize = 100;
pub const KLINE_HISTORY_LIMIT: usize = 1000;
pub const SNAPSHOT_TTL: Duration = Duration::from_secs(60 * 60);
pub const KLINE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

// Hybrid fusion: a cached side older than this is treated as absent.
pub const DATA_FRESHNESS_THRESHOLD_MS: i64 = 5_000;
pub const PRICE_DEVIATION_LIMIT_PCT: f64 = 10.0;
// Depth supplement strategy tops a side up from external data below this.
pub const SUPPLEMENT_MIN_LEVELS: usize = 20;

// Broker client tuning.
pub const PRODUCER_BATCH_SIZE: usize = 100;
pub const PRODUCER_FLUSH_TIMEOUT: Duration = Duration::from_millis(10);
pub const CONSUMER_COMMIT_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_PARTITIONS: usize = 8;
