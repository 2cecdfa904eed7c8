//! In-process implementation of [`MarketStore`] with per-key TTLs. Expiry is
//! enforced lazily on read plus a `purge_expired` sweep the node schedules.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use anyhow::Result;
use mds_core::consts::{
    KEY_DEPTH_PREFIX, KEY_KLINE_PREFIX, KEY_TICKER_PREFIX, KEY_TRADE_PREFIX, KLINE_HISTORY_LIMIT,
    KLINE_TTL, SNAPSHOT_TTL, TRADE_HISTORY_LIMIT,
};
use mds_core::{Interval, Kline, OrderBook, Ticker, Trade};
use tokio::time::{Duration, Instant};
use tracing::debug;

use crate::MarketStore;

enum StoredValue {
    Hash(HashMap<String, String>),
    Str(String),
    List(VecDeque<String>),
}

struct Entry {
    expires_at: Instant,
    value: StoredValue,
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired key. Cheap enough to run on a coarse timer.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "purged expired keys");
        }
    }

    fn put(&self, key: String, value: StoredValue, ttl: Duration) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key,
            Entry {
                expires_at: Instant::now() + ttl,
                value,
            },
        );
    }

    fn push_front_trimmed(&self, key: String, item: String, max_len: usize, ttl: Duration) {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        let entry = entries.entry(key).or_insert_with(|| Entry {
            expires_at: now + ttl,
            value: StoredValue::List(VecDeque::new()),
        });
        if entry.expires_at <= now {
            entry.value = StoredValue::List(VecDeque::new());
        }
        entry.expires_at = now + ttl;
        let StoredValue::List(list) = &mut entry.value else {
            entry.value = StoredValue::List(VecDeque::from([item]));
            return;
        };
        list.push_front(item);
        list.truncate(max_len);
    }

    fn read<T>(&self, key: &str, f: impl FnOnce(&StoredValue) -> T) -> Option<T> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(f(&entry.value)),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn range(&self, key: &str, limit: usize) -> Vec<String> {
        self.read(key, |value| match value {
            StoredValue::List(list) => list.iter().take(limit).cloned().collect(),
            _ => Vec::new(),
        })
        .unwrap_or_default()
    }
}

fn hash_f64(fields: &HashMap<String, String>, name: &str) -> f64 {
    fields
        .get(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or_default()
}

#[async_trait::async_trait]
impl MarketStore for MemoryStore {
    async fn save_ticker(&self, ticker: &Ticker) -> Result<()> {
        let key = format!("{}{}", KEY_TICKER_PREFIX, ticker.symbol);
        let fields = HashMap::from([
            ("last_price".to_string(), ticker.last_price.to_string()),
            ("bid_price".to_string(), ticker.bid_price.to_string()),
            ("ask_price".to_string(), ticker.ask_price.to_string()),
            ("high_24h".to_string(), ticker.high_24h.to_string()),
            ("low_24h".to_string(), ticker.low_24h.to_string()),
            ("volume_24h".to_string(), ticker.volume_24h.to_string()),
            ("timestamp".to_string(), ticker.timestamp.to_string()),
        ]);
        self.put(key, StoredValue::Hash(fields), SNAPSHOT_TTL);
        Ok(())
    }

    async fn save_depth(&self, depth: &OrderBook) -> Result<()> {
        let key = format!("{}{}", KEY_DEPTH_PREFIX, depth.symbol);
        let json = serde_json::to_string(depth)?;
        self.put(key, StoredValue::Str(json), SNAPSHOT_TTL);
        Ok(())
    }

    async fn save_trade(&self, trade: &Trade) -> Result<()> {
        let key = format!("{}{}", KEY_TRADE_PREFIX, trade.symbol);
        let json = serde_json::to_string(trade)?;
        self.push_front_trimmed(key, json, TRADE_HISTORY_LIMIT, SNAPSHOT_TTL);
        Ok(())
    }

    async fn save_kline(&self, kline: &Kline) -> Result<()> {
        let key = format!(
            "{}{}:{}",
            KEY_KLINE_PREFIX,
            kline.symbol,
            kline.interval.as_str()
        );
        let json = serde_json::to_string(kline)?;
        self.push_front_trimmed(key, json, KLINE_HISTORY_LIMIT, KLINE_TTL);
        Ok(())
    }

    async fn get_ticker(&self, symbol: &str) -> Result<Option<Ticker>> {
        let key = format!("{KEY_TICKER_PREFIX}{symbol}");
        Ok(self.read(&key, |value| match value {
            StoredValue::Hash(fields) => Some(Ticker {
                symbol: symbol.to_string(),
                last_price: hash_f64(fields, "last_price"),
                bid_price: hash_f64(fields, "bid_price"),
                ask_price: hash_f64(fields, "ask_price"),
                high_24h: hash_f64(fields, "high_24h"),
                low_24h: hash_f64(fields, "low_24h"),
                volume_24h: hash_f64(fields, "volume_24h"),
                timestamp: fields
                    .get("timestamp")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or_default(),
            }),
            _ => None,
        })
        .flatten())
    }

    async fn get_depth(&self, symbol: &str) -> Result<Option<OrderBook>> {
        let key = format!("{KEY_DEPTH_PREFIX}{symbol}");
        let json = self.read(&key, |value| match value {
            StoredValue::Str(json) => Some(json.clone()),
            _ => None,
        });
        match json.flatten() {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn get_trades(&self, symbol: &str, limit: usize) -> Result<Vec<Trade>> {
        let key = format!("{KEY_TRADE_PREFIX}{symbol}");
        Ok(self
            .range(&key, limit)
            .iter()
            .filter_map(|json| serde_json::from_str(json).ok())
            .collect())
    }

    async fn get_klines(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Kline>> {
        let key = format!("{}{}:{}", KEY_KLINE_PREFIX, symbol, interval.as_str());
        Ok(self
            .range(&key, limit)
            .iter()
            .filter_map(|json| serde_json::from_str(json).ok())
            .collect())
    }
}
