use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use mds_core::consts::{
    DATA_FRESHNESS_THRESHOLD_MS, EXCHANGE_MERGED, MAX_DEPTH_LEVEL, SUPPLEMENT_MIN_LEVELS,
};
use mds_core::time::now_ms;
use mds_core::{
    DataKind, MarketData, MarketPayload, MergeStrategy, OrderBook, OrderBookWithSource,
    PriceLevelWithSource, Source, SymbolConfig, SymbolMode, Ticker, TickerWithSource, Trade,
};
use tracing::{debug, info};

const TRADE_CACHE_LEN: usize = 100;

/// Latest view of one symbol from one side (internal or external).
#[derive(Debug, Default)]
pub struct CachedSide {
    pub ticker: Option<Ticker>,
    pub depth: Option<OrderBook>,
    pub trades: VecDeque<Trade>,
    pub last_update_ms: i64,
}

#[derive(Default)]
struct MergerState {
    configs: HashMap<String, SymbolConfig>,
    internal: HashMap<String, CachedSide>,
    external: HashMap<String, CachedSide>,
}

/// Fusion engine. Every adapter sink routes through [`DataMerger::process`];
/// one mutex guards configs and both side caches — updates are small and the
/// aggregate throughput does not warrant per-symbol sharding.
pub struct DataMerger {
    state: Mutex<MergerState>,
}

impl DataMerger {
    pub fn new(configs: impl IntoIterator<Item = SymbolConfig>) -> Self {
        let configs: HashMap<String, SymbolConfig> = configs
            .into_iter()
            .filter(|config| config.enable)
            .map(|config| (config.symbol.clone(), config))
            .collect();
        info!(symbols = configs.len(), "fusion engine initialized");
        Self {
            state: Mutex::new(MergerState {
                configs,
                internal: HashMap::new(),
                external: HashMap::new(),
            }),
        }
    }

    pub fn update_config(&self, config: SymbolConfig) {
        let mut state = self.state.lock().unwrap();
        info!(symbol = %config.symbol, mode = ?config.mode, "symbol config updated");
        if config.enable {
            state.configs.insert(config.symbol.clone(), config);
        } else {
            state.configs.remove(&config.symbol);
        }
    }

    pub fn config_for(&self, symbol: &str) -> Option<SymbolConfig> {
        self.state.lock().unwrap().configs.get(symbol).cloned()
    }

    /// Apply the symbol's policy to one record. Returns the record to
    /// forward, a new merged record, or nothing when the policy suppresses
    /// the input.
    pub fn process(&self, data: MarketData) -> Option<MarketData> {
        let mut state = self.state.lock().unwrap();
        let Some(config) = state.configs.get(&data.symbol).cloned() else {
            return Some(data);
        };

        match config.mode {
            SymbolMode::InternalOnly => (data.source == Source::Internal).then_some(data),
            SymbolMode::ExternalOnly => (data.source == Source::External).then_some(data),
            SymbolMode::Hybrid => merge(&mut state, data, &config, now_ms()),
        }
    }
}

fn merge(
    state: &mut MergerState,
    data: MarketData,
    config: &SymbolConfig,
    now_ms: i64,
) -> Option<MarketData> {
    let symbol = data.symbol.clone();
    let kind = data.kind();
    cache_data(state, &data, now_ms);

    match kind {
        DataKind::Ticker => {
            let internal = state.internal.get(&symbol);
            let external = state.external.get(&symbol);
            let merged = merge_ticker(internal, external, config.merge_strategy, &symbol, now_ms)?;
            Some(MarketData::new(
                EXCHANGE_MERGED,
                symbol,
                Source::Merged,
                now_ms,
                MarketPayload::MergedTicker(merged),
            ))
        }
        DataKind::Depth => {
            let internal = state.internal.get(&symbol);
            let external = state.external.get(&symbol);
            let merged = match config.merge_strategy {
                MergeStrategy::Priority => merge_depth_priority(internal, external, &symbol, now_ms),
                MergeStrategy::Supplement => {
                    merge_depth_supplement(internal, external, &symbol, now_ms)
                }
            }?;
            Some(MarketData::new(
                EXCHANGE_MERGED,
                symbol,
                Source::Merged,
                now_ms,
                MarketPayload::MergedDepth(merged),
            ))
        }
        // Trades and klines are never merged.
        DataKind::Trade | DataKind::Kline => Some(data),
    }
}

fn cache_data(state: &mut MergerState, data: &MarketData, now_ms: i64) {
    let side = match data.source {
        Source::Internal => &mut state.internal,
        Source::External => &mut state.external,
        Source::Merged => return,
    };
    let cache = side.entry(data.symbol.clone()).or_default();

    match &data.payload {
        MarketPayload::Ticker(ticker) => cache.ticker = Some(ticker.clone()),
        MarketPayload::Depth(depth) => cache.depth = Some(depth.clone()),
        MarketPayload::Trade(trade) => {
            cache.trades.push_front(trade.clone());
            cache.trades.truncate(TRADE_CACHE_LEN);
        }
        MarketPayload::Kline(_) => {}
        MarketPayload::MergedTicker(_) | MarketPayload::MergedDepth(_) => {
            debug!(symbol = %data.symbol, "merged record fed back into fusion, ignoring");
        }
    }
    cache.last_update_ms = now_ms;
}

fn is_fresh(side: Option<&CachedSide>, now_ms: i64) -> bool {
    side.is_some_and(|cache| now_ms - cache.last_update_ms < DATA_FRESHNESS_THRESHOLD_MS)
}

/// The supplement strategy for tickers is equivalent to priority; both
/// resolve through the same choose-a-side rule.
pub fn merge_ticker(
    internal: Option<&CachedSide>,
    external: Option<&CachedSide>,
    strategy: MergeStrategy,
    symbol: &str,
    now_ms: i64,
) -> Option<TickerWithSource> {
    match strategy {
        MergeStrategy::Priority | MergeStrategy::Supplement => {
            merge_ticker_priority(internal, external, symbol, now_ms)
        }
    }
}

/// Fresh internal top-of-book wins; a fresh external side is the fallback.
/// Volume fields come from both caches unconditionally.
pub fn merge_ticker_priority(
    internal: Option<&CachedSide>,
    external: Option<&CachedSide>,
    symbol: &str,
    now_ms: i64,
) -> Option<TickerWithSource> {
    let internal_ticker = internal.and_then(|c| c.ticker.as_ref());
    let external_ticker = external.and_then(|c| c.ticker.as_ref());

    let (chosen, source) = if internal_ticker.is_some() && is_fresh(internal, now_ms) {
        (internal_ticker?, Source::Internal)
    } else if external_ticker.is_some() && is_fresh(external, now_ms) {
        (external_ticker?, Source::External)
    } else {
        return None;
    };

    let internal_volume = internal_ticker.map(|t| t.volume_24h).unwrap_or_default();
    let external_volume = external_ticker.map(|t| t.volume_24h).unwrap_or_default();

    Some(TickerWithSource {
        symbol: symbol.to_string(),
        last_price: chosen.last_price,
        last_price_source: source,
        bid_price: chosen.bid_price,
        ask_price: chosen.ask_price,
        high_24h: chosen.high_24h,
        low_24h: chosen.low_24h,
        internal_volume_24h: internal_volume,
        external_volume_24h: external_volume,
        total_volume_24h: internal_volume + external_volume,
        timestamp: chosen.timestamp,
    })
}

fn tagged_levels(levels: &[mds_core::PriceLevel], source: Source) -> Vec<PriceLevelWithSource> {
    levels
        .iter()
        .map(|level| PriceLevelWithSource {
            price: level.price,
            amount: level.amount,
            source,
        })
        .collect()
}

fn sort_book(book: &mut OrderBookWithSource) {
    book.bids
        .sort_by(|a, b| b.price.partial_cmp(&a.price).unwrap_or(std::cmp::Ordering::Equal));
    book.asks
        .sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(std::cmp::Ordering::Equal));
}

/// Concatenate both fresh sides, sort, and truncate each side to the depth
/// cap.
pub fn merge_depth_priority(
    internal: Option<&CachedSide>,
    external: Option<&CachedSide>,
    symbol: &str,
    now_ms: i64,
) -> Option<OrderBookWithSource> {
    let mut book = OrderBookWithSource {
        symbol: symbol.to_string(),
        ..Default::default()
    };

    if let Some(depth) = internal.filter(|_| is_fresh(internal, now_ms)).and_then(|c| c.depth.as_ref()) {
        book.bids.extend(tagged_levels(&depth.bids, Source::Internal));
        book.asks.extend(tagged_levels(&depth.asks, Source::Internal));
        book.internal_bids_count = depth.bids.len();
        book.internal_asks_count = depth.asks.len();
    }
    if let Some(depth) = external.filter(|_| is_fresh(external, now_ms)).and_then(|c| c.depth.as_ref()) {
        book.bids.extend(tagged_levels(&depth.bids, Source::External));
        book.asks.extend(tagged_levels(&depth.asks, Source::External));
        book.external_bids_count = depth.bids.len();
        book.external_asks_count = depth.asks.len();
    }

    if book.bids.is_empty() && book.asks.is_empty() {
        return None;
    }

    sort_book(&mut book);
    book.bids.truncate(MAX_DEPTH_LEVEL);
    book.asks.truncate(MAX_DEPTH_LEVEL);
    book.timestamp = now_ms;
    Some(book)
}

/// Internal levels unconditionally; external levels only top a side up when
/// it holds fewer than twenty. Supplemented books are not truncated.
pub fn merge_depth_supplement(
    internal: Option<&CachedSide>,
    external: Option<&CachedSide>,
    symbol: &str,
    now_ms: i64,
) -> Option<OrderBookWithSource> {
    let mut book = OrderBookWithSource {
        symbol: symbol.to_string(),
        ..Default::default()
    };

    if let Some(depth) = internal.filter(|_| is_fresh(internal, now_ms)).and_then(|c| c.depth.as_ref()) {
        book.bids.extend(tagged_levels(&depth.bids, Source::Internal));
        book.asks.extend(tagged_levels(&depth.asks, Source::Internal));
        book.internal_bids_count = depth.bids.len();
        book.internal_asks_count = depth.asks.len();
    }

    let external_depth = external
        .filter(|_| is_fresh(external, now_ms))
        .and_then(|c| c.depth.as_ref());
    if let Some(depth) = external_depth {
        if book.bids.len() < SUPPLEMENT_MIN_LEVELS {
            book.bids.extend(tagged_levels(&depth.bids, Source::External));
            book.external_bids_count = depth.bids.len();
        }
        if book.asks.len() < SUPPLEMENT_MIN_LEVELS {
            book.asks.extend(tagged_levels(&depth.asks, Source::External));
            book.external_asks_count = depth.asks.len();
        }
    }

    if book.bids.is_empty() && book.asks.is_empty() {
        return None;
    }

    sort_book(&mut book);
    book.timestamp = now_ms;
    Some(book)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mds_core::{PriceLevel, Side};

    fn ticker(symbol: &str, last: f64, volume: f64, ts: i64) -> Ticker {
        Ticker {
            symbol: symbol.to_string(),
            last_price: last,
            bid_price: last - 1.0,
            ask_price: last + 1.0,
            high_24h: last + 100.0,
            low_24h: last - 100.0,
            volume_24h: volume,
            timestamp: ts,
        }
    }

    fn side_with_ticker(t: Ticker, last_update_ms: i64) -> CachedSide {
        CachedSide {
            ticker: Some(t),
            last_update_ms,
            ..Default::default()
        }
    }

    fn side_with_depth(bids: Vec<PriceLevel>, asks: Vec<PriceLevel>, last_update_ms: i64) -> CachedSide {
        CachedSide {
            depth: Some(OrderBook {
                symbol: "BTCUSDT".to_string(),
                bids,
                asks,
                timestamp: last_update_ms,
            }),
            last_update_ms,
            ..Default::default()
        }
    }

    fn level(price: f64, amount: f64) -> PriceLevel {
        PriceLevel { price, amount }
    }

    #[test]
    fn priority_ticker_prefers_fresh_internal() {
        let now = 1_000_000;
        let internal = side_with_ticker(ticker("BTCUSDT", 45_000.0, 10.0, now - 50), now - 50);
        let external = side_with_ticker(ticker("BTCUSDT", 44_990.0, 20.0, now - 40), now - 40);

        let merged =
            merge_ticker_priority(Some(&internal), Some(&external), "BTCUSDT", now).unwrap();
        assert_eq!(merged.last_price, 45_000.0);
        assert_eq!(merged.last_price_source, Source::Internal);
        assert_eq!(merged.internal_volume_24h, 10.0);
        assert_eq!(merged.external_volume_24h, 20.0);
        assert_eq!(merged.total_volume_24h, 30.0);
    }

    #[test]
    fn stale_internal_falls_back_to_external_but_keeps_both_volumes() {
        let now = 1_000_000;
        let internal = side_with_ticker(ticker("BTCUSDT", 45_000.0, 10.0, now - 7_000), now - 7_000);
        let external = side_with_ticker(ticker("BTCUSDT", 44_990.0, 20.0, now - 100), now - 100);

        let merged =
            merge_ticker_priority(Some(&internal), Some(&external), "BTCUSDT", now).unwrap();
        assert_eq!(merged.last_price_source, Source::External);
        assert_eq!(merged.last_price, 44_990.0);
        // The stale side still contributes its cached volume.
        assert_eq!(merged.total_volume_24h, 30.0);
    }

    #[test]
    fn both_sides_stale_yields_nothing() {
        let now = 1_000_000;
        let internal = side_with_ticker(ticker("BTCUSDT", 1.0, 1.0, now - 6_000), now - 6_000);
        let external = side_with_ticker(ticker("BTCUSDT", 2.0, 2.0, now - 9_000), now - 9_000);
        assert!(merge_ticker_priority(Some(&internal), Some(&external), "BTCUSDT", now).is_none());
        assert!(merge_ticker_priority(None, None, "BTCUSDT", now).is_none());
    }

    #[test]
    fn supplement_ticker_matches_priority() {
        let now = 1_000_000;
        let external = side_with_ticker(ticker("BTCUSDT", 44_990.0, 20.0, now - 40), now - 40);
        let priority = merge_ticker(None, Some(&external), MergeStrategy::Priority, "BTCUSDT", now);
        let supplement =
            merge_ticker(None, Some(&external), MergeStrategy::Supplement, "BTCUSDT", now);
        assert_eq!(priority, supplement);
    }

    #[test]
    fn priority_depth_interleaves_and_tags_sources() {
        let now = 1_000_000;
        let internal = side_with_depth(vec![level(44_999.0, 1.5)], vec![], now - 100);
        let external = side_with_depth(vec![level(44_998.0, 2.0)], vec![], now - 100);

        let merged =
            merge_depth_priority(Some(&internal), Some(&external), "BTCUSDT", now).unwrap();
        assert_eq!(merged.bids.len(), 2);
        assert_eq!(merged.bids[0].price, 44_999.0);
        assert_eq!(merged.bids[0].source, Source::Internal);
        assert_eq!(merged.bids[1].price, 44_998.0);
        assert_eq!(merged.bids[1].source, Source::External);
        assert_eq!(merged.internal_bids_count, 1);
        assert_eq!(merged.external_bids_count, 1);
    }

    #[test]
    fn priority_depth_truncates_to_max_levels() {
        let now = 1_000_000;
        let bids: Vec<PriceLevel> = (0..80).map(|n| level(50_000.0 - n as f64, 1.0)).collect();
        let internal = side_with_depth(bids.clone(), vec![], now - 10);
        let external = side_with_depth(
            (0..80).map(|n| level(49_000.0 - n as f64, 1.0)).collect(),
            vec![],
            now - 10,
        );

        let merged =
            merge_depth_priority(Some(&internal), Some(&external), "BTCUSDT", now).unwrap();
        assert_eq!(merged.bids.len(), MAX_DEPTH_LEVEL);
        for pair in merged.bids.windows(2) {
            assert!(pair[0].price >= pair[1].price);
        }
    }

    #[test]
    fn supplement_depth_skips_external_when_internal_is_deep() {
        let now = 1_000_000;
        let deep: Vec<PriceLevel> = (0..25).map(|n| level(50_000.0 - n as f64, 1.0)).collect();
        let internal = side_with_depth(deep, vec![], now - 10);
        let external = side_with_depth(vec![level(49_000.0, 5.0)], vec![], now - 10);

        let merged =
            merge_depth_supplement(Some(&internal), Some(&external), "BTCUSDT", now).unwrap();
        assert_eq!(merged.bids.len(), 25);
        assert!(merged.bids.iter().all(|l| l.source == Source::Internal));
        assert_eq!(merged.external_bids_count, 0);
    }

    #[test]
    fn supplement_depth_tops_up_thin_internal_without_truncating() {
        let now = 1_000_000;
        let internal = side_with_depth(vec![level(50_000.0, 1.0)], vec![], now - 10);
        let external_bids: Vec<PriceLevel> =
            (0..120).map(|n| level(49_999.0 - n as f64, 1.0)).collect();
        let external = side_with_depth(external_bids, vec![], now - 10);

        let merged =
            merge_depth_supplement(Some(&internal), Some(&external), "BTCUSDT", now).unwrap();
        assert_eq!(merged.bids.len(), 121);
        assert_eq!(merged.bids[0].source, Source::Internal);
    }

    #[test]
    fn external_only_mode_drops_internal_records() {
        let merger = DataMerger::new([SymbolConfig {
            symbol: "XYZUSDT".to_string(),
            mode: SymbolMode::ExternalOnly,
            primary_source: Source::External,
            external_source: "binance".to_string(),
            merge_strategy: MergeStrategy::Priority,
            enable: true,
            description: String::new(),
        }]);

        let trade = |source| {
            MarketData::new(
                "x",
                "XYZUSDT",
                source,
                1,
                MarketPayload::Trade(Trade {
                    symbol: "XYZUSDT".to_string(),
                    trade_id: "1".to_string(),
                    price: 1.0,
                    amount: 1.0,
                    side: Side::Buy,
                    timestamp: 1,
                }),
            )
        };

        assert!(merger.process(trade(Source::Internal)).is_none());
        let forwarded = merger.process(trade(Source::External)).unwrap();
        assert_eq!(forwarded.source, Source::External);
    }

    #[test]
    fn unconfigured_symbols_pass_through() {
        let merger = DataMerger::new(Vec::<SymbolConfig>::new());
        let data = MarketData::new(
            "binance",
            "DOGEUSDT",
            Source::External,
            1,
            MarketPayload::Ticker(ticker("DOGEUSDT", 0.1, 5.0, 1)),
        );
        assert_eq!(merger.process(data.clone()), Some(data));
    }

    #[test]
    fn hybrid_trades_pass_through_and_feed_the_cache() {
        let merger = DataMerger::new([SymbolConfig {
            symbol: "BTCUSDT".to_string(),
            mode: SymbolMode::Hybrid,
            primary_source: Source::Internal,
            external_source: "okx".to_string(),
            merge_strategy: MergeStrategy::Priority,
            enable: true,
            description: String::new(),
        }]);

        let trade = MarketData::new(
            "internal",
            "BTCUSDT",
            Source::Internal,
            1,
            MarketPayload::Trade(Trade {
                symbol: "BTCUSDT".to_string(),
                trade_id: "7".to_string(),
                price: 45_000.0,
                amount: 0.5,
                side: Side::Sell,
                timestamp: 1,
            }),
        );
        let out = merger.process(trade.clone()).unwrap();
        assert_eq!(out, trade);
        let state = merger.state.lock().unwrap();
        assert_eq!(state.internal.get("BTCUSDT").unwrap().trades.len(), 1);
    }
}
