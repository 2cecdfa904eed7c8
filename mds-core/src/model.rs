use serde::de::Error as _;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Kind of market data carried by a record. Downstream consumers dispatch on
/// this, not on payload shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    Ticker,
    Depth,
    Trade,
    Kline,
}

impl DataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::Ticker => "ticker",
            DataKind::Depth => "depth",
            DataKind::Trade => "trade",
            DataKind::Kline => "kline",
        }
    }
}

impl std::fmt::Display for DataKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a record originated. Venue adapters emit `External`, the engine
/// receiver emits `Internal`, and the fusion engine emits `Merged`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Internal,
    External,
    Merged,
}

impl Default for Source {
    fn default() -> Self {
        Source::External
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::Internal => f.write_str("internal"),
            Source::External => f.write_str("external"),
            Source::Merged => f.write_str("merged"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

/// Candlestick interval. The set is fixed; the processor maintains one
/// aggregator per (symbol, interval).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Interval {
    pub const ALL: [Interval; 6] = [
        Interval::M1,
        Interval::M5,
        Interval::M15,
        Interval::H1,
        Interval::H4,
        Interval::D1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::M1 => "1m",
            Interval::M5 => "5m",
            Interval::M15 => "15m",
            Interval::H1 => "1h",
            Interval::H4 => "4h",
            Interval::D1 => "1d",
        }
    }

    pub fn parse(s: &str) -> Option<Interval> {
        match s {
            "1m" => Some(Interval::M1),
            "5m" => Some(Interval::M5),
            "15m" => Some(Interval::M15),
            "1h" => Some(Interval::H1),
            "4h" => Some(Interval::H4),
            "1d" => Some(Interval::D1),
            _ => None,
        }
    }

    pub fn period_ms(&self) -> i64 {
        match self {
            Interval::M1 => 60_000,
            Interval::M5 => 5 * 60_000,
            Interval::M15 => 15 * 60_000,
            Interval::H1 => 3_600_000,
            Interval::H4 => 4 * 3_600_000,
            Interval::D1 => 86_400_000,
        }
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last_price: f64,
    pub bid_price: f64,
    pub ask_price: f64,
    pub high_24h: f64,
    pub low_24h: f64,
    pub volume_24h: f64,
    pub timestamp: i64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub amount: f64,
}

/// Full order book snapshot. Bids are sorted price-descending and asks
/// price-ascending once they leave the depth manager.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub symbol: String,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub timestamp: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub trade_id: String,
    pub price: f64,
    pub amount: f64,
    pub side: Side,
    pub timestamp: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub symbol: String,
    pub interval: Interval,
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_vol: f64,
    pub trade_num: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceLevelWithSource {
    pub price: f64,
    pub amount: f64,
    pub source: Source,
}

/// Order book produced by hybrid depth fusion: every level is tagged with the
/// side it came from.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBookWithSource {
    pub symbol: String,
    pub bids: Vec<PriceLevelWithSource>,
    pub asks: Vec<PriceLevelWithSource>,
    pub internal_bids_count: usize,
    pub external_bids_count: usize,
    pub internal_asks_count: usize,
    pub external_asks_count: usize,
    pub timestamp: i64,
}

impl OrderBookWithSource {
    /// Drops the per-level source tags, yielding the plain book shape the
    /// storage layer persists.
    pub fn flatten(&self) -> OrderBook {
        OrderBook {
            symbol: self.symbol.clone(),
            bids: self
                .bids
                .iter()
                .map(|l| PriceLevel {
                    price: l.price,
                    amount: l.amount,
                })
                .collect(),
            asks: self
                .asks
                .iter()
                .map(|l| PriceLevel {
                    price: l.price,
                    amount: l.amount,
                })
                .collect(),
            timestamp: self.timestamp,
        }
    }
}

/// Ticker produced by hybrid fusion. Top-of-book and 24h stats come from the
/// chosen side; the volume fields are always populated from both caches.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TickerWithSource {
    pub symbol: String,
    pub last_price: f64,
    pub last_price_source: Source,
    pub bid_price: f64,
    pub ask_price: f64,
    pub high_24h: f64,
    pub low_24h: f64,
    pub internal_volume_24h: f64,
    pub external_volume_24h: f64,
    pub total_volume_24h: f64,
    pub timestamp: i64,
}

impl TickerWithSource {
    /// Flat ticker for the `ticker:{symbol}` hash; the combined volume stands
    /// in for `volume_24h`.
    pub fn flatten(&self) -> Ticker {
        Ticker {
            symbol: self.symbol.clone(),
            last_price: self.last_price,
            bid_price: self.bid_price,
            ask_price: self.ask_price,
            high_24h: self.high_24h,
            low_24h: self.low_24h,
            volume_24h: self.total_volume_24h,
            timestamp: self.timestamp,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SymbolMode {
    InternalOnly,
    ExternalOnly,
    Hybrid,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    Priority,
    Supplement,
}

/// Per-symbol fusion policy. Exactly one config per symbol; symbols without
/// one pass through the fusion engine untouched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SymbolConfig {
    pub symbol: String,
    pub mode: SymbolMode,
    #[serde(default = "default_primary_source")]
    pub primary_source: Source,
    #[serde(default)]
    pub external_source: String,
    pub merge_strategy: MergeStrategy,
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default)]
    pub description: String,
}

fn default_primary_source() -> Source {
    Source::Internal
}

fn default_true() -> bool {
    true
}

/// Trade push from the matching engine. Party and order ids ride along but
/// only the canonical trade fields survive normalization.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct InternalTradeMessage {
    pub symbol: String,
    pub trade_id: i64,
    pub price: f64,
    pub amount: f64,
    pub side: Side,
    #[serde(default)]
    pub buyer_id: i64,
    #[serde(default)]
    pub seller_id: i64,
    #[serde(default)]
    pub buy_order_id: i64,
    #[serde(default)]
    pub sell_order_id: i64,
    pub timestamp: i64,
    #[serde(default)]
    pub is_maker: bool,
}

impl InternalTradeMessage {
    pub fn to_trade(&self) -> Trade {
        Trade {
            symbol: self.symbol.clone(),
            trade_id: self.trade_id.to_string(),
            price: self.price,
            amount: self.amount,
            side: self.side,
            timestamp: self.timestamp,
        }
    }
}

/// Depth push from the matching engine. `seq_num` is carried for a future
/// move to incremental updates; the pipeline currently treats every push as a
/// full snapshot.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct InternalDepthMessage {
    pub symbol: String,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub timestamp: i64,
    #[serde(default)]
    pub seq_num: i64,
}

impl InternalDepthMessage {
    pub fn to_order_book(&self) -> OrderBook {
        OrderBook {
            symbol: self.symbol.clone(),
            bids: self.bids.clone(),
            asks: self.asks.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// Payload of a [`MarketData`] record. Merged variants keep the base kind on
/// the wire and are distinguished by `source == merged`.
#[derive(Clone, Debug, PartialEq)]
pub enum MarketPayload {
    Ticker(Ticker),
    Depth(OrderBook),
    Trade(Trade),
    Kline(Kline),
    MergedTicker(TickerWithSource),
    MergedDepth(OrderBookWithSource),
}

impl MarketPayload {
    pub fn kind(&self) -> DataKind {
        match self {
            MarketPayload::Ticker(_) | MarketPayload::MergedTicker(_) => DataKind::Ticker,
            MarketPayload::Depth(_) | MarketPayload::MergedDepth(_) => DataKind::Depth,
            MarketPayload::Trade(_) => DataKind::Trade,
            MarketPayload::Kline(_) => DataKind::Kline,
        }
    }
}

/// One normalized record flowing through the pipeline. Immutable once
/// constructed by an adapter; fusion builds new records, never mutates.
#[derive(Clone, Debug, PartialEq)]
pub struct MarketData {
    pub exchange: String,
    pub symbol: String,
    pub source: Source,
    pub timestamp: i64,
    pub payload: MarketPayload,
}

impl MarketData {
    pub fn new(
        exchange: impl Into<String>,
        symbol: impl Into<String>,
        source: Source,
        timestamp: i64,
        payload: MarketPayload,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            symbol: symbol.into(),
            source,
            timestamp,
            payload,
        }
    }

    pub fn kind(&self) -> DataKind {
        self.payload.kind()
    }
}

// The wire shape is the flat object
// `{exchange, symbol, type, source, timestamp, data}` with `type` as the
// discriminator; merged payload shapes additionally require `source=merged`.
impl Serialize for MarketData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut st = serializer.serialize_struct("MarketData", 6)?;
        st.serialize_field("exchange", &self.exchange)?;
        st.serialize_field("symbol", &self.symbol)?;
        st.serialize_field("type", self.payload.kind().as_str())?;
        st.serialize_field("source", &self.source)?;
        st.serialize_field("timestamp", &self.timestamp)?;
        match &self.payload {
            MarketPayload::Ticker(v) => st.serialize_field("data", v)?,
            MarketPayload::Depth(v) => st.serialize_field("data", v)?,
            MarketPayload::Trade(v) => st.serialize_field("data", v)?,
            MarketPayload::Kline(v) => st.serialize_field("data", v)?,
            MarketPayload::MergedTicker(v) => st.serialize_field("data", v)?,
            MarketPayload::MergedDepth(v) => st.serialize_field("data", v)?,
        }
        st.end()
    }
}

impl<'de> Deserialize<'de> for MarketData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            exchange: String,
            symbol: String,
            #[serde(rename = "type")]
            kind: DataKind,
            #[serde(default)]
            source: Source,
            #[serde(default)]
            timestamp: i64,
            data: serde_json::Value,
        }

        let raw = Raw::deserialize(deserializer)?;
        let payload = match (raw.kind, raw.source) {
            (DataKind::Ticker, Source::Merged) => MarketPayload::MergedTicker(
                serde_json::from_value(raw.data).map_err(D::Error::custom)?,
            ),
            (DataKind::Ticker, _) => {
                MarketPayload::Ticker(serde_json::from_value(raw.data).map_err(D::Error::custom)?)
            }
            (DataKind::Depth, Source::Merged) => MarketPayload::MergedDepth(
                serde_json::from_value(raw.data).map_err(D::Error::custom)?,
            ),
            (DataKind::Depth, _) => {
                MarketPayload::Depth(serde_json::from_value(raw.data).map_err(D::Error::custom)?)
            }
            (DataKind::Trade, _) => {
                MarketPayload::Trade(serde_json::from_value(raw.data).map_err(D::Error::custom)?)
            }
            (DataKind::Kline, _) => {
                MarketPayload::Kline(serde_json::from_value(raw.data).map_err(D::Error::custom)?)
            }
        };

        Ok(MarketData {
            exchange: raw.exchange,
            symbol: raw.symbol,
            source: raw.source,
            timestamp: raw.timestamp,
            payload,
        })
    }
}
