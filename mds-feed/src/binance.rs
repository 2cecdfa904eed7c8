//! Binance spot adapter: combined raw streams over one socket, lowercase
//! concatenated symbols, event-tagged JSON frames.

use mds_core::consts::EXCHANGE_BINANCE;
use mds_core::time::now_ms;
use mds_core::{
    DataKind, Interval, Kline, MarketData, MarketPayload, OrderBook, PriceLevel, Side, Source,
    Ticker, Trade,
};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;

use crate::adapter::{ExchangeAdapter, MessageSink};
use crate::error::FeedError;
use crate::numeric::{lenient_f64, value_f64};
use crate::session::{AdapterState, Decoded, StreamSpec, VenueCodec, WsClient};

pub const BINANCE_WS_URL: &str = "wss://stream.binance.com:9443/ws";

pub struct BinanceAdapter {
    client: WsClient,
}

impl BinanceAdapter {
    pub fn new(ws_url: &str) -> Self {
        let url = if ws_url.is_empty() {
            BINANCE_WS_URL
        } else {
            ws_url
        };
        Self {
            client: WsClient::new(Box::new(BinanceCodec), url),
        }
    }

    pub fn state(&self) -> watch::Receiver<AdapterState> {
        self.client.state()
    }
}

#[async_trait::async_trait]
impl ExchangeAdapter for BinanceAdapter {
    async fn connect(&self) -> Result<(), FeedError> {
        self.client.connect().await
    }

    async fn subscribe(&self, symbols: &[String], kinds: &[DataKind]) -> Result<(), FeedError> {
        self.client.subscribe(symbols, kinds).await
    }

    fn on_message(&self, sink: MessageSink) {
        self.client.on_message(sink);
    }

    async fn close(&self) {
        self.client.close().await;
    }

    fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    fn name(&self) -> &str {
        self.client.name()
    }
}

pub struct BinanceCodec;

impl VenueCodec for BinanceCodec {
    fn name(&self) -> &'static str {
        EXCHANGE_BINANCE
    }

    fn subscribe_frames(&self, specs: &[StreamSpec]) -> Result<Vec<String>, FeedError> {
        let params: Vec<String> = specs
            .iter()
            .map(|spec| {
                let symbol = spec.symbol.to_lowercase();
                match spec.kind {
                    DataKind::Ticker => format!("{symbol}@ticker"),
                    DataKind::Depth => format!("{symbol}@depth20@100ms"),
                    DataKind::Trade => format!("{symbol}@trade"),
                    DataKind::Kline => format!("{symbol}@kline_1m"),
                }
            })
            .collect();
        let frame = serde_json::json!({
            "method": "SUBSCRIBE",
            "params": params,
            "id": 1,
        });
        Ok(vec![frame.to_string()])
    }

    fn decode(&self, text: &str) -> Result<Decoded, FeedError> {
        let value: Value =
            serde_json::from_str(text).map_err(|err| FeedError::Parse(err.to_string()))?;
        if value.get("result").is_some() {
            return Ok(Decoded::Ack);
        }
        let Some(event) = value.get("e").and_then(Value::as_str) else {
            return Ok(Decoded::Ignore);
        };
        match event {
            "24hrTicker" | "depthUpdate" | "trade" | "kline" => {}
            _ => return Ok(Decoded::Ignore),
        }

        let ts = now_ms();
        let event: BinanceEvent =
            serde_json::from_value(value).map_err(|err| FeedError::Parse(err.to_string()))?;
        let record = match event {
            BinanceEvent::Ticker(t) => {
                let symbol = t.symbol.to_uppercase();
                MarketData::new(
                    EXCHANGE_BINANCE,
                    symbol.clone(),
                    Source::External,
                    ts,
                    MarketPayload::Ticker(Ticker {
                        symbol,
                        last_price: t.last_price,
                        bid_price: t.bid_price,
                        ask_price: t.ask_price,
                        high_24h: t.high_24h,
                        low_24h: t.low_24h,
                        volume_24h: t.volume_24h,
                        timestamp: ts,
                    }),
                )
            }
            BinanceEvent::Depth(d) => {
                let symbol = d.symbol.to_uppercase();
                MarketData::new(
                    EXCHANGE_BINANCE,
                    symbol.clone(),
                    Source::External,
                    ts,
                    MarketPayload::Depth(OrderBook {
                        symbol,
                        bids: parse_levels(&d.bids),
                        asks: parse_levels(&d.asks),
                        timestamp: ts,
                    }),
                )
            }
            BinanceEvent::Trade(t) => {
                let symbol = t.symbol.to_uppercase();
                let trade_ts = if t.trade_time > 0 { t.trade_time } else { ts };
                MarketData::new(
                    EXCHANGE_BINANCE,
                    symbol.clone(),
                    Source::External,
                    ts,
                    MarketPayload::Trade(Trade {
                        symbol,
                        trade_id: t.trade_id.to_string(),
                        price: t.price,
                        amount: t.quantity,
                        side: if t.buyer_is_maker { Side::Buy } else { Side::Sell },
                        timestamp: trade_ts,
                    }),
                )
            }
            BinanceEvent::Kline(k) => {
                let Some(interval) = Interval::parse(&k.kline.interval) else {
                    return Ok(Decoded::Ignore);
                };
                let symbol = k.symbol.to_uppercase();
                MarketData::new(
                    EXCHANGE_BINANCE,
                    symbol.clone(),
                    Source::External,
                    ts,
                    MarketPayload::Kline(Kline {
                        symbol,
                        interval,
                        open_time: k.kline.open_time,
                        close_time: k.kline.close_time,
                        open: k.kline.open,
                        high: k.kline.high,
                        low: k.kline.low,
                        close: k.kline.close,
                        volume: k.kline.volume,
                        quote_vol: k.kline.quote_volume,
                        trade_num: k.kline.trade_count,
                    }),
                )
            }
        };
        Ok(Decoded::Data(vec![record]))
    }

    fn ping_frame(&self) -> Message {
        Message::Ping(b"ping".to_vec())
    }
}

fn parse_levels(raw: &[Value]) -> Vec<PriceLevel> {
    raw.iter()
        .filter_map(|entry| {
            let level = entry.as_array()?;
            if level.len() < 2 {
                return None;
            }
            Some(PriceLevel {
                price: value_f64(&level[0]),
                amount: value_f64(&level[1]),
            })
        })
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(tag = "e")]
enum BinanceEvent {
    #[serde(rename = "24hrTicker")]
    Ticker(BinanceTicker),
    #[serde(rename = "depthUpdate")]
    Depth(BinanceDepth),
    #[serde(rename = "trade")]
    Trade(BinanceTrade),
    #[serde(rename = "kline")]
    Kline(BinanceKlineEvent),
}

#[derive(Debug, Deserialize)]
struct BinanceTicker {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c", deserialize_with = "lenient_f64", default)]
    last_price: f64,
    #[serde(rename = "b", deserialize_with = "lenient_f64", default)]
    bid_price: f64,
    #[serde(rename = "a", deserialize_with = "lenient_f64", default)]
    ask_price: f64,
    #[serde(rename = "h", deserialize_with = "lenient_f64", default)]
    high_24h: f64,
    #[serde(rename = "l", deserialize_with = "lenient_f64", default)]
    low_24h: f64,
    #[serde(rename = "v", deserialize_with = "lenient_f64", default)]
    volume_24h: f64,
}

#[derive(Debug, Deserialize)]
struct BinanceDepth {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "b", default)]
    bids: Vec<Value>,
    #[serde(rename = "a", default)]
    asks: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct BinanceTrade {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "t", default)]
    trade_id: i64,
    #[serde(rename = "p", deserialize_with = "lenient_f64", default)]
    price: f64,
    #[serde(rename = "q", deserialize_with = "lenient_f64", default)]
    quantity: f64,
    #[serde(rename = "T", default)]
    trade_time: i64,
    #[serde(rename = "m", default)]
    buyer_is_maker: bool,
}

#[derive(Debug, Deserialize)]
struct BinanceKlineEvent {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "k")]
    kline: BinanceKline,
}

#[derive(Debug, Deserialize)]
struct BinanceKline {
    #[serde(rename = "i")]
    interval: String,
    #[serde(rename = "t", default)]
    open_time: i64,
    #[serde(rename = "T", default)]
    close_time: i64,
    #[serde(rename = "o", deserialize_with = "lenient_f64", default)]
    open: f64,
    #[serde(rename = "h", deserialize_with = "lenient_f64", default)]
    high: f64,
    #[serde(rename = "l", deserialize_with = "lenient_f64", default)]
    low: f64,
    #[serde(rename = "c", deserialize_with = "lenient_f64", default)]
    close: f64,
    #[serde(rename = "v", deserialize_with = "lenient_f64", default)]
    volume: f64,
    #[serde(rename = "q", deserialize_with = "lenient_f64", default)]
    quote_volume: f64,
    #[serde(rename = "n", default)]
    trade_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(text: &str) -> Decoded {
        BinanceCodec.decode(text).unwrap()
    }

    #[test]
    fn parses_ticker_event() {
        let payload = r#"{"e":"24hrTicker","E":1700000000000,"s":"BTCUSDT","c":"45000.50","b":"44999.00","a":"45001.00","h":"46000.00","l":"44000.00","v":"1234.5"}"#;
        let Decoded::Data(records) = decode(payload) else {
            panic!("expected data");
        };
        let record = &records[0];
        assert_eq!(record.exchange, "binance");
        assert_eq!(record.symbol, "BTCUSDT");
        assert_eq!(record.source, Source::External);
        match &record.payload {
            MarketPayload::Ticker(t) => {
                assert_eq!(t.last_price, 45_000.5);
                assert_eq!(t.bid_price, 44_999.0);
                assert!(t.bid_price <= t.ask_price);
                assert_eq!(t.volume_24h, 1_234.5);
            }
            other => panic!("expected ticker, got {other:?}"),
        }
    }

    #[test]
    fn parses_trade_event_with_maker_side() {
        let payload = r#"{"e":"trade","E":1700000000000,"s":"ethusdt","t":12345,"p":"2500.00","q":"0.75","T":1700000000123,"m":true}"#;
        let Decoded::Data(records) = decode(payload) else {
            panic!("expected data");
        };
        match &records[0].payload {
            MarketPayload::Trade(t) => {
                assert_eq!(t.symbol, "ETHUSDT");
                assert_eq!(t.trade_id, "12345");
                assert_eq!(t.side, Side::Buy);
                assert_eq!(t.timestamp, 1_700_000_000_123);
            }
            other => panic!("expected trade, got {other:?}"),
        }
    }

    #[test]
    fn parses_depth_event_and_skips_short_levels() {
        let payload = r#"{"e":"depthUpdate","s":"BTCUSDT","b":[["44999.0","1.5"],["44998.0","2.0"],["bogus"]],"a":[["45001.0","0.7"]]}"#;
        let Decoded::Data(records) = decode(payload) else {
            panic!("expected data");
        };
        match &records[0].payload {
            MarketPayload::Depth(book) => {
                assert_eq!(book.bids.len(), 2);
                assert_eq!(book.bids[0].price, 44_999.0);
                assert_eq!(book.asks[0].amount, 0.7);
            }
            other => panic!("expected depth, got {other:?}"),
        }
    }

    #[test]
    fn parses_kline_event() {
        let payload = r#"{"e":"kline","s":"BTCUSDT","k":{"t":1700000040000,"T":1700000099999,"s":"BTCUSDT","i":"1m","o":"44990.0","c":"45010.0","h":"45020.0","l":"44980.0","v":"12.5","n":42,"q":"561000.0"}}"#;
        let Decoded::Data(records) = decode(payload) else {
            panic!("expected data");
        };
        match &records[0].payload {
            MarketPayload::Kline(k) => {
                assert_eq!(k.interval, Interval::M1);
                assert_eq!(k.open_time, 1_700_000_040_000);
                assert!(k.low <= k.open && k.open <= k.high);
                assert!(k.low <= k.close && k.close <= k.high);
                assert_eq!(k.trade_num, 42);
            }
            other => panic!("expected kline, got {other:?}"),
        }
    }

    #[test]
    fn subscription_ack_is_not_data() {
        assert!(matches!(decode(r#"{"result":null,"id":1}"#), Decoded::Ack));
    }

    #[test]
    fn unknown_event_is_ignored() {
        assert!(matches!(
            decode(r#"{"e":"24hrMiniTicker","s":"BTCUSDT"}"#),
            Decoded::Ignore
        ));
    }

    #[test]
    fn malformed_frame_is_a_parse_error() {
        assert!(BinanceCodec.decode("{not json").is_err());
    }

    #[test]
    fn subscribe_frame_lists_streams_for_every_pair() {
        let specs = vec![
            StreamSpec {
                symbol: "BTCUSDT".to_string(),
                kind: DataKind::Ticker,
            },
            StreamSpec {
                symbol: "BTCUSDT".to_string(),
                kind: DataKind::Depth,
            },
            StreamSpec {
                symbol: "ETHUSDT".to_string(),
                kind: DataKind::Trade,
            },
        ];
        let frames = BinanceCodec.subscribe_frames(&specs).unwrap();
        assert_eq!(frames.len(), 1);
        let frame: Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(frame["method"], "SUBSCRIBE");
        let params: Vec<&str> = frame["params"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p.as_str().unwrap())
            .collect();
        assert_eq!(
            params,
            vec!["btcusdt@ticker", "btcusdt@depth20@100ms", "ethusdt@trade"]
        );
    }
}
