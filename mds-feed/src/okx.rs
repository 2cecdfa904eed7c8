//! OKX public-channel adapter. Symbols translate between the canonical
//! concatenated form and OKX's dashed instId (`BTCUSDT` ↔ `BTC-USDT`);
//! numeric fields arrive as strings; the heartbeat is an application-level
//! text ping.

use mds_core::consts::EXCHANGE_OKX;
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
use crate::numeric::{value_f64, value_i64};
use crate::session::{AdapterState, Decoded, StreamSpec, VenueCodec, WsClient};

pub const OKX_WS_URL: &str = "wss://ws.okx.com:8443/ws/v5/public";

pub struct OkxAdapter {
    client: WsClient,
}

impl OkxAdapter {
    pub fn new(ws_url: &str) -> Self {
        let url = if ws_url.is_empty() { OKX_WS_URL } else { ws_url };
        Self {
            client: WsClient::new(Box::new(OkxCodec), url),
        }
    }

    pub fn state(&self) -> watch::Receiver<AdapterState> {
        self.client.state()
    }
}

#[async_trait::async_trait]
impl ExchangeAdapter for OkxAdapter {
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

pub struct OkxCodec;

/// `BTCUSDT` → `BTC-USDT`. Quote discovery is suffix-based; unknown shapes
/// pass through unchanged.
fn format_inst_id(symbol: &str) -> String {
    for quote in ["USDT", "USDC", "BTC", "ETH"] {
        if let Some(base) = symbol.strip_suffix(quote) {
            if !base.is_empty() {
                return format!("{base}-{quote}");
            }
        }
    }
    symbol.to_string()
}

fn parse_inst_id(inst_id: &str) -> String {
    inst_id.replace('-', "")
}

fn channel_for(kind: DataKind) -> &'static str {
    match kind {
        DataKind::Ticker => "tickers",
        DataKind::Depth => "books5",
        DataKind::Trade => "trades",
        DataKind::Kline => "candle1m",
    }
}

impl VenueCodec for OkxCodec {
    fn name(&self) -> &'static str {
        EXCHANGE_OKX
    }

    fn subscribe_frames(&self, specs: &[StreamSpec]) -> Result<Vec<String>, FeedError> {
        let args: Vec<Value> = specs
            .iter()
            .map(|spec| {
                serde_json::json!({
                    "channel": channel_for(spec.kind),
                    "instId": format_inst_id(&spec.symbol),
                })
            })
            .collect();
        let frame = serde_json::json!({
            "op": "subscribe",
            "args": args,
        });
        Ok(vec![frame.to_string()])
    }

    fn decode(&self, text: &str) -> Result<Decoded, FeedError> {
        if text == "pong" {
            return Ok(Decoded::Pong);
        }
        let envelope: OkxEnvelope =
            serde_json::from_str(text).map_err(|err| FeedError::Parse(err.to_string()))?;

        if let Some(event) = envelope.event.as_deref() {
            return Ok(match event {
                "subscribe" => Decoded::Ack,
                "error" => Decoded::VenueError(envelope.msg.unwrap_or_default()),
                _ => Decoded::Ignore,
            });
        }

        let Some(arg) = envelope.arg else {
            return Ok(Decoded::Ignore);
        };
        let Some(inst_id) = arg.inst_id else {
            return Ok(Decoded::Ignore);
        };
        let Some(data) = envelope.data else {
            return Ok(Decoded::Ignore);
        };
        let symbol = parse_inst_id(&inst_id);
        let ts = now_ms();

        let mut records = Vec::new();
        for item in &data {
            let record = if arg.channel.starts_with("tickers") {
                parse_ticker(item, &symbol, ts)
            } else if arg.channel.starts_with("books") {
                parse_depth(item, &symbol, ts)
            } else if arg.channel.starts_with("trades") {
                parse_trade(item, &symbol, ts)
            } else if arg.channel.starts_with("candle") {
                parse_candle(item, &arg.channel, &symbol, ts)
            } else {
                None
            };
            if let Some(record) = record {
                records.push(record);
            }
        }
        if records.is_empty() {
            return Ok(Decoded::Ignore);
        }
        Ok(Decoded::Data(records))
    }

    fn ping_frame(&self) -> Message {
        Message::Text("ping".to_string())
    }
}

fn parse_ticker(item: &Value, symbol: &str, ts: i64) -> Option<MarketData> {
    let ticker: OkxTicker = serde_json::from_value(item.clone()).ok()?;
    Some(MarketData::new(
        EXCHANGE_OKX,
        symbol,
        Source::External,
        ts,
        MarketPayload::Ticker(Ticker {
            symbol: symbol.to_string(),
            last_price: ticker.last.parse().unwrap_or_default(),
            bid_price: ticker.bid_px.parse().unwrap_or_default(),
            ask_price: ticker.ask_px.parse().unwrap_or_default(),
            high_24h: ticker.high_24h.parse().unwrap_or_default(),
            low_24h: ticker.low_24h.parse().unwrap_or_default(),
            volume_24h: ticker.vol_24h.parse().unwrap_or_default(),
            timestamp: ts,
        }),
    ))
}

fn parse_depth(item: &Value, symbol: &str, ts: i64) -> Option<MarketData> {
    let bids = parse_levels(item.get("bids"));
    let asks = parse_levels(item.get("asks"));
    Some(MarketData::new(
        EXCHANGE_OKX,
        symbol,
        Source::External,
        ts,
        MarketPayload::Depth(OrderBook {
            symbol: symbol.to_string(),
            bids,
            asks,
            timestamp: ts,
        }),
    ))
}

fn parse_trade(item: &Value, symbol: &str, ts: i64) -> Option<MarketData> {
    let side = match item.get("side").and_then(Value::as_str) {
        Some("buy") => Side::Buy,
        _ => Side::Sell,
    };
    let trade_ts = item.get("ts").map(value_i64).filter(|t| *t > 0).unwrap_or(ts);
    Some(MarketData::new(
        EXCHANGE_OKX,
        symbol,
        Source::External,
        ts,
        MarketPayload::Trade(Trade {
            symbol: symbol.to_string(),
            trade_id: item
                .get("tradeId")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            price: item.get("px").map(value_f64).unwrap_or_default(),
            amount: item.get("sz").map(value_f64).unwrap_or_default(),
            side,
            timestamp: trade_ts,
        }),
    ))
}

// Candle items are positional arrays: [ts, o, h, l, c, vol, volCcy, ...].
fn parse_candle(item: &Value, channel: &str, symbol: &str, ts: i64) -> Option<MarketData> {
    let interval = Interval::parse(channel.strip_prefix("candle")?)?;
    let fields = item.as_array()?;
    if fields.len() < 6 {
        return None;
    }
    let open_time = value_i64(&fields[0]);
    Some(MarketData::new(
        EXCHANGE_OKX,
        symbol,
        Source::External,
        ts,
        MarketPayload::Kline(Kline {
            symbol: symbol.to_string(),
            interval,
            open_time,
            close_time: open_time + interval.period_ms() - 1,
            open: value_f64(&fields[1]),
            high: value_f64(&fields[2]),
            low: value_f64(&fields[3]),
            close: value_f64(&fields[4]),
            volume: value_f64(&fields[5]),
            quote_vol: fields.get(6).map(value_f64).unwrap_or_default(),
            trade_num: 0,
        }),
    ))
}

fn parse_levels(raw: Option<&Value>) -> Vec<PriceLevel> {
    let Some(Value::Array(entries)) = raw else {
        return Vec::new();
    };
    entries
        .iter()
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
struct OkxEnvelope {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    arg: Option<OkxArg>,
    #[serde(default)]
    data: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct OkxArg {
    channel: String,
    #[serde(rename = "instId", default)]
    inst_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OkxTicker {
    #[serde(default)]
    last: String,
    #[serde(rename = "bidPx", default)]
    bid_px: String,
    #[serde(rename = "askPx", default)]
    ask_px: String,
    #[serde(rename = "high24h", default)]
    high_24h: String,
    #[serde(rename = "low24h", default)]
    low_24h: String,
    #[serde(rename = "vol24h", default)]
    vol_24h: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(text: &str) -> Decoded {
        OkxCodec.decode(text).unwrap()
    }

    #[test]
    fn parses_ticker_envelope() {
        let payload = r#"{"arg":{"channel":"tickers","instId":"BTC-USDT"},"data":[{"instType":"SPOT","instId":"BTC-USDT","last":"29123.5","lastSz":"0.001","askPx":"29124","askSz":"0.5","bidPx":"29123","bidSz":"0.5","open24h":"30000","high24h":"31000","low24h":"28000","volCcy24h":"123","vol24h":"456","ts":"1700000000000"}]}"#;
        let Decoded::Data(records) = decode(payload) else {
            panic!("expected data");
        };
        assert_eq!(records[0].symbol, "BTCUSDT");
        match &records[0].payload {
            MarketPayload::Ticker(t) => {
                assert_eq!(t.last_price, 29_123.5);
                assert_eq!(t.bid_price, 29_123.0);
                assert_eq!(t.volume_24h, 456.0);
            }
            other => panic!("expected ticker, got {other:?}"),
        }
    }

    #[test]
    fn parses_books_envelope() {
        let payload = r#"{"arg":{"channel":"books5","instId":"ETH-USDT"},"data":[{"asks":[["2501.0","3.0","0","2"]],"bids":[["2500.0","1.0","0","1"],["2499.5","4.0","0","3"]],"ts":"1700000000000"}]}"#;
        let Decoded::Data(records) = decode(payload) else {
            panic!("expected data");
        };
        match &records[0].payload {
            MarketPayload::Depth(book) => {
                assert_eq!(book.symbol, "ETHUSDT");
                assert_eq!(book.bids.len(), 2);
                assert_eq!(book.bids[0].price, 2_500.0);
                assert_eq!(book.asks[0].amount, 3.0);
            }
            other => panic!("expected depth, got {other:?}"),
        }
    }

    #[test]
    fn parses_trade_envelope() {
        let payload = r#"{"arg":{"channel":"trades","instId":"BTC-USDT"},"data":[{"instId":"BTC-USDT","tradeId":"987654","px":"29100.1","sz":"0.25","side":"buy","ts":"1700000000123"}]}"#;
        let Decoded::Data(records) = decode(payload) else {
            panic!("expected data");
        };
        match &records[0].payload {
            MarketPayload::Trade(t) => {
                assert_eq!(t.trade_id, "987654");
                assert_eq!(t.side, Side::Buy);
                assert_eq!(t.timestamp, 1_700_000_000_123);
            }
            other => panic!("expected trade, got {other:?}"),
        }
    }

    #[test]
    fn parses_candle_envelope() {
        let payload = r#"{"arg":{"channel":"candle1m","instId":"BTC-USDT"},"data":[["1700000040000","44990","45020","44980","45010","12.5","561000"]]}"#;
        let Decoded::Data(records) = decode(payload) else {
            panic!("expected data");
        };
        match &records[0].payload {
            MarketPayload::Kline(k) => {
                assert_eq!(k.interval, Interval::M1);
                assert_eq!(k.open_time, 1_700_000_040_000);
                assert_eq!(k.close_time, 1_700_000_040_000 + 59_999);
                assert_eq!(k.volume, 12.5);
            }
            other => panic!("expected kline, got {other:?}"),
        }
    }

    #[test]
    fn subscription_events_are_acks_and_errors_are_flagged() {
        assert!(matches!(
            decode(r#"{"event":"subscribe","arg":{"channel":"tickers","instId":"BTC-USDT"}}"#),
            Decoded::Ack
        ));
        match decode(r#"{"event":"error","msg":"channel does not exist","code":"60018"}"#) {
            Decoded::VenueError(msg) => assert_eq!(msg, "channel does not exist"),
            _ => panic!("expected venue error"),
        }
    }

    #[test]
    fn text_pong_refreshes_heartbeat() {
        assert!(matches!(decode("pong"), Decoded::Pong));
    }

    #[test]
    fn symbol_translation_round_trips() {
        assert_eq!(format_inst_id("BTCUSDT"), "BTC-USDT");
        assert_eq!(format_inst_id("SOLUSDC"), "SOL-USDC");
        assert_eq!(parse_inst_id("BTC-USDT"), "BTCUSDT");
        assert_eq!(format_inst_id("WEIRD"), "WEIRD");
    }

    #[test]
    fn subscribe_frame_uses_okx_channel_names() {
        let specs = vec![
            StreamSpec {
                symbol: "BTCUSDT".to_string(),
                kind: DataKind::Ticker,
            },
            StreamSpec {
                symbol: "BTCUSDT".to_string(),
                kind: DataKind::Kline,
            },
        ];
        let frames = OkxCodec.subscribe_frames(&specs).unwrap();
        let frame: Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(frame["op"], "subscribe");
        assert_eq!(frame["args"][0]["channel"], "tickers");
        assert_eq!(frame["args"][0]["instId"], "BTC-USDT");
        assert_eq!(frame["args"][1]["channel"], "candle1m");
    }
}
