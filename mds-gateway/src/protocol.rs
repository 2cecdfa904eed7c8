//! Client control protocol and server frame shapes.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::hub::ClientId;

/// Inbound control message: subscribe / unsubscribe / ping.
#[derive(Debug, Deserialize)]
pub struct ClientCommand {
    pub action: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
}

/// `kind:symbol` when a symbol is present, bare `kind` otherwise.
pub fn full_channel(channel: &str, symbol: Option<&str>) -> String {
    match symbol {
        Some(symbol) if !symbol.is_empty() => format!("{channel}:{symbol}"),
        _ => channel.to_string(),
    }
}

pub fn welcome_frame(client_id: &ClientId, timestamp: i64) -> Value {
    json!({
        "type": "welcome",
        "client_id": client_id.to_string(),
        "timestamp": timestamp,
        "message": "Connected to Market WebSocket Server",
    })
}

pub fn subscribed_frame(channel: &str, symbol: Option<&str>) -> Value {
    json!({
        "type": "subscribed",
        "data": {"channel": channel, "symbol": symbol.unwrap_or_default()},
    })
}

pub fn unsubscribed_frame(channel: &str, symbol: Option<&str>) -> Value {
    json!({
        "type": "unsubscribed",
        "data": {"channel": channel, "symbol": symbol.unwrap_or_default()},
    })
}

pub fn pong_frame() -> Value {
    json!({"type": "pong"})
}

pub fn error_frame(message: &str) -> Value {
    json!({"type": "error", "error": message})
}

pub fn update_frame(channel: &str, data: Value) -> Value {
    json!({"channel": channel, "data": data})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_name_includes_symbol_when_present() {
        assert_eq!(full_channel("ticker", Some("BTCUSDT")), "ticker:BTCUSDT");
        assert_eq!(full_channel("ticker", None), "ticker");
        assert_eq!(full_channel("kline", Some("BTCUSDT:1m")), "kline:BTCUSDT:1m");
    }

    #[test]
    fn commands_parse_with_optional_fields() {
        let cmd: ClientCommand =
            serde_json::from_str(r#"{"action":"subscribe","channel":"ticker","symbol":"BTCUSDT"}"#)
                .unwrap();
        assert_eq!(cmd.action, "subscribe");
        assert_eq!(cmd.channel.as_deref(), Some("ticker"));

        let ping: ClientCommand = serde_json::from_str(r#"{"action":"ping"}"#).unwrap();
        assert_eq!(ping.action, "ping");
        assert!(ping.channel.is_none());
    }

    #[test]
    fn error_frames_carry_the_message() {
        let frame = error_frame("unknown action: nope");
        assert_eq!(frame["type"], "error");
        assert_eq!(frame["error"], "unknown action: nope");
    }
}
