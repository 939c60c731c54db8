//! Coinbase WebSocket Codec - Ticker Batch Channel
//!
//! Subscribes to the `ticker_batch` channel of the Coinbase Exchange
//! feed, which delivers `ticker` messages at most every few seconds per
//! product. Registered under both `cb` and `cb2`, so two independent
//! Coinbase sessions can vote separately.
//!
//! See <https://docs.cloud.coinbase.com/exchange/docs/websocket-channels#ticker-batch-channel>.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::wire;
use crate::domain::price::{InstId, PriceTime, Ticker};
use crate::ports::{CodecError, StreamCodec};

/// Coinbase Exchange WebSocket feed.
pub const COINBASE_URL: &str = "wss://ws-feed.exchange.coinbase.com";

/// Coinbase WebSocket subscribe message.
#[derive(Serialize)]
struct SubscribeMsg<'a> {
    #[serde(rename = "type")]
    msg_type: &'a str,
    product_ids: Vec<&'a str>,
    channels: [&'a str; 1],
}

/// Coinbase WebSocket message, only the fields the oracle reads.
#[derive(Debug, Deserialize)]
struct FeedMsg {
    #[serde(rename = "type")]
    msg_type: String,
    #[serde(default)]
    product_id: String,
    #[serde(default)]
    price: Value,
    #[serde(default)]
    time: Option<String>,
}

/// Decoded `ticker` message.
#[derive(Debug, Clone, PartialEq)]
pub struct TickerMsg {
    /// Last trade price, string or number on the wire.
    price: Value,
    /// Trade time (RFC 3339).
    time: Option<String>,
}

/// Coinbase ticker batch codec.
#[derive(Debug, Clone)]
pub struct CoinbaseCodec {
    /// Exchange id this instance was registered under (`cb` or `cb2`).
    exchange_id: String,
}

impl CoinbaseCodec {
    pub fn new(exchange_id: impl Into<String>) -> Self {
        Self {
            exchange_id: exchange_id.into(),
        }
    }
}

impl StreamCodec for CoinbaseCodec {
    type PriceFrame = TickerMsg;

    fn exchange(&self) -> &str {
        &self.exchange_id
    }

    fn url(&self, _tickers: &[Ticker]) -> String {
        COINBASE_URL.to_string()
    }

    fn subscription(&self, tickers: &[Ticker]) -> Result<Option<String>, CodecError> {
        let subscribe = SubscribeMsg {
            msg_type: "subscribe",
            product_ids: tickers.iter().map(|t| t.inst_id.as_str()).collect(),
            channels: ["ticker_batch"],
        };
        Ok(Some(serde_json::to_string(&subscribe)?))
    }

    fn decode_price(&self, text: &str) -> Option<(InstId, TickerMsg)> {
        let msg: FeedMsg = serde_json::from_str(text).ok()?;
        if msg.msg_type != "ticker" {
            return None;
        }
        Some((
            msg.product_id,
            TickerMsg {
                price: msg.price,
                time: msg.time,
            },
        ))
    }

    fn extract_price(&self, frame: &TickerMsg, multiplier: f64) -> Result<PriceTime, CodecError> {
        let price = wire::number(&frame.price)?;
        let time = frame
            .time
            .as_deref()
            .ok_or_else(|| CodecError::Shape("ticker without time".to_string()))?;
        Ok(PriceTime::new(price * multiplier, wire::rfc3339(time)?))
    }

    fn ping(&self) -> Option<Vec<u8>> {
        Some(b"ping".to_vec())
    }
}
