//! Kraken WebSocket Codec - OHLC Channel
//!
//! Kraken's v1 public feed pushes OHLC updates as positional arrays:
//! `[channelId, [time, etime, open, high, low, close, vwap, volume, count], "ohlc-1", pair]`.

use serde::Serialize;
use serde_json::Value;

use super::wire;
use crate::domain::price::{InstId, PriceTime, Ticker};
use crate::ports::{CodecError, StreamCodec};

/// Kraken public WebSocket endpoint.
pub const KRAKEN_URL: &str = "wss://ws.kraken.com";

const FRAME_LEN: usize = 4;
const OHLC_LEN: usize = 9;

#[derive(Serialize)]
struct SubscribeMsg<'a> {
    event: &'a str,
    pair: Vec<&'a str>,
    subscription: Subscription<'a>,
}

#[derive(Serialize)]
struct Subscription<'a> {
    name: &'a str,
}

/// The nine OHLC entries of one update.
#[derive(Debug, Clone, PartialEq)]
pub struct Ohlc(Vec<Value>);

/// Kraken OHLC codec.
#[derive(Debug, Default, Clone)]
pub struct KrakenCodec;

impl KrakenCodec {
    pub const fn new() -> Self {
        Self
    }
}

impl StreamCodec for KrakenCodec {
    type PriceFrame = Ohlc;

    fn exchange(&self) -> &str {
        "kraken"
    }

    fn url(&self, _tickers: &[Ticker]) -> String {
        KRAKEN_URL.to_string()
    }

    fn subscription(&self, tickers: &[Ticker]) -> Result<Option<String>, CodecError> {
        let subscribe = SubscribeMsg {
            event: "subscribe",
            pair: tickers.iter().map(|t| t.inst_id.as_str()).collect(),
            subscription: Subscription { name: "ohlc" },
        };
        Ok(Some(serde_json::to_string(&subscribe)?))
    }

    fn decode_price(&self, text: &str) -> Option<(InstId, Ohlc)> {
        let Value::Array(mut frame) = serde_json::from_str::<Value>(text).ok()? else {
            return None;
        };
        if frame.len() != FRAME_LEN {
            return None;
        }
        let Value::String(pair) = frame.pop()? else {
            return None;
        };
        match frame.swap_remove(1) {
            Value::Array(ohlc) if ohlc.len() == OHLC_LEN => Some((pair, Ohlc(ohlc))),
            _ => None,
        }
    }

    fn extract_price(&self, frame: &Ohlc, multiplier: f64) -> Result<PriceTime, CodecError> {
        let as_str = |index: usize| {
            frame.0[index]
                .as_str()
                .ok_or_else(|| CodecError::Shape(format!("ohlc entry {index} is not a string")))
        };
        let close = as_str(5)?;
        let price: f64 = close.parse().map_err(|e| CodecError::number(close, e))?;
        let time = wire::unix_decimal(as_str(0)?)?;
        Ok(PriceTime::new(price * multiplier, time))
    }
}
