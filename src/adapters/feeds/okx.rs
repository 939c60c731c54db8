//! OKX WebSocket Codec - Index Candlesticks
//!
//! Subscribes to the `index-candle1m` channel on the OKX business
//! endpoint. Candle rows are `[ts, o, h, l, c, confirm]` with every
//! entry encoded as a string; the close is used as the sample price.
//!
//! See <https://www.okx.com/docs-v5/en/#public-data-websocket-index-candlesticks-channel>.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::wire;
use crate::domain::price::{InstId, PriceTime, Ticker};
use crate::ports::{CodecError, StreamCodec};

/// OKX business WebSocket endpoint (candle channels live here).
pub const OKX_URL: &str = "wss://ws.okx.com:8443/ws/v5/business";

const CANDLE_CHANNEL: &str = "index-candle1m";
const CANDLE_ROW_LEN: usize = 6;

#[derive(Debug, Serialize)]
struct SubscribeMsg<'a> {
    op: &'a str,
    args: Vec<Arg<'a>>,
}

#[derive(Debug, Serialize)]
struct Arg<'a> {
    channel: &'a str,
    #[serde(rename = "instId")]
    inst_id: &'a str,
}

/// Push message. Subscription acks carry `event`, data pushes do not.
#[derive(Debug, Deserialize)]
struct PushMsg {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    arg: Option<PushArg>,
    #[serde(default)]
    data: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct PushArg {
    #[serde(rename = "instId", default)]
    inst_id: String,
}

/// Candle rows of one data push.
#[derive(Debug, Clone, PartialEq)]
pub struct CandlePush {
    rows: Vec<Vec<Value>>,
}

/// OKX index candle codec.
#[derive(Debug, Default, Clone)]
pub struct OkxCodec;

impl OkxCodec {
    pub const fn new() -> Self {
        Self
    }
}

impl StreamCodec for OkxCodec {
    type PriceFrame = CandlePush;

    fn exchange(&self) -> &str {
        "okx"
    }

    fn url(&self, _tickers: &[Ticker]) -> String {
        OKX_URL.to_string()
    }

    fn subscription(&self, tickers: &[Ticker]) -> Result<Option<String>, CodecError> {
        let subscribe = SubscribeMsg {
            op: "subscribe",
            args: tickers
                .iter()
                .map(|t| Arg {
                    channel: CANDLE_CHANNEL,
                    inst_id: &t.inst_id,
                })
                .collect(),
        };
        Ok(Some(serde_json::to_string(&subscribe)?))
    }

    fn decode_price(&self, text: &str) -> Option<(InstId, CandlePush)> {
        let msg: PushMsg = serde_json::from_str(text).ok()?;
        if msg.event.is_some_and(|e| !e.is_empty()) || msg.data.is_empty() {
            return None;
        }
        let arg = msg.arg?;
        Some((arg.inst_id, CandlePush { rows: msg.data }))
    }

    fn extract_price(&self, frame: &CandlePush, multiplier: f64) -> Result<PriceTime, CodecError> {
        let row = frame
            .rows
            .first()
            .ok_or_else(|| CodecError::Shape("no candle rows".to_string()))?;
        if row.len() != CANDLE_ROW_LEN {
            return Err(CodecError::Shape(format!(
                "candle row has {} entries, expected {CANDLE_ROW_LEN}",
                row.len()
            )));
        }
        let price = wire::number(&row[4])?;
        let time = match wire::integer(&row[0]).and_then(wire::millis_clamped) {
            Ok(time) => time,
            Err(e) => {
                warn!(error = %e, "Unparsable OKX candle time, using receipt time");
                Utc::now()
            }
        };
        Ok(PriceTime::new(price * multiplier, time))
    }

    fn ping(&self) -> Option<Vec<u8>> {
        Some(b"ping".to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{Frame, RawFrame};

    const CANDLE_FRAME: &str = r#"{"arg":{"channel":"index-candle1m","instId":"BTC-USDT"},"data":[["1700000000000","36000.1","36050","35990.2","36021.4","0"]]}"#;

    #[test]
    fn test_subscription_lists_every_ticker() {
        let tickers = vec![Ticker::new("okx", "BTC-USDT"), Ticker::new("okx", "ETH-USDT")];
        let sub = OkxCodec.subscription(&tickers).unwrap().unwrap();
        assert_eq!(
            sub,
            r#"{"op":"subscribe","args":[{"channel":"index-candle1m","instId":"BTC-USDT"},{"channel":"index-candle1m","instId":"ETH-USDT"}]}"#
        );
    }

    #[test]
    fn test_classify_candle() {
        match OkxCodec.classify(RawFrame::Text(CANDLE_FRAME)) {
            Frame::Price { inst_id, data } => {
                assert_eq!(inst_id, "BTC-USDT");
                let sample = OkxCodec.extract_price(&data, 1.0).unwrap();
                assert_eq!(sample.price, 36021.4);
                assert_eq!(sample.time.timestamp(), 1_700_000_000);
            }
            other => panic!("expected price frame, got {other:?}"),
        }
    }

    #[test]
    fn test_subscribe_ack_ignored() {
        let ack = r#"{"event":"subscribe","arg":{"channel":"index-candle1m","instId":"BTC-USDT"},"connId":"a4d3ae55"}"#;
        assert_eq!(OkxCodec.classify(RawFrame::Text(ack)), Frame::Ignored);
    }

    #[test]
    fn test_pong_text_classified() {
        assert_eq!(OkxCodec.classify(RawFrame::Text("pong")), Frame::Pong);
    }

    #[test]
    fn test_short_row_is_error() {
        let frame = CandlePush {
            rows: vec![vec![Value::from("1"), Value::from("2")]],
        };
        assert!(matches!(
            OkxCodec.extract_price(&frame, 1.0),
            Err(CodecError::Shape(_))
        ));
    }

    #[test]
    fn test_bad_time_falls_back_to_now() {
        let frame = CandlePush {
            rows: vec![["x", "1", "1", "1", "2.5", "0"].map(Value::from).to_vec()],
        };
        let before = Utc::now();
        let sample = OkxCodec.extract_price(&frame, 10.0).unwrap();
        assert_eq!(sample.price, 25.0);
        assert!(sample.time >= before);
    }
}
