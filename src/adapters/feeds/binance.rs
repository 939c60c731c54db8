//! Binance WebSocket Codec - Combined Kline Streams
//!
//! Reads 1-minute kline (candlestick) streams through Binance's combined
//! stream endpoint. The streams are part of the URL, so no subscription
//! frame is sent. The live close price of the current candle is used as
//! the sample price and the candle close time (clamped to now) as its time.
//!
//! See <https://github.com/binance/binance-spot-api-docs/blob/master/web-socket-streams.md>.

use serde::Deserialize;

use super::wire;
use crate::domain::price::{InstId, PriceTime, Ticker};
use crate::ports::{CodecError, StreamCodec};

/// Combined stream endpoint; stream names are appended joined by `/`.
pub const BINANCE_URL: &str = "wss://stream.binance.com:9443/stream?streams=";

/// Combined stream envelope.
#[derive(Debug, Deserialize)]
struct StreamEnvelope {
    /// Stream name, e.g. "btcusdt@kline_1m".
    stream: String,
    data: KlineEvent,
}

/// Kline event payload.
#[derive(Debug, Deserialize)]
struct KlineEvent {
    k: Option<Kline>,
}

/// The candle fields the oracle uses.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Kline {
    /// Close price (latest trade price while the candle is open).
    #[serde(rename = "c")]
    close: String,
    /// Candle close time (Unix ms).
    #[serde(rename = "T")]
    close_time: i64,
}

/// Binance kline stream codec.
#[derive(Debug, Default, Clone)]
pub struct BinanceCodec;

impl BinanceCodec {
    pub const fn new() -> Self {
        Self
    }
}

impl StreamCodec for BinanceCodec {
    type PriceFrame = Kline;

    fn exchange(&self) -> &str {
        "binance"
    }

    fn url(&self, tickers: &[Ticker]) -> String {
        let streams: Vec<&str> = tickers.iter().map(|t| t.inst_id.as_str()).collect();
        format!("{BINANCE_URL}{}", streams.join("/"))
    }

    fn subscription(&self, _tickers: &[Ticker]) -> Result<Option<String>, CodecError> {
        Ok(None)
    }

    fn decode_price(&self, text: &str) -> Option<(InstId, Kline)> {
        let envelope: StreamEnvelope = serde_json::from_str(text).ok()?;
        let kline = envelope.data.k?;
        Some((envelope.stream, kline))
    }

    fn extract_price(&self, frame: &Kline, multiplier: f64) -> Result<PriceTime, CodecError> {
        let price: f64 = frame
            .close
            .parse()
            .map_err(|e| CodecError::number(frame.close.as_str(), e))?;
        let time = wire::millis_clamped(frame.close_time)?;
        Ok(PriceTime::new(price * multiplier, time))
    }
}
