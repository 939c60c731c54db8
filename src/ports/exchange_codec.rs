//! Exchange Codec Ports - Exchange Wire Format Interfaces
//!
//! Each exchange speaks its own wire protocol. The generic connectors
//! (`StreamingConnector`, `PollingConnector`) own transport, retry and
//! liveness; a codec only knows how to build requests and decode frames.
//!
//! Two flavours:
//! - `StreamCodec`: WebSocket exchanges (Binance, Coinbase, OKX, Kraken)
//! - `PollCodec`: REST price providers (CoinGecko, GeckoTerminal, CoinMarketCap)

use std::collections::HashMap;

use thiserror::Error;

use crate::domain::price::{InstId, PriceTime, Ticker};

/// Errors raised while decoding exchange payloads or building requests.
#[derive(Debug, Error)]
pub enum CodecError {
  /// Payload is not the JSON shape the exchange documents.
  #[error("malformed payload: {0}")]
  Json(#[from] serde_json::Error),

  /// A numeric field could not be parsed.
  #[error("invalid number {value:?}: {reason}")]
  Number { value: String, reason: String },

  /// A timestamp field could not be parsed.
  #[error("invalid timestamp {value:?}: {reason}")]
  Timestamp { value: String, reason: String },

  /// Payload parsed but lacks the fields a price needs.
  #[error("unexpected payload shape: {0}")]
  Shape(String),

  /// Ticker configuration cannot be turned into requests.
  #[error("invalid ticker configuration: {0}")]
  Config(String),
}

impl CodecError {
  pub fn number(value: impl Into<String>, reason: impl ToString) -> Self {
    Self::Number {
      value: value.into(),
      reason: reason.to_string(),
    }
  }

  pub fn timestamp(value: impl Into<String>, reason: impl ToString) -> Self {
    Self::Timestamp {
      value: value.into(),
      reason: reason.to_string(),
    }
  }
}

/// A frame as read off the socket, before any exchange-specific decoding.
#[derive(Debug, Clone, Copy)]
pub enum RawFrame<'a> {
  Text(&'a str),
  Binary(&'a [u8]),
  Ping(&'a [u8]),
  Pong(&'a [u8]),
}

/// Classified frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame<P> {
  /// Price data for one exchange instrument.
  Price { inst_id: InstId, data: P },
  Ping,
  Pong,
  /// Subscription acks, heartbeats and anything else without a price.
  Ignored,
}

/// Wire format of one streaming exchange.
///
/// Implementations are stateless apart from static configuration and
/// are shared between the reader and liveness tasks of a connector.
pub trait StreamCodec: Send + Sync + 'static {
  /// Decoded price frame, kept between classification and extraction.
  type PriceFrame: Send;

  /// Exchange name used in logs and metric labels.
  fn exchange(&self) -> &str;

  /// Endpoint to dial for the given tickers.
  fn url(&self, tickers: &[Ticker]) -> String;

  /// Subscription message sent right after dialing, if the exchange needs one.
  fn subscription(&self, tickers: &[Ticker]) -> Result<Option<String>, CodecError>;

  /// Try to decode a text frame as price data.
  ///
  /// Returns the exchange instrument id with the decoded frame, or `None`
  /// for every other message.
  fn decode_price(&self, text: &str) -> Option<(InstId, Self::PriceFrame)>;

  /// Turn a decoded price frame into a sample, scaled by `multiplier`.
  fn extract_price(
    &self,
    frame: &Self::PriceFrame,
    multiplier: f64,
  ) -> Result<PriceTime, CodecError>;

  /// Ping payload; `None` means the exchange is never pinged.
  fn ping(&self) -> Option<Vec<u8>> {
    None
  }

  /// Pong payload sent back when the server pings.
  fn pong(&self) -> Option<Vec<u8>> {
    None
  }

  /// Ping on every liveness check rather than only after a quiet period.
  fn ping_always(&self) -> bool {
    false
  }

  /// Classify a raw frame. Price data wins over ping/pong detection.
  fn classify(&self, raw: RawFrame<'_>) -> Frame<Self::PriceFrame> {
    match raw {
      RawFrame::Text(text) => {
        if let Some((inst_id, data)) = self.decode_price(text) {
          Frame::Price { inst_id, data }
        } else if text == "pong" {
          Frame::Pong
        } else if text == "ping" {
          Frame::Ping
        } else {
          Frame::Ignored
        }
      }
      RawFrame::Pong(_) => Frame::Pong,
      RawFrame::Ping(_) => Frame::Ping,
      RawFrame::Binary(_) => Frame::Ignored,
    }
  }
}

/// One HTTP GET a polling codec wants performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollRequest {
  /// Full URL without query string.
  pub url: String,
  /// Query parameters in the order they are sent.
  pub query: Vec<(String, String)>,
  /// Request headers.
  pub headers: Vec<(String, String)>,
}

impl PollRequest {
  pub fn get(url: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      query: Vec::new(),
      headers: Vec::new(),
    }
  }

  #[must_use]
  pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
    self.query.push((key.to_string(), value.into()));
    self
  }

  #[must_use]
  pub fn header(mut self, key: &str, value: impl Into<String>) -> Self {
    self.headers.push((key.to_string(), value.into()));
    self
  }
}

/// Wire format of one REST price provider.
pub trait PollCodec: Send + Sync + 'static {
  /// Provider name used in logs and metric labels.
  fn exchange(&self) -> &str;

  /// Requests covering every ticker plus the reference tickers.
  fn build_requests(
    &self,
    tickers: &[Ticker],
    reference: &[Ticker],
  ) -> Result<Vec<PollRequest>, CodecError>;

  /// Raw prices by exchange instrument id.
  fn parse_response(
    &self,
    body: &[u8],
    reference: &[Ticker],
  ) -> Result<HashMap<InstId, PriceTime>, CodecError>;

  /// True if prices are already quoted in the reference currency.
  fn quotes_in_reference(&self) -> bool {
    false
  }
}
