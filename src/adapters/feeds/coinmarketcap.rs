//! CoinMarketCap REST Codec - Latest Quotes
//!
//! Coins are requested by numeric CMC id and converted server-side into
//! the reference coin (`convert_id`), so the polling connector skips its
//! own reference division for this provider.

use std::collections::HashMap;

use serde::Deserialize;

use super::wire;
use crate::domain::price::{InstId, PriceTime, Ticker};
use crate::ports::{CodecError, PollCodec, PollRequest};

/// CoinMarketCap pro API latest quotes endpoint.
pub const COINMARKETCAP_URL: &str =
    "https://pro-api.coinmarketcap.com/v2/cryptocurrency/quotes/latest";

#[derive(Debug, Deserialize)]
struct QuotesResponse {
    data: HashMap<String, Currency>,
}

#[derive(Debug, Deserialize)]
struct Currency {
    quote: HashMap<String, Quote>,
}

#[derive(Debug, Deserialize)]
struct Quote {
    price: f64,
    last_updated: String,
}

/// CoinMarketCap latest quotes codec.
#[derive(Debug, Clone)]
pub struct CoinMarketCapCodec {
    api_key: String,
}

impl CoinMarketCapCodec {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }
}

fn reference_id(reference: &[Ticker]) -> Result<&str, CodecError> {
    reference
        .first()
        .map(|r| r.inst_id.as_str())
        .ok_or_else(|| CodecError::Config("no reference ticker for coinmarketcap".to_string()))
}

impl PollCodec for CoinMarketCapCodec {
    fn exchange(&self) -> &str {
        "coinmarketcap"
    }

    fn build_requests(
        &self,
        tickers: &[Ticker],
        reference: &[Ticker],
    ) -> Result<Vec<PollRequest>, CodecError> {
        let ids: Vec<&str> = tickers.iter().map(|t| t.inst_id.as_str()).collect();
        let request = PollRequest::get(COINMARKETCAP_URL)
            .query("id", ids.join(","))
            .query("convert_id", reference_id(reference)?)
            .header("Accepts", "application/json")
            .header("X-CMC_PRO_API_KEY", self.api_key.as_str());
        Ok(vec![request])
    }

    fn parse_response(
        &self,
        body: &[u8],
        reference: &[Ticker],
    ) -> Result<HashMap<InstId, PriceTime>, CodecError> {
        let convert_id = reference_id(reference)?;
        let response: QuotesResponse = serde_json::from_slice(body)?;
        response
            .data
            .into_iter()
            .map(|(coin_id, currency)| {
                let quote = currency.quote.get(convert_id).ok_or_else(|| {
                    CodecError::Shape(format!("no quote in {convert_id} for coin {coin_id}"))
                })?;
                let time = wire::rfc3339(&quote.last_updated)?;
                Ok((coin_id, PriceTime::new(quote.price, time)))
            })
            .collect()
    }

    fn quotes_in_reference(&self) -> bool {
        true
    }
}
