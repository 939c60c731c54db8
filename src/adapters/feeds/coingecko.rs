//! CoinGecko REST Codec - Simple Price Endpoint
//!
//! One request covers every configured coin plus the reference coin.
//! Prices come back in USD and are converted to the reference currency
//! by the polling connector.

use std::collections::HashMap;

use chrono::DateTime;
use serde::Deserialize;

use crate::domain::price::{InstId, PriceTime, Ticker};
use crate::ports::{CodecError, PollCodec, PollRequest};

/// CoinGecko pro API simple price endpoint.
pub const COINGECKO_URL: &str = "https://pro-api.coingecko.com/api/v3/simple/price";

/// Headers shared by the CoinGecko family of APIs.
pub(crate) fn gecko_headers(request: PollRequest, api_key: &str) -> PollRequest {
    request
        .header("x-cg-pro-api-key", api_key)
        .header("accept", "application/json")
        .header("User-Agent", "curl")
}

#[derive(Debug, Deserialize)]
struct CoinQuote {
    usd: f64,
    /// Unix seconds.
    last_updated_at: i64,
}

/// CoinGecko simple price codec.
#[derive(Debug, Clone)]
pub struct CoinGeckoCodec {
    api_key: String,
}

impl CoinGeckoCodec {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }
}

impl PollCodec for CoinGeckoCodec {
    fn exchange(&self) -> &str {
        "coingecko"
    }

    fn build_requests(
        &self,
        tickers: &[Ticker],
        reference: &[Ticker],
    ) -> Result<Vec<PollRequest>, CodecError> {
        let reference = reference
            .first()
            .ok_or_else(|| CodecError::Config("no reference ticker for coingecko".to_string()))?;

        let ids: Vec<&str> = std::iter::once(reference)
            .chain(tickers)
            .map(|t| t.inst_id.as_str())
            .collect();

        let request = PollRequest::get(COINGECKO_URL)
            .query("ids", ids.join(","))
            .query("include_last_updated_at", "true")
            .query("precision", "full")
            .query("vs_currencies", "usd");
        Ok(vec![gecko_headers(request, &self.api_key)])
    }

    fn parse_response(
        &self,
        body: &[u8],
        _reference: &[Ticker],
    ) -> Result<HashMap<InstId, PriceTime>, CodecError> {
        let quotes: HashMap<String, CoinQuote> = serde_json::from_slice(body)?;
        quotes
            .into_iter()
            .map(|(coin_id, quote)| {
                let time = DateTime::from_timestamp(quote.last_updated_at, 0).ok_or_else(|| {
                    CodecError::timestamp(quote.last_updated_at.to_string(), "out of range")
                })?;
                Ok((coin_id, PriceTime::new(quote.usd, time)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_puts_reference_first() {
        let codec = CoinGeckoCodec::new("secret");
        let tickers = vec![
            Ticker::new("coingecko", "bitcoin"),
            Ticker::new("coingecko", "ethereum"),
        ];
        let reference = vec![Ticker::new("coingecko", "tether")];

        let requests = codec.build_requests(&tickers, &reference).unwrap();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.url, COINGECKO_URL);
        assert_eq!(
            request.query[0],
            ("ids".to_string(), "tether,bitcoin,ethereum".to_string())
        );
        assert!(request
            .headers
            .contains(&("x-cg-pro-api-key".to_string(), "secret".to_string())));
    }

    #[test]
    fn test_missing_reference_is_config_error() {
        let codec = CoinGeckoCodec::new("");
        let tickers = vec![Ticker::new("coingecko", "bitcoin")];
        assert!(matches!(
            codec.build_requests(&tickers, &[]),
            Err(CodecError::Config(_))
        ));
    }

    #[test]
    fn test_parse_response() {
        let body = br#"{"bitcoin":{"usd":36012.5,"last_updated_at":1700000000},"tether":{"usd":1.0005,"last_updated_at":1699999990}}"#;
        let prices = CoinGeckoCodec::new("").parse_response(body, &[]).unwrap();
        assert_eq!(prices.len(), 2);
        assert_eq!(prices["bitcoin"].price, 36012.5);
        assert_eq!(prices["tether"].time.timestamp(), 1_699_999_990);
    }

    #[test]
    fn test_error_body_rejected() {
        let body = br#"{"status":{"error_code":429,"error_message":"rate limited"}}"#;
        assert!(CoinGeckoCodec::new("").parse_response(body, &[]).is_err());
    }
}
