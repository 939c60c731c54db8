//! GeckoTerminal REST Codec - On-chain Token Prices
//!
//! Tokens are addressed by contract address per network, so one request
//! is built per network. Every network needs its own reference token
//! (e.g. USDT on that chain); the response carries no timestamps, so
//! samples are stamped at receipt.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use serde::Deserialize;

use super::coingecko::gecko_headers;
use crate::domain::price::{InstId, PriceTime, Ticker};
use crate::ports::{CodecError, PollCodec, PollRequest};

/// GeckoTerminal networks API root.
pub const GECKOTERMINAL_URL: &str = "https://api.geckoterminal.com/api/v2/networks";

#[derive(Debug, Deserialize)]
struct MultiTokenResponse {
    data: Vec<TokenItem>,
}

#[derive(Debug, Deserialize)]
struct TokenItem {
    attributes: TokenAttributes,
}

#[derive(Debug, Deserialize)]
struct TokenAttributes {
    address: String,
    price_usd: String,
}

/// GeckoTerminal multi-token codec.
#[derive(Debug, Clone)]
pub struct GeckoTerminalCodec {
    api_key: String,
}

impl GeckoTerminalCodec {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }
}

impl PollCodec for GeckoTerminalCodec {
    fn exchange(&self) -> &str {
        "geckoterminal"
    }

    fn build_requests(
        &self,
        tickers: &[Ticker],
        reference: &[Ticker],
    ) -> Result<Vec<PollRequest>, CodecError> {
        let mut by_network: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for ticker in tickers {
            by_network
                .entry(ticker.network.as_str())
                .or_default()
                .push(ticker.inst_id.as_str());
        }

        by_network
            .into_iter()
            .map(|(network, mut addresses)| {
                let reference = reference
                    .iter()
                    .find(|r| r.network == network)
                    .ok_or_else(|| {
                        CodecError::Config(format!(
                            "geckoterminal has no reference ticker for network {network:?}"
                        ))
                    })?;
                addresses.push(&reference.inst_id);
                let url = format!(
                    "{GECKOTERMINAL_URL}/{network}/tokens/multi/{}",
                    addresses.join(",")
                );
                Ok(gecko_headers(PollRequest::get(url), &self.api_key))
            })
            .collect()
    }

    fn parse_response(
        &self,
        body: &[u8],
        _reference: &[Ticker],
    ) -> Result<HashMap<InstId, PriceTime>, CodecError> {
        let response: MultiTokenResponse = serde_json::from_slice(body)?;
        let now = Utc::now();
        response
            .data
            .into_iter()
            .map(|item| {
                let TokenAttributes { address, price_usd } = item.attributes;
                let price: f64 = price_usd
                    .parse()
                    .map_err(|e| CodecError::number(price_usd.as_str(), e))?;
                Ok((address, PriceTime::new(price, now)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USDT_ETH: &str = "0xdac17f958d2ee523a2206206994597c13d831ec7";
    const LDO_ETH: &str = "0x5a98fcbea516cf06857215779fd812ca3bef1b32";
    const USDT_ARB: &str = "0xfd086bc7cd5c481dcc9c85ebe478a1c0b69fcbb9";
    const ARB_ARB: &str = "0x912ce59144191c1204e64559fe8253a0e49e6548";

    #[test]
    fn test_one_request_per_network() {
        let codec = GeckoTerminalCodec::new("key");
        let tickers = vec![
            Ticker::on_network("geckoterminal", LDO_ETH, "eth"),
            Ticker::on_network("geckoterminal", ARB_ARB, "arbitrum"),
        ];
        let reference = vec![
            Ticker::on_network("geckoterminal", USDT_ETH, "eth"),
            Ticker::on_network("geckoterminal", USDT_ARB, "arbitrum"),
        ];

        let requests = codec.build_requests(&tickers, &reference).unwrap();
        let urls: Vec<&str> = requests.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                format!("{GECKOTERMINAL_URL}/arbitrum/tokens/multi/{ARB_ARB},{USDT_ARB}"),
                format!("{GECKOTERMINAL_URL}/eth/tokens/multi/{LDO_ETH},{USDT_ETH}"),
            ]
        );
    }

    #[test]
    fn test_network_without_reference_is_config_error() {
        let codec = GeckoTerminalCodec::new("key");
        let tickers = vec![Ticker::on_network("geckoterminal", ARB_ARB, "arbitrum")];
        let reference = vec![Ticker::on_network("geckoterminal", USDT_ETH, "eth")];
        assert!(matches!(
            codec.build_requests(&tickers, &reference),
            Err(CodecError::Config(_))
        ));
    }

    #[test]
    fn test_parse_response() {
        let body = format!(
            r#"{{"data":[{{"id":"eth_{LDO_ETH}","type":"token","attributes":{{"address":"{LDO_ETH}","name":"Lido DAO","symbol":"LDO","price_usd":"2.1534","volume_usd":{{"h24":"100"}}}}}},{{"id":"eth_{USDT_ETH}","type":"token","attributes":{{"address":"{USDT_ETH}","price_usd":"0.9998"}}}}]}}"#
        );
        let prices = GeckoTerminalCodec::new("")
            .parse_response(body.as_bytes(), &[])
            .unwrap();
        assert_eq!(prices[LDO_ETH].price, 2.1534);
        assert_eq!(prices[USDT_ETH].price, 0.9998);
    }

    #[test]
    fn test_unparsable_price_rejects_response() {
        let body = br#"{"data":[{"attributes":{"address":"0x1","price_usd":null}}]}"#;
        assert!(GeckoTerminalCodec::new("").parse_response(body, &[]).is_err());
    }
}
