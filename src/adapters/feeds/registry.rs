//! Source Registry - Exchange Id to Connector Builder
//!
//! Populated once at startup with one builder per supported exchange id.
//! Starting a source builds the exchange codec, wraps it in the matching
//! generic connector and spawns the connector tasks.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::binance::BinanceCodec;
use super::coinbase::CoinbaseCodec;
use super::coingecko::CoinGeckoCodec;
use super::coinmarketcap::CoinMarketCapCodec;
use super::geckoterminal::GeckoTerminalCodec;
use super::kraken::KrakenCodec;
use super::okx::OkxCodec;
use super::polling::{PollSettings, PollingConnector};
use super::streaming::{StreamSettings, StreamingConnector};
use crate::adapters::metrics::MetricsRegistry;
use crate::ports::{PollCodec, SourceBuilder, SourceSnapshot, SourceSpec, StreamCodec};

/// Starts one exchange source.
type BuildFn = fn(&SourceRegistry, SourceSpec, &CancellationToken) -> Result<SourceSnapshot>;

/// Explicit exchange id to builder table.
pub struct SourceRegistry {
    builders: HashMap<&'static str, BuildFn>,
    metrics: Arc<MetricsRegistry>,
    stream_settings: StreamSettings,
}

impl SourceRegistry {
    /// Registry with every supported exchange.
    pub fn new(metrics: Arc<MetricsRegistry>) -> Self {
        let mut registry = Self {
            builders: HashMap::new(),
            metrics,
            stream_settings: StreamSettings::default(),
        };

        registry.register("binance", |r, spec, cancel| {
            r.start_streaming(BinanceCodec::new(), spec, cancel)
        });
        registry.register("cb", |r, spec, cancel| {
            let codec = CoinbaseCodec::new(spec.exchange_id.as_str());
            r.start_streaming(codec, spec, cancel)
        });
        registry.register("cb2", |r, spec, cancel| {
            let codec = CoinbaseCodec::new(spec.exchange_id.as_str());
            r.start_streaming(codec, spec, cancel)
        });
        registry.register("okx", |r, spec, cancel| {
            r.start_streaming(OkxCodec::new(), spec, cancel)
        });
        registry.register("kraken", |r, spec, cancel| {
            r.start_streaming(KrakenCodec::new(), spec, cancel)
        });
        registry.register("coingecko", |r, spec, cancel| {
            let codec = CoinGeckoCodec::new(spec.api_key.as_str());
            r.start_polling(codec, spec, cancel)
        });
        registry.register("geckoterminal", |r, spec, cancel| {
            let codec = GeckoTerminalCodec::new(spec.api_key.as_str());
            r.start_polling(codec, spec, cancel)
        });
        registry.register("coinmarketcap", |r, spec, cancel| {
            let codec = CoinMarketCapCodec::new(spec.api_key.as_str());
            r.start_polling(codec, spec, cancel)
        });

        registry
    }

    /// Override connection timing for every streaming source.
    #[must_use]
    pub fn with_stream_settings(mut self, settings: StreamSettings) -> Self {
        self.stream_settings = settings;
        self
    }

    pub fn register(&mut self, exchange_id: &'static str, build: BuildFn) {
        self.builders.insert(exchange_id, build);
    }

    pub fn supports(&self, exchange_id: &str) -> bool {
        self.builders.contains_key(exchange_id)
    }

    fn start_streaming<C: StreamCodec>(
        &self,
        codec: C,
        spec: SourceSpec,
        cancel: &CancellationToken,
    ) -> Result<SourceSnapshot> {
        let connector = StreamingConnector::new(
            codec,
            spec.markets,
            Arc::clone(&self.metrics),
            self.stream_settings.clone(),
        )
        .with_context(|| format!("Invalid {} configuration", spec.exchange_id))?;
        let connector = Arc::new(connector);

        let snapshot = connector.snapshot();
        info!(exchange = %spec.exchange_id, url = %connector.url(), "Starting streaming source");
        connector.start(cancel.clone());
        Ok(snapshot)
    }

    fn start_polling<C: PollCodec>(
        &self,
        codec: C,
        spec: SourceSpec,
        cancel: &CancellationToken,
    ) -> Result<SourceSnapshot> {
        let settings = PollSettings {
            read_interval: spec.read_interval,
            read_timeout: spec.read_timeout,
            ..PollSettings::default()
        };
        let connector = PollingConnector::new(
            codec,
            spec.markets,
            &spec.reference,
            Arc::clone(&self.metrics),
            settings,
        )?;
        let connector = Arc::new(connector);

        let snapshot = connector.snapshot();
        info!(exchange = %spec.exchange_id, urls = ?snapshot.urls, "Starting polling source");
        connector.start(cancel.clone());
        Ok(snapshot)
    }
}

impl SourceBuilder for SourceRegistry {
    fn start_source(
        &self,
        spec: SourceSpec,
        cancel: &CancellationToken,
    ) -> Result<Option<SourceSnapshot>> {
        let Some(build) = self.builders.get(spec.exchange_id.as_str()) else {
            warn!(exchange = %spec.exchange_id, "Unknown exchange, skipping");
            return Ok(None);
        };
        build(self, spec, cancel).map(Some)
    }
}
