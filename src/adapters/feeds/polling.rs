//! Polling Connector - Periodic REST Price Reads
//!
//! Reads every request of a `PollCodec` once per read interval and
//! converts USD prices into the reference coin:
//!
//! `price = raw * multiplier / reference_price`
//!
//! A failed request or a response without a usable reference price
//! (missing or below `MIN_REFERENCE_PRICE`) abandons the whole read until
//! the next tick. Providers quoting in the reference coin already skip
//! the division.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::price_store::PriceStore;
use super::NO_PRICE_DATA;
use crate::adapters::metrics::MetricsRegistry;
use crate::domain::price::{InstId, MarketId, PriceTime, Ticker};
use crate::ports::{PollCodec, PollRequest, SourceMarket, SourceSnapshot};

/// Reference prices below this are treated as broken data.
pub const MIN_REFERENCE_PRICE: f64 = 0.01;

/// Timing of the polling loop.
#[derive(Debug, Clone)]
pub struct PollSettings {
  /// Period between two reads of all requests.
  pub read_interval: Duration,
  /// HTTP client timeout per request.
  pub read_timeout: Duration,
  /// Immediate attempts per request and read.
  pub max_attempts: u32,
}

impl Default for PollSettings {
  fn default() -> Self {
    Self {
      read_interval: Duration::from_secs(60),
      read_timeout: Duration::from_secs(10),
      max_attempts: 8,
    }
  }
}

/// Why a response was discarded.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConvertError {
  #[error("no reference price in response")]
  MissingReference,
  #[error("reference price {0} below minimum")]
  ReferenceTooLow(f64),
}

/// Generic REST price poller driven by a provider codec.
pub struct PollingConnector<C: PollCodec> {
  codec: C,
  client: Client,
  requests: Vec<PollRequest>,
  markets: BTreeMap<MarketId, SourceMarket>,
  markets_by_inst: HashMap<InstId, MarketId>,
  reference: Vec<Ticker>,
  reference_ids: HashSet<InstId>,
  /// Reference ids in configuration order; the first one present in a response wins.
  reference_order: Vec<InstId>,
  store: Arc<PriceStore>,
  metrics: Arc<MetricsRegistry>,
  settings: PollSettings,
}

impl<C: PollCodec> PollingConnector<C> {
  pub fn new(
    codec: C,
    markets: BTreeMap<MarketId, SourceMarket>,
    reference: &[Ticker],
    metrics: Arc<MetricsRegistry>,
    settings: PollSettings,
  ) -> Result<Self> {
    let tickers: Vec<Ticker> = markets.values().map(|m| m.ticker.clone()).collect();
    let requests = codec
      .build_requests(&tickers, reference)
      .with_context(|| format!("Failed to build {} requests", codec.exchange()))?;

    let client = Client::builder()
      .timeout(settings.read_timeout)
      .build()
      .context("Failed to build HTTP client")?;

    let markets_by_inst = markets
      .iter()
      .map(|(market, m)| (m.ticker.inst_id.clone(), market.clone()))
      .collect();
    let reference_order: Vec<InstId> = reference.iter().map(|t| t.inst_id.clone()).collect();
    let store = Arc::new(PriceStore::new(codec.exchange()));

    Ok(Self {
      codec,
      client,
      requests,
      markets,
      markets_by_inst,
      reference: reference.to_vec(),
      reference_ids: reference_order.iter().cloned().collect(),
      reference_order,
      store,
      metrics,
      settings,
    })
  }

  pub fn store(&self) -> Arc<PriceStore> {
    Arc::clone(&self.store)
  }

  pub fn snapshot(&self) -> SourceSnapshot {
    SourceSnapshot {
      markets: self.markets.keys().cloned().collect(),
      prices: self.store(),
      urls: self.requests.iter().map(|r| r.url.clone()).collect(),
    }
  }

  pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(self.run(cancel))
  }

  /// Read on every interval tick until cancelled.
  ///
  /// A read still in flight when `cancel` fires is abandoned.
  #[instrument(skip(self, cancel), fields(exchange = %self.codec.exchange()))]
  pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
    let started_at = Utc::now();
    let mut last_data: HashMap<MarketId, DateTime<Utc>> = HashMap::new();
    let mut ticker = interval_at(
      Instant::now() + self.settings.read_interval,
      self.settings.read_interval,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(requests = self.requests.len(), "Polling connector started");
    loop {
      tokio::select! {
        biased;
        () = cancel.cancelled() => break,
        _ = ticker.tick() => {
          tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = self.read_all(&mut last_data) => {}
          }
          self.check_data_age(started_at, &last_data, Utc::now());
        }
      }
    }
    info!("Polling connector stopped");
  }

  /// One read of every request.
  ///
  /// The first failing request abandons the rest of the read, as does a
  /// response without a usable reference price.
  pub async fn read_all(&self, last_data: &mut HashMap<MarketId, DateTime<Utc>>) {
    for request in &self.requests {
      let raw = match self.fetch(request).await.and_then(|body| {
        self
          .codec
          .parse_response(&body, &self.reference)
          .map_err(anyhow::Error::from)
      }) {
        Ok(raw) => raw,
        Err(e) => {
          warn!(url = %request.url, error = %e, "REST read failed");
          self
            .metrics
            .rest_read_failures
            .with_label_values(&[self.codec.exchange()])
            .inc();
          return;
        }
      };

      let samples = match self.convert(&raw) {
        Ok(samples) => samples,
        Err(e) => {
          warn!(url = %request.url, error = %e, "Discarding REST response");
          return;
        }
      };

      for (market_id, sample) in samples {
        if self.store.store(&market_id, sample) {
          self
            .metrics
            .samples_stored
            .with_label_values(&[self.codec.exchange()])
            .inc();
          last_data.insert(market_id, sample.time);
        }
      }
    }
  }

  /// Convert raw provider prices into reference-coin samples per market.
  ///
  /// Reference tickers are never stored as markets.
  pub fn convert(
    &self,
    raw: &HashMap<InstId, PriceTime>,
  ) -> Result<Vec<(MarketId, PriceTime)>, ConvertError> {
    let divisor = if self.codec.quotes_in_reference() {
      1.0
    } else {
      let reference = self
        .reference_order
        .iter()
        .find_map(|id| raw.get(id))
        .ok_or(ConvertError::MissingReference)?;
      if reference.price < MIN_REFERENCE_PRICE {
        return Err(ConvertError::ReferenceTooLow(reference.price));
      }
      reference.price
    };

    let samples = raw
      .iter()
      .filter(|(inst_id, _)| !self.reference_ids.contains(*inst_id))
      .filter_map(|(inst_id, sample)| {
        let market_id = self.markets_by_inst.get(inst_id)?;
        let multiplier = self.markets.get(market_id).map_or(1.0, |m| m.multiplier);
        Some((market_id.clone(), sample.scaled(multiplier / divisor)))
      })
      .collect();
    Ok(samples)
  }

  /// Warn about markets without data for 3x their max use age.
  ///
  /// Returns the markets warned about.
  pub fn check_data_age(
    &self,
    started_at: DateTime<Utc>,
    last_data: &HashMap<MarketId, DateTime<Utc>>,
    now: DateTime<Utc>,
  ) -> Vec<MarketId> {
    let mut silent = Vec::new();
    for (market_id, market) in &self.markets {
      let since = last_data.get(market_id).copied().unwrap_or(started_at);
      let elapsed = (now - since).to_std().unwrap_or(Duration::ZERO);
      if elapsed > market.max_use_age * 3 {
        warn!(
          market_id = %market_id,
          elapsed_secs = elapsed.as_secs(),
          "{NO_PRICE_DATA} received"
        );
        silent.push(market_id.clone());
      }
    }
    silent
  }

  /// GET with up to `max_attempts` immediate attempts.
  async fn fetch(&self, request: &PollRequest) -> Result<Vec<u8>> {
    let mut last_error = None;

    for attempt in 1..=self.settings.max_attempts {
      let mut req = self.client.get(&request.url).query(&request.query);
      for (name, value) in &request.headers {
        req = req.header(name.as_str(), value.as_str());
      }

      match req.send().await {
        Ok(response) => match response.status() {
          StatusCode::OK => {
            let body = response.bytes().await.context("Failed to read body")?;
            return Ok(body.to_vec());
          }
          status => {
            debug!(attempt, status = %status, "Unexpected status, retrying");
            last_error = Some(anyhow::anyhow!("HTTP status {status}"));
          }
        },
        Err(e) => {
          debug!(attempt, error = %e, "Request failed");
          last_error = Some(e.into());
        }
      }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("No attempts configured")))
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use axum::extract::{Query, State};
  use axum::http::HeaderMap;
  use axum::routing::get;
  use axum::Router;

  use super::*;
  use crate::ports::CodecError;

  struct UsdCodec {
    in_reference: bool,
    urls: Vec<String>,
  }

  impl PollCodec for UsdCodec {
    fn exchange(&self) -> &str {
      "usd"
    }

    fn build_requests(
      &self,
      tickers: &[Ticker],
      reference: &[Ticker],
    ) -> Result<Vec<PollRequest>, CodecError> {
      let ids: Vec<&str> = reference
        .iter()
        .chain(tickers)
        .map(|t| t.inst_id.as_str())
        .collect();
      Ok(
        self
          .urls
          .iter()
          .map(|url| {
            PollRequest::get(url.as_str())
              .query("ids", ids.join(","))
              .header("x-api-key", "secret")
          })
          .collect(),
      )
    }

    fn parse_response(
      &self,
      body: &[u8],
      _reference: &[Ticker],
    ) -> Result<HashMap<InstId, PriceTime>, CodecError> {
      let prices: HashMap<InstId, f64> =
        serde_json::from_slice(body).map_err(|e| CodecError::number("body", e))?;
      Ok(
        prices
          .into_iter()
          .map(|(id, price)| (id, PriceTime::now(price)))
          .collect(),
      )
    }

    fn quotes_in_reference(&self) -> bool {
      self.in_reference
    }
  }

  fn connector_with(
    in_reference: bool,
    urls: Vec<String>,
    settings: PollSettings,
  ) -> PollingConnector<UsdCodec> {
    let mut markets = BTreeMap::new();
    markets.insert(
      "BTC-USDT".to_string(),
      SourceMarket {
        ticker: Ticker::new("usd", "bitcoin"),
        multiplier: 1.0,
        max_use_age: Duration::from_secs(60),
      },
    );
    markets.insert(
      "PEPE-USDT".to_string(),
      SourceMarket {
        ticker: Ticker::new("usd", "pepe"),
        multiplier: 1000.0,
        max_use_age: Duration::from_secs(60),
      },
    );
    PollingConnector::new(
      UsdCodec { in_reference, urls },
      markets,
      &[Ticker::new("usd", "tether")],
      Arc::new(MetricsRegistry::new().unwrap()),
      settings,
    )
    .unwrap()
  }

  fn connector(in_reference: bool) -> PollingConnector<UsdCodec> {
    connector_with(
      in_reference,
      vec!["http://127.0.0.1:9/prices".to_string()],
      PollSettings::default(),
    )
  }

  /// Local price endpoint answering 500 until `fail_first` requests were seen.
  #[derive(Default)]
  struct StubEndpoint {
    hits: AtomicUsize,
    fail_first: usize,
    body: String,
    seen: std::sync::Mutex<Vec<(Option<String>, Option<String>)>>,
  }

  async fn stub_prices(
    State(stub): State<Arc<StubEndpoint>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
  ) -> (axum::http::StatusCode, String) {
    let hit = stub.hits.fetch_add(1, Ordering::SeqCst) + 1;
    stub.seen.lock().unwrap().push((
      query.get("ids").cloned(),
      headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string),
    ));
    if hit <= stub.fail_first {
      (axum::http::StatusCode::INTERNAL_SERVER_ERROR, String::new())
    } else {
      (axum::http::StatusCode::OK, stub.body.clone())
    }
  }

  async fn serve_stub(stub: Arc<StubEndpoint>) -> String {
    let app = Router::new()
      .route("/prices", get(stub_prices))
      .with_state(stub);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/prices")
  }

  fn three_attempts() -> PollSettings {
    PollSettings {
      read_interval: Duration::from_secs(60),
      read_timeout: Duration::from_secs(5),
      max_attempts: 3,
    }
  }

  fn raw(entries: &[(&str, f64)]) -> HashMap<InstId, PriceTime> {
    entries
      .iter()
      .map(|(id, price)| (id.to_string(), PriceTime::now(*price)))
      .collect()
  }

  fn price_of(samples: &[(MarketId, PriceTime)], market: &str) -> f64 {
    samples
      .iter()
      .find(|(m, _)| m == market)
      .map(|(_, s)| s.price)
      .unwrap()
  }

  #[test]
  fn test_convert_divides_by_reference() {
    let connector = connector(false);
    let samples = connector
      .convert(&raw(&[("tether", 0.5), ("bitcoin", 36000.0), ("pepe", 0.000001)]))
      .unwrap();

    assert_eq!(samples.len(), 2);
    assert!((price_of(&samples, "BTC-USDT") - 72000.0).abs() < 1e-9);
    assert!((price_of(&samples, "PEPE-USDT") - 0.002).abs() < 1e-12);
  }

  #[test]
  fn test_convert_requires_reference() {
    let connector = connector(false);
    assert_eq!(
      connector.convert(&raw(&[("bitcoin", 36000.0)])),
      Err(ConvertError::MissingReference)
    );
  }

  #[test]
  fn test_convert_rejects_tiny_reference() {
    let connector = connector(false);
    assert_eq!(
      connector.convert(&raw(&[("tether", 0.009), ("bitcoin", 36000.0)])),
      Err(ConvertError::ReferenceTooLow(0.009))
    );
  }

  #[test]
  fn test_convert_without_division() {
    let connector = connector(true);
    let samples = connector.convert(&raw(&[("bitcoin", 36000.0)])).unwrap();
    assert_eq!(price_of(&samples, "BTC-USDT"), 36000.0);
  }

  #[test]
  fn test_unknown_ids_skipped() {
    let connector = connector(false);
    let samples = connector
      .convert(&raw(&[("tether", 1.0), ("dogecoin", 0.1)]))
      .unwrap();
    assert!(samples.is_empty());
  }

  #[test]
  fn test_check_data_age() {
    let connector = connector(false);
    let now = Utc::now();
    let started_at = now - chrono::Duration::seconds(200);

    let mut last_data = HashMap::new();
    last_data.insert("BTC-USDT".to_string(), now - chrono::Duration::seconds(10));

    // PEPE never received data since start, 200s > 3 * 60s
    assert_eq!(
      connector.check_data_age(started_at, &last_data, now),
      vec!["PEPE-USDT".to_string()]
    );
  }

  #[test]
  fn test_snapshot_urls() {
    let connector = connector(false);
    let snapshot = connector.snapshot();
    assert_eq!(snapshot.urls, vec!["http://127.0.0.1:9/prices".to_string()]);
    assert_eq!(snapshot.markets.len(), 2);
  }

  #[tokio::test]
  async fn test_read_retries_until_success() {
    let stub = Arc::new(StubEndpoint {
      fail_first: 2,
      body: r#"{"tether": 0.5, "bitcoin": 36000.0}"#.to_string(),
      ..StubEndpoint::default()
    });
    let url = serve_stub(Arc::clone(&stub)).await;
    let connector = connector_with(false, vec![url], three_attempts());

    let mut last_data = HashMap::new();
    connector.read_all(&mut last_data).await;

    assert_eq!(stub.hits.load(Ordering::SeqCst), 3);
    let stored = connector.store().load("BTC-USDT").unwrap();
    assert!((stored.price - 72000.0).abs() < 1e-9);
    assert!(last_data.contains_key("BTC-USDT"));
    assert!(connector.store().load("PEPE-USDT").is_none());

    // ids: reference first, then the configured markets
    let seen = stub.seen.lock().unwrap().clone();
    assert_eq!(
      seen[0],
      (
        Some("tether,bitcoin,pepe".to_string()),
        Some("secret".to_string())
      )
    );
  }

  #[tokio::test]
  async fn test_read_abandoned_after_max_attempts() {
    let stub = Arc::new(StubEndpoint {
      fail_first: usize::MAX,
      ..StubEndpoint::default()
    });
    let url = serve_stub(Arc::clone(&stub)).await;
    let connector = connector_with(false, vec![url.clone(), url], three_attempts());

    let mut last_data = HashMap::new();
    connector.read_all(&mut last_data).await;

    // second request never attempted
    assert_eq!(stub.hits.load(Ordering::SeqCst), 3);
    assert!(connector.store().load("BTC-USDT").is_none());
    assert!(last_data.is_empty());
    assert_eq!(
      connector
        .metrics
        .rest_read_failures
        .with_label_values(&["usd"])
        .get(),
      1
    );
  }

  #[tokio::test]
  async fn test_missing_reference_abandons_read() {
    let stub = Arc::new(StubEndpoint {
      body: r#"{"bitcoin": 36000.0}"#.to_string(),
      ..StubEndpoint::default()
    });
    let url = serve_stub(Arc::clone(&stub)).await;
    let connector = connector_with(false, vec![url.clone(), url], three_attempts());

    let mut last_data = HashMap::new();
    connector.read_all(&mut last_data).await;

    assert_eq!(stub.hits.load(Ordering::SeqCst), 1);
    assert!(connector.store().load("BTC-USDT").is_none());
  }

  #[tokio::test]
  async fn test_unchanged_price_keeps_last_data() {
    let stub = Arc::new(StubEndpoint {
      body: r#"{"tether": 1.0, "bitcoin": 36000.0}"#.to_string(),
      ..StubEndpoint::default()
    });
    let url = serve_stub(Arc::clone(&stub)).await;
    let connector = connector_with(false, vec![url], three_attempts());

    let mut last_data = HashMap::new();
    connector.read_all(&mut last_data).await;
    let first = last_data["BTC-USDT"];

    tokio::time::sleep(Duration::from_millis(20)).await;
    connector.read_all(&mut last_data).await;

    assert_eq!(stub.hits.load(Ordering::SeqCst), 2);
    assert_eq!(last_data["BTC-USDT"], first);
  }

  #[tokio::test]
  async fn test_cancel_interrupts_hanging_read() {
    // accepts connections and never answers
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      let mut held = Vec::new();
      while let Ok((socket, _)) = listener.accept().await {
        held.push(socket);
      }
    });

    let connector = Arc::new(connector_with(
      false,
      vec![format!("http://{addr}/prices")],
      PollSettings {
        read_interval: Duration::from_millis(50),
        read_timeout: Duration::from_secs(30),
        max_attempts: 8,
      },
    ));
    let cancel = CancellationToken::new();
    let handle = connector.start(cancel.clone());

    tokio::time::sleep(Duration::from_millis(300)).await;
    cancel.cancel();

    let stopped = tokio::time::timeout(Duration::from_secs(2), handle).await;
    assert!(matches!(stopped, Ok(Ok(()))));
  }
}
