//! Streaming Connector - Resilient WebSocket Session per Exchange
//!
//! One connector maintains one WebSocket session covering every ticker
//! of an exchange. It runs two tasks:
//! - Reader: reads frames with an I/O deadline, classifies them with the
//!   exchange codec and stores prices. Any read failure triggers a reconnect.
//! - Liveness checker: every ping interval, forces a reconnect when a market
//!   has been silent for 3x its max use age or the server stopped answering
//!   pings, and sends pings when the codec wants them.
//!
//! Reconnects are serialized: entering the connecting state is rejected
//! while another reconnect runs or less than the minimum reconnect interval
//! after the previous one started.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::backoff::DialBackoff;
use super::price_store::PriceStore;
use super::NO_PRICE_DATA;
use crate::adapters::metrics::MetricsRegistry;
use crate::domain::price::{InstId, MarketId, Ticker};
use crate::ports::{CodecError, Frame, RawFrame, SourceMarket, SourceSnapshot, StreamCodec};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// Reconnect reasons, used in logs and as metric labels.
pub const INITIAL_CONNECTION: &str = "initial connection";
pub const PING_TIMEOUT: &str = "ping timeout";
pub const DATA_TIMEOUT: &str = "data timeout";
pub const WS_WRITE_ERROR: &str = "web socket write error";
pub const WS_READ_ERROR: &str = "web socket read error";

/// Timing of the connection state machine.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Deadline for every socket read and write.
    pub io_timeout: Duration,
    /// Liveness check period, also the ping interval.
    pub ping_interval: Duration,
    /// Minimum time between the starts of two reconnects.
    pub min_reconnect_interval: Duration,
    /// Dials per reconnect before giving up until the next trigger.
    pub max_dial_attempts: u32,
    /// Delay after the first failed dial, doubled after each further failure.
    pub initial_backoff: Duration,
    /// Deadline for the WebSocket handshake.
    pub dial_timeout: Duration,
    /// Reader pause after a rejected reconnect.
    pub rejected_reconnect_pause: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            io_timeout: Duration::from_secs(60),
            ping_interval: Duration::from_secs(25),
            min_reconnect_interval: Duration::from_secs(20),
            max_dial_attempts: 10,
            initial_backoff: Duration::from_secs(1),
            dial_timeout: Duration::from_secs(20),
            rejected_reconnect_pause: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug)]
struct Session {
    state: SessionState,
    /// When the current session was established.
    connected_at: DateTime<Utc>,
    /// When the last reconnect started, `None` before the first one.
    last_connect_started: Option<Instant>,
}

/// Outcome of one reader step.
enum ReadEvent {
    Message(Message),
    Failed(String),
}

/// Generic reconnecting WebSocket client driven by an exchange codec.
pub struct StreamingConnector<C: StreamCodec> {
    codec: C,
    url: String,
    /// Subscription sent after every successful dial.
    subscription: Option<String>,
    markets: BTreeMap<MarketId, SourceMarket>,
    markets_by_inst: HashMap<InstId, MarketId>,
    store: Arc<PriceStore>,
    metrics: Arc<MetricsRegistry>,
    settings: StreamSettings,
    /// Lifecycle state; write-locked for transitions, read-locked around socket writes.
    session: RwLock<Session>,
    writer: Mutex<Option<WsWriter>>,
    /// Read half of a freshly established session, picked up by the reader.
    incoming: Mutex<Option<WsReader>>,
    /// Wakes the reader when a new session is installed.
    session_changed: Notify,
    last_pong: Mutex<Option<DateTime<Utc>>>,
}

impl<C: StreamCodec> StreamingConnector<C> {
    /// Build a connector for `markets`; nothing is dialed until [`run`](Self::run).
    pub fn new(
        codec: C,
        markets: BTreeMap<MarketId, SourceMarket>,
        metrics: Arc<MetricsRegistry>,
        settings: StreamSettings,
    ) -> Result<Self, CodecError> {
        let tickers: Vec<Ticker> = markets.values().map(|m| m.ticker.clone()).collect();
        let url = codec.url(&tickers);
        let subscription = codec.subscription(&tickers)?;
        let markets_by_inst = markets
            .iter()
            .map(|(market, m)| (m.ticker.inst_id.clone(), market.clone()))
            .collect();
        let store = Arc::new(PriceStore::new(codec.exchange()));

        Ok(Self {
            codec,
            url,
            subscription,
            markets,
            markets_by_inst,
            store,
            metrics,
            settings,
            session: RwLock::new(Session {
                state: SessionState::Disconnected,
                connected_at: Utc::now(),
                last_connect_started: None,
            }),
            writer: Mutex::new(None),
            incoming: Mutex::new(None),
            session_changed: Notify::new(),
            last_pong: Mutex::new(None),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn store(&self) -> Arc<PriceStore> {
        Arc::clone(&self.store)
    }

    /// Snapshot handed to the aggregator.
    pub fn snapshot(&self) -> SourceSnapshot {
        SourceSnapshot {
            markets: self.markets.keys().cloned().collect::<HashSet<_>>(),
            prices: self.store(),
            urls: vec![self.url.clone()],
        }
    }

    /// Spawn the connector tasks.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Connect, then run the reader and liveness checker until cancelled.
    #[instrument(skip(self, cancel), fields(exchange = %self.codec.exchange()))]
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        self.reconnect(INITIAL_CONNECTION, &cancel).await;

        let checker = {
            let this = Arc::clone(&self);
            let cancel = cancel.clone();
            tokio::spawn(async move { this.liveness_loop(&cancel).await })
        };

        self.read_loop(&cancel).await;

        if let Err(e) = checker.await {
            warn!(error = %e, "Liveness checker task failed");
        }
        self.close_writer().await;
        info!(url = %self.url, "Streaming connector stopped");
    }

    // ────────────────────────────────────────────
    // Connection lifecycle
    // ────────────────────────────────────────────

    /// Start a reconnect unless one is running or the last one started too recently.
    ///
    /// Returns `true` if a new session was established.
    pub async fn reconnect(&self, reason: &'static str, cancel: &CancellationToken) -> bool {
        if !self.enter_connecting().await {
            return false;
        }

        let exchange = self.codec.exchange();
        if reason == INITIAL_CONNECTION {
            info!(url = %self.url, "Connecting");
        } else {
            warn!(url = %self.url, reason, "Reconnecting");
        }
        self.metrics
            .reconnects
            .with_label_values(&[exchange, reason])
            .inc();

        let mut backoff =
            DialBackoff::new(self.settings.initial_backoff, self.settings.max_dial_attempts);
        loop {
            self.close_writer().await;
            if cancel.is_cancelled() {
                break;
            }

            match self.dial().await {
                Ok((writer, reader)) => {
                    *self.writer.lock().await = Some(writer);
                    *self.incoming.lock().await = Some(reader);
                    {
                        let mut session = self.session.write().await;
                        session.state = SessionState::Connected;
                        session.connected_at = Utc::now();
                    }
                    self.session_changed.notify_one();
                    self.metrics
                        .feed_connected
                        .with_label_values(&[exchange])
                        .set(1.0);
                    warn!(url = %self.url, "Connected");
                    return true;
                }
                Err(e) => {
                    warn!(url = %self.url, error = %e, "Dial failed");
                    let Some(delay) = backoff.record_failure() else {
                        error!(
                            alert = "critical",
                            url = %self.url,
                            attempts = backoff.failures(),
                            "Can't connect, dial attempts exhausted"
                        );
                        break;
                    };
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        () = sleep(delay) => {}
                    }
                }
            }
        }

        self.session.write().await.state = SessionState::Disconnected;
        self.metrics
            .feed_connected
            .with_label_values(&[exchange])
            .set(0.0);
        false
    }

    /// Enter the connecting state if allowed; serialized by the session write lock.
    async fn enter_connecting(&self) -> bool {
        let mut session = self.session.write().await;
        if session.state == SessionState::Connecting {
            warn!(url = %self.url, "Reconnect rejected, already in progress");
            return false;
        }
        if let Some(started) = session.last_connect_started {
            let since = started.elapsed();
            if since < self.settings.min_reconnect_interval {
                warn!(
                    url = %self.url,
                    since_ms = since.as_millis(),
                    "Reconnect rejected, too soon after last attempt"
                );
                return false;
            }
        }
        session.state = SessionState::Connecting;
        session.last_connect_started = Some(Instant::now());
        true
    }

    /// Dial and subscribe.
    async fn dial(&self) -> Result<(WsWriter, WsReader)> {
        let (ws, _response) = timeout(self.settings.dial_timeout, connect_async(self.url.as_str()))
            .await
            .context("dial timed out")?
            .context("dial failed")?;
        let (mut writer, reader) = ws.split();

        if let Some(subscription) = &self.subscription {
            timeout(
                self.settings.io_timeout,
                writer.send(Message::Text(subscription.clone())),
            )
            .await
            .context("subscription timed out")?
            .context("subscription failed")?;
        }
        Ok((writer, reader))
    }

    async fn close_writer(&self) {
        let previous = self.writer.lock().await.take();
        if let Some(mut writer) = previous {
            if let Ok(Err(e)) = timeout(self.settings.io_timeout, writer.close()).await {
                debug!(error = %e, "Error closing previous session");
            }
            info!(url = %self.url, "Disconnected");
        }
    }

    /// Send a frame if connected; a failed write triggers a reconnect.
    async fn write(&self, message: Message, cancel: &CancellationToken) {
        let result = {
            let session = self.session.read().await;
            if session.state != SessionState::Connected {
                return;
            }
            let mut writer = self.writer.lock().await;
            let Some(writer) = writer.as_mut() else {
                return;
            };
            match timeout(self.settings.io_timeout, writer.send(message)).await {
                Ok(sent) => sent.context("send failed"),
                Err(_) => Err(anyhow::anyhow!("send timed out")),
            }
        };

        if let Err(e) = result {
            warn!(url = %self.url, error = %e, "Error writing to web socket");
            self.reconnect(WS_WRITE_ERROR, cancel).await;
        }
    }

    // ────────────────────────────────────────────
    // Reader
    // ────────────────────────────────────────────

    async fn read_loop(&self, cancel: &CancellationToken) {
        let mut stream: Option<WsReader> = None;

        loop {
            if cancel.is_cancelled() {
                return;
            }
            if let Some(fresh) = self.incoming.lock().await.take() {
                stream = Some(fresh);
            }

            let state = self.session.read().await.state;
            let reader = match (state, stream.as_mut()) {
                (SessionState::Connected, Some(reader)) => reader,
                (SessionState::Connecting, _) => {
                    self.pause(cancel).await;
                    continue;
                }
                _ => {
                    if !self.reconnect(WS_READ_ERROR, cancel).await {
                        self.pause(cancel).await;
                    }
                    continue;
                }
            };

            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                () = self.session_changed.notified() => continue,
                next = timeout(self.settings.io_timeout, reader.next()) => match next {
                    Ok(Some(Ok(message))) => ReadEvent::Message(message),
                    Ok(Some(Err(e))) => ReadEvent::Failed(format!("read error: {e}")),
                    Ok(None) => ReadEvent::Failed("connection closed".to_string()),
                    Err(_) => ReadEvent::Failed("read timed out".to_string()),
                },
            };

            let failure = match event {
                ReadEvent::Message(message) => self.handle_message(message, cancel).await.err(),
                ReadEvent::Failed(reason) => Some(reason),
            };

            if let Some(reason) = failure {
                warn!(url = %self.url, reason = %reason, "Web socket read error");
                if !self.reconnect(WS_READ_ERROR, cancel).await {
                    self.pause(cancel).await;
                }
            }
        }
    }

    async fn pause(&self, cancel: &CancellationToken) {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {}
            () = sleep(self.settings.rejected_reconnect_pause) => {}
        }
    }

    /// Dispatch one frame. Returns `Err` only when the server closed the session.
    async fn handle_message(&self, message: Message, cancel: &CancellationToken) -> Result<(), String> {
        let raw = match &message {
            Message::Text(text) => RawFrame::Text(text),
            Message::Binary(bytes) => RawFrame::Binary(bytes),
            Message::Ping(bytes) => RawFrame::Ping(bytes),
            Message::Pong(bytes) => RawFrame::Pong(bytes),
            Message::Close(frame) => return Err(format!("closed by server: {frame:?}")),
            Message::Frame(_) => return Ok(()),
        };

        match self.codec.classify(raw) {
            Frame::Price { inst_id, data } => self.handle_price(&inst_id, &data),
            Frame::Pong => *self.last_pong.lock().await = Some(Utc::now()),
            Frame::Ping => {
                if let Some(pong) = self.codec.pong() {
                    self.write(Message::Pong(pong), cancel).await;
                }
            }
            Frame::Ignored => debug!(url = %self.url, "Ignored frame"),
        }
        Ok(())
    }

    fn handle_price(&self, inst_id: &str, frame: &C::PriceFrame) {
        let Some(market_id) = self.markets_by_inst.get(inst_id) else {
            debug!(url = %self.url, inst_id, "Price for unconfigured instrument");
            return;
        };
        let multiplier = self.markets.get(market_id).map_or(1.0, |m| m.multiplier);

        match self.codec.extract_price(frame, multiplier) {
            Ok(sample) => {
                if self.store.store(market_id, sample) {
                    self.metrics
                        .samples_stored
                        .with_label_values(&[self.codec.exchange()])
                        .inc();
                }
            }
            Err(e) => warn!(url = %self.url, market_id = %market_id, error = %e, "Error extracting price"),
        }
    }

    // ────────────────────────────────────────────
    // Liveness
    // ────────────────────────────────────────────

    async fn liveness_loop(&self, cancel: &CancellationToken) {
        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.settings.ping_interval,
            self.settings.ping_interval,
        );
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                _ = ticker.tick() => self.check_liveness(cancel).await,
            }
        }
    }

    /// One liveness pass: data timeouts first, then ping timeouts and pings.
    pub async fn check_liveness(&self, cancel: &CancellationToken) {
        let connected_at = self.session.read().await.connected_at;
        let now = Utc::now();

        let mut min_data_elapsed = Duration::from_secs(3600);
        for (market_id, market) in &self.markets {
            let elapsed = self.data_elapsed(market_id, connected_at, now);
            min_data_elapsed = min_data_elapsed.min(elapsed);
            if elapsed > market.max_use_age * 3 {
                warn!(
                    url = %self.url,
                    market_id = %market_id,
                    elapsed_secs = elapsed.as_secs(),
                    "{NO_PRICE_DATA} received"
                );
                self.reconnect(DATA_TIMEOUT, cancel).await;
                return;
            }
        }

        let Some(ping) = self.codec.ping() else {
            return;
        };
        let elapsed = self.pong_elapsed(connected_at, now).await.min(min_data_elapsed);
        if elapsed > self.settings.ping_interval * 3 {
            self.reconnect(PING_TIMEOUT, cancel).await;
            return;
        }
        if self.codec.ping_always() || elapsed > self.settings.ping_interval {
            self.write(Message::Ping(ping), cancel).await;
        }
    }

    /// Time since the market's last sample, counting from the session start
    /// if the sample predates it.
    fn data_elapsed(&self, market_id: &str, connected_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
        let since = match self.store.load(market_id) {
            Some(sample) if sample.time >= connected_at => sample.time,
            _ => connected_at,
        };
        (now - since).to_std().unwrap_or(Duration::ZERO)
    }

    async fn pong_elapsed(&self, connected_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
        let since = match *self.last_pong.lock().await {
            Some(pong) if pong >= connected_at => pong,
            _ => connected_at,
        };
        (now - since).to_std().unwrap_or(Duration::ZERO)
    }
}
