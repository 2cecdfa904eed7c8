//! Shared WebSocket session machinery for venue adapters.
//!
//! One reader task drains the socket, one heartbeat task pings every 20 s
//! and declares the session dead after 60 s without a pong, and all writes
//! are serialized through a send lock. Reconnection runs on the reader's
//! exit path with exponential backoff, resending the saved subscription set
//! verbatim before dispatch resumes.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use mds_core::consts::{
    DIAL_TIMEOUT, INIT_RECONNECT_DELAY, MAX_MESSAGE_SIZE, MAX_RECONNECT_DELAY,
    MAX_RECONNECT_RETRIES, PING_INTERVAL, PONG_TIMEOUT_MS,
};
use mds_core::time::now_ms;
use mds_core::{DataKind, MarketData};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::time::{interval, sleep, timeout, Duration, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::adapter::MessageSink;
use crate::error::FeedError;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// One retained subscription: a symbol in canonical form plus a data kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamSpec {
    pub symbol: String,
    pub kind: DataKind,
}

/// Outcome of decoding one text frame.
pub enum Decoded {
    Data(Vec<MarketData>),
    /// Subscription acknowledgement; logged only.
    Ack,
    /// Venue-level error frame.
    VenueError(String),
    /// Application-level pong.
    Pong,
    Ignore,
}

/// Venue-specific pieces of a session: channel naming, symbol translation,
/// frame parsing and the heartbeat frame shape.
pub trait VenueCodec: Send + Sync + 'static {
    fn name(&self) -> &'static str;
    fn subscribe_frames(&self, specs: &[StreamSpec]) -> Result<Vec<String>, FeedError>;
    fn decode(&self, text: &str) -> Result<Decoded, FeedError>;
    fn ping_frame(&self) -> Message;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdapterState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    GaveUp,
}

/// Session driver shared by every venue adapter; behavior is parameterized
/// by the [`VenueCodec`].
pub struct WsClient {
    shared: Arc<Shared>,
}

struct Shared {
    codec: Box<dyn VenueCodec>,
    ws_url: String,
    connected: AtomicBool,
    reconnect_enabled: AtomicBool,
    last_pong_ms: AtomicI64,
    writer: Mutex<Option<WsSink>>,
    subscriptions: StdMutex<Vec<StreamSpec>>,
    sink: StdRwLock<Option<MessageSink>>,
    state_tx: watch::Sender<AdapterState>,
    shutdown_tx: watch::Sender<bool>,
}

impl WsClient {
    pub fn new(codec: Box<dyn VenueCodec>, ws_url: impl Into<String>) -> Self {
        let (state_tx, _) = watch::channel(AdapterState::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                codec,
                ws_url: ws_url.into(),
                connected: AtomicBool::new(false),
                reconnect_enabled: AtomicBool::new(true),
                last_pong_ms: AtomicI64::new(now_ms()),
                writer: Mutex::new(None),
                subscriptions: StdMutex::new(Vec::new()),
                sink: StdRwLock::new(None),
                state_tx,
                shutdown_tx,
            }),
        }
    }

    /// Observe the session state machine.
    pub fn state(&self) -> watch::Receiver<AdapterState> {
        self.shared.state_tx.subscribe()
    }

    pub async fn connect(&self) -> Result<(), FeedError> {
        if self.shared.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.shared.set_state(AdapterState::Connecting);
        let stream = match self.shared.dial().await {
            Ok(stream) => stream,
            Err(err) => {
                self.shared.set_state(AdapterState::Disconnected);
                return Err(err);
            }
        };
        let (ws_sink, source) = stream.split();
        *self.shared.writer.lock().await = Some(ws_sink);
        self.shared.last_pong_ms.store(now_ms(), Ordering::SeqCst);
        self.shared.connected.store(true, Ordering::SeqCst);
        self.shared.set_state(AdapterState::Connected);
        info!(venue = self.shared.codec.name(), url = %self.shared.ws_url, "connected");

        let reader = Arc::clone(&self.shared);
        tokio::spawn(async move { reader.read_loop(source).await });
        let heart = Arc::clone(&self.shared);
        tokio::spawn(async move { heart.heartbeat_loop().await });
        Ok(())
    }

    pub async fn subscribe(
        &self,
        symbols: &[String],
        kinds: &[DataKind],
    ) -> Result<(), FeedError> {
        if !self.shared.connected.load(Ordering::SeqCst) {
            return Err(FeedError::NotConnected);
        }
        let specs: Vec<StreamSpec> = symbols
            .iter()
            .flat_map(|symbol| {
                kinds.iter().map(move |kind| StreamSpec {
                    symbol: symbol.clone(),
                    kind: *kind,
                })
            })
            .collect();
        let frames = self.shared.codec.subscribe_frames(&specs)?;
        for frame in frames {
            self.shared.send_raw(Message::Text(frame)).await?;
        }
        let mut saved = self.shared.subscriptions.lock().unwrap();
        for spec in specs {
            if !saved.contains(&spec) {
                saved.push(spec);
            }
        }
        info!(
            venue = self.shared.codec.name(),
            streams = saved.len(),
            "subscribed"
        );
        Ok(())
    }

    pub fn on_message(&self, sink: MessageSink) {
        *self.shared.sink.write().unwrap() = Some(sink);
    }

    pub async fn close(&self) {
        self.shared.reconnect_enabled.store(false, Ordering::SeqCst);
        let _ = self.shared.shutdown_tx.send(true);
        if let Some(mut ws_sink) = self.shared.writer.lock().await.take() {
            let _ = ws_sink.close().await;
        }
        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared.set_state(AdapterState::Disconnected);
        info!(venue = self.shared.codec.name(), "adapter closed");
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn name(&self) -> &str {
        self.shared.codec.name()
    }
}

impl Shared {
    fn set_state(&self, state: AdapterState) {
        let _ = self.state_tx.send(state);
    }

    async fn dial(&self) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>, FeedError> {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(MAX_MESSAGE_SIZE);
        config.max_frame_size = Some(MAX_MESSAGE_SIZE);
        let attempt = connect_async_with_config(self.ws_url.clone(), Some(config), false);
        match timeout(DIAL_TIMEOUT, attempt).await {
            Ok(Ok((stream, _response))) => Ok(stream),
            Ok(Err(err)) => Err(FeedError::Connect(err.to_string())),
            Err(_) => Err(FeedError::Connect(format!(
                "handshake timed out after {DIAL_TIMEOUT:?}"
            ))),
        }
    }

    async fn send_raw(&self, message: Message) -> Result<(), FeedError> {
        let mut writer = self.writer.lock().await;
        let Some(ws_sink) = writer.as_mut() else {
            return Err(FeedError::NotConnected);
        };
        ws_sink
            .send(message)
            .await
            .map_err(|err| FeedError::Connect(err.to_string()))
    }

    async fn read_loop(self: Arc<Self>, mut source: WsSource) {
        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                frame = source.next() => {
                    let lost = match frame {
                        Some(Ok(Message::Close(reason))) => {
                            warn!(venue = self.codec.name(), ?reason, "upstream closed the session");
                            true
                        }
                        Some(Ok(message)) => {
                            self.handle_frame(message).await;
                            false
                        }
                        Some(Err(err)) => {
                            warn!(venue = self.codec.name(), %err, "read error");
                            true
                        }
                        None => true,
                    };
                    if lost {
                        match self.on_session_lost().await {
                            Some(new_source) => source = new_source,
                            None => return,
                        }
                    }
                }
            }
        }
    }

    async fn handle_frame(&self, message: Message) {
        match message {
            Message::Text(text) => match self.codec.decode(&text) {
                Ok(Decoded::Data(records)) => self.dispatch(records),
                Ok(Decoded::Pong) => self.last_pong_ms.store(now_ms(), Ordering::SeqCst),
                Ok(Decoded::Ack) => debug!(venue = self.codec.name(), "subscription acknowledged"),
                Ok(Decoded::VenueError(msg)) => {
                    warn!(venue = self.codec.name(), %msg, "venue error frame")
                }
                Ok(Decoded::Ignore) => {}
                Err(err) => warn!(venue = self.codec.name(), %err, "dropping frame"),
            },
            Message::Ping(payload) => {
                let _ = self.send_raw(Message::Pong(payload)).await;
            }
            Message::Pong(_) => self.last_pong_ms.store(now_ms(), Ordering::SeqCst),
            _ => {}
        }
    }

    fn dispatch(&self, records: Vec<MarketData>) {
        let sink = self.sink.read().unwrap().clone();
        let Some(sink) = sink else { return };
        for record in records {
            sink(record);
        }
    }

    /// Reader exit path: reconnect with exponential backoff, resending the
    /// saved subscriptions before handing the new read half back.
    async fn on_session_lost(&self) -> Option<WsSource> {
        self.connected.store(false, Ordering::SeqCst);
        self.writer.lock().await.take();
        if !self.reconnect_enabled.load(Ordering::SeqCst) {
            self.set_state(AdapterState::Disconnected);
            return None;
        }
        self.set_state(AdapterState::Reconnecting);

        let mut shutdown = self.shutdown_tx.subscribe();
        let mut delay = INIT_RECONNECT_DELAY;
        for attempt in 1..=MAX_RECONNECT_RETRIES {
            tokio::select! {
                _ = shutdown.changed() => {
                    self.set_state(AdapterState::Disconnected);
                    return None;
                }
                _ = sleep(delay) => {}
            }
            info!(
                venue = self.codec.name(),
                attempt,
                max = MAX_RECONNECT_RETRIES,
                "attempting to reconnect"
            );
            match self.dial().await {
                Ok(stream) => {
                    let (ws_sink, source) = stream.split();
                    *self.writer.lock().await = Some(ws_sink);
                    self.last_pong_ms.store(now_ms(), Ordering::SeqCst);
                    self.connected.store(true, Ordering::SeqCst);
                    match self.resubscribe().await {
                        Ok(()) => {
                            self.set_state(AdapterState::Connected);
                            info!(venue = self.codec.name(), "reconnected");
                            return Some(source);
                        }
                        Err(err) => {
                            warn!(venue = self.codec.name(), %err, "resubscribe failed");
                            self.connected.store(false, Ordering::SeqCst);
                            self.writer.lock().await.take();
                        }
                    }
                }
                Err(err) => {
                    warn!(venue = self.codec.name(), attempt, %err, "reconnect attempt failed")
                }
            }
            delay = (delay * 2).min(MAX_RECONNECT_DELAY);
        }

        error!(
            venue = self.codec.name(),
            "{}",
            FeedError::GaveUp(MAX_RECONNECT_RETRIES)
        );
        self.set_state(AdapterState::GaveUp);
        None
    }

    async fn resubscribe(&self) -> Result<(), FeedError> {
        let specs = self.subscriptions.lock().unwrap().clone();
        if specs.is_empty() {
            return Ok(());
        }
        let frames = self.codec.subscribe_frames(&specs)?;
        for frame in frames {
            self.send_raw(Message::Text(frame)).await?;
        }
        info!(
            venue = self.codec.name(),
            streams = specs.len(),
            "resubscribed"
        );
        Ok(())
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut ticker = interval(PING_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = ticker.tick() => {
                    if *self.state_tx.borrow() == AdapterState::GaveUp {
                        return;
                    }
                    if !self.connected.load(Ordering::SeqCst) {
                        continue;
                    }
                    let silent_ms = now_ms() - self.last_pong_ms.load(Ordering::SeqCst);
                    if silent_ms > PONG_TIMEOUT_MS {
                        warn!(
                            venue = self.codec.name(),
                            "{}",
                            FeedError::HeartbeatTimeout(Duration::from_millis(silent_ms as u64))
                        );
                        // Drop the socket; the reader unblocks with an error
                        // and runs the reconnect path.
                        if let Some(mut ws_sink) = self.writer.lock().await.take() {
                            let _ = ws_sink.close().await;
                        }
                        continue;
                    }
                    if let Err(err) = self.send_raw(self.codec.ping_frame()).await {
                        debug!(venue = self.codec.name(), %err, "ping failed");
                    }
                }
            }
        }
    }
}
