//! Push receiver for the in-house matching engine. Exposes an HTTP endpoint
//! family; every accepted body is normalized and handed to the sink with
//! `source = internal`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};

use actix_web::dev::ServerHandle;
use actix_web::{web, App, HttpResponse, HttpServer};
use mds_core::consts::EXCHANGE_INTERNAL;
use mds_core::time::now_ms;
use mds_core::{
    DataKind, InternalDepthMessage, InternalTradeMessage, MarketData, MarketPayload, Source,
    Ticker,
};
use tokio::sync::{oneshot, Mutex};
use tracing::{info, warn};

use crate::adapter::{ExchangeAdapter, MessageSink};
use crate::error::FeedError;

pub struct InternalAdapter {
    shared: Arc<InternalShared>,
    server: Mutex<Option<ServerHandle>>,
}

struct InternalShared {
    port: u16,
    connected: AtomicBool,
    sink: StdRwLock<Option<MessageSink>>,
}

impl InternalShared {
    fn dispatch(&self, record: MarketData) {
        let sink = self.sink.read().unwrap().clone();
        if let Some(sink) = sink {
            sink(record);
        }
    }
}

impl InternalAdapter {
    pub const DEFAULT_PORT: u16 = 9001;

    pub fn new(port: u16) -> Self {
        let port = if port == 0 { Self::DEFAULT_PORT } else { port };
        Self {
            shared: Arc::new(InternalShared {
                port,
                connected: AtomicBool::new(false),
                sink: StdRwLock::new(None),
            }),
            server: Mutex::new(None),
        }
    }
}

#[async_trait::async_trait]
impl ExchangeAdapter for InternalAdapter {
    async fn connect(&self) -> Result<(), FeedError> {
        if self.shared.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        let port = self.shared.port;
        let (ready_tx, ready_rx) = oneshot::channel();

        // actix needs its own runtime; block a dedicated thread on a fresh
        // System and hand the server handle back.
        tokio::task::spawn_blocking(move || {
            actix_rt::System::new().block_on(async move {
                let data = web::Data::new(shared);
                let bound = HttpServer::new(move || {
                    App::new().app_data(data.clone()).configure(routes)
                })
                .disable_signals()
                .bind(("0.0.0.0", port));
                let server = match bound {
                    Ok(server) => server.run(),
                    Err(err) => {
                        let _ = ready_tx.send(Err(FeedError::Connect(err.to_string())));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(server.handle()));
                let _ = server.await;
            });
        });

        match ready_rx.await {
            Ok(Ok(handle)) => {
                *self.server.lock().await = Some(handle);
                self.shared.connected.store(true, Ordering::SeqCst);
                info!(port, "internal receiver listening");
                Ok(())
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(FeedError::Connect(
                "internal receiver failed to start".to_string(),
            )),
        }
    }

    // Push ingestion has nothing to subscribe to upstream.
    async fn subscribe(&self, symbols: &[String], kinds: &[DataKind]) -> Result<(), FeedError> {
        info!(?symbols, ?kinds, "internal receiver accepting pushes");
        Ok(())
    }

    fn on_message(&self, sink: MessageSink) {
        *self.shared.sink.write().unwrap() = Some(sink);
    }

    async fn close(&self) {
        if let Some(handle) = self.server.lock().await.take() {
            handle.stop(true).await;
        }
        self.shared.connected.store(false, Ordering::SeqCst);
        info!("internal receiver closed");
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        EXCHANGE_INTERNAL
    }
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/market/trade").route(web::post().to(post_trade)))
        .service(web::resource("/api/market/depth").route(web::post().to(post_depth)))
        .service(web::resource("/api/market/ticker").route(web::post().to(post_ticker)))
        .route("/health", web::get().to(health));
}

type SharedData = web::Data<Arc<InternalShared>>;

fn accepted() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({"code": 0, "msg": "success"}))
}

async fn post_trade(state: SharedData, body: web::Json<InternalTradeMessage>) -> HttpResponse {
    let message = body.into_inner();
    let trade = message.to_trade();
    info!(
        symbol = %trade.symbol,
        price = trade.price,
        amount = trade.amount,
        "internal trade received"
    );
    state.dispatch(MarketData::new(
        EXCHANGE_INTERNAL,
        trade.symbol.clone(),
        Source::Internal,
        message.timestamp,
        MarketPayload::Trade(trade),
    ));
    accepted()
}

async fn post_depth(state: SharedData, body: web::Json<InternalDepthMessage>) -> HttpResponse {
    let message = body.into_inner();
    let book = message.to_order_book();
    info!(
        symbol = %book.symbol,
        bids = book.bids.len(),
        asks = book.asks.len(),
        "internal depth received"
    );
    state.dispatch(MarketData::new(
        EXCHANGE_INTERNAL,
        book.symbol.clone(),
        Source::Internal,
        message.timestamp,
        MarketPayload::Depth(book),
    ));
    accepted()
}

async fn post_ticker(state: SharedData, body: web::Json<Ticker>) -> HttpResponse {
    let mut ticker = body.into_inner();
    if ticker.timestamp == 0 {
        ticker.timestamp = now_ms();
    }
    if ticker.bid_price > ticker.ask_price && ticker.bid_price > 0.0 && ticker.ask_price > 0.0 {
        warn!(symbol = %ticker.symbol, "crossed internal ticker");
    }
    info!(symbol = %ticker.symbol, last = ticker.last_price, "internal ticker received");
    state.dispatch(MarketData::new(
        EXCHANGE_INTERNAL,
        ticker.symbol.clone(),
        Source::Internal,
        ticker.timestamp,
        MarketPayload::Ticker(ticker),
    ));
    accepted()
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "name": "internal-adapter",
    }))
}
