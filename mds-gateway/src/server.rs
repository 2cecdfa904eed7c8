//! HTTP surface of the gateway: the `/ws` upgrade plus snapshot REST
//! endpoints reading the hot store.

use std::sync::Arc;

use actix_web::{web, App, Error, HttpRequest, HttpResponse, HttpServer, Responder};
use actix_web_actors::ws;
use mds_core::consts::{DEFAULT_DEPTH_LEVEL, MAX_MESSAGE_SIZE};
use mds_core::Interval;
use mds_store::MarketStore;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::hub::HubHandle;
use crate::session::WsSession;

#[derive(Clone)]
pub struct GatewayState {
    pub hub: HubHandle,
    pub store: Arc<dyn MarketStore>,
}

#[derive(Serialize)]
struct BaseResponse<T: Serialize> {
    code: i32,
    msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

fn ok<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Ok().json(BaseResponse {
        code: 0,
        msg: "success".to_string(),
        data: Some(data),
    })
}

fn not_found(msg: &str) -> HttpResponse {
    HttpResponse::Ok().json(BaseResponse::<()> {
        code: 1,
        msg: msg.to_string(),
        data: None,
    })
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/ws", web::get().to(ws_handler))
        .route("/health", web::get().to(health))
        .route("/api/v1/ticker/{symbol}", web::get().to(get_ticker))
        .route("/api/v1/depth/{symbol}", web::get().to(get_depth))
        .route("/api/v1/kline", web::get().to(get_kline));
}

async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<GatewayState>,
) -> Result<HttpResponse, Error> {
    let session = WsSession::new(state.hub.clone());
    ws::WsResponseBuilder::new(session, &req, stream)
        .frame_size(MAX_MESSAGE_SIZE)
        .start()
}

async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({"status": "healthy"}))
}

async fn get_ticker(path: web::Path<String>, state: web::Data<GatewayState>) -> impl Responder {
    let symbol = path.into_inner();
    match state.store.get_ticker(&symbol).await {
        Ok(Some(ticker)) => ok(ticker),
        Ok(None) => not_found("ticker not found"),
        Err(err) => HttpResponse::InternalServerError().body(err.to_string()),
    }
}

#[derive(Deserialize)]
struct DepthQuery {
    limit: Option<usize>,
}

async fn get_depth(
    path: web::Path<String>,
    query: web::Query<DepthQuery>,
    state: web::Data<GatewayState>,
) -> impl Responder {
    let symbol = path.into_inner();
    let limit = query.limit.unwrap_or(DEFAULT_DEPTH_LEVEL);
    match state.store.get_depth(&symbol).await {
        Ok(Some(mut book)) => {
            book.bids.truncate(limit);
            book.asks.truncate(limit);
            ok(book)
        }
        Ok(None) => not_found("depth not found"),
        Err(err) => HttpResponse::InternalServerError().body(err.to_string()),
    }
}

#[derive(Deserialize)]
struct KlineQuery {
    symbol: String,
    interval: Option<String>,
    limit: Option<usize>,
}

#[derive(Serialize)]
struct KlineResponse {
    symbol: String,
    interval: String,
    data: Vec<mds_core::Kline>,
}

async fn get_kline(query: web::Query<KlineQuery>, state: web::Data<GatewayState>) -> impl Responder {
    let interval_str = query.interval.clone().unwrap_or_else(|| "1m".to_string());
    let Some(interval) = Interval::parse(&interval_str) else {
        return not_found("invalid interval");
    };
    let limit = query.limit.unwrap_or(100);
    match state.store.get_klines(&query.symbol, interval, limit).await {
        Ok(klines) => ok(KlineResponse {
            symbol: query.symbol.clone(),
            interval: interval_str,
            data: klines,
        }),
        Err(err) => HttpResponse::InternalServerError().body(err.to_string()),
    }
}

pub async fn run_server(state: GatewayState, bind: String) -> std::io::Result<()> {
    info!(%bind, "starting gateway server");
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(routes)
    })
    .disable_signals()
    .bind(&bind)?
    .run()
    .await
}
