//! One actor per client socket. The session registers a bounded frame queue
//! with the hub; a pump task batches queued frames (newline-separated) into
//! single writes. The server pings every 54 s and drops clients whose pong
//! is more than 60 s old.

use std::sync::Arc;
use std::time::Instant;

use actix::prelude::*;
use actix_web_actors::ws;
use mds_core::consts::{
    CLIENT_PING_PERIOD, CLIENT_PONG_WAIT, CLIENT_SEND_QUEUE, MAX_SUBSCRIPTIONS_PER_CONN,
};
use serde_json::Value;
use tokio::sync::{mpsc, Notify};
use tracing::{info, warn};
use uuid::Uuid;

use crate::hub::{ClientHandle, ClientId, HubHandle};
use crate::protocol::{
    error_frame, full_channel, pong_frame, subscribed_frame, unsubscribed_frame, welcome_frame,
    ClientCommand,
};

pub struct WsSession {
    id: ClientId,
    hub: HubHandle,
    frames_tx: mpsc::Sender<Value>,
    frames_rx: Option<mpsc::Receiver<Value>>,
    kill: Arc<Notify>,
    last_pong: Instant,
}

impl WsSession {
    pub fn new(hub: HubHandle) -> Self {
        let (frames_tx, frames_rx) = mpsc::channel(CLIENT_SEND_QUEUE);
        Self {
            id: Uuid::new_v4(),
            hub,
            frames_tx,
            frames_rx: Some(frames_rx),
            kill: Arc::new(Notify::new()),
            last_pong: Instant::now(),
        }
    }

    /// Session-originated frames share the client's bounded queue; when it
    /// is full the response is dropped, not the connection.
    fn enqueue(&self, frame: Value) {
        if self.frames_tx.try_send(frame).is_err() {
            warn!(client = %self.id, "send queue full, dropping response frame");
        }
    }

    fn handle_command(&mut self, text: &str) {
        let command: ClientCommand = match serde_json::from_str(text) {
            Ok(command) => command,
            Err(_) => {
                self.enqueue(error_frame("invalid JSON"));
                return;
            }
        };

        match command.action.as_str() {
            "subscribe" => {
                let Some(channel) = command.channel.as_deref() else {
                    self.enqueue(error_frame("missing 'channel' field"));
                    return;
                };
                if self.hub.subscriptions.subscription_count(self.id)
                    >= MAX_SUBSCRIPTIONS_PER_CONN
                {
                    self.enqueue(error_frame("subscription limit reached"));
                    return;
                }
                let full = full_channel(channel, command.symbol.as_deref());
                self.hub.subscriptions.subscribe(self.id, &full);
                info!(client = %self.id, channel = %full, "subscribed");
                self.enqueue(subscribed_frame(channel, command.symbol.as_deref()));
            }
            "unsubscribe" => {
                let Some(channel) = command.channel.as_deref() else {
                    self.enqueue(error_frame("missing 'channel' field"));
                    return;
                };
                let full = full_channel(channel, command.symbol.as_deref());
                self.hub.subscriptions.unsubscribe(self.id, &full);
                info!(client = %self.id, channel = %full, "unsubscribed");
                self.enqueue(unsubscribed_frame(channel, command.symbol.as_deref()));
            }
            "ping" => self.enqueue(pong_frame()),
            other => self.enqueue(error_frame(&format!("unknown action: {other}"))),
        }
    }
}

#[derive(Message)]
#[rtype(result = "()")]
struct Outbound(String);

#[derive(Message)]
#[rtype(result = "()")]
struct Evicted;

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.enqueue(welcome_frame(&self.id, chrono_now_secs()));

        let Some(mut frames_rx) = self.frames_rx.take() else {
            ctx.stop();
            return;
        };
        let handle = ClientHandle {
            frames: self.frames_tx.clone(),
            kill: Arc::clone(&self.kill),
        };
        let hub = self.hub.clone();
        let id = self.id;
        let kill = Arc::clone(&self.kill);
        let addr = ctx.address();
        actix_rt::spawn(async move {
            hub.register(id, handle).await;
            loop {
                tokio::select! {
                    _ = kill.notified() => {
                        addr.do_send(Evicted);
                        return;
                    }
                    maybe = frames_rx.recv() => {
                        let Some(frame) = maybe else { return };
                        let mut text = frame.to_string();
                        // Fold whatever else is queued into the same write.
                        while let Ok(next) = frames_rx.try_recv() {
                            text.push('\n');
                            text.push_str(&next.to_string());
                        }
                        addr.do_send(Outbound(text));
                    }
                }
            }
        });

        ctx.run_interval(CLIENT_PING_PERIOD, |session, ctx| {
            if session.last_pong.elapsed() > CLIENT_PONG_WAIT {
                warn!(client = %session.id, "pong deadline missed, closing");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });

        info!(client = %self.id, "client connected");
    }

    fn stopping(&mut self, _ctx: &mut Self::Context) -> Running {
        let hub = self.hub.clone();
        let id = self.id;
        actix_rt::spawn(async move {
            hub.unregister(id).await;
        });
        info!(client = %self.id, "client disconnected");
        Running::Stop
    }
}

impl Handler<Outbound> for WsSession {
    type Result = ();

    fn handle(&mut self, message: Outbound, ctx: &mut Self::Context) {
        ctx.text(message.0);
    }
}

impl Handler<Evicted> for WsSession {
    type Result = ();

    fn handle(&mut self, _: Evicted, ctx: &mut Self::Context) {
        ctx.close(None);
        ctx.stop();
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, item: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match item {
            Ok(ws::Message::Text(text)) => self.handle_command(&text),
            Ok(ws::Message::Ping(payload)) => ctx.pong(&payload),
            Ok(ws::Message::Pong(_)) => self.last_pong = Instant::now(),
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(_) => {}
            Err(err) => {
                warn!(client = %self.id, %err, "read error");
                ctx.stop();
            }
        }
    }
}

fn chrono_now_secs() -> i64 {
    mds_core::time::now_ms() / 1_000
}
