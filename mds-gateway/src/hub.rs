//! The hub task owns every connected client and routes broadcasts to the
//! clients subscribed to each channel. Register, unregister and broadcast
//! all flow through one command queue, so a client dropped for backpressure
//! is out of the index before the next broadcast is processed.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::update_frame;
use crate::subscription::SubscriptionManager;

pub type ClientId = Uuid;

const HUB_QUEUE: usize = 1_024;

/// Hub-side view of one client: its bounded frame queue and the notify used
/// to tear the session down when the hub evicts it.
pub struct ClientHandle {
    pub frames: mpsc::Sender<Value>,
    pub kill: Arc<Notify>,
}

enum HubCommand {
    Register { id: ClientId, handle: ClientHandle },
    Unregister { id: ClientId },
    Broadcast { channel: String, data: Value },
    Stop,
}

#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
    pub subscriptions: Arc<SubscriptionManager>,
}

impl HubHandle {
    pub async fn register(&self, id: ClientId, handle: ClientHandle) {
        let _ = self.commands.send(HubCommand::Register { id, handle }).await;
    }

    pub async fn unregister(&self, id: ClientId) {
        let _ = self.commands.send(HubCommand::Unregister { id }).await;
    }

    pub async fn broadcast(&self, channel: String, data: Value) {
        let _ = self
            .commands
            .send(HubCommand::Broadcast { channel, data })
            .await;
    }

    pub async fn stop(&self) {
        let _ = self.commands.send(HubCommand::Stop).await;
    }
}

pub struct Hub {
    commands: mpsc::Receiver<HubCommand>,
    clients: HashMap<ClientId, ClientHandle>,
    subscriptions: Arc<SubscriptionManager>,
}

impl Hub {
    pub fn new() -> (Hub, HubHandle) {
        let (tx, rx) = mpsc::channel(HUB_QUEUE);
        let subscriptions = Arc::new(SubscriptionManager::new());
        (
            Hub {
                commands: rx,
                clients: HashMap::new(),
                subscriptions: Arc::clone(&subscriptions),
            },
            HubHandle {
                commands: tx,
                subscriptions,
            },
        )
    }

    pub async fn run(mut self) {
        info!("hub running");
        while let Some(command) = self.commands.recv().await {
            match command {
                HubCommand::Register { id, handle } => {
                    self.clients.insert(id, handle);
                    info!(client = %id, total = self.clients.len(), "client registered");
                }
                HubCommand::Unregister { id } => {
                    self.drop_client(id);
                    info!(client = %id, total = self.clients.len(), "client unregistered");
                }
                HubCommand::Broadcast { channel, data } => self.broadcast(&channel, data),
                HubCommand::Stop => break,
            }
        }
        for (_, handle) in self.clients.drain() {
            handle.kill.notify_one();
        }
        info!("hub stopped");
    }

    fn broadcast(&mut self, channel: &str, data: Value) {
        let subscribers = self.subscriptions.subscribers(channel);
        if subscribers.is_empty() {
            return;
        }
        let frame = update_frame(channel, data);
        let mut delivered = 0usize;
        let mut dropped = 0usize;
        for id in subscribers {
            let Some(client) = self.clients.get(&id) else {
                self.subscriptions.unsubscribe_all(id);
                continue;
            };
            match client.frames.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    // Fail fast: a slow client is evicted, not throttled.
                    warn!(client = %id, channel, "send queue full, disconnecting client");
                    self.drop_client(id);
                    dropped += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    self.drop_client(id);
                    dropped += 1;
                }
            }
        }
        debug!(channel, delivered, dropped, "broadcast complete");
    }

    fn drop_client(&mut self, id: ClientId) {
        if let Some(handle) = self.clients.remove(&id) {
            handle.kill.notify_one();
        }
        self.subscriptions.unsubscribe_all(id);
    }
}
