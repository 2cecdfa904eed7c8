//! Bridge from the ephemeral pub/sub bus to the hub: subscribes to
//! `market:*`, strips the prefix to recover the client channel name, and
//! hands the decoded payload to the hub for fan-out.

use std::sync::Arc;

use mds_bus::PubSub;
use mds_core::consts::{CHANNEL_MARKET_PATTERN, CHANNEL_MARKET_PREFIX};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::hub::HubHandle;

pub struct Broadcaster {
    hub: HubHandle,
    pubsub: Arc<dyn PubSub>,
}

impl Broadcaster {
    pub fn new(hub: HubHandle, pubsub: Arc<dyn PubSub>) -> Self {
        Self { hub, pubsub }
    }

    pub async fn run(self) {
        let mut subscription = match self.pubsub.psubscribe(CHANNEL_MARKET_PATTERN).await {
            Ok(subscription) => subscription,
            Err(err) => {
                error!(?err, "failed to subscribe to market channels");
                return;
            }
        };
        info!(pattern = CHANNEL_MARKET_PATTERN, "bridging pub/sub to clients");

        while let Some(message) = subscription.recv().await {
            let channel = message
                .channel
                .strip_prefix(CHANNEL_MARKET_PREFIX)
                .unwrap_or(&message.channel)
                .to_string();
            match serde_json::from_slice::<Value>(&message.payload) {
                Ok(data) => self.hub.broadcast(channel, data).await,
                Err(err) => {
                    warn!(channel = %message.channel, %err, "dropping undecodable message")
                }
            }
        }
        info!("pub/sub bridge stopped");
    }
}
