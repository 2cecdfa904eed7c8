//! Ephemeral pub/sub bus with trailing-wildcard pattern subscriptions.
//! Delivery is best-effort: a subscriber that cannot keep up loses messages
//! instead of blocking publishers.

use std::sync::Mutex;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::warn;

const SUBSCRIBER_QUEUE: usize = 1_024;

#[derive(Clone, Debug)]
pub struct PubSubMessage {
    pub channel: String,
    pub payload: Vec<u8>,
}

#[async_trait::async_trait]
pub trait PubSub: Send + Sync {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()>;

    /// Subscribe to every channel matching `pattern` (exact name, or a
    /// prefix ending in `*`).
    async fn psubscribe(&self, pattern: &str) -> Result<PubSubStream>;
}

pub struct PubSubStream {
    pub pattern: String,
    receiver: mpsc::Receiver<PubSubMessage>,
}

impl PubSubStream {
    pub async fn recv(&mut self) -> Option<PubSubMessage> {
        self.receiver.recv().await
    }
}

pub fn pattern_matches(pattern: &str, channel: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => channel.starts_with(prefix),
        None => pattern == channel,
    }
}

struct PatternSub {
    pattern: String,
    sender: mpsc::Sender<PubSubMessage>,
}

/// In-process pub/sub implementation backed by bounded channels.
#[derive(Default)]
pub struct LocalPubSub {
    subscribers: Mutex<Vec<PatternSub>>,
}

impl LocalPubSub {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PubSub for LocalPubSub {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<()> {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|sub| !sub.sender.is_closed());
        for sub in subscribers.iter() {
            if !pattern_matches(&sub.pattern, channel) {
                continue;
            }
            let message = PubSubMessage {
                channel: channel.to_string(),
                payload: payload.clone(),
            };
            if sub.sender.try_send(message).is_err() {
                warn!(channel, pattern = %sub.pattern, "slow subscriber, dropping message");
            }
        }
        Ok(())
    }

    async fn psubscribe(&self, pattern: &str) -> Result<PubSubStream> {
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_QUEUE);
        self.subscribers.lock().unwrap().push(PatternSub {
            pattern: pattern.to_string(),
            sender,
        });
        Ok(PubSubStream {
            pattern: pattern.to_string(),
            receiver,
        })
    }
}
