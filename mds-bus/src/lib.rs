//! Message transport for MDS: a durable partitioned topic bus and an
//! ephemeral pub/sub bus, each behind a trait with an in-process
//! implementation.

use anyhow::Result;

pub mod partitioned;
pub mod producer;
pub mod pubsub;

pub use partitioned::{PartitionedBus, TopicStream};
pub use producer::Producer;
pub use pubsub::{LocalPubSub, PubSub, PubSubMessage, PubSubStream};

/// One record fetched from a topic partition.
#[derive(Clone, Debug)]
pub struct Record {
    pub topic: String,
    pub partition: usize,
    pub offset: u64,
    pub key: String,
    pub payload: Vec<u8>,
}

/// Keyed, partitioned, at-least-once transport. Records with the same key
/// always land on the same partition and are delivered to a consumer group
/// in publish order.
#[async_trait::async_trait]
pub trait TopicBus: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<()>;

    /// Join `group` on `topic`. A group unknown to the bus starts at the log
    /// tail; a known group resumes from its last committed offsets.
    async fn subscribe(&self, group: &str, topic: &str) -> Result<TopicStream>;
}

pub struct KafkaBus {
    // TODO: Kafka-backed TopicBus implementation
}
