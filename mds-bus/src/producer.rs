//! Batching producer: buffers records and flushes to the topic bus when the
//! batch fills (100 records) or the flush timeout (10 ms) elapses, whichever
//! comes first. A single drain task keeps publish order intact.

use std::sync::Arc;

use mds_core::consts::{PRODUCER_BATCH_SIZE, PRODUCER_FLUSH_TIMEOUT};
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;
use tracing::warn;

use crate::TopicBus;

const PRODUCER_QUEUE: usize = 8_192;

enum Command {
    Publish {
        topic: String,
        key: String,
        payload: Vec<u8>,
    },
    Flush(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct Producer {
    tx: mpsc::Sender<Command>,
}

impl Producer {
    pub fn new(bus: Arc<dyn TopicBus>) -> Self {
        let (tx, rx) = mpsc::channel(PRODUCER_QUEUE);
        tokio::spawn(run(bus, rx));
        Self { tx }
    }

    /// Enqueue a record for asynchronous publication. Fire-and-forget: a full
    /// producer queue drops the record with a warning rather than blocking
    /// the adapter's reader.
    pub fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) {
        let command = Command::Publish {
            topic: topic.to_string(),
            key: key.to_string(),
            payload,
        };
        if let Err(err) = self.tx.try_send(command) {
            warn!(topic, key, ?err, "producer queue full, dropping record");
        }
    }

    /// Push every buffered record to the bus and wait for the drain.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }
}

async fn run(bus: Arc<dyn TopicBus>, mut rx: mpsc::Receiver<Command>) {
    let mut buffer: Vec<(String, String, Vec<u8>)> = Vec::with_capacity(PRODUCER_BATCH_SIZE);
    let mut ticker = interval(PRODUCER_FLUSH_TIMEOUT);
    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Publish { topic, key, payload }) => {
                    buffer.push((topic, key, payload));
                    if buffer.len() >= PRODUCER_BATCH_SIZE {
                        drain(&bus, &mut buffer).await;
                    }
                }
                Some(Command::Flush(ack)) => {
                    drain(&bus, &mut buffer).await;
                    let _ = ack.send(());
                }
                None => {
                    drain(&bus, &mut buffer).await;
                    return;
                }
            },
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    drain(&bus, &mut buffer).await;
                }
            }
        }
    }
}

async fn drain(bus: &Arc<dyn TopicBus>, buffer: &mut Vec<(String, String, Vec<u8>)>) {
    for (topic, key, payload) in buffer.drain(..) {
        if let Err(err) = bus.publish(&topic, &key, payload).await {
            warn!(%topic, %key, ?err, "failed to publish record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PartitionedBus;
    use tokio::time::{sleep, Duration};

    #[tokio::test]
    async fn producer_flushes_batches_in_order() {
        let bus: Arc<dyn TopicBus> = Arc::new(PartitionedBus::new(4));
        let mut stream = bus.subscribe("g", "market.trade").await.unwrap();
        let producer = Producer::new(Arc::clone(&bus));

        for n in 0..150u32 {
            producer.publish("market.trade", "BTCUSDT", n.to_be_bytes().to_vec());
        }
        producer.flush().await;

        for n in 0..150u32 {
            let record = stream.next().await.unwrap();
            assert_eq!(record.payload, n.to_be_bytes().to_vec());
        }
    }

    #[tokio::test]
    async fn partial_batch_flushes_on_timeout() {
        let bus: Arc<dyn TopicBus> = Arc::new(PartitionedBus::new(4));
        let mut stream = bus.subscribe("g", "market.ticker").await.unwrap();
        let producer = Producer::new(Arc::clone(&bus));

        producer.publish("market.ticker", "BTCUSDT", b"one".to_vec());
        // Well past the 10 ms flush timeout; no explicit flush call.
        sleep(Duration::from_millis(100)).await;
        let record = stream.next().await.unwrap();
        assert_eq!(record.payload, b"one".to_vec());
    }
}
