//! In-process partitioned topic bus.
//!
//! Each topic owns a fixed set of append-only partition logs; the partition
//! for a record is a stable hash of its key, which is what preserves
//! per-symbol ordering end to end. Consumer groups keep committed offsets in
//! the bus so a resubscribing group resumes where it left off
//! (at-least-once delivery).

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use mds_core::consts::{CONSUMER_COMMIT_INTERVAL, DEFAULT_PARTITIONS};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, warn};

use crate::{Record, TopicBus};

// Per-partition retention; consumers lagging past this are snapped forward.
const PARTITION_RETENTION: usize = 16_384;
const FETCH_POLL_INTERVAL: Duration = Duration::from_millis(25);
const SUBSCRIBER_QUEUE: usize = 1024;

fn fnv1a(key: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in key.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

struct StoredRecord {
    key: String,
    payload: Vec<u8>,
}

struct PartitionLog {
    base_offset: u64,
    records: VecDeque<StoredRecord>,
}

struct PartitionState {
    log: Mutex<PartitionLog>,
}

impl PartitionState {
    fn new() -> Self {
        Self {
            log: Mutex::new(PartitionLog {
                base_offset: 0,
                records: VecDeque::new(),
            }),
        }
    }

    fn tail(&self) -> u64 {
        let log = self.log.lock().unwrap();
        log.base_offset + log.records.len() as u64
    }
}

struct TopicState {
    partitions: Vec<Arc<PartitionState>>,
}

struct BusInner {
    partitions_per_topic: usize,
    topics: Mutex<HashMap<String, Arc<TopicState>>>,
    // committed offsets keyed by (group, topic)
    offsets: Mutex<HashMap<(String, String), Vec<u64>>>,
}

pub struct PartitionedBus {
    inner: Arc<BusInner>,
}

impl PartitionedBus {
    pub fn new(partitions_per_topic: usize) -> Self {
        let partitions_per_topic = if partitions_per_topic == 0 {
            DEFAULT_PARTITIONS
        } else {
            partitions_per_topic
        };
        Self {
            inner: Arc::new(BusInner {
                partitions_per_topic,
                topics: Mutex::new(HashMap::new()),
                offsets: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn topic_state(&self, topic: &str) -> Arc<TopicState> {
        let mut topics = self.inner.topics.lock().unwrap();
        Arc::clone(topics.entry(topic.to_string()).or_insert_with(|| {
            Arc::new(TopicState {
                partitions: (0..self.inner.partitions_per_topic)
                    .map(|_| Arc::new(PartitionState::new()))
                    .collect(),
            })
        }))
    }

    fn append(&self, topic: &str, key: &str, payload: Vec<u8>) {
        let state = self.topic_state(topic);
        let index = (fnv1a(key) % state.partitions.len() as u64) as usize;
        let partition = &state.partitions[index];
        let mut log = partition.log.lock().unwrap();
        log.records.push_back(StoredRecord {
            key: key.to_string(),
            payload,
        });
        if log.records.len() > PARTITION_RETENTION {
            log.records.pop_front();
            log.base_offset += 1;
        }
    }
}

impl Default for PartitionedBus {
    fn default() -> Self {
        Self::new(DEFAULT_PARTITIONS)
    }
}

#[async_trait::async_trait]
impl TopicBus for PartitionedBus {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<()> {
        self.append(topic, key, payload);
        Ok(())
    }

    async fn subscribe(&self, group: &str, topic: &str) -> Result<TopicStream> {
        let state = self.topic_state(topic);
        let committed = {
            let offsets = self.inner.offsets.lock().unwrap();
            offsets
                .get(&(group.to_string(), topic.to_string()))
                .cloned()
        };
        let cursors: Vec<u64> = match committed {
            Some(cursors) if cursors.len() == state.partitions.len() => cursors,
            _ => state.partitions.iter().map(|p| p.tail()).collect(),
        };

        let (record_tx, record_rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        let (commit_tx, commit_rx) = mpsc::unbounded_channel();
        let pump = Pump {
            topic: topic.to_string(),
            group: group.to_string(),
            partitions: state.partitions.clone(),
            committed: cursors.clone(),
            cursors,
            inner: Arc::clone(&self.inner),
            record_tx,
            commit_rx,
            dirty: false,
            last_flush: Instant::now(),
        };
        tokio::spawn(pump.run());

        debug!(group, topic, "consumer joined topic");
        Ok(TopicStream {
            topic: topic.to_string(),
            group: group.to_string(),
            receiver: record_rx,
            commit_tx,
        })
    }
}

/// Handle to one consumer-group membership on one topic.
pub struct TopicStream {
    pub topic: String,
    pub group: String,
    receiver: mpsc::Receiver<Record>,
    commit_tx: mpsc::UnboundedSender<(usize, u64)>,
}

impl TopicStream {
    pub async fn next(&mut self) -> Option<Record> {
        self.receiver.recv().await
    }

    /// Mark `record` processed. Offsets are flushed to the bus on a 1 s
    /// cadence, not per record.
    pub fn commit(&self, record: &Record) {
        let _ = self.commit_tx.send((record.partition, record.offset + 1));
    }
}

struct Pump {
    topic: String,
    group: String,
    partitions: Vec<Arc<PartitionState>>,
    cursors: Vec<u64>,
    committed: Vec<u64>,
    inner: Arc<BusInner>,
    record_tx: mpsc::Sender<Record>,
    commit_rx: mpsc::UnboundedReceiver<(usize, u64)>,
    dirty: bool,
    last_flush: Instant,
}

impl Pump {
    async fn run(mut self) {
        loop {
            while let Ok((partition, next)) = self.commit_rx.try_recv() {
                self.record_commit(partition, next);
            }

            let mut delivered = false;
            for index in 0..self.partitions.len() {
                let batch = self.fetch(index);
                for record in batch {
                    let next = record.offset + 1;
                    if self.record_tx.send(record).await.is_err() {
                        self.drain_commits();
                        self.flush_offsets();
                        return;
                    }
                    self.cursors[index] = next;
                    delivered = true;
                }
            }

            if self.last_flush.elapsed() >= CONSUMER_COMMIT_INTERVAL {
                self.flush_offsets();
            }

            if !delivered {
                tokio::select! {
                    _ = sleep(FETCH_POLL_INTERVAL) => {}
                    maybe = self.commit_rx.recv() => match maybe {
                        Some((partition, next)) => self.record_commit(partition, next),
                        None => {
                            self.flush_offsets();
                            return;
                        }
                    }
                }
            }
        }
    }

    fn fetch(&mut self, index: usize) -> Vec<Record> {
        let partition = Arc::clone(&self.partitions[index]);
        let log = partition.log.lock().unwrap();
        if self.cursors[index] < log.base_offset {
            warn!(
                topic = %self.topic,
                group = %self.group,
                partition = index,
                "consumer fell behind retention, snapping to oldest record"
            );
            self.cursors[index] = log.base_offset;
        }
        let start = (self.cursors[index] - log.base_offset) as usize;
        log.records
            .iter()
            .skip(start)
            .enumerate()
            .map(|(i, stored)| Record {
                topic: self.topic.clone(),
                partition: index,
                offset: self.cursors[index] + i as u64,
                key: stored.key.clone(),
                payload: stored.payload.clone(),
            })
            .collect()
    }

    fn drain_commits(&mut self) {
        while let Ok((partition, next)) = self.commit_rx.try_recv() {
            self.record_commit(partition, next);
        }
    }

    fn record_commit(&mut self, partition: usize, next: u64) {
        if partition < self.committed.len() && next > self.committed[partition] {
            self.committed[partition] = next;
            self.dirty = true;
        }
    }

    fn flush_offsets(&mut self) {
        self.last_flush = Instant::now();
        if !self.dirty {
            return;
        }
        let mut offsets = self.inner.offsets.lock().unwrap();
        offsets.insert(
            (self.group.clone(), self.topic.clone()),
            self.committed.clone(),
        );
        self.dirty = false;
    }
}
