use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("adapter not connected")]
    NotConnected,
    #[error("unsupported channel: {0}")]
    UnsupportedChannel(String),
    #[error("malformed venue frame: {0}")]
    Parse(String),
    #[error("no pong for {0:?}, session considered dead")]
    HeartbeatTimeout(Duration),
    #[error("gave up after {0} reconnect attempts")]
    GaveUp(usize),
}
