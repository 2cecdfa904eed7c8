//! Node configuration: section types, file loading (JSON or TOML by
//! extension) and `MDS_*` environment overrides.

use std::path::Path;

use anyhow::{Context, Result};
use mds_core::consts::{
    DEFAULT_PARTITIONS, TOPIC_MARKET_DEPTH, TOPIC_MARKET_KLINE, TOPIC_MARKET_TICKER,
    TOPIC_MARKET_TRADE,
};
use mds_core::SymbolConfig;
use mds_feed::{ExchangeSection, HybridSection};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    Collector,
    Processor,
    Gateway,
    AllInOne,
}

impl Default for NodeRole {
    fn default() -> Self {
        NodeRole::AllInOne
    }
}

impl NodeRole {
    fn from_str_lossy(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "collector" => NodeRole::Collector,
            "processor" => NodeRole::Processor,
            "gateway" => NodeRole::Gateway,
            _ => NodeRole::AllInOne,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    pub name: String,
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            name: "mds-node".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KafkaTopics {
    pub ticker: String,
    pub depth: String,
    pub trade: String,
    pub kline: String,
}

impl Default for KafkaTopics {
    fn default() -> Self {
        Self {
            ticker: TOPIC_MARKET_TICKER.to_string(),
            depth: TOPIC_MARKET_DEPTH.to_string(),
            trade: TOPIC_MARKET_TRADE.to_string(),
            kline: TOPIC_MARKET_KLINE.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KafkaConsumer {
    pub group: String,
}

impl Default for KafkaConsumer {
    fn default() -> Self {
        Self {
            group: "market-processor".to_string(),
        }
    }
}

/// Broker settings. Brokers are the external deployment surface; the
/// in-process bus consumes the partition count and consumer group.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KafkaSection {
    pub brokers: Vec<String>,
    #[serde(default)]
    pub topics: KafkaTopics,
    #[serde(default)]
    pub consumer: KafkaConsumer,
    #[serde(default = "default_partitions")]
    pub partitions: usize,
}

fn default_partitions() -> usize {
    DEFAULT_PARTITIONS
}

impl Default for KafkaSection {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            topics: KafkaTopics::default(),
            consumer: KafkaConsumer::default(),
            partitions: DEFAULT_PARTITIONS,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RedisSection {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub db: i64,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_pool_size() -> usize {
    100
}

impl Default for RedisSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: String::new(),
            db: 0,
            pool_size: default_pool_size(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GatewaySection {
    pub bind: String,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogSection {
    pub level: String,
    #[serde(default)]
    pub format: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub role: NodeRole,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub exchanges: Vec<ExchangeSection>,
    #[serde(default)]
    pub symbol_configs: Vec<SymbolConfig>,
    #[serde(default)]
    pub kafka: KafkaSection,
    #[serde(default)]
    pub redis: RedisSection,
    #[serde(default)]
    pub hybrid_mode: HybridSection,
    #[serde(default)]
    pub gateway: GatewaySection,
    #[serde(default)]
    pub log: LogSection,
}

impl AppConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let mut config: AppConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents).context("parsing JSON config")?,
            _ => toml::from_str(&contents).context("parsing TOML config")?,
        };
        apply_env_overrides(&mut config);
        Ok(config)
    }
}

fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(level) = std::env::var("MDS_LOG_LEVEL") {
        config.log.level = level;
    }
    if let Ok(role) = std::env::var("MDS_NODE_ROLE") {
        config.role = NodeRole::from_str_lossy(&role);
    }
    if let Ok(bind) = std::env::var("MDS_GATEWAY_BIND") {
        config.gateway.bind = bind;
    }
    if let Ok(host) = std::env::var("MDS_REDIS_HOST") {
        config.redis.host = host;
    }
    if let Ok(group) = std::env::var("MDS_CONSUMER_GROUP") {
        config.kafka.consumer.group = group;
    }
}
