//! Collector service: builds the configured adapters, routes every record
//! through the fusion engine, and publishes survivors onto the topic bus.

use std::sync::{Arc, Mutex as StdMutex};

use anyhow::Result;
use mds_bus::Producer;
use mds_core::consts::{topic_for, EXCHANGE_INTERNAL};
use mds_core::{DataKind, SymbolConfig};
use mds_fusion::DataMerger;
use mds_service::{Service, ServiceId};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::adapter::{AdapterFactory, ExchangeAdapter};

fn default_true() -> bool {
    true
}

fn default_internal_port() -> u16 {
    crate::InternalAdapter::DEFAULT_PORT
}

fn default_freshness_ms() -> i64 {
    mds_core::consts::DATA_FRESHNESS_THRESHOLD_MS
}

fn default_deviation_pct() -> f64 {
    mds_core::consts::PRICE_DEVIATION_LIMIT_PCT
}

/// One upstream source from the `exchanges` config section.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExchangeSection {
    pub name: String,
    #[serde(default)]
    pub ws_url: String,
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub channels: Vec<DataKind>,
    #[serde(default = "default_true")]
    pub enable: bool,
}

/// The `hybrid_mode` config section.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HybridSection {
    #[serde(default)]
    pub enable: bool,
    #[serde(default = "default_internal_port")]
    pub internal_port: u16,
    #[serde(default = "default_freshness_ms")]
    pub data_freshness_threshold: i64,
    #[serde(default = "default_deviation_pct")]
    pub price_deviation_limit: f64,
}

impl Default for HybridSection {
    fn default() -> Self {
        Self {
            enable: false,
            internal_port: default_internal_port(),
            data_freshness_threshold: default_freshness_ms(),
            price_deviation_limit: default_deviation_pct(),
        }
    }
}

pub struct CollectorService {
    id: ServiceId,
    factory: AdapterFactory,
    exchanges: Vec<ExchangeSection>,
    hybrid: HybridSection,
    merger: Arc<DataMerger>,
    producer: Producer,
    adapters: StdMutex<Vec<Arc<dyn ExchangeAdapter>>>,
}

impl CollectorService {
    pub fn new(
        id: ServiceId,
        exchanges: Vec<ExchangeSection>,
        hybrid: HybridSection,
        symbol_configs: Vec<SymbolConfig>,
        producer: Producer,
    ) -> Self {
        Self::with_factory(
            id,
            AdapterFactory::with_defaults(),
            exchanges,
            hybrid,
            symbol_configs,
            producer,
        )
    }

    /// Build against an explicit adapter registry.
    pub fn with_factory(
        id: ServiceId,
        factory: AdapterFactory,
        exchanges: Vec<ExchangeSection>,
        hybrid: HybridSection,
        symbol_configs: Vec<SymbolConfig>,
        producer: Producer,
    ) -> Self {
        Self {
            id,
            factory,
            exchanges,
            hybrid,
            merger: Arc::new(DataMerger::new(symbol_configs)),
            producer,
            adapters: StdMutex::new(Vec::new()),
        }
    }

    pub fn merger(&self) -> Arc<DataMerger> {
        Arc::clone(&self.merger)
    }

    async fn start_adapters(&self) -> Result<()> {
        for section in &self.exchanges {
            if !section.enable {
                info!(exchange = %section.name, "disabled, skipping");
                continue;
            }
            if section.name == EXCHANGE_INTERNAL && !self.hybrid.enable {
                info!("hybrid mode disabled, skipping internal receiver");
                continue;
            }
            let ws_url = if section.name == EXCHANGE_INTERNAL && section.ws_url.is_empty() {
                format!(":{}", self.hybrid.internal_port)
            } else {
                section.ws_url.clone()
            };
            let Some(adapter) = self.factory.create(&section.name, &ws_url) else {
                warn!(exchange = %section.name, "no adapter registered, skipping");
                continue;
            };

            let merger = Arc::clone(&self.merger);
            let producer = self.producer.clone();
            adapter.on_message(Arc::new(move |record| {
                let Some(out) = merger.process(record) else {
                    return;
                };
                let topic = topic_for(out.kind());
                match serde_json::to_vec(&out) {
                    Ok(payload) => producer.publish(topic, &out.symbol, payload),
                    Err(err) => error!(?err, "failed to serialize record"),
                }
            }));

            if let Err(err) = adapter.connect().await {
                warn!(exchange = %section.name, %err, "failed to connect");
                continue;
            }
            if let Err(err) = adapter.subscribe(&section.symbols, &section.channels).await {
                warn!(exchange = %section.name, %err, "failed to subscribe");
            }
            info!(exchange = %section.name, "adapter started");
            self.adapters.lock().unwrap().push(adapter);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Service for CollectorService {
    fn id(&self) -> &ServiceId {
        &self.id
    }

    async fn start(&self) -> Result<()> {
        info!("starting collector");
        self.start_adapters().await
    }

    async fn stop(&self) -> Result<()> {
        let adapters: Vec<Arc<dyn ExchangeAdapter>> =
            self.adapters.lock().unwrap().drain(..).collect();
        for adapter in adapters {
            adapter.close().await;
        }
        self.producer.flush().await;
        info!("collector stopped");
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        let adapters = self.adapters.lock().unwrap();
        if adapters.is_empty() {
            anyhow::bail!("no adapters running");
        }
        if adapters.iter().any(|adapter| adapter.is_connected()) {
            Ok(())
        } else {
            anyhow::bail!("all adapters disconnected")
        }
    }
}
