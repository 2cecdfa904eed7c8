//! Node entrypoint: loads configuration, builds the shared transports and
//! store, and runs the services for the configured role.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use mds_bus::{LocalPubSub, PartitionedBus, Producer, PubSub, TopicBus};
use mds_config::{AppConfig, NodeRole};
use mds_feed::CollectorService;
use mds_gateway::GatewayService;
use mds_proc::ProcessorService;
use mds_service::Service;
use mds_store::{MarketStore, MemoryStore};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::var("MDS_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config/config.json"));
    let config = match AppConfig::from_file(&config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!(
                "failed to load config from {}: {err:#}; using defaults",
                config_path.display()
            );
            AppConfig::default()
        }
    };
    init_tracing(&config.log.level);
    info!(path = %config_path.display(), role = ?config.role, "node configured");

    let bus: Arc<dyn TopicBus> = Arc::new(PartitionedBus::new(config.kafka.partitions));
    let pubsub: Arc<dyn PubSub> = Arc::new(LocalPubSub::new());
    let store = Arc::new(MemoryStore::new());

    let mut services: Vec<Arc<dyn Service>> = Vec::new();
    if matches!(config.role, NodeRole::Processor | NodeRole::AllInOne) {
        services.push(Arc::new(ProcessorService::new(
            "processor".to_string(),
            Arc::clone(&bus),
            Arc::clone(&store) as Arc<dyn MarketStore>,
            Arc::clone(&pubsub),
            config.kafka.consumer.group.clone(),
        )));
    }
    if matches!(config.role, NodeRole::Gateway | NodeRole::AllInOne) {
        services.push(Arc::new(GatewayService::new(
            "gateway".to_string(),
            config.gateway.bind.clone(),
            Arc::clone(&store) as Arc<dyn MarketStore>,
            Arc::clone(&pubsub),
        )));
    }
    if matches!(config.role, NodeRole::Collector | NodeRole::AllInOne) {
        services.push(Arc::new(CollectorService::new(
            "collector".to_string(),
            config.exchanges.clone(),
            config.hybrid_mode.clone(),
            config.symbol_configs.clone(),
            Producer::new(Arc::clone(&bus)),
        )));
    }

    for service in &services {
        info!(service = %service.id(), "starting service");
        service.start().await?;
    }

    // Hot-store housekeeping: lazily-expired keys get swept on a timer.
    let sweeper = Arc::clone(&store);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            sweeper.purge_expired();
        }
    });

    info!("mds node online");
    signal::ctrl_c().await?;
    info!("shutdown signal received");
    for service in services.iter().rev() {
        if let Err(err) = service.stop().await {
            warn!(service = %service.id(), ?err, "service stop failed");
        }
    }
    Ok(())
}
