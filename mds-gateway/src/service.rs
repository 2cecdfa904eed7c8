//! Gateway service wrapper: owns the hub task, the pub/sub bridge and the
//! actix server lifecycle.

use std::sync::{Arc, Mutex as StdMutex};

use actix_web::dev::ServerHandle;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use mds_bus::PubSub;
use mds_service::{Service, ServiceId};
use mds_store::MarketStore;
use tokio::sync::{oneshot, Mutex};
use tracing::info;

use crate::broadcaster::Broadcaster;
use crate::hub::{Hub, HubHandle};
use crate::server::{routes, GatewayState};

pub struct GatewayService {
    id: ServiceId,
    bind: String,
    store: Arc<dyn MarketStore>,
    pubsub: Arc<dyn PubSub>,
    hub: StdMutex<Option<Hub>>,
    handle: HubHandle,
    server: Mutex<Option<ServerHandle>>,
}

impl GatewayService {
    pub fn new(
        id: ServiceId,
        bind: impl Into<String>,
        store: Arc<dyn MarketStore>,
        pubsub: Arc<dyn PubSub>,
    ) -> Self {
        let (hub, handle) = Hub::new();
        Self {
            id,
            bind: bind.into(),
            store,
            pubsub,
            hub: StdMutex::new(Some(hub)),
            handle,
            server: Mutex::new(None),
        }
    }

    pub fn hub(&self) -> HubHandle {
        self.handle.clone()
    }
}

#[async_trait::async_trait]
impl Service for GatewayService {
    fn id(&self) -> &ServiceId {
        &self.id
    }

    async fn start(&self) -> Result<()> {
        if let Some(hub) = self.hub.lock().unwrap().take() {
            tokio::spawn(hub.run());
        }
        let broadcaster = Broadcaster::new(self.handle.clone(), Arc::clone(&self.pubsub));
        tokio::spawn(broadcaster.run());

        let state = GatewayState {
            hub: self.handle.clone(),
            store: Arc::clone(&self.store),
        };
        let bind = self.bind.clone();
        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::task::spawn_blocking(move || {
            actix_rt::System::new().block_on(async move {
                let bound = HttpServer::new(move || {
                    App::new()
                        .app_data(web::Data::new(state.clone()))
                        .configure(routes)
                })
                .disable_signals()
                .bind(&bind);
                match bound {
                    Ok(server) => {
                        let server = server.run();
                        let _ = ready_tx.send(Ok(server.handle()));
                        let _ = server.await;
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                    }
                }
            });
        });

        match ready_rx.await {
            Ok(Ok(handle)) => {
                *self.server.lock().await = Some(handle);
                info!(bind = %self.bind, "gateway listening");
                Ok(())
            }
            Ok(Err(err)) => Err(err.into()),
            Err(_) => anyhow::bail!("gateway server failed to start"),
        }
    }

    async fn stop(&self) -> Result<()> {
        if let Some(handle) = self.server.lock().await.take() {
            handle.stop(true).await;
        }
        self.handle.stop().await;
        info!("gateway stopped");
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        if self.server.lock().await.is_some() {
            Ok(())
        } else {
            anyhow::bail!("gateway not started")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::ClientHandle;
    use mds_bus::LocalPubSub;
    use mds_store::MemoryStore;
    use tokio::sync::{mpsc, Notify};
    use tokio::time::{sleep, timeout, Duration};
    use uuid::Uuid;

    fn service_on(bind: &str, pubsub: Arc<LocalPubSub>) -> GatewayService {
        GatewayService::new(
            "gateway".to_string(),
            bind,
            Arc::new(MemoryStore::new()),
            pubsub,
        )
    }

    #[tokio::test]
    async fn start_health_stop_lifecycle() {
        let pubsub = Arc::new(LocalPubSub::new());
        let service = service_on("127.0.0.1:0", Arc::clone(&pubsub));
        assert!(service.health_check().await.is_err());

        service.start().await.unwrap();
        service.health_check().await.unwrap();
        assert_eq!(service.id(), "gateway");

        // The hub and pub/sub bridge spun up by start() are live: a client
        // registered through the service handle receives bus traffic.
        let (frames_tx, mut frames_rx) = mpsc::channel(16);
        let id = Uuid::new_v4();
        service
            .hub()
            .register(
                id,
                ClientHandle {
                    frames: frames_tx,
                    kill: Arc::new(Notify::new()),
                },
            )
            .await;
        service.hub().subscriptions.subscribe(id, "ticker:BTCUSDT");
        // Give the bridge a beat to establish its pattern subscription.
        sleep(Duration::from_millis(20)).await;
        pubsub
            .publish(
                "market:ticker:BTCUSDT",
                serde_json::to_vec(&serde_json::json!({"last_price": 45000.0})).unwrap(),
            )
            .await
            .unwrap();
        let frame = timeout(Duration::from_secs(1), frames_rx.recv())
            .await
            .expect("no frame from bridge")
            .unwrap();
        assert_eq!(frame["channel"], "ticker:BTCUSDT");

        service.stop().await.unwrap();
        assert!(service.health_check().await.is_err());
    }

    #[tokio::test]
    async fn start_surfaces_bind_failures() {
        // Hold the port so the gateway's bind collides.
        let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = blocker.local_addr().unwrap();
        let service = service_on(&addr.to_string(), Arc::new(LocalPubSub::new()));
        assert!(service.start().await.is_err());
        assert!(service.health_check().await.is_err());
    }
}
