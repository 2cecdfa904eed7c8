use anyhow::Result;

pub type ServiceId = String;

/// Lifecycle contract implemented by every long-lived MDS component
/// (collector, processor, gateway). The node binary starts them in
/// dependency order and stops them in reverse.
#[async_trait::async_trait]
pub trait Service: Send + Sync {
    fn id(&self) -> &ServiceId;
    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
    async fn health_check(&self) -> Result<()>;
}
