//! Subscription fan-out hub: upgrades client sockets, tracks channel
//! subscriptions, and bridges the ephemeral pub/sub bus to clients with
//! per-client backpressure.

pub mod broadcaster;
pub mod hub;
pub mod protocol;
pub mod server;
pub mod service;
pub mod session;
pub mod subscription;

pub use broadcaster::Broadcaster;
pub use hub::{ClientHandle, ClientId, Hub, HubHandle};
pub use server::GatewayState;
pub use service::GatewayService;
pub use subscription::SubscriptionManager;
