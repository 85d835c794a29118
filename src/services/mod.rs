// SpiritStream Failover Services
// Relay integration, failover policy, persistence and logging

mod relay_client;
mod http_relay_client;
mod platform_registry;
mod failover_engine;
mod channel_manager;
mod channel_store;
mod health_monitor;
mod encryption;
mod settings_manager;
mod log_manager;
mod events;

pub use relay_client::*;
pub use http_relay_client::*;
pub use platform_registry::*;
pub use failover_engine::*;
pub use channel_manager::*;
pub use channel_store::*;
pub use health_monitor::*;
pub use encryption::*;
pub use settings_manager::*;
pub use log_manager::*;
pub use events::*;
