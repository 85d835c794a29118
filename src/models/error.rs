// Error Types
// Failures surfaced by channel and failover operations

use thiserror::Error;

use crate::services::RelayError;

/// Errors from channel CRUD and failover operations.
///
/// Every variant is returned before any state is mutated, except `Relay`
/// from lifecycle calls which may leave the channel in `Error` status.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Destination index {index} out of range (channel has {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("A destination cannot be its own backup")]
    SelfBackup,

    #[error("Destination {index} has no backup configured")]
    NoBackup { index: usize },

    #[error("Invalid backup linkage: {0}")]
    InvalidLinkage(String),

    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("No relay client configured")]
    NoRelayClient,

    #[error("Channel has no enabled destinations")]
    NoEnabledDestinations,

    #[error("Relay command failed: {0}")]
    Relay(#[from] RelayError),
}

pub type ChannelResult<T> = Result<T, ChannelError>;
