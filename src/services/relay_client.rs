// Relay Client
// Boundary to the remote relay control plane

use serde::Serialize;
use thiserror::Error;
use crate::models::{Channel, EncodingSettings};
use crate::services::PlatformRegistry;

/// Errors from the relay control plane
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Relay returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Channel is not running on the relay")]
    NotActive,
}

pub type RelayResult<T> = Result<T, RelayError>;

/// One physical output as the relay sees it
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputSpec {
    pub output_id: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_filter: Option<String>,
    pub encoding: EncodingSettings,
}

/// An output addressed inside a running relay process
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTarget {
    pub process_reference: String,
    pub output: OutputSpec,
}

/// Request to start a relay process for a channel
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStartRequest {
    pub channel_id: String,
    pub name: String,
    pub input_url: String,
    pub outputs: Vec<OutputSpec>,
}

/// Latest health observation for one output
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OutputHealth {
    pub connected: bool,
    pub bitrate_kbps: u32,
    pub dropped_frames: u64,
}

/// Commands the failover engine and channel manager need from the relay.
///
/// Calls are blocking; run them off latency-sensitive threads.
pub trait RelayClient: Send + Sync {
    /// Start a relay process, returning its reference
    fn start_channel(&self, request: &ChannelStartRequest) -> RelayResult<String>;

    fn stop_channel(&self, process_reference: &str) -> RelayResult<()>;

    /// Attach (enabled) or detach (disabled) a physical output
    fn set_output_enabled(&self, target: &OutputTarget, enabled: bool) -> RelayResult<()>;

    fn update_output_encoding(&self, target: &OutputTarget) -> RelayResult<()>;

    /// Health of an output attached to the running process. A detached
    /// output reports disconnected.
    fn output_health(&self, target: &OutputTarget) -> RelayResult<OutputHealth>;

    /// Whether a detached output could stream again if re-attached. Used for
    /// primaries that were taken down by a failover.
    fn probe_output(&self, target: &OutputTarget) -> RelayResult<OutputHealth>;
}

/// Describe the destination at `index` as a relay output.
/// Positions are resolved at call time so ids stay the source of truth.
pub fn output_spec(channel: &Channel, index: usize) -> Option<OutputSpec> {
    let dest = channel.destination(index)?;
    let url = PlatformRegistry::global().build_output_url(
        dest.service,
        dest.target_orientation,
        dest.stream_key.as_str(),
    );
    let video_filter =
        PlatformRegistry::video_filter(channel.source_orientation, dest.target_orientation)
            .map(str::to_string);

    Some(OutputSpec {
        output_id: dest.output_id(),
        url,
        video_filter,
        encoding: dest.encoding,
    })
}

/// Address the destination at `index` inside the channel's running process
pub fn output_target(channel: &Channel, index: usize) -> RelayResult<OutputTarget> {
    let process_reference = channel
        .process_reference
        .clone()
        .ok_or(RelayError::NotActive)?;
    let output = output_spec(channel, index)
        .ok_or_else(|| RelayError::NotFound(format!("destination {index}")))?;
    Ok(OutputTarget {
        process_reference,
        output,
    })
}
