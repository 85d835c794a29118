// Destination Model
// One streaming target inside a channel

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Streaming service a destination publishes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamingService {
    /// User-supplied ingest URL (stored in the stream key field)
    #[default]
    Custom,
    Twitch,
    Youtube,
    Facebook,
    Kick,
    Tiktok,
    Instagram,
    #[serde(rename = "x")]
    XTwitter,
}

impl StreamingService {
    pub const ALL: [StreamingService; 8] = [
        StreamingService::Custom,
        StreamingService::Twitch,
        StreamingService::Youtube,
        StreamingService::Facebook,
        StreamingService::Kick,
        StreamingService::Tiktok,
        StreamingService::Instagram,
        StreamingService::XTwitter,
    ];

    /// Lowercase identifier used in output ids and persisted JSON
    pub fn slug(&self) -> &'static str {
        match self {
            StreamingService::Custom => "custom",
            StreamingService::Twitch => "twitch",
            StreamingService::Youtube => "youtube",
            StreamingService::Facebook => "facebook",
            StreamingService::Kick => "kick",
            StreamingService::Tiktok => "tiktok",
            StreamingService::Instagram => "instagram",
            StreamingService::XTwitter => "x",
        }
    }
}

/// Video orientation of a source or a destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    /// Follow the source orientation
    #[default]
    Auto,
    Horizontal,
    Vertical,
    Square,
}

/// Aspect ratios within this distance of 1.0 count as square
const SQUARE_TOLERANCE: f64 = 0.05;

impl Orientation {
    /// Detect orientation from frame dimensions.
    /// Zero dimensions yield `Auto` (unknown).
    pub fn detect(width: u32, height: u32) -> Orientation {
        if width == 0 || height == 0 {
            return Orientation::Auto;
        }

        let aspect = f64::from(width) / f64::from(height);
        if (aspect - 1.0).abs() <= SQUARE_TOLERANCE {
            Orientation::Square
        } else if width > height {
            Orientation::Horizontal
        } else {
            Orientation::Vertical
        }
    }

    /// Orientation used when a concrete layout is required
    pub fn resolved(self) -> Orientation {
        match self {
            Orientation::Auto => Orientation::Horizontal,
            other => other,
        }
    }
}

/// Per-destination encoding parameters.
/// Zero values mean "use the source value".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EncodingSettings {
    pub width: u32,
    pub height: u32,

    /// Video bitrate in kbps
    pub bitrate: u32,

    pub fps_num: u32,
    pub fps_den: u32,

    /// Audio bitrate in kbps
    pub audio_bitrate: u32,

    /// Audio track index (1-6), 0 for the default track
    pub audio_track: u32,

    /// Upper bound in kbps for adaptive bitrate, 0 for unlimited
    pub max_bandwidth: u32,

    pub low_latency: bool,
}

impl EncodingSettings {
    /// True when every parameter defers to the source (stream copy)
    pub fn is_passthrough(&self) -> bool {
        *self == EncodingSettings::default()
    }

    /// Frame rate as a float, None when it follows the source
    pub fn fps(&self) -> Option<f64> {
        if self.fps_num == 0 || self.fps_den == 0 {
            None
        } else {
            Some(f64::from(self.fps_num) / f64::from(self.fps_den))
        }
    }
}

/// Secret stream key, wiped from memory when dropped
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct StreamKey(String);

impl StreamKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            f.write_str("StreamKey(\"\")")
        } else {
            f.write_str("StreamKey(***)")
        }
    }
}

impl From<&str> for StreamKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for StreamKey {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

fn default_enabled() -> bool {
    true
}

/// A configured streaming target.
///
/// Backup linkage is stored by destination id (`primary_id` on the backup,
/// `backup_id` on the primary) so removing or reordering destinations never
/// leaves a pointer aimed at the wrong entry. Only the channel and the
/// failover engine may change linkage or failover state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    pub id: String,
    pub service: StreamingService,
    pub stream_key: StreamKey,

    #[serde(default)]
    pub target_orientation: Orientation,

    #[serde(default)]
    pub encoding: EncodingSettings,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Last known link state reported by the relay
    #[serde(skip)]
    pub connected: bool,

    /// Sequential failed health observations, reset by any success
    #[serde(skip)]
    pub consecutive_failures: u32,

    #[serde(skip)]
    pub last_health_check: Option<DateTime<Utc>>,

    /// Set on a backup: the destination it stands in for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) primary_id: Option<String>,

    /// Set on a primary: its configured backup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) backup_id: Option<String>,

    /// Enabled flag a backup had before it was linked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) pre_link_enabled: Option<bool>,

    #[serde(skip)]
    pub(crate) failover_active: bool,

    #[serde(skip)]
    pub(crate) failover_start_time: Option<DateTime<Utc>>,
}

impl Destination {
    pub fn new(
        service: StreamingService,
        stream_key: impl Into<StreamKey>,
        target_orientation: Orientation,
        encoding: EncodingSettings,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            service,
            stream_key: stream_key.into(),
            target_orientation,
            encoding,
            enabled: true,
            connected: false,
            consecutive_failures: 0,
            last_health_check: None,
            primary_id: None,
            backup_id: None,
            pre_link_enabled: None,
            failover_active: false,
            failover_start_time: None,
        }
    }

    /// True when this destination backs up another one
    pub fn is_backup(&self) -> bool {
        self.primary_id.is_some()
    }

    pub fn has_backup(&self) -> bool {
        self.backup_id.is_some()
    }

    pub fn primary_id(&self) -> Option<&str> {
        self.primary_id.as_deref()
    }

    pub fn backup_id(&self) -> Option<&str> {
        self.backup_id.as_deref()
    }

    pub fn failover_active(&self) -> bool {
        self.failover_active
    }

    /// Moment failover began; only meaningful while failover is active
    pub fn failover_start_time(&self) -> Option<DateTime<Utc>> {
        if self.failover_active {
            self.failover_start_time
        } else {
            None
        }
    }

    /// Output identifier used on the relay
    pub fn output_id(&self) -> String {
        format!("{}_{}", self.service.slug(), self.id)
    }

    /// Zero runtime health and failover state (used after load and on copy)
    pub(crate) fn reset_runtime_state(&mut self) {
        self.connected = false;
        self.consecutive_failures = 0;
        self.last_health_check = None;
        self.failover_active = false;
        self.failover_start_time = None;
    }

    pub(crate) fn clear_failover(&mut self) {
        self.failover_active = false;
        self.failover_start_time = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_destination_defaults() {
        let dest = Destination::new(
            StreamingService::Twitch,
            "live_abc",
            Orientation::Auto,
            EncodingSettings::default(),
        );
        assert!(dest.enabled);
        assert!(!dest.connected);
        assert_eq!(dest.consecutive_failures, 0);
        assert!(!dest.is_backup());
        assert!(!dest.has_backup());
        assert!(!dest.failover_active());
        assert!(dest.failover_start_time().is_none());
        assert!(!dest.id.is_empty());
    }

    #[test]
    fn test_stream_key_debug_is_redacted() {
        let key = StreamKey::new("super_secret");
        let printed = format!("{key:?}");
        assert!(!printed.contains("super_secret"));
        assert_eq!(printed, "StreamKey(***)");
    }

    #[test]
    fn test_runtime_fields_not_serialized() {
        let mut dest = Destination::new(
            StreamingService::Youtube,
            "key",
            Orientation::Horizontal,
            EncodingSettings::default(),
        );
        dest.connected = true;
        dest.consecutive_failures = 4;
        let json = serde_json::to_value(&dest).unwrap();
        assert!(json.get("connected").is_none());
        assert!(json.get("consecutiveFailures").is_none());
        assert!(json.get("failoverActive").is_none());
        assert_eq!(json["service"], "youtube");
        assert_eq!(json["streamKey"], "key");
    }

    #[test]
    fn test_orientation_detection() {
        assert_eq!(Orientation::detect(1920, 1080), Orientation::Horizontal);
        assert_eq!(Orientation::detect(1080, 1920), Orientation::Vertical);
        assert_eq!(Orientation::detect(1080, 1080), Orientation::Square);
        // 1040/1000 = 1.04, within tolerance
        assert_eq!(Orientation::detect(1040, 1000), Orientation::Square);
        assert_eq!(Orientation::detect(0, 1080), Orientation::Auto);
    }

    #[test]
    fn test_encoding_passthrough() {
        let mut encoding = EncodingSettings::default();
        assert!(encoding.is_passthrough());
        assert!(encoding.fps().is_none());
        encoding.fps_num = 60000;
        encoding.fps_den = 1001;
        assert!(!encoding.is_passthrough());
        let fps = encoding.fps().unwrap();
        assert!((fps - 59.94).abs() < 0.01);
    }

    #[test]
    fn test_x_service_serializes_as_x() {
        let json = serde_json::to_string(&StreamingService::XTwitter).unwrap();
        assert_eq!(json, "\"x\"");
        assert_eq!(StreamingService::XTwitter.slug(), "x");
    }
}
