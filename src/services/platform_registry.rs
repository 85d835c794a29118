// Platform Registry
// Ingest endpoints and output shaping per streaming service

use crate::models::{Orientation, StreamingService};
use std::collections::HashMap;
use std::sync::OnceLock;

static REGISTRY: OnceLock<PlatformRegistry> = OnceLock::new();

/// Service-specific ingest configuration
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// Display name
    pub name: &'static str,

    /// Ingest server for horizontal (and square) output
    pub default_server: &'static str,

    /// Dedicated ingest server for vertical output, if the service has one
    pub vertical_server: Option<&'static str>,
}

impl PlatformConfig {
    /// Ingest server for the given target orientation
    pub fn server_for(&self, orientation: Orientation) -> &'static str {
        match (orientation.resolved(), self.vertical_server) {
            (Orientation::Vertical, Some(vertical)) => vertical,
            _ => self.default_server,
        }
    }
}

/// Lookup table of streaming services
pub struct PlatformRegistry {
    configs: HashMap<StreamingService, PlatformConfig>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        let entries = [
            (StreamingService::Custom, "Custom", "", None),
            (StreamingService::Twitch, "Twitch", "rtmp://live.twitch.tv/app", None),
            (StreamingService::Youtube, "YouTube", "rtmp://a.rtmp.youtube.com/live2", None),
            (
                StreamingService::Facebook,
                "Facebook",
                "rtmps://live-api-s.facebook.com:443/rtmp",
                None,
            ),
            (StreamingService::Kick, "Kick", "rtmp://stream.kick.com/app", None),
            (
                StreamingService::Tiktok,
                "TikTok",
                "rtmp://live.tiktok.com/live/horizontal",
                Some("rtmp://live.tiktok.com/live"),
            ),
            (
                StreamingService::Instagram,
                "Instagram",
                "rtmps://live-upload.instagram.com:443/rtmp",
                None,
            ),
            (StreamingService::XTwitter, "X (Twitter)", "rtmp://ingest.pscp.tv:80/x", None),
        ];

        let configs = entries
            .into_iter()
            .map(|(service, name, default_server, vertical_server)| {
                (
                    service,
                    PlatformConfig {
                        name,
                        default_server,
                        vertical_server,
                    },
                )
            })
            .collect();

        Self { configs }
    }

    /// Shared registry instance
    pub fn global() -> &'static PlatformRegistry {
        REGISTRY.get_or_init(PlatformRegistry::new)
    }

    pub fn get(&self, service: StreamingService) -> Option<&PlatformConfig> {
        self.configs.get(&service)
    }

    pub fn display_name(&self, service: StreamingService) -> &'static str {
        self.get(service).map(|config| config.name).unwrap_or("Unknown")
    }

    /// Ingest server URL for a service and orientation (empty for custom)
    pub fn ingest_url(&self, service: StreamingService, orientation: Orientation) -> &'static str {
        self.get(service)
            .map(|config| config.server_for(orientation))
            .unwrap_or("")
    }

    /// Complete publish URL. Custom destinations carry their full URL in
    /// the stream key field.
    pub fn build_output_url(
        &self,
        service: StreamingService,
        orientation: Orientation,
        stream_key: &str,
    ) -> String {
        let server = self.ingest_url(service, orientation);
        if server.is_empty() {
            return stream_key.to_string();
        }
        format!("{}/{}", server.trim_end_matches('/'), stream_key)
    }

    /// Redact stream key from URL for logging
    pub fn redact_url(url: &str) -> String {
        if !(url.starts_with("rtmp://") || url.starts_with("rtmps://")) {
            return url.to_string();
        }

        let (scheme, rest) = match url.split_once("://") {
            Some(parts) => parts,
            None => return url.to_string(),
        };

        let (host, path) = match rest.split_once('/') {
            Some(parts) => parts,
            None => return url.to_string(),
        };

        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.len() < 2 {
            return url.to_string();
        }

        let safe_path = segments[..segments.len() - 1].join("/");
        format!("{scheme}://{host}/{safe_path}/***")
    }

    /// Video filter converting the source layout to the target layout.
    /// Returns None when no conversion is needed.
    pub fn video_filter(source: Orientation, target: Orientation) -> Option<&'static str> {
        // Auto target follows the source
        if target == Orientation::Auto {
            return None;
        }

        match (source.resolved(), target) {
            (from, to) if from == to => None,
            (_, Orientation::Square) => Some("scale=1080:1080,setsar=1"),
            (Orientation::Horizontal, Orientation::Vertical) => Some("crop=ih*9/16:ih,scale=1080:1920"),
            (Orientation::Vertical, Orientation::Horizontal) => Some("crop=iw:iw*9/16,scale=1920:1080"),
            (Orientation::Square, Orientation::Horizontal) => Some("scale=1920:1080,setsar=1"),
            (Orientation::Square, Orientation::Vertical) => Some("scale=1080:1920,setsar=1"),
            _ => None,
        }
    }
}

impl Default for PlatformRegistry {
    fn default() -> Self {
        Self::new()
    }
}
