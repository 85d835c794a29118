// Destination Template Model
// Built-in encoding presets for common platforms

use serde::{Deserialize, Serialize};
use crate::models::{EncodingSettings, Orientation, StreamingService};

/// Read-only destination preset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationTemplate {
    pub id: String,
    pub name: String,
    pub service: StreamingService,
    pub orientation: Orientation,
    pub encoding: EncodingSettings,
    pub is_builtin: bool,
}

fn builtin(
    id: &str,
    name: &str,
    service: StreamingService,
    orientation: Orientation,
    (width, height, fps): (u32, u32, u32),
    bitrate: u32,
) -> DestinationTemplate {
    DestinationTemplate {
        id: id.to_string(),
        name: name.to_string(),
        service,
        orientation,
        encoding: EncodingSettings {
            width,
            height,
            bitrate,
            fps_num: fps,
            fps_den: 1,
            audio_bitrate: 128,
            ..EncodingSettings::default()
        },
        is_builtin: true,
    }
}

/// Presets shipped with every channel manager
pub fn builtin_templates() -> Vec<DestinationTemplate> {
    use Orientation::*;
    use StreamingService::*;

    vec![
        builtin("builtin_youtube_1080p60", "YouTube 1080p60", Youtube, Horizontal, (1920, 1080, 60), 6000),
        builtin("builtin_youtube_720p60", "YouTube 720p60", Youtube, Horizontal, (1280, 720, 60), 4500),
        builtin("builtin_twitch_1080p60", "Twitch 1080p60", Twitch, Horizontal, (1920, 1080, 60), 6000),
        builtin("builtin_twitch_720p60", "Twitch 720p60", Twitch, Horizontal, (1280, 720, 60), 4500),
        builtin("builtin_facebook_1080p", "Facebook 1080p", Facebook, Horizontal, (1920, 1080, 30), 4000),
        builtin("builtin_tiktok_vertical", "TikTok Vertical", Tiktok, Vertical, (1080, 1920, 30), 3000),
    ]
}
