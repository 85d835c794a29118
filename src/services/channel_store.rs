// ChannelStore Service
// Persists channels and their destinations to the app data directory

use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use crate::models::{Channel, ChannelStatus, StreamKey};
use crate::services::Encryption;

const DOCUMENT_VERSION: u32 = 1;

// Magic bytes identifying a password-protected export
const EXPORT_MAGIC: &[u8] = b"SSFO";

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelDocument {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    stream_channels: Vec<Channel>,
}

/// Reads and writes `channels.json`.
///
/// Destination order and backup links round-trip unchanged; runtime health
/// and failover state are never written.
pub struct ChannelStore {
    app_data_dir: PathBuf,
    channels_path: PathBuf,
}

impl ChannelStore {
    pub fn new(app_data_dir: PathBuf) -> Self {
        let channels_path = app_data_dir.join("channels.json");
        Self {
            app_data_dir,
            channels_path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.channels_path
    }

    /// Serialize channels to a JSON settings blob
    pub fn to_json(channels: &[Channel]) -> Result<String, String> {
        let document = ChannelDocument {
            version: DOCUMENT_VERSION,
            stream_channels: channels.to_vec(),
        };
        serde_json::to_string_pretty(&document)
            .map_err(|e| format!("Failed to serialize channels: {e}"))
    }

    /// Parse a JSON settings blob, repairing links and resetting runtime state
    pub fn from_json(content: &str) -> Result<Vec<Channel>, String> {
        let document: ChannelDocument = serde_json::from_str(content)
            .map_err(|e| format!("Failed to parse channels: {e}"))?;

        if document.version > DOCUMENT_VERSION {
            log::warn!(
                "Channel document version {} is newer than supported version {}",
                document.version,
                DOCUMENT_VERSION
            );
        }

        let mut channels = document.stream_channels;
        for channel in channels.iter_mut() {
            let dropped = channel.repair_links();
            if dropped > 0 {
                log::warn!("Repaired {dropped} backup links in channel '{}'", channel.name);
            }
            // Nothing is running right after a load
            if channel.status == ChannelStatus::Active {
                channel.status = ChannelStatus::Inactive;
            }
            channel.process_reference = None;
            channel.last_error = None;
        }
        Ok(channels)
    }

    /// Write all channels, optionally encrypting stream keys at rest
    pub fn save(&self, channels: &[Channel], encrypt_stream_keys: bool) -> Result<(), String> {
        let mut stored = channels.to_vec();
        if encrypt_stream_keys {
            for channel in stored.iter_mut() {
                for dest in channel.destinations.iter_mut() {
                    let encrypted =
                        Encryption::encrypt_secret(dest.stream_key.as_str(), &self.app_data_dir)?;
                    dest.stream_key = StreamKey::new(encrypted);
                }
            }
        }

        let content = Self::to_json(&stored)?;

        std::fs::create_dir_all(&self.app_data_dir)
            .map_err(|e| format!("Failed to create data directory: {e}"))?;

        let tmp = self.channels_path.with_extension("json.tmp");
        std::fs::write(&tmp, content)
            .map_err(|e| format!("Failed to write temp channels file: {e}"))?;
        std::fs::rename(&tmp, &self.channels_path)
            .map_err(|e| format!("Failed to replace channels file: {e}"))?;

        log::info!("Saved {} channels to {}", channels.len(), self.channels_path.display());
        Ok(())
    }

    /// Read all channels; a missing file yields an empty list
    pub fn load(&self) -> Result<Vec<Channel>, String> {
        if !self.channels_path.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&self.channels_path)
            .map_err(|e| format!("Failed to read channels file: {e}"))?;
        let mut channels = Self::from_json(&content)?;
        self.decrypt_stream_keys(&mut channels)?;

        log::info!("Loaded {} channels from {}", channels.len(), self.channels_path.display());
        Ok(channels)
    }

    fn decrypt_stream_keys(&self, channels: &mut [Channel]) -> Result<(), String> {
        for channel in channels.iter_mut() {
            for dest in channel.destinations.iter_mut() {
                if Encryption::is_encrypted(dest.stream_key.as_str()) {
                    let plaintext =
                        Encryption::decrypt_secret(dest.stream_key.as_str(), &self.app_data_dir)?;
                    dest.stream_key = StreamKey::new(plaintext);
                }
            }
        }
        Ok(())
    }

    /// Write a password-protected copy of the channels (for backup or transfer)
    pub fn export_encrypted(channels: &[Channel], path: &Path, password: &str) -> Result<(), String> {
        let content = Self::to_json(channels)?;
        let encrypted = Encryption::encrypt(content.as_bytes(), password)?;

        let mut data = EXPORT_MAGIC.to_vec();
        data.extend(encrypted);

        std::fs::write(path, data).map_err(|e| format!("Failed to write export: {e}"))
    }

    pub fn import_encrypted(path: &Path, password: &str) -> Result<Vec<Channel>, String> {
        let data = std::fs::read(path).map_err(|e| format!("Failed to read export: {e}"))?;
        let Some(encrypted) = data.strip_prefix(EXPORT_MAGIC) else {
            return Err("Not a channel export file".to_string());
        };

        let decrypted = Encryption::decrypt(encrypted, password)?;
        let content = String::from_utf8(decrypted)
            .map_err(|e| format!("Invalid UTF-8 in export: {e}"))?;
        Self::from_json(&content)
    }
}
