// SettingsManager Service
// Loads and persists daemon settings

use std::path::{Path, PathBuf};
use std::sync::RwLock;
use serde_json::Value;
use crate::models::Settings;
use crate::services::Encryption;

/// Fields in settings.json (camelCase) that are encrypted at rest
const SENSITIVE_FIELDS: &[&str] = &["relayPassword"];

/// Manages settings storage and retrieval
pub struct SettingsManager {
    settings_path: PathBuf,
    app_data_dir: PathBuf,
    cache: RwLock<Option<Settings>>,
}

impl SettingsManager {
    pub fn new(app_data_dir: PathBuf) -> Self {
        let settings_path = app_data_dir.join("settings.json");
        Self {
            settings_path,
            app_data_dir,
            cache: RwLock::new(None),
        }
    }

    pub fn app_data_dir(&self) -> &Path {
        &self.app_data_dir
    }

    /// Load settings from disk, creating the file with defaults if missing.
    /// Keys added since the file was written are filled from defaults.
    pub fn load(&self) -> Result<Settings, String> {
        if let Ok(cache) = self.cache.read() {
            if let Some(ref settings) = *cache {
                return Ok(settings.clone());
            }
        }

        let settings = if self.settings_path.exists() {
            let content = std::fs::read_to_string(&self.settings_path)
                .map_err(|e| format!("Failed to read settings: {e}"))?;

            let mut user_value: Value = serde_json::from_str(&content)
                .map_err(|e| format!("Failed to parse settings: {e}"))?;

            self.decrypt_sensitive_fields(&mut user_value);

            let defaults_value = serde_json::to_value(Settings::default())
                .map_err(|e| format!("Failed to build default settings: {e}"))?;
            let changed = merge_missing_settings(&mut user_value, &defaults_value);

            let settings: Settings = serde_json::from_value(user_value)
                .map_err(|e| format!("Failed to parse settings: {e}"))?;

            if changed {
                log::info!("Added missing settings keys to {}", self.settings_path.display());
                self.save_internal(&settings)?;
            }

            settings
        } else {
            let defaults = Settings::default();
            self.save_internal(&defaults)?;
            defaults
        };

        if let Ok(mut cache) = self.cache.write() {
            *cache = Some(settings.clone());
        }

        Ok(settings)
    }

    pub fn save(&self, settings: &Settings) -> Result<(), String> {
        self.save_internal(settings)?;

        if let Ok(mut cache) = self.cache.write() {
            *cache = Some(settings.clone());
        }

        Ok(())
    }

    fn save_internal(&self, settings: &Settings) -> Result<(), String> {
        if let Some(parent) = self.settings_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create settings directory: {e}"))?;
        }

        let mut value = serde_json::to_value(settings)
            .map_err(|e| format!("Failed to serialize settings: {e}"))?;

        self.encrypt_sensitive_fields(&mut value);

        let content = serde_json::to_string_pretty(&value)
            .map_err(|e| format!("Failed to serialize settings: {e}"))?;

        std::fs::write(&self.settings_path, content)
            .map_err(|e| format!("Failed to write settings: {e}"))
    }

    fn decrypt_sensitive_fields(&self, value: &mut Value) {
        let Value::Object(map) = value else {
            return;
        };
        for &field in SENSITIVE_FIELDS {
            if let Some(Value::String(val)) = map.get(field) {
                if Encryption::is_encrypted(val) {
                    match Encryption::decrypt_secret(val, &self.app_data_dir) {
                        Ok(plaintext) => {
                            map.insert(field.to_string(), Value::String(plaintext));
                        }
                        Err(e) => {
                            log::warn!("Failed to decrypt settings field '{}': {}", field, e);
                        }
                    }
                }
            }
        }
    }

    fn encrypt_sensitive_fields(&self, value: &mut Value) {
        let Value::Object(map) = value else {
            return;
        };
        for &field in SENSITIVE_FIELDS {
            if let Some(Value::String(val)) = map.get(field) {
                if !val.is_empty() && !Encryption::is_encrypted(val) {
                    match Encryption::encrypt_secret(val, &self.app_data_dir) {
                        Ok(encrypted) => {
                            map.insert(field.to_string(), Value::String(encrypted));
                        }
                        Err(e) => {
                            log::warn!("Failed to encrypt settings field '{}': {}", field, e);
                        }
                    }
                }
            }
        }
    }
}

/// Insert keys present in `defaults` but missing from `target`, recursively.
/// Returns true when anything was added.
fn merge_missing_settings(target: &mut Value, defaults: &Value) -> bool {
    match (target, defaults) {
        (Value::Object(target_map), Value::Object(defaults_map)) => {
            let mut changed = false;
            for (key, default_value) in defaults_map {
                match target_map.get_mut(key) {
                    Some(target_value) => {
                        changed |= merge_missing_settings(target_value, default_value);
                    }
                    None => {
                        target_map.insert(key.clone(), default_value.clone());
                        changed = true;
                    }
                }
            }
            changed
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_creates_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SettingsManager::new(dir.path().to_path_buf());

        let settings = manager.load().unwrap();

        assert_eq!(settings.health_check_interval_secs, 30);
        assert_eq!(settings.default_failure_threshold, 3);
        assert!(dir.path().join("settings.json").exists());
    }

    #[test]
    fn test_relay_password_encrypted_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SettingsManager::new(dir.path().to_path_buf());
        let settings = Settings {
            relay_password: "hunter2".to_string(),
            ..Settings::default()
        };
        manager.save(&settings).unwrap();

        let raw = std::fs::read_to_string(dir.path().join("settings.json")).unwrap();
        assert!(!raw.contains("hunter2"));
        assert!(raw.contains("ENC::"));

        let fresh = SettingsManager::new(dir.path().to_path_buf());
        assert_eq!(fresh.load().unwrap().relay_password, "hunter2");
    }

    #[test]
    fn test_missing_keys_are_merged_and_saved() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("settings.json"),
            r#"{"relayHost":"relay.local","relayPort":9000}"#,
        )
        .unwrap();

        let manager = SettingsManager::new(dir.path().to_path_buf());
        let settings = manager.load().unwrap();

        assert_eq!(settings.relay_host, "relay.local");
        assert_eq!(settings.relay_port, 9000);
        assert_eq!(settings.log_retention_days, 30);

        let raw = std::fs::read_to_string(dir.path().join("settings.json")).unwrap();
        assert!(raw.contains("healthCheckIntervalSecs"));
    }

    #[test]
    fn test_merge_reports_no_change_for_complete_value() {
        let defaults = serde_json::to_value(Settings::default()).unwrap();
        let mut target = defaults.clone();
        assert!(!merge_missing_settings(&mut target, &defaults));
    }
}
