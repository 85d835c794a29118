// ChannelManager Service
// Owns channels, templates and the relay client binding

use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use crate::models::{
    builtin_templates, Channel, ChannelError, ChannelResult, ChannelStatus, DestinationTemplate,
    EncodingSettings, Orientation, StreamKey, StreamingService,
};
use crate::services::{
    output_spec, output_target, ChannelStartRequest, ChannelStore, CheckReport, FailoverEngine,
    PlatformRegistry, RelayClient,
};

/// A channel shared between the manager, callers and the health monitor
pub type SharedChannel = Arc<Mutex<Channel>>;

/// Lock a channel, recovering the data if a previous holder panicked
pub fn lock_channel(channel: &SharedChannel) -> MutexGuard<'_, Channel> {
    channel.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// Registry entry; the id is copied out so lookups never take a channel lock
struct ChannelEntry {
    id: String,
    channel: SharedChannel,
}

/// Owns every channel and routes lifecycle and failover commands to the relay.
///
/// Each channel sits behind its own mutex; operations on one channel are
/// serialized while different channels proceed independently. A channel's
/// id is fixed once it is registered.
pub struct ChannelManager {
    channels: RwLock<Vec<ChannelEntry>>,
    relay: Option<Arc<dyn RelayClient>>,
    templates: Vec<DestinationTemplate>,
    default_failure_threshold: u32,
}

impl ChannelManager {
    pub fn new(relay: Option<Arc<dyn RelayClient>>) -> Self {
        Self {
            channels: RwLock::new(Vec::new()),
            relay,
            templates: builtin_templates(),
            default_failure_threshold: crate::models::DEFAULT_FAILURE_THRESHOLD,
        }
    }

    /// Failure threshold given to newly created channels
    pub fn with_default_failure_threshold(mut self, threshold: u32) -> Self {
        if threshold > 0 {
            self.default_failure_threshold = threshold;
        }
        self
    }

    pub fn relay(&self) -> ChannelResult<&dyn RelayClient> {
        self.relay.as_deref().ok_or(ChannelError::NoRelayClient)
    }

    fn read_channels(&self) -> std::sync::RwLockReadGuard<'_, Vec<ChannelEntry>> {
        self.channels.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_channels(&self) -> std::sync::RwLockWriteGuard<'_, Vec<ChannelEntry>> {
        self.channels.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ---------------------------------------------------------------------
    // Channel CRUD
    // ---------------------------------------------------------------------

    /// Create an inactive channel with no destinations
    pub fn create_channel(&self, name: &str) -> SharedChannel {
        let mut channel = Channel::new(name);
        channel.failure_threshold = self.default_failure_threshold;
        log::info!("Created channel '{}' ({})", channel.name, channel.id);

        self.register(channel)
    }

    fn register(&self, channel: Channel) -> SharedChannel {
        let id = channel.id.clone();
        let shared = Arc::new(Mutex::new(channel));
        self.write_channels().push(ChannelEntry {
            id,
            channel: shared.clone(),
        });
        shared
    }

    pub fn get(&self, channel_id: &str) -> Option<SharedChannel> {
        self.read_channels()
            .iter()
            .find(|entry| entry.id == channel_id)
            .map(|entry| entry.channel.clone())
    }

    pub fn get_at(&self, index: usize) -> Option<SharedChannel> {
        self.read_channels().get(index).map(|entry| entry.channel.clone())
    }

    /// Snapshot of all channel handles in creation order
    pub fn channels(&self) -> Vec<SharedChannel> {
        self.read_channels()
            .iter()
            .map(|entry| entry.channel.clone())
            .collect()
    }

    /// Ids of all channels in creation order
    pub fn channel_ids(&self) -> Vec<String> {
        self.read_channels().iter().map(|entry| entry.id.clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.read_channels().len()
    }

    pub fn active_count(&self) -> usize {
        self.channels()
            .iter()
            .filter(|channel| lock_channel(channel).is_active())
            .count()
    }

    fn require(&self, channel_id: &str) -> ChannelResult<SharedChannel> {
        self.get(channel_id)
            .ok_or_else(|| ChannelError::ChannelNotFound(channel_id.to_string()))
    }

    /// Run `f` with exclusive access to one channel
    pub fn with_channel<R>(
        &self,
        channel_id: &str,
        f: impl FnOnce(&mut Channel) -> ChannelResult<R>,
    ) -> ChannelResult<R> {
        let shared = self.require(channel_id)?;
        let mut channel = lock_channel(&shared);
        f(&mut channel)
    }

    /// Delete a channel, stopping it first if it is running
    pub fn delete_channel(&self, channel_id: &str) -> ChannelResult<()> {
        let shared = self.require(channel_id)?;
        if lock_channel(&shared).is_active() {
            if let Err(e) = self.stop_channel(channel_id) {
                log::warn!("Failed to stop channel {channel_id} before delete: {e}");
            }
        }

        self.write_channels()
            .retain(|entry| !Arc::ptr_eq(&entry.channel, &shared));
        log::info!("Deleted channel {channel_id}");
        Ok(())
    }

    pub fn duplicate_channel(&self, channel_id: &str, new_name: &str) -> ChannelResult<SharedChannel> {
        let copy = self.with_channel(channel_id, |channel| Ok(channel.duplicate(new_name)))?;
        log::info!("Duplicated channel {channel_id} as '{new_name}'");

        Ok(self.register(copy))
    }

    // ---------------------------------------------------------------------
    // Destinations (live-synced while the channel is active)
    // ---------------------------------------------------------------------

    pub fn add_destination(
        &self,
        channel_id: &str,
        service: StreamingService,
        stream_key: impl Into<StreamKey>,
        orientation: Orientation,
        encoding: EncodingSettings,
    ) -> ChannelResult<usize> {
        let stream_key = stream_key.into();
        self.with_channel(channel_id, |channel| {
            let index = channel.add_destination(service, stream_key, orientation, encoding);
            if channel.is_active() {
                if let Err(e) = self.push_output_enabled(channel, index, true) {
                    channel.remove_destination(index)?;
                    return Err(e);
                }
            }
            Ok(index)
        })
    }

    /// Remove a destination. Removing the backup of a failed-over primary on
    /// a running channel restores the primary first, so the channel keeps
    /// an output.
    pub fn remove_destination(&self, channel_id: &str, index: usize) -> ChannelResult<()> {
        self.with_channel(channel_id, |channel| {
            channel.check_index(index)?;
            if channel.is_active() && channel.destinations[index].failover_active {
                if let Some(primary_index) = channel.primary_index_of(index) {
                    FailoverEngine::restore_primary(channel, self.relay()?, primary_index)?;
                }
            }
            if channel.is_active() && channel.destinations[index].enabled {
                if let Err(e) = self.push_output_enabled(channel, index, false) {
                    log::warn!("Failed to detach output before removal: {e}");
                }
            }
            channel.remove_destination(index).map(|_| ())
        })
    }

    pub fn set_destination_enabled(
        &self,
        channel_id: &str,
        index: usize,
        enabled: bool,
    ) -> ChannelResult<()> {
        self.with_channel(channel_id, |channel| {
            channel.check_index(index)?;
            if channel.is_active() && channel.destinations[index].enabled != enabled {
                self.push_output_enabled(channel, index, enabled)?;
            }
            channel.set_destination_enabled(index, enabled)
        })
    }

    pub fn update_destination_encoding(
        &self,
        channel_id: &str,
        index: usize,
        encoding: EncodingSettings,
    ) -> ChannelResult<()> {
        self.with_channel(channel_id, |channel| {
            channel.check_index(index)?;
            let previous = channel.destinations[index].encoding;
            channel.update_destination_encoding(index, encoding)?;

            if channel.is_active() && channel.destinations[index].enabled {
                let client = self.relay()?;
                let target = output_target(channel, index)?;
                if let Err(e) = client.update_output_encoding(&target) {
                    channel.destinations[index].encoding = previous;
                    return Err(e.into());
                }
            }
            Ok(())
        })
    }

    fn push_output_enabled(&self, channel: &Channel, index: usize, enabled: bool) -> ChannelResult<()> {
        let client = self.relay()?;
        let target = output_target(channel, index)?;
        log::info!(
            "{} output {}",
            if enabled { "Attaching" } else { "Detaching" },
            PlatformRegistry::redact_url(&target.output.url)
        );
        client.set_output_enabled(&target, enabled)?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Templates
    // ---------------------------------------------------------------------

    pub fn templates(&self) -> &[DestinationTemplate] {
        &self.templates
    }

    pub fn get_template(&self, template_id: &str) -> Option<&DestinationTemplate> {
        self.templates.iter().find(|t| t.id == template_id)
    }

    /// Add a destination configured from a template
    pub fn apply_template(
        &self,
        channel_id: &str,
        template_id: &str,
        stream_key: impl Into<StreamKey>,
    ) -> ChannelResult<usize> {
        let template = self
            .get_template(template_id)
            .ok_or_else(|| ChannelError::TemplateNotFound(template_id.to_string()))?
            .clone();
        log::info!("Applying template '{}' to channel {channel_id}", template.name);
        self.add_destination(
            channel_id,
            template.service,
            stream_key,
            template.orientation,
            template.encoding,
        )
    }

    // ---------------------------------------------------------------------
    // Failover
    // ---------------------------------------------------------------------

    /// Link a backup. On a running channel a backup that was streaming is
    /// detached from the relay.
    pub fn set_output_backup(
        &self,
        channel_id: &str,
        primary_index: usize,
        backup_index: usize,
    ) -> ChannelResult<()> {
        self.with_channel(channel_id, |channel| {
            let was_enabled = channel
                .destination(backup_index)
                .map(|d| d.enabled)
                .unwrap_or(false);
            FailoverEngine::set_output_backup(channel, primary_index, backup_index)?;
            if channel.is_active() && was_enabled {
                if let Err(e) = self.push_output_enabled(channel, backup_index, false) {
                    log::warn!("Failed to detach new backup output: {e}");
                }
            }
            Ok(())
        })
    }

    pub fn remove_output_backup(&self, channel_id: &str, primary_index: usize) -> ChannelResult<()> {
        self.with_channel(channel_id, |channel| {
            let backup_index = channel.backup_index_of(primary_index);
            let was_enabled = backup_index
                .and_then(|i| channel.destination(i))
                .map(|d| d.enabled);
            FailoverEngine::remove_output_backup(channel, primary_index)?;

            if let (Some(index), Some(before)) = (backup_index, was_enabled) {
                let now = channel.destinations[index].enabled;
                if channel.is_active() && now != before {
                    if let Err(e) = self.push_output_enabled(channel, index, now) {
                        log::warn!("Failed to sync former backup output: {e}");
                    }
                }
            }
            Ok(())
        })
    }

    pub fn trigger_failover(&self, channel_id: &str, primary_index: usize) -> ChannelResult<()> {
        let client = self.relay()?;
        self.with_channel(channel_id, |channel| {
            FailoverEngine::trigger_failover(channel, client, primary_index)
        })
    }

    pub fn restore_primary(&self, channel_id: &str, primary_index: usize) -> ChannelResult<()> {
        let client = self.relay()?;
        self.with_channel(channel_id, |channel| {
            FailoverEngine::restore_primary(channel, client, primary_index)
        })
    }

    /// Policy tick for one channel; true when a new failover was triggered
    pub fn check_failover(&self, channel_id: &str) -> ChannelResult<bool> {
        let client = self.relay()?;
        self.with_channel(channel_id, |channel| {
            Ok(FailoverEngine::check_failover(channel, client))
        })
    }

    /// Policy tick across every active channel
    pub fn check_all(&self) -> ChannelResult<Vec<(String, CheckReport)>> {
        let client = self.relay()?;
        let now = chrono::Utc::now();
        let mut reports = Vec::new();
        for shared in self.channels() {
            let mut channel = lock_channel(&shared);
            let report = FailoverEngine::check_failover_at(&mut channel, client, now);
            if !report.is_empty() {
                reports.push((channel.id.clone(), report));
            }
        }
        Ok(reports)
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Start a relay process streaming to every enabled destination
    pub fn start_channel(&self, channel_id: &str) -> ChannelResult<()> {
        let client = self.relay()?;
        self.with_channel(channel_id, |channel| {
            if channel.is_active() {
                log::warn!("Channel '{}' is already active", channel.name);
                return Ok(());
            }

            let outputs: Vec<_> = (0..channel.len())
                .filter(|&i| channel.destinations[i].enabled)
                .filter_map(|i| output_spec(channel, i))
                .collect();

            if outputs.is_empty() {
                log::error!("No enabled destinations in channel '{}'", channel.name);
                channel.status = ChannelStatus::Error;
                channel.last_error = Some(ChannelError::NoEnabledDestinations.to_string());
                return Err(ChannelError::NoEnabledDestinations);
            }

            let request = ChannelStartRequest {
                channel_id: channel.id.clone(),
                name: channel.name.clone(),
                input_url: channel.input_url.clone(),
                outputs,
            };

            match client.start_channel(&request) {
                Ok(process_reference) => {
                    log::info!(
                        "Channel '{}' started with {} outputs",
                        channel.name,
                        request.outputs.len()
                    );
                    channel.status = ChannelStatus::Active;
                    channel.process_reference = Some(process_reference);
                    channel.last_error = None;
                    for dest in channel.destinations.iter_mut() {
                        dest.connected = false;
                        dest.consecutive_failures = 0;
                    }
                    Ok(())
                }
                Err(e) => {
                    log::error!("Failed to start channel '{}': {e}", channel.name);
                    channel.status = ChannelStatus::Error;
                    channel.last_error = Some(e.to_string());
                    Err(e.into())
                }
            }
        })
    }

    pub fn stop_channel(&self, channel_id: &str) -> ChannelResult<()> {
        let client = self.relay()?;
        self.with_channel(channel_id, |channel| {
            if channel.status == ChannelStatus::Inactive {
                return Ok(());
            }

            if let Some(reference) = channel.process_reference.take() {
                if let Err(e) = client.stop_channel(&reference) {
                    // Mark stopped anyway; the relay process is unreachable
                    log::warn!("Failed to stop relay process for '{}': {e}", channel.name);
                }
            }

            channel.status = ChannelStatus::Inactive;
            for dest in channel.destinations.iter_mut() {
                dest.connected = false;
            }
            log::info!("Channel '{}' stopped", channel.name);
            Ok(())
        })
    }

    /// Start every channel flagged for auto-start. Returns how many started.
    pub fn start_all(&self) -> usize {
        let ids: Vec<String> = self
            .channels()
            .iter()
            .filter_map(|shared| {
                let channel = lock_channel(shared);
                (channel.auto_start && !channel.is_active()).then(|| channel.id.clone())
            })
            .collect();

        ids.iter()
            .filter(|id| match self.start_channel(id) {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("Auto-start failed for channel {id}: {e}");
                    false
                }
            })
            .count()
    }

    /// Stop every running channel. Returns how many stopped.
    pub fn stop_all(&self) -> usize {
        let ids: Vec<String> = self
            .channels()
            .iter()
            .filter_map(|shared| {
                let channel = lock_channel(shared);
                (channel.status != ChannelStatus::Inactive).then(|| channel.id.clone())
            })
            .collect();

        ids.iter()
            .filter(|id| self.stop_channel(id).is_ok())
            .count()
    }

    // ---------------------------------------------------------------------
    // Persistence
    // ---------------------------------------------------------------------

    /// Clone of every channel for persistence
    pub fn snapshot(&self) -> Vec<Channel> {
        self.channels()
            .iter()
            .map(|shared| lock_channel(shared).clone())
            .collect()
    }

    pub fn save(&self, store: &ChannelStore, encrypt_stream_keys: bool) -> Result<(), String> {
        store.save(&self.snapshot(), encrypt_stream_keys)
    }

    /// Replace all channels with the stored ones. Running channels are
    /// stopped first; the load is refused if any of them is still running.
    /// Returns how many loaded.
    pub fn load(&self, store: &ChannelStore) -> Result<usize, String> {
        let loaded = store.load()?;

        if self.active_count() > 0 {
            let stopped = self.stop_all();
            log::info!("Stopped {stopped} channels before reloading");
            let still_running = self.active_count();
            if still_running > 0 {
                return Err(format!(
                    "Cannot load channels while {still_running} are still running"
                ));
            }
        }

        let count = loaded.len();
        let mut channels = self.write_channels();
        channels.clear();
        for channel in loaded {
            channels.push(ChannelEntry {
                id: channel.id.clone(),
                channel: Arc::new(Mutex::new(channel)),
            });
        }
        Ok(count)
    }

    /// Stop everything and release all channels
    pub fn shutdown(&self) {
        if self.relay.is_some() {
            let stopped = self.stop_all();
            log::info!("Stopped {stopped} channels during shutdown");
        }
        self.write_channels().clear();
    }
}
