// Channel Model
// Ordered destinations sharing one source feed and one failover policy

use serde::{Deserialize, Serialize};
use crate::models::{
    ChannelError, ChannelResult, Destination, EncodingSettings, Orientation, StreamKey,
    StreamingService,
};

pub const DEFAULT_INPUT_URL: &str = "rtmp://localhost/live/obs_input";
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_RECONNECT_DELAY_SECS: u32 = 5;

/// Channel activity status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    #[default]
    Inactive,
    Active,
    Error,
}

/// Result of a bulk destination operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    pub succeeded: usize,
    pub failed: usize,
}

fn default_failure_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}

fn default_true() -> bool {
    true
}

fn default_reconnect_delay() -> u32 {
    DEFAULT_RECONNECT_DELAY_SECS
}

fn default_health_check_interval() -> u64 {
    DEFAULT_HEALTH_CHECK_INTERVAL_SECS
}

fn default_input_url() -> String {
    DEFAULT_INPUT_URL.to_string()
}

/// A named group of destinations fed by one source.
///
/// Destinations are addressed by position; positions shift on removal, while
/// backup links follow destination ids and survive any reordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: String,
    pub name: String,

    #[serde(default)]
    pub status: ChannelStatus,

    /// Consecutive failures before a primary is eligible for failover
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default)]
    pub auto_start: bool,

    #[serde(default = "default_true")]
    pub auto_reconnect: bool,

    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_sec: u32,

    #[serde(default)]
    pub health_monitoring_enabled: bool,

    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_sec: u64,

    #[serde(default)]
    pub source_orientation: Orientation,

    #[serde(default)]
    pub source_width: u32,

    #[serde(default)]
    pub source_height: u32,

    #[serde(default = "default_input_url")]
    pub input_url: String,

    /// Relay process running this channel, set while active
    #[serde(skip)]
    pub process_reference: Option<String>,

    #[serde(skip)]
    pub last_error: Option<String>,

    #[serde(default)]
    pub(crate) destinations: Vec<Destination>,
}

impl Channel {
    /// Create an inactive channel with no destinations
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            status: ChannelStatus::Inactive,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            auto_start: false,
            auto_reconnect: true,
            reconnect_delay_sec: DEFAULT_RECONNECT_DELAY_SECS,
            health_monitoring_enabled: false,
            health_check_interval_sec: DEFAULT_HEALTH_CHECK_INTERVAL_SECS,
            source_orientation: Orientation::Auto,
            source_width: 0,
            source_height: 0,
            input_url: DEFAULT_INPUT_URL.to_string(),
            process_reference: None,
            last_error: None,
            destinations: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ChannelStatus::Active
    }

    pub fn destinations(&self) -> &[Destination] {
        &self.destinations
    }

    pub fn destination(&self, index: usize) -> Option<&Destination> {
        self.destinations.get(index)
    }

    /// Mutable access for health fields and settings; linkage stays crate-private
    pub fn destination_mut(&mut self, index: usize) -> Option<&mut Destination> {
        self.destinations.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    pub fn enabled_count(&self) -> usize {
        self.destinations.iter().filter(|d| d.enabled).count()
    }

    pub(crate) fn check_index(&self, index: usize) -> ChannelResult<()> {
        if index < self.destinations.len() {
            Ok(())
        } else {
            Err(ChannelError::IndexOutOfRange {
                index,
                len: self.destinations.len(),
            })
        }
    }

    /// Current position of the destination with the given id
    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.destinations.iter().position(|d| d.id == id)
    }

    /// Position of the backup configured for the destination at `index`
    pub fn backup_index_of(&self, index: usize) -> Option<usize> {
        let backup_id = self.destinations.get(index)?.backup_id.as_deref()?;
        self.position_of(backup_id)
    }

    /// Position of the primary that the destination at `index` backs up
    pub fn primary_index_of(&self, index: usize) -> Option<usize> {
        let primary_id = self.destinations.get(index)?.primary_id.as_deref()?;
        self.position_of(primary_id)
    }

    /// Append a destination and return its index
    pub fn add_destination(
        &mut self,
        service: StreamingService,
        stream_key: impl Into<StreamKey>,
        orientation: Orientation,
        encoding: EncodingSettings,
    ) -> usize {
        let destination = Destination::new(service, stream_key, orientation, encoding);
        log::info!(
            "Added {} destination to channel '{}'",
            destination.service.slug(),
            self.name
        );
        self.destinations.push(destination);
        self.destinations.len() - 1
    }

    /// Remove the destination at `index`, unlinking its backup partner
    pub fn remove_destination(&mut self, index: usize) -> ChannelResult<Destination> {
        self.check_index(index)?;

        let removed = self.destinations.remove(index);

        // The surviving partner drops its pointer and any failover state
        for partner in self.destinations.iter_mut() {
            let was_backup = partner.primary_id.as_deref() == Some(removed.id.as_str());
            let was_primary = partner.backup_id.as_deref() == Some(removed.id.as_str());
            if was_backup {
                partner.primary_id = None;
                partner.pre_link_enabled = None;
                partner.clear_failover();
            }
            if was_primary {
                partner.backup_id = None;
                partner.clear_failover();
            }
        }

        log::info!(
            "Removed {} destination from channel '{}'",
            removed.service.slug(),
            self.name
        );
        Ok(removed)
    }

    /// Toggle the enabled flag; linkage and counters are untouched
    pub fn set_destination_enabled(&mut self, index: usize, enabled: bool) -> ChannelResult<()> {
        self.check_index(index)?;
        self.destinations[index].enabled = enabled;
        Ok(())
    }

    pub fn update_destination_encoding(
        &mut self,
        index: usize,
        encoding: EncodingSettings,
    ) -> ChannelResult<()> {
        self.check_index(index)?;
        self.destinations[index].encoding = encoding;
        Ok(())
    }

    /// Enable or disable health monitoring, filling unset policy values
    pub fn set_health_monitoring(&mut self, enabled: bool) {
        self.health_monitoring_enabled = enabled;
        if enabled {
            if self.health_check_interval_sec == 0 {
                self.health_check_interval_sec = DEFAULT_HEALTH_CHECK_INTERVAL_SECS;
            }
            if self.failure_threshold == 0 {
                self.failure_threshold = DEFAULT_FAILURE_THRESHOLD;
            }
        }
    }

    /// Enable/disable many destinations at once. Backups are skipped since
    /// the failover engine owns their enabled state.
    pub fn bulk_set_enabled(&mut self, indices: &[usize], enabled: bool) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for &index in indices {
            match self.destinations.get_mut(index) {
                Some(dest) if dest.is_backup() => {
                    log::warn!("Skipping backup destination {index} in bulk enable");
                    outcome.failed += 1;
                }
                Some(dest) => {
                    dest.enabled = enabled;
                    outcome.succeeded += 1;
                }
                None => outcome.failed += 1,
            }
        }
        outcome
    }

    /// Remove many destinations; indices refer to positions before removal
    pub fn bulk_remove(&mut self, indices: &[usize]) -> BulkOutcome {
        let mut sorted = indices.to_vec();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        sorted.dedup();

        let mut outcome = BulkOutcome::default();
        for index in sorted {
            match self.remove_destination(index) {
                Ok(_) => outcome.succeeded += 1,
                Err(_) => outcome.failed += 1,
            }
        }
        outcome
    }

    pub fn bulk_update_encoding(
        &mut self,
        indices: &[usize],
        encoding: EncodingSettings,
    ) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for &index in indices {
            match self.update_destination_encoding(index, encoding) {
                Ok(()) => outcome.succeeded += 1,
                Err(_) => outcome.failed += 1,
            }
        }
        outcome
    }

    /// Copy settings and destinations under a new id. Destinations get new
    /// ids and no backup links; the copy starts inactive.
    pub fn duplicate(&self, new_name: impl Into<String>) -> Channel {
        let mut copy = Channel {
            id: uuid::Uuid::new_v4().to_string(),
            name: new_name.into(),
            status: ChannelStatus::Inactive,
            process_reference: None,
            last_error: None,
            destinations: Vec::with_capacity(self.destinations.len()),
            ..self.clone()
        };

        for source in &self.destinations {
            let mut dest = Destination::new(
                source.service,
                source.stream_key.clone(),
                source.target_orientation,
                source.encoding,
            );
            dest.enabled = source.enabled;
            copy.destinations.push(dest);
        }

        copy
    }

    /// Drop links whose partner is missing or does not point back, break
    /// chains (a backup that has its own backup keeps only its primary), and
    /// zero runtime state. Returns the number of links dropped.
    pub(crate) fn repair_links(&mut self) -> usize {
        let snapshot: Vec<(String, Option<String>, Option<String>)> = self
            .destinations
            .iter()
            .map(|d| (d.id.clone(), d.primary_id.clone(), d.backup_id.clone()))
            .collect();

        let points_back = |partner_id: &str, expect: &str, backup_side: bool| {
            snapshot.iter().any(|(id, primary, backup)| {
                let pointer = if backup_side { primary } else { backup };
                id == partner_id && id != expect && pointer.as_deref() == Some(expect)
            })
        };

        let mut dropped = 0;
        for dest in self.destinations.iter_mut() {
            dest.reset_runtime_state();

            if let Some(backup_id) = dest.backup_id.clone() {
                if !points_back(&backup_id, &dest.id, true) {
                    log::warn!("Dropping dangling backup link on destination {}", dest.id);
                    dest.backup_id = None;
                    dropped += 1;
                }
            }
            if let Some(primary_id) = dest.primary_id.clone() {
                if !points_back(&primary_id, &dest.id, false) {
                    log::warn!("Dropping dangling primary link on destination {}", dest.id);
                    dest.primary_id = None;
                    dest.pre_link_enabled = None;
                    dropped += 1;
                }
            }
        }

        for index in 0..self.destinations.len() {
            let dest = &self.destinations[index];
            if !dest.is_backup() {
                continue;
            }
            let Some(downstream) = self.backup_index_of(index) else {
                continue;
            };

            log::warn!(
                "Dropping chained backup link on destination {}",
                self.destinations[index].id
            );
            self.destinations[index].backup_id = None;
            let orphan = &mut self.destinations[downstream];
            orphan.primary_id = None;
            orphan.pre_link_enabled = None;
            dropped += 1;
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel_with(count: usize) -> Channel {
        let mut channel = Channel::new("Test");
        for i in 0..count {
            channel.add_destination(
                StreamingService::Twitch,
                format!("key_{i}"),
                Orientation::Horizontal,
                EncodingSettings::default(),
            );
        }
        channel
    }

    fn link(channel: &mut Channel, primary: usize, backup: usize) {
        let primary_id = channel.destinations[primary].id.clone();
        let backup_id = channel.destinations[backup].id.clone();
        channel.destinations[primary].backup_id = Some(backup_id);
        channel.destinations[backup].primary_id = Some(primary_id);
    }

    #[test]
    fn test_new_channel_is_inactive_and_empty() {
        let channel = Channel::new("Main");
        assert_eq!(channel.status, ChannelStatus::Inactive);
        assert!(channel.is_empty());
        assert_eq!(channel.failure_threshold, DEFAULT_FAILURE_THRESHOLD);
        assert_eq!(channel.input_url, DEFAULT_INPUT_URL);
        assert!(channel.auto_reconnect);
    }

    #[test]
    fn test_add_destination_appends_enabled() {
        let mut channel = channel_with(2);
        let index = channel.add_destination(
            StreamingService::Kick,
            "k",
            Orientation::Auto,
            EncodingSettings::default(),
        );
        assert_eq!(index, 2);
        let dest = channel.destination(2).unwrap();
        assert!(dest.enabled);
        assert!(!dest.is_backup());
        assert!(channel.backup_index_of(2).is_none());
        assert!(channel.primary_index_of(2).is_none());
    }

    #[test]
    fn test_remove_destination_rejects_out_of_range() {
        let mut empty = Channel::new("Empty");
        assert!(matches!(
            empty.remove_destination(0),
            Err(ChannelError::IndexOutOfRange { index: 0, len: 0 })
        ));

        let mut channel = channel_with(2);
        assert!(channel.remove_destination(2).is_err());
        assert_eq!(channel.len(), 2);
    }

    #[test]
    fn test_remove_referenced_backup_leaves_no_dangling_link() {
        let mut channel = channel_with(3);
        link(&mut channel, 0, 2);
        channel.destinations[0].failover_active = true;
        channel.destinations[2].failover_active = true;

        channel.remove_destination(2).unwrap();

        let primary = channel.destination(0).unwrap();
        assert!(!primary.has_backup());
        assert!(!primary.failover_active());
        assert!(channel.backup_index_of(0).is_none());
        for index in 0..channel.len() {
            assert!(channel.primary_index_of(index).is_none());
            assert!(!channel.destination(index).unwrap().is_backup());
        }
    }

    #[test]
    fn test_remove_before_linked_pair_keeps_link_consistent() {
        let mut channel = channel_with(3);
        link(&mut channel, 1, 2);

        channel.remove_destination(0).unwrap();

        assert_eq!(channel.backup_index_of(0), Some(1));
        assert_eq!(channel.primary_index_of(1), Some(0));
        assert!(channel.destination(1).unwrap().is_backup());
    }

    #[test]
    fn test_remove_primary_frees_backup() {
        let mut channel = channel_with(2);
        link(&mut channel, 0, 1);

        channel.remove_destination(0).unwrap();

        assert!(!channel.destination(0).unwrap().is_backup());
    }

    #[test]
    fn test_set_enabled_and_encoding() {
        let mut channel = channel_with(1);
        channel.destinations[0].consecutive_failures = 2;
        channel.set_destination_enabled(0, false).unwrap();
        assert!(!channel.destination(0).unwrap().enabled);
        assert_eq!(channel.destination(0).unwrap().consecutive_failures, 2);
        assert!(channel.set_destination_enabled(1, true).is_err());

        let encoding = EncodingSettings {
            bitrate: 4500,
            ..EncodingSettings::default()
        };
        channel.update_destination_encoding(0, encoding).unwrap();
        assert_eq!(channel.destination(0).unwrap().encoding.bitrate, 4500);
        assert!(channel.update_destination_encoding(3, encoding).is_err());
    }

    #[test]
    fn test_bulk_enable_skips_backups() {
        let mut channel = channel_with(3);
        link(&mut channel, 0, 1);
        channel.destinations[1].enabled = false;

        let outcome = channel.bulk_set_enabled(&[0, 1, 2, 9], false);

        assert_eq!(outcome, BulkOutcome { succeeded: 2, failed: 2 });
        assert!(!channel.destination(0).unwrap().enabled);
        assert!(!channel.destination(2).unwrap().enabled);
    }

    #[test]
    fn test_bulk_remove_uses_original_positions() {
        let mut channel = channel_with(4);
        let keep_id = channel.destinations[1].id.clone();

        let outcome = channel.bulk_remove(&[0, 2, 3]);

        assert_eq!(outcome.succeeded, 3);
        assert_eq!(channel.len(), 1);
        assert_eq!(channel.destinations[0].id, keep_id);
    }

    #[test]
    fn test_bulk_update_encoding_counts_failures() {
        let mut channel = channel_with(2);
        let encoding = EncodingSettings {
            bitrate: 2500,
            ..EncodingSettings::default()
        };
        let outcome = channel.bulk_update_encoding(&[0, 1, 5], encoding);
        assert_eq!(outcome, BulkOutcome { succeeded: 2, failed: 1 });
        assert!(channel.destinations().iter().all(|d| d.encoding.bitrate == 2500));
    }

    #[test]
    fn test_duplicate_drops_links_and_status() {
        let mut channel = channel_with(2);
        link(&mut channel, 0, 1);
        channel.destinations[1].enabled = false;
        channel.status = ChannelStatus::Active;
        channel.process_reference = Some("proc".to_string());

        let copy = channel.duplicate("Copy");

        assert_ne!(copy.id, channel.id);
        assert_eq!(copy.name, "Copy");
        assert_eq!(copy.status, ChannelStatus::Inactive);
        assert!(copy.process_reference.is_none());
        assert_eq!(copy.len(), 2);
        assert!(copy.destinations().iter().all(|d| !d.is_backup() && !d.has_backup()));
        assert!(copy.destination(0).unwrap().enabled);
        assert!(!copy.destination(1).unwrap().enabled);
        assert_ne!(copy.destinations[0].id, channel.destinations[0].id);
    }

    #[test]
    fn test_repair_links_drops_one_sided_pointers() {
        let mut channel = channel_with(3);
        link(&mut channel, 0, 1);
        channel.destinations[2].primary_id = Some("missing".to_string());
        channel.destinations[0].consecutive_failures = 5;

        let dropped = channel.repair_links();

        assert_eq!(dropped, 1);
        assert_eq!(channel.backup_index_of(0), Some(1));
        assert!(!channel.destination(2).unwrap().is_backup());
        assert_eq!(channel.destination(0).unwrap().consecutive_failures, 0);
    }

    #[test]
    fn test_repair_links_breaks_chains() {
        let mut channel = channel_with(3);
        link(&mut channel, 0, 1);
        link(&mut channel, 1, 2);

        let dropped = channel.repair_links();

        assert_eq!(dropped, 1);
        assert_eq!(channel.backup_index_of(0), Some(1));
        assert_eq!(channel.primary_index_of(1), Some(0));
        assert!(!channel.destination(1).unwrap().has_backup());
        assert!(!channel.destination(2).unwrap().is_backup());
        for index in 0..channel.len() {
            let dest = channel.destination(index).unwrap();
            assert!(!(dest.is_backup() && dest.has_backup()));
        }
    }

    #[test]
    fn test_health_monitoring_fills_defaults() {
        let mut channel = Channel::new("Monitored");
        channel.health_check_interval_sec = 0;
        channel.failure_threshold = 0;
        channel.set_health_monitoring(true);
        assert!(channel.health_monitoring_enabled);
        assert_eq!(channel.health_check_interval_sec, DEFAULT_HEALTH_CHECK_INTERVAL_SECS);
        assert_eq!(channel.failure_threshold, DEFAULT_FAILURE_THRESHOLD);
    }
}
