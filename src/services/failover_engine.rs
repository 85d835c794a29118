// Failover Engine
// Backup linkage and the per-pair failover state machine

use chrono::{DateTime, Utc};
use serde::Serialize;
use crate::models::{Channel, ChannelError, ChannelResult};
use crate::services::{output_target, PlatformRegistry, RelayClient};

/// One action the policy wants taken on a primary destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "action")]
pub enum FailoverDecision {
    Trigger { destination_id: String, index: usize },
    Restore { destination_id: String, index: usize },
}

impl FailoverDecision {
    pub fn destination_id(&self) -> &str {
        match self {
            FailoverDecision::Trigger { destination_id, .. }
            | FailoverDecision::Restore { destination_id, .. } => destination_id,
        }
    }
}

/// Decisions computed from one snapshot of a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailoverPlan {
    pub decided_at: DateTime<Utc>,
    pub decisions: Vec<FailoverDecision>,
}

impl FailoverPlan {
    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }
}

/// What a policy tick actually did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckReport {
    /// Primaries newly failed over during this tick
    pub triggered: Vec<String>,
    pub restored: Vec<String>,
    /// Destination id and error for decisions that could not be applied
    pub failed: Vec<(String, String)>,
}

impl CheckReport {
    pub fn is_empty(&self) -> bool {
        self.triggered.is_empty() && self.restored.is_empty() && self.failed.is_empty()
    }
}

/// Failover operations on a channel's destinations.
///
/// Callers serialize access per channel; the engine holds no state.
pub struct FailoverEngine;

impl FailoverEngine {
    /// Make `backup_index` the backup of `primary_index`.
    ///
    /// Replaces any existing backup of the primary. A destination that is
    /// already a backup cannot be a primary, and a primary with its own
    /// backup cannot become a backup. A backup currently serving another
    /// primary is detached from it first.
    pub fn set_output_backup(
        channel: &mut Channel,
        primary_index: usize,
        backup_index: usize,
    ) -> ChannelResult<()> {
        channel.check_index(primary_index)?;
        channel.check_index(backup_index)?;
        if primary_index == backup_index {
            return Err(ChannelError::SelfBackup);
        }

        let primary_id = channel.destinations[primary_index].id.clone();
        let backup_id = channel.destinations[backup_index].id.clone();

        if channel.destinations[primary_index].backup_id.as_deref() == Some(backup_id.as_str()) {
            return Ok(());
        }
        if channel.destinations[primary_index].is_backup() {
            return Err(ChannelError::InvalidLinkage(format!(
                "destination {primary_index} is itself a backup"
            )));
        }
        if channel.destinations[backup_index].has_backup() {
            return Err(ChannelError::InvalidLinkage(format!(
                "destination {backup_index} already has a backup"
            )));
        }

        // Detach the candidate from any primary it currently serves
        if let Some(previous_primary) = channel.primary_index_of(backup_index) {
            Self::unlink(channel, previous_primary, backup_index);
        }

        // Fully release the primary's old backup
        if let Some(old_backup) = channel.backup_index_of(primary_index) {
            log::info!(
                "Replacing backup of destination {primary_index} in channel '{}'",
                channel.name
            );
            Self::unlink(channel, primary_index, old_backup);
        }

        let primary = &mut channel.destinations[primary_index];
        primary.backup_id = Some(backup_id);
        primary.clear_failover();

        let backup = &mut channel.destinations[backup_index];
        backup.pre_link_enabled = Some(backup.enabled);
        backup.primary_id = Some(primary_id);
        backup.enabled = false;
        backup.clear_failover();

        log::info!(
            "Destination {backup_index} is now the backup of destination {primary_index} in channel '{}'",
            channel.name
        );
        Ok(())
    }

    /// Remove the backup linkage of `primary_index`.
    ///
    /// A pair in Normal state returns to its pre-link configuration. A pair
    /// that is failed over keeps its enabled flags but leaves failover,
    /// since an unlinked primary cannot be failed over.
    pub fn remove_output_backup(channel: &mut Channel, primary_index: usize) -> ChannelResult<()> {
        channel.check_index(primary_index)?;
        let backup_index = channel
            .backup_index_of(primary_index)
            .ok_or(ChannelError::NoBackup {
                index: primary_index,
            })?;

        Self::unlink(channel, primary_index, backup_index);

        log::info!(
            "Removed backup {backup_index} from destination {primary_index} in channel '{}'",
            channel.name
        );
        Ok(())
    }

    fn unlink(channel: &mut Channel, primary_index: usize, backup_index: usize) {
        let was_failed_over = channel.destinations[primary_index].failover_active;

        let primary = &mut channel.destinations[primary_index];
        primary.backup_id = None;
        primary.clear_failover();

        let backup = &mut channel.destinations[backup_index];
        backup.primary_id = None;
        let pre_link_enabled = backup.pre_link_enabled.take();
        if !was_failed_over {
            if let Some(enabled) = pre_link_enabled {
                backup.enabled = enabled;
            }
        }
        backup.clear_failover();
    }

    pub fn trigger_failover(
        channel: &mut Channel,
        client: &dyn RelayClient,
        primary_index: usize,
    ) -> ChannelResult<()> {
        Self::trigger_failover_at(channel, client, primary_index, Utc::now())
    }

    /// Switch `primary_index` over to its backup.
    ///
    /// On an active channel the backup output is brought up before the
    /// primary is taken down. If the backup cannot be enabled the call fails
    /// and no local state changes. Inactive channels only record the state.
    pub fn trigger_failover_at(
        channel: &mut Channel,
        client: &dyn RelayClient,
        primary_index: usize,
        now: DateTime<Utc>,
    ) -> ChannelResult<()> {
        channel.check_index(primary_index)?;
        let backup_index = channel
            .backup_index_of(primary_index)
            .ok_or(ChannelError::NoBackup {
                index: primary_index,
            })?;

        if channel.destinations[primary_index].failover_active {
            log::debug!("Failover already active for destination {primary_index}");
            return Ok(());
        }

        let primary_name = PlatformRegistry::global().display_name(channel.destinations[primary_index].service);
        let backup_name = PlatformRegistry::global().display_name(channel.destinations[backup_index].service);
        log::info!(
            "Triggering failover from {primary_name} to {backup_name} in channel '{}'",
            channel.name
        );

        if channel.is_active() {
            let backup_target = output_target(channel, backup_index)?;
            if let Err(e) = client.set_output_enabled(&backup_target, true) {
                log::error!("Failed to enable backup output {}: {e}", backup_target.output.output_id);
                return Err(e.into());
            }

            if channel.destinations[primary_index].enabled {
                match output_target(channel, primary_index) {
                    Ok(primary_target) => {
                        if let Err(e) = client.set_output_enabled(&primary_target, false) {
                            log::warn!("Failed to disable primary during failover: {e}");
                        }
                    }
                    Err(e) => log::warn!("Failed to address primary during failover: {e}"),
                }
            }

            channel.destinations[primary_index].enabled = false;
            channel.destinations[backup_index].enabled = true;
        }

        for index in [primary_index, backup_index] {
            let dest = &mut channel.destinations[index];
            dest.failover_active = true;
            dest.failover_start_time = Some(now);
        }

        log::info!("Failover complete: {primary_name} -> {backup_name}");
        Ok(())
    }

    pub fn restore_primary(
        channel: &mut Channel,
        client: &dyn RelayClient,
        primary_index: usize,
    ) -> ChannelResult<()> {
        Self::restore_primary_at(channel, client, primary_index, Utc::now())
    }

    /// Return `primary_index` from its backup and start a fresh trial period.
    ///
    /// On an active channel the primary output is re-enabled first; failure
    /// leaves the pair failed over.
    pub fn restore_primary_at(
        channel: &mut Channel,
        client: &dyn RelayClient,
        primary_index: usize,
        now: DateTime<Utc>,
    ) -> ChannelResult<()> {
        channel.check_index(primary_index)?;
        let backup_index = channel
            .backup_index_of(primary_index)
            .ok_or(ChannelError::NoBackup {
                index: primary_index,
            })?;

        if !channel.destinations[primary_index].failover_active {
            log::debug!("No active failover to restore for destination {primary_index}");
            return Ok(());
        }

        if channel.is_active() {
            let primary_target = output_target(channel, primary_index)?;
            if let Err(e) = client.set_output_enabled(&primary_target, true) {
                log::error!("Failed to re-enable primary output {}: {e}", primary_target.output.output_id);
                return Err(e.into());
            }

            match output_target(channel, backup_index) {
                Ok(backup_target) => {
                    if let Err(e) = client.set_output_enabled(&backup_target, false) {
                        log::warn!("Failed to disable backup during restore: {e}");
                    }
                }
                Err(e) => log::warn!("Failed to address backup during restore: {e}"),
            }

            channel.destinations[primary_index].enabled = true;
            channel.destinations[backup_index].enabled = false;
        }

        let started = channel.destinations[primary_index].failover_start_time;
        channel.destinations[primary_index].clear_failover();
        channel.destinations[primary_index].consecutive_failures = 0;
        channel.destinations[backup_index].clear_failover();

        let duration = started.map(|t| (now - t).num_seconds()).unwrap_or(0);
        log::info!(
            "Primary destination {primary_index} restored in channel '{}' (failover duration: {duration} seconds)",
            channel.name
        );
        Ok(())
    }

    /// Evaluate the failover policy against a snapshot of the channel.
    ///
    /// Only primaries with a backup are considered, and nothing is planned
    /// unless the channel is active.
    pub fn plan(channel: &Channel, now: DateTime<Utc>) -> FailoverPlan {
        let mut decisions = Vec::new();

        if channel.is_active() {
            for (index, dest) in channel.destinations.iter().enumerate() {
                if dest.is_backup() || channel.backup_index_of(index).is_none() {
                    continue;
                }

                let destination_id = dest.id.clone();
                if dest.consecutive_failures >= channel.failure_threshold && !dest.failover_active {
                    decisions.push(FailoverDecision::Trigger { destination_id, index });
                } else if dest.connected && dest.consecutive_failures == 0 && dest.failover_active {
                    decisions.push(FailoverDecision::Restore { destination_id, index });
                }
            }
        }

        FailoverPlan {
            decided_at: now,
            decisions,
        }
    }

    /// Carry out a plan. Decisions are re-addressed by destination id so a
    /// plan stays valid if positions moved since it was computed.
    pub fn apply(channel: &mut Channel, client: &dyn RelayClient, plan: &FailoverPlan) -> CheckReport {
        let mut report = CheckReport::default();

        for decision in &plan.decisions {
            let id = decision.destination_id().to_string();
            let Some(index) = channel.position_of(&id) else {
                report.failed.push((id, "destination no longer exists".to_string()));
                continue;
            };

            match decision {
                FailoverDecision::Trigger { .. } => {
                    let failures = channel.destinations[index].consecutive_failures;
                    log::warn!(
                        "Primary destination {index} has failed {failures} times, triggering failover"
                    );
                    match Self::trigger_failover_at(channel, client, index, plan.decided_at) {
                        Ok(()) => report.triggered.push(id),
                        Err(e) => report.failed.push((id, e.to_string())),
                    }
                }
                FailoverDecision::Restore { .. } => {
                    log::info!("Primary destination {index} has recovered, restoring");
                    match Self::restore_primary_at(channel, client, index, plan.decided_at) {
                        Ok(()) => report.restored.push(id),
                        Err(e) => report.failed.push((id, e.to_string())),
                    }
                }
            }
        }

        report
    }

    pub fn check_failover_at(
        channel: &mut Channel,
        client: &dyn RelayClient,
        now: DateTime<Utc>,
    ) -> CheckReport {
        let plan = Self::plan(channel, now);
        if plan.is_empty() {
            return CheckReport::default();
        }
        Self::apply(channel, client, &plan)
    }

    /// Periodic policy tick. Returns true only when a new failover was
    /// triggered; inspect destinations for restores or failures.
    pub fn check_failover(channel: &mut Channel, client: &dyn RelayClient) -> bool {
        !Self::check_failover_at(channel, client, Utc::now())
            .triggered
            .is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChannelStatus, Destination, EncodingSettings, Orientation, StreamingService};
    use crate::services::relay_client::mock::{MockRelayClient, RelayCall};
    use chrono::Duration;
    use std::sync::atomic::Ordering;

    fn channel_with(count: usize) -> Channel {
        let mut channel = Channel::new("Failover Test");
        for i in 0..count {
            channel.add_destination(
                StreamingService::Youtube,
                format!("key_{i}"),
                Orientation::Horizontal,
                EncodingSettings::default(),
            );
        }
        channel
    }

    fn active_pair() -> Channel {
        let mut channel = channel_with(2);
        FailoverEngine::set_output_backup(&mut channel, 0, 1).unwrap();
        channel.failure_threshold = 3;
        channel.status = ChannelStatus::Active;
        channel.process_reference = Some("process_0".to_string());
        channel
    }

    fn dest(channel: &Channel, index: usize) -> &Destination {
        channel.destination(index).unwrap()
    }

    fn assert_links_consistent(channel: &Channel) {
        for index in 0..channel.len() {
            if let Some(backup) = channel.backup_index_of(index) {
                assert_ne!(backup, index);
                assert_eq!(channel.primary_index_of(backup), Some(index));
                assert!(dest(channel, backup).is_backup());
                assert_eq!(
                    dest(channel, index).failover_active(),
                    dest(channel, backup).failover_active()
                );
            } else {
                assert!(!dest(channel, index).has_backup());
            }
            if let Some(primary) = channel.primary_index_of(index) {
                assert_eq!(channel.backup_index_of(primary), Some(index));
            } else {
                assert!(!dest(channel, index).is_backup());
            }
            if !dest(channel, index).has_backup() && !dest(channel, index).is_backup() {
                assert!(!dest(channel, index).failover_active());
            }
        }
    }

    #[test]
    fn test_set_backup_links_both_sides() {
        let mut channel = channel_with(2);
        FailoverEngine::set_output_backup(&mut channel, 0, 1).unwrap();

        assert_eq!(channel.backup_index_of(0), Some(1));
        assert_eq!(channel.primary_index_of(1), Some(0));
        assert!(dest(&channel, 1).is_backup());
        assert!(!dest(&channel, 1).enabled);
        assert!(dest(&channel, 0).enabled);
        assert_links_consistent(&channel);
    }

    #[test]
    fn test_set_backup_rejects_invalid_indices() {
        let mut channel = channel_with(2);
        assert!(matches!(
            FailoverEngine::set_output_backup(&mut channel, 0, 0),
            Err(ChannelError::SelfBackup)
        ));
        assert!(matches!(
            FailoverEngine::set_output_backup(&mut channel, 0, 2),
            Err(ChannelError::IndexOutOfRange { .. })
        ));
        assert!(FailoverEngine::set_output_backup(&mut channel, 5, 1).is_err());
        assert!(channel.destinations().iter().all(|d| !d.is_backup() && !d.has_backup() && d.enabled));
    }

    #[test]
    fn test_set_backup_replaces_existing_backup() {
        let mut channel = channel_with(3);
        FailoverEngine::set_output_backup(&mut channel, 0, 1).unwrap();
        FailoverEngine::set_output_backup(&mut channel, 0, 2).unwrap();

        assert_eq!(channel.backup_index_of(0), Some(2));
        assert!(!dest(&channel, 1).is_backup());
        assert!(dest(&channel, 1).enabled);
        assert!(dest(&channel, 2).is_backup());
        assert_links_consistent(&channel);
    }

    #[test]
    fn test_replacing_backup_during_failover_clears_pair_state() {
        let client = MockRelayClient::new();
        let mut channel = channel_with(3);
        FailoverEngine::set_output_backup(&mut channel, 0, 1).unwrap();
        FailoverEngine::trigger_failover(&mut channel, &client, 0).unwrap();
        assert!(dest(&channel, 1).failover_active());

        FailoverEngine::set_output_backup(&mut channel, 0, 2).unwrap();

        assert!(!dest(&channel, 0).failover_active());
        assert!(!dest(&channel, 1).failover_active());
        assert!(!dest(&channel, 1).is_backup());
        assert_links_consistent(&channel);
    }

    #[test]
    fn test_set_backup_rejects_chains() {
        let mut channel = channel_with(3);
        FailoverEngine::set_output_backup(&mut channel, 0, 1).unwrap();

        // A backup cannot become a primary
        assert!(matches!(
            FailoverEngine::set_output_backup(&mut channel, 1, 2),
            Err(ChannelError::InvalidLinkage(_))
        ));
        // A primary with a backup cannot become a backup
        assert!(matches!(
            FailoverEngine::set_output_backup(&mut channel, 2, 0),
            Err(ChannelError::InvalidLinkage(_))
        ));
        assert_links_consistent(&channel);
    }

    #[test]
    fn test_backup_moves_between_primaries() {
        let mut channel = channel_with(3);
        FailoverEngine::set_output_backup(&mut channel, 0, 2).unwrap();
        FailoverEngine::set_output_backup(&mut channel, 1, 2).unwrap();

        assert!(!dest(&channel, 0).has_backup());
        assert_eq!(channel.backup_index_of(1), Some(2));
        assert_eq!(channel.primary_index_of(2), Some(1));
        assert!(!dest(&channel, 2).enabled);
        assert_links_consistent(&channel);
    }

    #[test]
    fn test_link_unlink_round_trip() {
        let mut channel = channel_with(2);
        channel.destination_mut(1).unwrap().consecutive_failures = 1;
        let before: Vec<(bool, bool, bool, bool)> = channel
            .destinations()
            .iter()
            .map(|d| (d.enabled, d.is_backup(), d.has_backup(), d.failover_active()))
            .collect();

        FailoverEngine::set_output_backup(&mut channel, 0, 1).unwrap();
        FailoverEngine::remove_output_backup(&mut channel, 0).unwrap();

        let after: Vec<(bool, bool, bool, bool)> = channel
            .destinations()
            .iter()
            .map(|d| (d.enabled, d.is_backup(), d.has_backup(), d.failover_active()))
            .collect();
        assert_eq!(before, after);
        assert_eq!(dest(&channel, 1).consecutive_failures, 1);
    }

    #[test]
    fn test_remove_backup_without_backup_fails() {
        let mut channel = channel_with(2);
        assert!(matches!(
            FailoverEngine::remove_output_backup(&mut channel, 0),
            Err(ChannelError::NoBackup { index: 0 })
        ));
        assert!(FailoverEngine::remove_output_backup(&mut channel, 7).is_err());
    }

    #[test]
    fn test_remove_backup_during_failover_keeps_enabled_flags() {
        let client = MockRelayClient::new();
        let mut channel = active_pair();
        FailoverEngine::trigger_failover(&mut channel, &client, 0).unwrap();

        FailoverEngine::remove_output_backup(&mut channel, 0).unwrap();

        assert!(!dest(&channel, 0).enabled);
        assert!(dest(&channel, 1).enabled);
        assert!(!dest(&channel, 0).failover_active());
        assert!(!dest(&channel, 1).failover_active());
        assert_links_consistent(&channel);
    }

    #[test]
    fn test_check_triggers_at_threshold() {
        let client = MockRelayClient::new();
        let mut channel = active_pair();
        {
            let primary = channel.destination_mut(0).unwrap();
            primary.connected = false;
            primary.consecutive_failures = 3;
        }

        assert!(FailoverEngine::check_failover(&mut channel, &client));
        assert!(dest(&channel, 0).failover_active());
        assert!(dest(&channel, 1).failover_active());
        assert!(dest(&channel, 1).enabled);
        assert!(!dest(&channel, 0).enabled);
        assert_links_consistent(&channel);

        let backup_output = dest(&channel, 1).output_id();
        let primary_output = dest(&channel, 0).output_id();
        assert_eq!(
            client.calls(),
            vec![
                RelayCall::SetEnabled { output_id: backup_output, enabled: true },
                RelayCall::SetEnabled { output_id: primary_output, enabled: false },
            ]
        );

        // Recovery restores the primary and reports no new failover
        {
            let primary = channel.destination_mut(0).unwrap();
            primary.connected = true;
            primary.consecutive_failures = 0;
        }
        assert!(!FailoverEngine::check_failover(&mut channel, &client));
        assert!(!dest(&channel, 0).failover_active());
        assert!(!dest(&channel, 1).failover_active());
        assert!(dest(&channel, 0).enabled);
        assert!(!dest(&channel, 1).enabled);
        assert_links_consistent(&channel);
    }

    #[test]
    fn test_check_below_threshold_does_nothing() {
        let client = MockRelayClient::new();
        let mut channel = active_pair();
        channel.destination_mut(0).unwrap().consecutive_failures = 2;

        assert!(!FailoverEngine::check_failover(&mut channel, &client));
        assert!(!dest(&channel, 0).failover_active());
        assert!(client.calls().is_empty());
    }

    #[test]
    fn test_check_ignores_inactive_channel() {
        let client = MockRelayClient::new();
        let mut channel = active_pair();
        channel.status = ChannelStatus::Inactive;
        channel.destination_mut(0).unwrap().consecutive_failures = 10;

        assert!(!FailoverEngine::check_failover(&mut channel, &client));
        assert!(!dest(&channel, 0).failover_active());
        assert!(FailoverEngine::plan(&channel, Utc::now()).is_empty());
    }

    #[test]
    fn test_check_never_triggers_backups() {
        let client = MockRelayClient::new();
        let mut channel = active_pair();
        channel.destination_mut(1).unwrap().consecutive_failures = 50;

        let plan = FailoverEngine::plan(&channel, Utc::now());
        assert!(plan.is_empty());
        assert!(!FailoverEngine::check_failover(&mut channel, &client));
        assert!(!dest(&channel, 1).failover_active());
    }

    #[test]
    fn test_check_skips_primaries_without_backup() {
        let client = MockRelayClient::new();
        let mut channel = channel_with(1);
        channel.status = ChannelStatus::Active;
        channel.destination_mut(0).unwrap().consecutive_failures = 9;

        assert!(!FailoverEngine::check_failover(&mut channel, &client));
        assert!(!dest(&channel, 0).failover_active());
    }

    #[test]
    fn test_trigger_is_idempotent() {
        let client = MockRelayClient::new();
        let mut channel = active_pair();
        let first = Utc::now();
        let later = first + Duration::seconds(30);

        FailoverEngine::trigger_failover_at(&mut channel, &client, 0, first).unwrap();
        let calls_after_first = client.calls().len();
        FailoverEngine::trigger_failover_at(&mut channel, &client, 0, later).unwrap();

        assert!(dest(&channel, 0).failover_active());
        assert_eq!(dest(&channel, 0).failover_start_time(), Some(first));
        assert_eq!(dest(&channel, 1).failover_start_time(), Some(first));
        assert_eq!(client.calls().len(), calls_after_first);
    }

    #[test]
    fn test_trigger_on_inactive_channel_records_state_only() {
        let client = MockRelayClient::new();
        let mut channel = channel_with(2);
        FailoverEngine::set_output_backup(&mut channel, 0, 1).unwrap();

        FailoverEngine::trigger_failover(&mut channel, &client, 0).unwrap();

        assert!(dest(&channel, 0).failover_active());
        assert!(dest(&channel, 1).failover_active());
        assert!(dest(&channel, 0).enabled);
        assert!(!dest(&channel, 1).enabled);
        assert!(client.calls().is_empty());
    }

    #[test]
    fn test_trigger_requires_backup() {
        let client = MockRelayClient::new();
        let mut channel = channel_with(2);
        assert!(matches!(
            FailoverEngine::trigger_failover(&mut channel, &client, 0),
            Err(ChannelError::NoBackup { .. })
        ));
        assert!(FailoverEngine::trigger_failover(&mut channel, &client, 4).is_err());
        assert!(FailoverEngine::restore_primary(&mut channel, &client, 0).is_err());
    }

    #[test]
    fn test_failed_backup_enable_leaves_state_untouched() {
        let client = MockRelayClient::new();
        client.fail_enable.store(true, Ordering::SeqCst);
        let mut channel = active_pair();
        channel.destination_mut(0).unwrap().consecutive_failures = 3;

        let result = FailoverEngine::trigger_failover(&mut channel, &client, 0);

        assert!(matches!(result, Err(ChannelError::Relay(_))));
        assert!(!dest(&channel, 0).failover_active());
        assert!(!dest(&channel, 1).failover_active());
        assert!(dest(&channel, 0).enabled);
        assert!(!dest(&channel, 1).enabled);

        // The next tick retries and reports the failure
        let report = FailoverEngine::check_failover_at(&mut channel, &client, Utc::now());
        assert!(report.triggered.is_empty());
        assert_eq!(report.failed.len(), 1);
    }

    #[test]
    fn test_failed_primary_disable_still_fails_over() {
        let client = MockRelayClient::new();
        client.fail_disable.store(true, Ordering::SeqCst);
        let mut channel = active_pair();

        FailoverEngine::trigger_failover(&mut channel, &client, 0).unwrap();

        assert!(dest(&channel, 0).failover_active());
        assert!(!dest(&channel, 0).enabled);
    }

    #[test]
    fn test_restore_resets_failures_and_is_noop_when_normal() {
        let client = MockRelayClient::new();
        let mut channel = active_pair();

        FailoverEngine::restore_primary(&mut channel, &client, 0).unwrap();
        assert!(client.calls().is_empty());

        channel.destination_mut(0).unwrap().consecutive_failures = 4;
        FailoverEngine::trigger_failover(&mut channel, &client, 0).unwrap();
        FailoverEngine::restore_primary(&mut channel, &client, 0).unwrap();

        assert_eq!(dest(&channel, 0).consecutive_failures, 0);
        assert!(!dest(&channel, 0).failover_active());
        assert!(dest(&channel, 0).failover_start_time().is_none());
    }

    #[test]
    fn test_failed_restore_keeps_failover() {
        let client = MockRelayClient::new();
        let mut channel = active_pair();
        FailoverEngine::trigger_failover(&mut channel, &client, 0).unwrap();
        client.fail_enable.store(true, Ordering::SeqCst);

        assert!(FailoverEngine::restore_primary(&mut channel, &client, 0).is_err());
        assert!(dest(&channel, 0).failover_active());
        assert!(dest(&channel, 1).failover_active());
        assert!(dest(&channel, 1).enabled);
    }

    #[test]
    fn test_plan_follows_destination_after_reorder() {
        let client = MockRelayClient::new();
        let mut channel = channel_with(3);
        FailoverEngine::set_output_backup(&mut channel, 1, 2).unwrap();
        channel.status = ChannelStatus::Active;
        channel.process_reference = Some("process_0".to_string());
        channel.destination_mut(1).unwrap().consecutive_failures = 3;

        let plan = FailoverEngine::plan(&channel, Utc::now());
        let primary_id = dest(&channel, 1).id.clone();
        channel.remove_destination(0).unwrap();

        let report = FailoverEngine::apply(&mut channel, &client, &plan);
        assert_eq!(report.triggered, vec![primary_id]);
        assert!(dest(&channel, 0).failover_active());
        assert!(dest(&channel, 1).failover_active());
    }

    #[test]
    fn test_remove_backup_destination_during_failover() {
        let client = MockRelayClient::new();
        let mut channel = channel_with(3);
        FailoverEngine::set_output_backup(&mut channel, 0, 2).unwrap();
        FailoverEngine::trigger_failover(&mut channel, &client, 0).unwrap();

        channel.remove_destination(2).unwrap();

        assert!(!dest(&channel, 0).failover_active());
        assert!(channel.backup_index_of(0).is_none());
        assert_links_consistent(&channel);
    }
}
