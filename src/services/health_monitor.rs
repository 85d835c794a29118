// HealthMonitor Service
// Feeds relay health into destinations and runs the failover policy on a timer

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use crate::models::{Channel, Destination};
use crate::services::{
    emit_event, lock_channel, output_target, ChannelManager, CheckReport, EventSink,
    FailoverEngine, OutputHealth, RelayClient, RelayResult, EVENT_CHANNEL_HEALTH,
    EVENT_FAILOVER_ERROR, EVENT_FAILOVER_RESTORED, EVENT_FAILOVER_TRIGGERED,
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct DestinationHealthEvent {
    channel_id: String,
    destination_id: String,
    connected: bool,
    consecutive_failures: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct FailoverEvent<'a> {
    channel_id: &'a str,
    channel_name: &'a str,
    destination_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

/// Apply one health observation to a destination.
///
/// A connected observation resets the failure counter; anything else,
/// including a failed query, counts as one more consecutive failure.
pub fn record_health(dest: &mut Destination, observation: &RelayResult<OutputHealth>, now: DateTime<Utc>) {
    dest.last_health_check = Some(now);
    match observation {
        Ok(health) if health.connected => {
            dest.connected = true;
            dest.consecutive_failures = 0;
        }
        Ok(_) => {
            dest.connected = false;
            dest.consecutive_failures = dest.consecutive_failures.saturating_add(1);
        }
        Err(e) => {
            log::debug!("Health query failed for destination {}: {e}", dest.id);
            dest.connected = false;
            dest.consecutive_failures = dest.consecutive_failures.saturating_add(1);
        }
    }
}

/// Periodic health observation and failover scheduler
pub struct HealthMonitor {
    manager: Arc<ChannelManager>,
    events: Arc<dyn EventSink>,
    tick: Duration,
    last_checked: Mutex<HashMap<String, Instant>>,
}

impl HealthMonitor {
    pub fn new(manager: Arc<ChannelManager>, events: Arc<dyn EventSink>, tick: Duration) -> Self {
        Self {
            manager,
            events,
            tick,
            last_checked: Mutex::new(HashMap::new()),
        }
    }

    /// Query the relay for every destination that should be streaming.
    /// Failed-over primaries are detached from the relay, so they are probed
    /// instead to see whether they have recovered.
    pub fn observe_channel(channel: &mut Channel, client: &dyn RelayClient, now: DateTime<Utc>) {
        for index in 0..channel.len() {
            let dest = &channel.destinations[index];
            let attached = dest.enabled;
            if !attached && !(dest.failover_active && dest.has_backup()) {
                continue;
            }

            let observation = output_target(channel, index).and_then(|target| {
                if attached {
                    client.output_health(&target)
                } else {
                    client.probe_output(&target)
                }
            });
            record_health(&mut channel.destinations[index], &observation, now);
        }
    }

    /// Scheduler tick fine enough for every monitored channel: the shortest
    /// of `fallback_secs` and each channel's own interval, at least a second.
    /// Channels registered later with a shorter interval are still checked
    /// at this tick.
    pub fn base_tick(manager: &ChannelManager, fallback_secs: u64) -> Duration {
        let shortest = manager
            .channels()
            .iter()
            .filter_map(|shared| {
                let channel = lock_channel(shared);
                (channel.health_monitoring_enabled && channel.health_check_interval_sec > 0)
                    .then_some(channel.health_check_interval_sec)
            })
            .fold(fallback_secs, u64::min);
        Duration::from_secs(shortest.max(1))
    }

    /// Observe health, then run the failover policy, emitting events for
    /// every change. Returns what the policy did.
    pub fn tick_channel(
        channel: &mut Channel,
        client: &dyn RelayClient,
        events: &dyn EventSink,
        now: DateTime<Utc>,
    ) -> CheckReport {
        Self::observe_channel(channel, client, now);

        for dest in channel.destinations() {
            if dest.last_health_check == Some(now) {
                emit_event(
                    events,
                    EVENT_CHANNEL_HEALTH,
                    &DestinationHealthEvent {
                        channel_id: channel.id.clone(),
                        destination_id: dest.id.clone(),
                        connected: dest.connected,
                        consecutive_failures: dest.consecutive_failures,
                    },
                );
            }
        }

        let report = FailoverEngine::check_failover_at(channel, client, now);

        let emit = |event: &str, destination_id: &str, error: Option<&str>| {
            emit_event(
                events,
                event,
                &FailoverEvent {
                    channel_id: &channel.id,
                    channel_name: &channel.name,
                    destination_id,
                    error,
                },
            );
        };
        for id in &report.triggered {
            emit(EVENT_FAILOVER_TRIGGERED, id.as_str(), None);
        }
        for id in &report.restored {
            emit(EVENT_FAILOVER_RESTORED, id.as_str(), None);
        }
        for (id, error) in &report.failed {
            log::error!("Failover action for destination {id} failed: {error}");
            emit(EVENT_FAILOVER_ERROR, id.as_str(), Some(error.as_str()));
        }

        report
    }

    /// One pass over all channels that are active, monitored and due
    pub fn tick(&self) {
        let Ok(client) = self.manager.relay() else {
            return;
        };
        let now = Utc::now();

        for shared in self.manager.channels() {
            let mut channel = lock_channel(&shared);
            if !channel.is_active() || !channel.health_monitoring_enabled {
                continue;
            }
            if !self.is_due(&channel.id, channel.health_check_interval_sec) {
                continue;
            }
            Self::tick_channel(&mut channel, client, self.events.as_ref(), now);
        }
    }

    fn is_due(&self, channel_id: &str, interval_secs: u64) -> bool {
        let mut last_checked = self
            .last_checked
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();
        match last_checked.get(channel_id) {
            Some(last) if now.duration_since(*last) < Duration::from_secs(interval_secs) => false,
            _ => {
                last_checked.insert(channel_id.to_string(), now);
                true
            }
        }
    }

    /// Tick until `shutdown` flips to true. Relay calls block, so each pass
    /// runs on the blocking pool.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        log::info!("Health monitor started (tick every {}s)", self.tick.as_secs());
        let mut interval = tokio::time::interval(self.tick);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let monitor = self.clone();
                    if let Err(e) = tokio::task::spawn_blocking(move || monitor.tick()).await {
                        log::error!("Health monitor pass panicked: {e}");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        log::info!("Health monitor stopped");
    }
}
