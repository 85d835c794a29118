// Event Sink
// Outbound notifications for failover and health changes

use serde::Serialize;
use serde_json::Value;

pub const EVENT_FAILOVER_TRIGGERED: &str = "failover://triggered";
pub const EVENT_FAILOVER_RESTORED: &str = "failover://restored";
pub const EVENT_FAILOVER_ERROR: &str = "failover://error";
pub const EVENT_CHANNEL_HEALTH: &str = "channel://health";

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &str, payload: Value);
}

/// Writes every event to the log under the `events` target
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn emit(&self, event: &str, payload: Value) {
        log::info!(target: "events", "{event} {payload}");
    }
}

pub fn emit_event<T: Serialize>(sink: &dyn EventSink, event: &str, payload: &T) {
    if let Ok(value) = serde_json::to_value(payload) {
        sink.emit(event, value);
    }
}

#[cfg(test)]
pub(crate) mod recording {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct RecordingEventSink {
        pub events: Mutex<Vec<(String, Value)>>,
    }

    impl RecordingEventSink {
        pub fn names(&self) -> Vec<String> {
            self.events.lock().unwrap().iter().map(|(name, _)| name.clone()).collect()
        }
    }

    impl EventSink for RecordingEventSink {
        fn emit(&self, event: &str, payload: Value) {
            self.events.lock().unwrap().push((event.to_string(), payload));
        }
    }
}
