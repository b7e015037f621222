//! Run-scoped event logging handed to the orchestrator and validator.

use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLevel {
    Debug,
    Info,
    Warn,
    Error,
}

pub trait EventLog: Send + Sync {
    fn record(&self, level: EventLevel, message: &str);

    fn debug(&self, message: &str) {
        self.record(EventLevel::Debug, message);
    }

    fn info(&self, message: &str) {
        self.record(EventLevel::Info, message);
    }

    fn warn(&self, message: &str) {
        self.record(EventLevel::Warn, message);
    }

    fn error(&self, message: &str) {
        self.record(EventLevel::Error, message);
    }
}

/// Forwards events to `tracing` under the `link_analysis` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventLog;

impl EventLog for TracingEventLog {
    fn record(&self, level: EventLevel, message: &str) {
        match level {
            EventLevel::Debug => tracing::debug!(target: "link_analysis", "{}", message),
            EventLevel::Info => tracing::info!(target: "link_analysis", "{}", message),
            EventLevel::Warn => tracing::warn!(target: "link_analysis", "{}", message),
            EventLevel::Error => tracing::error!(target: "link_analysis", "{}", message),
        }
    }
}

/// Keeps events in memory, for callers that inspect what a run reported.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    events: Mutex<Vec<(EventLevel, String)>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(EventLevel, String)> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn contains(&self, level: EventLevel, needle: &str) -> bool {
        self.events()
            .iter()
            .any(|(l, message)| *l == level && message.contains(needle))
    }
}

impl EventLog for MemoryEventLog {
    fn record(&self, level: EventLevel, message: &str) {
        if let Ok(mut events) = self.events.lock() {
            events.push((level, message.to_string()));
        }
    }
}
