//! Audit hand-off. One event per completed mutation; the sink decides
//! where it lands. Recording is synchronous and must not block, so the
//! default sink just writes a log line.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub action: String,
    pub ticket_id: Uuid,
    pub actor_id: Uuid,
    pub before: Option<String>,
    pub after: Option<String>,
    pub at: DateTime<Utc>,
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn record(&self, event: AuditEvent) {
        log::info!(
            "audit: {} ticket={} actor={} {} -> {}",
            event.action,
            event.ticket_id,
            event.actor_id,
            event.before.as_deref().unwrap_or("-"),
            event.after.as_deref().unwrap_or("-"),
        );
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    pub(crate) struct RecordingAuditSink {
        pub events: Mutex<Vec<AuditEvent>>,
    }

    impl RecordingAuditSink {
        pub(crate) fn new() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn actions(&self) -> Vec<String> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .map(|e| e.action.clone())
                .collect()
        }
    }

    impl AuditSink for RecordingAuditSink {
        fn record(&self, event: AuditEvent) {
            self.events.lock().unwrap().push(event);
        }
    }
}
