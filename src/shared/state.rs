use std::sync::Arc;

use crate::audit::AuditSink;
use crate::config::AppConfig;
use crate::escalation::EscalationNotifier;
use crate::sla::SlaTracker;
use crate::tasks::TaskSink;
use crate::tickets::{TicketService, TicketStore};

/// Shared handles behind every request and the background sweep.
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<TicketStore>,
    pub tracker: Arc<SlaTracker>,
    pub service: Arc<TicketService>,
    pub notifier: Arc<dyn EscalationNotifier>,
}

impl AppState {
    pub fn build(
        config: AppConfig,
        tracker: SlaTracker,
        notifier: Arc<dyn EscalationNotifier>,
        audit: Arc<dyn AuditSink>,
        tasks: Arc<dyn TaskSink>,
    ) -> Self {
        let store = Arc::new(TicketStore::new());
        let tracker = Arc::new(tracker);
        let service = Arc::new(TicketService::new(
            Arc::clone(&store),
            Arc::clone(&tracker),
            audit,
            tasks,
        ));
        Self {
            config,
            store,
            tracker,
            service,
            notifier,
        }
    }
}
