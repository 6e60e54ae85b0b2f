//! Periodic SLA sweep.
//!
//! Walks the store in batches, asks the tracker which breaches are new and
//! delivers one escalation per (ticket, breach kind). Ticket snapshots are
//! cloned out before any notification goes out, so delivery never happens
//! under a store lock. Batches yield to the runtime and observe the
//! shutdown token so a large store cannot wedge shutdown.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::{BreachKind, SlaTracker};
use crate::escalation::{BreachEvent, EscalationNotifier};
use crate::tickets::TicketStore;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("sweep cancelled by shutdown")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct SweepReport {
    pub scanned: usize,
    pub escalated: usize,
    pub batches: usize,
    pub at: DateTime<Utc>,
}

pub struct SlaSweeper {
    store: Arc<TicketStore>,
    tracker: Arc<SlaTracker>,
    notifier: Arc<dyn EscalationNotifier>,
    interval: Duration,
    batch_size: usize,
}

impl SlaSweeper {
    pub fn new(
        store: Arc<TicketStore>,
        tracker: Arc<SlaTracker>,
        notifier: Arc<dyn EscalationNotifier>,
        interval: Duration,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            tracker,
            notifier,
            interval,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        log::info!(
            "SLA sweeper started (interval {}s, batch size {})",
            self.interval.as_secs(),
            self.batch_size
        );
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep_once(Utc::now(), &shutdown).await {
                        Ok(report) if report.escalated > 0 => {
                            log::info!(
                                "sla sweep: scanned {} tickets, escalated {} breaches",
                                report.scanned,
                                report.escalated
                            );
                        }
                        Ok(report) => {
                            log::debug!("sla sweep: scanned {} tickets, nothing new", report.scanned);
                        }
                        Err(SweepError::Cancelled) => break,
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
        log::info!("SLA sweeper stopped");
    }

    /// One pass over the store at time `now`.
    ///
    /// A breach is escalated only if [`SlaTracker::mark_escalated`] claims
    /// it, so overlapping sweeps cannot double-notify. Delivery failures
    /// are logged and do not fail the sweep; the mark stands either way.
    pub async fn sweep_once(
        &self,
        now: DateTime<Utc>,
        shutdown: &CancellationToken,
    ) -> Result<SweepReport, SweepError> {
        let ids = self.store.ids().await;
        let mut report = SweepReport {
            scanned: 0,
            escalated: 0,
            batches: 0,
            at: now,
        };

        for chunk in ids.chunks(self.batch_size) {
            if shutdown.is_cancelled() {
                return Err(SweepError::Cancelled);
            }
            report.batches += 1;

            let mut events = Vec::new();
            for id in chunk {
                let Ok(ticket) = self.store.get(*id).await else {
                    continue;
                };
                report.scanned += 1;
                for kind in self.tracker.fresh_findings(&ticket, now) {
                    if self.tracker.mark_escalated(ticket.id, kind) {
                        report.escalated += 1;
                        let deadline = match kind {
                            BreachKind::ResponseOverdue => ticket.sla.first_response_due,
                            BreachKind::ResolutionAtRisk | BreachKind::ResolutionOverdue => {
                                ticket.sla.resolve_due
                            }
                        };
                        events.push(BreachEvent {
                            ticket_id: ticket.id,
                            number: ticket.number.clone(),
                            kind,
                            deadline,
                            at: now,
                        });
                    }
                }
            }

            // snapshots only from here on; no lock is held during delivery
            for event in events {
                if let Err(e) = self.notifier.notify(&event).await {
                    log::warn!(
                        "escalation delivery failed for {} ({}): {e:#}",
                        event.number,
                        event.kind
                    );
                }
            }

            tokio::task::yield_now().await;
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sla::SlaPolicySet;
    use crate::tickets::store::tests::sample_ticket;
    use crate::tickets::{Category, Priority, Ticket, TicketStatus};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::sync::Mutex;

    struct RecordingNotifier {
        events: Mutex<Vec<BreachEvent>>,
    }

    impl RecordingNotifier {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
            })
        }

        fn events(&self) -> Vec<BreachEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EscalationNotifier for RecordingNotifier {
        async fn notify(&self, event: &BreachEvent) -> anyhow::Result<()> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    fn aged_ticket(tracker: &SlaTracker, age_minutes: i64) -> Ticket {
        let mut ticket = sample_ticket();
        ticket.category = Category::Support;
        ticket.priority = Priority::High;
        ticket.created_at = Utc::now() - ChronoDuration::minutes(age_minutes);
        ticket.last_update = ticket.created_at;
        ticket.sla = tracker
            .stamp(ticket.category, ticket.priority, ticket.created_at)
            .unwrap();
        ticket
    }

    fn sweeper(
        store: Arc<TicketStore>,
        tracker: Arc<SlaTracker>,
        notifier: Arc<RecordingNotifier>,
        batch_size: usize,
    ) -> SlaSweeper {
        SlaSweeper::new(
            store,
            tracker,
            notifier,
            Duration::from_secs(60),
            batch_size,
        )
    }

    #[tokio::test]
    async fn breaches_are_escalated_exactly_once() {
        let store = Arc::new(TicketStore::new());
        let tracker = Arc::new(SlaTracker::new(SlaPolicySet::builtin()));
        let notifier = RecordingNotifier::new();

        // support/high window is 240 minutes; 300 minutes old means both
        // response and resolution are overdue
        let overdue = aged_ticket(&tracker, 300);
        let overdue_id = overdue.id;
        store.insert(overdue).await;

        let mut answered = aged_ticket(&tracker, 10);
        answered.sla.first_response_at = Some(answered.created_at);
        store.insert(answered).await;

        let sweeper = sweeper(
            Arc::clone(&store),
            Arc::clone(&tracker),
            Arc::clone(&notifier),
            16,
        );
        let shutdown = CancellationToken::new();

        let report = sweeper.sweep_once(Utc::now(), &shutdown).await.unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.escalated, 2);

        let events = notifier.events();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.ticket_id == overdue_id));
        let kinds: Vec<_> = events.iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&BreachKind::ResponseOverdue));
        assert!(kinds.contains(&BreachKind::ResolutionOverdue));

        // nothing new on the next pass
        let report = sweeper.sweep_once(Utc::now(), &shutdown).await.unwrap();
        assert_eq!(report.escalated, 0);
        assert_eq!(notifier.events().len(), 2);
    }

    #[tokio::test]
    async fn terminal_tickets_are_never_escalated() {
        let store = Arc::new(TicketStore::new());
        let tracker = Arc::new(SlaTracker::new(SlaPolicySet::builtin()));
        let notifier = RecordingNotifier::new();

        let mut resolved = aged_ticket(&tracker, 500);
        resolved.status = TicketStatus::Resolved;
        resolved.resolved_at = Some(Utc::now());
        store.insert(resolved).await;

        let sweeper = sweeper(store, tracker, Arc::clone(&notifier), 16);
        let report = sweeper
            .sweep_once(Utc::now(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.escalated, 0);
        assert!(notifier.events().is_empty());
    }

    #[tokio::test]
    async fn sweep_walks_the_store_in_batches() {
        let store = Arc::new(TicketStore::new());
        let tracker = Arc::new(SlaTracker::new(SlaPolicySet::builtin()));
        let notifier = RecordingNotifier::new();

        for _ in 0..10 {
            store.insert(aged_ticket(&tracker, 5)).await;
        }

        let sweeper = sweeper(store, tracker, notifier, 3);
        let report = sweeper
            .sweep_once(Utc::now(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.scanned, 10);
        assert_eq!(report.batches, 4);
    }

    #[tokio::test]
    async fn cancellation_stops_the_sweep_before_delivery() {
        let store = Arc::new(TicketStore::new());
        let tracker = Arc::new(SlaTracker::new(SlaPolicySet::builtin()));
        let notifier = RecordingNotifier::new();

        store.insert(aged_ticket(&tracker, 300)).await;

        let sweeper = sweeper(store, tracker, Arc::clone(&notifier), 16);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let err = sweeper.sweep_once(Utc::now(), &shutdown).await.unwrap_err();
        assert!(matches!(err, SweepError::Cancelled));
        assert!(notifier.events().is_empty());
    }
}
