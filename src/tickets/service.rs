//! Orchestration layer. Handlers and the sweeper talk to this; it owns the
//! order of operations around the store (validate, mutate, audit, log) so
//! every entry point observes the same rules.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditSink};
use crate::sla::{SlaHealth, SlaTracker};
use crate::tasks::{TaskRequest, TaskSink};

use super::conversation::{self, NewEntry};
use super::error::TicketError;
use super::query::{self, Page, SearchCriteria, SortDirection, SortField};
use super::store::TicketStore;
use super::workflow;
use super::{
    ActorRef, AttachmentRef, Category, Channel, ClientRef, ConversationEntry, ExternalLink,
    Priority, Ticket, TicketStats, TicketStatus, TicketSummary,
};

/// Everything needed to open a ticket. The HTTP layer fills defaults in
/// before building one of these.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub title: String,
    pub description: String,
    pub category: Category,
    pub priority: Priority,
    pub channel: Channel,
    pub requester: ClientRef,
    pub assignee_id: Option<Uuid>,
    pub tags: Vec<String>,
    pub attachments: Vec<AttachmentRef>,
    pub linked_entity: Option<ExternalLink>,
    pub actor: ActorRef,
}

pub struct TicketService {
    store: Arc<TicketStore>,
    tracker: Arc<SlaTracker>,
    audit: Arc<dyn AuditSink>,
    tasks: Arc<dyn TaskSink>,
}

impl TicketService {
    pub fn new(
        store: Arc<TicketStore>,
        tracker: Arc<SlaTracker>,
        audit: Arc<dyn AuditSink>,
        tasks: Arc<dyn TaskSink>,
    ) -> Self {
        Self {
            store,
            tracker,
            audit,
            tasks,
        }
    }

    /// Opens a ticket: allocates its number, stamps SLA deadlines from the
    /// active policy table and stores it as `open`, version 1.
    pub async fn create_ticket(&self, new: NewTicket) -> Result<Ticket, TicketError> {
        if new.title.trim().is_empty() {
            return Err(TicketError::Validation {
                field: "title",
                reason: "title must not be empty".to_string(),
            });
        }

        let now = Utc::now();
        let sla = self.tracker.stamp(new.category, new.priority, now)?;
        let number = self.store.allocate_number(now);

        let ticket = Ticket {
            id: Uuid::new_v4(),
            number,
            title: new.title.trim().to_string(),
            description: new.description,
            category: new.category,
            priority: new.priority,
            status: TicketStatus::Open,
            channel: new.channel,
            requester: new.requester,
            assignee_id: new.assignee_id,
            tags: new.tags,
            attachments: new.attachments,
            linked_entity: new.linked_entity,
            sla,
            created_at: now,
            last_update: now,
            resolved_at: None,
            closed_at: None,
            entries: Vec::new(),
            version: 1,
        };
        self.store.insert(ticket.clone()).await;

        self.audit.record(AuditEvent {
            action: "ticket.create".to_string(),
            ticket_id: ticket.id,
            actor_id: new.actor.id,
            before: None,
            after: Some(TicketStatus::Open.to_string()),
            at: now,
        });
        log::info!(
            "ticket {} created ({}/{}, due {})",
            ticket.number,
            ticket.category,
            ticket.priority,
            ticket.sla.resolve_due.to_rfc3339()
        );
        Ok(ticket)
    }

    pub async fn get(&self, id: Uuid) -> Result<Ticket, TicketError> {
        self.store.get(id).await
    }

    pub async fn transition(
        &self,
        id: Uuid,
        target: TicketStatus,
        actor: ActorRef,
        expected_version: Option<u64>,
    ) -> Result<Ticket, TicketError> {
        let now = Utc::now();
        let apply_actor = actor.clone();
        let (ticket, (from, to)) = self
            .store
            .update(id, expected_version, now, move |t| {
                workflow::apply(t, target, &apply_actor, now)
            })
            .await?;

        self.audit.record(AuditEvent {
            action: "ticket.status".to_string(),
            ticket_id: id,
            actor_id: actor.id,
            before: Some(from.to_string()),
            after: Some(to.to_string()),
            at: now,
        });
        log::info!("ticket {}: {} -> {}", ticket.number, from, to);
        Ok(ticket)
    }

    pub async fn append_entry(
        &self,
        id: Uuid,
        entry: NewEntry,
        expected_version: Option<u64>,
    ) -> Result<(Ticket, ConversationEntry), TicketError> {
        let now = Utc::now();
        let (ticket, appended) = self
            .store
            .update(id, expected_version, now, move |t| {
                conversation::append(t, entry, now)
            })
            .await?;

        self.audit.record(AuditEvent {
            action: "ticket.entry".to_string(),
            ticket_id: id,
            actor_id: appended.author.id,
            before: None,
            after: Some(format!("seq {}", appended.seq)),
            at: now,
        });
        Ok((ticket, appended))
    }

    pub async fn reassign(
        &self,
        id: Uuid,
        assignee_id: Option<Uuid>,
        actor: ActorRef,
        expected_version: Option<u64>,
    ) -> Result<Ticket, TicketError> {
        let now = Utc::now();
        let note_actor = actor.clone();
        let (ticket, previous) = self
            .store
            .update(id, expected_version, now, move |t| {
                let previous = t.assignee_id;
                if previous != assignee_id {
                    t.assignee_id = assignee_id;
                    conversation::record_reassignment(t, previous, assignee_id, &note_actor, now);
                }
                Ok(previous)
            })
            .await?;

        if previous != assignee_id {
            self.audit.record(AuditEvent {
                action: "ticket.assign".to_string(),
                ticket_id: id,
                actor_id: actor.id,
                before: previous.map(|u| u.to_string()),
                after: assignee_id.map(|u| u.to_string()),
                at: now,
            });
        }
        Ok(ticket)
    }

    /// Filter, order and page the store. Health is evaluated per summary at
    /// `now` so one listing is internally consistent.
    pub async fn search(
        &self,
        criteria: SearchCriteria,
        sort_by: SortField,
        order: SortDirection,
        page: usize,
        page_size: usize,
        now: DateTime<Utc>,
    ) -> Result<Page<TicketSummary>, TicketError> {
        let mut matched: Vec<Ticket> = self
            .store
            .snapshot()
            .await
            .into_iter()
            .filter(|t| criteria.matches(t))
            .collect();
        query::sort(&mut matched, sort_by, order);
        let page = query::paginate(matched, page, page_size)?;
        Ok(page.map(|t| {
            let health = self.tracker.evaluate(&t, now);
            t.summary(health)
        }))
    }

    pub async fn evaluate(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(Ticket, SlaHealth), TicketError> {
        let ticket = self.store.get(id).await?;
        let health = self.tracker.evaluate(&ticket, now);
        Ok((ticket, health))
    }

    pub async fn stats(&self, now: DateTime<Utc>) -> TicketStats {
        let tickets = self.store.snapshot().await;
        let mut stats = TicketStats {
            total: tickets.len(),
            open: 0,
            in_progress: 0,
            awaiting_customer: 0,
            resolved: 0,
            closed: 0,
            at_risk: 0,
            breached: 0,
            avg_resolution_hours: 0.0,
        };
        let mut resolution_minutes = 0i64;
        let mut resolved_count = 0usize;
        for ticket in &tickets {
            match ticket.status {
                TicketStatus::Open => stats.open += 1,
                TicketStatus::InProgress => stats.in_progress += 1,
                TicketStatus::AwaitingCustomer => stats.awaiting_customer += 1,
                TicketStatus::Resolved => stats.resolved += 1,
                TicketStatus::Closed => stats.closed += 1,
            }
            match self.tracker.evaluate(ticket, now) {
                SlaHealth::AtRisk => stats.at_risk += 1,
                SlaHealth::Breached => stats.breached += 1,
                SlaHealth::OnTrack => {}
            }
            if let Some(resolved_at) = ticket.resolved_at {
                resolution_minutes += (resolved_at - ticket.created_at).num_minutes();
                resolved_count += 1;
            }
        }
        if resolved_count > 0 {
            stats.avg_resolution_hours = resolution_minutes as f64 / 60.0 / resolved_count as f64;
        }
        stats
    }

    /// Tickets past their resolution deadline and still live, most overdue
    /// first.
    pub async fn overdue(&self, now: DateTime<Utc>) -> Vec<TicketSummary> {
        let mut overdue: Vec<Ticket> = self
            .store
            .snapshot()
            .await
            .into_iter()
            .filter(|t| !t.status.is_terminal() && now > t.sla.resolve_due)
            .collect();
        overdue.sort_by(|a, b| {
            a.sla
                .resolve_due
                .cmp(&b.sla.resolve_due)
                .then_with(|| a.id.cmp(&b.id))
        });
        overdue
            .into_iter()
            .map(|t| {
                let health = self.tracker.evaluate(&t, now);
                t.summary(health)
            })
            .collect()
    }

    /// Asks the host system to open a follow-up task for a ticket. Delivery
    /// is fire-and-forget; the suggested priority reflects current SLA
    /// pressure.
    pub async fn raise_task(
        &self,
        id: Uuid,
        actor: ActorRef,
        title: Option<String>,
    ) -> Result<(), TicketError> {
        if let Some(title) = &title {
            if title.trim().is_empty() {
                return Err(TicketError::Validation {
                    field: "title",
                    reason: "task title must not be empty".to_string(),
                });
            }
        }

        let now = Utc::now();
        let ticket = self.store.get(id).await?;
        let suggested_priority = match self.tracker.evaluate(&ticket, now) {
            SlaHealth::Breached => Priority::Critical,
            SlaHealth::AtRisk => ticket.priority.max(Priority::High),
            SlaHealth::OnTrack => ticket.priority,
        };
        let request = TaskRequest {
            ticket_id: ticket.id,
            ticket_number: ticket.number.clone(),
            title: title.unwrap_or_else(|| format!("Follow up on {}", ticket.number)),
            suggested_priority,
            requested_by: actor.id,
            at: now,
        };

        self.audit.record(AuditEvent {
            action: "ticket.task".to_string(),
            ticket_id: ticket.id,
            actor_id: actor.id,
            before: None,
            after: Some(request.title.clone()),
            at: now,
        });

        let sink = Arc::clone(&self.tasks);
        tokio::spawn(async move {
            if let Err(e) = sink.create_task(request.clone()).await {
                log::warn!(
                    "task creation failed for ticket {}: {e:#}",
                    request.ticket_number
                );
            }
        });
        Ok(())
    }
}
