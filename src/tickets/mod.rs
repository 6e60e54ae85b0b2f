//! Ticket lifecycle module
//!
//! Owns the ticket data model and the HTTP surface of the engine:
//! creation, status transitions, conversation history, assignment,
//! search and SLA reporting. All mutation funnels through
//! [`service::TicketService`], which holds the per-ticket locks;
//! handlers here stay thin.

pub mod conversation;
pub mod error;
pub mod query;
pub mod service;
pub mod store;
pub mod workflow;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::shared::state::AppState;
use crate::sla::{SlaHealth, SlaStamp};

pub use conversation::NewEntry;
pub use error::TicketError;
pub use query::{Page, SearchCriteria, SortDirection, SortField};
pub use service::{NewTicket, TicketService};
pub use store::TicketStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    AwaitingCustomer,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub const ALL: [TicketStatus; 5] = [
        TicketStatus::Open,
        TicketStatus::InProgress,
        TicketStatus::AwaitingCustomer,
        TicketStatus::Resolved,
        TicketStatus::Closed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::AwaitingCustomer => "awaiting_customer",
            TicketStatus::Resolved => "resolved",
            TicketStatus::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.as_str() == value)
    }

    /// Position along the normal workflow, used for status ordering.
    pub fn workflow_position(&self) -> u8 {
        match self {
            TicketStatus::Open => 0,
            TicketStatus::InProgress => 1,
            TicketStatus::AwaitingCustomer => 2,
            TicketStatus::Resolved => 3,
            TicketStatus::Closed => 4,
        }
    }

    /// Terminal for SLA purposes: the clock has stopped.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TicketStatus::Resolved | TicketStatus::Closed)
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Low,
        Priority::Medium,
        Priority::High,
        Priority::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.as_str() == value)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Inquiry,
    Support,
    Complaint,
    Request,
    Urgent,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Inquiry,
        Category::Support,
        Category::Complaint,
        Category::Request,
        Category::Urgent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Inquiry => "inquiry",
            Category::Support => "support",
            Category::Complaint => "complaint",
            Category::Request => "request",
            Category::Urgent => "urgent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.as_str() == value)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Chat,
    Email,
    Phone,
    InPerson,
    WebForm,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::Chat,
        Channel::Email,
        Channel::Phone,
        Channel::InPerson,
        Channel::WebForm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Chat => "chat",
            Channel::Email => "email",
            Channel::Phone => "phone",
            Channel::InPerson => "in_person",
            Channel::WebForm => "web_form",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.as_str() == value)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    Agent,
    Customer,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Message,
    StatusChange,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    Agent,
    Customer,
}

impl Audience {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "agent" => Some(Audience::Agent),
            "customer" => Some(Audience::Customer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientKind {
    Person,
    Company,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    Case,
    Contract,
    Task,
}

/// Identity of whoever performed an operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorRef {
    pub id: Uuid,
    pub name: String,
    pub kind: ActorKind,
}

/// Reference to an externally-owned client record, limited to what the
/// engine needs for display and channel routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRef {
    pub id: Uuid,
    pub name: String,
    pub kind: ClientKind,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub id: Uuid,
    pub file_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalLink {
    pub kind: LinkKind,
    pub reference: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub seq: u64,
    pub author: ActorRef,
    pub kind: EntryKind,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub visibility: Visibility,
    pub corrects: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Uuid,
    pub number: String,
    pub title: String,
    pub description: String,
    pub category: Category,
    pub priority: Priority,
    pub status: TicketStatus,
    pub channel: Channel,
    pub requester: ClientRef,
    pub assignee_id: Option<Uuid>,
    pub tags: Vec<String>,
    pub attachments: Vec<AttachmentRef>,
    pub linked_entity: Option<ExternalLink>,
    pub sla: SlaStamp,
    pub created_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub entries: Vec<ConversationEntry>,
    pub version: u64,
}

impl Ticket {
    pub fn summary(&self, sla_health: SlaHealth) -> TicketSummary {
        TicketSummary {
            id: self.id,
            number: self.number.clone(),
            title: self.title.clone(),
            category: self.category,
            priority: self.priority,
            status: self.status,
            channel: self.channel,
            requester_name: self.requester.name.clone(),
            assignee_id: self.assignee_id,
            tags: self.tags.clone(),
            sla_due: self.sla.resolve_due,
            sla_health,
            entry_count: self.entries.len(),
            created_at: self.created_at,
            last_update: self.last_update,
        }
    }
}

/// Listing projection: a ticket without its conversation payload, decorated
/// with the tracker's verdict so callers never recompute "overdue" inline.
#[derive(Debug, Clone, Serialize)]
pub struct TicketSummary {
    pub id: Uuid,
    pub number: String,
    pub title: String,
    pub category: Category,
    pub priority: Priority,
    pub status: TicketStatus,
    pub channel: Channel,
    pub requester_name: String,
    pub assignee_id: Option<Uuid>,
    pub tags: Vec<String>,
    pub sla_due: DateTime<Utc>,
    pub sla_health: SlaHealth,
    pub entry_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct TicketStats {
    pub total: usize,
    pub open: usize,
    pub in_progress: usize,
    pub awaiting_customer: usize,
    pub resolved: usize,
    pub closed: usize,
    pub at_risk: usize,
    pub breached: usize,
    pub avg_resolution_hours: f64,
}

#[derive(Debug, Serialize)]
pub struct SlaReport {
    pub ticket_id: Uuid,
    pub number: String,
    pub health: SlaHealth,
    pub first_response_due: DateTime<Utc>,
    pub resolve_due: DateTime<Utc>,
    pub first_response_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub remaining_seconds: i64,
    pub evaluated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTicketRequest {
    pub title: String,
    pub description: Option<String>,
    pub category: Category,
    pub priority: Option<Priority>,
    pub channel: Option<Channel>,
    pub requester: ClientRef,
    pub assignee_id: Option<Uuid>,
    pub tags: Option<Vec<String>>,
    pub attachments: Option<Vec<AttachmentRef>>,
    pub linked_entity: Option<ExternalLink>,
    pub actor: Option<ActorRef>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeStatusRequest {
    pub status: TicketStatus,
    pub actor: ActorRef,
    pub expected_version: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ActorRequest {
    pub actor: ActorRef,
    pub expected_version: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct AssignTicketRequest {
    pub assignee_id: Option<Uuid>,
    pub actor: ActorRef,
    pub expected_version: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct AppendEntryRequest {
    pub body: String,
    pub author: ActorRef,
    pub kind: Option<EntryKind>,
    pub is_internal: Option<bool>,
    pub timestamp: Option<DateTime<Utc>>,
    pub corrects: Option<u64>,
    pub expected_version: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct RaiseTaskRequest {
    pub actor: ActorRef,
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub search: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub category: Option<String>,
    pub channel: Option<String>,
    pub assignee_id: Option<Uuid>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub include_archived: Option<bool>,
    pub sort_by: Option<String>,
    pub order: Option<String>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct EntriesQuery {
    pub audience: Option<String>,
}

fn parse_csv<T>(
    field: &'static str,
    raw: &str,
    parse: fn(&str) -> Option<T>,
) -> Result<Vec<T>, TicketError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            parse(s).ok_or_else(|| TicketError::Validation {
                field,
                reason: format!("unknown value `{s}`"),
            })
        })
        .collect()
}

fn criteria_from_query(
    q: &ListQuery,
) -> Result<(SearchCriteria, SortField, SortDirection, usize, usize), TicketError> {
    let mut criteria = SearchCriteria {
        text: q.search.clone(),
        assignee_id: q.assignee_id,
        created_from: q.created_from,
        created_to: q.created_to,
        include_archived: q.include_archived.unwrap_or(false),
        ..Default::default()
    };
    if let Some(raw) = &q.status {
        criteria.status = parse_csv("status", raw, TicketStatus::parse)?;
    }
    if let Some(raw) = &q.priority {
        criteria.priority = parse_csv("priority", raw, Priority::parse)?;
    }
    if let Some(raw) = &q.category {
        criteria.category = parse_csv("category", raw, Category::parse)?;
    }
    if let Some(raw) = &q.channel {
        criteria.channel = parse_csv("channel", raw, Channel::parse)?;
    }

    let sort_by = match &q.sort_by {
        Some(raw) => SortField::parse(raw).ok_or_else(|| TicketError::Validation {
            field: "sort_by",
            reason: format!("unknown sort field `{raw}`"),
        })?,
        None => SortField::CreatedAt,
    };
    let order = match &q.order {
        Some(raw) => SortDirection::parse(raw).ok_or_else(|| TicketError::Validation {
            field: "order",
            reason: format!("unknown sort direction `{raw}`"),
        })?,
        None => SortDirection::Desc,
    };

    Ok((
        criteria,
        sort_by,
        order,
        q.page.unwrap_or(1),
        q.page_size.unwrap_or(50),
    ))
}

pub async fn create_ticket(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTicketRequest>,
) -> Result<(StatusCode, Json<Ticket>), TicketError> {
    let actor = req.actor.clone().unwrap_or_else(|| ActorRef {
        id: req.requester.id,
        name: req.requester.name.clone(),
        kind: ActorKind::Customer,
    });
    let ticket = state
        .service
        .create_ticket(NewTicket {
            title: req.title,
            description: req.description.unwrap_or_default(),
            category: req.category,
            priority: req.priority.unwrap_or(Priority::Medium),
            channel: req.channel.unwrap_or(Channel::WebForm),
            requester: req.requester,
            assignee_id: req.assignee_id,
            tags: req.tags.unwrap_or_default(),
            attachments: req.attachments.unwrap_or_default(),
            linked_entity: req.linked_entity,
            actor,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

pub async fn list_tickets(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Page<TicketSummary>>, TicketError> {
    let (criteria, sort_by, order, page, page_size) = criteria_from_query(&q)?;
    let result = state
        .service
        .search(criteria, sort_by, order, page, page_size, Utc::now())
        .await?;
    Ok(Json(result))
}

pub async fn get_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Ticket>, TicketError> {
    Ok(Json(state.service.get(id).await?))
}

pub async fn list_entries(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(q): Query<EntriesQuery>,
) -> Result<Json<Vec<ConversationEntry>>, TicketError> {
    let audience = match q.audience.as_deref() {
        Some(raw) => Audience::parse(raw).ok_or_else(|| TicketError::Validation {
            field: "audience",
            reason: format!("unknown audience `{raw}`"),
        })?,
        None => Audience::Agent,
    };
    let ticket = state.service.get(id).await?;
    let entries: Vec<ConversationEntry> = ticket.visible_to(audience).cloned().collect();
    Ok(Json(entries))
}

pub async fn add_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<AppendEntryRequest>,
) -> Result<(StatusCode, Json<ConversationEntry>), TicketError> {
    let kind = req.kind.unwrap_or(EntryKind::Message);
    if kind == EntryKind::StatusChange {
        return Err(TicketError::Validation {
            field: "kind",
            reason: "status_change entries are written by the state machine only".to_string(),
        });
    }
    let entry = NewEntry {
        author: req.author,
        kind,
        body: req.body,
        timestamp: req.timestamp,
        visibility: if req.is_internal.unwrap_or(false) {
            Visibility::Internal
        } else {
            Visibility::Public
        },
        corrects: req.corrects,
    };
    let (_, appended) = state
        .service
        .append_entry(id, entry, req.expected_version)
        .await?;
    Ok((StatusCode::CREATED, Json(appended)))
}

pub async fn change_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ChangeStatusRequest>,
) -> Result<Json<Ticket>, TicketError> {
    let ticket = state
        .service
        .transition(id, req.status, req.actor, req.expected_version)
        .await?;
    Ok(Json(ticket))
}

pub async fn resolve_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ActorRequest>,
) -> Result<Json<Ticket>, TicketError> {
    let ticket = state
        .service
        .transition(id, TicketStatus::Resolved, req.actor, req.expected_version)
        .await?;
    Ok(Json(ticket))
}

pub async fn close_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ActorRequest>,
) -> Result<Json<Ticket>, TicketError> {
    let ticket = state
        .service
        .transition(id, TicketStatus::Closed, req.actor, req.expected_version)
        .await?;
    Ok(Json(ticket))
}

pub async fn reopen_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ActorRequest>,
) -> Result<Json<Ticket>, TicketError> {
    let ticket = state
        .service
        .transition(
            id,
            TicketStatus::InProgress,
            req.actor,
            req.expected_version,
        )
        .await?;
    Ok(Json(ticket))
}

pub async fn assign_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<AssignTicketRequest>,
) -> Result<Json<Ticket>, TicketError> {
    let ticket = state
        .service
        .reassign(id, req.assignee_id, req.actor, req.expected_version)
        .await?;
    Ok(Json(ticket))
}

pub async fn get_ticket_sla(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SlaReport>, TicketError> {
    let now = Utc::now();
    let (ticket, health) = state.service.evaluate(id, now).await?;
    Ok(Json(SlaReport {
        ticket_id: ticket.id,
        number: ticket.number,
        health,
        first_response_due: ticket.sla.first_response_due,
        resolve_due: ticket.sla.resolve_due,
        first_response_at: ticket.sla.first_response_at,
        resolved_at: ticket.resolved_at,
        remaining_seconds: (ticket.sla.resolve_due - now).num_seconds(),
        evaluated_at: now,
    }))
}

pub async fn get_ticket_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<TicketStats>, TicketError> {
    Ok(Json(state.service.stats(Utc::now()).await))
}

pub async fn list_overdue_tickets(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<TicketSummary>>, TicketError> {
    Ok(Json(state.service.overdue(Utc::now()).await))
}

pub async fn list_sla_policies(
    State(state): State<Arc<AppState>>,
) -> Result<Json<crate::sla::SlaPolicySet>, TicketError> {
    Ok(Json(state.tracker.policy_snapshot()))
}

pub async fn reload_sla_policies(
    State(state): State<Arc<AppState>>,
) -> Result<Json<crate::sla::SlaPolicySet>, TicketError> {
    let path = state
        .config
        .sla
        .policy_path
        .as_deref()
        .ok_or_else(|| TicketError::Validation {
            field: "policy_path",
            reason: "no SLA policy file configured".to_string(),
        })?;
    let set = crate::sla::SlaPolicySet::load(path).map_err(|e| TicketError::Validation {
        field: "policy_path",
        reason: format!("failed to load {path}: {e}"),
    })?;
    set.validate()?;
    state.tracker.reload(set);
    log::info!("SLA policy table reloaded from {path}");
    Ok(Json(state.tracker.policy_snapshot()))
}

pub async fn raise_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<RaiseTaskRequest>,
) -> Result<StatusCode, TicketError> {
    state.service.raise_task(id, req.actor, req.title).await?;
    Ok(StatusCode::ACCEPTED)
}

pub fn configure_tickets_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/tickets", get(list_tickets).post(create_ticket))
        .route("/api/tickets/stats", get(get_ticket_stats))
        .route("/api/tickets/overdue", get(list_overdue_tickets))
        .route("/api/tickets/sla", get(list_sla_policies))
        .route("/api/tickets/sla/reload", post(reload_sla_policies))
        .route("/api/tickets/{id}", get(get_ticket))
        .route("/api/tickets/{id}/entries", get(list_entries).post(add_entry))
        .route("/api/tickets/{id}/status", put(change_status))
        .route("/api/tickets/{id}/resolve", put(resolve_ticket))
        .route("/api/tickets/{id}/close", put(close_ticket))
        .route("/api/tickets/{id}/reopen", put(reopen_ticket))
        .route("/api/tickets/{id}/assign", put(assign_ticket))
        .route("/api/tickets/{id}/sla", get(get_ticket_sla))
        .route("/api/tickets/{id}/task", post(raise_task))
}
