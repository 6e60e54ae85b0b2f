//! Search, ordering and pagination over ticket snapshots.
//!
//! Criteria are conjunctive across fields and disjunctive within a field
//! list. Sorting is a single total order (sort field, then `created_at`,
//! then id), so equal inputs always paginate identically and flipping the
//! direction reverses the listing exactly.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use uuid::Uuid;

use super::error::TicketError;
use super::{Category, Channel, Priority, Ticket, TicketStatus, Visibility};

#[derive(Debug, Clone, Default)]
pub struct SearchCriteria {
    pub text: Option<String>,
    pub status: Vec<TicketStatus>,
    pub priority: Vec<Priority>,
    pub category: Vec<Category>,
    pub channel: Vec<Channel>,
    pub assignee_id: Option<Uuid>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub include_archived: bool,
}

impl SearchCriteria {
    /// Closed tickets are archived: hidden unless the caller asked for them
    /// by status or opted in to archived results.
    fn admits_closed(&self) -> bool {
        self.include_archived || self.status.contains(&TicketStatus::Closed)
    }

    pub fn matches(&self, ticket: &Ticket) -> bool {
        if ticket.status == TicketStatus::Closed && !self.admits_closed() {
            return false;
        }
        if !self.status.is_empty() && !self.status.contains(&ticket.status) {
            return false;
        }
        if !self.priority.is_empty() && !self.priority.contains(&ticket.priority) {
            return false;
        }
        if !self.category.is_empty() && !self.category.contains(&ticket.category) {
            return false;
        }
        if !self.channel.is_empty() && !self.channel.contains(&ticket.channel) {
            return false;
        }
        if let Some(assignee) = self.assignee_id {
            if ticket.assignee_id != Some(assignee) {
                return false;
            }
        }
        if let Some(from) = self.created_from {
            if ticket.created_at < from {
                return false;
            }
        }
        if let Some(to) = self.created_to {
            if ticket.created_at > to {
                return false;
            }
        }
        if let Some(text) = &self.text {
            let needle = text.to_lowercase();
            if !needle.is_empty() && !text_matches(ticket, &needle) {
                return false;
            }
        }
        true
    }
}

/// Case-insensitive substring over title, description, ticket number and
/// customer-visible conversation bodies. Internal notes are not searchable
/// here so the same query can serve customer-facing views.
fn text_matches(ticket: &Ticket, needle: &str) -> bool {
    if ticket.title.to_lowercase().contains(needle)
        || ticket.description.to_lowercase().contains(needle)
        || ticket.number.to_lowercase().contains(needle)
    {
        return true;
    }
    ticket
        .entries
        .iter()
        .filter(|e| e.visibility == Visibility::Public)
        .any(|e| e.body.to_lowercase().contains(needle))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    CreatedAt,
    LastUpdate,
    Priority,
    Status,
}

impl SortField {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "created_at" => Some(SortField::CreatedAt),
            "last_update" => Some(SortField::LastUpdate),
            "priority" => Some(SortField::Priority),
            "status" => Some(SortField::Status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "asc" => Some(SortDirection::Asc),
            "desc" => Some(SortDirection::Desc),
            _ => None,
        }
    }
}

fn compare(a: &Ticket, b: &Ticket, field: SortField) -> Ordering {
    let primary = match field {
        SortField::CreatedAt => a.created_at.cmp(&b.created_at),
        SortField::LastUpdate => a.last_update.cmp(&b.last_update),
        SortField::Priority => a.priority.cmp(&b.priority),
        SortField::Status => a.status.workflow_position().cmp(&b.status.workflow_position()),
    };
    primary
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Ids are unique, so the comparator is a total order and the result is
/// deterministic for any input permutation.
pub fn sort(tickets: &mut [Ticket], field: SortField, direction: SortDirection) {
    tickets.sort_by(|a, b| {
        let ord = compare(a, b, field);
        match direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    });
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub page_size: usize,
    pub total_items: usize,
    pub total_pages: usize,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            page_size: self.page_size,
            total_items: self.total_items,
            total_pages: self.total_pages,
        }
    }
}

/// Pages are 1-indexed. A page past the end is an empty page with the real
/// totals, so paging clients terminate cleanly instead of erroring.
pub fn paginate<T>(items: Vec<T>, page: usize, page_size: usize) -> Result<Page<T>, TicketError> {
    if page_size == 0 {
        return Err(TicketError::Validation {
            field: "page_size",
            reason: "page_size must be at least 1".to_string(),
        });
    }
    if page == 0 {
        return Err(TicketError::Validation {
            field: "page",
            reason: "pages are numbered from 1".to_string(),
        });
    }

    let total_items = items.len();
    let total_pages = total_items.div_ceil(page_size);
    let start = (page - 1).saturating_mul(page_size);
    let window: Vec<T> = items
        .into_iter()
        .skip(start)
        .take(page_size)
        .collect();

    Ok(Page {
        items: window,
        page,
        page_size,
        total_items,
        total_pages,
    })
}
