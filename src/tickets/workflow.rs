//! Status state machine. The transition table is plain data so the allowed
//! edges can be listed, tested and reported without touching handler code.

use chrono::{DateTime, Utc};

use super::conversation;
use super::error::TicketError;
use super::{ActorRef, Ticket, TicketStatus};

use TicketStatus::*;

/// Every edge the workflow accepts. Anything absent is rejected.
pub const TRANSITIONS: &[(TicketStatus, TicketStatus)] = &[
    (Open, InProgress),
    (Open, Resolved),
    (InProgress, AwaitingCustomer),
    (InProgress, Resolved),
    (AwaitingCustomer, InProgress),
    (AwaitingCustomer, Resolved),
    (Resolved, Closed),
    (Resolved, InProgress),
];

pub fn is_allowed(from: TicketStatus, to: TicketStatus) -> bool {
    TRANSITIONS.iter().any(|&(f, t)| f == from && t == to)
}

pub fn allowed_targets(from: TicketStatus) -> Vec<TicketStatus> {
    TRANSITIONS
        .iter()
        .filter(|&&(f, _)| f == from)
        .map(|&(_, t)| t)
        .collect()
}

/// Moves a ticket to `target`, recording the change in its conversation.
///
/// Validation happens before any field is touched; on error the ticket is
/// untouched. Re-opening (resolved -> in_progress) clears `resolved_at` so
/// the ticket drops out of resolution metrics until it is resolved again.
pub fn apply(
    ticket: &mut Ticket,
    target: TicketStatus,
    actor: &ActorRef,
    now: DateTime<Utc>,
) -> Result<(TicketStatus, TicketStatus), TicketError> {
    let from = ticket.status;
    if !is_allowed(from, target) {
        return Err(TicketError::InvalidTransition { from, to: target });
    }

    ticket.status = target;
    match (from, target) {
        (Resolved, InProgress) => {
            ticket.resolved_at = None;
        }
        (_, Resolved) => {
            ticket.resolved_at = Some(now);
        }
        (_, Closed) => {
            ticket.closed_at = Some(now);
        }
        _ => {}
    }

    conversation::record_status_change(ticket, from, target, actor, now);
    Ok((from, target))
}
