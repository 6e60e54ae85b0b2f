//! Append-only conversation log.
//!
//! Entries are never edited or removed; a correction is a new entry whose
//! `corrects` field points at the sequence number it supersedes. Sequence
//! numbers are dense (1, 2, 3, ...) and timestamps never run backwards
//! within a ticket.

use chrono::{DateTime, Utc};

use super::error::TicketError;
use super::{
    ActorKind, ActorRef, Audience, ConversationEntry, EntryKind, Ticket, Visibility,
};

/// Payload for an append. `timestamp: None` lets the engine stamp the entry
/// under the ticket lock, which is what concurrent callers should do; a
/// supplied timestamp is validated strictly against the log tail.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub author: ActorRef,
    pub kind: EntryKind,
    pub body: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub visibility: Visibility,
    pub corrects: Option<u64>,
}

impl Ticket {
    /// Entries the given audience may read. Customers see public entries
    /// only; agents see the whole log.
    pub fn visible_to(&self, audience: Audience) -> impl Iterator<Item = &ConversationEntry> {
        self.entries.iter().filter(move |e| match audience {
            Audience::Agent => true,
            Audience::Customer => e.visibility == Visibility::Public,
        })
    }

    pub fn last_entry_timestamp(&self) -> Option<DateTime<Utc>> {
        self.entries.last().map(|e| e.timestamp)
    }
}

pub fn append(
    ticket: &mut Ticket,
    entry: NewEntry,
    now: DateTime<Utc>,
) -> Result<ConversationEntry, TicketError> {
    if entry.body.trim().is_empty() {
        return Err(TicketError::Validation {
            field: "body",
            reason: "entry body must not be empty".to_string(),
        });
    }
    if let Some(seq) = entry.corrects {
        if seq == 0 || seq > ticket.entries.len() as u64 {
            return Err(TicketError::Validation {
                field: "corrects",
                reason: format!("no entry with seq {seq}"),
            });
        }
    }

    let tail = ticket.last_entry_timestamp();
    let timestamp = match entry.timestamp {
        Some(ts) => {
            if let Some(tail) = tail {
                if ts < tail {
                    return Err(TicketError::Validation {
                        field: "timestamp",
                        reason: format!(
                            "timestamp {ts} is earlier than the last entry at {tail}"
                        ),
                    });
                }
            }
            ts
        }
        // Engine-stamped: clamp to the tail so the log stays monotonic even
        // when the wall clock and the tail disagree.
        None => tail.map_or(now, |tail| now.max(tail)),
    };

    let appended = ConversationEntry {
        seq: ticket.entries.len() as u64 + 1,
        author: entry.author,
        kind: entry.kind,
        body: entry.body,
        timestamp,
        visibility: entry.visibility,
        corrects: entry.corrects,
    };

    if ticket.sla.first_response_at.is_none()
        && appended.author.kind == ActorKind::Agent
        && appended.kind == EntryKind::Message
        && appended.visibility == Visibility::Public
    {
        ticket.sla.first_response_at = Some(timestamp);
    }

    ticket.entries.push(appended.clone());
    Ok(appended)
}

/// Status changes write their own log line so the history is readable
/// without joining an audit table.
pub fn record_status_change(
    ticket: &mut Ticket,
    from: super::TicketStatus,
    to: super::TicketStatus,
    actor: &ActorRef,
    now: DateTime<Utc>,
) {
    let entry = NewEntry {
        author: actor.clone(),
        kind: EntryKind::StatusChange,
        body: format!("{from} -> {to}"),
        timestamp: None,
        visibility: Visibility::Public,
        corrects: None,
    };
    // body is never empty and corrects is None, so this cannot fail
    let _ = append(ticket, entry, now);
}

pub fn record_reassignment(
    ticket: &mut Ticket,
    previous: Option<uuid::Uuid>,
    next: Option<uuid::Uuid>,
    actor: &ActorRef,
    now: DateTime<Utc>,
) {
    let body = match (previous, next) {
        (None, Some(to)) => format!("assigned to {to}"),
        (Some(from), Some(to)) => format!("reassigned from {from} to {to}"),
        (Some(from), None) => format!("unassigned from {from}"),
        (None, None) => "assignment unchanged".to_string(),
    };
    let entry = NewEntry {
        author: actor.clone(),
        kind: EntryKind::System,
        body,
        timestamp: None,
        visibility: Visibility::Internal,
        corrects: None,
    };
    let _ = append(ticket, entry, now);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tickets::store::tests::sample_ticket;
    use chrono::Duration;
    use uuid::Uuid;

    fn actor(kind: ActorKind) -> ActorRef {
        ActorRef {
            id: Uuid::new_v4(),
            name: match kind {
                ActorKind::Agent => "Ana Souza",
                ActorKind::Customer => "Carlos Lima",
                ActorKind::System => "system",
            }
            .to_string(),
            kind,
        }
    }

    fn message(kind: ActorKind, body: &str) -> NewEntry {
        NewEntry {
            author: actor(kind),
            kind: EntryKind::Message,
            body: body.to_string(),
            timestamp: None,
            visibility: Visibility::Public,
            corrects: None,
        }
    }

    #[test]
    fn sequence_numbers_are_dense_from_one() {
        let mut ticket = sample_ticket();
        let base = ticket.entries.len() as u64;
        for i in 0..5 {
            let e = append(&mut ticket, message(ActorKind::Customer, "hello"), Utc::now())
                .unwrap();
            assert_eq!(e.seq, base + i + 1);
        }
        for (i, e) in ticket.entries.iter().enumerate() {
            assert_eq!(e.seq, i as u64 + 1);
        }
    }

    #[test]
    fn empty_body_is_rejected() {
        let mut ticket = sample_ticket();
        let err = append(&mut ticket, message(ActorKind::Customer, "   "), Utc::now())
            .unwrap_err();
        assert!(matches!(err, TicketError::Validation { field: "body", .. }));
    }

    #[test]
    fn explicit_timestamp_must_not_regress() {
        let mut ticket = sample_ticket();
        let t0 = Utc::now();
        let mut first = message(ActorKind::Customer, "first");
        first.timestamp = Some(t0);
        append(&mut ticket, first, t0).unwrap();

        let mut stale = message(ActorKind::Customer, "stale");
        stale.timestamp = Some(t0 - Duration::seconds(30));
        let err = append(&mut ticket, stale, t0).unwrap_err();
        assert!(matches!(
            err,
            TicketError::Validation { field: "timestamp", .. }
        ));
        assert_eq!(ticket.entries.last().unwrap().body, "first");
    }

    #[test]
    fn engine_stamp_clamps_to_tail() {
        let mut ticket = sample_ticket();
        let t0 = Utc::now();
        let mut ahead = message(ActorKind::Customer, "from the future");
        ahead.timestamp = Some(t0 + Duration::seconds(120));
        append(&mut ticket, ahead, t0).unwrap();

        // engine-stamped entry arrives while the wall clock is behind the tail
        let e = append(&mut ticket, message(ActorKind::Agent, "reply"), t0).unwrap();
        assert_eq!(e.timestamp, t0 + Duration::seconds(120));

        let times: Vec<_> = ticket.entries.iter().map(|e| e.timestamp).collect();
        let mut sorted = times.clone();
        sorted.sort();
        assert_eq!(times, sorted);
    }

    #[test]
    fn corrects_must_reference_an_existing_entry() {
        let mut ticket = sample_ticket();
        append(&mut ticket, message(ActorKind::Customer, "typo"), Utc::now()).unwrap();

        let mut fix = message(ActorKind::Customer, "fixed");
        fix.corrects = Some(99);
        let err = append(&mut ticket, fix, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            TicketError::Validation { field: "corrects", .. }
        ));

        let mut fix = message(ActorKind::Customer, "fixed");
        fix.corrects = Some(1);
        let e = append(&mut ticket, fix, Utc::now()).unwrap();
        assert_eq!(e.corrects, Some(1));
        // the superseded entry is still there
        assert_eq!(ticket.entries[0].body, "typo");
    }

    #[test]
    fn first_public_agent_message_stamps_first_response() {
        let mut ticket = sample_ticket();
        assert!(ticket.sla.first_response_at.is_none());

        append(&mut ticket, message(ActorKind::Customer, "help"), Utc::now()).unwrap();
        assert!(ticket.sla.first_response_at.is_none());

        let mut internal = message(ActorKind::Agent, "looking into it");
        internal.visibility = Visibility::Internal;
        append(&mut ticket, internal, Utc::now()).unwrap();
        assert!(ticket.sla.first_response_at.is_none());

        let reply = append(&mut ticket, message(ActorKind::Agent, "on it"), Utc::now())
            .unwrap();
        assert_eq!(ticket.sla.first_response_at, Some(reply.timestamp));

        // a later agent message must not move the stamp
        append(&mut ticket, message(ActorKind::Agent, "update"), Utc::now()).unwrap();
        assert_eq!(ticket.sla.first_response_at, Some(reply.timestamp));
    }

    #[test]
    fn customers_see_public_entries_only() {
        let mut ticket = sample_ticket();
        append(&mut ticket, message(ActorKind::Customer, "help"), Utc::now()).unwrap();
        let mut note = message(ActorKind::Agent, "internal note");
        note.visibility = Visibility::Internal;
        append(&mut ticket, note, Utc::now()).unwrap();
        append(&mut ticket, message(ActorKind::Agent, "public reply"), Utc::now()).unwrap();

        let customer: Vec<_> = ticket.visible_to(Audience::Customer).collect();
        let agent: Vec<_> = ticket.visible_to(Audience::Agent).collect();
        assert_eq!(agent.len(), ticket.entries.len());
        assert!(customer.iter().all(|e| e.visibility == Visibility::Public));
        assert!(customer.len() < agent.len());
        // relative order preserved
        let seqs: Vec<_> = customer.iter().map(|e| e.seq).collect();
        let mut sorted = seqs.clone();
        sorted.sort();
        assert_eq!(seqs, sorted);
    }
}
