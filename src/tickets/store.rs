//! In-memory ticket store.
//!
//! Tickets live in per-ticket cells inside a shared map, so two mutations
//! of different tickets never contend. A mutation runs against a draft
//! clone and is swapped in only on success, which keeps error paths from
//! leaving a half-updated ticket behind. Every successful write bumps
//! `version`; callers that supply `expected_version` get compare-and-swap
//! semantics.

use chrono::{DateTime, Datelike, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::error::TicketError;
use super::Ticket;

pub struct TicketStore {
    tickets: RwLock<HashMap<Uuid, Arc<RwLock<Ticket>>>>,
    // (year, next sequence) for human-facing ticket numbers
    counter: Mutex<(i32, u64)>,
}

impl TicketStore {
    pub fn new() -> Self {
        Self {
            tickets: RwLock::new(HashMap::new()),
            counter: Mutex::new((0, 0)),
        }
    }

    /// Next display number, `TKT-YYYY-NNNNNN`. The sequence restarts at 1
    /// when the year rolls over.
    pub fn allocate_number(&self, now: DateTime<Utc>) -> String {
        let year = now.year();
        let mut counter = self.counter.lock().unwrap_or_else(|e| e.into_inner());
        if counter.0 != year {
            *counter = (year, 0);
        }
        counter.1 += 1;
        format!("TKT-{year}-{:06}", counter.1)
    }

    pub async fn insert(&self, ticket: Ticket) {
        let mut map = self.tickets.write().await;
        map.insert(ticket.id, Arc::new(RwLock::new(ticket)));
    }

    pub async fn get(&self, id: Uuid) -> Result<Ticket, TicketError> {
        let cell = self.cell(id).await?;
        let ticket = cell.read().await;
        Ok(ticket.clone())
    }

    pub async fn ids(&self) -> Vec<Uuid> {
        self.tickets.read().await.keys().copied().collect()
    }

    pub async fn count(&self) -> usize {
        self.tickets.read().await.len()
    }

    /// Snapshot of every ticket. Each clone is taken under that ticket's
    /// read lock only; the map lock is held just long enough to collect
    /// the cells.
    pub async fn snapshot(&self) -> Vec<Ticket> {
        let cells: Vec<Arc<RwLock<Ticket>>> =
            self.tickets.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(cells.len());
        for cell in cells {
            out.push(cell.read().await.clone());
        }
        out
    }

    /// Runs `f` against a draft of the ticket and commits on success.
    ///
    /// The draft swap means `f` may fail partway through without the
    /// stored ticket observing any of its writes. `expected_version`
    /// mismatches are rejected before `f` runs.
    pub async fn update<T>(
        &self,
        id: Uuid,
        expected_version: Option<u64>,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut Ticket) -> Result<T, TicketError>,
    ) -> Result<(Ticket, T), TicketError> {
        let cell = self.cell(id).await?;
        let mut slot = cell.write().await;

        if let Some(expected) = expected_version {
            if slot.version != expected {
                return Err(TicketError::StaleWrite {
                    id,
                    expected,
                    found: slot.version,
                });
            }
        }

        let mut draft = slot.clone();
        let value = f(&mut draft)?;
        draft.version += 1;
        draft.last_update = now.max(draft.created_at);
        *slot = draft.clone();
        Ok((draft, value))
    }

    async fn cell(&self, id: Uuid) -> Result<Arc<RwLock<Ticket>>, TicketError> {
        let map = self.tickets.read().await;
        map.get(&id).cloned().ok_or(TicketError::NotFound(id))
    }
}

impl Default for TicketStore {
    fn default() -> Self {
        Self::new()
    }
}
