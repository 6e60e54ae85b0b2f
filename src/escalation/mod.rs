//! Escalation delivery.
//!
//! The sweep hands fully-described breach events to an
//! [`EscalationNotifier`]; what happens next (log line, webhook, queue) is
//! the notifier's business. Keeping this behind a trait is what lets tests
//! record events instead of standing up receivers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

use crate::sla::BreachKind;

#[derive(Debug, Clone, Serialize)]
pub struct BreachEvent {
    pub ticket_id: Uuid,
    pub number: String,
    pub kind: BreachKind,
    pub deadline: DateTime<Utc>,
    pub at: DateTime<Utc>,
}

#[async_trait]
pub trait EscalationNotifier: Send + Sync {
    async fn notify(&self, event: &BreachEvent) -> anyhow::Result<()>;
}

/// Default notifier: a structured warn line per breach.
pub struct LogNotifier;

#[async_trait]
impl EscalationNotifier for LogNotifier {
    async fn notify(&self, event: &BreachEvent) -> anyhow::Result<()> {
        log::warn!(
            "SLA escalation: ticket {} ({}) {} (deadline was {})",
            event.number,
            event.ticket_id,
            event.kind,
            event.deadline.to_rfc3339()
        );
        Ok(())
    }
}

/// Posts each breach as JSON to a configured endpoint.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl EscalationNotifier for WebhookNotifier {
    async fn notify(&self, event: &BreachEvent) -> anyhow::Result<()> {
        self.client
            .post(&self.url)
            .json(event)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
