//! SLA policy resolution and deadline tracking.
//!
//! Policies map (category, priority) to response/resolution targets and are
//! loaded from TOML or from the built-in table. Deadlines are stamped once
//! at ticket creation and never move afterwards, so an SLA cannot be gamed
//! by editing priority mid-flight. The tracker also remembers which
//! breaches it has already escalated, which is what makes the sweep
//! fire each alert exactly once.

pub mod sweep;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::tickets::{Category, Priority, Ticket, TicketError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaHealth {
    OnTrack,
    AtRisk,
    Breached,
}

impl SlaHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlaHealth::OnTrack => "on_track",
            SlaHealth::AtRisk => "at_risk",
            SlaHealth::Breached => "breached",
        }
    }

    /// Severity rank; health only ever moves up while the clock runs.
    pub fn rank(&self) -> u8 {
        match self {
            SlaHealth::OnTrack => 0,
            SlaHealth::AtRisk => 1,
            SlaHealth::Breached => 2,
        }
    }
}

impl fmt::Display for SlaHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreachKind {
    ResponseOverdue,
    ResolutionAtRisk,
    ResolutionOverdue,
}

impl BreachKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreachKind::ResponseOverdue => "response_overdue",
            BreachKind::ResolutionAtRisk => "resolution_at_risk",
            BreachKind::ResolutionOverdue => "resolution_overdue",
        }
    }
}

impl fmt::Display for BreachKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deadlines stamped onto a ticket at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaStamp {
    pub first_response_due: DateTime<Utc>,
    pub resolve_due: DateTime<Utc>,
    pub first_response_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SlaTarget {
    pub first_response_minutes: i64,
    pub resolution_minutes: i64,
}

impl SlaTarget {
    pub fn first_response(&self) -> Duration {
        Duration::minutes(self.first_response_minutes)
    }

    pub fn resolution(&self) -> Duration {
        Duration::minutes(self.resolution_minutes)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    pub category: Category,
    pub priority: Priority,
    #[serde(flatten)]
    pub target: SlaTarget,
}

fn default_at_risk_fraction() -> f64 {
    0.2
}

/// A complete policy table: explicit rules plus an optional fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaPolicySet {
    #[serde(default = "default_at_risk_fraction")]
    pub at_risk_fraction: f64,
    pub default: Option<SlaTarget>,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

impl SlaPolicySet {
    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path.as_ref())?;
        Ok(Self::from_toml_str(&raw)?)
    }

    /// Table shipped with the engine, used when no policy file is
    /// configured. Times are minutes.
    pub fn builtin() -> Self {
        let rule = |category, priority, response, resolution| PolicyRule {
            category,
            priority,
            target: SlaTarget {
                first_response_minutes: response,
                resolution_minutes: resolution,
            },
        };
        Self {
            at_risk_fraction: default_at_risk_fraction(),
            default: Some(SlaTarget {
                first_response_minutes: 60,
                resolution_minutes: 480,
            }),
            rules: vec![
                rule(Category::Urgent, Priority::Critical, 15, 120),
                rule(Category::Urgent, Priority::High, 20, 180),
                rule(Category::Support, Priority::Critical, 30, 240),
                rule(Category::Support, Priority::High, 30, 240),
                rule(Category::Complaint, Priority::Critical, 30, 240),
                rule(Category::Complaint, Priority::High, 45, 360),
                rule(Category::Request, Priority::Low, 240, 2880),
                rule(Category::Inquiry, Priority::Low, 240, 2880),
            ],
        }
    }

    /// Most specific rule wins; the fallback covers the rest.
    pub fn resolve(
        &self,
        category: Category,
        priority: Priority,
    ) -> Result<&SlaTarget, TicketError> {
        self.rules
            .iter()
            .find(|r| r.category == category && r.priority == priority)
            .map(|r| &r.target)
            .or(self.default.as_ref())
            .ok_or_else(|| TicketError::PolicyNotFound {
                category: category.to_string(),
                priority: priority.to_string(),
            })
    }

    /// Rejects tables that would fail at runtime: every (category, priority)
    /// pair must resolve, targets must be positive and ordered, and the
    /// at-risk fraction must leave room on both sides.
    pub fn validate(&self) -> Result<(), TicketError> {
        if !(self.at_risk_fraction > 0.0 && self.at_risk_fraction < 1.0) {
            return Err(TicketError::Validation {
                field: "at_risk_fraction",
                reason: format!(
                    "must be strictly between 0 and 1, got {}",
                    self.at_risk_fraction
                ),
            });
        }
        for category in Category::ALL {
            for priority in Priority::ALL {
                let target = self.resolve(category, priority)?;
                if target.first_response_minutes < 1 || target.resolution_minutes < 1 {
                    return Err(TicketError::Validation {
                        field: "rules",
                        reason: format!(
                            "{category}/{priority}: targets must be at least one minute"
                        ),
                    });
                }
                if target.first_response_minutes > target.resolution_minutes {
                    return Err(TicketError::Validation {
                        field: "rules",
                        reason: format!(
                            "{category}/{priority}: first response due after resolution"
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Stateful tracker: holds the active policy table and the set of breaches
/// already escalated. Escalation marks survive re-opens on purpose; the
/// deadline did not move, so the alert already went out.
pub struct SlaTracker {
    policies: RwLock<SlaPolicySet>,
    escalated: Mutex<HashSet<(Uuid, BreachKind)>>,
}

impl SlaTracker {
    pub fn new(policies: SlaPolicySet) -> Self {
        Self {
            policies: RwLock::new(policies),
            escalated: Mutex::new(HashSet::new()),
        }
    }

    pub fn stamp(
        &self,
        category: Category,
        priority: Priority,
        created_at: DateTime<Utc>,
    ) -> Result<SlaStamp, TicketError> {
        let policies = self.policies.read().unwrap_or_else(|e| e.into_inner());
        let target = policies.resolve(category, priority)?;
        Ok(SlaStamp {
            first_response_due: created_at + target.first_response(),
            resolve_due: created_at + target.resolution(),
            first_response_at: None,
        })
    }

    pub fn compute_deadline(
        &self,
        category: Category,
        priority: Priority,
        created_at: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, TicketError> {
        Ok(self.stamp(category, priority, created_at)?.resolve_due)
    }

    /// Tri-state health against the resolution deadline.
    ///
    /// Resolved and closed tickets report on_track: their clock stopped.
    /// At exactly the deadline the ticket is at_risk; breached begins
    /// strictly after.
    pub fn evaluate(&self, ticket: &Ticket, now: DateTime<Utc>) -> SlaHealth {
        if ticket.status.is_terminal() {
            return SlaHealth::OnTrack;
        }
        if now > ticket.sla.resolve_due {
            return SlaHealth::Breached;
        }
        let remaining = (ticket.sla.resolve_due - now).num_milliseconds();
        let total = (ticket.sla.resolve_due - ticket.created_at).num_milliseconds();
        let fraction = self.at_risk_fraction();
        if (remaining as f64) <= (total as f64) * fraction {
            SlaHealth::AtRisk
        } else {
            SlaHealth::OnTrack
        }
    }

    /// Breach conditions holding at `now` that have not been escalated yet.
    /// Reading does not claim them; [`SlaTracker::mark_escalated`] is the
    /// atomic claim.
    pub fn fresh_findings(&self, ticket: &Ticket, now: DateTime<Utc>) -> Vec<BreachKind> {
        if ticket.status.is_terminal() {
            return Vec::new();
        }
        let mut findings = Vec::new();
        if ticket.sla.first_response_at.is_none() && now > ticket.sla.first_response_due {
            findings.push(BreachKind::ResponseOverdue);
        }
        match self.evaluate(ticket, now) {
            SlaHealth::Breached => findings.push(BreachKind::ResolutionOverdue),
            SlaHealth::AtRisk => findings.push(BreachKind::ResolutionAtRisk),
            SlaHealth::OnTrack => {}
        }
        let escalated = self.escalated.lock().unwrap_or_else(|e| e.into_inner());
        findings.retain(|kind| !escalated.contains(&(ticket.id, *kind)));
        findings
    }

    /// Claims a breach for escalation. Returns true exactly once per
    /// (ticket, kind); later calls, including from concurrent sweeps,
    /// get false.
    pub fn mark_escalated(&self, ticket_id: Uuid, kind: BreachKind) -> bool {
        let mut escalated = self.escalated.lock().unwrap_or_else(|e| e.into_inner());
        escalated.insert((ticket_id, kind))
    }

    pub fn reload(&self, set: SlaPolicySet) {
        let mut policies = self.policies.write().unwrap_or_else(|e| e.into_inner());
        *policies = set;
    }

    pub fn policy_snapshot(&self) -> SlaPolicySet {
        self.policies
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn at_risk_fraction(&self) -> f64 {
        self.policies
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .at_risk_fraction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tickets::store::tests::sample_ticket;
    use crate::tickets::TicketStatus;
    use rand::Rng;
    use std::io::Write as _;

    fn tracker() -> SlaTracker {
        SlaTracker::new(SlaPolicySet::builtin())
    }

    /// Ticket with a known window: created now, support/high, 240 minute
    /// resolution per the built-in table.
    fn stamped_ticket(tracker: &SlaTracker) -> Ticket {
        let mut ticket = sample_ticket();
        ticket.category = Category::Support;
        ticket.priority = Priority::High;
        ticket.sla = tracker
            .stamp(ticket.category, ticket.priority, ticket.created_at)
            .unwrap();
        ticket
    }

    #[test]
    fn builtin_table_is_valid() {
        SlaPolicySet::builtin().validate().unwrap();
    }

    #[test]
    fn specific_rule_beats_default() {
        let set = SlaPolicySet::builtin();
        let support_high = set.resolve(Category::Support, Priority::High).unwrap();
        assert_eq!(support_high.resolution_minutes, 240);
        // no rule for support/medium: fallback applies
        let support_medium = set.resolve(Category::Support, Priority::Medium).unwrap();
        assert_eq!(support_medium.resolution_minutes, 480);
    }

    #[test]
    fn missing_pair_without_default_is_policy_not_found() {
        let set = SlaPolicySet {
            at_risk_fraction: 0.2,
            default: None,
            rules: vec![PolicyRule {
                category: Category::Support,
                priority: Priority::High,
                target: SlaTarget {
                    first_response_minutes: 30,
                    resolution_minutes: 240,
                },
            }],
        };
        let err = set.resolve(Category::Inquiry, Priority::Low).unwrap_err();
        assert!(matches!(err, TicketError::PolicyNotFound { .. }));
        assert!(set.validate().is_err());
    }

    #[test]
    fn stamp_arithmetic_is_exact() {
        let tracker = tracker();
        let created = "2026-03-01T09:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let stamp = tracker
            .stamp(Category::Urgent, Priority::Critical, created)
            .unwrap();
        assert_eq!(
            stamp.first_response_due,
            "2026-03-01T09:15:00Z".parse::<DateTime<Utc>>().unwrap()
        );
        assert_eq!(
            stamp.resolve_due,
            "2026-03-01T11:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
        assert!(stamp.first_response_at.is_none());
        assert_eq!(
            tracker
                .compute_deadline(Category::Urgent, Priority::Critical, created)
                .unwrap(),
            stamp.resolve_due
        );
    }

    #[test]
    fn health_thresholds_at_the_boundaries() {
        let tracker = tracker();
        let ticket = stamped_ticket(&tracker);
        let created = ticket.created_at;
        let window = Duration::minutes(240);

        // comfortably inside the window
        assert_eq!(
            tracker.evaluate(&ticket, created + Duration::minutes(60)),
            SlaHealth::OnTrack
        );
        // 90% consumed: remaining 10% <= 20% threshold
        assert_eq!(
            tracker.evaluate(&ticket, created + Duration::minutes(216)),
            SlaHealth::AtRisk
        );
        // exactly at the at-risk boundary (remaining == 20%)
        assert_eq!(
            tracker.evaluate(&ticket, created + Duration::minutes(192)),
            SlaHealth::AtRisk
        );
        // a second before the boundary
        assert_eq!(
            tracker.evaluate(
                &ticket,
                created + Duration::minutes(192) - Duration::seconds(1)
            ),
            SlaHealth::OnTrack
        );
        // exactly at the deadline: still at_risk, not breached
        assert_eq!(tracker.evaluate(&ticket, created + window), SlaHealth::AtRisk);
        // strictly after
        assert_eq!(
            tracker.evaluate(&ticket, created + window + Duration::seconds(1)),
            SlaHealth::Breached
        );
        // 110% consumed
        assert_eq!(
            tracker.evaluate(&ticket, created + Duration::minutes(264)),
            SlaHealth::Breached
        );
    }

    #[test]
    fn terminal_tickets_are_on_track() {
        let tracker = tracker();
        let mut ticket = stamped_ticket(&tracker);
        let long_after = ticket.created_at + Duration::days(30);
        assert_eq!(tracker.evaluate(&ticket, long_after), SlaHealth::Breached);

        ticket.status = TicketStatus::Resolved;
        assert_eq!(tracker.evaluate(&ticket, long_after), SlaHealth::OnTrack);
        ticket.status = TicketStatus::Closed;
        assert_eq!(tracker.evaluate(&ticket, long_after), SlaHealth::OnTrack);
        assert!(tracker.fresh_findings(&ticket, long_after).is_empty());
    }

    #[test]
    fn evaluation_is_deterministic() {
        let tracker = tracker();
        let ticket = stamped_ticket(&tracker);
        let at = ticket.created_at + Duration::minutes(230);
        let first = tracker.evaluate(&ticket, at);
        for _ in 0..10 {
            assert_eq!(tracker.evaluate(&ticket, at), first);
        }
        // a second tracker over the same table agrees
        let other = SlaTracker::new(SlaPolicySet::builtin());
        assert_eq!(other.evaluate(&ticket, at), first);
    }

    #[test]
    fn health_never_improves_while_the_clock_runs() {
        let tracker = tracker();
        let ticket = stamped_ticket(&tracker);
        let mut rng = rand::thread_rng();

        for _ in 0..50 {
            let mut offsets: Vec<i64> = (0..20).map(|_| rng.gen_range(0..400)).collect();
            offsets.sort();
            let mut last_rank = 0;
            for minutes in offsets {
                let health =
                    tracker.evaluate(&ticket, ticket.created_at + Duration::minutes(minutes));
                assert!(
                    health.rank() >= last_rank,
                    "health went backwards at minute {minutes}"
                );
                last_rank = health.rank();
            }
        }
    }

    #[test]
    fn response_overdue_is_reported_until_marked() {
        let tracker = tracker();
        let ticket = stamped_ticket(&tracker);
        let late = ticket.sla.first_response_due + Duration::minutes(5);

        let findings = tracker.fresh_findings(&ticket, late);
        assert!(findings.contains(&BreachKind::ResponseOverdue));

        assert!(tracker.mark_escalated(ticket.id, BreachKind::ResponseOverdue));
        assert!(!tracker
            .fresh_findings(&ticket, late)
            .contains(&BreachKind::ResponseOverdue));
        // second claim loses
        assert!(!tracker.mark_escalated(ticket.id, BreachKind::ResponseOverdue));
    }

    #[test]
    fn answered_tickets_never_report_response_overdue() {
        let tracker = tracker();
        let mut ticket = stamped_ticket(&tracker);
        ticket.sla.first_response_at = Some(ticket.created_at + Duration::minutes(10));
        let late = ticket.sla.first_response_due + Duration::hours(1);
        assert!(!tracker
            .fresh_findings(&ticket, late)
            .contains(&BreachKind::ResponseOverdue));
    }

    #[test]
    fn at_risk_and_overdue_are_distinct_findings() {
        let tracker = tracker();
        let mut ticket = stamped_ticket(&tracker);
        ticket.sla.first_response_at = Some(ticket.created_at);

        let at_risk_time = ticket.created_at + Duration::minutes(230);
        assert_eq!(
            tracker.fresh_findings(&ticket, at_risk_time),
            vec![BreachKind::ResolutionAtRisk]
        );
        tracker.mark_escalated(ticket.id, BreachKind::ResolutionAtRisk);

        let overdue_time = ticket.created_at + Duration::minutes(300);
        assert_eq!(
            tracker.fresh_findings(&ticket, overdue_time),
            vec![BreachKind::ResolutionOverdue]
        );
    }

    #[test]
    fn policy_table_parses_from_toml() {
        let raw = r#"
            at_risk_fraction = 0.25

            [default]
            first_response_minutes = 90
            resolution_minutes = 600

            [[rules]]
            category = "complaint"
            priority = "critical"
            first_response_minutes = 10
            resolution_minutes = 60
        "#;
        let set = SlaPolicySet::from_toml_str(raw).unwrap();
        set.validate().unwrap();
        assert_eq!(set.at_risk_fraction, 0.25);
        assert_eq!(
            set.resolve(Category::Complaint, Priority::Critical)
                .unwrap()
                .resolution_minutes,
            60
        );
        assert_eq!(
            set.resolve(Category::Support, Priority::Low)
                .unwrap()
                .resolution_minutes,
            600
        );
    }

    #[test]
    fn policy_file_round_trips_through_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "[default]\nfirst_response_minutes = 45\nresolution_minutes = 300\n"
        )
        .unwrap();
        let set = SlaPolicySet::load(file.path()).unwrap();
        set.validate().unwrap();
        assert_eq!(set.at_risk_fraction, 0.2); // serde default
        assert_eq!(
            set.resolve(Category::Urgent, Priority::Critical)
                .unwrap()
                .first_response_minutes,
            45
        );
    }

    #[test]
    fn validate_rejects_bad_tables() {
        let mut set = SlaPolicySet::builtin();
        set.at_risk_fraction = 1.0;
        assert!(matches!(
            set.validate().unwrap_err(),
            TicketError::Validation { field: "at_risk_fraction", .. }
        ));

        let mut set = SlaPolicySet::builtin();
        set.default = Some(SlaTarget {
            first_response_minutes: 600,
            resolution_minutes: 300,
        });
        assert!(matches!(
            set.validate().unwrap_err(),
            TicketError::Validation { field: "rules", .. }
        ));

        let mut set = SlaPolicySet::builtin();
        set.default = Some(SlaTarget {
            first_response_minutes: 0,
            resolution_minutes: 300,
        });
        assert!(set.validate().is_err());
    }
}
