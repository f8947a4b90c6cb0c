// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Shared data types used across the lending sub-systems.
//!
//! All persisted types implement [`Clone`], [`Debug`], [`serde::Serialize`],
//! and [`serde::Deserialize`].  Enum variants serialise in `snake_case` so the
//! stored values match the relational column values (`pending`,
//! `total_loss`, ...).
//!
//! Every mutable record carries a `version` counter.  Storage backends use it
//! for compare-and-swap: a write succeeds only when the stored version still
//! equals the version that was read.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Lifecycle status of a physical resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// On the shelf and requestable.
    Available,
    /// Picked up by a student.
    Borrowed,
    /// Held for a pending/approved request or a notified queue entry.
    Reserved,
    /// Out of circulation for repair.
    Maintenance,
    /// Permanently out of circulation (lost, stolen, written off).
    Retired,
}

impl ResourceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceStatus::Available   => "available",
            ResourceStatus::Borrowed    => "borrowed",
            ResourceStatus::Reserved    => "reserved",
            ResourceStatus::Maintenance => "maintenance",
            ResourceStatus::Retired     => "retired",
        }
    }
}

/// A lendable item from the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub name: String,
    pub category_id: String,
    pub status: ResourceStatus,
    pub version: u64,
}

impl Resource {
    /// A new, available resource that has never been stored.
    pub fn new(id: impl Into<String>, name: impl Into<String>, category_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category_id: category_id.into(),
            status: ResourceStatus::Available,
            version: 0,
        }
    }
}

/// Policy attributes shared by a class of resources.
///
/// Read-only input to every lending decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceCategory {
    pub id: String,
    pub name: String,
    /// Wellness hours credited for any on-time return.
    pub base_wellness_hours: f64,
    /// Extra wellness hours credited per hour the item was held.
    pub hourly_factor: f64,
    /// Low-risk categories are candidates for automatic approval.
    pub is_low_risk: bool,
    /// Forces human review regardless of trust score.
    pub requires_approval: bool,
    /// Loan length; `None` falls back to `Settings::default_loan_days`.
    pub max_loan_days: Option<u32>,
    /// Cost used by the damage adjudicator when no estimate is supplied.
    pub replacement_cost: Decimal,
    pub version: u64,
}

impl ResourceCategory {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            base_wellness_hours: 0.0,
            hourly_factor: 0.0,
            is_low_risk: false,
            requires_approval: true,
            max_loan_days: None,
            replacement_cost: Decimal::ZERO,
            version: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Loans
// ---------------------------------------------------------------------------

/// Status of a [`Loan`].
///
/// `Queued` is never stored on a loan; it is the status reported for a
/// request that landed in the waitlist (see [`RequestOutcome::status`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Pending,
    Approved,
    Rejected,
    Active,
    Returned,
    Overdue,
    Lost,
    Damaged,
    Expired,
    Queued,
}

impl LoanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LoanStatus::Pending  => "pending",
            LoanStatus::Approved => "approved",
            LoanStatus::Rejected => "rejected",
            LoanStatus::Active   => "active",
            LoanStatus::Returned => "returned",
            LoanStatus::Overdue  => "overdue",
            LoanStatus::Lost     => "lost",
            LoanStatus::Damaged  => "damaged",
            LoanStatus::Expired  => "expired",
            LoanStatus::Queued   => "queued",
        }
    }

    /// Terminal loans are never reopened.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LoanStatus::Returned | LoanStatus::Rejected | LoanStatus::Expired | LoanStatus::Lost
        )
    }

    /// Open loans occupy their resource and count against the student's
    /// active-loan limit.
    pub fn is_open(self) -> bool {
        matches!(
            self,
            LoanStatus::Pending | LoanStatus::Approved | LoanStatus::Active | LoanStatus::Overdue
        )
    }

    /// Whether `self -> next` is an edge of the loan state machine.
    pub fn can_transition_to(self, next: LoanStatus) -> bool {
        use LoanStatus::*;
        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Approved, Active)
                | (Approved, Expired)
                | (Active, Returned)
                | (Active, Overdue)
                | (Active, Damaged)
                | (Active, Lost)
                | (Overdue, Returned)
                | (Overdue, Damaged)
                | (Overdue, Lost)
                | (Damaged, Lost)
        )
    }
}

/// Who made the approval decision for a loan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Automatic,
    Human,
}

/// A single borrowing of one resource by one student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    pub id: String,
    pub resource_id: String,
    pub user_id: String,
    pub status: LoanStatus,
    pub decision_source: DecisionSource,
    pub requested_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub returned_at: Option<DateTime<Utc>>,
    pub pickup_deadline: Option<DateTime<Utc>>,
    /// Trust score snapshot taken when the request was evaluated.
    pub trust_score_at_request: i64,
    pub admin_notes: Option<String>,
    pub damage_notes: Option<String>,
    /// Wellness hours credited on an on-time return.
    pub wellness_hours_awarded: f64,
    /// Penalty hours charged on a late return.
    pub penalty_hours: u32,
    /// Queue entry this loan was converted from, if any.
    pub queue_entry_id: Option<String>,
    pub version: u64,
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Status of a waitlist entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Waiting,
    Notified,
    Expired,
    Converted,
}

/// One student's place in the waitlist of one resource.
///
/// `position` is 1-based among `waiting` entries; entries that left the line
/// carry position `0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: String,
    pub resource_id: String,
    pub user_id: String,
    pub position: u32,
    pub status: QueueStatus,
    pub enqueued_at: DateTime<Utc>,
    pub notified_at: Option<DateTime<Utc>>,
    /// End of the exclusive response window of a notified entry.
    pub respond_by: Option<DateTime<Utc>>,
    pub version: u64,
}

// ---------------------------------------------------------------------------
// Trust
// ---------------------------------------------------------------------------

/// Behavioural counters accumulated over a student's loan history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorCounters {
    pub total_loans: u32,
    pub on_time_returns: u32,
    pub late_returns: u32,
    pub damages: u32,
    pub losses: u32,
    pub events_attended: u32,
}

/// Per-student trust score, counters and block state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentBehavioralStatus {
    pub user_id: String,
    pub trust_score: i64,
    #[serde(flatten)]
    pub counters: BehaviorCounters,
    pub is_blocked: bool,
    pub blocked_until: Option<DateTime<Utc>>,
    pub blocked_reason: Option<String>,
    /// Timestamps of late returns, pruned to the policy window.
    #[serde(default)]
    pub late_return_history: Vec<DateTime<Utc>>,
    pub version: u64,
}

impl StudentBehavioralStatus {
    pub fn new(user_id: impl Into<String>, trust_score: i64) -> Self {
        Self {
            user_id: user_id.into(),
            trust_score,
            counters: BehaviorCounters::default(),
            is_blocked: false,
            blocked_until: None,
            blocked_reason: None,
            late_return_history: Vec::new(),
            version: 0,
        }
    }

    /// Effective block state at `now`.  An elapsed `blocked_until` lifts the
    /// block without any write.
    pub fn is_blocked_at(&self, now: DateTime<Utc>) -> bool {
        self.is_blocked && self.blocked_until.map_or(true, |until| now < until)
    }
}

// ---------------------------------------------------------------------------
// Damage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DamageType {
    Damage,
    Loss,
    Theft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Minor,
    Moderate,
    Severe,
    TotalLoss,
}

/// Review status of a [`DamageRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DamageStatus {
    Reported,
    UnderReview,
    Resolved,
    Waived,
}

impl DamageStatus {
    pub fn can_transition_to(self, next: DamageStatus) -> bool {
        use DamageStatus::*;
        matches!(
            (self, next),
            (Reported, UnderReview)
                | (Reported, Resolved)
                | (Reported, Waived)
                | (UnderReview, Resolved)
                | (UnderReview, Waived)
        )
    }
}

/// Incident details supplied by the reporting administrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub damage_type: DamageType,
    pub severity: Severity,
    pub description: String,
    #[serde(default)]
    pub images: Vec<String>,
    pub estimated_cost: Option<Decimal>,
}

impl Incident {
    /// Loss, theft and total-loss damage all close the loan as `lost`.
    pub fn is_loss(&self) -> bool {
        self.damage_type != DamageType::Damage || self.severity == Severity::TotalLoss
    }
}

/// An adjudicated damage or loss incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DamageRecord {
    pub id: String,
    pub loan_id: String,
    pub resource_id: String,
    pub user_id: String,
    pub damage_type: DamageType,
    pub severity: Severity,
    pub description: String,
    pub damage_images: Vec<String>,
    pub estimated_cost: Option<Decimal>,
    pub fine_amount: Decimal,
    pub reported_by: String,
    pub reported_at: DateTime<Utc>,
    pub status: DamageStatus,
    pub reviewed_by: Option<String>,
    pub version: u64,
}

// ---------------------------------------------------------------------------
// Audit trail
// ---------------------------------------------------------------------------

/// An immutable record of one loan status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub loan_id: String,
    pub resource_id: String,
    pub user_id: String,
    /// `None` for the creation of the loan.
    pub from: Option<LoanStatus>,
    pub to: LoanStatus,
    /// Admin id, student id, or `"system"` for time-driven transitions.
    pub actor: String,
    pub at: DateTime<Utc>,
    pub note: Option<String>,
}

/// Filter used to narrow the results of a transition query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransitionFilter {
    /// If set, only return records for this loan.
    pub loan_id: Option<String>,
    /// If set, only return records for this student.
    pub user_id: Option<String>,
    /// If set, only return records at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// If set, only return records at or before this instant.
    pub until: Option<DateTime<Utc>>,
    /// If set, limit the number of returned records.
    pub limit: Option<usize>,
}

impl TransitionFilter {
    pub fn matches(&self, record: &TransitionRecord) -> bool {
        if let Some(ref loan_id) = self.loan_id {
            if &record.loan_id != loan_id {
                return false;
            }
        }
        if let Some(ref user_id) = self.user_id {
            if &record.user_id != user_id {
                return false;
            }
        }
        if let Some(since) = self.since {
            if record.at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if record.at > until {
                return false;
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Engine results
// ---------------------------------------------------------------------------

/// Result of a loan request: either a loan or a waitlist entry.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    Loan(Loan),
    Queued(QueueEntry),
}

impl RequestOutcome {
    pub fn status(&self) -> LoanStatus {
        match self {
            RequestOutcome::Loan(loan) => loan.status,
            RequestOutcome::Queued(_) => LoanStatus::Queued,
        }
    }

    pub fn loan(&self) -> Option<&Loan> {
        match self {
            RequestOutcome::Loan(loan) => Some(loan),
            RequestOutcome::Queued(_) => None,
        }
    }

    pub fn queue_entry(&self) -> Option<&QueueEntry> {
        match self {
            RequestOutcome::Loan(_) => None,
            RequestOutcome::Queued(entry) => Some(entry),
        }
    }
}
