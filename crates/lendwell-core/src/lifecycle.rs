// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Loan state machine rules.
//!
//! Everything here is a pure function of a loan, its category, the settings
//! snapshot and the current time:
//!
//! * [`evaluate_auto_approval`] — the five-gate auto-approval check
//! * [`due_transition`] / [`effective_status`] — time-driven transitions
//! * [`transition`] — apply one edge of the state machine and produce its
//!   audit record
//! * [`due_date_for`] / [`wellness_hours`] — loan length and return credit
//!
//! ## State machine
//!
//! ```text
//! pending ──► approved ──► active ──► returned
//!    │           │           │  ▲
//!    ▼           ▼           ▼  │
//! rejected    expired     overdue ─► damaged ─► lost
//!                            └───────────┴──────► lost
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StateConflict;
use crate::settings::Settings;
use crate::types::{
    Loan, LoanStatus, ResourceCategory, StudentBehavioralStatus, TransitionRecord,
};

/// Actor recorded for time-driven transitions.
pub const SYSTEM_ACTOR: &str = "system";

/// Admin note stored on a request that timed out waiting for review.
pub const APPROVAL_TIMEOUT_NOTE: &str = "approval timed out";

// ---------------------------------------------------------------------------
// Auto-approval
// ---------------------------------------------------------------------------

/// One failed auto-approval condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "gate")]
pub enum ApprovalGate {
    /// `auto_approve_low_risk` is off.
    PolicyDisabled,
    CategoryNotLowRisk,
    CategoryRequiresApproval,
    TrustScoreTooLow { score: i64, required: i64 },
    StudentBlocked,
}

/// Outcome of the auto-approval check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    /// `true` only when every gate passed.
    pub automatic: bool,
    /// Trust score the decision was made with.
    pub trust_score: i64,
    pub failed: Vec<ApprovalGate>,
}

/// Evaluate every auto-approval gate.  All gates are reported, not just the
/// first failure.
///
/// # Examples
///
/// ```rust
/// use chrono::Utc;
/// use lendwell_core::{
///     lifecycle::evaluate_auto_approval,
///     settings::Settings,
///     types::{ResourceCategory, StudentBehavioralStatus},
/// };
///
/// let mut category = ResourceCategory::new("c-1", "Yoga mats");
/// category.is_low_risk = true;
/// category.requires_approval = false;
///
/// let student = StudentBehavioralStatus::new("s-1", 90);
/// let decision = evaluate_auto_approval(&category, &student, &Settings::default(), Utc::now());
/// assert!(decision.automatic);
/// ```
pub fn evaluate_auto_approval(
    category: &ResourceCategory,
    student: &StudentBehavioralStatus,
    settings: &Settings,
    now: DateTime<Utc>,
) -> ApprovalDecision {
    let mut failed = Vec::new();
    if !settings.auto_approve_low_risk {
        failed.push(ApprovalGate::PolicyDisabled);
    }
    if !category.is_low_risk {
        failed.push(ApprovalGate::CategoryNotLowRisk);
    }
    if category.requires_approval {
        failed.push(ApprovalGate::CategoryRequiresApproval);
    }
    if student.trust_score < settings.min_trust_score_auto_approve {
        failed.push(ApprovalGate::TrustScoreTooLow {
            score: student.trust_score,
            required: settings.min_trust_score_auto_approve,
        });
    }
    if student.is_blocked_at(now) {
        failed.push(ApprovalGate::StudentBlocked);
    }
    ApprovalDecision { automatic: failed.is_empty(), trust_score: student.trust_score, failed }
}

// ---------------------------------------------------------------------------
// Time-driven transitions
// ---------------------------------------------------------------------------

/// A transition that fires once `deadline` has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueTransition {
    pub to: LoanStatus,
    pub deadline: DateTime<Utc>,
}

/// The time-driven transition pending on `loan`, if its status has one.
///
/// * `pending`  → `rejected` at `requested_at + approval_timeout`
/// * `approved` → `expired`  at `pickup_deadline`
/// * `active`   → `overdue`  at `due_date`
pub fn due_transition(loan: &Loan, settings: &Settings) -> Option<DueTransition> {
    match loan.status {
        LoanStatus::Pending => Some(DueTransition {
            to: LoanStatus::Rejected,
            deadline: loan.requested_at + settings.approval_timeout(),
        }),
        LoanStatus::Approved => loan
            .pickup_deadline
            .map(|deadline| DueTransition { to: LoanStatus::Expired, deadline }),
        LoanStatus::Active => loan
            .due_date
            .map(|deadline| DueTransition { to: LoanStatus::Overdue, deadline }),
        _ => None,
    }
}

/// [`due_transition`] filtered to those whose deadline is strictly before `now`.
pub fn fired_transition(loan: &Loan, settings: &Settings, now: DateTime<Utc>) -> Option<DueTransition> {
    due_transition(loan, settings).filter(|due| now > due.deadline)
}

/// The status `loan` has at `now`, whether or not the time-driven transition
/// has been written yet.
pub fn effective_status(loan: &Loan, settings: &Settings, now: DateTime<Utc>) -> LoanStatus {
    fired_transition(loan, settings, now).map_or(loan.status, |due| due.to)
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// Move `loan` along one edge and return the audit record for it.
///
/// Fields other than `status` are the caller's to set.
pub fn transition(
    loan: &mut Loan,
    to: LoanStatus,
    actor: &str,
    at: DateTime<Utc>,
    note: Option<String>,
) -> Result<TransitionRecord, StateConflict> {
    let from = loan.status;
    if !from.can_transition_to(to) {
        return Err(StateConflict::InvalidLoanTransition { loan_id: loan.id.clone(), from, to });
    }
    loan.status = to;
    tracing::info!(
        loan_id = %loan.id,
        resource_id = %loan.resource_id,
        user_id = %loan.user_id,
        from = from.as_str(),
        to = to.as_str(),
        actor,
        "loan transition"
    );
    Ok(TransitionRecord {
        loan_id: loan.id.clone(),
        resource_id: loan.resource_id.clone(),
        user_id: loan.user_id.clone(),
        from: Some(from),
        to,
        actor: actor.to_owned(),
        at,
        note,
    })
}

/// Audit record for the creation of `loan`.
pub fn creation_record(loan: &Loan, actor: &str) -> TransitionRecord {
    TransitionRecord {
        loan_id: loan.id.clone(),
        resource_id: loan.resource_id.clone(),
        user_id: loan.user_id.clone(),
        from: None,
        to: loan.status,
        actor: actor.to_owned(),
        at: loan.requested_at,
        note: None,
    }
}

// ---------------------------------------------------------------------------
// Loan length and wellness credit
// ---------------------------------------------------------------------------

fn loan_days(category: &ResourceCategory, settings: &Settings) -> u32 {
    category.max_loan_days.unwrap_or(settings.default_loan_days)
}

/// Due date for a loan delivered at `delivered_at`.
pub fn due_date_for(
    category: &ResourceCategory,
    settings: &Settings,
    delivered_at: DateTime<Utc>,
) -> DateTime<Utc> {
    delivered_at + Duration::days(loan_days(category, settings).into())
}

/// Wellness hours credited for an on-time return.
///
/// `base_wellness_hours + hourly_factor × hours held`, with hours held capped
/// at the loan length.
pub fn wellness_hours(
    category: &ResourceCategory,
    settings: &Settings,
    delivered_at: DateTime<Utc>,
    returned_at: DateTime<Utc>,
) -> f64 {
    let held_minutes = (returned_at - delivered_at).num_minutes().max(0) as f64;
    let cap_hours = f64::from(loan_days(category, settings)) * 24.0;
    let held_hours = (held_minutes / 60.0).min(cap_hours);
    let hours = category.base_wellness_hours + category.hourly_factor * held_hours;
    (hours * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DecisionSource;

    fn low_risk() -> ResourceCategory {
        let mut category = ResourceCategory::new("c-1", "Yoga mats");
        category.is_low_risk = true;
        category.requires_approval = false;
        category
    }

    fn loan(status: LoanStatus, requested_at: DateTime<Utc>) -> Loan {
        Loan {
            id: "l-1".into(),
            resource_id: "r-1".into(),
            user_id: "s-1".into(),
            status,
            decision_source: DecisionSource::Human,
            requested_at,
            approved_at: None,
            delivered_at: None,
            due_date: None,
            returned_at: None,
            pickup_deadline: None,
            trust_score_at_request: 100,
            admin_notes: None,
            damage_notes: None,
            wellness_hours_awarded: 0.0,
            penalty_hours: 0,
            queue_entry_id: None,
            version: 1,
        }
    }

    #[test]
    fn every_gate_can_veto_on_its_own() {
        let now = Utc::now();
        let settings = Settings::default();
        let student = StudentBehavioralStatus::new("s-1", 90);
        assert!(evaluate_auto_approval(&low_risk(), &student, &settings, now).automatic);

        let disabled = Settings { auto_approve_low_risk: false, ..Settings::default() };
        let decision = evaluate_auto_approval(&low_risk(), &student, &disabled, now);
        assert_eq!(decision.failed, vec![ApprovalGate::PolicyDisabled]);

        let mut risky = low_risk();
        risky.is_low_risk = false;
        let decision = evaluate_auto_approval(&risky, &student, &settings, now);
        assert_eq!(decision.failed, vec![ApprovalGate::CategoryNotLowRisk]);

        let mut reviewed = low_risk();
        reviewed.requires_approval = true;
        let decision = evaluate_auto_approval(&reviewed, &student, &settings, now);
        assert_eq!(decision.failed, vec![ApprovalGate::CategoryRequiresApproval]);

        let low_score = StudentBehavioralStatus::new("s-1", 70);
        let decision = evaluate_auto_approval(&low_risk(), &low_score, &settings, now);
        assert_eq!(decision.failed, vec![ApprovalGate::TrustScoreTooLow { score: 70, required: 80 }]);

        let mut blocked = StudentBehavioralStatus::new("s-1", 90);
        blocked.is_blocked = true;
        let decision = evaluate_auto_approval(&low_risk(), &blocked, &settings, now);
        assert_eq!(decision.failed, vec![ApprovalGate::StudentBlocked]);
    }

    #[test]
    fn threshold_is_inclusive() {
        let student = StudentBehavioralStatus::new("s-1", 80);
        let decision = evaluate_auto_approval(&low_risk(), &student, &Settings::default(), Utc::now());
        assert!(decision.automatic);
    }

    #[test]
    fn pending_loan_times_out_after_approval_window() {
        let settings = Settings::default();
        let requested = Utc::now();
        let loan = loan(LoanStatus::Pending, requested);
        let deadline = requested + Duration::minutes(1440);
        assert_eq!(effective_status(&loan, &settings, deadline), LoanStatus::Pending);
        assert_eq!(
            effective_status(&loan, &settings, deadline + Duration::seconds(1)),
            LoanStatus::Rejected
        );
    }

    #[test]
    fn approved_and_active_loans_follow_their_deadlines() {
        let settings = Settings::default();
        let now = Utc::now();

        let mut approved = loan(LoanStatus::Approved, now);
        approved.pickup_deadline = Some(now + Duration::minutes(60));
        assert_eq!(effective_status(&approved, &settings, now + Duration::minutes(61)), LoanStatus::Expired);

        let mut active = loan(LoanStatus::Active, now);
        active.due_date = Some(now + Duration::days(7));
        assert_eq!(effective_status(&active, &settings, now + Duration::days(6)), LoanStatus::Active);
        assert_eq!(effective_status(&active, &settings, now + Duration::days(8)), LoanStatus::Overdue);

        let returned = loan(LoanStatus::Returned, now);
        assert!(due_transition(&returned, &settings).is_none());
    }

    #[test]
    fn transition_rejects_edges_outside_the_machine() {
        let now = Utc::now();
        let mut pending = loan(LoanStatus::Pending, now);
        let error = transition(&mut pending, LoanStatus::Active, "admin", now, None).unwrap_err();
        assert!(matches!(error, StateConflict::InvalidLoanTransition { from: LoanStatus::Pending, .. }));
        assert_eq!(pending.status, LoanStatus::Pending);

        let record = transition(&mut pending, LoanStatus::Approved, "admin", now, None).unwrap();
        assert_eq!(record.from, Some(LoanStatus::Pending));
        assert_eq!(record.to, LoanStatus::Approved);
        assert_eq!(pending.status, LoanStatus::Approved);
    }

    #[test]
    fn due_date_uses_category_or_default() {
        let settings = Settings::default();
        let now = Utc::now();
        let mut category = low_risk();
        assert_eq!(due_date_for(&category, &settings, now), now + Duration::days(7));
        category.max_loan_days = Some(3);
        assert_eq!(due_date_for(&category, &settings, now), now + Duration::days(3));
    }

    #[test]
    fn wellness_hours_are_capped_at_loan_length() {
        let settings = Settings::default();
        let now = Utc::now();
        let mut category = low_risk();
        category.base_wellness_hours = 1.0;
        category.hourly_factor = 0.5;
        category.max_loan_days = Some(1);

        assert_eq!(wellness_hours(&category, &settings, now, now + Duration::hours(4)), 3.0);
        assert_eq!(wellness_hours(&category, &settings, now, now + Duration::hours(30)), 13.0);
    }
}
