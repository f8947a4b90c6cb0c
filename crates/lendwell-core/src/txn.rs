// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Unit of work for one engine operation.
//!
//! A [`Txn`] reads through its own staged writes, so later steps of an
//! operation see earlier ones (a returned loan frees the resource the queue
//! promotion then reserves).  Nothing reaches storage until the engine
//! commits the finished batch; events are only published after that commit.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::engine::SweepReport;
use crate::error::{LendingError, LendingResult, PolicyViolation};
use crate::events::{DomainEvent, EntityType, EventKind};
use crate::lifecycle::{self, fired_transition, APPROVAL_TIMEOUT_NOTE, SYSTEM_ACTOR};
use crate::queue::ResourceQueue;
use crate::settings::Settings;
use crate::storage::{Storage, WriteBatch};
use crate::trust::{lift_elapsed_block, TrustEngine, TrustEvent, TrustUpdate};
use crate::types::{
    DamageRecord, DecisionSource, Loan, LoanStatus, QueueEntry, Resource, ResourceCategory,
    ResourceStatus, StudentBehavioralStatus, TransitionRecord,
};

pub(crate) struct Txn<'a, S: Storage> {
    storage: &'a S,
    trust: &'a TrustEngine,
    pub(crate) settings: &'a Settings,
    pub(crate) now: DateTime<Utc>,
    pub(crate) report: SweepReport,
    batch: WriteBatch,
    events: Vec<DomainEvent>,
}

impl<'a, S: Storage> Txn<'a, S> {
    pub(crate) fn new(
        storage: &'a S,
        trust: &'a TrustEngine,
        settings: &'a Settings,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            storage,
            trust,
            settings,
            now,
            report: SweepReport::default(),
            batch: WriteBatch::new(),
            events: Vec::new(),
        }
    }

    pub(crate) fn finish(self) -> (WriteBatch, Vec<DomainEvent>) {
        (self.batch, self.events)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub(crate) fn resource(&self, id: &str) -> LendingResult<Resource> {
        if let Some(staged) = self.batch.staged_resource(id) {
            return Ok(staged.clone());
        }
        self.storage.resource(id)?.ok_or_else(|| LendingError::not_found("resource", id))
    }

    pub(crate) fn category(&self, id: &str) -> LendingResult<ResourceCategory> {
        if let Some(staged) = self.batch.categories().iter().find(|c| c.id == id) {
            return Ok(staged.clone());
        }
        self.storage.category(id)?.ok_or_else(|| LendingError::not_found("category", id))
    }

    pub(crate) fn loan(&self, id: &str) -> LendingResult<Loan> {
        if let Some(staged) = self.batch.staged_loan(id) {
            return Ok(staged.clone());
        }
        self.storage.loan(id)?.ok_or_else(|| LendingError::not_found("loan", id))
    }

    pub(crate) fn loans_for_resource(&self, resource_id: &str) -> LendingResult<Vec<Loan>> {
        let stored = self.storage.loans_for_resource(resource_id)?;
        Ok(merge(stored, self.batch.loans(), |l| l.id.as_str(), |l| l.resource_id == resource_id))
    }

    pub(crate) fn loans_for_student(&self, user_id: &str) -> LendingResult<Vec<Loan>> {
        let stored = self.storage.loans_for_student(user_id)?;
        Ok(merge(stored, self.batch.loans(), |l| l.id.as_str(), |l| l.user_id == user_id))
    }

    pub(crate) fn queue(&self, resource_id: &str) -> LendingResult<ResourceQueue> {
        let stored = self.storage.queue_for_resource(resource_id)?;
        let entries = merge(
            stored,
            self.batch.staged_queue(),
            |e| e.id.as_str(),
            |e| e.resource_id == resource_id,
        );
        Ok(ResourceQueue::new(resource_id, entries))
    }

    pub(crate) fn queue_entry(&self, id: &str) -> LendingResult<QueueEntry> {
        if let Some(staged) = self.batch.staged_queue().iter().find(|e| e.id == id) {
            return Ok(staged.clone());
        }
        self.storage.queue_entry(id)?.ok_or_else(|| LendingError::not_found("queue entry", id))
    }

    pub(crate) fn damage(&self, id: &str) -> LendingResult<DamageRecord> {
        if let Some(staged) = self.batch.damages().iter().find(|d| d.id == id) {
            return Ok(staged.clone());
        }
        self.storage.damage(id)?.ok_or_else(|| LendingError::not_found("damage record", id))
    }

    /// The student's status, created with the default score on first use.
    /// An elapsed block is cleared so the next write persists the lift.
    pub(crate) fn student(&self, user_id: &str) -> LendingResult<StudentBehavioralStatus> {
        let mut status = match self.batch.students().iter().find(|s| s.user_id == user_id) {
            Some(staged) => staged.clone(),
            None => self.storage.student(user_id)?.unwrap_or_else(|| {
                StudentBehavioralStatus::new(user_id, self.settings.default_trust_score)
            }),
        };
        lift_elapsed_block(&mut status, self.now);
        Ok(status)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    pub(crate) fn put_resource(&mut self, resource: Resource) {
        self.batch.put_resource(resource);
    }

    pub(crate) fn put_category(&mut self, category: ResourceCategory) {
        self.batch.put_category(category);
    }

    pub(crate) fn put_loan(&mut self, loan: Loan) {
        self.batch.put_loan(loan);
    }

    pub(crate) fn put_queue(&mut self, queue: ResourceQueue) {
        for entry in queue.into_changes() {
            self.batch.put_queue_entry(entry);
        }
    }

    pub(crate) fn put_student(&mut self, status: StudentBehavioralStatus) {
        self.batch.put_student(status);
    }

    pub(crate) fn put_damage(&mut self, damage: DamageRecord) {
        self.batch.put_damage(damage);
    }

    pub(crate) fn record(&mut self, transition: TransitionRecord) {
        self.batch.append_transition(transition);
    }

    pub(crate) fn emit(&mut self, event: DomainEvent) {
        self.events.push(event);
    }

    pub(crate) fn emit_for_loan(&mut self, kind: EventKind, loan: &Loan, message: String) {
        let event = DomainEvent::new(kind, EntityType::Loan, &loan.id, &loan.user_id, message, self.now);
        self.emit(event);
    }

    // ------------------------------------------------------------------
    // Time-driven transitions
    // ------------------------------------------------------------------

    /// Materialize every due transition touching `resource_id` and return the
    /// resource as it stands afterwards.
    pub(crate) fn settle_resource(&mut self, resource_id: &str) -> LendingResult<Resource> {
        for loan in self.loans_for_resource(resource_id)? {
            if loan.status.is_open() {
                self.settle_loan(loan)?;
            }
        }

        let mut queue = self.queue(resource_id)?;
        let lapsed = queue.lapse_expired(self.now);
        self.put_queue(queue);
        if let Some(entry) = lapsed {
            self.report.lapsed_queue_entries += 1;
            tracing::info!(
                entry_id = %entry.id,
                resource_id,
                user_id = %entry.user_id,
                "queue response window lapsed"
            );
            self.release_resource(resource_id)?;
        }

        self.resource(resource_id)
    }

    /// Apply the time-driven transition of `loan` if its deadline passed.
    pub(crate) fn settle_loan(&mut self, mut loan: Loan) -> LendingResult<Loan> {
        let due = match fired_transition(&loan, self.settings, self.now) {
            Some(due) => due,
            None => return Ok(loan),
        };
        let note = format!("deadline {} passed", due.deadline.to_rfc3339());
        let record = lifecycle::transition(&mut loan, due.to, SYSTEM_ACTOR, self.now, Some(note))?;
        self.record(record);

        match due.to {
            LoanStatus::Rejected => {
                loan.decision_source = DecisionSource::Automatic;
                loan.admin_notes = Some(APPROVAL_TIMEOUT_NOTE.to_owned());
                self.report.expired_approvals += 1;
                self.emit_for_loan(
                    EventKind::LoanRejected,
                    &loan,
                    "Your request was not reviewed in time and has been closed.".into(),
                );
                self.put_loan(loan.clone());
                self.release_resource(&loan.resource_id)?;
            }
            LoanStatus::Expired => {
                self.report.expired_pickups += 1;
                self.emit_for_loan(
                    EventKind::PickupExpired,
                    &loan,
                    "The resource was not picked up before the deadline.".into(),
                );
                self.put_loan(loan.clone());
                self.release_resource(&loan.resource_id)?;
            }
            LoanStatus::Overdue => {
                self.report.overdue += 1;
                if self.settings.notify_on_overdue {
                    let message = format!("Please return the resource; it was due {}.", due.deadline.to_rfc3339());
                    self.emit_for_loan(EventKind::LoanOverdue, &loan, message);
                }
                self.put_loan(loan.clone());
            }
            _ => self.put_loan(loan.clone()),
        }
        Ok(loan)
    }

    // ------------------------------------------------------------------
    // Shared side effects
    // ------------------------------------------------------------------

    /// Hand a freed resource to the next waiter, or put it back on the shelf.
    ///
    /// Does nothing while an open loan still holds the resource or when the
    /// resource is out of circulation.
    pub(crate) fn release_resource(&mut self, resource_id: &str) -> LendingResult<()> {
        let mut resource = self.resource(resource_id)?;
        if matches!(resource.status, ResourceStatus::Maintenance | ResourceStatus::Retired) {
            return Ok(());
        }
        if self.loans_for_resource(resource_id)?.iter().any(|loan| loan.status.is_open()) {
            return Ok(());
        }

        let mut queue = self.queue(resource_id)?;
        let held = match queue.promote_next(self.settings, self.now) {
            Some(entry) => {
                let message = match entry.respond_by {
                    Some(deadline) => format!(
                        "Resource '{}' is ready for you. Confirm before {}.",
                        resource.name,
                        deadline.to_rfc3339()
                    ),
                    None => format!("Resource '{}' is ready for you.", resource.name),
                };
                let event = DomainEvent::new(
                    EventKind::QueueSlotAvailable,
                    EntityType::QueueEntry,
                    &entry.id,
                    &entry.user_id,
                    message,
                    self.now,
                );
                self.emit(event);
                tracing::info!(entry_id = %entry.id, resource_id, user_id = %entry.user_id, "queue entry promoted");
                true
            }
            None => queue.notified().is_some(),
        };
        self.put_queue(queue);

        resource.status = if held { ResourceStatus::Reserved } else { ResourceStatus::Available };
        self.put_resource(resource);
        Ok(())
    }

    /// Blocked students and students at their loan limit may not borrow.
    pub(crate) fn check_borrower(&self, user_id: &str) -> LendingResult<StudentBehavioralStatus> {
        let student = self.student(user_id)?;
        if student.is_blocked_at(self.now) {
            return Err(PolicyViolation::StudentBlocked {
                user_id: user_id.to_owned(),
                until: student.blocked_until,
                reason: student.blocked_reason.clone().unwrap_or_else(|| "blocked".into()),
            }
            .into());
        }

        let active = self
            .loans_for_student(user_id)?
            .iter()
            .filter(|loan| lifecycle::effective_status(loan, self.settings, self.now).is_open())
            .count() as u32;
        if active >= self.settings.max_active_loans {
            return Err(PolicyViolation::LoanLimitReached {
                user_id: user_id.to_owned(),
                active,
                limit: self.settings.max_active_loans,
            }
            .into());
        }
        Ok(student)
    }

    /// Create a loan on `resource` and reserve it.  Auto-approves when every
    /// gate passes; otherwise the loan waits for review.
    pub(crate) fn open_loan(
        &mut self,
        mut resource: Resource,
        category: &ResourceCategory,
        student: &StudentBehavioralStatus,
        queue_entry_id: Option<String>,
    ) -> LendingResult<Loan> {
        let mut loan = Loan {
            id: Uuid::new_v4().to_string(),
            resource_id: resource.id.clone(),
            user_id: student.user_id.clone(),
            status: LoanStatus::Pending,
            decision_source: DecisionSource::Human,
            requested_at: self.now,
            approved_at: None,
            delivered_at: None,
            due_date: None,
            returned_at: None,
            pickup_deadline: None,
            trust_score_at_request: student.trust_score,
            admin_notes: None,
            damage_notes: None,
            wellness_hours_awarded: 0.0,
            penalty_hours: 0,
            queue_entry_id,
            version: 0,
        };
        self.record(lifecycle::creation_record(&loan, &student.user_id));

        let decision = lifecycle::evaluate_auto_approval(category, student, self.settings, self.now);
        tracing::debug!(
            loan_id = %loan.id,
            resource_id = %resource.id,
            user_id = %student.user_id,
            trust_score = decision.trust_score,
            automatic = decision.automatic,
            failed = ?decision.failed,
            "auto-approval evaluated"
        );

        if decision.automatic {
            let record = lifecycle::transition(
                &mut loan,
                LoanStatus::Approved,
                SYSTEM_ACTOR,
                self.now,
                Some("auto-approved".into()),
            )?;
            self.record(record);
            self.mark_approved(&mut loan, DecisionSource::Automatic);
        } else {
            self.emit_for_loan(
                EventKind::LoanRequested,
                &loan,
                format!("Request for '{}' is waiting for review.", resource.name),
            );
        }

        resource.status = ResourceStatus::Reserved;
        self.put_resource(resource);
        self.put_loan(loan.clone());
        // The loan limit was checked against this student's loans; writing
        // the status back at its read version makes a racing request conflict.
        let borrower = self.student(&student.user_id)?;
        self.put_student(borrower);
        Ok(loan)
    }

    /// Stamp approval fields and start the pickup window.
    pub(crate) fn mark_approved(&mut self, loan: &mut Loan, source: DecisionSource) {
        loan.approved_at = Some(self.now);
        loan.decision_source = source;
        let deadline = self.now + self.settings.pickup_timeout();
        loan.pickup_deadline = Some(deadline);
        if self.settings.notify_on_approval {
            self.emit_for_loan(
                EventKind::LoanApproved,
                loan,
                format!("Your loan is approved. Pick it up before {}.", deadline.to_rfc3339()),
            );
        }
    }

    /// Run `event` through the trust engine and stage the new status.
    pub(crate) fn apply_trust(&mut self, user_id: &str, event: TrustEvent) -> LendingResult<TrustUpdate> {
        let mut student = self.student(user_id)?;
        let update = self.trust.record(&mut student, event, self.settings, self.now);

        if update.delta() < 0 {
            self.emit(DomainEvent::new(
                EventKind::StudentSanctioned,
                EntityType::Student,
                user_id,
                user_id,
                format!("Trust score lowered from {} to {}.", update.previous_score, update.new_score),
                self.now,
            ));
        }
        if let Some(reason) = &update.blocked {
            self.emit(blocked_event(&student, reason, self.now));
        }
        self.put_student(student);
        Ok(update)
    }
}

pub(crate) fn blocked_event(
    student: &StudentBehavioralStatus,
    reason: &str,
    now: DateTime<Utc>,
) -> DomainEvent {
    let message = match student.blocked_until {
        Some(until) => format!("Borrowing blocked until {}: {}.", until.to_rfc3339(), reason),
        None => format!("Borrowing blocked: {reason}."),
    };
    DomainEvent::new(
        EventKind::StudentBlocked,
        EntityType::Student,
        &student.user_id,
        &student.user_id,
        message,
        now,
    )
}

/// Overlay staged copies on stored rows and append staged rows that belong
/// to the same query.
fn merge<T: Clone>(
    stored: Vec<T>,
    staged: &[T],
    key: impl Fn(&T) -> &str,
    belongs: impl Fn(&T) -> bool,
) -> Vec<T> {
    let mut merged: Vec<T> = stored
        .into_iter()
        .map(|row| staged.iter().find(|s| key(s) == key(&row)).cloned().unwrap_or(row))
        .collect();
    for row in staged {
        if belongs(row) && !merged.iter().any(|m| key(m) == key(row)) {
            merged.push(row.clone());
        }
    }
    merged
}
