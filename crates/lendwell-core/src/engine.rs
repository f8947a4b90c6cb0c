// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Lending engine: the top-level composition of all lending components.
//!
//! [`LendingEngine`] owns one [`Storage`] backend and composes the settings
//! store, clock, trust engine, damage adjudicator and event sink.  Every
//! public operation takes `&self`; the engine can be shared behind an `Arc`.
//!
//! ## Operation pipeline
//!
//! 1. **Snapshot** the settings and read the clock once.
//! 2. **Settle** the affected resource: write any time-driven transition that
//!    is already due (pickup expiry, approval expiry, overdue, lapsed queue
//!    window) together with its side effects.
//! 3. **Evaluate** preconditions and stage the operation's writes.
//! 4. **Commit** the whole batch atomically with per-record version checks.
//!    On a version conflict the pipeline restarts once from step 1; a second
//!    conflict surfaces as [`StateConflict::ConcurrentModification`].
//! 5. **Publish** the staged events.  Delivery failures are logged and
//!    dropped.
//!
//! Reads never write.  They report each loan's *effective* status: a loan
//! whose deadline passed is reported as expired / rejected / overdue even
//! before the transition is written.  [`LendingEngine::sweep`] writes all
//! due transitions for deployments that run a periodic job.
//!
//! [`StateConflict::ConcurrentModification`]: crate::error::StateConflict::ConcurrentModification

use std::ops::AddAssign;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::adjudicator::{calculate_fine, DamageAdjudicator};
use crate::audit::{AuditTrail, AuditViolation};
use crate::clock::{Clock, SystemClock};
use crate::error::{LendingError, LendingResult, PolicyViolation, StateConflict, StorageError};
use crate::events::{DomainEvent, EntityType, EventKind, EventSink, NullSink};
use crate::lifecycle::{self, effective_status, fired_transition, ApprovalDecision};
use crate::queue::ResourceQueue;
use crate::settings::SettingsStore;
use crate::storage::Storage;
use crate::trust::{ScoringFunction, TrustEngine, TrustEvent};
use crate::txn::{blocked_event, Txn};
use crate::types::{
    DamageRecord, DamageStatus, DamageType, DecisionSource, Incident, Loan, LoanStatus, QueueEntry,
    QueueStatus, RequestOutcome, Resource, ResourceCategory, ResourceStatus, Severity,
    StudentBehavioralStatus, TransitionFilter, TransitionRecord,
};

// ---------------------------------------------------------------------------
// SweepReport
// ---------------------------------------------------------------------------

/// Counts of time-driven transitions written by one operation or sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_approvals: u32,
    pub expired_pickups: u32,
    pub overdue: u32,
    pub lapsed_queue_entries: u32,
    /// Resources whose settlement failed and will be retried next sweep.
    pub failed: u32,
}

impl SweepReport {
    pub fn total(&self) -> u32 {
        self.expired_approvals + self.expired_pickups + self.overdue + self.lapsed_queue_entries
    }
}

impl AddAssign for SweepReport {
    fn add_assign(&mut self, other: Self) {
        self.expired_approvals += other.expired_approvals;
        self.expired_pickups += other.expired_pickups;
        self.overdue += other.overdue;
        self.lapsed_queue_entries += other.lapsed_queue_entries;
        self.failed += other.failed;
    }
}

// ---------------------------------------------------------------------------
// LendingEngine
// ---------------------------------------------------------------------------

/// Loan lifecycle, trust, queue and damage operations over one storage
/// backend.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use lendwell_core::{
///     engine::LendingEngine,
///     settings::SettingsStore,
///     storage::InMemoryStorage,
///     types::{LoanStatus, Resource, ResourceCategory},
/// };
///
/// let engine = LendingEngine::new(InMemoryStorage::new(), Arc::new(SettingsStore::default()));
///
/// let mut mats = ResourceCategory::new("mats", "Yoga mats");
/// mats.is_low_risk = true;
/// mats.requires_approval = false;
/// engine.register_category("admin", mats).unwrap();
/// engine.register_resource("admin", Resource::new("mat-1", "Blue mat", "mats")).unwrap();
///
/// let outcome = engine.request_loan("student-1", "mat-1").unwrap();
/// assert_eq!(outcome.status(), LoanStatus::Approved);
/// ```
pub struct LendingEngine<S: Storage> {
    storage: S,
    settings: Arc<SettingsStore>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    trust: TrustEngine,
    adjudicator: DamageAdjudicator,
}

impl<S: Storage> LendingEngine<S> {
    /// Construct an engine with the system clock, default scoring and no
    /// event delivery.
    pub fn new(storage: S, settings: Arc<SettingsStore>) -> Self {
        Self {
            storage,
            settings,
            clock: Arc::new(SystemClock),
            events: Arc::new(NullSink),
            trust: TrustEngine::default(),
            adjudicator: DamageAdjudicator,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    pub fn with_scoring(mut self, scoring: Box<dyn ScoringFunction>) -> Self {
        self.trust = TrustEngine::new(scoring);
        self
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    // -----------------------------------------------------------------------
    // Catalog
    // -----------------------------------------------------------------------

    /// Create or replace a resource category.
    pub fn register_category(&self, actor: &str, category: ResourceCategory) -> LendingResult<ResourceCategory> {
        validate_category(&category)?;
        self.run("register_category", |tx| {
            let mut category = category.clone();
            category.version = tx.category(&category.id).map(|stored| stored.version).unwrap_or(0);
            tracing::info!(category_id = %category.id, actor, "category registered");
            tx.put_category(category.clone());
            Ok(category)
        })
    }

    /// Add a new resource to the catalog.
    pub fn register_resource(&self, actor: &str, resource: Resource) -> LendingResult<Resource> {
        if resource.id.trim().is_empty() || resource.name.trim().is_empty() {
            return Err(LendingError::validation("resource id and name are required"));
        }
        if matches!(resource.status, ResourceStatus::Borrowed | ResourceStatus::Reserved) {
            return Err(LendingError::validation(
                "new resources must be available, in maintenance or retired",
            ));
        }
        self.run("register_resource", |tx| {
            tx.category(&resource.category_id)?;
            if tx.resource(&resource.id).is_ok() {
                return Err(LendingError::validation(format!(
                    "resource '{}' is already registered",
                    resource.id
                )));
            }
            let mut resource = resource.clone();
            resource.version = 0;
            tracing::info!(resource_id = %resource.id, actor, "resource registered");
            tx.put_resource(resource.clone());
            Ok(resource)
        })
    }

    /// Administrative status change (maintenance, retirement, back to shelf).
    ///
    /// `borrowed` and `reserved` belong to the loan workflow and are refused,
    /// as is any change while an open loan or notified waiter holds the
    /// resource.  Making a resource available promotes its waitlist;
    /// retiring it closes the waitlist.
    pub fn set_resource_status(
        &self,
        actor: &str,
        resource_id: &str,
        status: ResourceStatus,
    ) -> LendingResult<Resource> {
        if matches!(status, ResourceStatus::Borrowed | ResourceStatus::Reserved) {
            return Err(LendingError::validation(format!(
                "resource status '{}' is managed by the loan workflow",
                status.as_str()
            )));
        }
        self.run("set_resource_status", |tx| {
            let mut resource = tx.settle_resource(resource_id)?;
            if let Some(loan) = tx.loans_for_resource(resource_id)?.into_iter().find(|l| l.status.is_open()) {
                return Err(StateConflict::ResourceInUse {
                    resource_id: resource_id.to_owned(),
                    status: resource.status,
                    holder: loan.id,
                }
                .into());
            }
            let mut queue = tx.queue(resource_id)?;
            if let Some(entry) = queue.notified() {
                return Err(StateConflict::ResourceInUse {
                    resource_id: resource_id.to_owned(),
                    status: resource.status,
                    holder: entry.id.clone(),
                }
                .into());
            }
            if resource.status == status {
                return Ok(resource);
            }

            tracing::info!(
                resource_id,
                from = resource.status.as_str(),
                to = status.as_str(),
                actor,
                "resource status changed"
            );
            resource.status = status;
            tx.put_resource(resource);
            match status {
                ResourceStatus::Available => tx.release_resource(resource_id)?,
                ResourceStatus::Retired => {
                    queue.close_all();
                    tx.put_queue(queue);
                }
                _ => {}
            }
            tx.resource(resource_id)
        })
    }

    // -----------------------------------------------------------------------
    // Loan lifecycle
    // -----------------------------------------------------------------------

    /// File a loan request.
    ///
    /// Available resources produce a loan, auto-approved when every gate
    /// passes and `pending` otherwise.  Unavailable resources put the
    /// student in the waitlist when queueing is enabled.  A student holding
    /// the resource's notified queue slot gets the slot converted.
    pub fn request_loan(&self, user_id: &str, resource_id: &str) -> LendingResult<RequestOutcome> {
        require_id("user id", user_id)?;
        self.run("request_loan", |tx| {
            let resource = tx.settle_resource(resource_id)?;
            let student = tx.check_borrower(user_id)?;
            let category = tx.category(&resource.category_id)?;

            let mut queue = tx.queue(resource_id)?;
            let own_slot = queue.notified().filter(|e| e.user_id == user_id).map(|e| e.id.clone());
            if let Some(entry_id) = own_slot {
                queue.convert(&entry_id, user_id)?;
                tx.put_queue(queue);
                let loan = tx.open_loan(resource, &category, &student, Some(entry_id))?;
                return Ok(RequestOutcome::Loan(loan));
            }

            if resource.status == ResourceStatus::Available {
                let loan = tx.open_loan(resource, &category, &student, None)?;
                return Ok(RequestOutcome::Loan(loan));
            }

            if resource.status == ResourceStatus::Retired || !tx.settings.allow_queue_for_unavailable {
                return Err(PolicyViolation::ResourceUnavailable {
                    resource_id: resource_id.to_owned(),
                    status: resource.status.as_str(),
                }
                .into());
            }
            let held = tx.loans_for_resource(resource_id)?.into_iter().find(|loan| {
                loan.user_id == user_id && effective_status(loan, tx.settings, tx.now).is_open()
            });
            if let Some(loan) = held {
                return Err(PolicyViolation::AlreadyHolding {
                    user_id: user_id.to_owned(),
                    resource_id: resource_id.to_owned(),
                    loan_id: loan.id,
                }
                .into());
            }

            let entry = queue.enqueue(Uuid::new_v4().to_string(), user_id, tx.settings, tx.now)?;
            tracing::info!(
                entry_id = %entry.id,
                resource_id,
                user_id,
                position = entry.position,
                "request queued"
            );
            // Rewriting the resource at its read version serializes enqueues.
            tx.put_resource(resource);
            tx.put_queue(queue);
            Ok(RequestOutcome::Queued(entry))
        })
    }

    /// Human approval of a pending request.
    pub fn approve_loan(&self, admin: &str, loan_id: &str, note: Option<&str>) -> LendingResult<Loan> {
        self.run("approve_loan", |tx| {
            let loan = tx.loan(loan_id)?;
            let mut loan = tx.settle_loan(loan)?;
            let note = note.map(str::to_owned);
            let record = lifecycle::transition(&mut loan, LoanStatus::Approved, admin, tx.now, note.clone())?;
            tx.record(record);
            tx.mark_approved(&mut loan, DecisionSource::Human);
            if note.is_some() {
                loan.admin_notes = note;
            }
            tx.put_loan(loan.clone());
            Ok(loan)
        })
    }

    /// Human rejection of a pending request.  No trust penalty.
    pub fn reject_loan(&self, admin: &str, loan_id: &str, reason: &str) -> LendingResult<Loan> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(LendingError::validation("a rejection reason is required"));
        }
        self.run("reject_loan", |tx| {
            let loan = tx.loan(loan_id)?;
            let mut loan = tx.settle_loan(loan)?;
            let record =
                lifecycle::transition(&mut loan, LoanStatus::Rejected, admin, tx.now, Some(reason.to_owned()))?;
            tx.record(record);
            loan.decision_source = DecisionSource::Human;
            loan.admin_notes = Some(reason.to_owned());
            tx.emit_for_loan(EventKind::LoanRejected, &loan, reason.to_owned());
            tx.put_loan(loan.clone());
            tx.release_resource(&loan.resource_id)?;
            Ok(loan)
        })
    }

    /// Hand the resource to the student; the loan becomes `active`.
    pub fn record_pickup(&self, actor: &str, loan_id: &str) -> LendingResult<Loan> {
        self.run("record_pickup", |tx| {
            let loan = tx.loan(loan_id)?;
            let mut loan = tx.settle_loan(loan)?;
            let record = lifecycle::transition(&mut loan, LoanStatus::Active, actor, tx.now, None)?;
            tx.record(record);

            let mut resource = tx.resource(&loan.resource_id)?;
            let category = tx.category(&resource.category_id)?;
            loan.delivered_at = Some(tx.now);
            loan.due_date = Some(lifecycle::due_date_for(&category, tx.settings, tx.now));
            resource.status = ResourceStatus::Borrowed;

            let mut student = tx.student(&loan.user_id)?;
            self.trust.record_pickup(&mut student);

            tx.put_student(student);
            tx.put_resource(resource);
            tx.put_loan(loan.clone());
            Ok(loan)
        })
    }

    /// Take the resource back.  On-time returns earn wellness hours and a
    /// trust bonus; late returns cost penalty hours, trust, and may block.
    pub fn return_loan(&self, actor: &str, loan_id: &str) -> LendingResult<Loan> {
        self.run("return_loan", |tx| {
            let loan = tx.loan(loan_id)?;
            let mut loan = tx.settle_loan(loan)?;
            let record = lifecycle::transition(&mut loan, LoanStatus::Returned, actor, tx.now, None)?;
            tx.record(record);
            loan.returned_at = Some(tx.now);

            let late = loan.due_date.map_or(false, |due| tx.now > due);
            let message = if late {
                loan.penalty_hours = tx.settings.late_return_penalty_hours;
                tx.apply_trust(&loan.user_id, TrustEvent::LateReturn)?;
                format!("Returned late; {} penalty hours recorded.", loan.penalty_hours)
            } else {
                let resource = tx.resource(&loan.resource_id)?;
                let category = tx.category(&resource.category_id)?;
                let delivered_at = loan.delivered_at.unwrap_or(loan.requested_at);
                loan.wellness_hours_awarded =
                    lifecycle::wellness_hours(&category, tx.settings, delivered_at, tx.now);
                tx.apply_trust(&loan.user_id, TrustEvent::OnTimeReturn)?;
                format!("Returned on time; {} wellness hours earned.", loan.wellness_hours_awarded)
            };

            tx.emit_for_loan(EventKind::LoanReturned, &loan, message);
            tx.put_loan(loan.clone());
            tx.release_resource(&loan.resource_id)?;
            Ok(loan)
        })
    }

    // -----------------------------------------------------------------------
    // Damage and loss
    // -----------------------------------------------------------------------

    /// Record a damage, loss or theft incident on an `active` or `overdue`
    /// loan, or escalate a `damaged` loan to `lost`.
    ///
    /// Damage sends the resource to maintenance; loss retires it and closes
    /// its waitlist.  The fine is computed once and stored on the record.
    pub fn report_damage(&self, admin: &str, loan_id: &str, incident: Incident) -> LendingResult<DamageRecord> {
        self.adjudicator.validate(&incident)?;
        self.run("report_damage", |tx| {
            let loan = tx.loan(loan_id)?;
            let mut loan = tx.settle_loan(loan)?;
            let target = if incident.is_loss() { LoanStatus::Lost } else { LoanStatus::Damaged };
            let description = incident.description.trim().to_owned();
            let record = lifecycle::transition(&mut loan, target, admin, tx.now, Some(description.clone()))?;
            tx.record(record);

            let mut resource = tx.resource(&loan.resource_id)?;
            let category = tx.category(&resource.category_id)?;
            let damage = self.adjudicator.assess(&loan, &category, &incident, admin, tx.now)?;

            loan.damage_notes = Some(match loan.damage_notes.take() {
                Some(previous) => format!("{previous}\n{description}"),
                None => description,
            });
            if target == LoanStatus::Damaged && loan.returned_at.is_none() {
                loan.returned_at = Some(tx.now);
            }

            if target == LoanStatus::Lost {
                resource.status = ResourceStatus::Retired;
                let mut queue = tx.queue(&resource.id)?;
                queue.close_all();
                tx.put_queue(queue);
            } else {
                resource.status = ResourceStatus::Maintenance;
            }

            tx.apply_trust(&loan.user_id, self.adjudicator.trust_event(&incident))?;
            tx.emit(DomainEvent::new(
                EventKind::DamageReported,
                EntityType::Damage,
                &damage.id,
                &loan.user_id,
                format!(
                    "{} reported on '{}'; fine {}.",
                    damage_label(damage.damage_type, damage.severity),
                    resource.name,
                    damage.fine_amount
                ),
                tx.now,
            ));
            tracing::info!(
                damage_id = %damage.id,
                loan_id,
                fine = %damage.fine_amount,
                "damage recorded"
            );

            tx.put_resource(resource);
            tx.put_loan(loan);
            tx.put_damage(damage.clone());
            Ok(damage)
        })
    }

    /// Move a damage record through review.
    pub fn review_damage(&self, admin: &str, damage_id: &str, status: DamageStatus) -> LendingResult<DamageRecord> {
        self.run("review_damage", |tx| {
            let mut damage = tx.damage(damage_id)?;
            self.adjudicator.review(&mut damage, status, admin)?;
            tx.put_damage(damage.clone());
            Ok(damage)
        })
    }

    /// Quote the fine an incident on `resource_id` would carry.  Writes
    /// nothing.
    pub fn quote_fine(
        &self,
        resource_id: &str,
        damage_type: DamageType,
        severity: Severity,
        estimated_cost: Option<Decimal>,
    ) -> LendingResult<Decimal> {
        let resource = self
            .storage
            .resource(resource_id)?
            .ok_or_else(|| LendingError::not_found("resource", resource_id))?;
        let category = self
            .storage
            .category(&resource.category_id)?
            .ok_or_else(|| LendingError::not_found("category", &resource.category_id))?;
        Ok(calculate_fine(damage_type, severity, &category, estimated_cost))
    }

    pub fn damages_for_loan(&self, loan_id: &str) -> LendingResult<Vec<DamageRecord>> {
        Ok(self.storage.damages_for_loan(loan_id)?)
    }

    // -----------------------------------------------------------------------
    // Queue
    // -----------------------------------------------------------------------

    /// Turn a notified queue slot into a loan request.
    ///
    /// The resource is already reserved for the slot, so availability is not
    /// re-checked; the borrower preconditions are.
    pub fn convert_queue_entry(&self, user_id: &str, entry_id: &str) -> LendingResult<Loan> {
        self.run("convert_queue_entry", |tx| {
            let entry = tx.queue_entry(entry_id)?;
            let resource = tx.settle_resource(&entry.resource_id)?;
            let mut queue = tx.queue(&entry.resource_id)?;
            queue.convert(entry_id, user_id)?;
            let student = tx.check_borrower(user_id)?;
            let category = tx.category(&resource.category_id)?;
            tx.put_queue(queue);
            tx.open_loan(resource, &category, &student, Some(entry_id.to_owned()))
        })
    }

    /// Leave the waitlist.  Giving up a notified slot passes it on.
    pub fn leave_queue(&self, user_id: &str, entry_id: &str) -> LendingResult<QueueEntry> {
        self.run("leave_queue", |tx| {
            let entry = tx.queue_entry(entry_id)?;
            tx.settle_resource(&entry.resource_id)?;
            let mut queue = tx.queue(&entry.resource_id)?;
            let was_notified = queue.entry(entry_id).map_or(false, |e| e.status == QueueStatus::Notified);
            let left = queue.leave(entry_id, user_id)?;
            tx.put_queue(queue);
            if was_notified {
                tx.release_resource(&entry.resource_id)?;
            }
            tracing::info!(entry_id, resource_id = %entry.resource_id, user_id, "left queue");
            Ok(left)
        })
    }

    /// Entries still in line for `resource_id`: the notified one first, then
    /// waiters by position.  A notified entry whose window already closed is
    /// left out.
    pub fn queue(&self, resource_id: &str) -> LendingResult<Vec<QueueEntry>> {
        let entries = self.storage.queue_for_resource(resource_id)?;
        let mut queue = ResourceQueue::new(resource_id, entries);
        queue.lapse_expired(self.clock.now());
        Ok(queue.open_entries())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// A loan with its effective status.
    pub fn loan(&self, loan_id: &str) -> LendingResult<Loan> {
        let loan = self
            .storage
            .loan(loan_id)?
            .ok_or_else(|| LendingError::not_found("loan", loan_id))?;
        Ok(self.effective(loan))
    }

    /// All loans of a student, oldest first, with effective statuses.
    pub fn loans_for_student(&self, user_id: &str) -> LendingResult<Vec<Loan>> {
        let loans = self.storage.loans_for_student(user_id)?;
        Ok(loans.into_iter().map(|loan| self.effective(loan)).collect())
    }

    pub fn resource(&self, resource_id: &str) -> LendingResult<Resource> {
        self.storage
            .resource(resource_id)?
            .ok_or_else(|| LendingError::not_found("resource", resource_id))
    }

    /// Trust status of a student.  Students without history get the default
    /// score; elapsed blocks are reported as lifted.
    pub fn student_status(&self, user_id: &str) -> LendingResult<StudentBehavioralStatus> {
        let settings = self.settings.snapshot();
        let mut status = self
            .storage
            .student(user_id)?
            .unwrap_or_else(|| StudentBehavioralStatus::new(user_id, settings.default_trust_score));
        crate::trust::lift_elapsed_block(&mut status, self.clock.now());
        Ok(status)
    }

    /// What the auto-approval check would decide right now.  Writes nothing.
    pub fn preview_auto_approval(&self, user_id: &str, resource_id: &str) -> LendingResult<ApprovalDecision> {
        let settings = self.settings.snapshot();
        let resource = self.resource(resource_id)?;
        let category = self
            .storage
            .category(&resource.category_id)?
            .ok_or_else(|| LendingError::not_found("category", &resource.category_id))?;
        let student = self.student_status(user_id)?;
        Ok(lifecycle::evaluate_auto_approval(&category, &student, &settings, self.clock.now()))
    }

    /// Transition records matching `filter`, oldest first.
    pub fn history(&self, filter: &TransitionFilter) -> LendingResult<Vec<TransitionRecord>> {
        AuditTrail::new(&self.storage).query(filter)
    }

    /// Check a loan's trail against the state machine and its stored status.
    pub fn verify_history(&self, loan_id: &str) -> LendingResult<Result<Vec<TransitionRecord>, AuditViolation>> {
        AuditTrail::new(&self.storage).verify_loan(loan_id)
    }

    // -----------------------------------------------------------------------
    // Trust administration
    // -----------------------------------------------------------------------

    /// Block a student until `until` (`None`: until unblocked by hand).
    pub fn block_student(
        &self,
        admin: &str,
        user_id: &str,
        reason: &str,
        until: Option<DateTime<Utc>>,
    ) -> LendingResult<StudentBehavioralStatus> {
        require_id("user id", user_id)?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(LendingError::validation("a block reason is required"));
        }
        self.run("block_student", |tx| {
            if let Some(until) = until {
                if until <= tx.now {
                    return Err(LendingError::validation("block end must be in the future"));
                }
            }
            let mut student = tx.student(user_id)?;
            self.trust.block(&mut student, reason, until, tx.now);
            tracing::info!(user_id, admin, reason, "student blocked");
            tx.emit(blocked_event(&student, reason, tx.now));
            tx.put_student(student.clone());
            Ok(student)
        })
    }

    pub fn unblock_student(&self, admin: &str, user_id: &str) -> LendingResult<StudentBehavioralStatus> {
        self.run("unblock_student", |tx| {
            let mut student = tx.student(user_id)?;
            self.trust.unblock(&mut student);
            tracing::info!(user_id, admin, "student unblocked");
            tx.put_student(student.clone());
            Ok(student)
        })
    }

    /// Manual score correction, clamped to the trust range.
    pub fn adjust_trust_score(
        &self,
        admin: &str,
        user_id: &str,
        delta: i64,
    ) -> LendingResult<StudentBehavioralStatus> {
        require_id("user id", user_id)?;
        self.run("adjust_trust_score", |tx| {
            let mut student = tx.student(user_id)?;
            let previous = student.trust_score;
            let score = self.trust.adjust(&mut student, delta, tx.settings);
            tracing::info!(user_id, admin, previous, score, "trust score adjusted");
            if score < previous {
                tx.emit(DomainEvent::new(
                    EventKind::StudentSanctioned,
                    EntityType::Student,
                    user_id,
                    user_id,
                    format!("Trust score lowered from {previous} to {score} by an administrator."),
                    tx.now,
                ));
            }
            tx.put_student(student.clone());
            Ok(student)
        })
    }

    // -----------------------------------------------------------------------
    // Sweep
    // -----------------------------------------------------------------------

    /// Write every time-driven transition that is due.
    ///
    /// Each resource is settled in its own atomic batch; a failure on one
    /// resource is logged and counted in [`SweepReport::failed`] without
    /// stopping the sweep.
    pub fn sweep(&self) -> LendingResult<SweepReport> {
        let settings = self.settings.snapshot();
        let now = self.clock.now();

        let mut resource_ids: Vec<String> = self
            .storage
            .loans_with_status(&[LoanStatus::Pending, LoanStatus::Approved, LoanStatus::Active])?
            .into_iter()
            .filter(|loan| fired_transition(loan, &settings, now).is_some())
            .map(|loan| loan.resource_id)
            .collect();
        resource_ids.extend(
            self.storage
                .queue_entries_with_status(QueueStatus::Notified)?
                .into_iter()
                .filter(|entry| entry.respond_by.map_or(false, |deadline| now > deadline))
                .map(|entry| entry.resource_id),
        );
        resource_ids.sort();
        resource_ids.dedup();

        let mut report = SweepReport::default();
        for resource_id in &resource_ids {
            match self.run("sweep", |tx| {
                tx.settle_resource(resource_id)?;
                Ok(tx.report)
            }) {
                Ok(settled) => report += settled,
                Err(error) => {
                    tracing::warn!(resource_id = %resource_id, %error, "sweep failed for resource");
                    report.failed += 1;
                }
            }
        }
        tracing::debug!(resources = resource_ids.len(), transitions = report.total(), "sweep finished");
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Pipeline
    // -----------------------------------------------------------------------

    /// Run `work` against a fresh unit of work and commit its batch,
    /// restarting once on a version conflict.
    fn run<T>(
        &self,
        operation: &'static str,
        mut work: impl FnMut(&mut Txn<'_, S>) -> LendingResult<T>,
    ) -> LendingResult<T> {
        let mut retried = false;
        loop {
            let settings = self.settings.snapshot();
            let mut tx = Txn::new(&self.storage, &self.trust, &settings, self.clock.now());
            let value = work(&mut tx)?;
            let (batch, events) = tx.finish();

            if !batch.is_empty() {
                match self.storage.apply(batch) {
                    Ok(()) => {}
                    Err(StorageError::VersionConflict { entity, id, .. }) if !retried => {
                        tracing::warn!(operation, entity, id = %id, "concurrent modification, retrying");
                        retried = true;
                        continue;
                    }
                    Err(error) => {
                        tracing::warn!(operation, %error, "commit failed");
                        return Err(error.into());
                    }
                }
            }

            self.publish(events);
            return Ok(value);
        }
    }

    fn publish(&self, events: Vec<DomainEvent>) {
        for event in events {
            if let Err(error) = self.events.publish(&event) {
                tracing::warn!(
                    kind = event.kind.as_str(),
                    entity_id = %event.entity_id,
                    %error,
                    "event delivery failed"
                );
            }
        }
    }

    fn effective(&self, mut loan: Loan) -> Loan {
        let settings = self.settings.snapshot();
        loan.status = effective_status(&loan, &settings, self.clock.now());
        loan
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn require_id(label: &str, value: &str) -> LendingResult<()> {
    if value.trim().is_empty() {
        return Err(LendingError::validation(format!("{label} must not be empty")));
    }
    Ok(())
}

fn validate_category(category: &ResourceCategory) -> LendingResult<()> {
    require_id("category id", &category.id)?;
    if category.name.trim().is_empty() {
        return Err(LendingError::validation("category name must not be empty"));
    }
    for (label, value) in [
        ("base_wellness_hours", category.base_wellness_hours),
        ("hourly_factor", category.hourly_factor),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(LendingError::validation(format!("{label} must be a non-negative number")));
        }
    }
    if category.max_loan_days == Some(0) {
        return Err(LendingError::validation("max_loan_days must be at least 1"));
    }
    if category.replacement_cost.is_sign_negative() {
        return Err(LendingError::validation("replacement_cost must not be negative"));
    }
    Ok(())
}

fn damage_label(damage_type: DamageType, severity: Severity) -> String {
    let severity = match severity {
        Severity::Minor => "minor",
        Severity::Moderate => "moderate",
        Severity::Severe => "severe",
        Severity::TotalLoss => "total-loss",
    };
    match damage_type {
        DamageType::Damage => format!("Damage ({severity})"),
        DamageType::Loss => "Loss".to_owned(),
        DamageType::Theft => "Theft".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::clock::ManualClock;
    use crate::events::MemorySink;
    use crate::storage::InMemoryStorage;

    struct Fixture {
        engine: LendingEngine<InMemoryStorage>,
        clock: ManualClock,
        sink: Arc<MemorySink>,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::new(Utc::now());
        let sink = Arc::new(MemorySink::new());
        let engine = LendingEngine::new(InMemoryStorage::new(), Arc::new(SettingsStore::default()))
            .with_clock(Arc::new(clock.clone()))
            .with_event_sink(sink.clone());

        let mut mats = ResourceCategory::new("mats", "Yoga mats");
        mats.is_low_risk = true;
        mats.requires_approval = false;
        engine.register_category("admin", mats).unwrap();
        engine.register_category("admin", ResourceCategory::new("bikes", "Bikes")).unwrap();
        engine.register_resource("admin", Resource::new("mat-1", "Blue mat", "mats")).unwrap();
        engine.register_resource("admin", Resource::new("bike-1", "City bike", "bikes")).unwrap();
        Fixture { engine, clock, sink }
    }

    #[test]
    fn pending_request_reserves_resource() {
        let f = fixture();
        let outcome = f.engine.request_loan("s-1", "bike-1").unwrap();
        assert_eq!(outcome.status(), LoanStatus::Pending);
        assert_eq!(f.engine.resource("bike-1").unwrap().status, ResourceStatus::Reserved);
        assert_eq!(f.sink.kinds(), vec![EventKind::LoanRequested]);
    }

    #[test]
    fn pickup_window_expiry_is_visible_before_it_is_written() {
        let f = fixture();
        let loan = f.engine.request_loan("s-1", "mat-1").unwrap().loan().cloned().unwrap();
        f.clock.advance(Duration::minutes(61));

        assert_eq!(f.engine.loan(&loan.id).unwrap().status, LoanStatus::Expired);
        assert_eq!(f.engine.storage().loan(&loan.id).unwrap().unwrap().status, LoanStatus::Approved);

        let report = f.engine.sweep().unwrap();
        assert_eq!(report.expired_pickups, 1);
        assert_eq!(f.engine.storage().loan(&loan.id).unwrap().unwrap().status, LoanStatus::Expired);
        assert_eq!(f.engine.resource("mat-1").unwrap().status, ResourceStatus::Available);
    }

    #[test]
    fn expired_pickup_cannot_be_picked_up() {
        let f = fixture();
        let loan = f.engine.request_loan("s-1", "mat-1").unwrap().loan().cloned().unwrap();
        f.clock.advance(Duration::minutes(61));
        let error = f.engine.record_pickup("desk", &loan.id).unwrap_err();
        assert!(matches!(
            error,
            LendingError::StateConflict(StateConflict::InvalidLoanTransition { from: LoanStatus::Expired, .. })
        ));
    }

    #[test]
    fn unreviewed_request_is_auto_rejected() {
        let f = fixture();
        let loan = f.engine.request_loan("s-1", "bike-1").unwrap().loan().cloned().unwrap();
        f.clock.advance(Duration::minutes(1441));

        f.engine.sweep().unwrap();
        let stored = f.engine.loan(&loan.id).unwrap();
        assert_eq!(stored.status, LoanStatus::Rejected);
        assert_eq!(stored.decision_source, DecisionSource::Automatic);
        assert_eq!(stored.admin_notes.as_deref(), Some(lifecycle::APPROVAL_TIMEOUT_NOTE));
        assert_eq!(f.engine.resource("bike-1").unwrap().status, ResourceStatus::Available);
        assert_eq!(f.engine.student_status("s-1").unwrap().trust_score, 100);
    }

    #[test]
    fn rejection_needs_a_reason_and_frees_the_resource() {
        let f = fixture();
        let loan = f.engine.request_loan("s-1", "bike-1").unwrap().loan().cloned().unwrap();
        assert!(matches!(f.engine.reject_loan("admin", &loan.id, "  "), Err(LendingError::Validation(_))));

        let rejected = f.engine.reject_loan("admin", &loan.id, "bike needs service").unwrap();
        assert_eq!(rejected.status, LoanStatus::Rejected);
        assert_eq!(f.engine.resource("bike-1").unwrap().status, ResourceStatus::Available);

        let error = f.engine.approve_loan("admin", &loan.id, None).unwrap_err();
        assert!(matches!(error, LendingError::StateConflict(_)));
    }

    #[test]
    fn loan_limit_counts_effective_open_loans() {
        let f = fixture();
        f.engine
            .settings()
            .apply_rows(&[crate::settings::SettingRow::new("max_active_loans", "1")])
            .unwrap();
        f.engine.request_loan("s-1", "mat-1").unwrap();
        let error = f.engine.request_loan("s-1", "bike-1").unwrap_err();
        assert!(matches!(error, LendingError::Policy(PolicyViolation::LoanLimitReached { limit: 1, .. })));

        // Once the unclaimed approval lapses the slot is free again.
        f.clock.advance(Duration::minutes(61));
        assert!(f.engine.request_loan("s-1", "bike-1").is_ok());
    }

    #[test]
    fn blocked_student_cannot_request_until_block_elapses() {
        let f = fixture();
        let until = f.clock.now() + Duration::days(2);
        f.engine.block_student("admin", "s-1", "manual review", Some(until)).unwrap();
        let error = f.engine.request_loan("s-1", "mat-1").unwrap_err();
        assert!(matches!(error, LendingError::Policy(PolicyViolation::StudentBlocked { .. })));

        f.clock.advance(Duration::days(3));
        assert!(!f.engine.student_status("s-1").unwrap().is_blocked);
        assert!(f.engine.request_loan("s-1", "mat-1").is_ok());
    }

    #[test]
    fn admin_cannot_pull_a_resource_out_from_under_a_loan() {
        let f = fixture();
        let loan = f.engine.request_loan("s-1", "mat-1").unwrap().loan().cloned().unwrap();
        let error = f.engine.set_resource_status("admin", "mat-1", ResourceStatus::Maintenance).unwrap_err();
        assert!(matches!(
            error,
            LendingError::StateConflict(StateConflict::ResourceInUse { ref holder, .. }) if holder == &loan.id
        ));
        assert!(matches!(
            f.engine.set_resource_status("admin", "mat-1", ResourceStatus::Reserved),
            Err(LendingError::Validation(_))
        ));
    }

    #[test]
    fn failing_sink_does_not_roll_back() {
        struct Broken;
        impl EventSink for Broken {
            fn publish(&self, _: &DomainEvent) -> Result<(), crate::events::DeliveryError> {
                Err(crate::events::DeliveryError("socket closed".into()))
            }
        }
        let engine = LendingEngine::new(InMemoryStorage::new(), Arc::new(SettingsStore::default()))
            .with_event_sink(Arc::new(Broken));
        let mut mats = ResourceCategory::new("mats", "Yoga mats");
        mats.is_low_risk = true;
        mats.requires_approval = false;
        engine.register_category("admin", mats).unwrap();
        engine.register_resource("admin", Resource::new("mat-1", "Blue mat", "mats")).unwrap();

        let loan = engine.request_loan("s-1", "mat-1").unwrap().loan().cloned().unwrap();
        assert_eq!(engine.loan(&loan.id).unwrap().status, LoanStatus::Approved);
    }

    #[test]
    fn quote_fine_uses_category_cost() {
        let f = fixture();
        let mut bikes = ResourceCategory::new("bikes", "Bikes");
        bikes.replacement_cost = Decimal::new(30000, 2);
        f.engine.register_category("admin", bikes).unwrap();
        let quote = f
            .engine
            .quote_fine("bike-1", DamageType::Theft, Severity::Minor, None)
            .unwrap();
        assert_eq!(quote, Decimal::new(37500, 2));
    }

    #[test]
    fn sweep_report_adds_up() {
        let mut total = SweepReport { overdue: 1, ..SweepReport::default() };
        total += SweepReport { expired_pickups: 2, failed: 1, ..SweepReport::default() };
        assert_eq!(total.total(), 3);
        assert_eq!(total.failed, 1);
    }
}
