// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Optimistic-concurrency behaviour of the engine's commit loop.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use lendwell_core::{
    events::MemorySink,
    settings::SettingsStore,
    storage::InMemoryStorage,
    types::{
        DamageRecord, Loan, LoanStatus, QueueEntry, QueueStatus, Resource, ResourceCategory,
        StudentBehavioralStatus, TransitionFilter, TransitionRecord,
    },
    LendingEngine, Storage, StorageError, WriteBatch,
};

/// In-memory storage that reports a version conflict on the next
/// `conflicts` commits.
#[derive(Default)]
struct Contended {
    inner: InMemoryStorage,
    conflicts: AtomicUsize,
    commits: AtomicUsize,
}

impl Contended {
    fn arm(&self, conflicts: usize) {
        self.conflicts.store(conflicts, Ordering::SeqCst);
    }
}

impl Storage for Contended {
    fn resource(&self, id: &str) -> Result<Option<Resource>, StorageError> {
        self.inner.resource(id)
    }

    fn category(&self, id: &str) -> Result<Option<ResourceCategory>, StorageError> {
        self.inner.category(id)
    }

    fn loan(&self, id: &str) -> Result<Option<Loan>, StorageError> {
        self.inner.loan(id)
    }

    fn loans_for_resource(&self, resource_id: &str) -> Result<Vec<Loan>, StorageError> {
        self.inner.loans_for_resource(resource_id)
    }

    fn loans_for_student(&self, user_id: &str) -> Result<Vec<Loan>, StorageError> {
        self.inner.loans_for_student(user_id)
    }

    fn loans_with_status(&self, statuses: &[LoanStatus]) -> Result<Vec<Loan>, StorageError> {
        self.inner.loans_with_status(statuses)
    }

    fn queue_entry(&self, id: &str) -> Result<Option<QueueEntry>, StorageError> {
        self.inner.queue_entry(id)
    }

    fn queue_for_resource(&self, resource_id: &str) -> Result<Vec<QueueEntry>, StorageError> {
        self.inner.queue_for_resource(resource_id)
    }

    fn queue_entries_with_status(&self, status: QueueStatus) -> Result<Vec<QueueEntry>, StorageError> {
        self.inner.queue_entries_with_status(status)
    }

    fn student(&self, user_id: &str) -> Result<Option<StudentBehavioralStatus>, StorageError> {
        self.inner.student(user_id)
    }

    fn damage(&self, id: &str) -> Result<Option<DamageRecord>, StorageError> {
        self.inner.damage(id)
    }

    fn damages_for_loan(&self, loan_id: &str) -> Result<Vec<DamageRecord>, StorageError> {
        self.inner.damages_for_loan(loan_id)
    }

    fn transitions(&self, filter: &TransitionFilter) -> Result<Vec<TransitionRecord>, StorageError> {
        self.inner.transitions(filter)
    }

    fn apply(&self, batch: WriteBatch) -> Result<(), StorageError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StorageError::VersionConflict {
                entity: "resource",
                id: "mat-1".into(),
                expected: 1,
                found: Some(2),
            });
        }
        self.inner.apply(batch)
    }
}

fn engine() -> (LendingEngine<Contended>, Arc<MemorySink>) {
    let events = Arc::new(MemorySink::new());
    let engine = LendingEngine::new(Contended::default(), Arc::new(SettingsStore::default()))
        .with_event_sink(events.clone());

    let mut mats = ResourceCategory::new("mats", "Yoga mats");
    mats.is_low_risk = true;
    mats.requires_approval = false;
    engine.register_category("admin", mats).unwrap();
    engine
        .register_resource("admin", Resource::new("mat-1", "Blue yoga mat", "mats"))
        .unwrap();
    (engine, events)
}

#[test]
fn single_conflict_is_retried() {
    let (engine, events) = engine();
    engine.storage().arm(1);
    let before = engine.storage().commits.load(Ordering::SeqCst);

    let outcome = engine.request_loan("s-1", "mat-1").unwrap();
    assert_eq!(outcome.status(), LoanStatus::Approved);
    assert_eq!(engine.storage().commits.load(Ordering::SeqCst) - before, 2);
    assert_eq!(engine.loans_for_student("s-1").unwrap().len(), 1);
    assert_eq!(events.events().len(), 1);
}

#[test]
fn repeated_conflict_surfaces_as_concurrent_modification() {
    let (engine, events) = engine();
    engine.storage().arm(2);

    let error = engine.request_loan("s-1", "mat-1").unwrap_err();
    assert!(error.is_concurrent_modification());
    assert!(engine.loans_for_student("s-1").unwrap().is_empty());
    assert!(events.events().is_empty());

    // The next attempt goes through untouched.
    assert!(engine.request_loan("s-1", "mat-1").is_ok());
}
