// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Storage abstraction for the lending engine.
//!
//! The [`Storage`] trait is the single interface between the engine and any
//! persistence layer.  Reads return owned snapshots; all writes go through
//! [`Storage::apply`], which commits a [`WriteBatch`] atomically and performs
//! compare-and-swap on the `version` of every record in it.  A batch either
//! commits completely or not at all.
//!
//! This crate ships [`InMemoryStorage`].  The file-backed implementation lives
//! in `lendwell-std`; both share [`Snapshot`] for the table layout and the
//! batch-application rules.
//!
//! # Implementing `Storage`
//!
//! A relational backend maps each table of the [`Snapshot`] to its own table
//! and implements `apply` as one serializable transaction whose `UPDATE`s
//! carry `WHERE version = $expected`.

use std::sync::RwLock;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::types::{
    DamageRecord, Loan, LoanStatus, QueueEntry, QueueStatus, Resource, ResourceCategory,
    StudentBehavioralStatus, TransitionFilter, TransitionRecord,
};

// ---------------------------------------------------------------------------
// Storage trait
// ---------------------------------------------------------------------------

/// Pluggable persistence interface for the lending engine.
///
/// Implementations MUST be `Send + Sync`; the engine is shared across threads
/// and relies on `apply` for its concurrency guarantees.
pub trait Storage: Send + Sync {
    // ------------------------------------------------------------------
    // Catalog
    // ------------------------------------------------------------------

    fn resource(&self, id: &str) -> Result<Option<Resource>, StorageError>;

    fn category(&self, id: &str) -> Result<Option<ResourceCategory>, StorageError>;

    // ------------------------------------------------------------------
    // Loans
    // ------------------------------------------------------------------

    fn loan(&self, id: &str) -> Result<Option<Loan>, StorageError>;

    fn loans_for_resource(&self, resource_id: &str) -> Result<Vec<Loan>, StorageError>;

    fn loans_for_student(&self, user_id: &str) -> Result<Vec<Loan>, StorageError>;

    /// All loans whose stored status is one of `statuses`.
    fn loans_with_status(&self, statuses: &[LoanStatus]) -> Result<Vec<Loan>, StorageError>;

    // ------------------------------------------------------------------
    // Queue
    // ------------------------------------------------------------------

    fn queue_entry(&self, id: &str) -> Result<Option<QueueEntry>, StorageError>;

    /// Every entry ever created for `resource_id`, in any status.
    fn queue_for_resource(&self, resource_id: &str) -> Result<Vec<QueueEntry>, StorageError>;

    fn queue_entries_with_status(&self, status: QueueStatus) -> Result<Vec<QueueEntry>, StorageError>;

    // ------------------------------------------------------------------
    // Trust
    // ------------------------------------------------------------------

    fn student(&self, user_id: &str) -> Result<Option<StudentBehavioralStatus>, StorageError>;

    // ------------------------------------------------------------------
    // Damage
    // ------------------------------------------------------------------

    fn damage(&self, id: &str) -> Result<Option<DamageRecord>, StorageError>;

    fn damages_for_loan(&self, loan_id: &str) -> Result<Vec<DamageRecord>, StorageError>;

    // ------------------------------------------------------------------
    // Audit trail
    // ------------------------------------------------------------------

    /// Transition records matching `filter`, oldest first.
    fn transitions(&self, filter: &TransitionFilter) -> Result<Vec<TransitionRecord>, StorageError>;

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Commit `batch` atomically.  Fails with
    /// [`StorageError::VersionConflict`] when any record's stored version no
    /// longer matches the version it was read at.
    fn apply(&self, batch: WriteBatch) -> Result<(), StorageError>;
}

// ---------------------------------------------------------------------------
// WriteBatch
// ---------------------------------------------------------------------------

/// A set of record writes committed together.
///
/// Each record is written with the `version` it was read at (`0` for a new
/// record); storage bumps the version on commit.  Putting the same record
/// twice keeps the latest copy.
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    resources: Vec<Resource>,
    categories: Vec<ResourceCategory>,
    loans: Vec<Loan>,
    queue: Vec<QueueEntry>,
    students: Vec<StudentBehavioralStatus>,
    damages: Vec<DamageRecord>,
    transitions: Vec<TransitionRecord>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_resource(&mut self, resource: Resource) -> &mut Self {
        upsert(&mut self.resources, resource, |r| r.id.as_str());
        self
    }

    pub fn put_category(&mut self, category: ResourceCategory) -> &mut Self {
        upsert(&mut self.categories, category, |c| c.id.as_str());
        self
    }

    pub fn put_loan(&mut self, loan: Loan) -> &mut Self {
        upsert(&mut self.loans, loan, |l| l.id.as_str());
        self
    }

    pub fn put_queue_entry(&mut self, entry: QueueEntry) -> &mut Self {
        upsert(&mut self.queue, entry, |e| e.id.as_str());
        self
    }

    pub fn put_student(&mut self, status: StudentBehavioralStatus) -> &mut Self {
        upsert(&mut self.students, status, |s| s.user_id.as_str());
        self
    }

    pub fn put_damage(&mut self, damage: DamageRecord) -> &mut Self {
        upsert(&mut self.damages, damage, |d| d.id.as_str());
        self
    }

    pub fn append_transition(&mut self, record: TransitionRecord) -> &mut Self {
        self.transitions.push(record);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
            && self.categories.is_empty()
            && self.loans.is_empty()
            && self.queue.is_empty()
            && self.students.is_empty()
            && self.damages.is_empty()
            && self.transitions.is_empty()
    }

    /// The latest copy of `loan_id` staged in this batch, if any.
    pub fn staged_loan(&self, loan_id: &str) -> Option<&Loan> {
        self.loans.iter().find(|loan| loan.id == loan_id)
    }

    /// The latest copy of `resource_id` staged in this batch, if any.
    pub fn staged_resource(&self, resource_id: &str) -> Option<&Resource> {
        self.resources.iter().find(|resource| resource.id == resource_id)
    }

    /// Queue entries staged in this batch.
    pub fn staged_queue(&self) -> &[QueueEntry] {
        &self.queue
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn categories(&self) -> &[ResourceCategory] {
        &self.categories
    }

    pub fn loans(&self) -> &[Loan] {
        &self.loans
    }

    pub fn students(&self) -> &[StudentBehavioralStatus] {
        &self.students
    }

    pub fn damages(&self) -> &[DamageRecord] {
        &self.damages
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }
}

fn upsert<T>(items: &mut Vec<T>, item: T, key: impl Fn(&T) -> &str) {
    if let Some(existing) = items.iter_mut().find(|existing| key(existing) == key(&item)) {
        *existing = item;
    } else {
        items.push(item);
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// The full table set, as held in memory and serialised by file backends.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub resources: HashMap<String, Resource>,
    pub categories: HashMap<String, ResourceCategory>,
    pub loans: HashMap<String, Loan>,
    pub queue: HashMap<String, QueueEntry>,
    pub students: HashMap<String, StudentBehavioralStatus>,
    pub damages: HashMap<String, DamageRecord>,
    pub transitions: Vec<TransitionRecord>,
}

impl Snapshot {
    /// Validate every version in `batch`, then apply all of it.
    ///
    /// Nothing is modified when validation fails.
    pub fn apply(&mut self, batch: WriteBatch) -> Result<(), StorageError> {
        for resource in &batch.resources {
            check_version("resource", &resource.id, resource.version, self.resources.get(&resource.id).map(|r| r.version))?;
        }
        for category in &batch.categories {
            check_version("category", &category.id, category.version, self.categories.get(&category.id).map(|c| c.version))?;
        }
        for loan in &batch.loans {
            check_version("loan", &loan.id, loan.version, self.loans.get(&loan.id).map(|l| l.version))?;
        }
        for entry in &batch.queue {
            check_version("queue entry", &entry.id, entry.version, self.queue.get(&entry.id).map(|e| e.version))?;
        }
        for student in &batch.students {
            check_version("student", &student.user_id, student.version, self.students.get(&student.user_id).map(|s| s.version))?;
        }
        for damage in &batch.damages {
            check_version("damage record", &damage.id, damage.version, self.damages.get(&damage.id).map(|d| d.version))?;
        }

        for mut resource in batch.resources {
            resource.version += 1;
            self.resources.insert(resource.id.clone(), resource);
        }
        for mut category in batch.categories {
            category.version += 1;
            self.categories.insert(category.id.clone(), category);
        }
        for mut loan in batch.loans {
            loan.version += 1;
            self.loans.insert(loan.id.clone(), loan);
        }
        for mut entry in batch.queue {
            entry.version += 1;
            self.queue.insert(entry.id.clone(), entry);
        }
        for mut student in batch.students {
            student.version += 1;
            self.students.insert(student.user_id.clone(), student);
        }
        for mut damage in batch.damages {
            damage.version += 1;
            self.damages.insert(damage.id.clone(), damage);
        }
        self.transitions.extend(batch.transitions);
        Ok(())
    }

    pub fn loans_for_resource(&self, resource_id: &str) -> Vec<Loan> {
        sorted_loans(self.loans.values().filter(|loan| loan.resource_id == resource_id))
    }

    pub fn loans_for_student(&self, user_id: &str) -> Vec<Loan> {
        sorted_loans(self.loans.values().filter(|loan| loan.user_id == user_id))
    }

    pub fn loans_with_status(&self, statuses: &[LoanStatus]) -> Vec<Loan> {
        sorted_loans(self.loans.values().filter(|loan| statuses.contains(&loan.status)))
    }

    pub fn queue_for_resource(&self, resource_id: &str) -> Vec<QueueEntry> {
        sorted_entries(self.queue.values().filter(|entry| entry.resource_id == resource_id))
    }

    pub fn queue_entries_with_status(&self, status: QueueStatus) -> Vec<QueueEntry> {
        sorted_entries(self.queue.values().filter(|entry| entry.status == status))
    }

    pub fn damages_for_loan(&self, loan_id: &str) -> Vec<DamageRecord> {
        let mut damages: Vec<DamageRecord> = self
            .damages
            .values()
            .filter(|damage| damage.loan_id == loan_id)
            .cloned()
            .collect();
        damages.sort_by(|a, b| a.reported_at.cmp(&b.reported_at).then_with(|| a.id.cmp(&b.id)));
        damages
    }

    pub fn transitions(&self, filter: &TransitionFilter) -> Vec<TransitionRecord> {
        self.transitions
            .iter()
            .filter(|record| filter.matches(record))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }
}

fn check_version(
    entity: &'static str,
    id: &str,
    expected: u64,
    found: Option<u64>,
) -> Result<(), StorageError> {
    let ok = match found {
        Some(current) => current == expected,
        None => expected == 0,
    };
    if ok {
        Ok(())
    } else {
        Err(StorageError::VersionConflict { entity, id: id.to_owned(), expected, found })
    }
}

fn sorted_loans<'a>(loans: impl Iterator<Item = &'a Loan>) -> Vec<Loan> {
    let mut loans: Vec<Loan> = loans.cloned().collect();
    loans.sort_by(|a, b| a.requested_at.cmp(&b.requested_at).then_with(|| a.id.cmp(&b.id)));
    loans
}

fn sorted_entries<'a>(entries: impl Iterator<Item = &'a QueueEntry>) -> Vec<QueueEntry> {
    let mut entries: Vec<QueueEntry> = entries.cloned().collect();
    entries.sort_by(|a, b| a.enqueued_at.cmp(&b.enqueued_at).then_with(|| a.id.cmp(&b.id)));
    entries
}

// ---------------------------------------------------------------------------
// InMemoryStorage
// ---------------------------------------------------------------------------

/// A volatile [`Storage`] implementation backed by a [`Snapshot`] under a
/// reader-writer lock.
///
/// All data lives in process memory and is lost when the storage is dropped.
/// `apply` holds the write lock for validation and mutation, which makes every
/// batch serializable with respect to every other batch.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    inner: RwLock<Snapshot>,
}

impl InMemoryStorage {
    /// Create a new, empty [`InMemoryStorage`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing snapshot.
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self { inner: RwLock::new(snapshot) }
    }

    /// Copy of the current tables.
    pub fn snapshot(&self) -> Result<Snapshot, StorageError> {
        self.read(|snapshot| snapshot.clone())
    }

    fn read<T>(&self, f: impl FnOnce(&Snapshot) -> T) -> Result<T, StorageError> {
        let guard = self
            .inner
            .read()
            .map_err(|_| StorageError::Backend("in-memory storage lock poisoned".into()))?;
        Ok(f(&guard))
    }
}

impl Storage for InMemoryStorage {
    fn resource(&self, id: &str) -> Result<Option<Resource>, StorageError> {
        self.read(|s| s.resources.get(id).cloned())
    }

    fn category(&self, id: &str) -> Result<Option<ResourceCategory>, StorageError> {
        self.read(|s| s.categories.get(id).cloned())
    }

    fn loan(&self, id: &str) -> Result<Option<Loan>, StorageError> {
        self.read(|s| s.loans.get(id).cloned())
    }

    fn loans_for_resource(&self, resource_id: &str) -> Result<Vec<Loan>, StorageError> {
        self.read(|s| s.loans_for_resource(resource_id))
    }

    fn loans_for_student(&self, user_id: &str) -> Result<Vec<Loan>, StorageError> {
        self.read(|s| s.loans_for_student(user_id))
    }

    fn loans_with_status(&self, statuses: &[LoanStatus]) -> Result<Vec<Loan>, StorageError> {
        self.read(|s| s.loans_with_status(statuses))
    }

    fn queue_entry(&self, id: &str) -> Result<Option<QueueEntry>, StorageError> {
        self.read(|s| s.queue.get(id).cloned())
    }

    fn queue_for_resource(&self, resource_id: &str) -> Result<Vec<QueueEntry>, StorageError> {
        self.read(|s| s.queue_for_resource(resource_id))
    }

    fn queue_entries_with_status(&self, status: QueueStatus) -> Result<Vec<QueueEntry>, StorageError> {
        self.read(|s| s.queue_entries_with_status(status))
    }

    fn student(&self, user_id: &str) -> Result<Option<StudentBehavioralStatus>, StorageError> {
        self.read(|s| s.students.get(user_id).cloned())
    }

    fn damage(&self, id: &str) -> Result<Option<DamageRecord>, StorageError> {
        self.read(|s| s.damages.get(id).cloned())
    }

    fn damages_for_loan(&self, loan_id: &str) -> Result<Vec<DamageRecord>, StorageError> {
        self.read(|s| s.damages_for_loan(loan_id))
    }

    fn transitions(&self, filter: &TransitionFilter) -> Result<Vec<TransitionRecord>, StorageError> {
        self.read(|s| s.transitions(filter))
    }

    fn apply(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| StorageError::Backend("in-memory storage lock poisoned".into()))?;
        guard.apply(batch)
    }
}
