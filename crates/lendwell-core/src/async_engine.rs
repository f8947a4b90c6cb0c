// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Async lending engine backed by Tokio.
//!
//! This module is only compiled when the `async` feature flag is enabled:
//!
//! ```toml
//! [dependencies]
//! lendwell-core = { version = "0.1", features = ["async"] }
//! ```
//!
//! # Design
//!
//! [`AsyncLendingEngine`] shares one [`LendingEngine`] between tasks and
//! serialises operations per resource and per student with keyed
//! [`tokio::sync::Mutex`] locks.  Optimistic version checks in storage stay
//! the source of truth; the locks only keep contending requests on the same
//! resource from burning their single retry against each other.
//!
//! Lock order is always resource before student.
//!
//! [`AsyncLendingEngine::spawn_sweeper`] runs [`LendingEngine::sweep`] on a
//! fixed interval for deployments that want due transitions written
//! promptly.
//!
//! # Example
//!
//! ```rust,no_run
//! # #[cfg(feature = "async")]
//! # {
//! use std::sync::Arc;
//! use lendwell_core::{
//!     async_engine::AsyncLendingEngine,
//!     engine::LendingEngine,
//!     settings::SettingsStore,
//!     storage::InMemoryStorage,
//!     types::{Resource, ResourceCategory},
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = LendingEngine::new(InMemoryStorage::new(), Arc::new(SettingsStore::default()));
//!     let engine = AsyncLendingEngine::new(engine);
//!
//!     engine.register_category("admin", ResourceCategory::new("mats", "Yoga mats")).await.unwrap();
//!     engine.register_resource("admin", Resource::new("mat-1", "Blue mat", "mats")).await.unwrap();
//!
//!     let outcome = engine.request_loan("student-1", "mat-1").await.unwrap();
//!     println!("{:?}", outcome.status());
//! }
//! # }
//! ```

#![cfg(feature = "async")]

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use hashbrown::HashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;

use crate::engine::{LendingEngine, SweepReport};
use crate::error::{LendingError, LendingResult};
use crate::storage::Storage;
use crate::types::{
    DamageRecord, DamageStatus, Incident, Loan, QueueEntry, RequestOutcome, Resource,
    ResourceCategory, ResourceStatus, StudentBehavioralStatus,
};

/// Idle lock entries are pruned once the table grows past this size.
const LOCK_TABLE_PRUNE_AT: usize = 1024;

// ---------------------------------------------------------------------------
// KeyedLocks
// ---------------------------------------------------------------------------

#[derive(Default)]
struct KeyedLocks {
    table: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    async fn lock(&self, key: String) -> OwnedMutexGuard<()> {
        let slot = {
            let mut table = self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if table.len() > LOCK_TABLE_PRUNE_AT {
                table.retain(|_, slot| Arc::strong_count(slot) > 1);
            }
            table.entry(key).or_default().clone()
        };
        slot.lock_owned().await
    }
}

// ---------------------------------------------------------------------------
// AsyncLendingEngine
// ---------------------------------------------------------------------------

/// Async facade over [`LendingEngine`] with per-resource and per-student
/// serialisation.
pub struct AsyncLendingEngine<S: Storage> {
    engine: Arc<LendingEngine<S>>,
    locks: Arc<KeyedLocks>,
}

impl<S: Storage> Clone for AsyncLendingEngine<S> {
    fn clone(&self) -> Self {
        Self { engine: Arc::clone(&self.engine), locks: Arc::clone(&self.locks) }
    }
}

impl<S: Storage> AsyncLendingEngine<S> {
    pub fn new(engine: LendingEngine<S>) -> Self {
        Self::from_shared(Arc::new(engine))
    }

    /// Wrap an engine that is also used synchronously elsewhere.
    pub fn from_shared(engine: Arc<LendingEngine<S>>) -> Self {
        Self { engine, locks: Arc::new(KeyedLocks::default()) }
    }

    /// The wrapped engine, for reads that need no serialisation.
    pub fn engine(&self) -> &Arc<LendingEngine<S>> {
        &self.engine
    }

    async fn lock_resource(&self, resource_id: &str) -> OwnedMutexGuard<()> {
        self.locks.lock(format!("resource:{resource_id}")).await
    }

    async fn lock_student(&self, user_id: &str) -> OwnedMutexGuard<()> {
        self.locks.lock(format!("student:{user_id}")).await
    }

    /// Resource of `loan_id`; a loan never changes resource.
    fn loan_resource(&self, loan_id: &str) -> LendingResult<(String, String)> {
        let loan = self
            .engine
            .storage()
            .loan(loan_id)?
            .ok_or_else(|| LendingError::not_found("loan", loan_id))?;
        Ok((loan.resource_id, loan.user_id))
    }

    // -----------------------------------------------------------------------
    // Catalog
    // -----------------------------------------------------------------------

    pub async fn register_category(&self, actor: &str, category: ResourceCategory) -> LendingResult<ResourceCategory> {
        self.engine.register_category(actor, category)
    }

    pub async fn register_resource(&self, actor: &str, resource: Resource) -> LendingResult<Resource> {
        let _resource = self.lock_resource(&resource.id).await;
        self.engine.register_resource(actor, resource)
    }

    pub async fn set_resource_status(
        &self,
        actor: &str,
        resource_id: &str,
        status: ResourceStatus,
    ) -> LendingResult<Resource> {
        let _resource = self.lock_resource(resource_id).await;
        self.engine.set_resource_status(actor, resource_id, status)
    }

    // -----------------------------------------------------------------------
    // Loans
    // -----------------------------------------------------------------------

    pub async fn request_loan(&self, user_id: &str, resource_id: &str) -> LendingResult<RequestOutcome> {
        let _resource = self.lock_resource(resource_id).await;
        let _student = self.lock_student(user_id).await;
        self.engine.request_loan(user_id, resource_id)
    }

    pub async fn approve_loan(&self, admin: &str, loan_id: &str, note: Option<&str>) -> LendingResult<Loan> {
        let (resource_id, _) = self.loan_resource(loan_id)?;
        let _resource = self.lock_resource(&resource_id).await;
        self.engine.approve_loan(admin, loan_id, note)
    }

    pub async fn reject_loan(&self, admin: &str, loan_id: &str, reason: &str) -> LendingResult<Loan> {
        let (resource_id, _) = self.loan_resource(loan_id)?;
        let _resource = self.lock_resource(&resource_id).await;
        self.engine.reject_loan(admin, loan_id, reason)
    }

    pub async fn record_pickup(&self, actor: &str, loan_id: &str) -> LendingResult<Loan> {
        let (resource_id, user_id) = self.loan_resource(loan_id)?;
        let _resource = self.lock_resource(&resource_id).await;
        let _student = self.lock_student(&user_id).await;
        self.engine.record_pickup(actor, loan_id)
    }

    pub async fn return_loan(&self, actor: &str, loan_id: &str) -> LendingResult<Loan> {
        let (resource_id, user_id) = self.loan_resource(loan_id)?;
        let _resource = self.lock_resource(&resource_id).await;
        let _student = self.lock_student(&user_id).await;
        self.engine.return_loan(actor, loan_id)
    }

    pub async fn report_damage(&self, admin: &str, loan_id: &str, incident: Incident) -> LendingResult<DamageRecord> {
        let (resource_id, user_id) = self.loan_resource(loan_id)?;
        let _resource = self.lock_resource(&resource_id).await;
        let _student = self.lock_student(&user_id).await;
        self.engine.report_damage(admin, loan_id, incident)
    }

    pub async fn review_damage(&self, admin: &str, damage_id: &str, status: DamageStatus) -> LendingResult<DamageRecord> {
        self.engine.review_damage(admin, damage_id, status)
    }

    // -----------------------------------------------------------------------
    // Queue
    // -----------------------------------------------------------------------

    pub async fn convert_queue_entry(&self, user_id: &str, entry_id: &str) -> LendingResult<Loan> {
        let entry = self
            .engine
            .storage()
            .queue_entry(entry_id)?
            .ok_or_else(|| LendingError::not_found("queue entry", entry_id))?;
        let _resource = self.lock_resource(&entry.resource_id).await;
        let _student = self.lock_student(user_id).await;
        self.engine.convert_queue_entry(user_id, entry_id)
    }

    pub async fn leave_queue(&self, user_id: &str, entry_id: &str) -> LendingResult<QueueEntry> {
        let entry = self
            .engine
            .storage()
            .queue_entry(entry_id)?
            .ok_or_else(|| LendingError::not_found("queue entry", entry_id))?;
        let _resource = self.lock_resource(&entry.resource_id).await;
        self.engine.leave_queue(user_id, entry_id)
    }

    // -----------------------------------------------------------------------
    // Students
    // -----------------------------------------------------------------------

    pub async fn block_student(
        &self,
        admin: &str,
        user_id: &str,
        reason: &str,
        until: Option<DateTime<Utc>>,
    ) -> LendingResult<StudentBehavioralStatus> {
        let _student = self.lock_student(user_id).await;
        self.engine.block_student(admin, user_id, reason, until)
    }

    pub async fn unblock_student(&self, admin: &str, user_id: &str) -> LendingResult<StudentBehavioralStatus> {
        let _student = self.lock_student(user_id).await;
        self.engine.unblock_student(admin, user_id)
    }

    pub async fn adjust_trust_score(
        &self,
        admin: &str,
        user_id: &str,
        delta: i64,
    ) -> LendingResult<StudentBehavioralStatus> {
        let _student = self.lock_student(user_id).await;
        self.engine.adjust_trust_score(admin, user_id, delta)
    }

    // -----------------------------------------------------------------------
    // Sweep
    // -----------------------------------------------------------------------

    /// Write all due transitions.  Runs unlocked; each resource is settled in
    /// its own version-checked batch.
    pub async fn sweep(&self) -> LendingResult<SweepReport> {
        self.engine.sweep()
    }
}

impl<S: Storage + 'static> AsyncLendingEngine<S> {
    /// Run [`sweep`](Self::sweep) every `period` until the handle is aborted.
    pub fn spawn_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match engine.sweep().await {
                    Ok(report) if report.total() > 0 || report.failed > 0 => {
                        tracing::info!(
                            transitions = report.total(),
                            failed = report.failed,
                            "periodic sweep wrote due transitions"
                        );
                    }
                    Ok(_) => {}
                    Err(error) => tracing::warn!(%error, "periodic sweep failed"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SettingsStore;
    use crate::storage::InMemoryStorage;
    use crate::types::LoanStatus;

    fn engine() -> AsyncLendingEngine<InMemoryStorage> {
        let engine = LendingEngine::new(InMemoryStorage::new(), Arc::new(SettingsStore::default()));
        let mut mats = ResourceCategory::new("mats", "Yoga mats");
        mats.is_low_risk = true;
        mats.requires_approval = false;
        engine.register_category("admin", mats).unwrap();
        engine.register_resource("admin", Resource::new("mat-1", "Blue mat", "mats")).unwrap();
        AsyncLendingEngine::new(engine)
    }

    #[tokio::test]
    async fn concurrent_requests_produce_one_loan_and_one_waiter() {
        let engine = engine();
        let first = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.request_loan("s-1", "mat-1").await })
        };
        let second = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.request_loan("s-2", "mat-1").await })
        };
        let outcomes = [first.await.unwrap().unwrap(), second.await.unwrap().unwrap()];

        let loans = outcomes.iter().filter(|o| o.loan().is_some()).count();
        let queued = outcomes.iter().filter(|o| o.status() == LoanStatus::Queued).count();
        assert_eq!((loans, queued), (1, 1));
        assert_eq!(engine.engine().queue("mat-1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn lock_table_reuses_slots() {
        let locks = KeyedLocks::default();
        drop(locks.lock("resource:a".into()).await);
        drop(locks.lock("resource:a".into()).await);
        assert_eq!(locks.table.lock().unwrap().len(), 1);
    }
}
