// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! # lendwell-core
//!
//! Lending engine for campus wellness resources: yoga mats, bikes, board
//! games and whatever else a student wellness office hands out.
//!
//! The crate decides whether a loan request is granted, tracks each loan
//! through its lifecycle, keeps a per-student trust score that gates future
//! borrowing, runs per-resource waitlists, and adjudicates damage and loss.
//! Persistence sits behind the [`Storage`] trait; notifications leave the
//! engine as [`DomainEvent`](events::DomainEvent)s.
//!
//! ## Architecture
//!
//! ```text
//! LendingEngine<S: Storage>
//!   ├── SettingsStore       — reloadable policy knobs, one snapshot per decision
//!   ├── lifecycle           — loan state machine, auto-approval, deadlines
//!   ├── TrustEngine         — score updates, late-return and loss blocks
//!   ├── ResourceQueue       — contiguous waitlist with one notified slot
//!   ├── DamageAdjudicator   — fines and damage review
//!   ├── AuditTrail          — append-only transition records
//!   └── EventSink           — post-commit notifications
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use lendwell_core::{
//!     engine::LendingEngine,
//!     settings::SettingsStore,
//!     storage::InMemoryStorage,
//!     types::{LoanStatus, Resource, ResourceCategory},
//! };
//!
//! let engine = LendingEngine::new(InMemoryStorage::new(), Arc::new(SettingsStore::default()));
//!
//! let mut bikes = ResourceCategory::new("bikes", "City bikes");
//! bikes.requires_approval = true;
//! engine.register_category("admin", bikes).unwrap();
//! engine.register_resource("admin", Resource::new("bike-7", "Green bike", "bikes")).unwrap();
//!
//! // Bikes need a human decision.
//! let outcome = engine.request_loan("student-42", "bike-7").unwrap();
//! assert_eq!(outcome.status(), LoanStatus::Pending);
//!
//! let loan = outcome.loan().unwrap();
//! engine.approve_loan("admin", &loan.id, Some("helmet handed out")).unwrap();
//! let loan = engine.record_pickup("front-desk", &loan.id).unwrap();
//! assert_eq!(loan.status, LoanStatus::Active);
//! ```

pub mod adjudicator;
pub mod audit;
pub mod clock;
pub mod engine;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod queue;
pub mod settings;
pub mod storage;
pub mod trust;
pub mod types;

#[cfg(feature = "async")]
pub mod async_engine;

#[cfg(feature = "config-loader")]
pub mod settings_loader;

mod txn;

// Re-export the most commonly used items at the crate root so consumers can
// write `use lendwell_core::LendingEngine;` instead of the fully qualified
// path.
pub use engine::{LendingEngine, SweepReport};
pub use error::{LendingError, LendingResult, PolicyViolation, StateConflict, StorageError};
pub use settings::{Settings, SettingsStore};
pub use storage::{InMemoryStorage, Snapshot, Storage, WriteBatch};
pub use types::{
    DamageRecord, DamageStatus, DamageType, Incident, Loan, LoanStatus, QueueEntry, QueueStatus,
    RequestOutcome, Resource, ResourceCategory, ResourceStatus, Severity, StudentBehavioralStatus,
    TransitionFilter, TransitionRecord,
};

#[cfg(feature = "async")]
pub use async_engine::AsyncLendingEngine;
