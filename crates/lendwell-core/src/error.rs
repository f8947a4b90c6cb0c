// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Error taxonomy for lending operations.
//!
//! * [`LendingError::Validation`] — malformed input; surfaced, never retried.
//! * [`LendingError::Policy`] — a policy rule refused the action.
//! * [`LendingError::StateConflict`] — invalid transition or a concurrent
//!   modification that survived one transparent retry.
//! * [`LendingError::NotFound`] — a referenced entity does not exist.
//! * [`LendingError::External`] — the persistence backend failed; nothing was
//!   committed.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{DamageStatus, LoanStatus, ResourceStatus};

/// Result type for lending operations.
pub type LendingResult<T> = Result<T, LendingError>;

#[derive(Debug, Error)]
pub enum LendingError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("policy violation: {0}")]
    Policy(#[from] PolicyViolation),

    #[error("state conflict: {0}")]
    StateConflict(#[from] StateConflict),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("external service error: {0}")]
    External(String),
}

impl LendingError {
    pub(crate) fn not_found(entity: &'static str, id: &str) -> Self {
        LendingError::NotFound { entity, id: id.to_owned() }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        LendingError::Validation(message.into())
    }

    /// Whether the operation may be retried after re-reading state.
    pub fn is_concurrent_modification(&self) -> bool {
        matches!(self, LendingError::StateConflict(StateConflict::ConcurrentModification { .. }))
    }
}

/// Policy rules that refuse an otherwise well-formed request.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyViolation {
    #[error("student '{user_id}' is blocked until {until:?}: {reason}")]
    StudentBlocked {
        user_id: String,
        until: Option<DateTime<Utc>>,
        reason: String,
    },

    #[error("student '{user_id}' already has {active} open loans (limit {limit})")]
    LoanLimitReached { user_id: String, active: u32, limit: u32 },

    #[error("resource '{resource_id}' is {status} and the waitlist is disabled")]
    ResourceUnavailable { resource_id: String, status: &'static str },

    #[error("student '{user_id}' is already queued for resource '{resource_id}'")]
    AlreadyQueued { user_id: String, resource_id: String },

    #[error("student '{user_id}' already holds resource '{resource_id}' through loan '{loan_id}'")]
    AlreadyHolding { user_id: String, resource_id: String, loan_id: String },

    #[error("waitlist for resource '{resource_id}' is full ({size} entries)")]
    QueueFull { resource_id: String, size: u32 },

    #[error("queue entry '{entry_id}' does not belong to student '{user_id}'")]
    NotEntryOwner { entry_id: String, user_id: String },
}

/// Invalid transitions and optimistic-concurrency failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StateConflict {
    #[error("loan '{loan_id}' cannot move from {} to {}", .from.as_str(), .to.as_str())]
    InvalidLoanTransition { loan_id: String, from: LoanStatus, to: LoanStatus },

    #[error("damage record '{damage_id}' cannot move from {from:?} to {to:?}")]
    InvalidDamageTransition { damage_id: String, from: DamageStatus, to: DamageStatus },

    /// `holder` is the open loan or notified queue entry occupying the resource.
    #[error("resource '{resource_id}' is {} and held by '{holder}'", .status.as_str())]
    ResourceInUse { resource_id: String, status: ResourceStatus, holder: String },

    #[error("queue entry '{entry_id}' is not awaiting a response")]
    QueueEntryNotNotified { entry_id: String },

    #[error("queue entry '{entry_id}' is no longer in the waitlist")]
    QueueEntryClosed { entry_id: String },

    #[error("{entity} '{id}' was modified concurrently")]
    ConcurrentModification { entity: &'static str, id: String },
}

/// Failures reported by a [`Storage`](crate::storage::Storage) backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{entity} '{id}' version conflict: expected {expected}, found {found:?}")]
    VersionConflict {
        entity: &'static str,
        id: String,
        expected: u64,
        found: Option<u64>,
    },

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<StorageError> for LendingError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::VersionConflict { entity, id, .. } => {
                LendingError::StateConflict(StateConflict::ConcurrentModification { entity, id })
            }
            other => LendingError::External(other.to_string()),
        }
    }
}

/// Errors raised while building or reloading [`Settings`](crate::settings::Settings).
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("unknown setting key \"{0}\"")]
    UnknownKey(String),

    #[error("setting \"{key}\": cannot parse \"{value}\": {reason}")]
    InvalidValue { key: String, value: String, reason: String },

    #[error("setting \"{key}\": {value} out of range {min}..={max}")]
    OutOfRange { key: String, value: i64, min: i64, max: i64 },

    #[error("setting \"{key}\": {reason}")]
    Inconsistent { key: String, reason: String },

    #[error("failed to read settings file \"{path}\": {source}")]
    FileRead { path: String, source: std::io::Error },

    #[cfg(feature = "config-loader")]
    #[error("failed to parse TOML settings: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl From<SettingsError> for LendingError {
    fn from(error: SettingsError) -> Self {
        LendingError::Validation(error.to_string())
    }
}
