// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Loan transition audit trail.
//!
//! Every status change is appended as a [`TransitionRecord`] in the same
//! batch as the change itself, so the trail can never disagree with the
//! stored loan.  [`AuditTrail`] exposes two operations:
//!
//! * [`query`](AuditTrail::query)       — filter the trail
//! * [`verify_loan`](AuditTrail::verify_loan) — check that a loan's records
//!   form an unbroken walk of the state machine ending at its stored status
//!
//! The trail is append-only; nothing here modifies it.

use thiserror::Error;

use crate::error::{LendingError, LendingResult};
use crate::storage::Storage;
use crate::types::{LoanStatus, TransitionFilter, TransitionRecord};

/// A defect found while verifying a loan's trail.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AuditViolation {
    #[error("loan '{loan_id}' has no creation record")]
    MissingCreation { loan_id: String },

    #[error("record {index} of loan '{loan_id}' starts from {found:?}, previous record ended at {expected:?}")]
    BrokenChain {
        loan_id: String,
        index: usize,
        expected: LoanStatus,
        found: Option<LoanStatus>,
    },

    #[error("record {index} of loan '{loan_id}' is not a state machine edge: {from:?} -> {to:?}")]
    IllegalEdge { loan_id: String, index: usize, from: LoanStatus, to: LoanStatus },

    #[error("loan '{loan_id}' is stored as {stored:?} but its trail ends at {trail:?}")]
    StatusMismatch { loan_id: String, stored: LoanStatus, trail: LoanStatus },
}

/// Read access to the transition trail.
///
/// # Examples
///
/// ```rust
/// use lendwell_core::{audit::AuditTrail, storage::InMemoryStorage, types::TransitionFilter};
///
/// let storage = InMemoryStorage::new();
/// let trail = AuditTrail::new(&storage);
/// assert!(trail.query(&TransitionFilter::default()).unwrap().is_empty());
/// ```
pub struct AuditTrail<'a, S: Storage + ?Sized> {
    storage: &'a S,
}

impl<'a, S: Storage + ?Sized> AuditTrail<'a, S> {
    pub fn new(storage: &'a S) -> Self {
        Self { storage }
    }

    /// Records matching `filter`, oldest first.
    pub fn query(&self, filter: &TransitionFilter) -> LendingResult<Vec<TransitionRecord>> {
        Ok(self.storage.transitions(filter)?)
    }

    /// All records of one loan, oldest first.
    pub fn loan_history(&self, loan_id: &str) -> LendingResult<Vec<TransitionRecord>> {
        self.query(&TransitionFilter { loan_id: Some(loan_id.to_owned()), ..TransitionFilter::default() })
    }

    /// Check the trail of `loan_id` against the state machine and the stored
    /// loan.  Returns the verified records.
    pub fn verify_loan(&self, loan_id: &str) -> LendingResult<Result<Vec<TransitionRecord>, AuditViolation>> {
        let loan = self
            .storage
            .loan(loan_id)?
            .ok_or_else(|| LendingError::not_found("loan", loan_id))?;
        let records = self.loan_history(loan_id)?;
        Ok(verify_chain(loan_id, &records).and_then(|last| {
            if last == loan.status {
                Ok(records)
            } else {
                Err(AuditViolation::StatusMismatch {
                    loan_id: loan_id.to_owned(),
                    stored: loan.status,
                    trail: last,
                })
            }
        }))
    }
}

/// Walk `records` and return the status the trail ends at.
pub fn verify_chain(loan_id: &str, records: &[TransitionRecord]) -> Result<LoanStatus, AuditViolation> {
    let first = records
        .first()
        .filter(|record| record.from.is_none())
        .ok_or_else(|| AuditViolation::MissingCreation { loan_id: loan_id.to_owned() })?;

    let mut current = first.to;
    for (index, record) in records.iter().enumerate().skip(1) {
        if record.from != Some(current) {
            return Err(AuditViolation::BrokenChain {
                loan_id: loan_id.to_owned(),
                index,
                expected: current,
                found: record.from,
            });
        }
        if !current.can_transition_to(record.to) {
            return Err(AuditViolation::IllegalEdge {
                loan_id: loan_id.to_owned(),
                index,
                from: current,
                to: record.to,
            });
        }
        current = record.to;
    }
    Ok(current)
}
