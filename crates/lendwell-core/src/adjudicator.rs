// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Damage and loss adjudication.
//!
//! [`calculate_fine`] is a pure function and may be called speculatively to
//! quote a fine before anything is recorded.  [`DamageAdjudicator`] validates
//! an incident and builds the [`DamageRecord`]; the engine persists it with
//! the loan, resource and trust changes in one batch.
//!
//! Fine = base × factor, rounded to cents, where base is the administrator's
//! estimate when present and the category replacement cost otherwise:
//!
//! | incident | factor |
//! |---|---|
//! | damage, minor | 0.10 |
//! | damage, moderate | 0.25 |
//! | damage, severe | 0.50 |
//! | damage, total loss | 1.00 |
//! | loss (any severity) | 1.00 |
//! | theft (any severity) | 1.25 |

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use uuid::Uuid;

use crate::error::{LendingError, LendingResult, StateConflict};
use crate::trust::TrustEvent;
use crate::types::{
    DamageRecord, DamageStatus, DamageType, Incident, Loan, ResourceCategory, Severity,
};

/// Fine multiplier for an incident.
pub fn fine_factor(damage_type: DamageType, severity: Severity) -> Decimal {
    match (damage_type, severity) {
        (DamageType::Damage, Severity::Minor) => Decimal::new(10, 2),
        (DamageType::Damage, Severity::Moderate) => Decimal::new(25, 2),
        (DamageType::Damage, Severity::Severe) => Decimal::new(50, 2),
        (DamageType::Damage, Severity::TotalLoss) => Decimal::ONE,
        (DamageType::Loss, _) => Decimal::ONE,
        (DamageType::Theft, _) => Decimal::new(125, 2),
    }
}

/// Fine for an incident on a resource of `category`.
///
/// # Examples
///
/// ```rust
/// use rust_decimal::Decimal;
/// use lendwell_core::{
///     adjudicator::calculate_fine,
///     types::{DamageType, ResourceCategory, Severity},
/// };
///
/// let mut category = ResourceCategory::new("c-1", "Bikes");
/// category.replacement_cost = Decimal::new(40000, 2);
///
/// let fine = calculate_fine(DamageType::Damage, Severity::Moderate, &category, None);
/// assert_eq!(fine, Decimal::new(10000, 2));
/// ```
pub fn calculate_fine(
    damage_type: DamageType,
    severity: Severity,
    category: &ResourceCategory,
    estimated_cost: Option<Decimal>,
) -> Decimal {
    let base = estimated_cost.unwrap_or(category.replacement_cost);
    (base * fine_factor(damage_type, severity))
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Validates incidents and builds damage records.
#[derive(Debug, Default, Clone, Copy)]
pub struct DamageAdjudicator;

impl DamageAdjudicator {
    /// Reject incomplete incident reports.
    pub fn validate(&self, incident: &Incident) -> LendingResult<()> {
        if incident.description.trim().is_empty() {
            return Err(LendingError::validation("damage report requires a description"));
        }
        if let Some(cost) = incident.estimated_cost {
            if cost.is_sign_negative() {
                return Err(LendingError::validation(format!(
                    "estimated cost must not be negative (got {cost})"
                )));
            }
        }
        if incident.images.iter().any(|image| image.trim().is_empty()) {
            return Err(LendingError::validation("damage image references must not be empty"));
        }
        Ok(())
    }

    /// Build the record for `incident` on `loan`.  The fine is computed here
    /// and never recomputed afterwards.
    pub fn assess(
        &self,
        loan: &Loan,
        category: &ResourceCategory,
        incident: &Incident,
        reported_by: &str,
        now: DateTime<Utc>,
    ) -> LendingResult<DamageRecord> {
        self.validate(incident)?;
        let fine_amount =
            calculate_fine(incident.damage_type, incident.severity, category, incident.estimated_cost);

        Ok(DamageRecord {
            id: Uuid::new_v4().to_string(),
            loan_id: loan.id.clone(),
            resource_id: loan.resource_id.clone(),
            user_id: loan.user_id.clone(),
            damage_type: incident.damage_type,
            severity: incident.severity,
            description: incident.description.trim().to_owned(),
            damage_images: incident.images.clone(),
            estimated_cost: incident.estimated_cost,
            fine_amount,
            reported_by: reported_by.to_owned(),
            reported_at: now,
            status: DamageStatus::Reported,
            reviewed_by: None,
            version: 0,
        })
    }

    /// The trust event an incident feeds into the trust engine.
    pub fn trust_event(&self, incident: &Incident) -> TrustEvent {
        if incident.is_loss() {
            TrustEvent::Loss
        } else {
            TrustEvent::Damage(incident.severity)
        }
    }

    /// Move a record through review.  Only `status` and `reviewed_by` change.
    pub fn review(
        &self,
        record: &mut DamageRecord,
        next: DamageStatus,
        reviewer: &str,
    ) -> Result<(), StateConflict> {
        if !record.status.can_transition_to(next) {
            return Err(StateConflict::InvalidDamageTransition {
                damage_id: record.id.clone(),
                from: record.status,
                to: next,
            });
        }
        record.status = next;
        record.reviewed_by = Some(reviewer.to_owned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::types::{DecisionSource, LoanStatus};

    fn category() -> ResourceCategory {
        let mut category = ResourceCategory::new("c-1", "Bikes");
        category.replacement_cost = dec!(250.00);
        category
    }

    fn incident(damage_type: DamageType, severity: Severity) -> Incident {
        Incident {
            damage_type,
            severity,
            description: "bent wheel".into(),
            images: vec!["img/1.jpg".into()],
            estimated_cost: None,
        }
    }

    fn loan() -> Loan {
        Loan {
            id: "l-1".into(),
            resource_id: "r-1".into(),
            user_id: "s-1".into(),
            status: LoanStatus::Active,
            decision_source: DecisionSource::Human,
            requested_at: Utc::now(),
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
            version: 3,
        }
    }

    #[test]
    fn fine_table() {
        let category = category();
        assert_eq!(calculate_fine(DamageType::Damage, Severity::Minor, &category, None), dec!(25.00));
        assert_eq!(calculate_fine(DamageType::Damage, Severity::Severe, &category, None), dec!(125.00));
        assert_eq!(calculate_fine(DamageType::Loss, Severity::Minor, &category, None), dec!(250.00));
        assert_eq!(calculate_fine(DamageType::Theft, Severity::Minor, &category, None), dec!(312.50));
    }

    #[test]
    fn estimate_overrides_replacement_cost_and_rounds() {
        let fine = calculate_fine(DamageType::Damage, Severity::Moderate, &category(), Some(dec!(33.33)));
        assert_eq!(fine, dec!(8.33));
    }

    #[test]
    fn calculate_fine_is_pure() {
        let category = category();
        let first = calculate_fine(DamageType::Theft, Severity::Severe, &category, Some(dec!(19.99)));
        let second = calculate_fine(DamageType::Theft, Severity::Severe, &category, Some(dec!(19.99)));
        assert_eq!(first, second);
    }

    #[test]
    fn missing_description_is_a_validation_error() {
        let mut report = incident(DamageType::Damage, Severity::Minor);
        report.description = "   ".into();
        let error = DamageAdjudicator.assess(&loan(), &category(), &report, "admin", Utc::now());
        assert!(matches!(error, Err(LendingError::Validation(_))));
    }

    #[test]
    fn negative_estimate_is_rejected() {
        let mut report = incident(DamageType::Damage, Severity::Minor);
        report.estimated_cost = Some(dec!(-1));
        assert!(DamageAdjudicator.validate(&report).is_err());
    }

    #[test]
    fn assessed_record_copies_loan_identity() {
        let record = DamageAdjudicator
            .assess(&loan(), &category(), &incident(DamageType::Loss, Severity::Minor), "admin-1", Utc::now())
            .unwrap();
        assert_eq!(record.loan_id, "l-1");
        assert_eq!(record.resource_id, "r-1");
        assert_eq!(record.user_id, "s-1");
        assert_eq!(record.fine_amount, dec!(250.00));
        assert_eq!(record.status, DamageStatus::Reported);
        assert_eq!(record.version, 0);
    }

    #[test]
    fn review_follows_status_machine() {
        let mut record = DamageAdjudicator
            .assess(&loan(), &category(), &incident(DamageType::Damage, Severity::Minor), "admin", Utc::now())
            .unwrap();
        DamageAdjudicator.review(&mut record, DamageStatus::UnderReview, "admin-2").unwrap();
        DamageAdjudicator.review(&mut record, DamageStatus::Waived, "admin-2").unwrap();
        let error = DamageAdjudicator.review(&mut record, DamageStatus::Resolved, "admin-2");
        assert!(matches!(error, Err(StateConflict::InvalidDamageTransition { .. })));
        assert_eq!(record.reviewed_by.as_deref(), Some("admin-2"));
    }

    #[test]
    fn total_loss_damage_scores_as_loss() {
        let adjudicator = DamageAdjudicator;
        assert_eq!(adjudicator.trust_event(&incident(DamageType::Damage, Severity::TotalLoss)), TrustEvent::Loss);
        assert_eq!(
            adjudicator.trust_event(&incident(DamageType::Damage, Severity::Severe)),
            TrustEvent::Damage(Severity::Severe)
        );
    }
}
