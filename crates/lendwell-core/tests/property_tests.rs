// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Property-based tests for the lending invariants.
//!
//! These cover invariants that must hold for any ordering of events:
//!
//! 1. Trust scores stay inside the configured range
//! 2. Waiting positions stay contiguous from 1
//! 3. A resource never carries more than one open loan
//! 4. Only state machine edges are accepted

mod common;

use chrono::{Duration, Utc};
use hashbrown::HashMap;
use proptest::prelude::*;

use lendwell_core::{
    lifecycle,
    queue::ResourceQueue,
    settings::Settings,
    trust::{TrustEngine, TrustEvent},
    types::{DecisionSource, Loan, LoanStatus, QueueStatus, RequestOutcome, Severity, StudentBehavioralStatus},
};

const ALL_STATUSES: [LoanStatus; 9] = [
    LoanStatus::Pending,
    LoanStatus::Approved,
    LoanStatus::Rejected,
    LoanStatus::Active,
    LoanStatus::Returned,
    LoanStatus::Overdue,
    LoanStatus::Lost,
    LoanStatus::Damaged,
    LoanStatus::Expired,
];

fn trust_event_strategy() -> impl Strategy<Value = TrustEvent> {
    prop_oneof![
        Just(TrustEvent::OnTimeReturn),
        Just(TrustEvent::LateReturn),
        Just(TrustEvent::Loss),
        prop_oneof![
            Just(Severity::Minor),
            Just(Severity::Moderate),
            Just(Severity::Severe),
            Just(Severity::TotalLoss),
        ]
        .prop_map(TrustEvent::Damage),
    ]
}

#[derive(Debug, Clone)]
enum TrustStep {
    Event(TrustEvent),
    Adjust(i64),
}

fn trust_step_strategy() -> impl Strategy<Value = TrustStep> {
    prop_oneof![
        4 => trust_event_strategy().prop_map(TrustStep::Event),
        1 => (-500i64..500).prop_map(TrustStep::Adjust),
    ]
}

#[derive(Debug, Clone)]
enum QueueOp {
    Enqueue(u8),
    Leave(u8),
    Promote,
    Convert,
    Wait(u16),
}

fn queue_op_strategy() -> impl Strategy<Value = QueueOp> {
    prop_oneof![
        3 => (0u8..12).prop_map(QueueOp::Enqueue),
        1 => (0u8..12).prop_map(QueueOp::Leave),
        2 => Just(QueueOp::Promote),
        1 => Just(QueueOp::Convert),
        1 => (0u16..240).prop_map(QueueOp::Wait),
    ]
}

#[derive(Debug, Clone)]
enum DeskOp {
    Request(u8, u8),
    Pickup(usize),
    Return(usize),
    Wait(u16),
    Sweep,
}

fn desk_op_strategy() -> impl Strategy<Value = DeskOp> {
    prop_oneof![
        4 => (0u8..4, 0u8..3).prop_map(|(s, r)| DeskOp::Request(s, r)),
        2 => any::<usize>().prop_map(DeskOp::Pickup),
        2 => any::<usize>().prop_map(DeskOp::Return),
        1 => (0u16..3000).prop_map(DeskOp::Wait),
        1 => Just(DeskOp::Sweep),
    ]
}

fn blank_loan(status: LoanStatus) -> Loan {
    Loan {
        id: "l-1".into(),
        resource_id: "r-1".into(),
        user_id: "s-1".into(),
        status,
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
        version: 0,
    }
}

proptest! {
    /// Scores never leave [trust_score_min, trust_score_max].
    #[test]
    fn trust_score_stays_clamped(steps in prop::collection::vec(trust_step_strategy(), 0..60)) {
        let settings = Settings::default();
        let engine = TrustEngine::default();
        let mut status = StudentBehavioralStatus::new("s-1", settings.default_trust_score);
        let mut now = Utc::now();

        for step in steps {
            now += Duration::hours(6);
            match step {
                TrustStep::Event(event) => { engine.record(&mut status, event, &settings, now); }
                TrustStep::Adjust(delta) => { engine.adjust(&mut status, delta, &settings); }
            }
            prop_assert!(status.trust_score >= settings.trust_score_min);
            prop_assert!(status.trust_score <= settings.trust_score_max);
        }
    }

    /// Waiting positions are exactly 1..=n after any sequence of queue operations.
    #[test]
    fn waiting_positions_stay_contiguous(ops in prop::collection::vec(queue_op_strategy(), 0..80)) {
        let settings = Settings::default();
        let mut queue = ResourceQueue::new("r-1", Vec::new());
        let mut now = Utc::now();
        let mut next_id = 0u32;

        for op in ops {
            match op {
                QueueOp::Enqueue(user) => {
                    next_id += 1;
                    let _ = queue.enqueue(format!("q-{next_id}"), &format!("s-{user}"), &settings, now);
                }
                QueueOp::Leave(user) => {
                    let id = queue.open_entries().into_iter().find(|e| e.user_id == format!("s-{user}")).map(|e| e.id);
                    if let Some(id) = id {
                        queue.leave(&id, &format!("s-{user}")).unwrap();
                    }
                }
                QueueOp::Promote => { queue.promote_next(&settings, now); }
                QueueOp::Convert => {
                    if let Some(entry) = queue.notified().cloned() {
                        queue.convert(&entry.id, &entry.user_id).unwrap();
                    }
                }
                QueueOp::Wait(minutes) => {
                    now += Duration::minutes(i64::from(minutes));
                    queue.lapse_expired(now);
                }
            }

            let positions: Vec<u32> = queue.waiting().iter().map(|e| e.position).collect();
            let expected: Vec<u32> = (1..=positions.len() as u32).collect();
            prop_assert_eq!(positions, expected);
            let notified = queue.open_entries().iter().filter(|e| e.status == QueueStatus::Notified).count();
            prop_assert!(notified <= 1);
        }
    }

    /// `transition` accepts exactly the state machine edges.
    #[test]
    fn transitions_follow_the_edge_table(from in 0usize..9, to in 0usize..9) {
        let (from, to) = (ALL_STATUSES[from], ALL_STATUSES[to]);
        let mut loan = blank_loan(from);
        let result = lifecycle::transition(&mut loan, to, "admin", Utc::now(), None);
        prop_assert_eq!(result.is_ok(), from.can_transition_to(to));
        prop_assert_eq!(loan.status, if result.is_ok() { to } else { from });
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// At most one open loan references each resource, whatever the students do.
    #[test]
    fn one_open_loan_per_resource(ops in prop::collection::vec(desk_op_strategy(), 1..40)) {
        let desk = common::desk();
        let resources = ["mat-1", "mat-2", "bike-1"];
        let mut loans: Vec<String> = Vec::new();

        for op in ops {
            match op {
                DeskOp::Request(student, resource) => {
                    let outcome = desk.engine.request_loan(&format!("s-{student}"), resources[resource as usize]);
                    if let Ok(RequestOutcome::Loan(loan)) = outcome {
                        loans.push(loan.id);
                    }
                }
                DeskOp::Pickup(index) if !loans.is_empty() => {
                    let _ = desk.engine.record_pickup("desk", &loans[index % loans.len()]);
                }
                DeskOp::Return(index) if !loans.is_empty() => {
                    let _ = desk.engine.return_loan("desk", &loans[index % loans.len()]);
                }
                DeskOp::Wait(minutes) => desk.clock.advance(Duration::minutes(i64::from(minutes))),
                DeskOp::Sweep => { desk.engine.sweep().unwrap(); }
                _ => {}
            }

            let mut open: HashMap<String, usize> = HashMap::new();
            for id in &loans {
                let loan = desk.engine.loan(id).unwrap();
                if loan.status.is_open() {
                    *open.entry(loan.resource_id).or_default() += 1;
                }
            }
            prop_assert!(open.values().all(|count| *count <= 1), "open loans per resource: {:?}", open);
        }
    }
}
