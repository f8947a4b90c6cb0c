// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Shared fixture for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;

use lendwell_core::{
    clock::ManualClock,
    events::MemorySink,
    settings::{SettingRow, SettingsStore},
    storage::InMemoryStorage,
    types::{Loan, Resource, ResourceCategory},
    LendingEngine,
};

pub struct Desk {
    pub engine: LendingEngine<InMemoryStorage>,
    pub clock: ManualClock,
    pub events: Arc<MemorySink>,
}

/// Yoga mats: low risk, no approval, one-day loans, 45.00 replacement.
pub fn mats() -> ResourceCategory {
    let mut category = ResourceCategory::new("mats", "Yoga mats");
    category.is_low_risk = true;
    category.requires_approval = false;
    category.base_wellness_hours = 1.0;
    category.hourly_factor = 0.1;
    category.max_loan_days = Some(1);
    category.replacement_cost = Decimal::new(4500, 2);
    category
}

/// Bikes: reviewed by staff, 300.00 replacement.
pub fn bikes() -> ResourceCategory {
    let mut category = ResourceCategory::new("bikes", "City bikes");
    category.base_wellness_hours = 2.0;
    category.hourly_factor = 0.05;
    category.replacement_cost = Decimal::new(30000, 2);
    category
}

pub fn desk() -> Desk {
    desk_with(&[])
}

pub fn desk_with(rows: &[SettingRow]) -> Desk {
    let clock = ManualClock::new(Utc::now());
    let events = Arc::new(MemorySink::new());
    let settings = SettingsStore::from_rows(rows).unwrap();
    let engine = LendingEngine::new(InMemoryStorage::new(), Arc::new(settings))
        .with_clock(Arc::new(clock.clone()))
        .with_event_sink(events.clone());

    engine.register_category("admin", mats()).unwrap();
    engine.register_category("admin", bikes()).unwrap();
    for id in ["mat-1", "mat-2", "mat-3"] {
        engine.register_resource("admin", Resource::new(id, format!("Mat {id}"), "mats")).unwrap();
    }
    engine.register_resource("admin", Resource::new("bike-1", "Green bike", "bikes")).unwrap();
    Desk { engine, clock, events }
}

impl Desk {
    /// Request `resource_id` and expect a loan (not a queue entry).
    pub fn borrow(&self, user_id: &str, resource_id: &str) -> Loan {
        self.engine
            .request_loan(user_id, resource_id)
            .unwrap()
            .loan()
            .cloned()
            .expect("expected a loan, got a queue entry")
    }

    /// Request and pick up `resource_id`.
    pub fn checkout(&self, user_id: &str, resource_id: &str) -> Loan {
        let loan = self.borrow(user_id, resource_id);
        self.engine.record_pickup("desk", &loan.id).unwrap()
    }

    pub fn score(&self, user_id: &str) -> i64 {
        self.engine.student_status(user_id).unwrap().trust_score
    }
}
