// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! # Basic Lending Engine Example
//!
//! Walks one resource through a full loan, a late return, a waitlist hand-off
//! and a damage report using the in-memory storage backend.  Run with:
//!
//! ```bash
//! cargo run --example basic
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;

use lendwell_core::{
    clock::ManualClock,
    engine::LendingEngine,
    events::MemorySink,
    settings::SettingsStore,
    storage::InMemoryStorage,
    types::{DamageType, Incident, Resource, ResourceCategory, Severity, TransitionFilter},
    LendingResult,
};

fn main() -> LendingResult<()> {
    println!("Lendwell basic example\n");

    // -----------------------------------------------------------------------
    // 1. Construct the engine with a controllable clock
    // -----------------------------------------------------------------------
    let clock = ManualClock::new(Utc::now());
    let events = Arc::new(MemorySink::new());
    let engine = LendingEngine::new(InMemoryStorage::new(), Arc::new(SettingsStore::default()))
        .with_clock(Arc::new(clock.clone()))
        .with_event_sink(events.clone());

    // -----------------------------------------------------------------------
    // 2. Catalog: one low-risk category, one resource
    // -----------------------------------------------------------------------
    let mut mats = ResourceCategory::new("mats", "Yoga mats");
    mats.is_low_risk = true;
    mats.requires_approval = false;
    mats.base_wellness_hours = 1.0;
    mats.hourly_factor = 0.05;
    mats.max_loan_days = Some(3);
    mats.replacement_cost = Decimal::new(4500, 2);
    engine.register_category("admin", mats)?;
    engine.register_resource("admin", Resource::new("mat-1", "Blue yoga mat", "mats"))?;

    // -----------------------------------------------------------------------
    // 3. Auto-approved loan, returned on time
    // -----------------------------------------------------------------------
    let outcome = engine.request_loan("alex", "mat-1")?;
    let loan = outcome.loan().cloned().expect("mat-1 is available");
    println!("alex requested mat-1: {}", loan.status.as_str());

    engine.record_pickup("front-desk", &loan.id)?;
    clock.advance(Duration::hours(20));
    let returned = engine.return_loan("front-desk", &loan.id)?;
    println!(
        "returned after 20h: {} wellness hours, trust now {}",
        returned.wellness_hours_awarded,
        engine.student_status("alex")?.trust_score
    );

    // -----------------------------------------------------------------------
    // 4. Waitlist: sam holds the mat, jo queues and gets the slot on return
    // -----------------------------------------------------------------------
    let sam = engine.request_loan("sam", "mat-1")?;
    let sam_loan = sam.loan().cloned().expect("mat-1 is available");
    engine.record_pickup("front-desk", &sam_loan.id)?;

    let queued = engine.request_loan("jo", "mat-1")?;
    println!("\njo requested mat-1 while borrowed: {}", queued.status().as_str());

    clock.advance(Duration::days(4));
    let late = engine.return_loan("front-desk", &sam_loan.id)?;
    println!(
        "sam returned a day late: {} penalty hours, trust now {}",
        late.penalty_hours,
        engine.student_status("sam")?.trust_score
    );
    for entry in engine.queue("mat-1")? {
        println!("  queue: {} is {:?} (respond by {:?})", entry.user_id, entry.status, entry.respond_by);
    }

    // jo asks again and the notified slot turns into a loan.
    let jo = engine.request_loan("jo", "mat-1")?;
    let jo_loan = jo.loan().cloned().expect("jo holds the slot");
    engine.record_pickup("front-desk", &jo_loan.id)?;

    // -----------------------------------------------------------------------
    // 5. Damage report
    // -----------------------------------------------------------------------
    let damage = engine.report_damage(
        "admin",
        &jo_loan.id,
        Incident {
            damage_type: DamageType::Damage,
            severity: Severity::Moderate,
            description: "torn corner".into(),
            images: vec!["photos/mat-1-corner.jpg".into()],
            estimated_cost: None,
        },
    )?;
    println!(
        "\ndamage reported on jo's loan: fine {}, mat-1 is now {}",
        damage.fine_amount,
        engine.resource("mat-1")?.status.as_str()
    );

    // -----------------------------------------------------------------------
    // 6. Audit trail and events
    // -----------------------------------------------------------------------
    let history = engine.history(&TransitionFilter::default())?;
    println!("\n{} transition records:", history.len());
    for record in &history {
        println!(
            "  {} {:>9} -> {:<9} by {}",
            &record.loan_id[..8],
            record.from.map(|s| s.as_str()).unwrap_or("-"),
            record.to.as_str(),
            record.actor
        );
    }

    println!("\n{} events published:", events.events().len());
    for event in events.events() {
        println!("  [{}] {}: {}", event.kind.as_str(), event.user_id, event.message);
    }

    Ok(())
}
