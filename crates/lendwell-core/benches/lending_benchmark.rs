// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Criterion benchmark suite for the lending engine.
//!
//! Benchmarks cover:
//!
//! - Fine calculation
//! - Auto-approval evaluation
//! - Trust score updates
//! - A full request / pickup / return loan cycle
//! - Sweeping a catalog with many due transitions
//!
//! Run with: `cargo bench --bench lending_benchmark`

use std::sync::Arc;

use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use rust_decimal::Decimal;

use lendwell_core::{
    adjudicator::calculate_fine,
    clock::ManualClock,
    engine::LendingEngine,
    lifecycle::evaluate_auto_approval,
    settings::{Settings, SettingsStore},
    storage::InMemoryStorage,
    trust::{TrustEngine, TrustEvent},
    types::{DamageType, Resource, ResourceCategory, Severity, StudentBehavioralStatus},
};

fn mats() -> ResourceCategory {
    let mut category = ResourceCategory::new("mats", "Yoga mats");
    category.is_low_risk = true;
    category.requires_approval = false;
    category.base_wellness_hours = 1.0;
    category.hourly_factor = 0.1;
    category.replacement_cost = Decimal::new(4500, 2);
    category
}

fn catalog(resources: usize, clock: &ManualClock) -> LendingEngine<InMemoryStorage> {
    let engine = LendingEngine::new(InMemoryStorage::new(), Arc::new(SettingsStore::default()))
        .with_clock(Arc::new(clock.clone()));
    engine.register_category("admin", mats()).expect("category");
    for index in 0..resources {
        let id = format!("mat-{index:04}");
        engine
            .register_resource("admin", Resource::new(id.clone(), id, "mats"))
            .expect("resource");
    }
    engine
}

// ---------------------------------------------------------------------------
// Pure policy functions
// ---------------------------------------------------------------------------

fn policy_benchmark(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("policy");
    let category = mats();
    let settings = Settings::default();
    let student = StudentBehavioralStatus::new("s-1", 120);

    group.bench_function("calculate_fine", |bencher| {
        bencher.iter(|| {
            black_box(calculate_fine(
                black_box(DamageType::Damage),
                black_box(Severity::Moderate),
                &category,
                black_box(Some(Decimal::new(3333, 2))),
            ))
        });
    });

    group.bench_function("evaluate_auto_approval", |bencher| {
        bencher.iter(|| black_box(evaluate_auto_approval(&category, &student, &settings, Utc::now())));
    });

    let trust = TrustEngine::default();
    group.bench_function("trust_record_late_return", |bencher| {
        bencher.iter_batched(
            || StudentBehavioralStatus::new("s-1", 100),
            |mut status| {
                black_box(trust.record(&mut status, TrustEvent::LateReturn, &settings, Utc::now()));
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

// ---------------------------------------------------------------------------
// Engine operations
// ---------------------------------------------------------------------------

fn loan_cycle_benchmark(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("loan_cycle");

    group.bench_function("request_pickup_return", |bencher| {
        let clock = ManualClock::new(Utc::now());
        let engine = catalog(1, &clock);
        bencher.iter(|| {
            let outcome = engine.request_loan("s-1", "mat-0000").expect("request");
            let loan = outcome.loan().expect("loan");
            engine.record_pickup("desk", &loan.id).expect("pickup");
            black_box(engine.return_loan("desk", &loan.id).expect("return"));
        });
    });

    group.finish();
}

fn sweep_benchmark(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("sweep");

    for resources in [10usize, 100, 500] {
        group.bench_with_input(BenchmarkId::new("expired_pickups", resources), &resources, |bencher, &n| {
            bencher.iter_batched(
                || {
                    let clock = ManualClock::new(Utc::now());
                    let engine = catalog(n, &clock);
                    for index in 0..n {
                        engine
                            .request_loan(&format!("s-{index}"), &format!("mat-{index:04}"))
                            .expect("request");
                    }
                    clock.advance(Duration::hours(2));
                    engine
                },
                |engine| black_box(engine.sweep().expect("sweep")),
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, policy_benchmark, loan_cycle_benchmark, sweep_benchmark);
criterion_main!(benches);
