// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Trust score engine.
//!
//! [`TrustEngine`] owns every mutation of a [`StudentBehavioralStatus`]:
//!
//! * [`record`](TrustEngine::record)       — apply a loan-lifecycle event (return, damage, loss)
//! * [`record_pickup`](TrustEngine::record_pickup) — count a started loan
//! * [`block`](TrustEngine::block) / [`unblock`](TrustEngine::unblock) — manual sanctions
//! * [`adjust`](TrustEngine::adjust)       — manual score correction
//!
//! Score deltas come from a pluggable [`ScoringFunction`].  Whatever it
//! returns, the engine clamps the result into
//! `[trust_score_min, trust_score_max]` before storing it.
//!
//! The engine works on a status value the caller loaded; persisting it
//! atomically with the triggering loan write is the caller's job.

use chrono::{DateTime, Utc};

use crate::settings::Settings;
use crate::types::{BehaviorCounters, Severity, StudentBehavioralStatus};

/// Reason recorded when repeated late returns trigger a block.
pub const LATE_RETURN_BLOCK_REASON: &str = "excessive late returns";
/// Reason recorded when a lost or stolen resource triggers a block.
pub const LOSS_BLOCK_REASON: &str = "resource lost or stolen";

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// A loan-lifecycle event that moves a student's trust score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustEvent {
    OnTimeReturn,
    LateReturn,
    /// Repairable damage of the given severity.
    Damage(Severity),
    /// Loss, theft or total-loss damage.
    Loss,
}

/// Computes the next trust score.
///
/// `counters` already include the event being scored.
pub trait ScoringFunction: Send + Sync {
    fn next_score(
        &self,
        current: i64,
        counters: &BehaviorCounters,
        event: TrustEvent,
        settings: &Settings,
    ) -> i64;
}

/// Penalty-hour based scoring.
///
/// | event | delta |
/// |---|---|
/// | on-time return | `+on_time_return_bonus` |
/// | late return | `-late_return_penalty_hours × trust_points_per_penalty_hour` |
/// | damage | `-damage_penalty_hours × trust_points_per_penalty_hour × m`, m = 1 / 2 / 3 for minor / moderate / severe |
/// | loss | `-loss_penalty_hours × trust_points_per_penalty_hour` |
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultScoring;

impl ScoringFunction for DefaultScoring {
    fn next_score(
        &self,
        current: i64,
        _counters: &BehaviorCounters,
        event: TrustEvent,
        settings: &Settings,
    ) -> i64 {
        let points = i64::from(settings.trust_points_per_penalty_hour);
        let delta = match event {
            TrustEvent::OnTimeReturn => i64::from(settings.on_time_return_bonus),
            TrustEvent::LateReturn => -i64::from(settings.late_return_penalty_hours) * points,
            TrustEvent::Damage(severity) => {
                let multiplier = match severity {
                    Severity::Minor => 1,
                    Severity::Moderate => 2,
                    Severity::Severe => 3,
                    Severity::TotalLoss => {
                        return current - i64::from(settings.loss_penalty_hours) * points;
                    }
                };
                -i64::from(settings.damage_penalty_hours) * points * multiplier
            }
            TrustEvent::Loss => -i64::from(settings.loss_penalty_hours) * points,
        };
        current.saturating_add(delta)
    }
}

// ---------------------------------------------------------------------------
// TrustEngine
// ---------------------------------------------------------------------------

/// Outcome of applying one [`TrustEvent`].
#[derive(Debug, Clone, PartialEq)]
pub struct TrustUpdate {
    pub previous_score: i64,
    pub new_score: i64,
    /// Set when this event caused a new block.
    pub blocked: Option<String>,
}

impl TrustUpdate {
    pub fn delta(&self) -> i64 {
        self.new_score - self.previous_score
    }
}

/// Applies trust events, sanctions and manual corrections.
///
/// # Examples
///
/// ```rust
/// use chrono::Utc;
/// use lendwell_core::{
///     settings::Settings,
///     trust::{TrustEngine, TrustEvent},
///     types::StudentBehavioralStatus,
/// };
///
/// let engine = TrustEngine::default();
/// let settings = Settings::default();
/// let mut status = StudentBehavioralStatus::new("s-1", 100);
///
/// let update = engine.record(&mut status, TrustEvent::LateReturn, &settings, Utc::now());
/// assert_eq!(update.new_score, 94);
/// assert_eq!(status.counters.late_returns, 1);
/// ```
pub struct TrustEngine {
    scoring: Box<dyn ScoringFunction>,
}

impl Default for TrustEngine {
    fn default() -> Self {
        Self::new(Box::new(DefaultScoring))
    }
}

impl std::fmt::Debug for TrustEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustEngine").finish_non_exhaustive()
    }
}

impl TrustEngine {
    pub fn new(scoring: Box<dyn ScoringFunction>) -> Self {
        Self { scoring }
    }

    /// Apply `event` to `status`: bump the matching counter, rescore, clamp,
    /// and block when policy says so.
    pub fn record(
        &self,
        status: &mut StudentBehavioralStatus,
        event: TrustEvent,
        settings: &Settings,
        now: DateTime<Utc>,
    ) -> TrustUpdate {
        lift_elapsed_block(status, now);

        match event {
            TrustEvent::OnTimeReturn => status.counters.on_time_returns += 1,
            TrustEvent::LateReturn => {
                status.counters.late_returns += 1;
                status.late_return_history.push(now);
            }
            TrustEvent::Damage(Severity::TotalLoss) | TrustEvent::Loss => status.counters.losses += 1,
            TrustEvent::Damage(_) => status.counters.damages += 1,
        }

        let previous_score = status.trust_score;
        let raw = self.scoring.next_score(previous_score, &status.counters, event, settings);
        status.trust_score = settings.clamp_score(raw);

        let block_reason = match event {
            TrustEvent::LateReturn => {
                let window_start = now - settings.late_return_window();
                status.late_return_history.retain(|at| *at >= window_start);
                let recent = status.late_return_history.len();
                (recent >= settings.block_after_late_returns as usize)
                    .then_some(LATE_RETURN_BLOCK_REASON)
            }
            TrustEvent::Loss | TrustEvent::Damage(Severity::TotalLoss) => {
                settings.auto_block_on_loss.then_some(LOSS_BLOCK_REASON)
            }
            _ => None,
        };

        let blocked = block_reason.map(|reason| {
            self.block(status, reason, Some(now + settings.block_duration()), now);
            reason.to_owned()
        });

        tracing::debug!(
            user_id = %status.user_id,
            event = ?event,
            previous_score,
            new_score = status.trust_score,
            blocked = blocked.is_some(),
            "trust event applied"
        );

        TrustUpdate { previous_score, new_score: status.trust_score, blocked }
    }

    /// Count a loan that has been picked up.
    pub fn record_pickup(&self, status: &mut StudentBehavioralStatus) {
        status.counters.total_loans += 1;
    }

    /// Block borrowing until `until` (`None` blocks until lifted manually).
    ///
    /// An existing block is never shortened.
    pub fn block(
        &self,
        status: &mut StudentBehavioralStatus,
        reason: &str,
        until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) {
        let currently_blocked = status.is_blocked_at(now);
        status.blocked_until = match (currently_blocked, status.blocked_until, until) {
            (true, None, _) | (_, _, None) => None,
            (true, Some(existing), Some(requested)) => Some(existing.max(requested)),
            (false, _, Some(requested)) => Some(requested),
        };
        status.is_blocked = true;
        status.blocked_reason = Some(reason.to_owned());
    }

    /// Lift any block immediately.
    pub fn unblock(&self, status: &mut StudentBehavioralStatus) {
        status.is_blocked = false;
        status.blocked_until = None;
        status.blocked_reason = None;
    }

    /// Add `delta` to the score and clamp.  Returns the stored score.
    pub fn adjust(&self, status: &mut StudentBehavioralStatus, delta: i64, settings: &Settings) -> i64 {
        status.trust_score = settings.clamp_score(status.trust_score.saturating_add(delta));
        status.trust_score
    }
}

/// Clear a block whose `blocked_until` has passed.
///
/// Blocks are lifted lazily: reads treat an elapsed block as absent through
/// [`StudentBehavioralStatus::is_blocked_at`], and the next write persists the
/// cleared state through this function.
pub fn lift_elapsed_block(status: &mut StudentBehavioralStatus, now: DateTime<Utc>) {
    if status.is_blocked && !status.is_blocked_at(now) {
        status.is_blocked = false;
        status.blocked_until = None;
        status.blocked_reason = None;
    }
}
