// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Lending policy settings.
//!
//! [`Settings`] is the flat set of tunable policy knobs read by every
//! decisioning component.  All fields have defaults so that
//! `Settings::default()` is always a valid starting point.
//!
//! [`SettingsStore`] is the injected holder shared by the engine.  Each
//! decision takes one [`snapshot`](SettingsStore::snapshot) at its start, so a
//! concurrent [`reload`](SettingsStore::reload) only affects the next
//! evaluation and never recomputes past ones.

use std::sync::{Arc, RwLock};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::SettingsError;

/// Group a setting key belongs to in the `system_settings` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingCategory {
    Loans,
    Wellness,
    Penalties,
    Security,
    Notifications,
}

/// One `system_settings(key, value, category)` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingRow {
    pub key: String,
    pub value: String,
    pub category: Option<SettingCategory>,
}

impl SettingRow {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self { key: key.into(), value: value.into(), category: None }
    }
}

/// Top-level policy configuration.
///
/// # Examples
///
/// ```rust
/// use lendwell_core::settings::Settings;
///
/// let settings = Settings {
///     max_active_loans: 5,
///     ..Settings::default()
/// };
/// assert!(settings.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    // === Loans ===
    #[serde(default = "default_max_active_loans")]
    pub max_active_loans: u32,

    /// Minutes an approved loan waits for pickup before it expires.
    #[serde(default = "default_pickup_timeout_minutes")]
    pub pickup_timeout_minutes: u32,

    /// Minutes a pending request waits for review before it is auto-rejected.
    #[serde(default = "default_approval_timeout_minutes")]
    pub approval_timeout_minutes: u32,

    /// Loan length for categories without `max_loan_days`.
    #[serde(default = "default_loan_days")]
    pub default_loan_days: u32,

    #[serde(default = "default_true")]
    pub auto_approve_low_risk: bool,

    #[serde(default = "default_min_trust_score_auto_approve")]
    pub min_trust_score_auto_approve: i64,

    /// Requests for unavailable resources join the waitlist instead of failing.
    #[serde(default = "default_true", alias = "enable_queue_system")]
    pub allow_queue_for_unavailable: bool,

    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: u32,

    /// Minutes a notified waiter has to convert the slot into a request.
    #[serde(default = "default_queue_response_timeout_minutes")]
    pub queue_response_timeout_minutes: u32,

    // === Penalties ===
    #[serde(default = "default_late_return_penalty_hours")]
    pub late_return_penalty_hours: u32,

    #[serde(default = "default_damage_penalty_hours")]
    pub damage_penalty_hours: u32,

    #[serde(default = "default_loss_penalty_hours")]
    pub loss_penalty_hours: u32,

    /// Trust points deducted per penalty hour.
    #[serde(default = "default_trust_points_per_penalty_hour")]
    pub trust_points_per_penalty_hour: u32,

    /// Trust points credited for an on-time return.
    #[serde(default = "default_on_time_return_bonus")]
    pub on_time_return_bonus: u32,

    // === Security ===
    #[serde(default = "default_block_after_late_returns")]
    pub block_after_late_returns: u32,

    /// Late returns older than this window do not count towards blocking.
    #[serde(default = "default_late_return_window_days")]
    pub late_return_window_days: u32,

    #[serde(default = "default_block_duration_days")]
    pub block_duration_days: u32,

    #[serde(default = "default_true")]
    pub auto_block_on_loss: bool,

    #[serde(default = "default_trust_score_min")]
    pub trust_score_min: i64,

    #[serde(default = "default_trust_score_max")]
    pub trust_score_max: i64,

    #[serde(default = "default_trust_score")]
    pub default_trust_score: i64,

    // === Notifications ===
    #[serde(default = "default_true")]
    pub notify_on_approval: bool,

    #[serde(default = "default_true")]
    pub notify_on_overdue: bool,
}

fn default_true() -> bool { true }
fn default_max_active_loans() -> u32 { 3 }
fn default_pickup_timeout_minutes() -> u32 { 60 }
fn default_approval_timeout_minutes() -> u32 { 1440 }
fn default_loan_days() -> u32 { 7 }
fn default_min_trust_score_auto_approve() -> i64 { 80 }
fn default_max_queue_size() -> u32 { 10 }
fn default_queue_response_timeout_minutes() -> u32 { 120 }
fn default_late_return_penalty_hours() -> u32 { 2 }
fn default_damage_penalty_hours() -> u32 { 5 }
fn default_loss_penalty_hours() -> u32 { 20 }
fn default_trust_points_per_penalty_hour() -> u32 { 3 }
fn default_on_time_return_bonus() -> u32 { 2 }
fn default_block_after_late_returns() -> u32 { 3 }
fn default_late_return_window_days() -> u32 { 90 }
fn default_block_duration_days() -> u32 { 14 }
fn default_trust_score_min() -> i64 { 0 }
fn default_trust_score_max() -> i64 { 200 }
fn default_trust_score() -> i64 { 100 }

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_active_loans: default_max_active_loans(),
            pickup_timeout_minutes: default_pickup_timeout_minutes(),
            approval_timeout_minutes: default_approval_timeout_minutes(),
            default_loan_days: default_loan_days(),
            auto_approve_low_risk: true,
            min_trust_score_auto_approve: default_min_trust_score_auto_approve(),
            allow_queue_for_unavailable: true,
            max_queue_size: default_max_queue_size(),
            queue_response_timeout_minutes: default_queue_response_timeout_minutes(),
            late_return_penalty_hours: default_late_return_penalty_hours(),
            damage_penalty_hours: default_damage_penalty_hours(),
            loss_penalty_hours: default_loss_penalty_hours(),
            trust_points_per_penalty_hour: default_trust_points_per_penalty_hour(),
            on_time_return_bonus: default_on_time_return_bonus(),
            block_after_late_returns: default_block_after_late_returns(),
            late_return_window_days: default_late_return_window_days(),
            block_duration_days: default_block_duration_days(),
            auto_block_on_loss: true,
            trust_score_min: default_trust_score_min(),
            trust_score_max: default_trust_score_max(),
            default_trust_score: default_trust_score(),
            notify_on_approval: true,
            notify_on_overdue: true,
        }
    }
}

impl Settings {
    /// Check every knob against its documented bounds.
    pub fn validate(&self) -> Result<(), SettingsError> {
        check_range("max_active_loans", self.max_active_loans.into(), 1, 20)?;
        check_range("pickup_timeout_minutes", self.pickup_timeout_minutes.into(), 5, 10_080)?;
        check_range("approval_timeout_minutes", self.approval_timeout_minutes.into(), 5, 43_200)?;
        check_range("default_loan_days", self.default_loan_days.into(), 1, 90)?;
        check_range("max_queue_size", self.max_queue_size.into(), 1, 100)?;
        check_range(
            "queue_response_timeout_minutes",
            self.queue_response_timeout_minutes.into(),
            5,
            10_080,
        )?;
        check_range("late_return_penalty_hours", self.late_return_penalty_hours.into(), 0, 100)?;
        check_range("damage_penalty_hours", self.damage_penalty_hours.into(), 0, 100)?;
        check_range("loss_penalty_hours", self.loss_penalty_hours.into(), 0, 200)?;
        check_range(
            "trust_points_per_penalty_hour",
            self.trust_points_per_penalty_hour.into(),
            0,
            50,
        )?;
        check_range("on_time_return_bonus", self.on_time_return_bonus.into(), 0, 50)?;
        check_range("block_after_late_returns", self.block_after_late_returns.into(), 1, 50)?;
        check_range("late_return_window_days", self.late_return_window_days.into(), 1, 3_650)?;
        check_range("block_duration_days", self.block_duration_days.into(), 1, 365)?;

        if self.trust_score_min >= self.trust_score_max {
            return Err(SettingsError::Inconsistent {
                key: "trust_score_min".into(),
                reason: format!(
                    "must be below trust_score_max ({} >= {})",
                    self.trust_score_min, self.trust_score_max
                ),
            });
        }
        check_range(
            "default_trust_score",
            self.default_trust_score,
            self.trust_score_min,
            self.trust_score_max,
        )?;
        check_range(
            "min_trust_score_auto_approve",
            self.min_trust_score_auto_approve,
            self.trust_score_min,
            self.trust_score_max,
        )?;
        Ok(())
    }

    /// Apply one `system_settings` row on top of the current values.
    ///
    /// The value is parsed for the key's type; bounds are checked by
    /// [`validate`](Self::validate) once all rows are applied.
    pub fn apply_row(&mut self, row: &SettingRow) -> Result<(), SettingsError> {
        let key = row.key.trim();
        let value = row.value.trim();
        match key {
            "max_active_loans" => self.max_active_loans = parse_field(key, value)?,
            "pickup_timeout_minutes" => self.pickup_timeout_minutes = parse_field(key, value)?,
            "approval_timeout_minutes" => self.approval_timeout_minutes = parse_field(key, value)?,
            "default_loan_days" => self.default_loan_days = parse_field(key, value)?,
            "auto_approve_low_risk" => self.auto_approve_low_risk = parse_bool(key, value)?,
            "min_trust_score_auto_approve" => {
                self.min_trust_score_auto_approve = parse_field(key, value)?
            }
            "allow_queue_for_unavailable" | "enable_queue_system" => {
                self.allow_queue_for_unavailable = parse_bool(key, value)?
            }
            "max_queue_size" => self.max_queue_size = parse_field(key, value)?,
            "queue_response_timeout_minutes" => {
                self.queue_response_timeout_minutes = parse_field(key, value)?
            }
            "late_return_penalty_hours" => self.late_return_penalty_hours = parse_field(key, value)?,
            "damage_penalty_hours" => self.damage_penalty_hours = parse_field(key, value)?,
            "loss_penalty_hours" => self.loss_penalty_hours = parse_field(key, value)?,
            "trust_points_per_penalty_hour" => {
                self.trust_points_per_penalty_hour = parse_field(key, value)?
            }
            "on_time_return_bonus" => self.on_time_return_bonus = parse_field(key, value)?,
            "block_after_late_returns" => self.block_after_late_returns = parse_field(key, value)?,
            "late_return_window_days" => self.late_return_window_days = parse_field(key, value)?,
            "block_duration_days" => self.block_duration_days = parse_field(key, value)?,
            "auto_block_on_loss" => self.auto_block_on_loss = parse_bool(key, value)?,
            "trust_score_min" => self.trust_score_min = parse_field(key, value)?,
            "trust_score_max" => self.trust_score_max = parse_field(key, value)?,
            "default_trust_score" => self.default_trust_score = parse_field(key, value)?,
            "notify_on_approval" => self.notify_on_approval = parse_bool(key, value)?,
            "notify_on_overdue" => self.notify_on_overdue = parse_bool(key, value)?,
            other => return Err(SettingsError::UnknownKey(other.to_owned())),
        }
        Ok(())
    }

    pub fn pickup_timeout(&self) -> Duration {
        Duration::minutes(self.pickup_timeout_minutes.into())
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::minutes(self.approval_timeout_minutes.into())
    }

    pub fn queue_response_timeout(&self) -> Duration {
        Duration::minutes(self.queue_response_timeout_minutes.into())
    }

    pub fn block_duration(&self) -> Duration {
        Duration::days(self.block_duration_days.into())
    }

    pub fn late_return_window(&self) -> Duration {
        Duration::days(self.late_return_window_days.into())
    }

    /// Clamp a raw score into the configured trust range.
    pub fn clamp_score(&self, score: i64) -> i64 {
        score.clamp(self.trust_score_min, self.trust_score_max)
    }
}

// ---------------------------------------------------------------------------
// SettingsStore
// ---------------------------------------------------------------------------

/// Shared, reloadable holder of the current [`Settings`].
#[derive(Debug)]
pub struct SettingsStore {
    current: RwLock<Arc<Settings>>,
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self { current: RwLock::new(Arc::new(Settings::default())) }
    }
}

impl SettingsStore {
    /// Wrap validated settings.
    pub fn new(settings: Settings) -> Result<Self, SettingsError> {
        settings.validate()?;
        Ok(Self { current: RwLock::new(Arc::new(settings)) })
    }

    /// Build from `system_settings` rows layered over the defaults.
    pub fn from_rows(rows: &[SettingRow]) -> Result<Self, SettingsError> {
        let mut settings = Settings::default();
        for row in rows {
            settings.apply_row(row)?;
        }
        Self::new(settings)
    }

    /// The settings in force right now.  Decisions hold on to the returned
    /// snapshot for their whole evaluation.
    pub fn snapshot(&self) -> Arc<Settings> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Replace the settings.  Invalid settings leave the current ones in place.
    pub fn reload(&self, settings: Settings) -> Result<(), SettingsError> {
        settings.validate()?;
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Arc::new(settings);
        tracing::info!("lending settings reloaded");
        Ok(())
    }

    /// Apply `system_settings` rows on top of the current settings as one
    /// all-or-nothing update.
    pub fn apply_rows(&self, rows: &[SettingRow]) -> Result<(), SettingsError> {
        let mut next = (*self.snapshot()).clone();
        for row in rows {
            next.apply_row(row)?;
        }
        self.reload(next)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn check_range(key: &str, value: i64, min: i64, max: i64) -> Result<(), SettingsError> {
    if value < min || value > max {
        return Err(SettingsError::OutOfRange { key: key.to_owned(), value, min, max });
    }
    Ok(())
}

fn parse_field<T>(key: &str, value: &str) -> Result<T, SettingsError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|source| SettingsError::InvalidValue {
        key: key.to_owned(),
        value: value.to_owned(),
        reason: source.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, SettingsError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(SettingsError::InvalidValue {
            key: key.to_owned(),
            value: other.to_owned(),
            reason: "expected one of: true/false, 1/0, yes/no, on/off".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.trust_score_min, 0);
        assert_eq!(settings.trust_score_max, 200);
        assert_eq!(settings.default_trust_score, 100);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{ "max_active_loans": 5, "enable_queue_system": false }"#).unwrap();
        assert_eq!(settings.max_active_loans, 5);
        assert!(!settings.allow_queue_for_unavailable);
        assert_eq!(settings.pickup_timeout_minutes, 60);
    }

    #[test]
    fn rows_override_defaults() {
        let store = SettingsStore::from_rows(&[
            SettingRow::new("max_active_loans", "2"),
            SettingRow::new("auto_block_on_loss", "no"),
            SettingRow::new("enable_queue_system", "false"),
        ])
        .unwrap();
        let snapshot = store.snapshot();
        assert_eq!(snapshot.max_active_loans, 2);
        assert!(!snapshot.auto_block_on_loss);
        assert!(!snapshot.allow_queue_for_unavailable);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let result = SettingsStore::from_rows(&[SettingRow::new("free_pizza", "true")]);
        assert!(matches!(result, Err(SettingsError::UnknownKey(key)) if key == "free_pizza"));
    }

    #[test]
    fn out_of_range_reload_keeps_previous_settings() {
        let store = SettingsStore::default();
        let bad = Settings { max_active_loans: 0, ..Settings::default() };
        assert!(matches!(store.reload(bad), Err(SettingsError::OutOfRange { .. })));
        assert_eq!(store.snapshot().max_active_loans, 3);
    }

    #[test]
    fn snapshot_is_not_affected_by_reload() {
        let store = SettingsStore::default();
        let before = store.snapshot();
        store.apply_rows(&[SettingRow::new("max_active_loans", "7")]).unwrap();
        assert_eq!(before.max_active_loans, 3);
        assert_eq!(store.snapshot().max_active_loans, 7);
    }

    #[test]
    fn inverted_trust_range_is_rejected() {
        let bad = Settings { trust_score_min: 50, trust_score_max: 10, ..Settings::default() };
        assert!(matches!(bad.validate(), Err(SettingsError::Inconsistent { .. })));
    }

    #[test]
    fn clamp_score_respects_bounds() {
        let settings = Settings::default();
        assert_eq!(settings.clamp_score(-40), 0);
        assert_eq!(settings.clamp_score(250), 200);
        assert_eq!(settings.clamp_score(120), 120);
    }
}
