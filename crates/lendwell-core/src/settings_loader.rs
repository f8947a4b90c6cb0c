// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Settings loader for [`LendingEngine`](crate::engine::LendingEngine).
//!
//! Supports two load strategies:
//!
//! 1. **TOML file**: [`load_settings`] reads a TOML file into [`Settings`].
//! 2. **Environment variables**: [`load_settings_from_env`] layers
//!    `LENDWELL_`-prefixed variables over the defaults.
//!
//! Both loaders validate the result, so a returned [`Settings`] is always
//! accepted by [`SettingsStore::new`](crate::settings::SettingsStore::new).
//!
//! # File format
//!
//! Keys are the `system_settings` keys; omitted keys keep their defaults.
//!
//! ```toml
//! max_active_loans         = 3
//! pickup_timeout_minutes   = 60
//! auto_approve_low_risk    = true
//! block_after_late_returns = 3
//! ```
//!
//! # Environment variables
//!
//! `LENDWELL_<KEY>` with the key upper-cased, e.g. `LENDWELL_MAX_ACTIVE_LOANS=5`
//! or `LENDWELL_AUTO_BLOCK_ON_LOSS=off`.  Unknown `LENDWELL_` variables are
//! rejected rather than ignored.

#![cfg(feature = "config-loader")]

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::error::SettingsError;
use crate::settings::{SettingRow, Settings};

/// Prefix of the environment variables read by [`load_settings_from_env`].
pub const ENV_PREFIX: &str = "LENDWELL_";

/// Errors that can occur while loading settings.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read settings file \"{path}\": {source}")]
    FileRead { path: String, source: std::io::Error },

    #[error("failed to parse TOML settings: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error(transparent)]
    Invalid(#[from] SettingsError),
}

/// Load [`Settings`] from a TOML file.
///
/// # Example
///
/// ```rust,no_run
/// use lendwell_core::settings_loader::load_settings;
///
/// let settings = load_settings("/etc/lendwell/settings.toml").unwrap();
/// println!("loan limit: {}", settings.max_active_loans);
/// ```
pub fn load_settings(path: impl AsRef<Path>) -> Result<Settings, LoadError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| LoadError::FileRead {
        path: path.display().to_string(),
        source,
    })?;
    let settings = parse_settings(&content)?;
    tracing::info!(path = %path.display(), "lending settings loaded from file");
    Ok(settings)
}

/// Parse and validate TOML settings text.
pub fn parse_settings(content: &str) -> Result<Settings, LoadError> {
    let settings: Settings = toml::from_str(content)?;
    settings.validate()?;
    Ok(settings)
}

/// Load [`Settings`] from `LENDWELL_`-prefixed environment variables.
pub fn load_settings_from_env() -> Result<Settings, LoadError> {
    settings_from_vars(std::env::vars())
}

/// Layer `LENDWELL_`-prefixed `(name, value)` pairs over the defaults.
/// Pairs without the prefix are skipped.
pub fn settings_from_vars<I>(vars: I) -> Result<Settings, LoadError>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut settings = Settings::default();
    for (name, value) in vars {
        let Some(key) = name.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        settings.apply_row(&SettingRow::new(key.to_ascii_lowercase(), value))?;
    }
    settings.validate()?;
    Ok(settings)
}
