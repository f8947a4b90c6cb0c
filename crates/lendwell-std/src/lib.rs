// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! # lendwell-std
//!
//! Durable storage backends for `lendwell-core`.
//!
//! This crate provides [`FileStorage`], a JSON file-backed implementation of
//! the [`Storage`](lendwell_core::Storage) trait suitable for a single
//! wellness office, local tooling and demos that do not need a full database.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use lendwell_core::{LendingEngine, SettingsStore};
//! use lendwell_std::FileStorage;
//!
//! let storage = FileStorage::open("/var/lib/lendwell/lending.json")
//!     .expect("failed to open storage file");
//!
//! let engine = LendingEngine::new(storage, Arc::new(SettingsStore::default()));
//! ```

pub mod storage;

pub use storage::file::FileStorage;
