// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! File-based JSON storage backend.
//!
//! [`FileStorage`] persists all lending state to a single JSON file on disk.
//! Every committed batch is flushed atomically (write-rename) so that a crash
//! mid-write does not corrupt existing data.  A batch whose flush fails is not
//! applied in memory either.
//!
//! ## Layout
//!
//! The JSON file is a serialised [`Snapshot`]:
//!
//! ```json
//! {
//!   "resources":   { "<resource_id>": Resource, ... },
//!   "categories":  { "<category_id>": ResourceCategory, ... },
//!   "loans":       { "<loan_id>": Loan, ... },
//!   "queue":       { "<entry_id>": QueueEntry, ... },
//!   "students":    { "<user_id>": StudentBehavioralStatus, ... },
//!   "damages":     { "<damage_id>": DamageRecord, ... },
//!   "transitions": [ TransitionRecord, ... ]
//! }
//! ```
//!
//! ## Caveats
//!
//! * [`FileStorage`] holds the full state in memory and rewrites the file on
//!   every commit.  It is meant for a single wellness office, not for
//!   high-frequency write workloads.
//! * Concurrent access from multiple processes is not supported.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use lendwell_core::error::StorageError;
use lendwell_core::storage::{Snapshot, Storage, WriteBatch};
use lendwell_core::types::{
    DamageRecord, Loan, LoanStatus, QueueEntry, QueueStatus, Resource, ResourceCategory,
    StudentBehavioralStatus, TransitionFilter, TransitionRecord,
};

/// A file-backed [`Storage`] implementation that persists state as JSON.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use lendwell_core::{LendingEngine, SettingsStore};
/// use lendwell_std::storage::file::FileStorage;
///
/// let storage = FileStorage::open("/tmp/lendwell.json").expect("could not open storage");
/// let engine = LendingEngine::new(storage, Arc::new(SettingsStore::default()));
/// ```
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    data: RwLock<Snapshot>,
}

impl FileStorage {
    /// Open an existing JSON storage file, or start empty if the path does
    /// not exist yet.  Nothing is written until the first commit.
    ///
    /// # Errors
    ///
    /// Returns an [`io::Error`] if the file exists but cannot be read or if
    /// the JSON is malformed.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str(&raw).map_err(|error| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("lending storage JSON parse error: {error}"),
                )
            })?
        } else {
            Snapshot::default()
        };
        tracing::debug!(path = %path.display(), "file storage opened");
        Ok(Self { path, data: RwLock::new(data) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the file from the current in-memory state.
    pub fn flush(&self) -> Result<(), StorageError> {
        let guard = self.data.read().map_err(|_| poisoned())?;
        write_atomically(&self.path, &guard)
    }

    fn read<T>(&self, f: impl FnOnce(&Snapshot) -> T) -> Result<T, StorageError> {
        let guard = self.data.read().map_err(|_| poisoned())?;
        Ok(f(&guard))
    }
}

/// Write to `<path>.tmp`, then rename over the target.
fn write_atomically(path: &Path, snapshot: &Snapshot) -> Result<(), StorageError> {
    let json = serde_json::to_string_pretty(snapshot)?;
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, json)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn poisoned() -> StorageError {
    StorageError::Backend("file storage lock poisoned".into())
}

impl Storage for FileStorage {
    fn resource(&self, id: &str) -> Result<Option<Resource>, StorageError> {
        self.read(|s| s.resources.get(id).cloned())
    }

    fn category(&self, id: &str) -> Result<Option<ResourceCategory>, StorageError> {
        self.read(|s| s.categories.get(id).cloned())
    }

    fn loan(&self, id: &str) -> Result<Option<Loan>, StorageError> {
        self.read(|s| s.loans.get(id).cloned())
    }

    fn loans_for_resource(&self, resource_id: &str) -> Result<Vec<Loan>, StorageError> {
        self.read(|s| s.loans_for_resource(resource_id))
    }

    fn loans_for_student(&self, user_id: &str) -> Result<Vec<Loan>, StorageError> {
        self.read(|s| s.loans_for_student(user_id))
    }

    fn loans_with_status(&self, statuses: &[LoanStatus]) -> Result<Vec<Loan>, StorageError> {
        self.read(|s| s.loans_with_status(statuses))
    }

    fn queue_entry(&self, id: &str) -> Result<Option<QueueEntry>, StorageError> {
        self.read(|s| s.queue.get(id).cloned())
    }

    fn queue_for_resource(&self, resource_id: &str) -> Result<Vec<QueueEntry>, StorageError> {
        self.read(|s| s.queue_for_resource(resource_id))
    }

    fn queue_entries_with_status(&self, status: QueueStatus) -> Result<Vec<QueueEntry>, StorageError> {
        self.read(|s| s.queue_entries_with_status(status))
    }

    fn student(&self, user_id: &str) -> Result<Option<StudentBehavioralStatus>, StorageError> {
        self.read(|s| s.students.get(user_id).cloned())
    }

    fn damage(&self, id: &str) -> Result<Option<DamageRecord>, StorageError> {
        self.read(|s| s.damages.get(id).cloned())
    }

    fn damages_for_loan(&self, loan_id: &str) -> Result<Vec<DamageRecord>, StorageError> {
        self.read(|s| s.damages_for_loan(loan_id))
    }

    fn transitions(&self, filter: &TransitionFilter) -> Result<Vec<TransitionRecord>, StorageError> {
        self.read(|s| s.transitions(filter))
    }

    fn apply(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let mut guard = self.data.write().map_err(|_| poisoned())?;
        let mut next = guard.clone();
        next.apply(batch)?;
        if let Err(error) = write_atomically(&self.path, &next) {
            tracing::warn!(path = %self.path.display(), %error, "flush failed, batch discarded");
            return Err(error);
        }
        *guard = next;
        Ok(())
    }
}
