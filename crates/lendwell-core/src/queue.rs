// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Per-resource FIFO waitlist.
//!
//! [`ResourceQueue`] is loaded with every entry of one resource, mutated in
//! memory and handed back as the list of changed entries for the caller to
//! stage in a write batch.  It maintains two invariants:
//!
//! * `waiting` entries carry positions `1..=n` with no gaps or duplicates;
//!   every other entry carries position `0`.
//! * at most one entry is `notified` at a time, so promotions never overlap.

use chrono::{DateTime, Utc};

use crate::error::{LendingError, LendingResult, PolicyViolation, StateConflict};
use crate::settings::Settings;
use crate::types::{QueueEntry, QueueStatus};

#[derive(Debug, Clone)]
pub struct ResourceQueue {
    resource_id: String,
    entries: Vec<QueueEntry>,
    changed: Vec<String>,
}

impl ResourceQueue {
    /// Wrap all entries (any status) of `resource_id`.
    pub fn new(resource_id: impl Into<String>, entries: Vec<QueueEntry>) -> Self {
        let resource_id = resource_id.into();
        let entries = entries.into_iter().filter(|e| e.resource_id == resource_id).collect();
        Self { resource_id, entries, changed: Vec::new() }
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    /// Waiting entries, head of the line first.
    pub fn waiting(&self) -> Vec<&QueueEntry> {
        let mut waiting: Vec<&QueueEntry> =
            self.entries.iter().filter(|e| e.status == QueueStatus::Waiting).collect();
        waiting.sort_by(|a, b| {
            a.position
                .cmp(&b.position)
                .then_with(|| a.enqueued_at.cmp(&b.enqueued_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        waiting
    }

    /// The entry currently holding the exclusive response window.
    pub fn notified(&self) -> Option<&QueueEntry> {
        self.entries.iter().find(|e| e.status == QueueStatus::Notified)
    }

    /// Entries still in line: the notified one first, then waiters in order.
    pub fn open_entries(&self) -> Vec<QueueEntry> {
        self.notified().into_iter().chain(self.waiting()).cloned().collect()
    }

    pub fn entry(&self, entry_id: &str) -> Option<&QueueEntry> {
        self.entries.iter().find(|e| e.id == entry_id)
    }

    fn open_entry_for(&self, user_id: &str) -> Option<&QueueEntry> {
        self.entries.iter().find(|e| {
            e.user_id == user_id && matches!(e.status, QueueStatus::Waiting | QueueStatus::Notified)
        })
    }

    /// Append `user_id` at the tail of the line.
    pub fn enqueue(
        &mut self,
        entry_id: String,
        user_id: &str,
        settings: &Settings,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry, PolicyViolation> {
        if self.open_entry_for(user_id).is_some() {
            return Err(PolicyViolation::AlreadyQueued {
                user_id: user_id.to_owned(),
                resource_id: self.resource_id.clone(),
            });
        }
        let waiting = self.waiting().len() as u32;
        let in_line = waiting + u32::from(self.notified().is_some());
        if in_line >= settings.max_queue_size {
            return Err(PolicyViolation::QueueFull {
                resource_id: self.resource_id.clone(),
                size: in_line,
            });
        }

        let entry = QueueEntry {
            id: entry_id,
            resource_id: self.resource_id.clone(),
            user_id: user_id.to_owned(),
            position: waiting + 1,
            status: QueueStatus::Waiting,
            enqueued_at: now,
            notified_at: None,
            respond_by: None,
            version: 0,
        };
        self.changed.push(entry.id.clone());
        self.entries.push(entry.clone());
        Ok(entry)
    }

    /// Expire the notified entry when its window closed before `now`.
    pub fn lapse_expired(&mut self, now: DateTime<Utc>) -> Option<QueueEntry> {
        let id = self
            .notified()
            .filter(|e| e.respond_by.map_or(false, |deadline| now > deadline))?
            .id
            .clone();
        self.close(&id, QueueStatus::Expired)
    }

    /// Notify the head of the line.
    ///
    /// Returns `None` while another entry is still notified or when nobody is
    /// waiting.
    pub fn promote_next(&mut self, settings: &Settings, now: DateTime<Utc>) -> Option<QueueEntry> {
        if self.notified().is_some() {
            return None;
        }
        let head = self.waiting().first()?.id.clone();
        let entry = self.entries.iter_mut().find(|e| e.id == head)?;
        entry.status = QueueStatus::Notified;
        entry.position = 0;
        entry.notified_at = Some(now);
        entry.respond_by = Some(now + settings.queue_response_timeout());
        let promoted = entry.clone();
        self.mark_changed(&head);
        self.renumber();
        Some(promoted)
    }

    /// Take `entry_id` out of the line at its owner's request.
    pub fn leave(&mut self, entry_id: &str, user_id: &str) -> LendingResult<QueueEntry> {
        self.owned_open_entry(entry_id, user_id)?;
        self.close(entry_id, QueueStatus::Expired)
            .ok_or_else(|| LendingError::not_found("queue entry", entry_id))
    }

    /// Mark the notified `entry_id` converted.  The caller creates the loan.
    pub fn convert(&mut self, entry_id: &str, user_id: &str) -> LendingResult<QueueEntry> {
        let entry = self.owned_open_entry(entry_id, user_id)?;
        if entry.status != QueueStatus::Notified {
            return Err(StateConflict::QueueEntryNotNotified { entry_id: entry_id.to_owned() }.into());
        }
        self.close(entry_id, QueueStatus::Converted)
            .ok_or_else(|| LendingError::not_found("queue entry", entry_id))
    }

    /// Expire every open entry, e.g. when the resource is retired.
    pub fn close_all(&mut self) -> Vec<QueueEntry> {
        let open: Vec<String> = self
            .entries
            .iter()
            .filter(|e| matches!(e.status, QueueStatus::Waiting | QueueStatus::Notified))
            .map(|e| e.id.clone())
            .collect();
        open.iter().filter_map(|id| self.close(id, QueueStatus::Expired)).collect()
    }

    /// Entries modified since construction, ready to be written.
    pub fn into_changes(self) -> Vec<QueueEntry> {
        let ResourceQueue { entries, changed, .. } = self;
        entries.into_iter().filter(|e| changed.contains(&e.id)).collect()
    }

    fn owned_open_entry(&self, entry_id: &str, user_id: &str) -> LendingResult<&QueueEntry> {
        let entry = self
            .entry(entry_id)
            .ok_or_else(|| LendingError::not_found("queue entry", entry_id))?;
        if entry.user_id != user_id {
            return Err(PolicyViolation::NotEntryOwner {
                entry_id: entry_id.to_owned(),
                user_id: user_id.to_owned(),
            }
            .into());
        }
        if !matches!(entry.status, QueueStatus::Waiting | QueueStatus::Notified) {
            return Err(StateConflict::QueueEntryClosed { entry_id: entry_id.to_owned() }.into());
        }
        Ok(entry)
    }

    fn close(&mut self, entry_id: &str, status: QueueStatus) -> Option<QueueEntry> {
        let entry = self.entries.iter_mut().find(|e| e.id == entry_id)?;
        entry.status = status;
        entry.position = 0;
        let closed = entry.clone();
        self.mark_changed(entry_id);
        self.renumber();
        Some(closed)
    }

    /// Reassign `1..=n` to waiting entries in line order.
    fn renumber(&mut self) {
        let order: Vec<String> = self.waiting().iter().map(|e| e.id.clone()).collect();
        for (index, id) in order.iter().enumerate() {
            let position = index as u32 + 1;
            let moved = match self.entries.iter_mut().find(|e| &e.id == id) {
                Some(entry) if entry.position != position => {
                    entry.position = position;
                    true
                }
                _ => false,
            };
            if moved {
                self.mark_changed(id);
            }
        }
    }

    fn mark_changed(&mut self, entry_id: &str) {
        if !self.changed.iter().any(|id| id == entry_id) {
            self.changed.push(entry_id.to_owned());
        }
    }
}
