// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Outbound domain events.
//!
//! The engine publishes one [`DomainEvent`] per notable state change *after*
//! the change has been committed.  Delivery is the sink's concern; the engine
//! only guarantees that a failed delivery never rolls back the transition it
//! accompanies (failures are logged at `warn` and dropped).
//!
//! Sinks:
//!
//! * [`NullSink`]      — discards everything (the engine default)
//! * [`MemorySink`]    — collects events in memory, for tests and demos
//! * [`TracingSink`]   — writes each event as a structured `tracing` record
//! * `BroadcastSink`   — fans out over `tokio::sync::broadcast` (feature `async`)

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Event model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    LoanRequested,
    LoanApproved,
    LoanRejected,
    PickupExpired,
    LoanOverdue,
    LoanReturned,
    QueueSlotAvailable,
    StudentSanctioned,
    StudentBlocked,
    DamageReported,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::LoanRequested      => "loan_requested",
            EventKind::LoanApproved       => "loan_approved",
            EventKind::LoanRejected       => "loan_rejected",
            EventKind::PickupExpired      => "pickup_expired",
            EventKind::LoanOverdue        => "loan_overdue",
            EventKind::LoanReturned       => "loan_returned",
            EventKind::QueueSlotAvailable => "queue_slot_available",
            EventKind::StudentSanctioned  => "student_sanctioned",
            EventKind::StudentBlocked     => "student_blocked",
            EventKind::DamageReported     => "damage_reported",
        }
    }

    fn severity(self) -> EventSeverity {
        match self {
            EventKind::LoanRequested
            | EventKind::LoanApproved
            | EventKind::LoanReturned
            | EventKind::QueueSlotAvailable => EventSeverity::Info,
            EventKind::LoanRejected
            | EventKind::PickupExpired
            | EventKind::LoanOverdue
            | EventKind::StudentSanctioned => EventSeverity::Warning,
            EventKind::StudentBlocked | EventKind::DamageReported => EventSeverity::Critical,
        }
    }

    fn title(self) -> &'static str {
        match self {
            EventKind::LoanRequested      => "Loan requested",
            EventKind::LoanApproved       => "Loan approved",
            EventKind::LoanRejected       => "Loan rejected",
            EventKind::PickupExpired      => "Pickup window expired",
            EventKind::LoanOverdue        => "Loan overdue",
            EventKind::LoanReturned       => "Resource returned",
            EventKind::QueueSlotAvailable => "Your turn in the waitlist",
            EventKind::StudentSanctioned  => "Trust score reduced",
            EventKind::StudentBlocked     => "Borrowing blocked",
            EventKind::DamageReported     => "Damage reported",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSeverity {
    Info,
    Warning,
    Critical,
}

/// The kind of entity an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Loan,
    QueueEntry,
    Student,
    Damage,
}

/// A notification-worthy state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: String,
    pub kind: EventKind,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub severity: EventSeverity,
    pub title: String,
    pub message: String,
    /// Student the event concerns.
    pub user_id: String,
    pub occurred_at: DateTime<Utc>,
}

impl DomainEvent {
    /// Build an event with the kind's default severity and title.
    pub fn new(
        kind: EventKind,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        user_id: impl Into<String>,
        message: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            entity_type,
            entity_id: entity_id.into(),
            severity: kind.severity(),
            title: kind.title().to_owned(),
            message: message.into(),
            user_id: user_id.into(),
            occurred_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Delivery failure reported by an [`EventSink`].
#[derive(Debug, Error)]
#[error("event delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// Receiver of committed domain events.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &DomainEvent) -> Result<(), DeliveryError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: &DomainEvent) -> Result<(), DeliveryError> {
        Ok(())
    }
}

/// Keeps every published event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<DomainEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything published so far, oldest first.
    pub fn events(&self) -> Vec<DomainEvent> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().into_iter().map(|event| event.kind).collect()
    }

    /// Remove and return everything published so far.
    pub fn drain(&self) -> Vec<DomainEvent> {
        let mut guard = match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::take(&mut *guard)
    }
}

impl EventSink for MemorySink {
    fn publish(&self, event: &DomainEvent) -> Result<(), DeliveryError> {
        let mut guard = self
            .events
            .lock()
            .map_err(|_| DeliveryError("memory sink lock poisoned".into()))?;
        guard.push(event.clone());
        Ok(())
    }
}

/// Logs each event at `info` with structured fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn publish(&self, event: &DomainEvent) -> Result<(), DeliveryError> {
        tracing::info!(
            kind = event.kind.as_str(),
            entity_id = %event.entity_id,
            user_id = %event.user_id,
            severity = ?event.severity,
            "{}: {}",
            event.title,
            event.message
        );
        Ok(())
    }
}

#[cfg(feature = "async")]
pub use broadcast::BroadcastSink;

#[cfg(feature = "async")]
mod broadcast {
    use tokio::sync::broadcast;

    use super::{DeliveryError, DomainEvent, EventSink};

    /// Fans events out to any number of Tokio subscribers.
    ///
    /// Events published while nobody is subscribed are dropped.  Slow
    /// subscribers observe `RecvError::Lagged` once they fall more than
    /// `capacity` events behind.
    #[derive(Debug, Clone)]
    pub struct BroadcastSink {
        sender: broadcast::Sender<DomainEvent>,
    }

    impl BroadcastSink {
        pub fn new(capacity: usize) -> Self {
            let (sender, _) = broadcast::channel(capacity);
            Self { sender }
        }

        pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
            self.sender.subscribe()
        }
    }

    impl EventSink for BroadcastSink {
        fn publish(&self, event: &DomainEvent) -> Result<(), DeliveryError> {
            if self.sender.receiver_count() == 0 {
                return Ok(());
            }
            self.sender
                .send(event.clone())
                .map(|_| ())
                .map_err(|error| DeliveryError(error.to_string()))
        }
    }
}
