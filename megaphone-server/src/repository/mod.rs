//! Repository abstraction for broadcast persistence.
//!
//! The repository exclusively owns persisted state; the service and the
//! dispatcher are its only writers. Two backends exist: `InMemoryRepository`
//! (tests, ephemeral deployments) and `SqliteRepository` (durable).
//!
//! Cross-process coordination happens entirely through `transition_status`:
//! it updates the broadcast's status only when the stored status is still one
//! of the expected source states and reports whether the caller won, acting
//! as a distributed compare-and-swap. Recipient writes are likewise
//! conditional on the row still being `pending`, so a racing cancel and an
//! in-flight dispatch tick cannot both claim the same recipient.

mod memory;
mod sqlite;

pub use memory::InMemoryRepository;
pub use sqlite::SqliteRepository;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::broadcast::{
    Broadcast, BroadcastId, BroadcastStatus, ProgressBreakdown, Recipient, RecipientId, SkipReason,
};

/// Storage-level failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// The underlying store failed during `operation`.
    Storage { operation: String, details: String },
    /// Stored data could not be interpreted (bad status string, bad JSON).
    Corruption { what: String },
}

impl RepositoryError {
    pub fn storage(operation: &str, details: impl Into<String>) -> Self {
        Self::Storage {
            operation: operation.to_string(),
            details: details.into(),
        }
    }

    pub fn corruption(what: impl Into<String>) -> Self {
        Self::Corruption { what: what.into() }
    }
}

impl fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage { operation, details } => {
                write!(f, "storage error during {operation}: {details}")
            }
            Self::Corruption { what } => write!(f, "corrupt stored data: {what}"),
        }
    }
}

impl std::error::Error for RepositoryError {}

/// Fields editable while a broadcast is still in `draft` or `scheduled`.
///
/// `scheduled_at` is doubly optional: `None` leaves the schedule untouched,
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastPatch {
    pub name: Option<String>,
    pub message_template: Option<String>,
    pub scheduled_at: Option<Option<DateTime<Utc>>>,
}

impl BroadcastPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.message_template.is_none() && self.scheduled_at.is_none()
    }
}

/// Transactional persistence of broadcast and recipient records.
#[async_trait]
pub trait BroadcastRepository: Send + Sync {
    /// Insert a broadcast and all of its recipient rows atomically.
    /// Either everything lands or nothing does.
    async fn insert_broadcast(
        &self,
        broadcast: &Broadcast,
        recipients: &[Recipient],
    ) -> Result<(), RepositoryError>;

    async fn get_broadcast(&self, id: &BroadcastId)
        -> Result<Option<Broadcast>, RepositoryError>;

    /// All recipient rows for a broadcast, in creation order.
    async fn list_recipients(&self, id: &BroadcastId) -> Result<Vec<Recipient>, RepositoryError>;

    /// Apply an edit patch. Returns false if the broadcast does not exist.
    /// Status gating happens in the service; the repository just writes.
    async fn update_details(
        &self,
        id: &BroadcastId,
        patch: &BroadcastPatch,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Conditionally move the broadcast to `to` if its stored status is one
    /// of `expected`. Returns whether this caller won the swap. Stamps
    /// `completed_at` when `to` is `completed` or `cancelled`.
    async fn transition_status(
        &self,
        id: &BroadcastId,
        expected: &[BroadcastStatus],
        to: BroadcastStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Delete the broadcast and cascade its recipients.
    /// Returns false if it did not exist.
    async fn delete_broadcast(&self, id: &BroadcastId) -> Result<bool, RepositoryError>;

    /// Up to `limit` pending recipients in creation order.
    async fn pending_batch(
        &self,
        id: &BroadcastId,
        limit: usize,
    ) -> Result<Vec<Recipient>, RepositoryError>;

    /// Mark a recipient sent, only if it is still pending.
    /// Returns whether the row was updated.
    async fn mark_sent(
        &self,
        id: &RecipientId,
        delivery_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Mark a recipient failed, only if it is still pending.
    /// Returns whether the row was updated.
    async fn mark_failed(
        &self,
        id: &RecipientId,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Skip every still-pending recipient of a broadcast.
    /// Returns how many rows were skipped.
    async fn skip_pending(
        &self,
        id: &BroadcastId,
        reason: SkipReason,
    ) -> Result<u64, RepositoryError>;

    /// Recipient counts grouped by status.
    async fn status_counts(
        &self,
        id: &BroadcastId,
    ) -> Result<ProgressBreakdown, RepositoryError>;

    /// Scheduled broadcasts whose `scheduled_at` has come due.
    async fn due_scheduled(&self, now: DateTime<Utc>)
        -> Result<Vec<BroadcastId>, RepositoryError>;

    /// Broadcasts currently in `sending`.
    async fn active_sending(&self) -> Result<Vec<BroadcastId>, RepositoryError>;
}
