//! In-memory implementation of `BroadcastRepository`.
//!
//! Backs unit tests and ephemeral deployments. A single `RwLock` over the
//! whole map makes every operation atomic, which is what gives
//! `transition_status` and the conditional recipient updates the same
//! compare-and-swap semantics the SQLite backend gets from conditional
//! `UPDATE` statements.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{BroadcastPatch, BroadcastRepository, RepositoryError};
use crate::broadcast::{
    Broadcast, BroadcastId, BroadcastStatus, ProgressBreakdown, Recipient, RecipientId,
    RecipientStatus, SkipReason,
};

#[derive(Debug, Clone)]
struct StoredBroadcast {
    broadcast: Broadcast,
    /// Creation order is the vector order.
    recipients: Vec<Recipient>,
}

/// In-memory broadcast repository. All state is lost on restart.
#[derive(Default)]
pub struct InMemoryRepository {
    broadcasts: RwLock<HashMap<BroadcastId, StoredBroadcast>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BroadcastRepository for InMemoryRepository {
    async fn insert_broadcast(
        &self,
        broadcast: &Broadcast,
        recipients: &[Recipient],
    ) -> Result<(), RepositoryError> {
        let mut broadcasts = self.broadcasts.write().await;
        if broadcasts.contains_key(&broadcast.id) {
            return Err(RepositoryError::storage(
                "insert_broadcast",
                format!("broadcast {} already exists", broadcast.id),
            ));
        }
        broadcasts.insert(
            broadcast.id,
            StoredBroadcast {
                broadcast: broadcast.clone(),
                recipients: recipients.to_vec(),
            },
        );
        Ok(())
    }

    async fn get_broadcast(
        &self,
        id: &BroadcastId,
    ) -> Result<Option<Broadcast>, RepositoryError> {
        let broadcasts = self.broadcasts.read().await;
        Ok(broadcasts.get(id).map(|stored| stored.broadcast.clone()))
    }

    async fn list_recipients(&self, id: &BroadcastId) -> Result<Vec<Recipient>, RepositoryError> {
        let broadcasts = self.broadcasts.read().await;
        Ok(broadcasts
            .get(id)
            .map(|stored| stored.recipients.clone())
            .unwrap_or_default())
    }

    async fn update_details(
        &self,
        id: &BroadcastId,
        patch: &BroadcastPatch,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut broadcasts = self.broadcasts.write().await;
        let Some(stored) = broadcasts.get_mut(id) else {
            return Ok(false);
        };

        if let Some(name) = &patch.name {
            stored.broadcast.name = name.clone();
        }
        if let Some(template) = &patch.message_template {
            stored.broadcast.message_template = template.clone();
        }
        if let Some(scheduled_at) = patch.scheduled_at {
            stored.broadcast.scheduled_at = scheduled_at;
        }
        stored.broadcast.updated_at = now;
        Ok(true)
    }

    async fn transition_status(
        &self,
        id: &BroadcastId,
        expected: &[BroadcastStatus],
        to: BroadcastStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut broadcasts = self.broadcasts.write().await;
        let Some(stored) = broadcasts.get_mut(id) else {
            return Ok(false);
        };

        if !expected.contains(&stored.broadcast.status) {
            return Ok(false);
        }

        stored.broadcast.status = to;
        stored.broadcast.updated_at = now;
        if matches!(to, BroadcastStatus::Completed | BroadcastStatus::Cancelled) {
            stored.broadcast.completed_at = Some(now);
        }
        Ok(true)
    }

    async fn delete_broadcast(&self, id: &BroadcastId) -> Result<bool, RepositoryError> {
        let mut broadcasts = self.broadcasts.write().await;
        Ok(broadcasts.remove(id).is_some())
    }

    async fn pending_batch(
        &self,
        id: &BroadcastId,
        limit: usize,
    ) -> Result<Vec<Recipient>, RepositoryError> {
        let broadcasts = self.broadcasts.read().await;
        Ok(broadcasts
            .get(id)
            .map(|stored| {
                stored
                    .recipients
                    .iter()
                    .filter(|r| r.status == RecipientStatus::Pending)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn mark_sent(
        &self,
        id: &RecipientId,
        delivery_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut broadcasts = self.broadcasts.write().await;
        for stored in broadcasts.values_mut() {
            if let Some(recipient) = stored.recipients.iter_mut().find(|r| &r.id == id) {
                if recipient.status != RecipientStatus::Pending {
                    return Ok(false);
                }
                recipient.status = RecipientStatus::Sent;
                recipient.delivery_id = Some(delivery_id.to_string());
                recipient.sent_at = Some(now);
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn mark_failed(
        &self,
        id: &RecipientId,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut broadcasts = self.broadcasts.write().await;
        for stored in broadcasts.values_mut() {
            if let Some(recipient) = stored.recipients.iter_mut().find(|r| &r.id == id) {
                if recipient.status != RecipientStatus::Pending {
                    return Ok(false);
                }
                recipient.status = RecipientStatus::Failed;
                recipient.error = Some(error.to_string());
                recipient.failed_at = Some(now);
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn skip_pending(
        &self,
        id: &BroadcastId,
        reason: SkipReason,
    ) -> Result<u64, RepositoryError> {
        let mut broadcasts = self.broadcasts.write().await;
        let Some(stored) = broadcasts.get_mut(id) else {
            return Ok(0);
        };

        let mut skipped = 0;
        for recipient in &mut stored.recipients {
            if recipient.status == RecipientStatus::Pending {
                recipient.status = RecipientStatus::Skipped;
                recipient.skip_reason = Some(reason);
                skipped += 1;
            }
        }
        Ok(skipped)
    }

    async fn status_counts(
        &self,
        id: &BroadcastId,
    ) -> Result<ProgressBreakdown, RepositoryError> {
        let broadcasts = self.broadcasts.read().await;
        let mut breakdown = ProgressBreakdown::default();
        if let Some(stored) = broadcasts.get(id) {
            for recipient in &stored.recipients {
                breakdown.add(recipient.status);
            }
        }
        Ok(breakdown)
    }

    async fn due_scheduled(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<BroadcastId>, RepositoryError> {
        let broadcasts = self.broadcasts.read().await;
        Ok(broadcasts
            .values()
            .filter(|stored| {
                stored.broadcast.status == BroadcastStatus::Scheduled
                    && stored
                        .broadcast
                        .scheduled_at
                        .is_some_and(|at| at <= now)
            })
            .map(|stored| stored.broadcast.id)
            .collect())
    }

    async fn active_sending(&self) -> Result<Vec<BroadcastId>, RepositoryError> {
        let broadcasts = self.broadcasts.read().await;
        Ok(broadcasts
            .values()
            .filter(|stored| stored.broadcast.status == BroadcastStatus::Sending)
            .map(|stored| stored.broadcast.id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{broadcast_fixture, recipient_fixture};

    #[tokio::test]
    async fn test_insert_and_get_round_trip() {
        let repo = InMemoryRepository::new();
        let broadcast = broadcast_fixture(BroadcastStatus::Draft, 2);
        let recipients = vec![
            recipient_fixture(&broadcast.id, "6135550001"),
            recipient_fixture(&broadcast.id, "6135550002"),
        ];

        repo.insert_broadcast(&broadcast, &recipients).await.unwrap();

        let loaded = repo.get_broadcast(&broadcast.id).await.unwrap().unwrap();
        assert_eq!(loaded, broadcast);
        assert_eq!(repo.list_recipients(&broadcast.id).await.unwrap(), recipients);
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let repo = InMemoryRepository::new();
        let broadcast = broadcast_fixture(BroadcastStatus::Draft, 0);
        repo.insert_broadcast(&broadcast, &[]).await.unwrap();
        assert!(repo.insert_broadcast(&broadcast, &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_transition_status_is_conditional() {
        let repo = InMemoryRepository::new();
        let broadcast = broadcast_fixture(BroadcastStatus::Sending, 0);
        repo.insert_broadcast(&broadcast, &[]).await.unwrap();
        let now = Utc::now();

        // First claim wins.
        assert!(repo
            .transition_status(
                &broadcast.id,
                &[BroadcastStatus::Sending],
                BroadcastStatus::Paused,
                now
            )
            .await
            .unwrap());

        // Second claim against the stale expectation loses.
        assert!(!repo
            .transition_status(
                &broadcast.id,
                &[BroadcastStatus::Sending],
                BroadcastStatus::Completed,
                now
            )
            .await
            .unwrap());

        let loaded = repo.get_broadcast(&broadcast.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, BroadcastStatus::Paused);
        assert_eq!(loaded.completed_at, None);
    }

    #[tokio::test]
    async fn test_completed_transition_stamps_completed_at() {
        let repo = InMemoryRepository::new();
        let broadcast = broadcast_fixture(BroadcastStatus::Sending, 0);
        repo.insert_broadcast(&broadcast, &[]).await.unwrap();
        let now = Utc::now();

        assert!(repo
            .transition_status(
                &broadcast.id,
                &[BroadcastStatus::Sending],
                BroadcastStatus::Completed,
                now
            )
            .await
            .unwrap());

        let loaded = repo.get_broadcast(&broadcast.id).await.unwrap().unwrap();
        assert_eq!(loaded.completed_at, Some(now));
    }

    #[tokio::test]
    async fn test_mark_sent_only_from_pending() {
        let repo = InMemoryRepository::new();
        let broadcast = broadcast_fixture(BroadcastStatus::Sending, 1);
        let recipient = recipient_fixture(&broadcast.id, "6135550001");
        repo.insert_broadcast(&broadcast, &[recipient.clone()])
            .await
            .unwrap();
        let now = Utc::now();

        assert!(repo.mark_sent(&recipient.id, "msg_1", now).await.unwrap());
        // Already sent: the second mark is a no-op.
        assert!(!repo.mark_sent(&recipient.id, "msg_2", now).await.unwrap());
        assert!(!repo.mark_failed(&recipient.id, "boom", now).await.unwrap());

        let rows = repo.list_recipients(&broadcast.id).await.unwrap();
        assert_eq!(rows[0].status, RecipientStatus::Sent);
        assert_eq!(rows[0].delivery_id.as_deref(), Some("msg_1"));
    }

    #[tokio::test]
    async fn test_skip_pending_leaves_sent_rows_alone() {
        let repo = InMemoryRepository::new();
        let broadcast = broadcast_fixture(BroadcastStatus::Sending, 3);
        let recipients = vec![
            recipient_fixture(&broadcast.id, "6135550001"),
            recipient_fixture(&broadcast.id, "6135550002"),
            recipient_fixture(&broadcast.id, "6135550003"),
        ];
        repo.insert_broadcast(&broadcast, &recipients).await.unwrap();
        let now = Utc::now();

        repo.mark_sent(&recipients[0].id, "msg_1", now).await.unwrap();
        let skipped = repo
            .skip_pending(&broadcast.id, SkipReason::BroadcastCancelled)
            .await
            .unwrap();
        assert_eq!(skipped, 2);

        let counts = repo.status_counts(&broadcast.id).await.unwrap();
        assert_eq!(counts.sent, 1);
        assert_eq!(counts.skipped, 2);
        assert_eq!(counts.pending, 0);
        assert_eq!(counts.total(), 3);
    }

    #[tokio::test]
    async fn test_pending_batch_respects_order_and_limit() {
        let repo = InMemoryRepository::new();
        let broadcast = broadcast_fixture(BroadcastStatus::Sending, 3);
        let recipients = vec![
            recipient_fixture(&broadcast.id, "6135550001"),
            recipient_fixture(&broadcast.id, "6135550002"),
            recipient_fixture(&broadcast.id, "6135550003"),
        ];
        repo.insert_broadcast(&broadcast, &recipients).await.unwrap();

        let batch = repo.pending_batch(&broadcast.id, 2).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].phone_number.as_str(), "+16135550001");
        assert_eq!(batch[1].phone_number.as_str(), "+16135550002");
    }

    #[tokio::test]
    async fn test_due_scheduled_filters_by_time() {
        let repo = InMemoryRepository::new();
        let now = Utc::now();

        let mut due = broadcast_fixture(BroadcastStatus::Scheduled, 0);
        due.scheduled_at = Some(now - chrono::Duration::minutes(1));
        let mut future = broadcast_fixture(BroadcastStatus::Scheduled, 0);
        future.scheduled_at = Some(now + chrono::Duration::hours(1));
        let draft = broadcast_fixture(BroadcastStatus::Draft, 0);

        repo.insert_broadcast(&due, &[]).await.unwrap();
        repo.insert_broadcast(&future, &[]).await.unwrap();
        repo.insert_broadcast(&draft, &[]).await.unwrap();

        let ids = repo.due_scheduled(now).await.unwrap();
        assert_eq!(ids, vec![due.id]);
    }

    #[tokio::test]
    async fn test_delete_cascades_recipients() {
        let repo = InMemoryRepository::new();
        let broadcast = broadcast_fixture(BroadcastStatus::Draft, 1);
        let recipients = vec![recipient_fixture(&broadcast.id, "6135550001")];
        repo.insert_broadcast(&broadcast, &recipients).await.unwrap();

        assert!(repo.delete_broadcast(&broadcast.id).await.unwrap());
        assert!(repo.get_broadcast(&broadcast.id).await.unwrap().is_none());
        assert!(repo.list_recipients(&broadcast.id).await.unwrap().is_empty());
        assert!(!repo.delete_broadcast(&broadcast.id).await.unwrap());
    }
}
