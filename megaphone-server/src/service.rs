//! Broadcast lifecycle operations: create, read, edit, cancel, pause,
//! resume, start, delete.
//!
//! The service owns the state machine's side-effecting half. Every status
//! change goes through the repository's conditional `transition_status`, so
//! two concurrent operations on the same broadcast resolve to exactly one
//! winner; the loser re-reads the stored status and reports the conflict.
//! The delivery half lives in `dispatcher`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use megaphone_core::phone::{prepare_recipients, RawRecipient};
use tracing::info;

use crate::broadcast::{
    can_delete, can_edit, check_transition, Broadcast, BroadcastId, BroadcastStatus, OrgId,
    ProgressBreakdown, Recipient, RecipientId, RecipientStatus, SenderNumberId, SkipReason,
};
use crate::compliance::ComplianceGate;
use crate::config::DispatchConfig;
use crate::error::{BroadcastError, StateError, ValidationError};
use crate::provider::MessagingProvider;
use crate::repository::{BroadcastPatch, BroadcastRepository};

/// Input for creating a broadcast.
#[derive(Debug, Clone)]
pub struct NewBroadcast {
    pub org_id: OrgId,
    pub name: String,
    pub message_template: String,
    pub sender_id: SenderNumberId,
    pub recipients: Vec<RawRecipient>,
    /// `Some` creates the broadcast in `scheduled`; `None` in `draft`.
    pub scheduled_at: Option<DateTime<Utc>>,
    pub created_by: String,
}

/// What creation tells the caller about its input cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateStats {
    pub total_recipients: u32,
    pub duplicates_removed: usize,
    pub invalid_numbers: Vec<String>,
    pub opted_out_skipped: u32,
}

#[derive(Debug, Clone)]
pub struct CreatedBroadcast {
    pub broadcast: Broadcast,
    pub stats: CreateStats,
}

/// A broadcast with its live progress counts.
#[derive(Debug, Clone)]
pub struct BroadcastDetails {
    pub broadcast: Broadcast,
    pub progress: ProgressBreakdown,
    /// Populated only when the caller asked for recipient rows.
    pub recipients: Option<Vec<Recipient>>,
}

/// The broadcast engine's front door.
pub struct BroadcastService {
    pub(crate) repository: Arc<dyn BroadcastRepository>,
    pub(crate) provider: Arc<dyn MessagingProvider>,
    pub(crate) compliance: ComplianceGate,
    pub(crate) config: DispatchConfig,
}

impl BroadcastService {
    pub fn new(
        repository: Arc<dyn BroadcastRepository>,
        provider: Arc<dyn MessagingProvider>,
        compliance: ComplianceGate,
        config: DispatchConfig,
    ) -> Self {
        Self {
            repository,
            provider,
            compliance,
            config,
        }
    }

    /// Create a broadcast: validate input, normalize and deduplicate the
    /// recipient list, run every compliance check, and persist the broadcast
    /// with its recipient rows in one transaction.
    ///
    /// Recipients who have opted out are stored as `skipped` rather than
    /// dropped, so progress counts always sum to the stored total.
    pub async fn create_broadcast(
        &self,
        input: NewBroadcast,
    ) -> Result<CreatedBroadcast, BroadcastError> {
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(ValidationError::MissingName.into());
        }
        let message_template = input.message_template.trim().to_string();
        if message_template.is_empty() {
            return Err(ValidationError::MissingTemplate.into());
        }

        let normalized = prepare_recipients(input.recipients);
        if normalized.recipients.is_empty() {
            return Err(ValidationError::NoValidRecipients {
                invalid_numbers: normalized.invalid_numbers,
            }
            .into());
        }

        let clearance = self
            .compliance
            .clear_for_creation(
                &input.org_id,
                &input.sender_id,
                normalized.recipients.len() as u32,
            )
            .await?;

        let numbers: Vec<_> = normalized
            .recipients
            .iter()
            .map(|r| r.phone_number.clone())
            .collect();
        let opted_out = self.compliance.opted_out(&input.org_id, &numbers).await;

        let now = Utc::now();
        let broadcast_id = BroadcastId::new();
        let mut opted_out_skipped = 0u32;

        let recipients: Vec<Recipient> = normalized
            .recipients
            .into_iter()
            .map(|r| {
                let skipped = opted_out.contains(&r.phone_number);
                if skipped {
                    opted_out_skipped += 1;
                }
                Recipient {
                    id: RecipientId::new(),
                    broadcast_id,
                    phone_number: r.phone_number,
                    contact_name: r.contact_name,
                    variables: r.variables,
                    status: if skipped {
                        RecipientStatus::Skipped
                    } else {
                        RecipientStatus::Pending
                    },
                    skip_reason: skipped.then_some(SkipReason::OptedOut),
                    delivery_id: None,
                    error: None,
                    sent_at: None,
                    failed_at: None,
                }
            })
            .collect();

        let status = if input.scheduled_at.is_some() {
            BroadcastStatus::Scheduled
        } else {
            BroadcastStatus::Draft
        };

        let broadcast = Broadcast {
            id: broadcast_id,
            org_id: input.org_id,
            name,
            message_template,
            sender_id: input.sender_id,
            campaign_id: clearance.campaign_id,
            status,
            scheduled_at: input.scheduled_at,
            total_recipients: recipients.len() as u32,
            opted_out_skipped,
            created_by: input.created_by,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        self.repository
            .insert_broadcast(&broadcast, &recipients)
            .await?;

        info!(
            broadcast_id = %broadcast.id,
            status = %broadcast.status,
            total = broadcast.total_recipients,
            skipped = opted_out_skipped,
            "created broadcast"
        );

        Ok(CreatedBroadcast {
            stats: CreateStats {
                total_recipients: broadcast.total_recipients,
                duplicates_removed: normalized.duplicates_removed,
                invalid_numbers: normalized.invalid_numbers,
                opted_out_skipped,
            },
            broadcast,
        })
    }

    /// Fetch a broadcast with its progress counts, optionally including the
    /// full recipient list.
    pub async fn get_broadcast(
        &self,
        id: &BroadcastId,
        include_recipients: bool,
    ) -> Result<BroadcastDetails, BroadcastError> {
        let broadcast = self.load(id).await?;
        let progress = self.repository.status_counts(id).await?;
        let recipients = if include_recipients {
            Some(self.repository.list_recipients(id).await?)
        } else {
            None
        };

        Ok(BroadcastDetails {
            broadcast,
            progress,
            recipients,
        })
    }

    /// Edit name, template, or schedule. Only `draft` and `scheduled`
    /// broadcasts may be edited; editing never changes the status itself.
    pub async fn update_broadcast(
        &self,
        id: &BroadcastId,
        patch: BroadcastPatch,
    ) -> Result<Broadcast, BroadcastError> {
        let broadcast = self.load(id).await?;
        if !can_edit(broadcast.status) {
            return Err(StateError::EditNotAllowed {
                current: broadcast.status,
            }
            .into());
        }

        if patch.is_empty() {
            return Ok(broadcast);
        }

        if !self.repository.update_details(id, &patch, Utc::now()).await? {
            return Err(BroadcastError::NotFound(*id));
        }
        self.load(id).await
    }

    /// Begin sending. Legal from `draft` and `scheduled`; a broadcast that is
    /// already `sending` is left alone so repeated starts are harmless.
    pub async fn start_broadcast(&self, id: &BroadcastId) -> Result<Broadcast, BroadcastError> {
        let won = self
            .repository
            .transition_status(
                id,
                &[BroadcastStatus::Draft, BroadcastStatus::Scheduled],
                BroadcastStatus::Sending,
                Utc::now(),
            )
            .await?;

        let broadcast = self.load(id).await?;
        if won {
            info!(broadcast_id = %id, "broadcast started");
            return Ok(broadcast);
        }
        if broadcast.status == BroadcastStatus::Sending {
            return Ok(broadcast);
        }
        Err(StateError::Transition {
            current: broadcast.status,
            target: BroadcastStatus::Sending,
        }
        .into())
    }

    /// Pause an in-flight broadcast. Recipients already handed to the
    /// provider stay sent; only future batches stop.
    pub async fn pause_broadcast(&self, id: &BroadcastId) -> Result<Broadcast, BroadcastError> {
        let won = self
            .repository
            .transition_status(
                id,
                &[BroadcastStatus::Sending],
                BroadcastStatus::Paused,
                Utc::now(),
            )
            .await?;

        let broadcast = self.load(id).await?;
        if won {
            info!(broadcast_id = %id, "broadcast paused");
            return Ok(broadcast);
        }
        Err(StateError::Transition {
            current: broadcast.status,
            target: BroadcastStatus::Paused,
        }
        .into())
    }

    /// Resume a paused broadcast. The sender must still be active; quota is
    /// re-checked by the dispatcher before the next batch. If nothing is left
    /// pending the broadcast completes immediately instead of re-entering
    /// `sending`.
    pub async fn resume_broadcast(&self, id: &BroadcastId) -> Result<Broadcast, BroadcastError> {
        let broadcast = self.load(id).await?;
        if broadcast.status != BroadcastStatus::Paused {
            return Err(StateError::Transition {
                current: broadcast.status,
                target: BroadcastStatus::Sending,
            }
            .into());
        }

        self.compliance.active_sender(&broadcast.sender_id).await?;

        let counts = self.repository.status_counts(id).await?;
        let target = if counts.pending == 0 {
            BroadcastStatus::Completed
        } else {
            BroadcastStatus::Sending
        };

        let won = self
            .repository
            .transition_status(id, &[BroadcastStatus::Paused], target, Utc::now())
            .await?;

        let broadcast = self.load(id).await?;
        if won {
            info!(broadcast_id = %id, status = %broadcast.status, "broadcast resumed");
            Ok(broadcast)
        } else {
            // A concurrent cancel (or another resume) got there first.
            Err(StateError::Transition {
                current: broadcast.status,
                target,
            }
            .into())
        }
    }

    /// Cancel a broadcast and skip everything still pending. Idempotent:
    /// cancelling an already-cancelled broadcast is a no-op. `completed` and
    /// `failed` broadcasts cannot be cancelled.
    pub async fn cancel_broadcast(&self, id: &BroadcastId) -> Result<Broadcast, BroadcastError> {
        let broadcast = self.load(id).await?;
        if broadcast.status == BroadcastStatus::Cancelled {
            return Ok(broadcast);
        }
        check_transition(broadcast.status, BroadcastStatus::Cancelled)?;

        let won = self
            .repository
            .transition_status(
                id,
                &[
                    BroadcastStatus::Draft,
                    BroadcastStatus::Scheduled,
                    BroadcastStatus::Sending,
                    BroadcastStatus::Paused,
                ],
                BroadcastStatus::Cancelled,
                Utc::now(),
            )
            .await?;

        if won {
            let skipped = self
                .repository
                .skip_pending(id, SkipReason::BroadcastCancelled)
                .await?;
            info!(broadcast_id = %id, skipped, "broadcast cancelled");
            return self.load(id).await;
        }

        // Lost the race: see where the broadcast ended up.
        let broadcast = self.load(id).await?;
        if broadcast.status == BroadcastStatus::Cancelled {
            Ok(broadcast)
        } else {
            Err(StateError::Transition {
                current: broadcast.status,
                target: BroadcastStatus::Cancelled,
            }
            .into())
        }
    }

    /// Delete a broadcast and its recipient rows. Refused while the broadcast
    /// is in flight or finished successfully.
    pub async fn delete_broadcast(&self, id: &BroadcastId) -> Result<(), BroadcastError> {
        let broadcast = self.load(id).await?;
        if !can_delete(broadcast.status) {
            return Err(StateError::DeleteNotAllowed {
                current: broadcast.status,
            }
            .into());
        }

        if !self.repository.delete_broadcast(id).await? {
            return Err(BroadcastError::NotFound(*id));
        }
        info!(broadcast_id = %id, "broadcast deleted");
        Ok(())
    }

    pub(crate) async fn load(&self, id: &BroadcastId) -> Result<Broadcast, BroadcastError> {
        self.repository
            .get_broadcast(id)
            .await?
            .ok_or(BroadcastError::NotFound(*id))
    }
}
