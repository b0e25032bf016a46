//! Delivery dispatcher: drains pending recipients batch by batch.
//!
//! A tick is the unit of forward progress. Each tick re-reads the stored
//! status first and does nothing unless the broadcast is still `sending`, so
//! pause and cancel take effect at the next batch boundary at the latest.
//! Per-recipient completion goes through conditional `mark_sent`/`mark_failed`
//! writes; a recipient that stopped being pending under us (a racing cancel)
//! ends the tick early.
//!
//! Quota and sender checks are repeated every tick because a large broadcast
//! can outlive a billing period or a number deactivation.

use std::sync::Arc;

use chrono::Utc;
use megaphone_core::template::render_template;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::broadcast::{BroadcastId, BroadcastStatus};
use crate::error::BroadcastError;
use crate::provider::send_with_retry;
use crate::service::BroadcastService;

/// What a single dispatch tick accomplished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The broadcast is not in `sending`; nothing was dispatched.
    NotSending { status: BroadcastStatus },
    /// A batch was processed and more recipients remain.
    Batch { sent: u32, failed: u32, remaining: u32 },
    /// The pending set drained; the broadcast is now `completed`.
    Completed,
    /// A compliance re-check refused further sending; now `paused`.
    Paused { reason: String },
    /// A systemic provider outage; the broadcast is now `failed`.
    Failed { error: String },
}

impl BroadcastService {
    /// Dispatch one batch of pending recipients for a `sending` broadcast.
    ///
    /// Safe to call at any time for any broadcast: a tick against a broadcast
    /// in any other status reports `NotSending` and changes nothing.
    pub async fn dispatch_tick(
        &self,
        id: &BroadcastId,
    ) -> Result<TickOutcome, BroadcastError> {
        let broadcast = self.load(id).await?;
        if broadcast.status != BroadcastStatus::Sending {
            return Ok(TickOutcome::NotSending {
                status: broadcast.status,
            });
        }

        let counts = self.repository.status_counts(id).await?;
        if counts.is_drained() {
            return self.try_complete(id).await;
        }

        // Re-check quota and sender before claiming a batch.
        if let Err(e) = self
            .compliance
            .check_quota(&broadcast.org_id, counts.pending)
            .await
        {
            return self.pause_for(id, e.to_string()).await;
        }
        let sender = match self.compliance.active_sender(&broadcast.sender_id).await {
            Ok(sender) => sender,
            Err(e) => return self.pause_for(id, e.to_string()).await,
        };

        let batch = self
            .repository
            .pending_batch(id, self.config.batch_size)
            .await?;
        let policy = self.config.send_policy();
        let mut sent = 0u32;
        let mut failed = 0u32;

        for recipient in &batch {
            let text = render_template(
                &broadcast.message_template,
                &recipient.variables,
                recipient.contact_name.as_deref(),
            );

            match send_with_retry(
                self.provider.as_ref(),
                &sender.number,
                &recipient.phone_number,
                &text,
                policy,
            )
            .await
            {
                Ok(receipt) => {
                    let claimed = self
                        .repository
                        .mark_sent(&recipient.id, &receipt.delivery_id, Utc::now())
                        .await?;
                    if claimed {
                        sent += 1;
                    } else {
                        // The row stopped being pending under us; a cancel
                        // won the race. Stop dispatching this batch.
                        let broadcast = self.load(id).await?;
                        warn!(
                            broadcast_id = %id,
                            status = %broadcast.status,
                            "recipient claimed elsewhere mid-batch, ending tick"
                        );
                        if broadcast.status != BroadcastStatus::Sending {
                            return Ok(TickOutcome::NotSending {
                                status: broadcast.status,
                            });
                        }
                        break;
                    }
                }
                Err(e) if e.is_systemic() => {
                    error!(broadcast_id = %id, "provider outage: {e}");
                    self.repository
                        .transition_status(
                            id,
                            &[BroadcastStatus::Sending],
                            BroadcastStatus::Failed,
                            Utc::now(),
                        )
                        .await?;
                    return Ok(TickOutcome::Failed {
                        error: e.to_string(),
                    });
                }
                Err(e) => {
                    self.repository
                        .mark_failed(&recipient.id, &e.to_string(), Utc::now())
                        .await?;
                    failed += 1;
                }
            }
        }

        let counts = self.repository.status_counts(id).await?;
        if counts.is_drained() {
            return self.try_complete(id).await;
        }

        info!(
            broadcast_id = %id,
            sent,
            failed,
            remaining = counts.pending,
            "dispatched batch"
        );
        Ok(TickOutcome::Batch {
            sent,
            failed,
            remaining: counts.pending,
        })
    }

    async fn try_complete(&self, id: &BroadcastId) -> Result<TickOutcome, BroadcastError> {
        let won = self
            .repository
            .transition_status(
                id,
                &[BroadcastStatus::Sending],
                BroadcastStatus::Completed,
                Utc::now(),
            )
            .await?;
        if won {
            info!(broadcast_id = %id, "broadcast completed");
            Ok(TickOutcome::Completed)
        } else {
            let broadcast = self.load(id).await?;
            Ok(TickOutcome::NotSending {
                status: broadcast.status,
            })
        }
    }

    async fn pause_for(
        &self,
        id: &BroadcastId,
        reason: String,
    ) -> Result<TickOutcome, BroadcastError> {
        let won = self
            .repository
            .transition_status(
                id,
                &[BroadcastStatus::Sending],
                BroadcastStatus::Paused,
                Utc::now(),
            )
            .await?;
        if won {
            warn!(broadcast_id = %id, "pausing broadcast: {reason}");
            Ok(TickOutcome::Paused { reason })
        } else {
            let broadcast = self.load(id).await?;
            Ok(TickOutcome::NotSending {
                status: broadcast.status,
            })
        }
    }
}

/// Drive all broadcasts forever: start scheduled broadcasts when they come
/// due, then tick every `sending` broadcast. One broadcast's failure never
/// stops the others.
pub async fn dispatch_polling_loop(service: Arc<BroadcastService>) {
    let mut interval = interval(service.config.poll_interval);

    loop {
        interval.tick().await;

        if let Err(e) = poll_once(&service).await {
            error!("dispatch poll failed: {e}");
        }
    }
}

async fn poll_once(service: &BroadcastService) -> Result<(), BroadcastError> {
    for id in service.repository.due_scheduled(Utc::now()).await? {
        if let Err(e) = service.start_broadcast(&id).await {
            error!(broadcast_id = %id, "failed to start scheduled broadcast: {e}");
        }
    }

    for id in service.repository.active_sending().await? {
        if let Err(e) = service.dispatch_tick(&id).await {
            error!(broadcast_id = %id, "dispatch tick failed: {e}");
        }
    }

    Ok(())
}
