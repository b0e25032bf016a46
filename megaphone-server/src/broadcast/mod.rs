//! Broadcast domain model and lifecycle state machine.
//!
//! - `model`: records and identifier newtypes
//! - `transition`: the legal status-transition table and its guards
//! - `progress`: per-status recipient counts

mod model;
mod progress;
mod transition;

pub use model::{
    Broadcast, BroadcastId, BroadcastStatus, CampaignId, OrgId, Recipient, RecipientId,
    RecipientStatus, SenderNumberId, SkipReason,
};
pub use progress::ProgressBreakdown;
pub use transition::{can_delete, can_edit, check_transition, is_legal_transition};
