pub mod broadcast;
pub mod compliance;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod provider;
pub mod repository;
pub mod service;

#[cfg(test)]
pub(crate) mod test_support;

pub use broadcast::{
    Broadcast, BroadcastId, BroadcastStatus, CampaignId, OrgId, ProgressBreakdown, Recipient,
    RecipientId, RecipientStatus, SenderNumberId, SkipReason,
};
pub use config::DispatchConfig;
pub use dispatcher::{dispatch_polling_loop, TickOutcome};
pub use error::BroadcastError;
pub use service::{
    BroadcastDetails, BroadcastService, CreateStats, CreatedBroadcast, NewBroadcast,
};
