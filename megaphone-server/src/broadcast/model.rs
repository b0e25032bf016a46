//! Records and identifier newtypes for broadcasts and their recipients.
//!
//! Newtypes keep the many string- and UUID-shaped identifiers from being
//! mixed up at call sites. Statuses round-trip through `as_str`/`parse` for
//! persistence; an unknown stored status is surfaced as corruption by the
//! repository rather than silently defaulted.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use megaphone_core::phone::E164;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Newtype for a broadcast's unique identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BroadcastId(pub Uuid);

impl BroadcastId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(Self)
    }
}

impl Default for BroadcastId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BroadcastId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Newtype for a recipient row's unique identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipientId(pub Uuid);

impl RecipientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(Self)
    }
}

impl Default for RecipientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Newtype for an organization (tenant) identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrgId(pub String);

impl OrgId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Newtype for a sending phone number's identifier in the platform.
///
/// This is the platform's handle for a provisioned number, not the number
/// itself; the `SenderDirectory` resolves it to an E.164 number and its
/// operational status.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SenderNumberId(pub String);

impl SenderNumberId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SenderNumberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Newtype for a 10DLC carrier-compliance campaign reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CampaignId(pub String);

impl CampaignId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CampaignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastStatus {
    Draft,
    Scheduled,
    Sending,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl BroadcastStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Sending => "sending",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(Self::Draft),
            "scheduled" => Some(Self::Scheduled),
            "sending" => Some(Self::Sending),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

impl fmt::Display for BroadcastStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery status of a single recipient.
///
/// Transitions are monotonic: `pending` moves to exactly one of the other
/// three states and never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientStatus {
    Pending,
    Sent,
    Failed,
    Skipped,
}

impl RecipientStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

impl fmt::Display for RecipientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a recipient was skipped rather than sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    OptedOut,
    BroadcastCancelled,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OptedOut => "opted_out",
            Self::BroadcastCancelled => "broadcast_cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "opted_out" => Some(Self::OptedOut),
            "broadcast_cancelled" => Some(Self::BroadcastCancelled),
            _ => None,
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A broadcast campaign: one message template fanned out to a recipient list.
///
/// `total_recipients` is fixed at creation and always equals the number of
/// recipient rows, whatever their status. `opted_out_skipped` counts the
/// rows created directly as skipped because the number was opted out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Broadcast {
    pub id: BroadcastId,
    pub org_id: OrgId,
    pub name: String,
    pub message_template: String,
    pub sender_id: SenderNumberId,
    pub campaign_id: Option<CampaignId>,
    pub status: BroadcastStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub total_recipients: u32,
    pub opted_out_skipped: u32,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One recipient row of a broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: RecipientId,
    pub broadcast_id: BroadcastId,
    pub phone_number: E164,
    pub contact_name: Option<String>,
    /// Template variables. Closed key set per template; `name` is reserved
    /// and falls back to `contact_name` at render time.
    pub variables: BTreeMap<String, String>,
    pub status: RecipientStatus,
    pub skip_reason: Option<SkipReason>,
    /// Provider delivery identifier, recorded when the send succeeded.
    pub delivery_id: Option<String>,
    /// Truncated provider error, recorded when the send failed.
    pub error: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_status_round_trip() {
        for status in [
            BroadcastStatus::Draft,
            BroadcastStatus::Scheduled,
            BroadcastStatus::Sending,
            BroadcastStatus::Paused,
            BroadcastStatus::Completed,
            BroadcastStatus::Cancelled,
            BroadcastStatus::Failed,
        ] {
            assert_eq!(BroadcastStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(BroadcastStatus::parse("bogus"), None);
    }

    #[test]
    fn test_recipient_status_round_trip() {
        for status in [
            RecipientStatus::Pending,
            RecipientStatus::Sent,
            RecipientStatus::Failed,
            RecipientStatus::Skipped,
        ] {
            assert_eq!(RecipientStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RecipientStatus::parse(""), None);
    }

    #[test]
    fn test_skip_reason_round_trip() {
        assert_eq!(SkipReason::parse("opted_out"), Some(SkipReason::OptedOut));
        assert_eq!(
            SkipReason::parse("broadcast_cancelled"),
            Some(SkipReason::BroadcastCancelled)
        );
        assert_eq!(SkipReason::parse("other"), None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(BroadcastStatus::Completed.is_terminal());
        assert!(BroadcastStatus::Cancelled.is_terminal());
        assert!(BroadcastStatus::Failed.is_terminal());
        assert!(!BroadcastStatus::Sending.is_terminal());
        assert!(!BroadcastStatus::Paused.is_terminal());
        assert!(!BroadcastStatus::Draft.is_terminal());
        assert!(!BroadcastStatus::Scheduled.is_terminal());
    }
}
