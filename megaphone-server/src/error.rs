//! Error taxonomy for broadcast operations.
//!
//! Callers always receive a machine-readable code (`code()`) alongside the
//! human-readable `Display` text. Per-recipient provider failures never
//! surface here: they are recorded on the recipient row and visible only in
//! aggregate counts. `ProviderError` appears at the broadcast level only
//! when it indicates a systemic outage.

use std::fmt;

use crate::broadcast::{BroadcastId, BroadcastStatus, SenderNumberId};
use crate::provider::ProviderError;
use crate::repository::RepositoryError;

/// Malformed or missing input; reported to the caller, no state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Normalization and deduplication left no valid recipient.
    NoValidRecipients { invalid_numbers: Vec<String> },
    MissingName,
    MissingTemplate,
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoValidRecipients { .. } => "no_valid_recipients",
            Self::MissingName => "missing_name",
            Self::MissingTemplate => "missing_template",
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoValidRecipients { invalid_numbers } => {
                if invalid_numbers.is_empty() {
                    write!(f, "no valid recipients")
                } else {
                    write!(
                        f,
                        "no valid recipients ({} invalid number(s))",
                        invalid_numbers.len()
                    )
                }
            }
            Self::MissingName => write!(f, "broadcast name must not be empty"),
            Self::MissingTemplate => write!(f, "message template must not be empty"),
        }
    }
}

/// A compliance check refused the operation.
///
/// Blocks creation, or pauses an in-flight broadcast when raised by the
/// dispatcher's re-checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComplianceError {
    QuotaExceeded {
        reason: Option<String>,
        requires_upgrade: bool,
    },
    CampaignNotApproved {
        error: Option<String>,
    },
    SenderNotFound {
        sender_id: SenderNumberId,
    },
    SenderInactive {
        sender_id: SenderNumberId,
        status: String,
    },
}

impl ComplianceError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::CampaignNotApproved { .. } => "campaign_not_approved",
            Self::SenderNotFound { .. } => "sender_not_found",
            Self::SenderInactive { .. } => "sender_inactive",
        }
    }
}

impl fmt::Display for ComplianceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QuotaExceeded {
                reason,
                requires_upgrade,
            } => {
                match reason {
                    Some(reason) => write!(f, "message quota exceeded: {reason}")?,
                    None => write!(f, "message quota exceeded")?,
                }
                if *requires_upgrade {
                    write!(f, " (plan upgrade required)")?;
                }
                Ok(())
            }
            Self::CampaignNotApproved { error } => match error {
                Some(error) => write!(f, "carrier campaign not approved: {error}"),
                None => write!(f, "carrier campaign not approved"),
            },
            Self::SenderNotFound { sender_id } => {
                write!(f, "sending number {sender_id} not found")
            }
            Self::SenderInactive { sender_id, status } => {
                write!(f, "sending number {sender_id} is {status}, not active")
            }
        }
    }
}

/// An operation was attempted from a status that does not permit it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateError {
    /// A transition outside the legal table.
    Transition {
        current: BroadcastStatus,
        target: BroadcastStatus,
    },
    /// Edits are only allowed in `draft` or `scheduled`.
    EditNotAllowed { current: BroadcastStatus },
    /// Deletion is only allowed in `draft`, `scheduled`, `cancelled`, `failed`.
    DeleteNotAllowed { current: BroadcastStatus },
}

impl StateError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transition { .. } => "illegal_transition",
            Self::EditNotAllowed { .. } => "edit_not_allowed",
            Self::DeleteNotAllowed { .. } => "delete_not_allowed",
        }
    }
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transition { current, target } => {
                write!(f, "cannot transition broadcast from {current} to {target}")
            }
            Self::EditNotAllowed { current } => {
                write!(f, "cannot edit broadcast in status {current}")
            }
            Self::DeleteNotAllowed { current } => {
                write!(f, "cannot delete broadcast in status {current}")
            }
        }
    }
}

/// Top-level error for every broadcast operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastError {
    NotFound(BroadcastId),
    Validation(ValidationError),
    Compliance(ComplianceError),
    State(StateError),
    /// Systemic provider outage observed by the dispatcher.
    Provider(ProviderError),
    Persistence(RepositoryError),
}

impl BroadcastError {
    /// Stable machine-readable code for API responses and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "broadcast_not_found",
            Self::Validation(e) => e.code(),
            Self::Compliance(e) => e.code(),
            Self::State(e) => e.code(),
            Self::Provider(_) => "provider_outage",
            Self::Persistence(_) => "persistence_error",
        }
    }
}

impl fmt::Display for BroadcastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "broadcast {id} not found"),
            Self::Validation(e) => write!(f, "{e}"),
            Self::Compliance(e) => write!(f, "{e}"),
            Self::State(e) => write!(f, "{e}"),
            Self::Provider(e) => write!(f, "provider outage: {e}"),
            Self::Persistence(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for BroadcastError {}

impl From<ValidationError> for BroadcastError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e)
    }
}

impl From<ComplianceError> for BroadcastError {
    fn from(e: ComplianceError) -> Self {
        Self::Compliance(e)
    }
}

impl From<StateError> for BroadcastError {
    fn from(e: StateError) -> Self {
        Self::State(e)
    }
}

impl From<RepositoryError> for BroadcastError {
    fn from(e: RepositoryError) -> Self {
        Self::Persistence(e)
    }
}
