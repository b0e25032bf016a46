//! Status-count breakdown for a broadcast's recipients.

use serde::{Deserialize, Serialize};

use super::model::RecipientStatus;

/// Recipient counts grouped by status.
///
/// For every broadcast, `total()` equals the broadcast's `total_recipients`
/// after every operation; the repository tests assert this invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProgressBreakdown {
    pub pending: u32,
    pub sent: u32,
    pub failed: u32,
    pub skipped: u32,
}

impl ProgressBreakdown {
    pub fn total(&self) -> u32 {
        self.pending + self.sent + self.failed + self.skipped
    }

    /// True once no recipient is left to dispatch.
    pub fn is_drained(&self) -> bool {
        self.pending == 0
    }

    pub fn count(&self, status: RecipientStatus) -> u32 {
        match status {
            RecipientStatus::Pending => self.pending,
            RecipientStatus::Sent => self.sent,
            RecipientStatus::Failed => self.failed,
            RecipientStatus::Skipped => self.skipped,
        }
    }

    pub fn add(&mut self, status: RecipientStatus) {
        match status {
            RecipientStatus::Pending => self.pending += 1,
            RecipientStatus::Sent => self.sent += 1,
            RecipientStatus::Failed => self.failed += 1,
            RecipientStatus::Skipped => self.skipped += 1,
        }
    }
}
