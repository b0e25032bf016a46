//! Compliance gate: opt-out filtering, quota checks, and 10DLC campaign
//! approval.
//!
//! The three checks are independent and all must pass before a broadcast is
//! created. The quota check is repeated by the dispatcher before and after
//! every batch because a long-running broadcast can cross a billing period;
//! the sender's operational status is re-checked at resume time.
//!
//! The collaborator traits are infallible by design: an implementation that
//! cannot reach its backing service should fail closed (deny quota, report
//! the campaign invalid) rather than error.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use megaphone_core::phone::E164;

use crate::broadcast::{CampaignId, OrgId, SenderNumberId};
use crate::error::ComplianceError;

/// Answer from the per-organization usage quota service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaDecision {
    pub can_send: bool,
    pub reason: Option<String>,
    pub requires_upgrade: bool,
}

impl QuotaDecision {
    pub fn allow() -> Self {
        Self {
            can_send: true,
            reason: None,
            requires_upgrade: false,
        }
    }

    pub fn deny(reason: impl Into<String>, requires_upgrade: bool) -> Self {
        Self {
            can_send: false,
            reason: Some(reason.into()),
            requires_upgrade,
        }
    }
}

/// Answer from the carrier-compliance (10DLC) service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplianceCheck {
    pub valid: bool,
    pub error: Option<String>,
    pub campaign_id: Option<CampaignId>,
}

/// Operational status of a provisioned sending number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderStatus {
    Active,
    Inactive,
    Suspended,
}

impl SenderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Suspended => "suspended",
        }
    }
}

impl fmt::Display for SenderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provisioned sending number as known to the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderNumber {
    pub id: SenderNumberId,
    pub number: E164,
    pub status: SenderStatus,
}

#[async_trait]
pub trait QuotaService: Send + Sync {
    async fn can_send_broadcast(&self, org_id: &OrgId, recipient_count: u32) -> QuotaDecision;
}

#[async_trait]
pub trait CampaignComplianceService: Send + Sync {
    async fn validate_compliance(&self, sender_id: &SenderNumberId) -> ComplianceCheck;
}

#[async_trait]
pub trait OptOutRegistry: Send + Sync {
    /// Which of `numbers` have opted out for this organization.
    async fn list_opted_out(&self, org_id: &OrgId, numbers: &[E164]) -> HashSet<E164>;
}

#[async_trait]
pub trait SenderDirectory: Send + Sync {
    async fn get_sender(&self, sender_id: &SenderNumberId) -> Option<SenderNumber>;
}

/// What creation-time compliance clearance yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreationClearance {
    pub sender: SenderNumber,
    pub campaign_id: Option<CampaignId>,
}

/// Bundles the compliance collaborators behind one gate.
pub struct ComplianceGate {
    quota: Arc<dyn QuotaService>,
    campaigns: Arc<dyn CampaignComplianceService>,
    opt_outs: Arc<dyn OptOutRegistry>,
    senders: Arc<dyn SenderDirectory>,
}

impl ComplianceGate {
    pub fn new(
        quota: Arc<dyn QuotaService>,
        campaigns: Arc<dyn CampaignComplianceService>,
        opt_outs: Arc<dyn OptOutRegistry>,
        senders: Arc<dyn SenderDirectory>,
    ) -> Self {
        Self {
            quota,
            campaigns,
            opt_outs,
            senders,
        }
    }

    /// Run every creation-time check: sender active, campaign approved,
    /// quota available. Any failure blocks creation entirely.
    pub async fn clear_for_creation(
        &self,
        org_id: &OrgId,
        sender_id: &SenderNumberId,
        recipient_count: u32,
    ) -> Result<CreationClearance, ComplianceError> {
        let sender = self.active_sender(sender_id).await?;

        let check = self.campaigns.validate_compliance(sender_id).await;
        if !check.valid {
            return Err(ComplianceError::CampaignNotApproved { error: check.error });
        }

        self.check_quota(org_id, recipient_count).await?;

        Ok(CreationClearance {
            sender,
            campaign_id: check.campaign_id,
        })
    }

    /// Look up the sender and require it to be operationally active.
    pub async fn active_sender(
        &self,
        sender_id: &SenderNumberId,
    ) -> Result<SenderNumber, ComplianceError> {
        let sender = self
            .senders
            .get_sender(sender_id)
            .await
            .ok_or_else(|| ComplianceError::SenderNotFound {
                sender_id: sender_id.clone(),
            })?;

        if sender.status != SenderStatus::Active {
            return Err(ComplianceError::SenderInactive {
                sender_id: sender_id.clone(),
                status: sender.status.to_string(),
            });
        }

        Ok(sender)
    }

    /// Quota check, shared by creation and the dispatcher's re-checks.
    pub async fn check_quota(
        &self,
        org_id: &OrgId,
        recipient_count: u32,
    ) -> Result<(), ComplianceError> {
        let decision = self.quota.can_send_broadcast(org_id, recipient_count).await;
        if decision.can_send {
            Ok(())
        } else {
            Err(ComplianceError::QuotaExceeded {
                reason: decision.reason,
                requires_upgrade: decision.requires_upgrade,
            })
        }
    }

    /// Which of `numbers` must be created as skipped/opted-out.
    pub async fn opted_out(&self, org_id: &OrgId, numbers: &[E164]) -> HashSet<E164> {
        self.opt_outs.list_opted_out(org_id, numbers).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeCampaigns, FakeOptOuts, FakeQuota, FakeSenders};

    fn gate(
        quota: Arc<FakeQuota>,
        campaigns: Arc<FakeCampaigns>,
        opt_outs: Arc<FakeOptOuts>,
        senders: Arc<FakeSenders>,
    ) -> ComplianceGate {
        ComplianceGate::new(quota, campaigns, opt_outs, senders)
    }

    fn number(digits: &str) -> E164 {
        megaphone_core::phone::normalize_number(digits).unwrap()
    }

    #[tokio::test]
    async fn test_clearance_passes_all_checks() {
        let senders = Arc::new(FakeSenders::default());
        let sender_id = senders.add_active("num_1", "6135550000");
        let campaigns = Arc::new(FakeCampaigns::approved("cmp_abc"));
        let gate = gate(
            Arc::new(FakeQuota::allowing()),
            campaigns,
            Arc::new(FakeOptOuts::default()),
            senders,
        );

        let clearance = gate
            .clear_for_creation(&OrgId::new("org_1"), &sender_id, 100)
            .await
            .unwrap();
        assert_eq!(clearance.campaign_id, Some(CampaignId::new("cmp_abc")));
        assert_eq!(clearance.sender.number, number("6135550000"));
    }

    #[tokio::test]
    async fn test_unapproved_campaign_blocks_creation() {
        let senders = Arc::new(FakeSenders::default());
        let sender_id = senders.add_active("num_1", "6135550000");
        let gate = gate(
            Arc::new(FakeQuota::allowing()),
            Arc::new(FakeCampaigns::unapproved("pending review")),
            Arc::new(FakeOptOuts::default()),
            senders,
        );

        let err = gate
            .clear_for_creation(&OrgId::new("org_1"), &sender_id, 10)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "campaign_not_approved");
    }

    #[tokio::test]
    async fn test_quota_denial_blocks_creation() {
        let senders = Arc::new(FakeSenders::default());
        let sender_id = senders.add_active("num_1", "6135550000");
        let quota = Arc::new(FakeQuota::allowing());
        quota.deny("monthly limit reached", true);
        let gate = gate(
            quota,
            Arc::new(FakeCampaigns::approved("cmp_abc")),
            Arc::new(FakeOptOuts::default()),
            senders,
        );

        let err = gate
            .clear_for_creation(&OrgId::new("org_1"), &sender_id, 10)
            .await
            .unwrap_err();
        match err {
            ComplianceError::QuotaExceeded {
                reason,
                requires_upgrade,
            } => {
                assert_eq!(reason.as_deref(), Some("monthly limit reached"));
                assert!(requires_upgrade);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_inactive_sender_blocks() {
        let senders = Arc::new(FakeSenders::default());
        let sender_id = senders.add("num_1", "6135550000", SenderStatus::Suspended);
        let gate = gate(
            Arc::new(FakeQuota::allowing()),
            Arc::new(FakeCampaigns::approved("cmp_abc")),
            Arc::new(FakeOptOuts::default()),
            senders,
        );

        let err = gate.active_sender(&sender_id).await.unwrap_err();
        assert_eq!(err.code(), "sender_inactive");
        assert!(err.to_string().contains("suspended"));
    }

    #[tokio::test]
    async fn test_unknown_sender_blocks() {
        let gate = gate(
            Arc::new(FakeQuota::allowing()),
            Arc::new(FakeCampaigns::approved("cmp_abc")),
            Arc::new(FakeOptOuts::default()),
            Arc::new(FakeSenders::default()),
        );

        let err = gate
            .active_sender(&SenderNumberId::new("missing"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "sender_not_found");
    }

    #[tokio::test]
    async fn test_opted_out_filters_to_requested_numbers() {
        let opt_outs = Arc::new(FakeOptOuts::default());
        opt_outs.add("6135550001");
        opt_outs.add("6135559999");
        let gate = gate(
            Arc::new(FakeQuota::allowing()),
            Arc::new(FakeCampaigns::approved("cmp_abc")),
            opt_outs,
            Arc::new(FakeSenders::default()),
        );

        let asked = vec![number("6135550001"), number("6135550002")];
        let opted = gate.opted_out(&OrgId::new("org_1"), &asked).await;
        assert!(opted.contains(&number("6135550001")));
        assert!(!opted.contains(&number("6135550002")));
        // Numbers we did not ask about are not reported.
        assert!(!opted.contains(&number("6135559999")));
    }
}
