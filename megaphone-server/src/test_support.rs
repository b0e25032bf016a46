//! Shared fakes and fixtures for unit tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use megaphone_core::phone::{normalize_number, E164};

use crate::broadcast::{
    Broadcast, BroadcastId, BroadcastStatus, CampaignId, OrgId, Recipient, RecipientId,
    RecipientStatus, SenderNumberId,
};
use crate::compliance::{
    CampaignComplianceService, ComplianceCheck, OptOutRegistry, QuotaDecision, QuotaService,
    SenderDirectory, SenderNumber, SenderStatus,
};
use crate::provider::{DeliveryReceipt, MessagingProvider, ProviderError};

pub fn number(digits: &str) -> E164 {
    normalize_number(digits).unwrap()
}

pub fn broadcast_fixture(status: BroadcastStatus, total: u32) -> Broadcast {
    let now = Utc::now();
    Broadcast {
        id: BroadcastId::new(),
        org_id: OrgId::new("org_test"),
        name: "Spring promo".to_string(),
        message_template: "Hi {{name}}, sale ends Friday".to_string(),
        sender_id: SenderNumberId::new("num_test"),
        campaign_id: None,
        status,
        scheduled_at: None,
        total_recipients: total,
        opted_out_skipped: 0,
        created_by: "user_test".to_string(),
        created_at: now,
        updated_at: now,
        completed_at: None,
    }
}

pub fn recipient_fixture(broadcast_id: &BroadcastId, digits: &str) -> Recipient {
    Recipient {
        id: RecipientId::new(),
        broadcast_id: *broadcast_id,
        phone_number: number(digits),
        contact_name: None,
        variables: BTreeMap::new(),
        status: RecipientStatus::Pending,
        skip_reason: None,
        delivery_id: None,
        error: None,
        sent_at: None,
        failed_at: None,
    }
}

/// Quota service whose answer can be flipped mid-test.
pub struct FakeQuota {
    decision: Mutex<QuotaDecision>,
}

impl FakeQuota {
    pub fn allowing() -> Self {
        Self {
            decision: Mutex::new(QuotaDecision::allow()),
        }
    }

    pub fn deny(&self, reason: &str, requires_upgrade: bool) {
        *self.decision.lock().unwrap() = QuotaDecision::deny(reason, requires_upgrade);
    }

    pub fn allow(&self) {
        *self.decision.lock().unwrap() = QuotaDecision::allow();
    }
}

#[async_trait]
impl QuotaService for FakeQuota {
    async fn can_send_broadcast(&self, _org_id: &OrgId, _recipient_count: u32) -> QuotaDecision {
        self.decision.lock().unwrap().clone()
    }
}

pub struct FakeCampaigns {
    check: ComplianceCheck,
}

impl FakeCampaigns {
    pub fn approved(campaign_id: &str) -> Self {
        Self {
            check: ComplianceCheck {
                valid: true,
                error: None,
                campaign_id: Some(CampaignId::new(campaign_id)),
            },
        }
    }

    pub fn unapproved(error: &str) -> Self {
        Self {
            check: ComplianceCheck {
                valid: false,
                error: Some(error.to_string()),
                campaign_id: None,
            },
        }
    }
}

#[async_trait]
impl CampaignComplianceService for FakeCampaigns {
    async fn validate_compliance(&self, _sender_id: &SenderNumberId) -> ComplianceCheck {
        self.check.clone()
    }
}

#[derive(Default)]
pub struct FakeOptOuts {
    opted_out: Mutex<HashSet<E164>>,
}

impl FakeOptOuts {
    pub fn add(&self, digits: &str) {
        self.opted_out.lock().unwrap().insert(number(digits));
    }
}

#[async_trait]
impl OptOutRegistry for FakeOptOuts {
    async fn list_opted_out(&self, _org_id: &OrgId, numbers: &[E164]) -> HashSet<E164> {
        let opted_out = self.opted_out.lock().unwrap();
        numbers
            .iter()
            .filter(|n| opted_out.contains(n))
            .cloned()
            .collect()
    }
}

#[derive(Default)]
pub struct FakeSenders {
    senders: Mutex<HashMap<SenderNumberId, SenderNumber>>,
}

impl FakeSenders {
    pub fn add_active(&self, id: &str, digits: &str) -> SenderNumberId {
        self.add(id, digits, SenderStatus::Active)
    }

    pub fn add(&self, id: &str, digits: &str, status: SenderStatus) -> SenderNumberId {
        let sender_id = SenderNumberId::new(id);
        self.senders.lock().unwrap().insert(
            sender_id.clone(),
            SenderNumber {
                id: sender_id.clone(),
                number: number(digits),
                status,
            },
        );
        sender_id
    }

    pub fn set_status(&self, id: &SenderNumberId, status: SenderStatus) {
        if let Some(sender) = self.senders.lock().unwrap().get_mut(id) {
            sender.status = status;
        }
    }
}

#[async_trait]
impl SenderDirectory for FakeSenders {
    async fn get_sender(&self, sender_id: &SenderNumberId) -> Option<SenderNumber> {
        self.senders.lock().unwrap().get(sender_id).cloned()
    }
}

/// Provider that records every send and can be programmed to fail.
#[derive(Default)]
pub struct FakeProvider {
    sent: Mutex<Vec<(E164, String)>>,
    failing: Mutex<HashMap<E164, ProviderError>>,
    outage: Mutex<Option<String>>,
}

impl FakeProvider {
    /// Every recipient succeeds.
    pub fn delivering() -> Self {
        Self::default()
    }

    /// Make sends to `digits` fail with the given error.
    pub fn fail_number(&self, digits: &str, error: ProviderError) {
        self.failing.lock().unwrap().insert(number(digits), error);
    }

    /// Make every subsequent send fail systemically.
    pub fn start_outage(&self, message: &str) {
        *self.outage.lock().unwrap() = Some(message.to_string());
    }

    pub fn end_outage(&self) {
        *self.outage.lock().unwrap() = None;
    }

    /// Numbers and rendered texts of successful sends, in order.
    pub fn sent(&self) -> Vec<(E164, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl MessagingProvider for FakeProvider {
    async fn send(
        &self,
        _from: &E164,
        to: &E164,
        text: &str,
    ) -> Result<DeliveryReceipt, ProviderError> {
        if let Some(message) = self.outage.lock().unwrap().clone() {
            return Err(ProviderError::Outage { message });
        }
        if let Some(error) = self.failing.lock().unwrap().get(to) {
            return Err(error.clone());
        }

        let mut sent = self.sent.lock().unwrap();
        sent.push((to.clone(), text.to_string()));
        Ok(DeliveryReceipt {
            delivery_id: format!("msg_{}", sent.len()),
            provider_status: "queued".to_string(),
        })
    }
}
