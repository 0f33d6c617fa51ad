//! Persistence contracts for campaigns and delivery logs.
//!
//! The delivery simulator and the campaign service only talk to these
//! traits; in-memory implementations live next to their owners
//! (`campaign-management` for campaigns, `campaign-delivery` for logs).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::CampaignResult;
use crate::types::{Campaign, CampaignStats, CommunicationLog, DeliveryStatus, TransitionOutcome};

#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn insert(&self, campaign: Campaign) -> CampaignResult<Campaign>;

    async fn get(&self, id: Uuid) -> CampaignResult<Option<Campaign>>;

    /// Move the campaign to `processing` and pin `total_recipients`.
    async fn begin_processing(&self, id: Uuid, total_recipients: u64) -> CampaignResult<()>;

    /// Replace the stats snapshot and mark the campaign `completed`.
    async fn complete(&self, id: Uuid, stats: CampaignStats) -> CampaignResult<()>;

    /// Mark the campaign `failed`, recording `reason` in its stats.
    async fn mark_failed(&self, id: Uuid, reason: String) -> CampaignResult<()>;

    /// Replace the stats snapshot without touching the status.
    async fn update_stats(&self, id: Uuid, stats: CampaignStats) -> CampaignResult<()>;
}

/// Filter for delivery log lookups. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub campaign_id: Option<Uuid>,
    pub customer_id: Option<String>,
    pub status: Option<DeliveryStatus>,
}

impl LogFilter {
    pub fn campaign(campaign_id: Uuid) -> Self {
        Self {
            campaign_id: Some(campaign_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, log: &CommunicationLog) -> bool {
        self.campaign_id.map_or(true, |id| log.campaign_id == id)
            && self
                .customer_id
                .as_deref()
                .map_or(true, |id| log.customer_id == id)
            && self.status.map_or(true, |s| log.status == s)
    }
}

#[async_trait]
pub trait DeliveryLogStore: Send + Sync {
    /// Persist a new record. Fails if its `message_id` is already taken.
    async fn create(&self, log: CommunicationLog) -> CampaignResult<CommunicationLog>;

    async fn find(&self, filter: &LogFilter) -> CampaignResult<Vec<CommunicationLog>>;

    async fn find_by_message_id(&self, message_id: &str) -> CampaignResult<Option<CommunicationLog>>;

    /// Apply a funnel transition in place (see [`CommunicationLog::advance_to`]).
    async fn advance(
        &self,
        id: Uuid,
        status: DeliveryStatus,
        at: DateTime<Utc>,
    ) -> CampaignResult<TransitionOutcome>;
}
