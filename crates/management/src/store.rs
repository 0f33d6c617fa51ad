//! In-memory campaign store backed by DashMap.
//!
//! Production: replace with the document store holding campaigns.
//! This provides the same API surface for development and testing.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::info;
use uuid::Uuid;

use campaign_core::store::CampaignStore;
use campaign_core::types::{Campaign, CampaignStats, CampaignStatus};
use campaign_core::{CampaignError, CampaignResult};

/// Thread-safe in-memory store for campaigns.
#[derive(Default)]
pub struct ManagementStore {
    campaigns: DashMap<Uuid, Campaign>,
}

impl ManagementStore {
    pub fn new() -> Self {
        info!("Management store initialized (in-memory, development mode)");
        Self::default()
    }

    /// Campaigns created by `owner`, newest first.
    pub fn list_campaigns(&self, owner: &str) -> Vec<Campaign> {
        let mut campaigns: Vec<Campaign> = self
            .campaigns
            .iter()
            .filter(|r| r.value().created_by == owner)
            .map(|r| r.value().clone())
            .collect();
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        campaigns
    }

    pub fn get_campaign(&self, id: Uuid) -> Option<Campaign> {
        self.campaigns.get(&id).map(|r| r.value().clone())
    }

    pub fn delete_campaign(&self, id: Uuid) -> bool {
        self.campaigns.remove(&id).is_some()
    }

    fn update<F>(&self, id: Uuid, apply: F) -> CampaignResult<()>
    where
        F: FnOnce(&mut Campaign),
    {
        let mut entry = self
            .campaigns
            .get_mut(&id)
            .ok_or_else(|| CampaignError::not_found("Campaign", id))?;
        apply(entry.value_mut());
        entry.value_mut().updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl CampaignStore for ManagementStore {
    async fn insert(&self, campaign: Campaign) -> CampaignResult<Campaign> {
        self.campaigns.insert(campaign.id, campaign.clone());
        Ok(campaign)
    }

    async fn get(&self, id: Uuid) -> CampaignResult<Option<Campaign>> {
        Ok(self.get_campaign(id))
    }

    async fn begin_processing(&self, id: Uuid, total_recipients: u64) -> CampaignResult<()> {
        self.update(id, |c| {
            c.status = CampaignStatus::Processing;
            c.stats.total_recipients = total_recipients;
        })
    }

    async fn complete(&self, id: Uuid, stats: CampaignStats) -> CampaignResult<()> {
        self.update(id, |c| {
            c.status = CampaignStatus::Completed;
            c.stats = stats;
        })
    }

    async fn mark_failed(&self, id: Uuid, reason: String) -> CampaignResult<()> {
        self.update(id, |c| {
            c.status = CampaignStatus::Failed;
            c.stats.failure_reason = Some(reason);
        })
    }

    async fn update_stats(&self, id: Uuid, stats: CampaignStats) -> CampaignResult<()> {
        self.update(id, |c| c.stats = stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campaign_core::types::MessageTemplate;
    use chrono::Duration;

    fn campaign(owner: &str, age_secs: i64) -> Campaign {
        let at = Utc::now() - Duration::seconds(age_secs);
        Campaign {
            id: Uuid::new_v4(),
            name: format!("{owner}-{age_secs}"),
            segment_id: Uuid::new_v4(),
            template: MessageTemplate {
                subject: "s".into(),
                body: "b".into(),
            },
            status: CampaignStatus::Draft,
            stats: CampaignStats::default(),
            created_by: owner.into(),
            created_at: at,
            updated_at: at,
        }
    }

    #[tokio::test]
    async fn test_list_is_owner_scoped_newest_first() {
        let store = ManagementStore::new();
        store.insert(campaign("ana", 30)).await.unwrap();
        let newest = store.insert(campaign("ana", 1)).await.unwrap();
        store.insert(campaign("bo", 5)).await.unwrap();

        let listed = store.list_campaigns("ana");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, newest.id);
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let store = ManagementStore::new();
        let c = store.insert(campaign("ana", 0)).await.unwrap();

        store.begin_processing(c.id, 12).await.unwrap();
        let processing = store.get_campaign(c.id).unwrap();
        assert_eq!(processing.status, CampaignStatus::Processing);
        assert_eq!(processing.stats.total_recipients, 12);

        store.mark_failed(c.id, "store unreachable".into()).await.unwrap();
        let failed = store.get_campaign(c.id).unwrap();
        assert_eq!(failed.status, CampaignStatus::Failed);
        assert_eq!(failed.stats.failure_reason.as_deref(), Some("store unreachable"));

        let err = store.complete(Uuid::new_v4(), CampaignStats::default()).await.unwrap_err();
        assert!(matches!(err, CampaignError::NotFound { .. }));
        assert!(store.delete_campaign(c.id));
        assert!(!store.delete_campaign(c.id));
    }
}
