//! Campaign service — the operator-facing surface over segmentation,
//! campaign persistence and the delivery simulator.
//!
//! Every operation is scoped to an owner: segments and campaigns owned by
//! someone else behave as if they did not exist.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use campaign_core::event_bus::TracingSink;
use campaign_core::store::{CampaignStore, LogFilter};
use campaign_core::types::{Campaign, CampaignStats, CampaignStatus, TransitionOutcome};
use campaign_core::{AppConfig, CampaignError, CampaignResult};
use campaign_delivery::{DeliverySimulator, InMemoryLogStore};
use campaign_segmentation::{
    CustomerDirectory, NewSegment, RuleSet, Segment, SegmentPreview, SegmentationEngine,
};

use crate::models::{CampaignSummary, CommunicationLogEntry, CreateCampaignRequest, DeliveryReceipt};
use crate::store::ManagementStore;

pub struct CampaignService {
    segmentation: Arc<SegmentationEngine>,
    campaigns: Arc<ManagementStore>,
    simulator: Arc<DeliverySimulator>,
    /// Running dispatches; each task removes its own entry when it ends.
    dispatches: Arc<DashMap<Uuid, JoinHandle<()>>>,
}

impl CampaignService {
    /// Wire a service over `directory` with in-memory campaign and log stores.
    pub fn new(config: &AppConfig, directory: Arc<dyn CustomerDirectory>) -> CampaignResult<Self> {
        config.delivery.validate()?;
        let segmentation = Arc::new(SegmentationEngine::new(directory, config.segmentation.clone()));
        let campaigns = Arc::new(ManagementStore::new());
        let simulator = DeliverySimulator::new(
            config.delivery.clone(),
            campaigns.clone(),
            Arc::new(InMemoryLogStore::new()),
        )?
        .with_event_sink(Arc::new(TracingSink))
        .with_node_id(config.node_id.clone());
        info!(node_id = %config.node_id, "Campaign service initialized");
        Ok(Self::with_parts(segmentation, campaigns, Arc::new(simulator)))
    }

    pub fn with_parts(
        segmentation: Arc<SegmentationEngine>,
        campaigns: Arc<ManagementStore>,
        simulator: Arc<DeliverySimulator>,
    ) -> Self {
        Self {
            segmentation,
            campaigns,
            simulator,
            dispatches: Arc::new(DashMap::new()),
        }
    }

    pub fn segmentation(&self) -> &Arc<SegmentationEngine> {
        &self.segmentation
    }

    pub fn simulator(&self) -> &Arc<DeliverySimulator> {
        &self.simulator
    }

    // ─── Segments ──────────────────────────────────────────────────────────

    pub async fn create_segment(&self, request: NewSegment, owner: &str) -> CampaignResult<Segment> {
        self.segmentation.create_segment(request, owner, Utc::now()).await
    }

    pub async fn estimate_segment(&self, rules: &RuleSet) -> CampaignResult<u64> {
        self.segmentation.estimate(rules, Utc::now()).await
    }

    pub async fn preview_segment(&self, rules: &RuleSet) -> CampaignResult<SegmentPreview> {
        self.segmentation.preview(rules, Utc::now()).await
    }

    pub fn list_segments(&self, owner: &str) -> Vec<Segment> {
        self.segmentation.list_segments(owner)
    }

    // ─── Campaigns ─────────────────────────────────────────────────────────

    /// Create a campaign against one of the owner's segments and start its
    /// dispatch in the background. The recipient list is resolved here, so
    /// `total_recipients` is the exact match count at creation time.
    pub async fn create_campaign(
        &self,
        request: CreateCampaignRequest,
        owner: &str,
    ) -> CampaignResult<Campaign> {
        let (segment_id, template) = request.validate()?;
        let segment = self.segmentation.owned_segment(&segment_id, owner)?;
        segment.rules.validate()?;

        let now = Utc::now();
        let recipients = self.segmentation.matching_customers(&segment, now).await?;
        if recipients.is_empty() {
            return Err(CampaignError::ZeroMatch { segment_id });
        }

        let campaign = Campaign {
            id: Uuid::new_v4(),
            name: request.name,
            segment_id,
            template,
            status: CampaignStatus::Draft,
            stats: CampaignStats {
                total_recipients: recipients.len() as u64,
                ..Default::default()
            },
            created_by: owner.to_string(),
            created_at: now,
            updated_at: now,
        };
        let campaign = self.campaigns.insert(campaign).await?;
        metrics::counter!("management.campaigns.created").increment(1);
        info!(
            campaign_id = %campaign.id,
            segment_id = %segment_id,
            recipients = recipients.len(),
            "Campaign created, dispatch started"
        );

        let simulator = Arc::clone(&self.simulator);
        let dispatches = Arc::clone(&self.dispatches);
        let campaign_id = campaign.id;
        // The task starts only once its handle is registered, so its own
        // removal can never run ahead of the insert.
        let (registered_tx, registered_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            if registered_rx.await.is_ok() {
                simulator.dispatch(campaign_id, recipients).await;
            }
            dispatches.remove(&campaign_id);
        });
        self.dispatches.insert(campaign_id, handle);
        let _ = registered_tx.send(());

        Ok(campaign)
    }

    /// Number of dispatches still running.
    pub fn active_dispatches(&self) -> usize {
        self.dispatches.len()
    }

    /// Wait for a campaign's background dispatch to finish. Returns
    /// immediately when none is running.
    pub async fn wait_for_dispatch(&self, campaign_id: Uuid) -> CampaignResult<()> {
        let Some((_, handle)) = self.dispatches.remove(&campaign_id) else {
            return Ok(());
        };
        handle
            .await
            .map_err(|e| CampaignError::Internal(anyhow::anyhow!("dispatch task for {campaign_id}: {e}")))
    }

    /// The owner's campaigns, newest first, each with its segment's name
    /// and estimated size.
    pub fn list_campaigns(&self, owner: &str) -> Vec<CampaignSummary> {
        self.campaigns
            .list_campaigns(owner)
            .into_iter()
            .map(|campaign| {
                let segment = self.segmentation.get_segment(&campaign.segment_id);
                CampaignSummary {
                    segment_name: segment.as_ref().map(|s| s.name.clone()),
                    segment_estimated_count: segment.map(|s| s.estimated_count),
                    campaign,
                }
            })
            .collect()
    }

    pub fn get_campaign(&self, campaign_id: Uuid, owner: &str) -> CampaignResult<Campaign> {
        self.campaigns
            .get_campaign(campaign_id)
            .filter(|c| c.created_by == owner)
            .ok_or_else(|| CampaignError::not_found("Campaign", campaign_id))
    }

    /// Delivery logs of a campaign, newest first, each joined with its
    /// customer record.
    pub async fn communication_log(
        &self,
        campaign_id: Uuid,
        owner: &str,
    ) -> CampaignResult<Vec<CommunicationLogEntry>> {
        self.get_campaign(campaign_id, owner)?;
        let mut logs = self
            .simulator
            .logs()
            .find(&LogFilter::campaign(campaign_id))
            .await?;
        logs.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));

        let directory = self.segmentation.directory();
        let mut entries = Vec::with_capacity(logs.len());
        for log in logs {
            let customer = directory.get(&log.customer_id).await?;
            entries.push(CommunicationLogEntry { log, customer });
        }
        Ok(entries)
    }

    pub async fn delivery_receipt(&self, receipt: DeliveryReceipt) -> CampaignResult<TransitionOutcome> {
        self.simulator
            .record_delivery_event(&receipt.message_id, receipt.status, receipt.timestamp)
            .await
    }

    /// Refresh a campaign's stored stats from its delivery logs.
    pub async fn recompute_stats(&self, campaign_id: Uuid, owner: &str) -> CampaignResult<CampaignStats> {
        self.get_campaign(campaign_id, owner)?;
        self.simulator.recompute_stats(campaign_id).await
    }

    /// Delete a campaign, stopping its dispatch and every pending funnel
    /// transition. Returns how many transitions were cancelled.
    pub async fn delete_campaign(&self, campaign_id: Uuid, owner: &str) -> CampaignResult<usize> {
        self.get_campaign(campaign_id, owner)?;
        // Cancelling first makes a still-running dispatch stop scheduling.
        let mut cancelled = self.simulator.cancel_campaign(&campaign_id);
        if let Some((_, handle)) = self.dispatches.remove(&campaign_id) {
            handle.abort();
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!(campaign_id = %campaign_id, error = %e, "Dispatch task panicked");
                }
            }
            cancelled += self.simulator.cancel_campaign(&campaign_id);
        }
        if !self.campaigns.delete_campaign(campaign_id) {
            warn!(campaign_id = %campaign_id, "Campaign vanished during deletion");
        }
        metrics::counter!("management.campaigns.deleted").increment(1);
        info!(campaign_id = %campaign_id, cancelled, "Campaign deleted");
        Ok(cancelled)
    }
}
