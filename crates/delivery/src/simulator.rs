//! Campaign delivery simulator.
//!
//! `dispatch` creates one communication log per customer in fixed-size
//! batches. Batches run strictly in sequence; records inside a batch are
//! created concurrently and a rejected creation only counts as `failed`.
//! Every record that lands `queued` gets a funnel walk scheduled on the
//! [`FunnelScheduler`], which the dispatch never waits for: the campaign is
//! finalized as soon as the last batch settles, so its stats are a
//! submission-time snapshot. [`DeliverySimulator::recompute_stats`] folds
//! the logs again once the funnel has progressed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use campaign_core::config::DeliveryConfig;
use campaign_core::event_bus::{make_event, noop_sink, EventSink, DEFAULT_NODE_ID};
use campaign_core::store::{CampaignStore, DeliveryLogStore, LogFilter};
use campaign_core::types::{
    CampaignStats, CommunicationLog, Customer, DeliveryStatus, EventType, TransitionOutcome,
};
use campaign_core::{CampaignError, CampaignResult};

use crate::funnel::{FunnelDriver, FunnelRng, FunnelTicket};
use crate::scheduler::FunnelScheduler;
use crate::stats::{campaign_stats, refresh_funnel, DispatchTally, FunnelCounts};

pub const SIMULATED_FAILURE_REASON: &str = "Simulated failure";

pub struct DeliverySimulator {
    campaigns: Arc<dyn CampaignStore>,
    logs: Arc<dyn DeliveryLogStore>,
    scheduler: FunnelScheduler,
    driver: Arc<FunnelDriver>,
}

impl std::fmt::Debug for DeliverySimulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliverySimulator")
            .field("batch_size", &self.driver.config.batch_size)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

impl DeliverySimulator {
    pub fn new(
        config: DeliveryConfig,
        campaigns: Arc<dyn CampaignStore>,
        logs: Arc<dyn DeliveryLogStore>,
    ) -> CampaignResult<Self> {
        config.validate()?;
        let rng = Arc::new(FunnelRng::new(config.rng_seed));
        let driver = Arc::new(FunnelDriver {
            logs: Arc::clone(&logs),
            rng,
            config,
            event_sink: noop_sink(),
            node_id: DEFAULT_NODE_ID.to_string(),
        });
        Ok(Self {
            campaigns,
            logs,
            scheduler: FunnelScheduler::new(),
            driver,
        })
    }

    /// Attach an event sink for delivery lifecycle events.
    pub fn with_event_sink(self, sink: Arc<dyn EventSink>) -> Self {
        let node_id = self.driver.node_id.clone();
        self.rebuild_driver(sink, node_id)
    }

    /// Node id stamped on every emitted event.
    pub fn with_node_id(self, node_id: impl Into<String>) -> Self {
        let sink = Arc::clone(&self.driver.event_sink);
        self.rebuild_driver(sink, node_id.into())
    }

    fn rebuild_driver(mut self, event_sink: Arc<dyn EventSink>, node_id: String) -> Self {
        self.driver = Arc::new(FunnelDriver {
            logs: Arc::clone(&self.logs),
            rng: Arc::clone(&self.driver.rng),
            config: self.driver.config.clone(),
            event_sink,
            node_id,
        });
        self
    }

    pub fn scheduler(&self) -> &FunnelScheduler {
        &self.scheduler
    }

    pub fn logs(&self) -> &Arc<dyn DeliveryLogStore> {
        &self.logs
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.driver.config
    }

    /// Dispatch a campaign to `customers`. Errors never escape: a fatal
    /// failure marks the campaign `failed` with the error as its reason.
    /// A campaign cancelled mid-dispatch stops at the next batch boundary
    /// and is left as is.
    pub async fn dispatch(&self, campaign_id: Uuid, customers: Vec<Customer>) {
        match self.run_dispatch(campaign_id, &customers).await {
            Ok(None) => {
                info!(campaign_id = %campaign_id, "Campaign dispatch cancelled");
            }
            Ok(Some(stats)) => {
                metrics::counter!("campaigns.completed").increment(1);
                info!(
                    campaign_id = %campaign_id,
                    total = stats.total_recipients,
                    sent = stats.sent,
                    failed = stats.failed,
                    "Campaign dispatch completed"
                );
                self.emit(EventType::CampaignCompleted, campaign_id, None, None);
            }
            Err(e) => {
                metrics::counter!("campaigns.failed").increment(1);
                error!(campaign_id = %campaign_id, error = %e, "Campaign processing failed");
                if let Err(mark_err) = self.campaigns.mark_failed(campaign_id, e.to_string()).await {
                    error!(
                        campaign_id = %campaign_id,
                        error = %mark_err,
                        "Could not record campaign failure"
                    );
                }
                self.emit(EventType::CampaignFailed, campaign_id, None, None);
            }
        }
    }

    async fn run_dispatch(
        &self,
        campaign_id: Uuid,
        customers: &[Customer],
    ) -> CampaignResult<Option<CampaignStats>> {
        let total = customers.len() as u64;
        self.campaigns.begin_processing(campaign_id, total).await?;
        self.emit(EventType::CampaignProcessing, campaign_id, None, None);

        let batch_size = self.driver.config.batch_size.max(1);
        let mut tally = DispatchTally::default();

        for (batch_index, batch) in customers.chunks(batch_size).enumerate() {
            if self.scheduler.is_cancelled(&campaign_id) {
                debug!(campaign_id = %campaign_id, batch = batch_index, "Dispatch stopped");
                return Ok(None);
            }
            let dispatched_at = Utc::now();
            let outcomes = join_all(
                batch
                    .iter()
                    .map(|customer| self.create_record(campaign_id, customer, dispatched_at)),
            )
            .await;

            for (customer, outcome) in batch.iter().zip(outcomes) {
                match outcome {
                    Ok(log) if log.status == DeliveryStatus::Queued => {
                        tally.record_queued();
                        if !self.schedule_funnel(&log) {
                            debug!(message_id = %log.message_id, "Campaign cancelled, funnel not scheduled");
                        }
                        self.emit(
                            EventType::MessageQueued,
                            campaign_id,
                            Some(log.customer_id),
                            Some(log.message_id),
                        );
                    }
                    Ok(log) => {
                        tally.record_failed();
                        self.emit(
                            EventType::MessageFailed,
                            campaign_id,
                            Some(log.customer_id),
                            Some(log.message_id),
                        );
                    }
                    Err(e) => {
                        tally.record_failed();
                        metrics::counter!("delivery.records_failed").increment(1);
                        warn!(
                            campaign_id = %campaign_id,
                            customer_id = %customer.id,
                            error = %e,
                            "Failed to create communication log"
                        );
                    }
                }
            }
            debug!(
                campaign_id = %campaign_id,
                batch = batch_index,
                size = batch.len(),
                sent = tally.sent,
                failed = tally.failed,
                "Batch settled"
            );
        }

        // Scheduled transitions are not awaited; count whatever has fired.
        let logs = self.logs.find(&LogFilter::campaign(campaign_id)).await?;
        let stats = campaign_stats(total, tally, FunnelCounts::from_logs(&logs));
        self.campaigns.complete(campaign_id, stats.clone()).await?;
        Ok(Some(stats))
    }

    async fn create_record(
        &self,
        campaign_id: Uuid,
        customer: &Customer,
        dispatched_at: DateTime<Utc>,
    ) -> CampaignResult<CommunicationLog> {
        let queued = self.driver.rng.chance(self.driver.config.send_success_rate);
        let log = CommunicationLog {
            id: Uuid::new_v4(),
            campaign_id,
            customer_id: customer.id.clone(),
            message_id: message_id(dispatched_at, &customer.id),
            status: if queued {
                DeliveryStatus::Queued
            } else {
                DeliveryStatus::Failed
            },
            sent_at: Utc::now(),
            delivered_at: None,
            opened_at: None,
            clicked_at: None,
            failure_reason: (!queued).then(|| SIMULATED_FAILURE_REASON.to_string()),
        };
        let created = self.logs.create(log).await?;
        metrics::counter!("delivery.records_created").increment(1);
        Ok(created)
    }

    fn schedule_funnel(&self, log: &CommunicationLog) -> bool {
        let driver = Arc::clone(&self.driver);
        let ticket = FunnelTicket {
            record_id: log.id,
            campaign_id: log.campaign_id,
            customer_id: log.customer_id.clone(),
            message_id: log.message_id.clone(),
        };
        self.scheduler.schedule(log.id, log.campaign_id, async move {
            driver.drive(ticket).await;
        })
    }

    /// Apply an externally reported delivery receipt. Receipts only move a
    /// record forward; an applied receipt supersedes the record's pending
    /// scheduled transition.
    pub async fn record_delivery_event(
        &self,
        message_id: &str,
        status: DeliveryStatus,
        timestamp: Option<DateTime<Utc>>,
    ) -> CampaignResult<TransitionOutcome> {
        if message_id.trim().is_empty() {
            return Err(CampaignError::Validation(
                "Message ID and status are required".into(),
            ));
        }
        if !matches!(
            status,
            DeliveryStatus::Delivered | DeliveryStatus::Opened | DeliveryStatus::Clicked
        ) {
            return Err(CampaignError::Validation(format!(
                "receipt status must be delivered, opened or clicked, got {status}"
            )));
        }

        let log = self
            .logs
            .find_by_message_id(message_id)
            .await?
            .ok_or_else(|| CampaignError::not_found("CommunicationLog", message_id))?;

        let outcome = self
            .logs
            .advance(log.id, status, timestamp.unwrap_or_else(Utc::now))
            .await?;

        match outcome {
            TransitionOutcome::Applied => {
                self.scheduler.cancel(&log.id);
                metrics::counter!("delivery.receipts_applied").increment(1);
                info!(message_id = %message_id, status = %status, "Delivery receipt applied");
                self.emit(
                    EventType::ReceiptApplied,
                    log.campaign_id,
                    Some(log.customer_id),
                    Some(log.message_id),
                );
            }
            TransitionOutcome::Stale => {
                debug!(
                    message_id = %message_id,
                    current = %log.status,
                    requested = %status,
                    "Stale delivery receipt ignored"
                );
            }
            TransitionOutcome::NotFound => {
                return Err(CampaignError::not_found("CommunicationLog", message_id));
            }
        }
        Ok(outcome)
    }

    /// Re-aggregate a campaign's stats from its delivery logs.
    pub async fn recompute_stats(&self, campaign_id: Uuid) -> CampaignResult<CampaignStats> {
        let campaign = self
            .campaigns
            .get(campaign_id)
            .await?
            .ok_or_else(|| CampaignError::not_found("Campaign", campaign_id))?;
        let logs = self.logs.find(&LogFilter::campaign(campaign_id)).await?;
        let stats = refresh_funnel(&campaign.stats, &logs);
        self.campaigns.update_stats(campaign_id, stats.clone()).await?;
        debug!(
            campaign_id = %campaign_id,
            delivered = stats.delivered,
            opened = stats.opened,
            clicked = stats.clicked,
            "Campaign stats recomputed"
        );
        Ok(stats)
    }

    /// Abort every pending funnel transition of a campaign.
    pub fn cancel_campaign(&self, campaign_id: &Uuid) -> usize {
        self.scheduler.cancel_campaign(campaign_id)
    }

    fn emit(
        &self,
        event_type: EventType,
        campaign_id: Uuid,
        customer_id: Option<String>,
        message_id: Option<String>,
    ) {
        self.driver.event_sink.emit(make_event(
            event_type,
            campaign_id,
            customer_id,
            message_id,
            &self.driver.node_id,
        ));
    }
}

/// Message id derived from the batch dispatch instant and the customer id.
pub fn message_id(dispatched_at: DateTime<Utc>, customer_id: &str) -> String {
    format!("msg_{}_{}", dispatched_at.timestamp_micros(), customer_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_store::InMemoryLogStore;
    use async_trait::async_trait;
    use campaign_core::config::DelayWindow;
    use campaign_core::event_bus::capture_sink;
    use campaign_core::types::{Campaign, CampaignStatus, MessageTemplate};
    use dashmap::DashMap;
    use std::collections::HashSet;
    use std::time::Duration;

    #[derive(Default)]
    struct TestCampaigns {
        campaigns: DashMap<Uuid, Campaign>,
        fail_on_complete: bool,
    }

    impl TestCampaigns {
        fn with_campaign(fail_on_complete: bool) -> (Arc<Self>, Uuid) {
            let store = Self {
                fail_on_complete,
                ..Default::default()
            };
            let now = Utc::now();
            let campaign = Campaign {
                id: Uuid::new_v4(),
                name: "Spring sale".into(),
                segment_id: Uuid::new_v4(),
                template: MessageTemplate {
                    subject: "Hi".into(),
                    body: "Sale".into(),
                },
                status: CampaignStatus::Draft,
                stats: CampaignStats::default(),
                created_by: "owner".into(),
                created_at: now,
                updated_at: now,
            };
            let id = campaign.id;
            store.campaigns.insert(id, campaign);
            (Arc::new(store), id)
        }

        fn snapshot(&self, id: Uuid) -> Campaign {
            self.campaigns.get(&id).unwrap().clone()
        }
    }

    #[async_trait]
    impl CampaignStore for TestCampaigns {
        async fn insert(&self, campaign: Campaign) -> CampaignResult<Campaign> {
            self.campaigns.insert(campaign.id, campaign.clone());
            Ok(campaign)
        }

        async fn get(&self, id: Uuid) -> CampaignResult<Option<Campaign>> {
            Ok(self.campaigns.get(&id).map(|c| c.clone()))
        }

        async fn begin_processing(&self, id: Uuid, total_recipients: u64) -> CampaignResult<()> {
            let mut c = self
                .campaigns
                .get_mut(&id)
                .ok_or_else(|| CampaignError::not_found("Campaign", id))?;
            c.status = CampaignStatus::Processing;
            c.stats.total_recipients = total_recipients;
            Ok(())
        }

        async fn complete(&self, id: Uuid, stats: CampaignStats) -> CampaignResult<()> {
            if self.fail_on_complete {
                return Err(CampaignError::Store("campaign store unreachable".into()));
            }
            let mut c = self
                .campaigns
                .get_mut(&id)
                .ok_or_else(|| CampaignError::not_found("Campaign", id))?;
            c.status = CampaignStatus::Completed;
            c.stats = stats;
            Ok(())
        }

        async fn mark_failed(&self, id: Uuid, reason: String) -> CampaignResult<()> {
            let mut c = self
                .campaigns
                .get_mut(&id)
                .ok_or_else(|| CampaignError::not_found("Campaign", id))?;
            c.status = CampaignStatus::Failed;
            c.stats.failure_reason = Some(reason);
            Ok(())
        }

        async fn update_stats(&self, id: Uuid, stats: CampaignStats) -> CampaignResult<()> {
            let mut c = self
                .campaigns
                .get_mut(&id)
                .ok_or_else(|| CampaignError::not_found("Campaign", id))?;
            c.stats = stats;
            Ok(())
        }
    }

    fn customers(n: usize) -> Vec<Customer> {
        (0..n).map(|i| Customer::new(format!("cust-{i:04}"), format!("Customer {i}"))).collect()
    }

    fn config() -> DeliveryConfig {
        DeliveryConfig {
            delivery_delay: DelayWindow::new(100, 5_000),
            open_delay: DelayWindow::new(100, 10_000),
            click_delay: DelayWindow::new(100, 15_000),
            rng_seed: Some(7),
            ..DeliveryConfig::default()
        }
    }

    fn certain_config() -> DeliveryConfig {
        DeliveryConfig {
            send_success_rate: 1.0,
            delivery_rate: 1.0,
            open_rate: 1.0,
            click_rate: 1.0,
            ..config()
        }
    }

    fn simulator(config: DeliveryConfig, campaigns: Arc<TestCampaigns>) -> (DeliverySimulator, Arc<InMemoryLogStore>) {
        let logs = Arc::new(InMemoryLogStore::new());
        (DeliverySimulator::new(config, campaigns, logs.clone()).unwrap(), logs)
    }

    async fn campaign_logs(logs: &InMemoryLogStore, id: Uuid) -> Vec<CommunicationLog> {
        logs.find(&LogFilter::campaign(id)).await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_creates_one_record_per_customer() {
        let (campaigns, id) = TestCampaigns::with_campaign(false);
        let (sim, logs) = simulator(config(), campaigns.clone());

        sim.dispatch(id, customers(250)).await;

        let records = campaign_logs(&logs, id).await;
        assert_eq!(records.len(), 250);
        let ids: HashSet<&str> = records.iter().map(|l| l.message_id.as_str()).collect();
        assert_eq!(ids.len(), 250);

        let campaign = campaigns.snapshot(id);
        assert_eq!(campaign.status, CampaignStatus::Completed);
        assert_eq!(campaign.stats.total_recipients, 250);
        assert_eq!(campaign.stats.sent + campaign.stats.failed, 250);
        let queued = records.iter().filter(|l| l.status == DeliveryStatus::Queued).count() as u64;
        assert_eq!(campaign.stats.sent, queued);
        assert_eq!(sim.scheduler().pending_for(&id) as u64, queued);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_are_a_submission_time_snapshot() {
        let (campaigns, id) = TestCampaigns::with_campaign(false);
        let (sim, _logs) = simulator(certain_config(), campaigns.clone());

        sim.dispatch(id, customers(40)).await;

        let stats = campaigns.snapshot(id).stats;
        assert_eq!(stats.sent, 40);
        assert_eq!(stats.delivered, 0);
        assert_eq!(stats.opened, 0);
        assert_eq!(stats.clicked, 0);
        assert_eq!(stats.delivery_rate, 100.0);
        assert_eq!(stats.open_rate, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_funnel_runs_to_completion_after_finalization() {
        let (campaigns, id) = TestCampaigns::with_campaign(false);
        let (sim, logs) = simulator(certain_config(), campaigns.clone());

        sim.dispatch(id, customers(30)).await;
        tokio::time::sleep(Duration::from_secs(31)).await;

        let records = campaign_logs(&logs, id).await;
        assert!(records.iter().all(|l| l.status == DeliveryStatus::Clicked));
        assert!(records
            .iter()
            .all(|l| l.delivered_at.is_some() && l.opened_at.is_some() && l.clicked_at.is_some()));
        assert_eq!(sim.scheduler().pending_count(), 0);

        // The stored snapshot still predates the funnel.
        assert_eq!(campaigns.snapshot(id).stats.clicked, 0);
        let stats = sim.recompute_stats(id).await.unwrap();
        assert_eq!((stats.delivered, stats.opened, stats.clicked), (30, 30, 30));
        assert_eq!(stats.click_rate, 100.0);
        assert_eq!(campaigns.snapshot(id).stats, stats);
    }

    #[tokio::test(start_paused = true)]
    async fn test_funnel_is_monotonic() {
        let (campaigns, id) = TestCampaigns::with_campaign(false);
        let (sim, logs) = simulator(config(), campaigns);

        sim.dispatch(id, customers(300)).await;
        tokio::time::sleep(Duration::from_secs(31)).await;

        for log in campaign_logs(&logs, id).await {
            if log.clicked_at.is_some() {
                assert!(log.opened_at.is_some());
            }
            if log.opened_at.is_some() {
                assert!(log.delivered_at.is_some());
            }
            if log.status == DeliveryStatus::Failed {
                assert!(log.delivered_at.is_none());
                assert_eq!(log.failure_reason.as_deref(), Some(SIMULATED_FAILURE_REASON));
            }
            let expected = match (log.delivered_at, log.opened_at, log.clicked_at) {
                (_, _, Some(_)) => DeliveryStatus::Clicked,
                (_, Some(_), None) => DeliveryStatus::Opened,
                (Some(_), None, None) => DeliveryStatus::Delivered,
                (None, None, None) => log.status,
            };
            assert_eq!(log.status, expected);
        }
        assert_eq!(sim.scheduler().pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_sends_fail() {
        let (campaigns, id) = TestCampaigns::with_campaign(false);
        let cfg = DeliveryConfig {
            send_success_rate: 0.0,
            ..config()
        };
        let (sim, logs) = simulator(cfg, campaigns.clone());

        sim.dispatch(id, customers(12)).await;

        let records = campaign_logs(&logs, id).await;
        assert!(records.iter().all(|l| l.status == DeliveryStatus::Failed
            && l.failure_reason.as_deref() == Some(SIMULATED_FAILURE_REASON)));
        let stats = campaigns.snapshot(id).stats;
        assert_eq!((stats.sent, stats.failed), (0, 12));
        assert_eq!(sim.scheduler().pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_creation_counts_as_failed() {
        let (campaigns, id) = TestCampaigns::with_campaign(false);
        let (sim, logs) = simulator(certain_config(), campaigns.clone());
        // The same customer twice in one batch yields a duplicate message id.
        let mut list = customers(3);
        list.push(list[0].clone());

        sim.dispatch(id, list).await;

        let campaign = campaigns.snapshot(id);
        assert_eq!(campaign.status, CampaignStatus::Completed);
        assert_eq!(campaign.stats.total_recipients, 4);
        assert_eq!((campaign.stats.sent, campaign.stats.failed), (3, 1));
        assert_eq!(campaign_logs(&logs, id).await.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_store_error_marks_campaign_failed() {
        let (campaigns, id) = TestCampaigns::with_campaign(true);
        let (sim, _logs) = simulator(certain_config(), campaigns.clone());

        sim.dispatch(id, customers(5)).await;

        let campaign = campaigns.snapshot(id);
        assert_eq!(campaign.status, CampaignStatus::Failed);
        assert!(campaign
            .stats
            .failure_reason
            .unwrap()
            .contains("campaign store unreachable"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_campaign_creates_nothing() {
        let (campaigns, _id) = TestCampaigns::with_campaign(false);
        let (sim, logs) = simulator(certain_config(), campaigns);
        sim.dispatch(Uuid::new_v4(), customers(5)).await;
        assert!(logs.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_receipts_override_scheduled_transitions() {
        let (campaigns, id) = TestCampaigns::with_campaign(false);
        let (sim, logs) = simulator(certain_config(), campaigns);
        sim.dispatch(id, customers(2)).await;

        let record = campaign_logs(&logs, id).await.remove(0);
        assert!(sim.scheduler().is_pending(&record.id));

        let at = Utc::now();
        let outcome = sim
            .record_delivery_event(&record.message_id, DeliveryStatus::Opened, Some(at))
            .await
            .unwrap();
        assert_eq!(outcome, TransitionOutcome::Applied);
        assert!(!sim.scheduler().is_pending(&record.id));

        let updated = logs.find_by_message_id(&record.message_id).await.unwrap().unwrap();
        assert_eq!(updated.status, DeliveryStatus::Opened);
        assert_eq!(updated.delivered_at, Some(at));
        assert_eq!(updated.opened_at, Some(at));

        let stale = sim
            .record_delivery_event(&record.message_id, DeliveryStatus::Delivered, None)
            .await
            .unwrap();
        assert_eq!(stale, TransitionOutcome::Stale);

        // The cancelled walk never clicks this record.
        tokio::time::sleep(Duration::from_secs(31)).await;
        let after = logs.find_by_message_id(&record.message_id).await.unwrap().unwrap();
        assert_eq!(after.status, DeliveryStatus::Opened);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receipt_validation() {
        let (campaigns, id) = TestCampaigns::with_campaign(false);
        let (sim, logs) = simulator(certain_config(), campaigns);
        sim.dispatch(id, customers(1)).await;
        let record = campaign_logs(&logs, id).await.remove(0);

        let err = sim
            .record_delivery_event(&record.message_id, DeliveryStatus::Failed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CampaignError::Validation(_)));
        let err = sim
            .record_delivery_event("", DeliveryStatus::Delivered, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CampaignError::Validation(_)));
        let err = sim
            .record_delivery_event("msg_0_nobody", DeliveryStatus::Delivered, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CampaignError::NotFound { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_campaign_freezes_records() {
        let (campaigns, id) = TestCampaigns::with_campaign(false);
        let (sim, logs) = simulator(certain_config(), campaigns);
        sim.dispatch(id, customers(20)).await;

        assert_eq!(sim.cancel_campaign(&id), 20);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(campaign_logs(&logs, id)
            .await
            .iter()
            .all(|l| l.status == DeliveryStatus::Queued));
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_follow_the_lifecycle() {
        let (campaigns, id) = TestCampaigns::with_campaign(false);
        let sink = capture_sink();
        let logs = Arc::new(InMemoryLogStore::new());
        let sim = DeliverySimulator::new(certain_config(), campaigns, logs)
            .unwrap()
            .with_event_sink(sink.clone())
            .with_node_id("node-07");

        sim.dispatch(id, customers(3)).await;
        assert_eq!(sink.count_type(EventType::CampaignProcessing), 1);
        assert_eq!(sink.count_type(EventType::MessageQueued), 3);
        assert_eq!(sink.count_type(EventType::CampaignCompleted), 1);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(sink.count_type(EventType::MessageDelivered), 3);
        assert_eq!(sink.count_type(EventType::MessageOpened), 3);
        assert_eq!(sink.count_type(EventType::MessageClicked), 3);
        assert!(sink.events().iter().all(|e| e.node_id == "node-07"));
    }

    /// Log store that yields on every insert, so other tasks run while a
    /// batch is being created.
    #[derive(Default)]
    struct YieldingLogStore {
        inner: InMemoryLogStore,
    }

    #[async_trait]
    impl DeliveryLogStore for YieldingLogStore {
        async fn create(&self, log: CommunicationLog) -> CampaignResult<CommunicationLog> {
            tokio::task::yield_now().await;
            self.inner.create(log).await
        }

        async fn find(&self, filter: &LogFilter) -> CampaignResult<Vec<CommunicationLog>> {
            self.inner.find(filter).await
        }

        async fn find_by_message_id(&self, message_id: &str) -> CampaignResult<Option<CommunicationLog>> {
            self.inner.find_by_message_id(message_id).await
        }

        async fn advance(
            &self,
            id: Uuid,
            status: DeliveryStatus,
            at: DateTime<Utc>,
        ) -> CampaignResult<TransitionOutcome> {
            self.inner.advance(id, status, at).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_dispatch_stops_scheduling() {
        let (campaigns, id) = TestCampaigns::with_campaign(false);
        let logs = Arc::new(YieldingLogStore::default());
        let cfg = DeliveryConfig {
            batch_size: 10,
            ..certain_config()
        };
        let sim = Arc::new(DeliverySimulator::new(cfg, campaigns.clone(), logs.clone()).unwrap());

        let dispatch = tokio::spawn({
            let sim = Arc::clone(&sim);
            async move { sim.dispatch(id, customers(500)).await }
        });
        while logs.inner.len() < 25 {
            tokio::task::yield_now().await;
        }
        sim.cancel_campaign(&id);
        dispatch.await.unwrap();

        assert!(logs.inner.len() < 500);
        assert_eq!(sim.scheduler().pending_for(&id), 0);
        assert_eq!(campaigns.snapshot(id).status, CampaignStatus::Processing);

        tokio::time::sleep(Duration::from_secs(31)).await;
        let records = logs.find(&LogFilter::campaign(id)).await.unwrap();
        assert!(records.iter().all(|l| l.status == DeliveryStatus::Queued));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let (campaigns, _id) = TestCampaigns::with_campaign(false);
        let cfg = DeliveryConfig {
            open_rate: f64::NAN,
            ..config()
        };
        let err = DeliverySimulator::new(cfg, campaigns, Arc::new(InMemoryLogStore::new())).unwrap_err();
        assert!(matches!(err, CampaignError::Validation(_)));
    }

    #[test]
    fn test_message_id_format() {
        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        assert_eq!(message_id(at, "cust-1"), "msg_1700000000000000_cust-1");
    }
}
