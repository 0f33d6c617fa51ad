//! Stats aggregation — folds delivery outcomes into campaign counters.

use campaign_core::types::{CampaignStats, CommunicationLog, DeliveryStatus};

/// Outcome counts observed synchronously while a single dispatch runs.
/// Owned by that dispatch; never shared across campaigns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchTally {
    pub sent: u64,
    pub failed: u64,
}

impl DispatchTally {
    pub fn record_queued(&mut self) {
        self.sent += 1;
    }

    pub fn record_failed(&mut self) {
        self.failed += 1;
    }

    pub fn attempted(&self) -> u64 {
        self.sent + self.failed
    }
}

/// Cumulative funnel counts: a clicked record also counts as delivered
/// and opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FunnelCounts {
    pub delivered: u64,
    pub opened: u64,
    pub clicked: u64,
}

impl FunnelCounts {
    pub fn from_logs<'a>(logs: impl IntoIterator<Item = &'a CommunicationLog>) -> Self {
        logs.into_iter().fold(Self::default(), |mut acc, log| {
            if log.delivered_at.is_some() {
                acc.delivered += 1;
            }
            if log.opened_at.is_some() {
                acc.opened += 1;
            }
            if log.clicked_at.is_some() {
                acc.clicked += 1;
            }
            acc
        })
    }
}

pub fn campaign_stats(total_recipients: u64, tally: DispatchTally, funnel: FunnelCounts) -> CampaignStats {
    CampaignStats {
        total_recipients,
        sent: tally.sent,
        failed: tally.failed,
        delivered: funnel.delivered,
        opened: funnel.opened,
        clicked: funnel.clicked,
        delivery_rate: percent(tally.sent, total_recipients),
        open_rate: percent(funnel.opened, tally.sent),
        click_rate: percent(funnel.clicked, funnel.opened),
        failure_reason: None,
    }
}

/// Re-fold a stats snapshot from the current logs. `failed` is carried
/// over because rejected creations leave no log behind.
pub fn refresh_funnel(stats: &CampaignStats, logs: &[CommunicationLog]) -> CampaignStats {
    let sent = logs
        .iter()
        .filter(|log| log.status != DeliveryStatus::Failed)
        .count() as u64;
    let tally = DispatchTally {
        sent,
        failed: stats.failed,
    };
    let mut refreshed = campaign_stats(stats.total_recipients, tally, FunnelCounts::from_logs(logs));
    refreshed.failure_reason = stats.failure_reason.clone();
    refreshed
}

fn percent(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64 * 100.0
    }
}
