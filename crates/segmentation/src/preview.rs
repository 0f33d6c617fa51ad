//! Segment preview — sample customers plus demographic, geographic and
//! spending breakdowns for a candidate rule set.

use campaign_core::config::SegmentationConfig;
use campaign_core::types::Customer;
use campaign_core::CampaignResult;
use serde::{Deserialize, Serialize};

use crate::directory::{CustomerDirectory, FindOptions, GroupKey, GroupRow};
use crate::predicates::Predicate;

const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SegmentPreview {
    pub total_count: u64,
    pub sample_customers: Vec<Customer>,
    pub demographics: DemographicBreakdown,
    pub city_distribution: Vec<Bucket>,
    pub spending_stats: SpendingStats,
    pub activity_stats: ActivityStats,
    pub purchase_frequency: Vec<Bucket>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DemographicBreakdown {
    pub gender: Vec<Bucket>,
    pub age_groups: Vec<Bucket>,
    pub occupation: Vec<Bucket>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bucket {
    pub label: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SpendingStats {
    pub avg_spent: f64,
    pub max_spent: f64,
    pub min_spent: f64,
    pub total_spent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ActivityStats {
    pub avg_orders: f64,
    pub active_customers: u64,
}

pub async fn build_preview(
    directory: &dyn CustomerDirectory,
    predicate: &Predicate,
    config: &SegmentationConfig,
) -> CampaignResult<SegmentPreview> {
    let total_count = directory.count(predicate).await?;
    let sample_customers = directory
        .find(predicate, FindOptions::limit(config.preview_sample_size))
        .await?;

    let gender = buckets(directory.aggregate(predicate, GroupKey::Gender).await?);
    let age_groups = buckets(directory.aggregate(predicate, GroupKey::AgeBand).await?);
    let occupation = top_n(
        buckets(directory.aggregate(predicate, GroupKey::Occupation).await?),
        config.preview_top_n,
    );
    let city_distribution = top_n(
        buckets(directory.aggregate(predicate, GroupKey::City).await?),
        config.preview_top_n,
    );
    let purchase_frequency = buckets(directory.aggregate(predicate, GroupKey::PurchaseFrequency).await?);

    let overall = directory.aggregate(predicate, GroupKey::All).await?;
    let (spending_stats, activity_stats) = match overall.first() {
        Some(row) if row.count > 0 => (
            SpendingStats {
                avg_spent: row.total_spent / row.count as f64,
                max_spent: row.max_spent,
                min_spent: row.min_spent,
                total_spent: row.total_spent,
            },
            ActivityStats {
                avg_orders: row.total_orders as f64 / row.count as f64,
                active_customers: row.active,
            },
        ),
        _ => (SpendingStats::default(), ActivityStats::default()),
    };

    Ok(SegmentPreview {
        total_count,
        sample_customers,
        demographics: DemographicBreakdown {
            gender,
            age_groups,
            occupation,
        },
        city_distribution,
        spending_stats,
        activity_stats,
        purchase_frequency,
    })
}

fn buckets(rows: Vec<GroupRow>) -> Vec<Bucket> {
    rows.into_iter()
        .map(|row| Bucket {
            label: row.key.unwrap_or_else(|| UNKNOWN.to_string()),
            count: row.count,
        })
        .collect()
}

/// Largest buckets first; ties keep key order.
fn top_n(mut buckets: Vec<Bucket>, n: usize) -> Vec<Bucket> {
    buckets.sort_by(|a, b| b.count.cmp(&a.count));
    buckets.truncate(n);
    buckets
}
