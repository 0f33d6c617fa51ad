//! Segmentation engine — persists segments and resolves rule sets against
//! the customer directory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use campaign_core::config::SegmentationConfig;
use campaign_core::types::Customer;
use campaign_core::{CampaignError, CampaignResult};

use crate::compiler::{compile, RuleSet};
use crate::directory::{CustomerDirectory, FindOptions};
use crate::preview::{build_preview, SegmentPreview};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub rules: RuleSet,
    /// Snapshot taken at creation or the last re-estimation.
    pub estimated_count: u64,
    pub created_by: String,
    pub is_dynamic: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSegment {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub rules: RuleSet,
}

pub struct SegmentationEngine {
    segments: dashmap::DashMap<Uuid, Segment>,
    directory: Arc<dyn CustomerDirectory>,
    config: SegmentationConfig,
}

impl SegmentationEngine {
    pub fn new(directory: Arc<dyn CustomerDirectory>, config: SegmentationConfig) -> Self {
        Self {
            segments: dashmap::DashMap::new(),
            directory,
            config,
        }
    }

    pub fn directory(&self) -> &Arc<dyn CustomerDirectory> {
        &self.directory
    }

    pub async fn create_segment(
        &self,
        request: NewSegment,
        owner: &str,
        now: DateTime<Utc>,
    ) -> CampaignResult<Segment> {
        if request.name.trim().is_empty() {
            return Err(CampaignError::Validation(
                "Name and at least one rule are required".into(),
            ));
        }
        let estimated_count = self.estimate(&request.rules, now).await?;

        let segment = Segment {
            id: Uuid::new_v4(),
            name: request.name,
            description: request.description,
            rules: request.rules,
            estimated_count,
            created_by: owner.to_string(),
            is_dynamic: true,
            created_at: now,
            updated_at: now,
        };
        info!(
            segment_id = %segment.id,
            name = %segment.name,
            estimated_count,
            "Segment created"
        );
        self.segments.insert(segment.id, segment.clone());
        Ok(segment)
    }

    /// Count customers matching a rule set.
    pub async fn estimate(&self, rules: &RuleSet, now: DateTime<Utc>) -> CampaignResult<u64> {
        rules.validate()?;
        let predicate = compile(rules, now);
        let count = self.directory.count(&predicate).await?;
        debug!(count, rules = rules.rules.len(), "Segment estimated");
        Ok(count)
    }

    /// Refresh a stored segment's `estimated_count`; its rules are untouched.
    pub async fn reestimate(&self, id: &Uuid, now: DateTime<Utc>) -> CampaignResult<Segment> {
        let rules = self
            .get_segment(id)
            .ok_or_else(|| CampaignError::not_found("Segment", id))?
            .rules;
        let count = self.estimate(&rules, now).await?;

        let mut entry = self
            .segments
            .get_mut(id)
            .ok_or_else(|| CampaignError::not_found("Segment", id))?;
        entry.estimated_count = count;
        entry.updated_at = now;
        Ok(entry.clone())
    }

    pub async fn preview(&self, rules: &RuleSet, now: DateTime<Utc>) -> CampaignResult<SegmentPreview> {
        rules.validate()?;
        let predicate = compile(rules, now);
        build_preview(self.directory.as_ref(), &predicate, &self.config).await
    }

    /// Customers currently matching a stored segment's rules.
    pub async fn matching_customers(
        &self,
        segment: &Segment,
        now: DateTime<Utc>,
    ) -> CampaignResult<Vec<Customer>> {
        let predicate = compile(&segment.rules, now);
        self.directory.find(&predicate, FindOptions::default()).await
    }

    pub fn get_segment(&self, id: &Uuid) -> Option<Segment> {
        self.segments.get(id).map(|s| s.clone())
    }

    /// Segment `id` if it exists and belongs to `owner`.
    pub fn owned_segment(&self, id: &Uuid, owner: &str) -> CampaignResult<Segment> {
        self.get_segment(id)
            .filter(|s| s.created_by == owner)
            .ok_or_else(|| CampaignError::not_found("Segment", id))
    }

    /// Segments created by `owner`, newest first.
    pub fn list_segments(&self, owner: &str) -> Vec<Segment> {
        let mut segments: Vec<Segment> = self
            .segments
            .iter()
            .filter(|s| s.value().created_by == owner)
            .map(|s| s.value().clone())
            .collect();
        segments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        segments
    }
}
