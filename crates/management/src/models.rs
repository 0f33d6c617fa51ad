//! Management request and response types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use campaign_core::types::{Campaign, CommunicationLog, Customer, DeliveryStatus, MessageTemplate};
use campaign_core::{CampaignError, CampaignResult};

// ─── Campaign ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCampaignRequest {
    pub name: String,
    pub segment_id: Option<Uuid>,
    pub template: Option<MessageTemplate>,
}

impl CreateCampaignRequest {
    pub fn new(name: impl Into<String>, segment_id: Uuid, subject: &str, body: &str) -> Self {
        Self {
            name: name.into(),
            segment_id: Some(segment_id),
            template: Some(MessageTemplate {
                subject: subject.to_string(),
                body: body.to_string(),
            }),
        }
    }

    /// Checks the required fields and returns the segment id and template.
    pub fn validate(&self) -> CampaignResult<(Uuid, MessageTemplate)> {
        let missing = || CampaignError::Validation("Missing required fields".into());
        if self.name.trim().is_empty() {
            return Err(missing());
        }
        let segment_id = self.segment_id.ok_or_else(missing)?;
        let template = self.template.clone().ok_or_else(missing)?;
        if template.subject.trim().is_empty() || template.body.trim().is_empty() {
            return Err(missing());
        }
        Ok((segment_id, template))
    }
}

/// Campaign list entry with its segment's name and estimated size. The
/// segment fields are `None` when the segment no longer exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignSummary {
    #[serde(flatten)]
    pub campaign: Campaign,
    pub segment_name: Option<String>,
    pub segment_estimated_count: Option<u64>,
}

// ─── Delivery receipts ─────────────────────────────────────────────────────

/// Externally reported delivery receipt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub message_id: String,
    pub status: DeliveryStatus,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

// ─── Communication log ─────────────────────────────────────────────────────

/// A delivery log paired with its customer, when the directory still has it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunicationLogEntry {
    #[serde(flatten)]
    pub log: CommunicationLog,
    pub customer: Option<Customer>,
}
