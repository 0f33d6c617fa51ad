use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// ─── Customer ──────────────────────────────────────────────────────────────

/// Customer record as held by the external customer directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Customer {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub stats: CustomerStats,
    #[serde(default)]
    pub demographics: Demographics,
    #[serde(default)]
    pub address: Address,
    /// Undocumented fields, reachable from rules through pass-through paths.
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CustomerStats {
    pub total_spent: f64,
    pub order_count: u32,
    pub last_purchase: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Demographics {
    pub age: Option<u32>,
    pub gender: Option<String>,
    pub occupation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Address {
    pub city: Option<String>,
}

impl Customer {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: None,
            is_active: false,
            stats: CustomerStats::default(),
            demographics: Demographics::default(),
            address: Address::default(),
            attributes: HashMap::new(),
        }
    }
}

// ─── Campaign ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub name: String,
    pub segment_id: Uuid,
    pub template: MessageTemplate,
    pub status: CampaignStatus,
    pub stats: CampaignStats,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageTemplate {
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Processing,
    Completed,
    Failed,
}

/// Campaign-level delivery counters. Rates are percentages in `0..=100`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CampaignStats {
    pub total_recipients: u64,
    pub sent: u64,
    pub failed: u64,
    pub delivered: u64,
    pub opened: u64,
    pub clicked: u64,
    pub delivery_rate: f64,
    pub open_rate: f64,
    pub click_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

// ─── Communication log ─────────────────────────────────────────────────────

/// One delivery attempt of a campaign message to a single customer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommunicationLog {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub customer_id: String,
    pub message_id: String,
    pub status: DeliveryStatus,
    pub sent_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub clicked_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Queued,
    Failed,
    Delivered,
    Opened,
    Clicked,
}

impl DeliveryStatus {
    /// Position along the funnel. `Failed` sits outside it.
    pub fn funnel_rank(self) -> Option<u8> {
        match self {
            DeliveryStatus::Queued => Some(0),
            DeliveryStatus::Delivered => Some(1),
            DeliveryStatus::Opened => Some(2),
            DeliveryStatus::Clicked => Some(3),
            DeliveryStatus::Failed => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Queued => "queued",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Opened => "opened",
            DeliveryStatus::Clicked => "clicked",
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = crate::CampaignError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(DeliveryStatus::Queued),
            "failed" => Ok(DeliveryStatus::Failed),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "opened" => Ok(DeliveryStatus::Opened),
            "clicked" => Ok(DeliveryStatus::Clicked),
            other => Err(crate::CampaignError::Validation(format!(
                "unknown delivery status '{other}'"
            ))),
        }
    }
}

/// Result of applying a funnel transition to a stored log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    /// The record is already at or past the requested stage, or failed.
    Stale,
    NotFound,
}

impl CommunicationLog {
    /// Move the record forward to `status`, stamping `at` on the stage
    /// timestamp and on any earlier stage timestamp still unset.
    /// Never moves backwards and never leaves `Failed`.
    pub fn advance_to(&mut self, status: DeliveryStatus, at: DateTime<Utc>) -> TransitionOutcome {
        let (Some(current), Some(target)) = (self.status.funnel_rank(), status.funnel_rank()) else {
            return TransitionOutcome::Stale;
        };
        if target <= current {
            return TransitionOutcome::Stale;
        }

        if target >= 1 && self.delivered_at.is_none() {
            self.delivered_at = Some(at);
        }
        if target >= 2 && self.opened_at.is_none() {
            self.opened_at = Some(at);
        }
        if target >= 3 && self.clicked_at.is_none() {
            self.clicked_at = Some(at);
        }
        self.status = status;
        TransitionOutcome::Applied
    }
}

// ─── Events ────────────────────────────────────────────────────────────────

/// Delivery lifecycle event published on the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryEvent {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub campaign_id: Uuid,
    pub customer_id: Option<String>,
    pub message_id: Option<String>,
    pub node_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    CampaignProcessing,
    CampaignCompleted,
    CampaignFailed,
    MessageQueued,
    MessageFailed,
    MessageDelivered,
    MessageOpened,
    MessageClicked,
    ReceiptApplied,
}

impl EventType {
    pub fn for_stage(status: DeliveryStatus) -> Self {
        match status {
            DeliveryStatus::Queued => EventType::MessageQueued,
            DeliveryStatus::Failed => EventType::MessageFailed,
            DeliveryStatus::Delivered => EventType::MessageDelivered,
            DeliveryStatus::Opened => EventType::MessageOpened,
            DeliveryStatus::Clicked => EventType::MessageClicked,
        }
    }
}
