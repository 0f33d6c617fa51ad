//! In-memory delivery log store backed by DashMap.
//!
//! Production: replace with the document store holding communication logs.
//! Enforces `message_id` uniqueness the way a unique index would.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use campaign_core::store::{DeliveryLogStore, LogFilter};
use campaign_core::types::{CommunicationLog, DeliveryStatus, TransitionOutcome};
use campaign_core::{CampaignError, CampaignResult};

#[derive(Default)]
pub struct InMemoryLogStore {
    logs: DashMap<Uuid, CommunicationLog>,
    by_message_id: DashMap<String, Uuid>,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}

#[async_trait]
impl DeliveryLogStore for InMemoryLogStore {
    async fn create(&self, log: CommunicationLog) -> CampaignResult<CommunicationLog> {
        match self.by_message_id.entry(log.message_id.clone()) {
            Entry::Occupied(_) => Err(CampaignError::Store(format!(
                "duplicate message_id {}",
                log.message_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(log.id);
                self.logs.insert(log.id, log.clone());
                Ok(log)
            }
        }
    }

    async fn find(&self, filter: &LogFilter) -> CampaignResult<Vec<CommunicationLog>> {
        Ok(self
            .logs
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn find_by_message_id(&self, message_id: &str) -> CampaignResult<Option<CommunicationLog>> {
        let Some(id) = self.by_message_id.get(message_id).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.logs.get(&id).map(|log| log.value().clone()))
    }

    async fn advance(
        &self,
        id: Uuid,
        status: DeliveryStatus,
        at: DateTime<Utc>,
    ) -> CampaignResult<TransitionOutcome> {
        Ok(match self.logs.get_mut(&id) {
            Some(mut log) => log.advance_to(status, at),
            None => TransitionOutcome::NotFound,
        })
    }
}
