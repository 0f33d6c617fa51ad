//! Delivery event bus — trait for publishing campaign and message
//! lifecycle events from any module.
//!
//! Modules accept an `Arc<dyn EventSink>`; production wiring routes events
//! to whatever downstream consumer owns reporting.

use crate::types::{DeliveryEvent, EventType};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

pub trait EventSink: Send + Sync {
    fn emit(&self, event: DeliveryEvent);
}

/// No-op sink for modules that don't need event emission.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: DeliveryEvent) {}
}

/// Sink that forwards every event to `tracing` at debug level.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: DeliveryEvent) {
        tracing::debug!(
            event_type = ?event.event_type,
            campaign_id = %event.campaign_id,
            message_id = event.message_id.as_deref().unwrap_or("-"),
            "delivery event"
        );
    }
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<DeliveryEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<DeliveryEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn count_type(&self, event_type: EventType) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: DeliveryEvent) {
        self.events.lock().push(event);
    }
}

/// Node id used when none is configured.
pub const DEFAULT_NODE_ID: &str = "node-01";

pub fn make_event(
    event_type: EventType,
    campaign_id: Uuid,
    customer_id: Option<String>,
    message_id: Option<String>,
    node_id: &str,
) -> DeliveryEvent {
    DeliveryEvent {
        event_id: Uuid::new_v4(),
        event_type,
        campaign_id,
        customer_id,
        message_id,
        node_id: node_id.to_string(),
        timestamp: Utc::now(),
    }
}

pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}
