//! Funnel stages and the randomness that drives them.
//!
//! A queued record walks `delivered -> opened -> clicked`. Each stage waits a
//! delay drawn from its window, then succeeds with the stage probability;
//! the first miss ends the walk and the record keeps its current status.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};
use uuid::Uuid;

use campaign_core::config::{DelayWindow, DeliveryConfig};
use campaign_core::event_bus::{make_event, EventSink};
use campaign_core::store::DeliveryLogStore;
use campaign_core::types::{DeliveryStatus, EventType, TransitionOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunnelStage {
    Delivered,
    Opened,
    Clicked,
}

impl FunnelStage {
    pub const SEQUENCE: [FunnelStage; 3] =
        [FunnelStage::Delivered, FunnelStage::Opened, FunnelStage::Clicked];

    pub fn status(self) -> DeliveryStatus {
        match self {
            FunnelStage::Delivered => DeliveryStatus::Delivered,
            FunnelStage::Opened => DeliveryStatus::Opened,
            FunnelStage::Clicked => DeliveryStatus::Clicked,
        }
    }

    pub fn probability(self, config: &DeliveryConfig) -> f64 {
        match self {
            FunnelStage::Delivered => config.delivery_rate,
            FunnelStage::Opened => config.open_rate,
            FunnelStage::Clicked => config.click_rate,
        }
    }

    pub fn delay_window(self, config: &DeliveryConfig) -> DelayWindow {
        match self {
            FunnelStage::Delivered => config.delivery_delay,
            FunnelStage::Opened => config.open_delay,
            FunnelStage::Clicked => config.click_delay,
        }
    }
}

/// Shared RNG for record creation and stage transitions. Seeded from the
/// config when a seed is given, so runs can be replayed.
pub struct FunnelRng {
    inner: Mutex<StdRng>,
}

impl FunnelRng {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            inner: Mutex::new(rng),
        }
    }

    /// Bernoulli trial: true with probability `p` (clamped to `[0, 1]`).
    /// NaN counts as zero.
    pub fn chance(&self, p: f64) -> bool {
        if p.is_nan() {
            return false;
        }
        self.inner.lock().gen_bool(p.clamp(0.0, 1.0))
    }

    /// Uniform delay in `[min, max)`; a degenerate window yields `min`.
    pub fn delay(&self, window: DelayWindow) -> Duration {
        if window.max_ms <= window.min_ms {
            return window.min();
        }
        Duration::from_millis(self.inner.lock().gen_range(window.min_ms..window.max_ms))
    }
}

/// Everything one record's funnel walk needs, detached from the dispatch
/// that spawned it.
pub struct FunnelDriver {
    pub(crate) logs: Arc<dyn DeliveryLogStore>,
    pub(crate) rng: Arc<FunnelRng>,
    pub(crate) config: DeliveryConfig,
    pub(crate) event_sink: Arc<dyn EventSink>,
    pub(crate) node_id: String,
}

#[derive(Debug, Clone)]
pub struct FunnelTicket {
    pub record_id: Uuid,
    pub campaign_id: Uuid,
    pub customer_id: String,
    pub message_id: String,
}

impl FunnelDriver {
    /// Walk one record through the funnel. Returns the last stage reached.
    pub async fn drive(&self, ticket: FunnelTicket) -> Option<FunnelStage> {
        let mut reached = None;
        for stage in FunnelStage::SEQUENCE {
            tokio::time::sleep(self.rng.delay(stage.delay_window(&self.config))).await;

            if !self.rng.chance(stage.probability(&self.config)) {
                debug!(message_id = %ticket.message_id, stage = ?stage, "Funnel stopped");
                return reached;
            }

            match self
                .logs
                .advance(ticket.record_id, stage.status(), Utc::now())
                .await
            {
                Ok(TransitionOutcome::Applied) => {
                    metrics::counter!(
                        "delivery.stage_transitions",
                        "stage" => stage.status().as_str()
                    )
                    .increment(1);
                    self.event_sink.emit(make_event(
                        EventType::for_stage(stage.status()),
                        ticket.campaign_id,
                        Some(ticket.customer_id.clone()),
                        Some(ticket.message_id.clone()),
                        &self.node_id,
                    ));
                    reached = Some(stage);
                }
                Ok(outcome) => {
                    debug!(
                        message_id = %ticket.message_id,
                        stage = ?stage,
                        ?outcome,
                        "Scheduled transition superseded"
                    );
                    return reached;
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        message_id = %ticket.message_id,
                        stage = ?stage,
                        "Stage transition failed, abandoning funnel"
                    );
                    return reached;
                }
            }
        }
        reached
    }
}
