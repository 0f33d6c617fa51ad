//! Funnel scheduler — owns the pending stage-transition task of every
//! in-flight record.
//!
//! Each record has at most one pending task, keyed by record id and indexed
//! by campaign. Tasks deregister themselves when they finish; callers can
//! cancel a single record (delivery receipt override) or every record of a
//! campaign (campaign deletion). A cancelled campaign stays cancelled: later
//! `schedule` calls for it are refused, so a dispatch still running when the
//! campaign is cancelled cannot leave transitions behind.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::task::AbortHandle;
use tracing::debug;
use uuid::Uuid;

struct PendingTransition {
    campaign_id: Uuid,
    ticket: u64,
    handle: AbortHandle,
}

#[derive(Clone, Default)]
pub struct FunnelScheduler {
    pending: Arc<DashMap<Uuid, PendingTransition>>,
    cancelled: Arc<DashSet<Uuid>>,
    next_ticket: Arc<AtomicU64>,
}

impl std::fmt::Debug for FunnelScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunnelScheduler")
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl FunnelScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `work` as the pending transition for `record_id`, replacing
    /// (and aborting) any task already registered for it. Returns false,
    /// without spawning, when `campaign_id` has been cancelled.
    pub fn schedule<F>(&self, record_id: Uuid, campaign_id: Uuid, work: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_cancelled(&campaign_id) {
            return false;
        }
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let pending = Arc::clone(&self.pending);
        let task = tokio::spawn(async move {
            work.await;
            pending.remove_if(&record_id, |_, p| p.ticket == ticket);
        });

        let previous = self.pending.insert(
            record_id,
            PendingTransition {
                campaign_id,
                ticket,
                handle: task.abort_handle(),
            },
        );
        if let Some(previous) = previous {
            previous.handle.abort();
        }
        // The task may have run to completion before it was registered.
        if task.is_finished() {
            self.pending.remove_if(&record_id, |_, p| p.ticket == ticket);
        }
        // A concurrent cancel_campaign may have swept before the insert above.
        if self.is_cancelled(&campaign_id) {
            if let Some((_, pending)) = self.pending.remove_if(&record_id, |_, p| p.ticket == ticket) {
                pending.handle.abort();
            }
            return false;
        }
        true
    }

    /// Abort the pending transition of one record. Returns whether one existed.
    pub fn cancel(&self, record_id: &Uuid) -> bool {
        match self.pending.remove(record_id) {
            Some((_, pending)) => {
                pending.handle.abort();
                debug!(record_id = %record_id, "Pending transition cancelled");
                true
            }
            None => false,
        }
    }

    /// Abort every pending transition belonging to `campaign_id` and refuse
    /// any scheduled later.
    pub fn cancel_campaign(&self, campaign_id: &Uuid) -> usize {
        self.cancelled.insert(*campaign_id);
        let record_ids: Vec<Uuid> = self
            .pending
            .iter()
            .filter(|entry| entry.value().campaign_id == *campaign_id)
            .map(|entry| *entry.key())
            .collect();
        let cancelled = record_ids.iter().filter(|id| self.cancel(id)).count();
        debug!(campaign_id = %campaign_id, cancelled, "Campaign transitions cancelled");
        cancelled
    }

    pub fn is_cancelled(&self, campaign_id: &Uuid) -> bool {
        self.cancelled.contains(campaign_id)
    }

    pub fn is_pending(&self, record_id: &Uuid) -> bool {
        self.pending.contains_key(record_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn pending_for(&self, campaign_id: &Uuid) -> usize {
        self.pending
            .iter()
            .filter(|entry| entry.value().campaign_id == *campaign_id)
            .count()
    }
}
