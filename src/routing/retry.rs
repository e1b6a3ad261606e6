//! Deferred re-routing while a connector's target has not been measured yet.
//!
//! Each connector moves through `Idle -> Pending -> (Resolved | Aborted)`.
//! At most one retry is pending per connector; a ticket whose attempt number
//! no longer matches the connector's state is stale and is ignored on fire.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use hashbrown::HashMap;
use serde::Serialize;
use tracing::{debug, trace};

use super::config::DeferralSettings;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeferralState {
    #[default]
    Idle,
    Pending {
        attempt: u32,
    },
    Resolved,
    Aborted,
}

/// A scheduled re-dispatch: fire after `frames` frame ticks plus `delay_ms`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct RetryTicket {
    pub root: String,
    pub connector_id: String,
    pub attempt: u32,
    pub frames: u32,
    pub delay_ms: u64,
}

/// Host frame/timer queue.
pub trait Scheduler {
    fn schedule(&mut self, ticket: RetryTicket);
}

/// A scheduler that only queues tickets; the host (or a test) drains and fires them.
#[derive(Clone, Debug, Default)]
pub struct ManualScheduler {
    queue: Arc<Mutex<VecDeque<RetryTicket>>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        ManualScheduler::default()
    }

    fn with_queue<R>(&self, f: impl FnOnce(&mut VecDeque<RetryTicket>) -> R) -> R {
        let mut guard = match self.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    pub fn len(&self) -> usize {
        self.with_queue(|queue| queue.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn drain(&self) -> Vec<RetryTicket> {
        self.with_queue(|queue| queue.drain(..).collect())
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&mut self, ticket: RetryTicket) {
        self.with_queue(|queue| queue.push_back(ticket));
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeferDecision {
    /// A retry was scheduled with this ticket.
    Scheduled(RetryTicket),
    /// A retry is already in flight; nothing new was scheduled.
    AlreadyPending { attempt: u32 },
    /// Retries are used up; route with whatever geometry exists.
    Exhausted,
}

#[derive(Clone, Copy, Debug, Default)]
struct Entry {
    state: DeferralState,
    used: u32,
}

/// Deferral state per `(root, connector id)`.
#[derive(Debug, Default)]
pub struct DeferralTracker {
    entries: HashMap<(String, String), Entry>,
}

fn key(root: &str, connector_id: &str) -> (String, String) {
    (root.to_string(), connector_id.to_string())
}

impl DeferralTracker {
    pub fn new() -> Self {
        DeferralTracker::default()
    }

    pub fn state(&self, root: &str, connector_id: &str) -> DeferralState {
        self.entries
            .get(&key(root, connector_id))
            .map(|entry| entry.state)
            .unwrap_or_default()
    }

    pub fn retries_used(&self, root: &str, connector_id: &str) -> u32 {
        self.entries.get(&key(root, connector_id)).map_or(0, |entry| entry.used)
    }

    /// The target is unmeasured: decide whether to defer.
    pub fn defer(&mut self, root: &str, connector_id: &str, settings: &DeferralSettings) -> DeferDecision {
        let entry = self.entries.entry(key(root, connector_id)).or_default();
        if let DeferralState::Pending { attempt } = entry.state {
            trace!(%connector_id, attempt, "retry already pending");
            return DeferDecision::AlreadyPending { attempt };
        }
        if entry.used >= settings.max_retries {
            entry.state = DeferralState::Aborted;
            debug!(%connector_id, used = entry.used, "geometry retries exhausted");
            return DeferDecision::Exhausted;
        }
        entry.used += 1;
        entry.state = DeferralState::Pending { attempt: entry.used };
        DeferDecision::Scheduled(RetryTicket {
            root: root.to_string(),
            connector_id: connector_id.to_string(),
            attempt: entry.used,
            frames: settings.frame_ticks,
            delay_ms: settings.delay_ms,
        })
    }

    /// The target became measurable; the retry budget starts over.
    pub fn resolve(&mut self, root: &str, connector_id: &str) {
        let entry = self.entries.entry(key(root, connector_id)).or_default();
        entry.state = DeferralState::Resolved;
        entry.used = 0;
    }

    /// The connector was routed without deferring: an outstanding retry is void.
    pub fn cancel(&mut self, root: &str, connector_id: &str) {
        if let Some(entry) = self.entries.get_mut(&key(root, connector_id)) {
            if let DeferralState::Pending { attempt } = entry.state {
                trace!(%connector_id, attempt, "pending retry superseded");
                entry.state = DeferralState::Idle;
            }
        }
    }

    /// Claim a fired ticket. Returns `false` for stale tickets.
    pub fn claim(&mut self, ticket: &RetryTicket) -> bool {
        match self.entries.get_mut(&key(&ticket.root, &ticket.connector_id)) {
            Some(entry) if entry.state == (DeferralState::Pending { attempt: ticket.attempt }) => {
                entry.state = DeferralState::Idle;
                true
            }
            _ => false,
        }
    }

    /// Drop every connector tracked under `root`.
    pub fn forget_root(&mut self, root: &str) {
        self.entries.retain(|(entry_root, _), _| entry_root != root);
    }
}
