// SPDX-License-Identifier: MIT OR Apache-2.0
//! Broadcast-based event bus streaming [`WorkflowEvent`]s to whatever is
//! listening for a run's progress — `pml-daemon`'s SSE layer in
//! production, a test subscriber in this crate's own tests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

const DEFAULT_CAPACITY: usize = 256;

/// One of the SSE events a workflow run emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A run was created and layer 0 is about to launch.
    WorkflowStarted {
        /// The run id.
        run_id: Uuid,
        /// The capability fqdn being executed, if any.
        capability_fqdn: Option<String>,
    },
    /// A node began execution.
    TaskStarted {
        /// The run id.
        run_id: Uuid,
        /// The node id.
        node_id: String,
    },
    /// A node finished, successfully or not.
    TaskCompleted {
        /// The run id.
        run_id: Uuid,
        /// The node id.
        node_id: String,
        /// Whether the node succeeded.
        success: bool,
        /// Wall-clock duration of the node's execution.
        duration_ms: u64,
        /// Whether the result was served from the speculation cache.
        cached: bool,
    },
    /// A HIL or AIL gate opened and is awaiting a decision.
    ApprovalRequired {
        /// The run id.
        run_id: Uuid,
        /// The node id the gate blocks.
        node_id: String,
    },
    /// An AIL decision point is awaiting a branch choice.
    AwaitingInput {
        /// The run id.
        run_id: Uuid,
        /// The decision node id.
        node_id: String,
        /// The outcomes available to choose from.
        options: Vec<String>,
    },
    /// The run reached a terminal state.
    WorkflowCompleted {
        /// The run id.
        run_id: Uuid,
        /// Whether the run completed successfully.
        success: bool,
    },
    /// A run-level error occurred.
    Error {
        /// The run id.
        run_id: Uuid,
        /// Stable error code string.
        kind: String,
        /// Human-readable message.
        message: String,
    },
}

impl WorkflowEvent {
    /// The run id every variant carries.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        match self {
            Self::WorkflowStarted { run_id, .. }
            | Self::TaskStarted { run_id, .. }
            | Self::TaskCompleted { run_id, .. }
            | Self::ApprovalRequired { run_id, .. }
            | Self::AwaitingInput { run_id, .. }
            | Self::WorkflowCompleted { run_id, .. }
            | Self::Error { run_id, .. } => *run_id,
        }
    }
}

#[derive(Debug, Default)]
struct StatsInner {
    total_published: AtomicU64,
    dropped_events: AtomicU64,
}

/// Broadcast-based event bus with publish statistics, shared across every
/// in-flight run (subscribers filter by `run_id` themselves).
pub struct EventBus {
    tx: broadcast::Sender<WorkflowEvent>,
    stats: Arc<StatsInner>,
}

impl EventBus {
    /// A bus with the default channel capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// A bus with an explicit channel capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, stats: Arc::new(StatsInner::default()) }
    }

    /// Subscribe to every event published from now on.
    #[must_use]
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription { rx: self.tx.subscribe(), stats: Arc::clone(&self.stats) }
    }

    /// Publish an event. Silently dropped (and counted) if nobody is subscribed.
    pub fn publish(&self, event: WorkflowEvent) {
        self.stats.total_published.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(event).is_err() {
            self.stats.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// A snapshot of bus statistics.
    #[must_use]
    pub fn stats(&self) -> EventBusStats {
        EventBusStats { total_published: self.stats.total_published.load(Ordering::Relaxed), active_subscribers: self.tx.receiver_count(), dropped_events: self.stats.dropped_events.load(Ordering::Relaxed) }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A handle receiving events from an [`EventBus`].
pub struct EventSubscription {
    rx: broadcast::Receiver<WorkflowEvent>,
    stats: Arc<StatsInner>,
}

impl EventSubscription {
    /// Receive the next event, waiting asynchronously. `None` once the
    /// bus is dropped.
    pub async fn recv(&mut self) -> Option<WorkflowEvent> {
        loop {
            match self.rx.recv().await {
                Ok(ev) => return Some(ev),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.stats.dropped_events.fetch_add(n, Ordering::Relaxed);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Filter this subscription down to one run's events only, the shape
    /// `pml-daemon`'s per-workflow SSE channel needs.
    #[must_use]
    pub fn for_run(self, run_id: Uuid) -> RunSubscription {
        RunSubscription { inner: self, run_id }
    }
}

/// An [`EventSubscription`] filtered to a single run id.
pub struct RunSubscription {
    inner: EventSubscription,
    run_id: Uuid,
}

impl RunSubscription {
    /// Receive the next event for this run, waiting asynchronously.
    pub async fn recv(&mut self) -> Option<WorkflowEvent> {
        loop {
            match self.inner.recv().await {
                Some(ev) if ev.run_id() == self.run_id => return Some(ev),
                Some(_) => continue,
                None => return None,
            }
        }
    }
}

/// Snapshot of [`EventBus`] statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBusStats {
    /// Total events published.
    pub total_published: u64,
    /// Subscribers currently listening.
    pub active_subscribers: usize,
    /// Events lost to no-subscriber drops or subscriber lag.
    pub dropped_events: u64,
}

/// Timestamp helper so call sites don't reach for `chrono` directly just
/// to stamp an event; kept here since the bus is the thing that cares
/// about event ordering.
#[must_use]
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        bus.publish(WorkflowEvent::WorkflowStarted { run_id: Uuid::nil(), capability_fqdn: None });
        let event = sub.recv().await.unwrap();
        assert_eq!(event.run_id(), Uuid::nil());
    }

    #[tokio::test]
    async fn run_subscription_filters_other_runs() {
        let bus = EventBus::new();
        let target = Uuid::new_v4();
        let mut sub = bus.subscribe().for_run(target);
        bus.publish(WorkflowEvent::TaskStarted { run_id: Uuid::new_v4(), node_id: "a".into() });
        bus.publish(WorkflowEvent::TaskStarted { run_id: target, node_id: "b".into() });
        let event = sub.recv().await.unwrap();
        assert_eq!(event, WorkflowEvent::TaskStarted { run_id: target, node_id: "b".into() });
    }

    #[test]
    fn publish_without_subscribers_counts_as_dropped() {
        let bus = EventBus::new();
        bus.publish(WorkflowEvent::WorkflowStarted { run_id: Uuid::nil(), capability_fqdn: None });
        let stats = bus.stats();
        assert_eq!(stats.total_published, 1);
        assert_eq!(stats.dropped_events, 1);
    }
}
