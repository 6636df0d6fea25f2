//! Resource snapshots and their delivery to subscribers.
//!
//! The engine publishes after every committed transition, while still holding
//! the resource's lock, so subscribers observe snapshots in commit order.
//! Publishing never blocks: a slow subscriber lags and skips ahead instead of
//! holding up the state machine.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::{ClaimantId, ResourceId, ResourceState};

/// Default number of snapshots buffered per subscriber
pub const DEFAULT_SNAPSHOT_BUFFER: usize = 256;

/// The current holder as shown to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HolderView {
    pub claimant_id: ClaimantId,
    pub label: String,
}

/// One queue position as shown to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueView {
    pub claimant_id: ClaimantId,
    pub label: String,
    /// True only for the head, and only while an offer is outstanding
    pub is_offered: bool,
}

/// Rendered state of one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub resource_id: ResourceId,
    pub name: String,
    pub offer_duration_seconds: u32,
    pub holder: Option<HolderView>,
    pub queue: Vec<QueueView>,
    pub offer_deadline: Option<DateTime<Utc>>,
}

impl From<&ResourceState> for Snapshot {
    fn from(state: &ResourceState) -> Self {
        let offer_active = state.has_active_offer();
        Self {
            resource_id: state.resource.id.clone(),
            name: state.resource.name.clone(),
            offer_duration_seconds: state.resource.offer_duration_secs,
            holder: state.holder.as_ref().map(|c| HolderView {
                claimant_id: c.id,
                label: c.label.clone(),
            }),
            queue: state
                .queue
                .iter()
                .enumerate()
                .map(|(idx, entry)| QueueView {
                    claimant_id: entry.claimant.id,
                    label: entry.claimant.label.clone(),
                    is_offered: offer_active && idx == 0,
                })
                .collect(),
            offer_deadline: state.offer_deadline,
        }
    }
}

/// Receives snapshots after each committed transition.
///
/// Implementations must return promptly; they run inside the resource's
/// critical section.
pub trait SnapshotPublisher: Send + Sync + 'static {
    fn publish(&self, snapshot: &Snapshot);
}

impl<P: SnapshotPublisher + ?Sized> SnapshotPublisher for Arc<P> {
    fn publish(&self, snapshot: &Snapshot) {
        (**self).publish(snapshot);
    }
}

/// Fans snapshots out over a tokio broadcast channel
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<Arc<Snapshot>>,
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_SNAPSHOT_BUFFER)
    }
}

impl BroadcastPublisher {
    /// Create a publisher buffering up to `capacity` snapshots per subscriber
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Receive snapshots of a single resource
    #[must_use]
    pub fn subscribe(&self, resource_id: &ResourceId) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            filter: Some(resource_id.clone()),
        }
    }

    /// Receive snapshots of every resource
    #[must_use]
    pub fn subscribe_all(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            filter: None,
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl SnapshotPublisher for BroadcastPublisher {
    fn publish(&self, snapshot: &Snapshot) {
        tracing::debug!(
            resource = %snapshot.resource_id,
            queued = snapshot.queue.len(),
            offer_active = snapshot.offer_deadline.is_some(),
            "publishing snapshot"
        );
        // No subscribers is not an error
        let _ = self.tx.send(Arc::new(snapshot.clone()));
    }
}

/// A stream of snapshots, optionally filtered to one resource
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<Arc<Snapshot>>,
    filter: Option<ResourceId>,
}

impl Subscription {
    /// Wait for the next matching snapshot.
    ///
    /// Returns `None` once the publisher is gone. A subscriber that falls
    /// behind skips the snapshots it missed and continues with newer ones.
    pub async fn recv(&mut self) -> Option<Arc<Snapshot>> {
        loop {
            match self.rx.recv().await {
                Ok(snapshot) if self.matches(&snapshot) => return Some(snapshot),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "snapshot subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next matching snapshot if one is already buffered
    pub fn try_recv(&mut self) -> Option<Arc<Snapshot>> {
        loop {
            match self.rx.try_recv() {
                Ok(snapshot) if self.matches(&snapshot) => return Some(snapshot),
                Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return None,
            }
        }
    }

    fn matches(&self, snapshot: &Snapshot) -> bool {
        self.filter
            .as_ref()
            .map_or(true, |id| *id == snapshot.resource_id)
    }
}
