//! Persistence for resources, claimants and queues.
//!
//! The engine never edits rows piecemeal. It loads a [`ResourceState`],
//! applies a pure transition and hands the result back to
//! [`LeaseStore::save_state`], which writes holder, deadline and queue in one
//! transaction guarded by the state's revision. A save against a stale
//! revision fails with [`Error::Conflict`](crate::Error::Conflict) and writes
//! nothing.

mod memory;
mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::{
    model::{Claimant, ClaimantId, ClaimantInfo, Resource, ResourceId, ResourceState},
    Result,
};

/// A resource with an outstanding offer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOffer {
    pub resource_id: ResourceId,
    pub deadline: DateTime<Utc>,
}

/// Storage contract for the lease engine.
///
/// This trait uses `async_trait` for async method support.
#[async_trait]
pub trait LeaseStore: Send + Sync + 'static {
    /// Persist a new resource with no holder, no offer and an empty queue.
    async fn create_resource(&self, resource: &Resource) -> Result<ResourceState>;

    /// Load the full aggregate for a resource.
    async fn load_state(&self, id: &ResourceId) -> Result<Option<ResourceState>>;

    /// Atomically replace holder, deadline and queue.
    ///
    /// Succeeds only if the stored revision still equals `state.revision`;
    /// returns the saved state with its new revision.
    async fn save_state(&self, state: &ResourceState) -> Result<ResourceState>;

    /// Register a new claimant and save `state` with it queued, in one
    /// transaction.
    ///
    /// `enqueue` runs once the claimant has its id and must add it to the
    /// aggregate (and may offer it the resource). The revision check is the
    /// same as [`LeaseStore::save_state`]; on any failure neither the
    /// claimant nor the queue change is written.
    async fn save_with_new_claimant(
        &self,
        state: &ResourceState,
        info: &ClaimantInfo,
        enqueue: &(dyn for<'s> Fn(&'s mut ResourceState, Claimant) + Send + Sync),
    ) -> Result<(ResourceState, Claimant)>;

    async fn get_claimant(&self, id: ClaimantId) -> Result<Option<Claimant>>;

    /// Every resource with an offer deadline set.
    async fn pending_offers(&self) -> Result<Vec<PendingOffer>>;

    /// Offers whose deadline is at or before `now`.
    async fn offers_past_deadline(&self, now: DateTime<Utc>) -> Result<Vec<PendingOffer>> {
        Ok(self
            .pending_offers()
            .await?
            .into_iter()
            .filter(|offer| offer.deadline <= now)
            .collect())
    }
}
