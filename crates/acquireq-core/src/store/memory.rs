//! In-process store for tests and ephemeral deployments.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use chrono::{SubsecRound, Utc};
use itertools::Itertools;
use tokio::sync::Mutex;

use super::{LeaseStore, PendingOffer};
use crate::{
    model::{Claimant, ClaimantId, ClaimantInfo, Resource, ResourceId, ResourceState},
    Error, Result,
};

#[derive(Debug, Default)]
struct Tables {
    resources: HashMap<ResourceId, ResourceState>,
    claimants: HashMap<ClaimantId, Claimant>,
    last_claimant_id: i64,
}

/// Lease store kept entirely in memory.
///
/// Honors the same revision check as [`SqliteStore`](super::SqliteStore).
/// [`MemoryStore::fail_saves`] makes every subsequent save fail, for
/// exercising storage-fault paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_saves: AtomicBool,
}

impl Tables {
    /// Revision-checked replace of one aggregate
    fn commit(&mut self, state: &ResourceState) -> Result<ResourceState> {
        if state.holder.is_some() && state.offer_deadline.is_some() {
            return Err(Error::DatabaseError(
                "holder and offer deadline cannot both be set".into(),
            ));
        }

        let stored = self
            .resources
            .get_mut(state.id())
            .ok_or_else(|| Error::ResourceNotFound(state.id().to_string()))?;
        if stored.revision != state.revision {
            return Err(Error::Conflict {
                resource_id: state.id().to_string(),
                expected: state.revision,
            });
        }

        let mut saved = state.clone();
        saved.revision += 1;
        // Descriptive attributes are immutable once created
        saved.resource = stored.resource.clone();
        *stored = saved.clone();
        Ok(saved)
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every save fail with a database error until switched off
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of registered claimants
    pub async fn claimant_count(&self) -> usize {
        self.tables.lock().await.claimants.len()
    }

    fn check_injected_failure(&self) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(Error::DatabaseError("injected save failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl LeaseStore for MemoryStore {
    async fn create_resource(&self, resource: &Resource) -> Result<ResourceState> {
        let mut tables = self.tables.lock().await;
        if tables.resources.contains_key(&resource.id) {
            return Err(Error::DatabaseError(format!(
                "Resource '{}' already exists",
                resource.id
            )));
        }
        let state = ResourceState::new(resource.clone());
        tables.resources.insert(resource.id.clone(), state.clone());
        Ok(state)
    }

    async fn load_state(&self, id: &ResourceId) -> Result<Option<ResourceState>> {
        Ok(self.tables.lock().await.resources.get(id).cloned())
    }

    async fn save_state(&self, state: &ResourceState) -> Result<ResourceState> {
        self.check_injected_failure()?;
        let mut tables = self.tables.lock().await;
        tables.commit(state)
    }

    async fn save_with_new_claimant(
        &self,
        state: &ResourceState,
        info: &ClaimantInfo,
        enqueue: &(dyn for<'s> Fn(&'s mut ResourceState, Claimant) + Send + Sync),
    ) -> Result<(ResourceState, Claimant)> {
        self.check_injected_failure()?;
        let mut tables = self.tables.lock().await;

        let claimant = Claimant {
            id: ClaimantId::new(tables.last_claimant_id + 1),
            label: info.label.clone(),
            contact: info.contact.clone(),
            joined_at: Utc::now().trunc_subsecs(3),
        };
        let mut joined = state.clone();
        enqueue(&mut joined, claimant.clone());

        let saved = tables.commit(&joined)?;
        tables.last_claimant_id = claimant.id.get();
        tables.claimants.insert(claimant.id, claimant.clone());
        Ok((saved, claimant))
    }

    async fn get_claimant(&self, id: ClaimantId) -> Result<Option<Claimant>> {
        Ok(self.tables.lock().await.claimants.get(&id).cloned())
    }

    async fn pending_offers(&self) -> Result<Vec<PendingOffer>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .resources
            .values()
            .filter_map(|state| {
                state.offer_deadline.map(|deadline| PendingOffer {
                    resource_id: state.id().clone(),
                    deadline,
                })
            })
            .sorted_by_key(|offer| offer.deadline)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::resource;

    #[tokio::test]
    async fn test_save_bumps_revision() -> Result<()> {
        let store = MemoryStore::new();
        let state = store.create_resource(&resource(5)).await?;
        let saved = store.save_state(&state).await?;
        assert_eq!(saved.revision, 1);
        let again = store.save_state(&saved).await?;
        assert_eq!(again.revision, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_stale_save_conflicts() -> Result<()> {
        let store = MemoryStore::new();
        let state = store.create_resource(&resource(5)).await?;
        store.save_state(&state).await?;
        assert!(matches!(
            store.save_state(&state).await,
            Err(Error::Conflict { expected: 0, .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_resource_rejected() -> Result<()> {
        let store = MemoryStore::new();
        store.create_resource(&resource(5)).await?;
        assert!(store.create_resource(&resource(5)).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_injected_failure_leaves_state_untouched() -> Result<()> {
        let store = MemoryStore::new();
        let res = resource(5);
        let mut state = store.create_resource(&res).await?;
        store.fail_saves(true);
        state.offer_deadline = Some(Utc::now());
        assert!(matches!(
            store.save_state(&state).await,
            Err(Error::DatabaseError(_))
        ));
        let stored = store.load_state(&res.id).await?;
        assert_eq!(stored.and_then(|s| s.offer_deadline), None);
        Ok(())
    }

    fn enqueue_tail(state: &mut ResourceState, claimant: Claimant) {
        crate::machine::join(state, claimant);
    }

    #[tokio::test]
    async fn test_new_claimant_is_queued_with_sequential_id() -> Result<()> {
        let store = MemoryStore::new();
        let state = store.create_resource(&resource(5)).await?;

        let (state, a) = store
            .save_with_new_claimant(&state, &ClaimantInfo::new("a"), &enqueue_tail)
            .await?;
        let (state, b) = store
            .save_with_new_claimant(&state, &ClaimantInfo::new("b"), &enqueue_tail)
            .await?;
        assert_eq!(a.id.get() + 1, b.id.get());
        assert_eq!(state.revision, 2);
        assert!(state.is_queued(a.id) && state.is_queued(b.id));
        assert_eq!(store.get_claimant(b.id).await?, Some(b));
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_join_registers_no_claimant() -> Result<()> {
        let store = MemoryStore::new();
        let state = store.create_resource(&resource(5)).await?;
        store.save_state(&state).await?;

        // Stale revision
        let result = store
            .save_with_new_claimant(&state, &ClaimantInfo::new("a"), &enqueue_tail)
            .await;
        assert!(matches!(result, Err(Error::Conflict { .. })));

        store.fail_saves(true);
        let fresh = store.load_state(state.id()).await?;
        let fresh = fresh.ok_or_else(|| Error::ResourceNotFound(state.id().to_string()))?;
        let result = store
            .save_with_new_claimant(&fresh, &ClaimantInfo::new("a"), &enqueue_tail)
            .await;
        assert!(matches!(result, Err(Error::DatabaseError(_))));

        assert_eq!(store.claimant_count().await, 0);
        store.fail_saves(false);
        let (_, a) = store
            .save_with_new_claimant(&fresh, &ClaimantInfo::new("a"), &enqueue_tail)
            .await?;
        assert_eq!(a.id, ClaimantId::new(1));
        Ok(())
    }
}
