//! The lease engine.
//!
//! Orchestrates the pure transitions in [`crate::machine`]: every operation
//! takes its resource's lock, loads the aggregate, applies one transition
//! (plus the follow-up offer to the next claimant, when it asks for one),
//! saves the result in a single write and then runs the side effects (cancel
//! or arm the offer timer, publish snapshots) before releasing the lock.
//! Resources never share a lock.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::{
    machine::{self, Step},
    model::{
        ClaimantId, ClaimantInfo, CreatedResource, NewResource, Resource, ResourceId,
        ResourceState,
    },
    publisher::{Snapshot, SnapshotPublisher},
    store::LeaseStore,
    timer::{remaining, Clock, OfferTimer, SystemClock, TimerService, TimerTicket},
    Error, Result,
};

/// Delay before an expiry that hit a store fault is tried again
const EXPIRY_RETRY: Duration = Duration::from_secs(1);

/// Per-resource critical section; owns the resource's only offer timer
#[derive(Debug, Default)]
struct ResourceSlot {
    timer: Option<OfferTimer>,
}

impl ResourceSlot {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }
}

struct Inner {
    store: Arc<dyn LeaseStore>,
    publisher: Arc<dyn SnapshotPublisher>,
    clock: Arc<dyn Clock>,
    timers: TimerService,
    slots: Mutex<HashMap<ResourceId, Arc<Mutex<ResourceSlot>>>>,
}

/// Cheaply cloneable handle to the lease state machine.
///
/// Run [`LeaseEngine::recover`] once before serving operations so offers
/// persisted by a previous process get their timers back.
#[derive(Clone)]
pub struct LeaseEngine {
    inner: Arc<Inner>,
}

impl LeaseEngine {
    /// Create an engine on the system clock
    #[must_use]
    pub fn new(store: Arc<dyn LeaseStore>, publisher: Arc<dyn SnapshotPublisher>) -> Self {
        Self::with_clock(store, publisher, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(
        store: Arc<dyn LeaseStore>,
        publisher: Arc<dyn SnapshotPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                publisher,
                clock,
                timers: TimerService::new(),
                slots: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Register a new resource with an empty queue.
    ///
    /// # Errors
    ///
    /// Returns `InvalidResource` for an empty name or zero offer duration,
    /// or a store error.
    pub async fn create_resource(&self, request: NewResource) -> Result<CreatedResource> {
        request.validate()?;
        let resource = Resource {
            id: ResourceId::generate(),
            name: request.name.trim().to_string(),
            description: request.description,
            offer_duration_secs: request.offer_duration_secs,
            admin_secret: uuid::Uuid::new_v4().to_string(),
        };
        self.inner.store.create_resource(&resource).await?;
        tracing::info!(
            resource = %resource.id,
            name = %resource.name,
            offer_duration_secs = resource.offer_duration_secs,
            "created resource"
        );
        Ok(CreatedResource {
            id: resource.id,
            admin_secret: resource.admin_secret,
        })
    }

    /// Queue a claimant, creating it on first sight.
    ///
    /// Joining again while already queued returns the same id and changes
    /// nothing. Joining never disturbs an outstanding offer.
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` for an unknown resource, or a store error.
    pub async fn join(&self, resource_id: &ResourceId, info: ClaimantInfo) -> Result<ClaimantId> {
        let slot = self.slot(resource_id).await?;
        let mut slot = slot.lock().await;

        let mut state = self.load(resource_id).await?;
        let known = match info.id {
            Some(id) => self.inner.store.get_claimant(id).await?,
            None => None,
        };
        if let Some(claimant) = known {
            let claimant_id = claimant.id;
            let step = machine::join(&mut state, claimant);
            if step.applied {
                tracing::debug!(resource = %resource_id, claimant = %claimant_id, "joined queue");
            }
            self.commit(&mut slot, state, step).await?;
            return Ok(claimant_id);
        }

        // A new claimant is registered in the same write that queues it
        let now = self.now();
        let (saved, claimant) = self
            .inner
            .store
            .save_with_new_claimant(&state, &info, &|state, claimant| {
                if machine::join(state, claimant).then_advance {
                    machine::advance(state, now);
                }
            })
            .await?;
        tracing::debug!(resource = %resource_id, claimant = %claimant.id, "joined queue");

        // Replaying the pure join yields the state before any offer was made
        let claimant_id = claimant.id;
        machine::join(&mut state, claimant);
        self.after_save(&mut slot, &state, &saved, false);
        Ok(claimant_id)
    }

    /// Give up the resource. Only the holder may release.
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` for an unknown resource, or a store error.
    pub async fn release(&self, resource_id: &ResourceId, claimant: ClaimantId) -> Result<bool> {
        self.transition(resource_id, "release", |state| machine::release(state, claimant))
            .await
    }

    /// Take an outstanding offer. Only the offeree may accept.
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` for an unknown resource, or a store error.
    pub async fn accept(&self, resource_id: &ResourceId, claimant: ClaimantId) -> Result<bool> {
        self.transition(resource_id, "accept", |state| machine::accept(state, claimant))
            .await
    }

    /// Decline an outstanding offer and leave the queue.
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` for an unknown resource, or a store error.
    pub async fn reject(&self, resource_id: &ResourceId, claimant: ClaimantId) -> Result<bool> {
        self.transition(resource_id, "reject", |state| machine::reject(state, claimant))
            .await
    }

    /// Leave the queue from any position.
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` for an unknown resource, or a store error.
    pub async fn leave(&self, resource_id: &ResourceId, claimant: ClaimantId) -> Result<bool> {
        self.transition(resource_id, "leave", |state| machine::leave(state, claimant))
            .await
    }

    /// Current rendered state of a resource
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` for an unknown resource, or a store error.
    pub async fn snapshot(&self, resource_id: &ResourceId) -> Result<Snapshot> {
        Ok(Snapshot::from(&self.load(resource_id).await?))
    }

    /// Current persisted aggregate of a resource
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` for an unknown resource, or a store error.
    pub async fn state(&self, resource_id: &ResourceId) -> Result<ResourceState> {
        self.load(resource_id).await
    }

    /// Deadline of the offer timer currently armed for a resource, if any
    pub async fn armed_deadline(&self, resource_id: &ResourceId) -> Option<DateTime<Utc>> {
        let slot = self.inner.slots.lock().await.get(resource_id).cloned()?;
        let slot = slot.lock().await;
        slot.timer
            .as_ref()
            .filter(|timer| !timer.is_finished())
            .map(OfferTimer::deadline)
    }

    pub(crate) fn store(&self) -> &dyn LeaseStore {
        self.inner.store.as_ref()
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// Forfeit an offer if it still carries `expected` as its deadline
    pub(crate) async fn expire_offer(
        &self,
        resource_id: &ResourceId,
        expected: DateTime<Utc>,
    ) -> Result<bool> {
        let slot = self.slot(resource_id).await?;
        let mut slot = slot.lock().await;
        self.expire_locked(&mut slot, resource_id, expected).await
    }

    /// Arm a timer for an offer persisted by an earlier process
    pub(crate) async fn rearm_offer(
        &self,
        resource_id: &ResourceId,
        deadline: DateTime<Utc>,
    ) -> Result<bool> {
        let slot = self.slot(resource_id).await?;
        let mut slot = slot.lock().await;
        let state = self.load(resource_id).await?;
        if state.offer_deadline != Some(deadline) {
            return Ok(false);
        }
        self.arm_timer(&mut slot, resource_id.clone(), deadline);
        Ok(true)
    }

    /// The resource's lock slot. Only resources the store knows get one.
    async fn slot(&self, resource_id: &ResourceId) -> Result<Arc<Mutex<ResourceSlot>>> {
        let existing = self.inner.slots.lock().await.get(resource_id).cloned();
        if let Some(slot) = existing {
            return Ok(slot);
        }
        self.load(resource_id).await?;

        let mut slots = self.inner.slots.lock().await;
        Ok(Arc::clone(slots.entry(resource_id.clone()).or_default()))
    }

    async fn load(&self, resource_id: &ResourceId) -> Result<ResourceState> {
        self.inner
            .store
            .load_state(resource_id)
            .await?
            .ok_or_else(|| Error::ResourceNotFound(resource_id.to_string()))
    }

    async fn transition<F>(&self, resource_id: &ResourceId, op: &'static str, apply: F) -> Result<bool>
    where
        F: FnOnce(&mut ResourceState) -> Step + Send,
    {
        let slot = self.slot(resource_id).await?;
        let mut slot = slot.lock().await;

        let mut state = self.load(resource_id).await?;
        let step = apply(&mut state);
        if step.applied {
            tracing::debug!(resource = %resource_id, op, "transition applied");
        } else {
            tracing::debug!(resource = %resource_id, op, "transition rejected");
        }
        self.commit(&mut slot, state, step).await
    }

    /// Save the transition, and the offer it leads to, in one write; then
    /// run the side effects.
    ///
    /// Nothing is published and no timer is touched unless the save succeeds.
    async fn commit(&self, slot: &mut ResourceSlot, state: ResourceState, step: Step) -> Result<bool> {
        if !step.applied {
            return Ok(false);
        }

        let mut next = state.clone();
        if step.then_advance {
            machine::advance(&mut next, self.inner.clock.now());
        }
        let saved = self.inner.store.save_state(&next).await?;
        self.after_save(slot, &state, &saved, step.offer_closed);
        Ok(true)
    }

    /// Side effects of one committed write.
    ///
    /// `transitioned` is the state right after the transition, before any
    /// follow-up offer. When the write also opened an offer, subscribers see
    /// both states in order and the offer timer is armed.
    fn after_save(
        &self,
        slot: &mut ResourceSlot,
        transitioned: &ResourceState,
        saved: &ResourceState,
        offer_closed: bool,
    ) {
        if offer_closed {
            slot.cancel_timer();
        }

        let offered = saved
            .offer_deadline
            .filter(|_| transitioned.offer_deadline.is_none());
        let Some(deadline) = offered else {
            self.publish(saved);
            return;
        };

        tracing::debug!(
            resource = %saved.id(),
            offeree = ?saved.offeree(),
            %deadline,
            "offered resource"
        );
        self.publish(transitioned);
        self.publish(saved);
        self.arm_timer(slot, saved.id().clone(), deadline);
    }

    async fn expire_locked(
        &self,
        slot: &mut ResourceSlot,
        resource_id: &ResourceId,
        expected: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.load(resource_id).await?;
        let offeree = state.offeree();
        let step = machine::expire(&mut state, expected);
        if step.applied {
            tracing::info!(
                resource = %resource_id,
                offeree = ?offeree,
                "offer expired, claimant moved to back of queue"
            );
        }
        self.commit(slot, state, step).await
    }

    /// Replace the slot's timer with one that expires `deadline`
    fn arm_timer(&self, slot: &mut ResourceSlot, resource_id: ResourceId, deadline: DateTime<Utc>) {
        let delay = remaining(deadline, self.inner.clock.now());
        self.schedule_expiry(slot, resource_id, deadline, delay);
    }

    fn schedule_expiry(
        &self,
        slot: &mut ResourceSlot,
        resource_id: ResourceId,
        deadline: DateTime<Utc>,
        delay: Duration,
    ) {
        slot.cancel_timer();

        let weak = Arc::downgrade(&self.inner);
        let timer = self
            .inner
            .timers
            .schedule(delay, deadline, move |ticket| async move {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let engine = Self { inner };
                if let Err(e) = engine.on_timer_fired(&resource_id, ticket, deadline).await {
                    tracing::warn!(resource = %resource_id, error = %e, "offer expiry failed");
                }
            });
        slot.timer = Some(timer);
    }

    async fn on_timer_fired(
        &self,
        resource_id: &ResourceId,
        ticket: TimerTicket,
        deadline: DateTime<Utc>,
    ) -> Result<bool> {
        let slot = self.slot(resource_id).await?;
        let mut slot = slot.lock().await;

        // Superseded while waiting for the lock
        if slot.timer.as_ref().map(OfferTimer::ticket) != Some(ticket) {
            return Ok(false);
        }
        // Detach rather than cancel: this task is the timer
        slot.timer = None;

        let result = self.expire_locked(&mut slot, resource_id, deadline).await;
        if result.as_ref().is_err_and(Error::is_infrastructure) {
            // The offer is still open in the store; keep a timer on it
            tracing::debug!(resource = %resource_id, %deadline, "retrying offer expiry");
            self.schedule_expiry(&mut slot, resource_id.clone(), deadline, EXPIRY_RETRY);
        }
        result
    }

    fn publish(&self, state: &ResourceState) {
        self.inner.publisher.publish(&Snapshot::from(state));
    }
}
