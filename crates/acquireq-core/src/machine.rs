//! Pure lease/offer transitions.
//!
//! Every function here edits a [`ResourceState`] in place and reports what
//! happened as a [`Step`]. No I/O, no clock reads, no timers: the engine loads
//! the aggregate, applies one of these, saves the result atomically and then
//! performs the side effects the step asks for.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use chrono::{DateTime, SubsecRound, Utc};

use crate::model::{Claimant, ClaimantId, QueueEntry, ResourceState};

/// Side effects requested by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Step {
    /// The state changed and must be saved and published
    pub applied: bool,
    /// An outstanding offer ended; its timer must be cancelled
    pub offer_closed: bool,
    /// The resource may now be offered to the next claimant
    pub then_advance: bool,
}

impl Step {
    /// Precondition failed, nothing changed
    pub const REJECTED: Self = Self {
        applied: false,
        offer_closed: false,
        then_advance: false,
    };

    const fn applied() -> Self {
        Self {
            applied: true,
            offer_closed: false,
            then_advance: false,
        }
    }

    const fn closing_offer(mut self) -> Self {
        self.offer_closed = true;
        self
    }

    const fn advancing(mut self) -> Self {
        self.then_advance = true;
        self
    }
}

/// Append a claimant at the tail.
///
/// Already-queued claimants are left where they are. An outstanding offer is
/// never disturbed: advancing is only requested when no offer is active.
pub fn join(state: &mut ResourceState, claimant: Claimant) -> Step {
    if state.is_queued(claimant.id) {
        return Step::REJECTED;
    }

    let order = next_order(state);
    state.queue.push(QueueEntry { claimant, order });

    let step = Step::applied();
    if state.has_active_offer() {
        step
    } else {
        step.advancing()
    }
}

/// Clear the holder if `claimant` holds the resource.
pub fn release(state: &mut ResourceState, claimant: ClaimantId) -> Step {
    if state.holder_id() != Some(claimant) {
        return Step::REJECTED;
    }
    state.holder = None;
    Step::applied().advancing()
}

/// Grant the resource to the offeree.
pub fn accept(state: &mut ResourceState, claimant: ClaimantId) -> Step {
    if state.offeree() != Some(claimant) {
        return Step::REJECTED;
    }
    let entry = state.queue.remove(0);
    state.holder = Some(entry.claimant);
    state.offer_deadline = None;
    Step::applied().closing_offer()
}

/// Decline the offer and leave the line.
pub fn reject(state: &mut ResourceState, claimant: ClaimantId) -> Step {
    if state.offeree() != Some(claimant) {
        return Step::REJECTED;
    }
    state.queue.remove(0);
    state.offer_deadline = None;
    Step::applied().closing_offer().advancing()
}

/// Remove a claimant from the line wherever it stands.
///
/// Only when the leaver was the offeree does the offer close and the next
/// head get an offer; everyone else keeps their relative order.
pub fn leave(state: &mut ResourceState, claimant: ClaimantId) -> Step {
    let Some(position) = state.position_of(claimant) else {
        return Step::REJECTED;
    };
    let was_offeree = state.offeree() == Some(claimant);
    state.queue.remove(position);

    if was_offeree {
        state.offer_deadline = None;
        Step::applied().closing_offer().advancing()
    } else {
        Step::applied()
    }
}

/// Offer the resource to the queue head.
///
/// Returns the new deadline, or `None` when the resource is held, already
/// offered, or nobody is waiting.
pub fn advance(state: &mut ResourceState, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if state.holder.is_some() || state.has_active_offer() || state.queue.is_empty() {
        return None;
    }
    // Millisecond precision survives every store encoding, so the expiry
    // guard can compare deadlines exactly after a round trip.
    let deadline = (now + state.resource.offer_duration()).trunc_subsecs(3);
    state.offer_deadline = Some(deadline);
    Some(deadline)
}

/// Forfeit an expired offer.
///
/// Guarded like a compare-and-swap: nothing happens unless the resource still
/// carries exactly `expected_deadline`, so a timer that fires late or after
/// accept/reject/leave is harmless. The offeree goes to the back of the line
/// rather than being removed.
pub fn expire(state: &mut ResourceState, expected_deadline: DateTime<Utc>) -> Step {
    if state.offer_deadline != Some(expected_deadline) {
        return Step::REJECTED;
    }

    let order = next_order(state);
    if let Some(head) = state.queue.first_mut() {
        head.order = order;
    }
    state.sort_queue();
    state.offer_deadline = None;
    Step::applied().closing_offer().advancing()
}

/// Hand out the next order key. Keys are never reused, even after the tail
/// leaves, so the first key of a fresh resource is 1.
fn next_order(state: &mut ResourceState) -> i64 {
    let order = state
        .last_order
        .max(state.max_order().unwrap_or(0))
        .saturating_add(1);
    state.last_order = order;
    order
}
