//! # acquireQ Core
//!
//! Fair, time-bounded exclusive access to shared resources.
//!
//! A resource is held by at most one claimant. Everyone else waits in a FIFO
//! queue; when the resource frees up the head of the queue is offered it and
//! has a fixed window to accept. A claimant that lets the offer lapse is moved
//! to the back of the queue instead of being dropped.
//!
//! ## Layout
//!
//! - [`machine`]: pure transitions over a [`ResourceState`]
//! - [`store`]: persistence ([`SqliteStore`], [`MemoryStore`])
//! - [`engine`]: per-resource serialization, offer timers, snapshots
//! - [`recovery`]: rebuilding timers from persisted deadlines
//! - [`publisher`]: snapshot fan-out to observers
//!
//! ## Laws (Compiler Enforced)
//!
//! - No `unwrap()` - returns `Result` instead
//! - No `expect()` - returns `Result` instead
//! - No `panic!()` - returns `Result` instead
//! - No `unsafe` - safe Rust only
//!
//! Contention (wrong holder, wrong offeree, stale offer) is reported as
//! `Ok(false)`, never as an error.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod config;
pub mod engine;
mod error;
pub mod machine;
pub mod model;
pub mod publisher;
pub mod recovery;
pub mod store;
pub mod timer;

pub use config::Config;
pub use engine::LeaseEngine;
pub use error::{Error, Result};
pub use model::{
    Claimant, ClaimantId, ClaimantInfo, CreatedResource, LeasePhase, NewResource, QueueEntry,
    Resource, ResourceId, ResourceState, DEFAULT_OFFER_DURATION_SECS,
};
pub use publisher::{BroadcastPublisher, Snapshot, SnapshotPublisher, Subscription};
pub use recovery::RecoveryReport;
pub use store::{LeaseStore, MemoryStore, PendingOffer, SqliteStore};
pub use timer::{Clock, ManualClock, SystemClock, TokioClock};
