//! Domain types: resources, claimants, queue entries and the per-resource
//! aggregate the state machine operates on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Offer duration used when a resource is created without one.
pub const DEFAULT_OFFER_DURATION_SECS: u32 = 60;

/// Unique resource identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// Create a resource ID from an existing value
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random resource ID
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the ID as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique claimant identifier, assigned by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimantId(i64);

impl ClaimantId {
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for ClaimantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named exclusive-access unit.
///
/// Only the descriptive attributes live here; the mutable lease state
/// (holder, deadline, queue) is carried by [`ResourceState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Unique identifier
    pub id: ResourceId,
    /// Display name
    pub name: String,
    /// Optional free-form description
    pub description: Option<String>,
    /// How long an offer stays open, in seconds
    pub offer_duration_secs: u32,
    /// Secret for administrative operations
    pub admin_secret: String,
}

impl Resource {
    /// Offer duration as a chrono duration
    #[must_use]
    pub fn offer_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::from(self.offer_duration_secs))
    }
}

/// Request to create a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewResource {
    pub name: String,
    pub description: Option<String>,
    pub offer_duration_secs: u32,
}

impl NewResource {
    /// Create a request with the default offer duration
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            offer_duration_secs: DEFAULT_OFFER_DURATION_SECS,
        }
    }

    /// Set the description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the offer duration in seconds
    #[must_use]
    pub const fn with_offer_duration(mut self, secs: u32) -> Self {
        self.offer_duration_secs = secs;
        self
    }

    /// Reject empty names and zero-length offers
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidResource(
                "Resource name cannot be empty or whitespace-only".into(),
            ));
        }
        if self.offer_duration_secs == 0 {
            return Err(Error::InvalidResource(
                "Offer duration must be at least one second".into(),
            ));
        }
        Ok(())
    }
}

/// Identifiers returned to the creator of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedResource {
    pub id: ResourceId,
    pub admin_secret: String,
}

/// An entity competing for access
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claimant {
    pub id: ClaimantId,
    pub label: String,
    pub contact: Option<String>,
    pub joined_at: DateTime<Utc>,
}

/// What a caller supplies when joining.
///
/// `id` is the identity the caller believes it has; when absent or unknown
/// to the store a new claimant is created.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClaimantInfo {
    pub id: Option<ClaimantId>,
    pub label: String,
    pub contact: Option<String>,
}

impl ClaimantInfo {
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: None,
            label: label.into(),
            contact: None,
        }
    }

    #[must_use]
    pub const fn with_id(mut self, id: ClaimantId) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn with_contact(mut self, contact: impl Into<String>) -> Self {
        self.contact = Some(contact.into());
        self
    }
}

/// A claimant's position in a resource's waiting line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub claimant: Claimant,
    /// Sort key; the minimum is the head
    pub order: i64,
}

/// Derived lease phase of a resource
#[derive(Debug, Clone, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum LeasePhase {
    /// No holder and no offer
    Idle,
    /// The queue head has until `deadline` to accept
    Offered {
        offeree: ClaimantId,
        deadline: DateTime<Utc>,
    },
    /// `holder` has exclusive access
    Held { holder: ClaimantId },
}

/// Everything the state machine reads and writes for one resource.
///
/// Stores load and save this aggregate as a unit; `revision` is the
/// compare-and-swap token for the save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceState {
    pub resource: Resource,
    pub holder: Option<Claimant>,
    pub offer_deadline: Option<DateTime<Utc>>,
    /// Sorted ascending by `order`
    pub queue: Vec<QueueEntry>,
    /// Highest order key ever handed out; never decreases
    pub last_order: i64,
    pub revision: i64,
}

impl ResourceState {
    /// Fresh state for a newly created resource
    #[must_use]
    pub const fn new(resource: Resource) -> Self {
        Self {
            resource,
            holder: None,
            offer_deadline: None,
            queue: Vec::new(),
            last_order: 0,
            revision: 0,
        }
    }

    #[must_use]
    pub fn id(&self) -> &ResourceId {
        &self.resource.id
    }

    /// Current queue head
    #[must_use]
    pub fn head(&self) -> Option<&QueueEntry> {
        self.queue.first()
    }

    /// Highest order key in the queue, if any
    #[must_use]
    pub fn max_order(&self) -> Option<i64> {
        self.queue.iter().map(|e| e.order).max()
    }

    /// Zero-based position of a claimant in the queue
    #[must_use]
    pub fn position_of(&self, claimant: ClaimantId) -> Option<usize> {
        self.queue.iter().position(|e| e.claimant.id == claimant)
    }

    #[must_use]
    pub fn is_queued(&self, claimant: ClaimantId) -> bool {
        self.position_of(claimant).is_some()
    }

    #[must_use]
    pub fn holder_id(&self) -> Option<ClaimantId> {
        self.holder.as_ref().map(|c| c.id)
    }

    /// Whether an offer is outstanding
    #[must_use]
    pub const fn has_active_offer(&self) -> bool {
        self.offer_deadline.is_some()
    }

    /// The claimant the outstanding offer is addressed to
    #[must_use]
    pub fn offeree(&self) -> Option<ClaimantId> {
        self.offer_deadline
            .and(self.head())
            .map(|entry| entry.claimant.id)
    }

    /// Derive the lease phase.
    ///
    /// A deadline with an empty queue is reported as `Idle`: there is nobody
    /// to address the offer to.
    #[must_use]
    pub fn phase(&self) -> LeasePhase {
        match (&self.holder, self.offer_deadline, self.head()) {
            (Some(holder), _, _) => LeasePhase::Held { holder: holder.id },
            (None, Some(deadline), Some(head)) => LeasePhase::Offered {
                offeree: head.claimant.id,
                deadline,
            },
            _ => LeasePhase::Idle,
        }
    }

    /// Restore the ascending order-key invariant
    pub fn sort_queue(&mut self) {
        self.queue.sort_by_key(|e| e.order);
    }
}
