//! Error types for acquireq-core
//!
//! Contention outcomes (wrong holder, wrong offeree, stale offer, already
//! queued) are not errors: operations report them as `Ok(false)`. The variants
//! here cover caller mistakes (unknown resource, bad input) and infrastructure
//! faults (database, revision conflicts, config, IO).

use thiserror::Error;

/// Core error type for acquireq operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// No resource with this identifier exists
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// No claimant with this identifier exists
    #[error("Claimant not found: {0}")]
    ClaimantNotFound(i64),

    /// Resource definition rejected at creation time
    #[error("Invalid resource: {0}")]
    InvalidResource(String),

    /// The stored revision moved underneath a transition (compare-and-swap failed)
    #[error("Conflict: resource '{resource_id}' changed (expected revision {expected})")]
    Conflict {
        resource_id: String,
        expected: i64,
    },

    /// Database errors
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Persisted data could not be decoded
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Configuration errors
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Filesystem errors
    #[error("IO error: {0}")]
    IoError(String),
}

impl Error {
    /// Stable machine-readable code for transports and logs.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ResourceNotFound(_) => "RESOURCE_NOT_FOUND",
            Self::ClaimantNotFound(_) => "CLAIMANT_NOT_FOUND",
            Self::InvalidResource(_) => "INVALID_RESOURCE",
            Self::Conflict { .. } => "CONFLICT",
            Self::DatabaseError(_) => "DATABASE_ERROR",
            Self::ParseError(_) => "PARSE_ERROR",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::IoError(_) => "IO_ERROR",
        }
    }

    /// Whether this is a system fault rather than a caller error.
    ///
    /// Transports report infrastructure faults upstream; caller errors are
    /// answered directly.
    pub const fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::DatabaseError(_) | Self::ParseError(_) | Self::IoError(_)
        )
    }

    /// Process exit code for the CLI.
    ///
    /// - 1: caller error (bad input, bad configuration)
    /// - 2: system error (IO)
    /// - 3: not found
    /// - 4: storage failure or inconsistent state
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidResource(_) | Self::InvalidConfig(_) => 1,
            Self::IoError(_) => 2,
            Self::ResourceNotFound(_) | Self::ClaimantNotFound(_) => 3,
            Self::Conflict { .. } | Self::DatabaseError(_) | Self::ParseError(_) => 4,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::DatabaseError(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

/// Result type alias for acquireq-core operations
pub type Result<T> = std::result::Result<T, Error>;
