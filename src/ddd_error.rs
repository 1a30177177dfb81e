//! DddError: Unified error type for ddd-xfer public APIs
//!
//! Every fallible operation of the object model, the transport glue and the
//! transfer engine reports through this type. Communication paths always
//! drain their pending handles before surfacing an error.

use crate::ddd::gid::Gid;
use crate::ddd::object::ObjHandle;
use thiserror::Error;

/// Unified error type for ddd-xfer operations.
#[derive(Debug, Error)]
pub enum DddError {
    /// Priority outside `0..MAX_PRIORITY`.
    #[error(
        "priority {0} out of range (must be < {max})",
        max = crate::ddd::priority::MAX_PRIORITY
    )]
    InvalidPriority(u32),
    /// Handle does not name a live local object (never existed or already destroyed).
    #[error("unknown or stale object handle {0:?}")]
    UnknownObject(ObjHandle),
    /// Type id was never registered on this process.
    #[error("unknown object type {0}")]
    UnknownType(u16),
    /// Destination rank outside the communicator.
    #[error("rank {rank} out of range (communicator size {size})")]
    InvalidRank { rank: usize, size: usize },
    /// A local object with this GID already exists.
    #[error("duplicate GID {0}")]
    DuplicateGid(Gid),
    /// Gathered auxiliary data does not match what the copy hook attached.
    #[error("auxiliary data mismatch for object {gid}: {reason}")]
    AuxMismatch { gid: Gid, reason: String },
    /// Communication failure with a neighbor.
    #[error("communication error with rank {neighbor}: {source}")]
    CommError {
        neighbor: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// A received message could not be decoded.
    #[error("malformed message from rank {from}: {reason}")]
    MalformedMessage { from: usize, reason: String },
    /// Internal data-structure invariant broken.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

/// Plain-text payload for [`DddError::CommError`].
#[derive(Debug, Error)]
#[error("{0}")]
pub struct CommError(pub String);
