#![cfg_attr(docsrs, feature(doc_cfg))]
//! # ddd-xfer
//!
//! ddd-xfer is the object-transfer engine of a distributed object manager:
//! every process holds a slice of a global graph of objects, some of them
//! replicated on several processes with a per-copy priority, and a transfer
//! epoch migrates, replicates, re-prioritizes and deletes copies in two
//! collective message rounds while keeping every process's coupling lists
//! (who else holds a copy, at which priority) consistent.
//!
//! ## Features
//! - Command buffer (`copy_object`, `set_priority`, `delete_object`) with
//!   per-type hooks and attached auxiliary data
//! - Deterministic conflict resolution through per-type priority merge rules
//! - Reference relocation through per-message symbol tables
//! - Pluggable communication backends (serial, in-process threads, MPI)
//!
//! ## Usage
//!
//! ```
//! use ddd_xfer::prelude::*;
//!
//! let mut ddd = Ddd::new(NoComm, XferConfig::default());
//! let node = ddd.register_type(TypeDesc::new("node", 8));
//! let h = ddd.create_object(node, Priority::new(1)?, 0, vec![0; 8])?;
//!
//! let mut epoch = ddd.xfer_begin();
//! epoch.set_priority(h, Priority::new(3)?)?;
//! let stats = epoch.end()?;
//! assert_eq!(stats.prio_changed, 1);
//! # Ok::<(), ddd_xfer::ddd_error::DddError>(())
//! ```
//!
//! ## Determinism
//!
//! The outcome of an epoch does not depend on message arrival order: all
//! incoming entries are sorted by `(GID, sender rank)` and reduced with the
//! type's priority merge before anything is materialized.

pub mod algs;
pub mod config;
pub mod ddd;
pub mod ddd_error;
pub mod debug_invariants;
pub mod xfer;

pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::communicator::{Communicator, LocalComm, NoComm};
    pub use crate::config::XferConfig;
    pub use crate::ddd::gid::Gid;
    pub use crate::ddd::object::{DddObject, ObjHandle, ObjectStore};
    pub use crate::ddd::priority::{MAX_PRIORITY, MergeWinner, PrioMatrix, PrioMergeMode, Priority};
    pub use crate::ddd::types::{
        AuxItem, AuxSpec, AuxType, DddType, Newness, RefTarget, Transferable, TypeDesc,
    };
    pub use crate::ddd_error::DddError;
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::xfer::{CopyCx, Ddd, DeleteCx, TransferEpoch, XferStats};
}
