//! The transfer protocol: command buffer, Phase-1 object migration and
//! Phase-2 coupling repair.

pub(crate) mod closure;
pub mod cmds;
pub mod context;
pub(crate) mod cplmsg;
pub mod epoch;
pub(crate) mod intents;
pub(crate) mod local_exec;
pub(crate) mod objmsg;
pub(crate) mod pack;
pub(crate) mod propagate;
pub(crate) mod prune;
pub(crate) mod unpack;

pub use cmds::{CopyCx, DeleteCx};
pub use context::Ddd;
pub use epoch::{TransferEpoch, XferStats};
