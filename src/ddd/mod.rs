//! Local object model: identities, priorities, couplings, objects and types.

pub mod coupling;
pub mod gid;
pub mod object;
pub mod priority;
pub mod types;
