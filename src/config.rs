//! Options for the transfer engine.
//!
//! The switches correspond to the DDD option table (`OPT_XFER_PRUNE_DELETE`,
//! `OPT_WARNING_REF_COLLISION`, ...). All fields have defaults so a partially
//! specified JSON/TOML document deserializes.

use serde::{Deserialize, Serialize};

/// Transfer-engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct XferConfig {
    /// Run the pruning round: cancel local deletes of objects some peer re-sends.
    pub prune_deletes: bool,
    /// Log a warning when merge-mode reference localization sees disagreeing references.
    pub warn_ref_collision: bool,
    /// First communication tag used by an epoch; an epoch uses `tag_base..tag_base + 6`.
    pub tag_base: u16,
    /// Hand messages to the transport largest first.
    pub largest_first: bool,
}

impl Default for XferConfig {
    fn default() -> Self {
        Self {
            prune_deletes: false,
            warn_ref_collision: false,
            tag_base: 0xD000,
            largest_first: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = XferConfig::default();
        assert!(!cfg.prune_deletes);
        assert!(cfg.largest_first);
        assert_eq!(cfg.tag_base, 0xD000);
    }
}
