//! Internal consistency checks for the local object model.
//!
//! Checks are always available through [`DebugInvariants::validate_invariants`];
//! the asserting variant only fires in debug builds or with one of the
//! `strict-invariants` / `check-invariants` features, so release builds pay
//! nothing at the end of an epoch.

use crate::ddd_error::DddError;

/// A structure whose internal indices can be cross-checked.
pub trait DebugInvariants {
    /// First broken invariant, as an [`DddError::InvariantViolation`].
    fn validate_invariants(&self) -> Result<(), DddError>;

    /// Name used in panic messages.
    fn invariant_context(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Panic on a broken invariant when checking is enabled.
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), self.invariant_context());
    }
}

/// Run a fallible check and panic with `ctx` if it fails. Compiled out unless
/// debug assertions or an invariant feature are enabled.
#[macro_export]
macro_rules! debug_invariants {
    ($expr:expr, $ctx:expr) => {
        #[cfg(any(debug_assertions, feature = "strict-invariants", feature = "check-invariants"))]
        if let Err(e) = $expr {
            log::error!("[invariants] {}: {}", $ctx, e);
            panic!("[invariants] {}: {}", $ctx, e);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Broken;

    impl DebugInvariants for Broken {
        fn validate_invariants(&self) -> Result<(), DddError> {
            Err(DddError::InvariantViolation("always".into()))
        }
        fn invariant_context(&self) -> &'static str {
            "Broken"
        }
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "[invariants] Broken: invariant violation: always")]
    fn assert_panics_in_debug() {
        Broken.debug_assert_invariants();
    }
}
