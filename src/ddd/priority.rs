//! Priorities and the per-type priority merge.
//!
//! When two copies of the same object meet on one process (two incoming
//! messages, or an incoming copy and a local one), their priorities are fused
//! by [`PrioMergeMode::merge`]. The merge is a pure function of its two
//! arguments; it may be evaluated repeatedly and with swapped arguments.

use crate::ddd_error::DddError;
use std::fmt;

/// Exclusive upper bound for priority values.
pub const MAX_PRIORITY: u8 = 32;

/// Priority of a local copy of a distributed object.
#[derive(
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(transparent)]
pub struct Priority(u8);

impl Priority {
    /// Checked constructor.
    pub fn new(raw: u32) -> Result<Self, DddError> {
        if raw < MAX_PRIORITY as u32 {
            Ok(Priority(raw as u8))
        } else {
            Err(DddError::InvalidPriority(raw))
        }
    }

    #[inline]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Decode a priority read from the wire.
    pub(crate) fn from_wire(raw: u8) -> Option<Self> {
        (raw < MAX_PRIORITY).then_some(Priority(raw))
    }
}

impl fmt::Debug for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "prio{}", self.0)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which argument of a merge supplied the result.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MergeWinner {
    First,
    Second,
    /// Both arguments equal the result, or neither does.
    Unknown,
}

/// Explicit merge table: `result = table[a][b]`, kept symmetric.
#[derive(Clone, PartialEq, Eq)]
pub struct PrioMatrix {
    table: Vec<u8>,
}

impl PrioMatrix {
    /// Start from the `Maximum` rule; override entries with [`PrioMatrix::define`].
    pub fn new() -> Self {
        let n = MAX_PRIORITY as usize;
        let mut table = vec![0u8; n * n];
        for a in 0..n {
            for b in 0..n {
                table[a * n + b] = a.max(b) as u8;
            }
        }
        Self { table }
    }

    /// Define `merge(a, b) = merge(b, a) = result`.
    pub fn define(mut self, a: Priority, b: Priority, result: Priority) -> Self {
        let n = MAX_PRIORITY as usize;
        let (a, b) = (a.0 as usize, b.0 as usize);
        self.table[a * n + b] = result.0;
        self.table[b * n + a] = result.0;
        self
    }

    fn lookup(&self, a: Priority, b: Priority) -> Priority {
        Priority(self.table[a.0 as usize * MAX_PRIORITY as usize + b.0 as usize])
    }
}

impl Default for PrioMatrix {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PrioMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrioMatrix").finish_non_exhaustive()
    }
}

/// How a type fuses two priorities of the same object.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum PrioMergeMode {
    /// Numerically larger priority wins.
    #[default]
    Maximum,
    /// Numerically smaller priority wins.
    Minimum,
    /// Explicit table.
    Matrix(Box<PrioMatrix>),
}

impl PrioMergeMode {
    /// Fuse `a` and `b`, reporting which argument supplied the result.
    pub fn merge(&self, a: Priority, b: Priority) -> (Priority, MergeWinner) {
        let result = match self {
            PrioMergeMode::Maximum => a.max(b),
            PrioMergeMode::Minimum => a.min(b),
            PrioMergeMode::Matrix(m) => m.lookup(a, b),
        };
        let winner = match (result == a, result == b) {
            (true, false) => MergeWinner::First,
            (false, true) => MergeWinner::Second,
            _ => MergeWinner::Unknown,
        };
        (result, winner)
    }

    /// Fold a sequence of priorities; `None` for an empty sequence.
    pub fn reduce<I: IntoIterator<Item = Priority>>(&self, prios: I) -> Option<Priority> {
        prios.into_iter().reduce(|acc, p| self.merge(acc, p).0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(v: u32) -> Priority {
        Priority::new(v).unwrap()
    }

    #[test]
    fn out_of_range_rejected() {
        assert!(matches!(
            Priority::new(MAX_PRIORITY as u32),
            Err(DddError::InvalidPriority(32))
        ));
    }

    #[test]
    fn maximum_rule() {
        let m = PrioMergeMode::Maximum;
        assert_eq!(m.merge(p(1), p(3)), (p(3), MergeWinner::Second));
        assert_eq!(m.merge(p(3), p(1)), (p(3), MergeWinner::First));
        assert_eq!(m.merge(p(2), p(2)), (p(2), MergeWinner::Unknown));
    }

    #[test]
    fn minimum_rule() {
        let m = PrioMergeMode::Minimum;
        assert_eq!(m.merge(p(1), p(3)), (p(1), MergeWinner::First));
    }

    #[test]
    fn matrix_overrides_and_stays_symmetric() {
        let m = PrioMergeMode::Matrix(Box::new(PrioMatrix::new().define(p(1), p(4), p(1))));
        assert_eq!(m.merge(p(1), p(4)).0, p(1));
        assert_eq!(m.merge(p(4), p(1)).0, p(1));
        // untouched entries keep the maximum rule
        assert_eq!(m.merge(p(2), p(5)).0, p(5));
    }

    #[test]
    fn matrix_result_outside_both_is_unknown() {
        let m = PrioMergeMode::Matrix(Box::new(PrioMatrix::new().define(p(1), p(2), p(7))));
        assert_eq!(m.merge(p(1), p(2)), (p(7), MergeWinner::Unknown));
    }

    #[test]
    fn reduce_folds() {
        let m = PrioMergeMode::Maximum;
        assert_eq!(m.reduce([p(1), p(5), p(3)]), Some(p(5)));
        assert_eq!(m.reduce(std::iter::empty()), None);
    }
}
