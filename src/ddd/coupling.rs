//! Coupling lists: which other ranks hold a copy of a local object.
//!
//! A [`CouplingList`] is attached to every local [`DddObject`](crate::ddd::object::DddObject).
//! Entries are kept sorted by rank and unique per rank, so two processes can
//! compare their views deterministically.

use crate::ddd::priority::Priority;

/// "Rank `proc` also holds a copy of this object, at priority `prio`."
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Coupling {
    pub proc: usize,
    pub prio: Priority,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CouplingList {
    entries: Vec<Coupling>,
}

impl CouplingList {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Coupling> + '_ {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[Coupling] {
        &self.entries
    }

    /// Ranks of all coupled copies.
    pub fn procs(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries.iter().map(|c| c.proc)
    }

    /// Entry for `proc`, if any.
    pub fn get(&self, proc: usize) -> Option<Coupling> {
        self.entries
            .binary_search_by_key(&proc, |c| c.proc)
            .ok()
            .map(|i| self.entries[i])
    }

    pub fn contains(&self, proc: usize) -> bool {
        self.get(proc).is_some()
    }

    /// Insert or overwrite the entry for `proc`. Returns the previous priority.
    pub fn upsert(&mut self, proc: usize, prio: Priority) -> Option<Priority> {
        match self.entries.binary_search_by_key(&proc, |c| c.proc) {
            Ok(i) => Some(std::mem::replace(&mut self.entries[i].prio, prio)),
            Err(i) => {
                self.entries.insert(i, Coupling { proc, prio });
                None
            }
        }
    }

    /// Remove the entry for `proc`. Returns the removed coupling.
    pub fn remove(&mut self, proc: usize) -> Option<Coupling> {
        self.entries
            .binary_search_by_key(&proc, |c| c.proc)
            .ok()
            .map(|i| self.entries.remove(i))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Owned copy of the entries, used as the rollback snapshot of a delete.
    pub fn snapshot(&self) -> Vec<Coupling> {
        self.entries.clone()
    }

    /// Check sortedness and uniqueness, and that `me` never couples to itself.
    pub(crate) fn check(&self, me: usize) -> Result<(), String> {
        for w in self.entries.windows(2) {
            if w[0].proc >= w[1].proc {
                return Err(format!("coupling list not sorted/unique at rank {}", w[1].proc));
            }
        }
        if self.contains(me) {
            return Err(format!("coupling to own rank {me}"));
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a CouplingList {
    type Item = &'a Coupling;
    type IntoIter = std::slice::Iter<'a, Coupling>;
    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(v: u32) -> Priority {
        Priority::new(v).unwrap()
    }

    #[test]
    fn upsert_keeps_sorted_and_unique() {
        let mut l = CouplingList::default();
        assert_eq!(l.upsert(3, p(1)), None);
        assert_eq!(l.upsert(1, p(2)), None);
        assert_eq!(l.upsert(3, p(4)), Some(p(1)));
        assert_eq!(l.procs().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(l.get(3).unwrap().prio, p(4));
        assert!(l.check(0).is_ok());
    }

    #[test]
    fn remove_missing_is_none() {
        let mut l = CouplingList::default();
        l.upsert(2, p(0));
        assert!(l.remove(5).is_none());
        assert_eq!(l.remove(2).map(|c| c.proc), Some(2));
        assert!(l.is_empty());
    }

    #[test]
    fn self_coupling_is_flagged() {
        let mut l = CouplingList::default();
        l.upsert(0, p(0));
        assert!(l.check(0).is_err());
    }
}
