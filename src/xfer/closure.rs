//! Coupling-closure estimate for the outgoing copies of one epoch.
//!
//! For every copy to a destination that does not yet hold the object (a new
//! owner) the estimate announces:
//! - to each existing holder: "the destination is about to hold a copy" (new-coupling hint);
//! - to the destination: "these ranks, and I, already hold copies" (old-coupling hint);
//! - to each pair of new owners of the same object: each other.
//!
//! Copies to ranks that already hold the object produce no hints.

use crate::ddd::gid::Gid;
use crate::ddd::object::ObjectStore;
use crate::ddd_error::DddError;
use crate::xfer::intents::{CopyIntent, CplHint, NewOwner};
use itertools::Itertools;

/// A hint and the rank it is addressed to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Addressed {
    pub to: usize,
    pub hint: CplHint,
}

#[derive(Debug, Default)]
pub(crate) struct Closure {
    /// Sorted by `(gid, dest)`.
    pub new_owners: Vec<NewOwner>,
    /// Sorted by `(to, gid, proc)`, unique.
    pub new_cpl: Vec<Addressed>,
    /// Sorted by `(to, gid, proc)`, unique.
    pub old_cpl: Vec<Addressed>,
}

impl Closure {
    /// New owners of `gid`.
    pub fn new_owners_of(&self, gid: Gid) -> &[NewOwner] {
        crate::xfer::intents::gid_range(&self.new_owners, gid, |n| n.gid)
    }
}

/// `copies` must be unified (one entry per `(dest, gid)`).
pub(crate) fn estimate(
    objects: &ObjectStore,
    me: usize,
    copies: &[CopyIntent],
) -> Result<Closure, DddError> {
    let mut c = Closure::default();

    for copy in copies {
        let obj = objects.try_get(copy.h)?;
        let cpl = obj.couplings();
        if cpl.contains(copy.dest) {
            continue;
        }
        c.new_owners.push(NewOwner {
            gid: copy.gid,
            typ: copy.typ,
            dest: copy.dest,
            prio: copy.prio,
        });
        for q in cpl {
            c.new_cpl.push(Addressed {
                to: q.proc,
                hint: CplHint {
                    gid: copy.gid,
                    proc: copy.dest,
                    prio: copy.prio,
                },
            });
            c.old_cpl.push(Addressed {
                to: copy.dest,
                hint: CplHint {
                    gid: copy.gid,
                    proc: q.proc,
                    prio: q.prio,
                },
            });
        }
        c.old_cpl.push(Addressed {
            to: copy.dest,
            hint: CplHint {
                gid: copy.gid,
                proc: me,
                prio: obj.prio(),
            },
        });
    }

    c.new_owners.sort_by_key(|n| (n.gid, n.dest));
    for (_, group) in &c.new_owners.iter().chunk_by(|n| n.gid) {
        let group: Vec<&NewOwner> = group.collect();
        for (a, b) in group.iter().tuple_combinations() {
            c.new_cpl.push(Addressed {
                to: a.dest,
                hint: CplHint {
                    gid: a.gid,
                    proc: b.dest,
                    prio: b.prio,
                },
            });
            c.new_cpl.push(Addressed {
                to: b.dest,
                hint: CplHint {
                    gid: b.gid,
                    proc: a.dest,
                    prio: a.prio,
                },
            });
        }
    }

    for v in [&mut c.new_cpl, &mut c.old_cpl] {
        v.sort_by_key(|a| (a.to, a.hint.gid, a.hint.proc));
        v.dedup_by_key(|a| (a.to, a.hint.gid, a.hint.proc));
    }
    log::debug!(
        "closure estimate: {} new owners, {} new-coupling hints, {} old-coupling hints",
        c.new_owners.len(),
        c.new_cpl.len(),
        c.old_cpl.len()
    );
    Ok(c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddd::object::{DddHeader, DddObject, ObjHandle};
    use crate::ddd::priority::Priority;
    use crate::ddd::types::DddType;

    fn p(v: u32) -> Priority {
        Priority::new(v).unwrap()
    }

    fn store_with_g42() -> (ObjectStore, ObjHandle) {
        let mut s = ObjectStore::new();
        let mut o = DddObject::new(
            DddHeader {
                gid: Gid::new(42),
                typ: DddType(0),
                prio: p(2),
                attr: 0,
            },
            vec![],
            0,
        );
        o.couplings_mut().upsert(1, p(2));
        let h = s.insert(o).unwrap();
        (s, h)
    }

    fn copy(h: ObjHandle, dest: usize, prio: u32) -> CopyIntent {
        CopyIntent {
            gid: Gid::new(42),
            h,
            typ: DddType(0),
            dest,
            prio: p(prio),
            size: 0,
            aux: vec![],
            seq: 0,
        }
    }

    #[test]
    fn new_owner_hints_both_directions() {
        let (s, h) = store_with_g42();
        let c = estimate(&s, 0, &[copy(h, 2, 1)]).unwrap();
        assert_eq!(c.new_owners.len(), 1);
        // rank 1 learns about rank 2
        assert_eq!(
            c.new_cpl,
            vec![Addressed {
                to: 1,
                hint: CplHint {
                    gid: Gid::new(42),
                    proc: 2,
                    prio: p(1)
                }
            }]
        );
        // rank 2 learns about ranks 0 and 1
        let old: Vec<_> = c.old_cpl.iter().map(|a| (a.to, a.hint.proc, a.hint.prio)).collect();
        assert_eq!(old, vec![(2, 0, p(2)), (2, 1, p(2))]);
    }

    #[test]
    fn old_owner_gets_no_hints() {
        let (s, h) = store_with_g42();
        let c = estimate(&s, 0, &[copy(h, 1, 3)]).unwrap();
        assert!(c.new_owners.is_empty());
        assert!(c.new_cpl.is_empty());
        assert!(c.old_cpl.is_empty());
    }

    #[test]
    fn new_owners_cross_notified() {
        let (s, h) = store_with_g42();
        let c = estimate(&s, 0, &[copy(h, 2, 1), copy(h, 3, 4)]).unwrap();
        let to = |r: usize| -> Vec<_> {
            c.new_cpl
                .iter()
                .filter(|a| a.to == r)
                .map(|a| (a.hint.proc, a.hint.prio))
                .collect()
        };
        let (to2, to3) = (to(2), to(3));
        assert_eq!(to2, vec![(3, p(4))]);
        assert_eq!(to3, vec![(2, p(1))]);
        assert_eq!(c.new_owners_of(Gid::new(42)).len(), 2);
    }
}
