//! Transfer intents collected between `xfer_begin` and `end`, and the
//! sort/unify pass that runs once per epoch.
//!
//! Unification rules:
//! - copies to the same `(dest, gid)` collapse to the merge winner;
//! - duplicate deletes of one GID collapse to one;
//! - duplicate priority changes of one GID fold through the type's merge;
//! - a priority change of a GID that is also deleted is dropped.

use crate::ddd::coupling::Coupling;
use crate::ddd::gid::Gid;
use crate::ddd::object::ObjHandle;
use crate::ddd::priority::{MergeWinner, Priority};
use crate::ddd::types::{AuxSpec, DddType, TypeRegistry};
use crate::ddd_error::DddError;
use itertools::Itertools;

/// "Send a copy of this object to `dest` at `prio`."
#[derive(Clone, Debug)]
pub(crate) struct CopyIntent {
    pub gid: Gid,
    pub h: ObjHandle,
    pub typ: DddType,
    pub dest: usize,
    pub prio: Priority,
    pub size: usize,
    pub aux: Vec<AuxSpec>,
    pub seq: usize,
}

/// "Change the priority of the local copy."
#[derive(Clone, Debug)]
pub(crate) struct PrioIntent {
    pub gid: Gid,
    pub h: ObjHandle,
    pub typ: DddType,
    pub prio: Priority,
    pub seq: usize,
}

/// "Remove the local copy." Carries the coupling list as it was when the
/// command was issued.
#[derive(Clone, Debug)]
pub(crate) struct DeleteIntent {
    pub gid: Gid,
    pub h: ObjHandle,
    pub typ: DddType,
    pub snapshot: Vec<Coupling>,
    pub seq: usize,
}

/// Phase-1 coupling hint: "`proc` holds (or will hold) `gid` at `prio`".
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct CplHint {
    pub gid: Gid,
    pub proc: usize,
    pub prio: Priority,
}

/// A copy whose destination did not hold the object before.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct NewOwner {
    pub gid: Gid,
    pub typ: DddType,
    pub dest: usize,
    pub prio: Priority,
}

/// Per-epoch command buffer.
#[derive(Debug, Default)]
pub(crate) struct IntentBuffer {
    pub copies: Vec<CopyIntent>,
    pub prios: Vec<PrioIntent>,
    pub deletes: Vec<DeleteIntent>,
    next_seq: usize,
}

impl IntentBuffer {
    pub fn next_seq(&mut self) -> usize {
        let s = self.next_seq;
        self.next_seq += 1;
        s
    }

    pub fn is_empty(&self) -> bool {
        self.copies.is_empty() && self.prios.is_empty() && self.deletes.is_empty()
    }
}

/// Sort copies by `(dest, gid)` and keep one merge winner per pair.
pub(crate) fn unify_copies(
    mut copies: Vec<CopyIntent>,
    types: &TypeRegistry,
) -> Result<Vec<CopyIntent>, DddError> {
    copies.sort_by_key(|c| (c.dest, c.gid, c.seq));
    let mut out: Vec<CopyIntent> = Vec::with_capacity(copies.len());
    for (_, run) in &copies.into_iter().chunk_by(|c| (c.dest, c.gid)) {
        let mut run = run.into_iter();
        let Some(mut winner) = run.next() else {
            continue;
        };
        for other in run {
            let (prio, w) = types.merge(winner.typ, winner.prio, other.prio)?;
            if w == MergeWinner::Second {
                winner = other;
            }
            winner.prio = prio;
        }
        out.push(winner);
    }
    Ok(out)
}

/// Sort deletes by GID, dropping repeats.
pub(crate) fn unify_deletes(mut deletes: Vec<DeleteIntent>) -> Vec<DeleteIntent> {
    deletes.sort_by_key(|d| (d.gid, d.seq));
    deletes.dedup_by_key(|d| d.gid);
    deletes
}

/// Sort priority changes by GID, folding repeats through the merge.
pub(crate) fn unify_prios(
    mut prios: Vec<PrioIntent>,
    types: &TypeRegistry,
) -> Result<Vec<PrioIntent>, DddError> {
    prios.sort_by_key(|p| (p.gid, p.seq));
    let mut out: Vec<PrioIntent> = Vec::with_capacity(prios.len());
    for p in prios {
        match out.last_mut() {
            Some(last) if last.gid == p.gid => {
                last.prio = types.merge(last.typ, last.prio, p.prio)?.0;
            }
            _ => out.push(p),
        }
    }
    Ok(out)
}

/// Drop priority changes of deleted GIDs. Both inputs are sorted by GID.
pub(crate) fn drop_deleted_prios(
    prios: Vec<PrioIntent>,
    deletes: &[DeleteIntent],
) -> Vec<PrioIntent> {
    prios
        .into_iter()
        .filter(|p| {
            let deleted = deletes.binary_search_by_key(&p.gid, |d| d.gid).is_ok();
            if deleted {
                log::debug!("priority change of {} skipped: object is deleted", p.gid);
            }
            !deleted
        })
        .collect()
}

/// Slice of GID-sorted `items` belonging to `gid`.
pub(crate) fn gid_range<T>(items: &[T], gid: Gid, key: impl Fn(&T) -> Gid) -> &[T] {
    let lo = items.partition_point(|t| key(t) < gid);
    let hi = lo + items[lo..].partition_point(|t| key(t) == gid);
    &items[lo..hi]
}
