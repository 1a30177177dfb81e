//! Coupling propagation: after Phase 1, reconcile per GID the copies sent
//! to new owners, the new-coupling hints received, the deletes executed
//! here and the copies accepted here, and queue the Phase-2 notices.

use crate::ddd::gid::Gid;
use crate::ddd::object::ObjectStore;
use crate::ddd::priority::{PrioMergeMode, Priority};
use crate::ddd::types::TypeRegistry;
use crate::ddd_error::DddError;
use crate::xfer::closure::Closure;
use crate::xfer::cplmsg::Notices;
use crate::xfer::intents::{CplHint, DeleteIntent, gid_range};
use crate::xfer::unpack::{NewState, Unpacked};
use std::collections::{BTreeMap, BTreeSet};

/// Inputs of one propagation pass. All slices are sorted by GID.
pub(crate) struct Sources<'a> {
    pub closure: &'a Closure,
    pub unpacked: &'a Unpacked,
    pub deletes: &'a [DeleteIntent],
}

/// Run the four-way merge, then queue modify notices for every dirty GID.
pub(crate) fn propagate(
    objects: &mut ObjectStore,
    types: &TypeRegistry,
    me: usize,
    src: Sources<'_>,
    notices: &mut Notices,
    dirty: &mut BTreeSet<Gid>,
) -> Result<usize, DddError> {
    let mut gids: BTreeSet<Gid> = BTreeSet::new();
    gids.extend(src.closure.new_owners.iter().map(|n| n.gid));
    gids.extend(src.unpacked.new_cpl.iter().map(|h| h.gid));
    gids.extend(src.deletes.iter().map(|d| d.gid));
    gids.extend(src.unpacked.accepted.iter().map(|a| a.gid));

    let fallback = PrioMergeMode::default();
    let mut resurrected = 0;
    for gid in gids {
        let owners = src.closure.new_owners_of(gid);
        let hints: &[CplHint] = gid_range(&src.unpacked.new_cpl, gid, |h| h.gid);
        let deleted = src
            .deletes
            .binary_search_by_key(&gid, |d| d.gid)
            .ok()
            .map(|i| &src.deletes[i]);
        let state = src.unpacked.state_of(gid);

        let typ = objects
            .find(gid)
            .map(|o| o.typ())
            .or(deleted.map(|d| d.typ))
            .or(owners.first().map(|n| n.typ));
        let mode = match typ {
            Some(t) => types.get(t)?.merge(),
            None => &fallback,
        };
        let mut holders: BTreeMap<usize, Priority> = BTreeMap::new();
        let announced = owners
            .iter()
            .map(|n| (n.dest, n.prio))
            .chain(hints.iter().map(|h| (h.proc, h.prio)));
        for (proc, prio) in announced {
            holders
                .entry(proc)
                .and_modify(|p| *p = mode.merge(*p, prio).0)
                .or_insert(prio);
        }
        // every new owner learns every other announced holder
        for n in owners {
            for (&proc, &prio) in &holders {
                notices.add(n.dest, gid, proc, prio);
            }
        }

        if deleted.is_some() && state != Some(NewState::TotalNew) {
            // gone here: holders announced by others must drop us
            for h in hints {
                notices.delete(h.proc, gid);
            }
            continue;
        }

        let Some(obj) = objects.find_mut(gid) else {
            if !hints.is_empty() {
                log::warn!("rank {me}: coupling hints for {gid}, which is not held here");
            }
            continue;
        };
        if let Some(d) = deleted {
            for c in &d.snapshot {
                if c.proc != me {
                    obj.couplings_mut().upsert(c.proc, c.prio);
                }
            }
            notices.cancel_deletes(gid);
            dirty.insert(gid);
            resurrected += 1;
            log::debug!("rank {me}: {gid} deleted and received back in one epoch");
        }
        for (&proc, &prio) in &holders {
            if proc != me {
                obj.couplings_mut().upsert(proc, prio);
            }
        }
        if state.is_some() {
            dirty.insert(gid);
        }
    }

    for &gid in dirty.iter() {
        if let Some(obj) = objects.find(gid) {
            for proc in obj.couplings().procs() {
                notices.modify(proc, gid);
            }
        }
    }
    Ok(resurrected)
}
