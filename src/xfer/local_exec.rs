//! Local execution of deletes and priority changes, run while the Phase-1
//! messages are in flight.

use crate::ddd::gid::Gid;
use crate::ddd::object::ObjectStore;
use crate::ddd::types::TypeRegistry;
use crate::ddd_error::DddError;
use crate::xfer::closure::Closure;
use crate::xfer::cplmsg::Notices;
use crate::xfer::epoch::XferStats;
use crate::xfer::intents::{DeleteIntent, PrioIntent};
use std::collections::BTreeSet;

/// Destroy the local copies named by `deletes` and queue a delete notice for
/// every rank that held a copy or is about to receive one from here.
pub(crate) fn execute_deletes(
    objects: &mut ObjectStore,
    types: &mut TypeRegistry,
    deletes: &[DeleteIntent],
    closure: &Closure,
    notices: &mut Notices,
    stats: &mut XferStats,
) -> Result<(), DddError> {
    for d in deletes {
        for c in &d.snapshot {
            notices.delete(c.proc, d.gid);
        }
        for n in closure.new_owners_of(d.gid) {
            notices.delete(n.dest, d.gid);
        }
        let Some(obj) = objects.get(d.h) else {
            log::warn!("delete of {}: local copy already gone", d.gid);
            continue;
        };
        types.get_mut(d.typ)?.hooks().on_destroy(obj);
        objects.remove(d.h);
        stats.deleted += 1;
    }
    Ok(())
}

/// Apply priority changes that survived the delete check. Changed GIDs are
/// added to `dirty`.
pub(crate) fn execute_prios(
    objects: &mut ObjectStore,
    types: &mut TypeRegistry,
    prios: &[PrioIntent],
    dirty: &mut BTreeSet<Gid>,
    stats: &mut XferStats,
) -> Result<(), DddError> {
    for p in prios {
        let obj = objects.try_get_mut(p.h)?;
        let old = obj.prio();
        types.get_mut(p.typ)?.hooks().on_prio_change(obj, old, p.prio);
        obj.set_prio(p.prio);
        dirty.insert(p.gid);
        stats.prio_changed += 1;
    }
    Ok(())
}
