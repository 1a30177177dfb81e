//! Delete pruning: before Phase 1 every rank tells each destination which
//! GIDs it is about to send there. A receiver that planned to delete one of
//! them keeps its copy instead; the incoming copy is then accepted as
//! `PrunedNew`.

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::exchange::{self, Incoming, Outgoing};
use crate::algs::wire::{
    KIND_PRUNE_MSG, MemReader, WIRE_VERSION, WireGid, WireHdr, WireLen, put_pod, put_pods,
};
use crate::ddd::gid::Gid;
use crate::ddd_error::DddError;
use crate::xfer::intents::{CopyIntent, DeleteIntent};
use itertools::Itertools;
use std::collections::BTreeSet;

fn announcements(copies: &[CopyIntent]) -> Vec<Outgoing> {
    let mut out = Vec::new();
    for (dest, run) in &copies.iter().chunk_by(|c| c.dest) {
        let gids: Vec<WireGid> = run.map(|c| WireGid::of(c.gid.get())).collect();
        let mut bytes = Vec::with_capacity(16 + gids.len() * 8);
        put_pod(&mut bytes, &WireHdr::new(KIND_PRUNE_MSG));
        put_pod(&mut bytes, &WireLen::new(gids.len()));
        put_pods(&mut bytes, &gids);
        out.push(Outgoing { dest, bytes });
    }
    out
}

fn decode(msg: &Incoming) -> Result<Vec<Gid>, DddError> {
    let inner = || -> Result<Vec<Gid>, String> {
        let mut r = MemReader::new(&msg.bytes);
        let hdr: WireHdr = r.pod()?;
        if hdr.version() != WIRE_VERSION || hdr.kind() != KIND_PRUNE_MSG {
            return Err(format!("unexpected header v{} kind {}", hdr.version(), hdr.kind()));
        }
        let n: WireLen = r.pod()?;
        let gids = r.pods::<WireGid>(n.get())?.iter().map(|g| Gid::new(g.get())).collect();
        r.finish()?;
        Ok(gids)
    };
    inner().map_err(|reason| DddError::MalformedMessage {
        from: msg.from,
        reason,
    })
}

/// Run the pruning round. `copies` must be sorted by `(dest, gid)`.
///
/// Returns the deletes still to execute and the GIDs whose delete was
/// cancelled.
pub(crate) fn prune<C: Communicator>(
    comm: &C,
    tag: CommTag,
    copies: &[CopyIntent],
    deletes: Vec<DeleteIntent>,
) -> Result<(Vec<DeleteIntent>, BTreeSet<Gid>), DddError> {
    let inbox = exchange::exchange(comm, tag, announcements(copies))?;
    let mut incoming = BTreeSet::new();
    for msg in &inbox {
        incoming.extend(decode(msg)?);
    }
    let (pruned, kept): (Vec<DeleteIntent>, Vec<DeleteIntent>) =
        deletes.into_iter().partition(|d| incoming.contains(&d.gid));
    if !pruned.is_empty() {
        log::debug!("rank {}: {} deletes pruned by incoming copies", comm.rank(), pruned.len());
    }
    Ok((kept, pruned.into_iter().map(|d| d.gid).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::LocalComm;
    use crate::ddd::object::{DddHeader, DddObject, ObjectStore};
    use crate::ddd::priority::Priority;
    use crate::ddd::types::DddType;

    #[test]
    fn incoming_copy_cancels_delete() {
        let world = LocalComm::world(2);
        let mut store = ObjectStore::new();
        let h = store
            .insert(DddObject::new(
                DddHeader {
                    gid: Gid::new(3),
                    typ: DddType(0),
                    prio: Priority::default(),
                    attr: 0,
                },
                vec![],
                0,
            ))
            .unwrap();
        let copy = CopyIntent {
            gid: Gid::new(3),
            h,
            typ: DddType(0),
            dest: 1,
            prio: Priority::default(),
            size: 0,
            aux: vec![],
            seq: 0,
        };
        let delete = DeleteIntent {
            gid: Gid::new(3),
            h,
            typ: DddType(0),
            snapshot: vec![],
            seq: 0,
        };
        let mut it = world.into_iter();
        let (c0, c1) = (it.next().unwrap(), it.next().unwrap());
        let t =
            std::thread::spawn(move || prune(&c0, CommTag::new(0x10), &[copy], vec![]).unwrap());
        let (kept, pruned) = prune(&c1, CommTag::new(0x10), &[], vec![delete]).unwrap();
        t.join().unwrap();
        assert!(kept.is_empty());
        assert!(pruned.contains(&Gid::new(3)));
    }
}
