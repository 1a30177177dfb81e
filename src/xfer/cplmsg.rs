//! Phase-2 coupling notices.
//!
//! ```text
//! WireHdr | WireCplMsgHdr | WireGid[n_del] | WireCpl[n_add] | WireModCpl[n_mod]
//! ```
//!
//! Receivers apply every delete notice first, then every add notice, then
//! every modify notice, over all messages of the phase.

use crate::algs::exchange::{Incoming, Outgoing};
use crate::algs::wire::{
    KIND_CPL_MSG, MemReader, WIRE_VERSION, WireCpl, WireCplMsgHdr, WireGid, WireHdr, WireModCpl,
    put_pod, put_pods,
};
use crate::ddd::gid::Gid;
use crate::ddd::object::ObjectStore;
use crate::ddd::priority::Priority;
use crate::ddd_error::DddError;
use crate::xfer::intents::CplHint;
use std::collections::{BTreeMap, BTreeSet};

/// Outgoing notices of one epoch, keyed by destination.
#[derive(Debug, Default)]
pub(crate) struct Notices {
    del: BTreeSet<(usize, Gid)>,
    add: BTreeMap<(usize, Gid, usize), Priority>,
    modify: BTreeSet<(usize, Gid)>,
}

impl Notices {
    /// "My copy of `gid` is gone."
    pub fn delete(&mut self, dest: usize, gid: Gid) {
        self.del.insert((dest, gid));
    }

    /// "`proc` holds `gid` at `prio`."
    pub fn add(&mut self, dest: usize, gid: Gid, proc: usize, prio: Priority) {
        if dest != proc {
            self.add.insert((dest, gid, proc), prio);
        }
    }

    /// "My copy of `gid` has a new priority." The priority is read when packing.
    pub fn modify(&mut self, dest: usize, gid: Gid) {
        self.modify.insert((dest, gid));
    }

    /// Drop queued delete notices of `gid` (the copy came back).
    pub fn cancel_deletes(&mut self, gid: Gid) {
        self.del.retain(|&(_, g)| g != gid);
    }

    #[cfg(test)]
    pub fn has_delete(&self, dest: usize, gid: Gid) -> bool {
        self.del.contains(&(dest, gid))
    }

    /// `(delete, add, modify)` notice counts.
    pub fn counts(&self) -> (usize, usize, usize) {
        (self.del.len(), self.add.len(), self.modify.len())
    }

    /// Encode one message per destination. Modify notices carry the current
    /// priority of the local copy; notices for copies that no longer exist
    /// are dropped.
    pub fn pack(self, objects: &ObjectStore, me: usize) -> Vec<Outgoing> {
        #[derive(Default)]
        struct Msg {
            del: Vec<WireGid>,
            add: Vec<WireCpl>,
            modify: Vec<WireModCpl>,
        }
        let mut map: BTreeMap<usize, Msg> = BTreeMap::new();
        for (dest, gid) in self.del {
            map.entry(dest).or_default().del.push(WireGid::of(gid.get()));
        }
        for ((dest, gid, proc), prio) in self.add {
            map.entry(dest)
                .or_default()
                .add
                .push(WireCpl::new(gid.get(), proc as u32, prio.get()));
        }
        for (dest, gid) in self.modify {
            match objects.find(gid) {
                Some(obj) => map
                    .entry(dest)
                    .or_default()
                    .modify
                    .push(WireModCpl::new(gid.get(), obj.prio().get())),
                None => log::debug!("modify notice for {gid} dropped: no local copy"),
            }
        }
        map.into_iter()
            .filter(|&(dest, _)| dest != me)
            .map(|(dest, m)| {
                let mut bytes = Vec::new();
                put_pod(&mut bytes, &WireHdr::new(KIND_CPL_MSG));
                put_pod(&mut bytes, &WireCplMsgHdr::new(m.del.len(), m.add.len(), m.modify.len()));
                put_pods(&mut bytes, &m.del);
                put_pods(&mut bytes, &m.add);
                put_pods(&mut bytes, &m.modify);
                Outgoing { dest, bytes }
            })
            .collect()
    }
}

/// A decoded Phase-2 message.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct CplMsg {
    pub from: usize,
    pub del: Vec<Gid>,
    pub add: Vec<CplHint>,
    pub modify: Vec<(Gid, Priority)>,
}

fn decode_inner(from: usize, bytes: &[u8], procs: usize) -> Result<CplMsg, String> {
    let mut r = MemReader::new(bytes);
    let hdr: WireHdr = r.pod()?;
    if hdr.version() != WIRE_VERSION || hdr.kind() != KIND_CPL_MSG {
        return Err(format!("unexpected header v{} kind {}", hdr.version(), hdr.kind()));
    }
    let counts: WireCplMsgHdr = r.pod()?;
    let (n_del, n_add, n_mod) = counts.counts();
    let del = r
        .pods::<WireGid>(n_del)?
        .iter()
        .map(|g| Gid::new(g.get()))
        .collect();
    let mut add = Vec::with_capacity(n_add);
    for rec in r.pods::<WireCpl>(n_add)? {
        let (gid, proc, prio) = rec.decode();
        if proc as usize >= procs {
            return Err(format!("add notice names rank {proc}"));
        }
        add.push(CplHint {
            gid: Gid::new(gid),
            proc: proc as usize,
            prio: Priority::from_wire(prio).ok_or_else(|| format!("priority {prio} out of range"))?,
        });
    }
    let mut modify = Vec::with_capacity(n_mod);
    for rec in r.pods::<WireModCpl>(n_mod)? {
        let (gid, prio) = rec.decode();
        let prio =
            Priority::from_wire(prio).ok_or_else(|| format!("priority {prio} out of range"))?;
        modify.push((Gid::new(gid), prio));
    }
    r.finish()?;
    Ok(CplMsg {
        from,
        del,
        add,
        modify,
    })
}

pub(crate) fn decode(msg: &Incoming, procs: usize) -> Result<CplMsg, DddError> {
    decode_inner(msg.from, &msg.bytes, procs).map_err(|reason| DddError::MalformedMessage {
        from: msg.from,
        reason,
    })
}

/// Apply received notices: deletes, then adds, then modifies.
pub(crate) fn apply(objects: &mut ObjectStore, me: usize, msgs: &[CplMsg]) {
    for m in msgs {
        for &gid in &m.del {
            match objects.find_mut(gid) {
                Some(obj) => {
                    obj.couplings_mut().remove(m.from);
                }
                None => log::trace!("delete notice from {} for absent {gid}", m.from),
            }
        }
    }
    for m in msgs {
        for a in &m.add {
            if a.proc == me {
                continue;
            }
            match objects.find_mut(a.gid) {
                Some(obj) => {
                    obj.couplings_mut().upsert(a.proc, a.prio);
                }
                None => log::trace!("add notice from {} for absent {}", m.from, a.gid),
            }
        }
    }
    for m in msgs {
        for &(gid, prio) in &m.modify {
            match objects.find_mut(gid) {
                Some(obj) => {
                    obj.couplings_mut().upsert(m.from, prio);
                }
                None => log::trace!("modify notice from {} for absent {gid}", m.from),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddd::object::{DddHeader, DddObject};
    use crate::ddd::types::DddType;

    fn p(v: u32) -> Priority {
        Priority::new(v).unwrap()
    }

    fn store() -> ObjectStore {
        let mut s = ObjectStore::new();
        let mut o = DddObject::new(
            DddHeader {
                gid: Gid::new(42),
                typ: DddType(0),
                prio: p(3),
                attr: 0,
            },
            vec![],
            0,
        );
        o.couplings_mut().upsert(1, p(1));
        s.insert(o).unwrap();
        s
    }

    #[test]
    fn pack_and_decode_carry_current_priority() {
        let objects = store();
        let mut n = Notices::default();
        n.delete(1, Gid::new(7));
        n.add(1, Gid::new(42), 2, p(5));
        n.modify(1, Gid::new(42));
        n.modify(1, Gid::new(99));
        let out = n.pack(&objects, 0);
        assert_eq!(out.len(), 1);
        let msg = decode(
            &Incoming {
                from: 0,
                bytes: out[0].bytes.clone(),
            },
            3,
        )
        .unwrap();
        assert_eq!(msg.del, vec![Gid::new(7)]);
        assert_eq!(msg.add[0].proc, 2);
        assert_eq!(msg.modify, vec![(Gid::new(42), p(3))]);
    }

    #[test]
    fn cancel_drops_only_that_gid() {
        let mut n = Notices::default();
        n.delete(1, Gid::new(7));
        n.delete(2, Gid::new(7));
        n.delete(2, Gid::new(8));
        n.cancel_deletes(Gid::new(7));
        assert_eq!(n.counts(), (1, 0, 0));
        assert!(n.has_delete(2, Gid::new(8)));
    }

    #[test]
    fn apply_order_delete_add_modify() {
        let mut objects = store();
        let msgs = vec![
            CplMsg {
                from: 2,
                del: vec![],
                add: vec![CplHint {
                    gid: Gid::new(42),
                    proc: 1,
                    prio: p(6),
                }],
                modify: vec![(Gid::new(42), p(4))],
            },
            CplMsg {
                from: 1,
                del: vec![Gid::new(42)],
                add: vec![],
                modify: vec![],
            },
        ];
        apply(&mut objects, 0, &msgs);
        let obj = objects.find(Gid::new(42)).unwrap();
        let cpl: Vec<_> = obj.couplings().iter().map(|c| (c.proc, c.prio)).collect();
        // the delete from 1 runs first; the add re-couples it
        assert_eq!(cpl, vec![(1, p(6)), (2, p(4))]);
    }
}
