//! Phase-1 packing: one message per destination holding the copies, the
//! symbol table of their references, and the coupling hints for that rank.

use crate::algs::exchange::Outgoing;
use crate::algs::wire::{MemWriter, WireObjEntry};
use crate::ddd::gid::Gid;
use crate::ddd::object::{ObjHandle, ObjectStore};
use crate::ddd::types::{AuxItem, AuxSpec, AuxType, TypeRegistry};
use crate::ddd_error::DddError;
use crate::xfer::closure::{Addressed, Closure};
use crate::xfer::intents::{CopyIntent, CplHint};
use crate::xfer::objmsg::{self, AUX_KIND_OBJECT, AUX_KIND_USER};
use std::collections::BTreeMap;

#[derive(Default)]
struct MsgBuilder {
    entries: Vec<WireObjEntry>,
    mem: MemWriter,
    /// `(position in mem, referenced GID)` of every non-null reference.
    patches: Vec<(usize, Gid)>,
    new_cpl: Vec<CplHint>,
    old_cpl: Vec<CplHint>,
}

impl MsgBuilder {
    fn put_ref(&mut self, objects: &ObjectStore, r: Option<ObjHandle>) {
        match r.and_then(|h| objects.get(h)) {
            Some(target) => {
                self.patches.push((self.mem.len(), target.gid()));
                self.mem.put_u32(u32::MAX);
            }
            None => self.mem.put_u32(0),
        }
    }

    fn finish(mut self) -> Vec<u8> {
        let mut syms: Vec<Gid> = self.patches.iter().map(|&(_, g)| g).collect();
        syms.sort_unstable();
        syms.dedup();
        for &(at, gid) in &self.patches {
            if let Ok(i) = syms.binary_search(&gid) {
                self.mem.patch_u32(at, i as u32 + 1);
            }
        }
        objmsg::encode(
            &self.entries,
            &syms,
            &self.new_cpl,
            &self.old_cpl,
            &self.mem.into_inner(),
        )
    }
}

/// Result of packing one epoch.
#[derive(Debug, Default)]
pub(crate) struct Packed {
    pub outbox: Vec<Outgoing>,
    pub objs_sent: usize,
    pub bytes_sent: usize,
}

fn check_aux(
    types: &TypeRegistry,
    gid: Gid,
    spec: &AuxSpec,
    items: &[AuxItem],
) -> Result<(), DddError> {
    let mismatch = |reason: String| DddError::AuxMismatch { gid, reason };
    if items.len() != spec.count {
        return Err(mismatch(format!(
            "{:?}: {} items attached, {} gathered",
            spec.typ,
            spec.count,
            items.len()
        )));
    }
    match (&spec.sizes, spec.typ) {
        (Some(sizes), _) => {
            for (i, (item, &want)) in items.iter().zip(sizes).enumerate() {
                if item.data.len() != want {
                    return Err(mismatch(format!(
                        "item {i} of {:?} has {} bytes, declared {want}",
                        spec.typ,
                        item.data.len()
                    )));
                }
            }
        }
        (None, AuxType::Object(t)) => {
            let want = types.get(t)?.size();
            if let Some(item) = items.iter().find(|it| it.data.len() != want) {
                return Err(mismatch(format!(
                    "{:?} item has {} bytes, type size is {want}",
                    spec.typ,
                    item.data.len()
                )));
            }
        }
        (None, AuxType::User(_)) => {}
    }
    Ok(())
}

fn put_aux(
    b: &mut MsgBuilder,
    objects: &ObjectStore,
    blocks: &[(AuxType, Vec<AuxItem>)],
) {
    if blocks.is_empty() {
        return;
    }
    b.mem.put_u32(blocks.len() as u32);
    for (typ, items) in blocks {
        let (kind, id) = match *typ {
            AuxType::Object(t) => (AUX_KIND_OBJECT, t.0),
            AuxType::User(id) => (AUX_KIND_USER, id),
        };
        b.mem.put_u8(kind);
        b.mem.put_u16(id);
        b.mem.put_u32(items.len() as u32);
        for item in items {
            b.mem.put_u32(item.data.len() as u32);
            b.mem.put_slice(&item.data);
            b.mem.put_u32(item.refs.len() as u32);
            for &r in &item.refs {
                b.put_ref(objects, r);
            }
        }
    }
}

fn put_hints(map: &mut BTreeMap<usize, MsgBuilder>, hints: &[Addressed], old: bool) {
    for a in hints {
        let b = map.entry(a.to).or_default();
        if old {
            b.old_cpl.push(a.hint);
        } else {
            b.new_cpl.push(a.hint);
        }
    }
}

/// Build the Phase-1 messages. `copies` must be unified and sorted by
/// `(dest, gid)`.
pub(crate) fn pack(
    objects: &ObjectStore,
    types: &mut TypeRegistry,
    copies: &[CopyIntent],
    closure: &Closure,
    largest_first: bool,
) -> Result<Packed, DddError> {
    let mut map: BTreeMap<usize, MsgBuilder> = BTreeMap::new();
    for copy in copies {
        let obj = objects.try_get(copy.h)?;

        let mut blocks = Vec::with_capacity(copy.aux.len());
        for spec in &copy.aux {
            let items = types.get_mut(copy.typ)?.hooks().gather(obj, spec);
            check_aux(types, copy.gid, spec, &items)?;
            blocks.push((spec.typ, items));
        }

        let b = map.entry(copy.dest).or_default();
        let offset = b.mem.len();
        let mut data = obj.data.clone();
        data.resize(copy.size, 0);
        b.mem.put_slice(&data);
        for &r in &obj.refs {
            b.put_ref(objects, r);
        }
        let aux_start = b.mem.len();
        put_aux(b, objects, &blocks);
        let aux_len = b.mem.len() - aux_start;

        b.entries.push(WireObjEntry::new(
            copy.gid.get(),
            copy.typ.0,
            copy.prio.get(),
            obj.attr(),
            offset,
            copy.size,
            obj.refs.len(),
            aux_len,
        ));
    }
    put_hints(&mut map, &closure.new_cpl, false);
    put_hints(&mut map, &closure.old_cpl, true);

    let mut packed = Packed {
        objs_sent: copies.len(),
        ..Packed::default()
    };
    for (dest, b) in map {
        let bytes = b.finish();
        log::trace!("object message for rank {dest}: {} bytes", bytes.len());
        packed.bytes_sent += bytes.len();
        packed.outbox.push(Outgoing { dest, bytes });
    }
    if largest_first {
        packed.outbox.sort_by(|a, b| b.bytes.len().cmp(&a.bytes.len()).then(a.dest.cmp(&b.dest)));
    }
    Ok(packed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddd::object::{DddHeader, DddObject};
    use crate::ddd::priority::Priority;
    use crate::ddd::types::{DddType, RefTarget, TypeDesc};

    fn p(v: u32) -> Priority {
        Priority::new(v).unwrap()
    }

    #[test]
    fn references_become_sorted_symbols() {
        let mut types = TypeRegistry::default();
        let t = types.register(
            TypeDesc::new("edge", 2)
                .reference(RefTarget::Dynamic)
                .reference(RefTarget::Dynamic),
        );
        let mut objects = ObjectStore::new();
        let mk = |gid| {
            DddObject::new(
                DddHeader {
                    gid: Gid::new(gid),
                    typ: t,
                    prio: p(1),
                    attr: 0,
                },
                vec![1, 2],
                2,
            )
        };
        let a = objects.insert(mk(20)).unwrap();
        let b = objects.insert(mk(10)).unwrap();
        objects.get_mut(a).unwrap().refs = vec![Some(b), Some(a)];

        let copies = vec![CopyIntent {
            gid: Gid::new(20),
            h: a,
            typ: t,
            dest: 1,
            prio: p(3),
            size: 4,
            aux: vec![],
            seq: 0,
        }];
        let packed = pack(&objects, &mut types, &copies, &Closure::default(), true).unwrap();
        assert_eq!(packed.outbox.len(), 1);
        let msg = objmsg::decode(0, &packed.outbox[0].bytes, 2).unwrap();
        assert_eq!(msg.syms, vec![Gid::new(10), Gid::new(20)]);
        let o = &msg.objs[0];
        assert_eq!(o.data, vec![1, 2, 0, 0]);
        assert_eq!(o.refs, vec![1, 2]);
        assert_eq!(o.prio, p(3));
        assert_eq!(o.typ, DddType(0));
    }

    #[test]
    fn gathered_count_must_match_attach() {
        use crate::ddd::types::Transferable;
        struct Short;
        impl Transferable for Short {
            fn gather(&mut self, _: &DddObject, _: &AuxSpec) -> Vec<AuxItem> {
                vec![AuxItem::default()]
            }
        }
        let mut types = TypeRegistry::default();
        let t = types.register(TypeDesc::new("n", 0).handler(Short));
        let mut objects = ObjectStore::new();
        let h = objects
            .insert(DddObject::new(
                DddHeader {
                    gid: Gid::new(1),
                    typ: t,
                    prio: p(0),
                    attr: 0,
                },
                vec![],
                0,
            ))
            .unwrap();
        let copies = vec![CopyIntent {
            gid: Gid::new(1),
            h,
            typ: t,
            dest: 1,
            prio: p(0),
            size: 0,
            aux: vec![AuxSpec {
                typ: AuxType::User(0),
                count: 2,
                sizes: None,
            }],
            seq: 0,
        }];
        assert!(matches!(
            pack(&objects, &mut types, &copies, &Closure::default(), false),
            Err(DddError::AuxMismatch { .. })
        ));
    }
}
