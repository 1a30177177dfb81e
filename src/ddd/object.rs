//! Local object storage.
//!
//! Each process owns an [`ObjectStore`]: a generational arena of
//! [`DddObject`]s plus a `Gid -> ObjHandle` index. Object references inside
//! payloads are [`ObjHandle`]s; a handle whose slot was freed (or reused)
//! simply stops resolving, so references to destroyed objects read as null.

use crate::ddd::coupling::CouplingList;
use crate::ddd::gid::Gid;
use crate::ddd::priority::Priority;
use crate::ddd::types::DddType;
use crate::ddd_error::DddError;
use crate::debug_invariants::DebugInvariants;
use hashbrown::HashMap;

/// Handle of a local object: arena slot plus generation.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct ObjHandle {
    idx: u32,
    generation: u32,
}

/// Persistent per-object identity and state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DddHeader {
    pub gid: Gid,
    pub typ: DddType,
    pub prio: Priority,
    pub attr: u32,
}

/// A local copy of a distributed object.
#[derive(Clone, Debug)]
pub struct DddObject {
    hdr: DddHeader,
    /// Plain payload bytes.
    pub data: Vec<u8>,
    /// Reference slots, one per reference declared by the type.
    pub refs: Vec<Option<ObjHandle>>,
    couplings: CouplingList,
}

impl DddObject {
    pub fn new(hdr: DddHeader, data: Vec<u8>, n_refs: usize) -> Self {
        Self {
            hdr,
            data,
            refs: vec![None; n_refs],
            couplings: CouplingList::default(),
        }
    }

    pub fn header(&self) -> &DddHeader {
        &self.hdr
    }
    pub fn gid(&self) -> Gid {
        self.hdr.gid
    }
    pub fn typ(&self) -> DddType {
        self.hdr.typ
    }
    pub fn prio(&self) -> Priority {
        self.hdr.prio
    }
    pub fn attr(&self) -> u32 {
        self.hdr.attr
    }
    pub fn couplings(&self) -> &CouplingList {
        &self.couplings
    }

    /// Priority and coupling lists only change through the transfer engine.
    pub(crate) fn set_prio(&mut self, prio: Priority) {
        self.hdr.prio = prio;
    }
    pub(crate) fn set_attr(&mut self, attr: u32) {
        self.hdr.attr = attr;
    }
    pub(crate) fn couplings_mut(&mut self) -> &mut CouplingList {
        &mut self.couplings
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    obj: Option<DddObject>,
}

/// Arena of local objects indexed by handle and by GID.
#[derive(Debug, Default)]
pub struct ObjectStore {
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_gid: HashMap<Gid, ObjHandle>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.by_gid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_gid.is_empty()
    }

    /// Insert `obj`; fails if its GID is already present.
    pub fn insert(&mut self, obj: DddObject) -> Result<ObjHandle, DddError> {
        let gid = obj.gid();
        if self.by_gid.contains_key(&gid) {
            return Err(DddError::DuplicateGid(gid));
        }
        let h = match self.free.pop() {
            Some(idx) => {
                let slot = &mut self.slots[idx as usize];
                slot.obj = Some(obj);
                ObjHandle {
                    idx,
                    generation: slot.generation,
                }
            }
            None => {
                let idx = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    obj: Some(obj),
                });
                ObjHandle { idx, generation: 0 }
            }
        };
        self.by_gid.insert(gid, h);
        Ok(h)
    }

    /// Remove and return the object behind `h`.
    pub fn remove(&mut self, h: ObjHandle) -> Option<DddObject> {
        let slot = self.slots.get_mut(h.idx as usize)?;
        if slot.generation != h.generation {
            return None;
        }
        let obj = slot.obj.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(h.idx);
        self.by_gid.remove(&obj.gid());
        Some(obj)
    }

    pub fn get(&self, h: ObjHandle) -> Option<&DddObject> {
        self.slots
            .get(h.idx as usize)
            .filter(|s| s.generation == h.generation)
            .and_then(|s| s.obj.as_ref())
    }

    pub fn get_mut(&mut self, h: ObjHandle) -> Option<&mut DddObject> {
        self.slots
            .get_mut(h.idx as usize)
            .filter(|s| s.generation == h.generation)
            .and_then(|s| s.obj.as_mut())
    }

    /// Like [`ObjectStore::get`] but with a typed error.
    pub fn try_get(&self, h: ObjHandle) -> Result<&DddObject, DddError> {
        self.get(h).ok_or(DddError::UnknownObject(h))
    }

    pub fn try_get_mut(&mut self, h: ObjHandle) -> Result<&mut DddObject, DddError> {
        self.get_mut(h).ok_or(DddError::UnknownObject(h))
    }

    pub fn contains(&self, h: ObjHandle) -> bool {
        self.get(h).is_some()
    }

    /// Handle of the local copy of `gid`, if this process holds one.
    pub fn by_gid(&self, gid: Gid) -> Option<ObjHandle> {
        self.by_gid.get(&gid).copied()
    }

    /// Local copy of `gid`.
    pub fn find(&self, gid: Gid) -> Option<&DddObject> {
        self.by_gid(gid).and_then(|h| self.get(h))
    }

    pub fn find_mut(&mut self, gid: Gid) -> Option<&mut DddObject> {
        let h = self.by_gid(gid)?;
        self.get_mut(h)
    }

    /// Iterate live objects in arena order.
    pub fn iter(&self) -> impl Iterator<Item = (ObjHandle, &DddObject)> + '_ {
        self.slots.iter().enumerate().filter_map(|(idx, s)| {
            s.obj.as_ref().map(|o| {
                (
                    ObjHandle {
                        idx: idx as u32,
                        generation: s.generation,
                    },
                    o,
                )
            })
        })
    }

    /// GIDs of all live objects, sorted.
    pub fn gids(&self) -> Vec<Gid> {
        let mut v: Vec<Gid> = self.by_gid.keys().copied().collect();
        v.sort_unstable();
        v
    }

    /// Check coupling lists against the owning rank `me`.
    pub fn validate_couplings(&self, me: usize) -> Result<(), DddError> {
        self.validate_invariants()?;
        for (_, obj) in self.iter() {
            obj.couplings()
                .check(me)
                .map_err(|e| DddError::InvariantViolation(format!("{}: {e}", obj.gid())))?;
        }
        Ok(())
    }
}

impl DebugInvariants for ObjectStore {
    fn invariant_context(&self) -> &'static str {
        "ObjectStore"
    }

    fn validate_invariants(&self) -> Result<(), DddError> {
        let live = self.slots.iter().filter(|s| s.obj.is_some()).count();
        if live != self.by_gid.len() {
            return Err(DddError::InvariantViolation(format!(
                "{live} live objects but {} indexed GIDs",
                self.by_gid.len()
            )));
        }
        for (&gid, &h) in &self.by_gid {
            match self.get(h) {
                Some(obj) if obj.gid() == gid => {}
                _ => {
                    return Err(DddError::InvariantViolation(format!(
                        "GID index entry {gid} points to a foreign or dead slot"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(gid: u64) -> DddObject {
        DddObject::new(
            DddHeader {
                gid: Gid::new(gid),
                typ: DddType(0),
                prio: Priority::default(),
                attr: 0,
            },
            vec![1, 2, 3],
            1,
        )
    }

    #[test]
    fn insert_lookup_remove() {
        let mut s = ObjectStore::new();
        let h = s.insert(obj(7)).unwrap();
        assert_eq!(s.by_gid(Gid::new(7)), Some(h));
        assert_eq!(s.get(h).unwrap().data, vec![1, 2, 3]);
        let o = s.remove(h).unwrap();
        assert_eq!(o.gid(), Gid::new(7));
        assert!(s.get(h).is_none());
        assert!(s.by_gid(Gid::new(7)).is_none());
        s.validate_invariants().unwrap();
    }

    #[test]
    fn duplicate_gid_rejected() {
        let mut s = ObjectStore::new();
        s.insert(obj(1)).unwrap();
        assert!(matches!(s.insert(obj(1)), Err(DddError::DuplicateGid(_))));
    }

    #[test]
    fn stale_handle_after_slot_reuse() {
        let mut s = ObjectStore::new();
        let old = s.insert(obj(1)).unwrap();
        s.remove(old);
        let new = s.insert(obj(2)).unwrap();
        assert!(s.get(old).is_none());
        assert_eq!(s.get(new).unwrap().gid(), Gid::new(2));
    }
}
