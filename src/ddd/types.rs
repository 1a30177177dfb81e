//! Type registry and transfer hooks.
//!
//! Every object type is registered once, in the same order on every process,
//! with a [`TypeDesc`]: payload layout, reference slots, the priority merge
//! rule, and a [`Transferable`] handler whose hook methods default to no-ops.

use crate::ddd::object::{DddObject, ObjHandle, ObjectStore};
use crate::ddd::priority::{MergeWinner, PrioMergeMode, Priority};
use crate::ddd_error::DddError;
use crate::xfer::cmds::{CopyCx, DeleteCx};
use std::ops::Range;

/// Index of a registered type.
#[derive(
    Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, serde::Serialize, serde::Deserialize,
)]
pub struct DddType(pub u16);

/// Declared target of a reference slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RefTarget {
    /// Always refers to an object of this type.
    Static(DddType),
    /// Target type depends on the referenced object.
    Dynamic,
}

/// Type tag of an auxiliary data block.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AuxType {
    /// Items laid out like objects of a registered type; their references travel
    /// through the symbol table and are relocated on arrival.
    Object(DddType),
    /// Application-defined opaque bytes.
    User(u16),
}

/// One `attach` call: `count` items of `typ`, optionally with explicit item sizes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuxSpec {
    pub typ: AuxType,
    pub count: usize,
    pub sizes: Option<Vec<usize>>,
}

/// One gathered (or scattered) auxiliary item.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuxItem {
    pub data: Vec<u8>,
    pub refs: Vec<Option<ObjHandle>>,
}

/// Outcome of an incoming copy, as seen by scatter and consistency hooks.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Newness {
    /// The object did not exist here before this epoch.
    New,
    /// An existing local copy was refreshed from the incoming one.
    Upgrade,
    /// The incoming copy lost against the local one (or another message).
    Reject,
}

/// Per-type hooks invoked by the transfer engine.
pub trait Transferable {
    /// `XferCopyObj` was issued for `cx.object()`. May attach auxiliary data
    /// and issue further commands for dependent objects.
    fn on_copy(&mut self, _cx: &mut CopyCx<'_>) {}

    /// `XferDeleteObj` was issued. May delete dependent objects.
    fn on_delete(&mut self, _cx: &mut DeleteCx<'_>) {}

    /// The local copy is about to be destroyed.
    fn on_destroy(&mut self, _obj: &DddObject) {}

    /// A new local copy was built from an incoming message.
    fn on_construct(&mut self, _obj: &mut DddObject, _prio: Priority) {}

    /// A new local copy has all of its references localized.
    fn on_update(&mut self, _objects: &mut ObjectStore, _obj: ObjHandle) {}

    /// Produce the items announced by one `attach` call.
    fn gather(&mut self, _obj: &DddObject, _spec: &AuxSpec) -> Vec<AuxItem> {
        Vec::new()
    }

    /// Receive the items of one auxiliary block.
    fn scatter(
        &mut self,
        _obj: &mut DddObject,
        _typ: AuxType,
        _items: Vec<AuxItem>,
        _newness: Newness,
    ) {
    }

    /// The priority of the local copy changes from `old` to `new`.
    fn on_prio_change(&mut self, _obj: &mut DddObject, _old: Priority, _new: Priority) {}

    /// The local object graph of the epoch is stable.
    fn make_consistent(&mut self, _objects: &mut ObjectStore, _obj: ObjHandle, _newness: Newness) {}
}

/// Handler with no hooks.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHooks;

impl Transferable for NoHooks {}

/// Registration record of one object type.
pub struct TypeDesc {
    name: String,
    size: usize,
    local: Vec<Range<usize>>,
    refs: Vec<RefTarget>,
    merge: PrioMergeMode,
    handler: Box<dyn Transferable>,
}

impl TypeDesc {
    /// Type with `size` payload bytes, all global, no references.
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            size,
            local: Vec::new(),
            refs: Vec::new(),
            merge: PrioMergeMode::default(),
            handler: Box::new(NoHooks),
        }
    }

    /// Mark a byte range as process-local: it is not refreshed from incoming copies.
    pub fn local_data(mut self, range: Range<usize>) -> Self {
        self.local.push(range);
        self
    }

    /// Append a reference slot.
    pub fn reference(mut self, target: RefTarget) -> Self {
        self.refs.push(target);
        self
    }

    pub fn merge_mode(mut self, mode: PrioMergeMode) -> Self {
        self.merge = mode;
        self
    }

    pub fn handler<H: Transferable + 'static>(mut self, handler: H) -> Self {
        self.handler = Box::new(handler);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn size(&self) -> usize {
        self.size
    }
    pub fn ref_targets(&self) -> &[RefTarget] {
        &self.refs
    }
    pub fn n_refs(&self) -> usize {
        self.refs.len()
    }
    pub fn merge(&self) -> &PrioMergeMode {
        &self.merge
    }

    pub(crate) fn hooks(&mut self) -> &mut dyn Transferable {
        self.handler.as_mut()
    }

    /// Overwrite the global bytes of `dst` with those of `src`.
    ///
    /// Differing lengths mean a variable-size object changed size; the whole
    /// payload is replaced then.
    pub fn copy_global(&self, dst: &mut Vec<u8>, src: &[u8]) {
        if dst.len() != src.len() {
            *dst = src.to_vec();
            return;
        }
        let mut pos = 0;
        let mut local = self.local.clone();
        local.sort_by_key(|r| r.start);
        for r in local {
            let start = r.start.min(src.len());
            if pos < start {
                dst[pos..start].copy_from_slice(&src[pos..start]);
            }
            pos = pos.max(r.end.min(src.len()));
        }
        if pos < src.len() {
            dst[pos..].copy_from_slice(&src[pos..]);
        }
    }
}

impl std::fmt::Debug for TypeDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeDesc")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("local", &self.local)
            .field("refs", &self.refs)
            .field("merge", &self.merge)
            .finish_non_exhaustive()
    }
}

/// All registered types of one process.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: Vec<TypeDesc>,
}

impl TypeRegistry {
    pub fn register(&mut self, desc: TypeDesc) -> DddType {
        let t = DddType(self.types.len() as u16);
        log::debug!("registered type {} as {:?}", desc.name, t);
        self.types.push(desc);
        t
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn get(&self, t: DddType) -> Result<&TypeDesc, DddError> {
        self.types.get(t.0 as usize).ok_or(DddError::UnknownType(t.0))
    }

    pub fn get_mut(&mut self, t: DddType) -> Result<&mut TypeDesc, DddError> {
        self.types
            .get_mut(t.0 as usize)
            .ok_or(DddError::UnknownType(t.0))
    }

    /// `PriorityMerge(type, a, b)`.
    pub fn merge(
        &self,
        t: DddType,
        a: Priority,
        b: Priority,
    ) -> Result<(Priority, MergeWinner), DddError> {
        Ok(self.get(t)?.merge.merge(a, b))
    }
}
