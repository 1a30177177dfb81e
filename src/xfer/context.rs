//! Per-process DDD context.

use crate::algs::communicator::Communicator;
use crate::config::XferConfig;
use crate::ddd::gid::Gid;
use crate::ddd::object::{DddHeader, DddObject, ObjHandle, ObjectStore};
use crate::ddd::priority::Priority;
use crate::ddd::types::{DddType, TypeDesc, TypeRegistry};
use crate::ddd_error::DddError;
use crate::xfer::epoch::TransferEpoch;

/// Local slice of the distributed object graph plus the communicator it is
/// kept consistent over.
#[derive(Debug)]
pub struct Ddd<C: Communicator> {
    pub(crate) comm: C,
    pub(crate) me: usize,
    pub(crate) procs: usize,
    pub(crate) types: TypeRegistry,
    pub(crate) objects: ObjectStore,
    pub(crate) config: XferConfig,
    next_gid: u64,
}

impl<C: Communicator> Ddd<C> {
    pub fn new(comm: C, config: XferConfig) -> Self {
        let me = comm.rank();
        let procs = comm.size();
        Self {
            comm,
            me,
            procs,
            types: TypeRegistry::default(),
            objects: ObjectStore::new(),
            config,
            next_gid: 1,
        }
    }

    pub fn me(&self) -> usize {
        self.me
    }
    pub fn procs(&self) -> usize {
        self.procs
    }
    pub fn config(&self) -> &XferConfig {
        &self.config
    }
    pub fn comm(&self) -> &C {
        &self.comm
    }
    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }
    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    /// Mutable access to payloads and references. Priorities and couplings
    /// stay under the engine's control.
    pub fn objects_mut(&mut self) -> &mut ObjectStore {
        &mut self.objects
    }

    /// Register a type. All processes must register the same types in the same order.
    pub fn register_type(&mut self, desc: TypeDesc) -> DddType {
        self.types.register(desc)
    }

    /// Create a purely local object with a freshly minted GID.
    pub fn create_object(
        &mut self,
        typ: DddType,
        prio: Priority,
        attr: u32,
        data: Vec<u8>,
    ) -> Result<ObjHandle, DddError> {
        let gid = Gid::compose(self.next_gid, self.me);
        self.next_gid += 1;
        self.adopt_object(gid, typ, prio, attr, data)
    }

    /// Create a local object with a known GID (e.g. one replica of an object
    /// whose copies are set up by the caller).
    pub fn adopt_object(
        &mut self,
        gid: Gid,
        typ: DddType,
        prio: Priority,
        attr: u32,
        data: Vec<u8>,
    ) -> Result<ObjHandle, DddError> {
        let n_refs = self.types.get(typ)?.n_refs();
        let obj = DddObject::new(DddHeader { gid, typ, prio, attr }, data, n_refs);
        self.objects.insert(obj)
    }

    /// Record that `proc` holds a copy of `h` at `prio`.
    pub fn add_coupling(
        &mut self,
        h: ObjHandle,
        proc: usize,
        prio: Priority,
    ) -> Result<(), DddError> {
        if proc >= self.procs || proc == self.me {
            return Err(DddError::InvalidRank {
                rank: proc,
                size: self.procs,
            });
        }
        self.objects.try_get_mut(h)?.couplings_mut().upsert(proc, prio);
        Ok(())
    }

    /// Open a transfer epoch (`XferBegin`).
    pub fn xfer_begin(&mut self) -> TransferEpoch<'_, C> {
        TransferEpoch::new(self)
    }
}
