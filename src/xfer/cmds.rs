//! Command buffer API: `copy_object`, `set_priority`, `delete_object`.
//!
//! Commands only record intents; nothing is visible until
//! [`TransferEpoch::end`]. Hooks run synchronously while a command is
//! recorded and may issue further commands for dependent objects, which are
//! processed in issue order after the hook returns.

use crate::algs::communicator::Communicator;
use crate::ddd::object::{DddObject, ObjHandle, ObjectStore};
use crate::ddd::priority::Priority;
use crate::ddd::types::{AuxSpec, AuxType};
use crate::ddd_error::DddError;
use crate::xfer::epoch::TransferEpoch;
use crate::xfer::intents::{CopyIntent, DeleteIntent, PrioIntent};
use std::collections::VecDeque;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Command {
    Copy {
        obj: ObjHandle,
        dest: usize,
        prio: Priority,
        size: Option<usize>,
    },
    SetPrio {
        obj: ObjHandle,
        prio: Priority,
    },
    Delete {
        obj: ObjHandle,
    },
}

/// View handed to [`Transferable::on_copy`](crate::ddd::types::Transferable::on_copy).
pub struct CopyCx<'a> {
    objects: &'a ObjectStore,
    obj: &'a DddObject,
    handle: ObjHandle,
    dest: usize,
    prio: Priority,
    me: usize,
    aux: Vec<AuxSpec>,
    nested: Vec<Command>,
}

impl<'a> CopyCx<'a> {
    fn new(
        objects: &'a ObjectStore,
        obj: &'a DddObject,
        handle: ObjHandle,
        dest: usize,
        prio: Priority,
        me: usize,
    ) -> Self {
        Self {
            objects,
            obj,
            handle,
            dest,
            prio,
            me,
            aux: Vec::new(),
            nested: Vec::new(),
        }
    }

    /// The object being copied.
    pub fn object(&self) -> &DddObject {
        self.obj
    }
    pub fn handle(&self) -> ObjHandle {
        self.handle
    }
    pub fn dest(&self) -> usize {
        self.dest
    }
    pub fn prio(&self) -> Priority {
        self.prio
    }
    /// True when copying to the own rank, which only changes the priority.
    pub fn is_local(&self) -> bool {
        self.dest == self.me
    }
    pub fn objects(&self) -> &ObjectStore {
        self.objects
    }

    /// Send `count` items of `typ` along with the copy (`XferAddData`).
    pub fn attach(&mut self, count: usize, typ: AuxType) {
        self.aux.push(AuxSpec {
            typ,
            count,
            sizes: None,
        });
    }

    /// Like [`CopyCx::attach`] with one explicit byte size per item (`XferAddDataX`).
    pub fn attach_sized(&mut self, typ: AuxType, sizes: Vec<usize>) {
        self.aux.push(AuxSpec {
            typ,
            count: sizes.len(),
            sizes: Some(sizes),
        });
    }

    /// Copy another object as part of this one.
    pub fn copy(&mut self, obj: ObjHandle, dest: usize, prio: Priority) {
        self.nested.push(Command::Copy {
            obj,
            dest,
            prio,
            size: None,
        });
    }

    pub fn set_priority(&mut self, obj: ObjHandle, prio: Priority) {
        self.nested.push(Command::SetPrio { obj, prio });
    }

    pub fn delete(&mut self, obj: ObjHandle) {
        self.nested.push(Command::Delete { obj });
    }
}

/// View handed to [`Transferable::on_delete`](crate::ddd::types::Transferable::on_delete).
pub struct DeleteCx<'a> {
    objects: &'a ObjectStore,
    obj: &'a DddObject,
    handle: ObjHandle,
    nested: Vec<Command>,
}

impl<'a> DeleteCx<'a> {
    pub fn object(&self) -> &DddObject {
        self.obj
    }
    pub fn handle(&self) -> ObjHandle {
        self.handle
    }
    pub fn objects(&self) -> &ObjectStore {
        self.objects
    }
    /// Delete a dependent object.
    pub fn delete(&mut self, obj: ObjHandle) {
        self.nested.push(Command::Delete { obj });
    }
}

impl<C: Communicator> TransferEpoch<'_, C> {
    /// `XferCopyObj`: send a copy of `obj` to `dest` with priority `prio`.
    ///
    /// Copying to the own rank is recorded as a priority change; the copy
    /// hook still runs, but attached data goes nowhere.
    pub fn copy_object(
        &mut self,
        obj: ObjHandle,
        dest: usize,
        prio: Priority,
    ) -> Result<(), DddError> {
        self.run(Command::Copy {
            obj,
            dest,
            prio,
            size: None,
        })
    }

    /// `XferCopyObjX`: like [`copy_object`](Self::copy_object) with an explicit payload size.
    pub fn copy_object_sized(
        &mut self,
        obj: ObjHandle,
        dest: usize,
        prio: Priority,
        size: usize,
    ) -> Result<(), DddError> {
        self.run(Command::Copy {
            obj,
            dest,
            prio,
            size: Some(size),
        })
    }

    /// `XferPrioChange`.
    pub fn set_priority(&mut self, obj: ObjHandle, prio: Priority) -> Result<(), DddError> {
        self.run(Command::SetPrio { obj, prio })
    }

    /// `XferDeleteObj`. The delete hook runs now; destruction happens in `end`.
    pub fn delete_object(&mut self, obj: ObjHandle) -> Result<(), DddError> {
        self.run(Command::Delete { obj })
    }

    fn run(&mut self, first: Command) -> Result<(), DddError> {
        let mut queue = VecDeque::from([first]);
        while let Some(cmd) = queue.pop_front() {
            match cmd {
                Command::Copy {
                    obj,
                    dest,
                    prio,
                    size,
                } => self.record_copy(obj, dest, prio, size, &mut queue)?,
                Command::SetPrio { obj, prio } => self.record_prio(obj, prio)?,
                Command::Delete { obj } => self.record_delete(obj, &mut queue)?,
            }
        }
        Ok(())
    }

    fn record_copy(
        &mut self,
        obj: ObjHandle,
        dest: usize,
        prio: Priority,
        size: Option<usize>,
        queue: &mut VecDeque<Command>,
    ) -> Result<(), DddError> {
        let ddd = &mut *self.ddd;
        if dest >= ddd.procs {
            return Err(DddError::InvalidRank {
                rank: dest,
                size: ddd.procs,
            });
        }
        let o = ddd.objects.try_get(obj)?;
        let (gid, typ) = (o.gid(), o.typ());
        let size = size.unwrap_or(o.data.len());
        let mut cx = CopyCx::new(&ddd.objects, o, obj, dest, prio, ddd.me);
        ddd.types.get_mut(typ)?.hooks().on_copy(&mut cx);
        let CopyCx { aux, nested, .. } = cx;
        queue.extend(nested);

        let seq = self.buf.next_seq();
        if dest == ddd.me {
            if !aux.is_empty() {
                log::debug!("copy of {gid} to own rank: {} attached blocks not sent", aux.len());
            }
            self.buf.prios.push(PrioIntent {
                gid,
                h: obj,
                typ,
                prio,
                seq,
            });
        } else {
            self.buf.copies.push(CopyIntent {
                gid,
                h: obj,
                typ,
                dest,
                prio,
                size,
                aux,
                seq,
            });
        }
        Ok(())
    }

    fn record_prio(&mut self, obj: ObjHandle, prio: Priority) -> Result<(), DddError> {
        let o = self.ddd.objects.try_get(obj)?;
        let (gid, typ) = (o.gid(), o.typ());
        let seq = self.buf.next_seq();
        self.buf.prios.push(PrioIntent {
            gid,
            h: obj,
            typ,
            prio,
            seq,
        });
        Ok(())
    }

    fn record_delete(
        &mut self,
        obj: ObjHandle,
        queue: &mut VecDeque<Command>,
    ) -> Result<(), DddError> {
        let ddd = &mut *self.ddd;
        let o = ddd.objects.try_get(obj)?;
        let (gid, typ) = (o.gid(), o.typ());
        let snapshot = o.couplings().snapshot();
        let mut cx = DeleteCx {
            objects: &ddd.objects,
            obj: o,
            handle: obj,
            nested: Vec::new(),
        };
        ddd.types.get_mut(typ)?.hooks().on_delete(&mut cx);
        queue.extend(cx.nested);

        let seq = self.buf.next_seq();
        self.buf.deletes.push(DeleteIntent {
            gid,
            h: obj,
            typ,
            snapshot,
            seq,
        });
        Ok(())
    }
}
