//! One transfer epoch (`XferBegin` .. `XferEnd`).
//!
//! `end` runs, in order:
//! 1. sort and unify the recorded intents;
//! 2. optionally the delete-pruning round;
//! 3. drop priority changes of deleted objects;
//! 4. estimate the coupling closure and pack the Phase-1 messages;
//! 5. post Phase 1, then execute local deletes and priority changes;
//! 6. wait for Phase 1, resolve and construct the incoming copies;
//! 7. propagate couplings and exchange the Phase-2 notices.

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::exchange;
use crate::ddd_error::DddError;
use crate::debug_invariants::DebugInvariants;
use crate::xfer::context::Ddd;
use crate::xfer::cplmsg::{self, CplMsg, Notices};
use crate::xfer::intents::{self, IntentBuffer};
use crate::xfer::objmsg::{self, ObjMsg};
use crate::xfer::propagate::{self, Sources};
use crate::xfer::{closure, local_exec, pack, prune, unpack};
use serde::Serialize;
use std::collections::BTreeSet;

/// Counters of one completed epoch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct XferStats {
    /// Phase-1 messages sent.
    pub msgs_sent: usize,
    /// Object copies sent, after unification.
    pub objs_sent: usize,
    pub bytes_sent: usize,
    /// Object entries received, before collision resolution.
    pub objs_received: usize,
    pub total_new: usize,
    pub part_new: usize,
    pub pruned_new: usize,
    pub not_new: usize,
    /// Local copies destroyed.
    pub deleted: usize,
    /// Local priority changes applied.
    pub prio_changed: usize,
    /// Deleted objects received back in the same epoch.
    pub resurrected: usize,
    /// Deletes cancelled by the pruning round.
    pub pruned_deletes: usize,
    pub cpl_del_sent: usize,
    pub cpl_add_sent: usize,
    pub cpl_mod_sent: usize,
}

/// An open transfer epoch. Holds the context exclusively until [`end`](Self::end).
#[derive(Debug)]
pub struct TransferEpoch<'a, C: Communicator> {
    pub(crate) ddd: &'a mut Ddd<C>,
    pub(crate) buf: IntentBuffer,
}

impl<'a, C: Communicator> TransferEpoch<'a, C> {
    pub(crate) fn new(ddd: &'a mut Ddd<C>) -> Self {
        Self {
            ddd,
            buf: IntentBuffer::default(),
        }
    }

    /// True while no command has been recorded.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// `XferEnd`: run both communication phases. Collective: every rank of
    /// the communicator must call it, with or without recorded commands.
    ///
    /// On error this rank still takes part in the remaining message rounds,
    /// sending nothing, so its peers finish the epoch instead of blocking.
    /// The local object graph may then be partly updated and the couplings
    /// across ranks are no longer consistent.
    pub fn end(self) -> Result<XferStats, DddError> {
        let TransferEpoch { ddd, buf } = self;
        let tag = CommTag::new(ddd.config.tag_base);
        let mut owed = Rounds::new(ddd.config.prune_deletes);
        let result = run(ddd, buf, tag, &mut owed);
        if let Err(e) = &result {
            log::warn!("rank {}: epoch failed: {e}", ddd.me);
            owed.drain(&ddd.comm, tag);
        }
        result
    }
}

/// Collective rounds of an epoch this rank has not taken part in yet.
#[derive(Debug)]
struct Rounds {
    prune: bool,
    objects: bool,
    couplings: bool,
}

impl Rounds {
    fn new(prune: bool) -> Self {
        Self {
            prune,
            objects: true,
            couplings: true,
        }
    }

    /// Join every owed round with an empty outbox and discard what arrives.
    fn drain<C: Communicator>(self, comm: &C, tag: CommTag) {
        for (pending, k) in [(self.prune, 0), (self.objects, 2), (self.couplings, 4)] {
            if !pending {
                continue;
            }
            if let Err(e) = exchange::exchange(comm, tag.offset(k), Vec::new()) {
                log::warn!("rank {}: round {k} of a failed epoch: {e}", comm.rank());
            }
        }
    }
}

fn run<C: Communicator>(
    ddd: &mut Ddd<C>,
    mut buf: IntentBuffer,
    tag: CommTag,
    owed: &mut Rounds,
) -> Result<XferStats, DddError> {
    let me = ddd.me;
    let procs = ddd.procs;
    let mut stats = XferStats::default();

    let copies = intents::unify_copies(std::mem::take(&mut buf.copies), &ddd.types)?;
    let mut deletes = intents::unify_deletes(std::mem::take(&mut buf.deletes));
    let prios = intents::unify_prios(std::mem::take(&mut buf.prios), &ddd.types)?;
    // a delete beats a priority change even when pruning cancels the delete
    let prios = intents::drop_deleted_prios(prios, &deletes);

    let mut pruned = BTreeSet::new();
    if ddd.config.prune_deletes {
        let round = prune::prune(&ddd.comm, tag, &copies, deletes);
        owed.prune = false;
        let (kept, cancelled) = round?;
        deletes = kept;
        pruned = cancelled;
        stats.pruned_deletes = pruned.len();
    }

    // --- Phase 1 ---------------------------------------------------------
    let closure = closure::estimate(&ddd.objects, me, &copies)?;
    let packed = pack::pack(
        &ddd.objects,
        &mut ddd.types,
        &copies,
        &closure,
        ddd.config.largest_first,
    )?;
    stats.msgs_sent = packed.outbox.len();
    stats.objs_sent = packed.objs_sent;
    stats.bytes_sent = packed.bytes_sent;
    let pending = exchange::post(&ddd.comm, tag.offset(2), packed.outbox)?;

    let mut notices = Notices::default();
    let mut dirty = BTreeSet::new();
    let local = local_exec::execute_deletes(
        &mut ddd.objects,
        &mut ddd.types,
        &deletes,
        &closure,
        &mut notices,
        &mut stats,
    )
    .and_then(|()| {
        local_exec::execute_prios(
            &mut ddd.objects,
            &mut ddd.types,
            &prios,
            &mut dirty,
            &mut stats,
        )
    });
    let inbox = pending.complete();
    owed.objects = false;
    local?;
    let msgs: Vec<ObjMsg> = inbox?
        .iter()
        .map(|m| objmsg::decode(m.from, &m.bytes, procs))
        .collect::<Result<_, _>>()?;

    let unpacked = unpack::unpack(
        &mut ddd.objects,
        &mut ddd.types,
        me,
        &ddd.config,
        &msgs,
        &pruned,
        &mut stats,
    )?;

    // --- Phase 2 ---------------------------------------------------------
    let src = Sources {
        closure: &closure,
        unpacked: &unpacked,
        deletes: &deletes,
    };
    stats.resurrected =
        propagate::propagate(&mut ddd.objects, &ddd.types, me, src, &mut notices, &mut dirty)?;
    (stats.cpl_del_sent, stats.cpl_add_sent, stats.cpl_mod_sent) = notices.counts();
    let outbox = notices.pack(&ddd.objects, me);
    let received = exchange::exchange(&ddd.comm, tag.offset(4), outbox);
    owed.couplings = false;
    let cpl_msgs: Vec<CplMsg> = received?
        .iter()
        .map(|m| cplmsg::decode(m, procs))
        .collect::<Result<_, _>>()?;
    cplmsg::apply(&mut ddd.objects, me, &cpl_msgs);

    ddd.objects.debug_assert_invariants();
    #[cfg(feature = "check-invariants")]
    ddd.objects.validate_couplings(me)?;

    log::debug!(
        "rank {me}: epoch done, {} copies sent in {} messages, {} received, {} deleted",
        stats.objs_sent,
        stats.msgs_sent,
        stats.objs_received,
        stats.deleted
    );
    Ok(stats)
}
