//! Phase-1 receive: collision resolution, object construction, reference
//! localization and the batched lifecycle hooks.
//!
//! Entries of all messages are sorted by `(gid, sender)`. Each GID run keeps
//! one winner; the rest become `OtherMsg`. The winner is then matched
//! against the local copy, if any:
//!
//! | local copy            | merge(incoming, local) | state       |
//! |-----------------------|------------------------|-------------|
//! | none                  |                        | `TotalNew`  |
//! | delete was pruned     |                        | `PrunedNew` |
//! | present               | second                 | `NotNew`    |
//! | present               | first / unknown        | `PartNew`   |

use crate::config::XferConfig;
use crate::ddd::gid::Gid;
use crate::ddd::object::{DddHeader, DddObject, ObjHandle, ObjectStore};
use crate::ddd::priority::{MergeWinner, PrioMergeMode, Priority};
use crate::ddd::types::{AuxItem, AuxType, DddType, Newness, RefTarget, TypeRegistry};
use crate::ddd_error::DddError;
use crate::xfer::epoch::XferStats;
use crate::xfer::intents::CplHint;
use crate::xfer::objmsg::{AuxBlockIn, ObjEntry, ObjMsg};
use hashbrown::HashSet;
use std::collections::BTreeSet;

/// Outcome of one incoming entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum NewState {
    /// Run winner before the local collision check.
    ThisMsg,
    /// Lost against another entry of the same GID.
    OtherMsg,
    NotNew,
    PartNew,
    PrunedNew,
    TotalNew,
}

impl NewState {
    fn newness(self) -> Newness {
        match self {
            NewState::TotalNew => Newness::New,
            NewState::PartNew | NewState::PrunedNew => Newness::Upgrade,
            _ => Newness::Reject,
        }
    }

    fn refreshed(self) -> bool {
        matches!(self, NewState::PartNew | NewState::PrunedNew)
    }
}

/// One incoming GID after resolution.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Accepted {
    pub gid: Gid,
    pub state: NewState,
    pub handle: ObjHandle,
}

#[derive(Debug, Default)]
pub(crate) struct Unpacked {
    /// Sorted by GID, one per incoming GID.
    pub accepted: Vec<Accepted>,
    /// Sorted by `(gid, proc)`, one per pair.
    pub new_cpl: Vec<CplHint>,
}

impl Unpacked {
    pub fn state_of(&self, gid: Gid) -> Option<NewState> {
        self.accepted
            .binary_search_by_key(&gid, |a| a.gid)
            .ok()
            .map(|i| self.accepted[i].state)
    }
}

#[derive(Debug)]
struct Slot {
    msg: usize,
    idx: usize,
    gid: Gid,
    from: usize,
    prio: Priority,
    state: NewState,
}

#[derive(Debug)]
struct Run {
    gid: Gid,
    typ: DddType,
    lo: usize,
    hi: usize,
    winner: usize,
    prio: Priority,
    old_prio: Priority,
    handle: Option<ObjHandle>,
}

impl Run {
    /// Winner first, then the other entries in sender order.
    fn order(&self) -> impl Iterator<Item = usize> + '_ {
        std::iter::once(self.winner).chain((self.lo..self.hi).filter(move |&k| k != self.winner))
    }
}

fn entry<'m>(msgs: &'m [ObjMsg], s: &Slot) -> &'m ObjEntry {
    &msgs[s.msg].objs[s.idx]
}

fn malformed(from: usize, reason: String) -> DddError {
    DddError::MalformedMessage { from, reason }
}

/// Resolve a symbol index through a message's localized symbol table.
fn resolve(
    objects: &ObjectStore,
    table: &[Option<ObjHandle>],
    idx: u32,
    target: RefTarget,
    owner: Gid,
) -> Option<ObjHandle> {
    let h = match idx {
        0 => None,
        i => table.get(i as usize - 1).copied().flatten(),
    }?;
    if let RefTarget::Static(t) = target {
        let actual = objects.get(h)?.typ();
        if actual != t {
            log::warn!("reference of {owner} expects {t:?}, target is {actual:?}; treated as null");
            return None;
        }
    }
    Some(h)
}

fn localize_aux(
    objects: &ObjectStore,
    table: &[Option<ObjHandle>],
    blocks: &[AuxBlockIn],
    owner: Gid,
) -> Vec<(AuxType, Vec<AuxItem>)> {
    blocks
        .iter()
        .map(|b| {
            let items = b
                .items
                .iter()
                .map(|it| AuxItem {
                    data: it.data.clone(),
                    refs: it
                        .refs
                        .iter()
                        .map(|&i| resolve(objects, table, i, RefTarget::Dynamic, owner))
                        .collect(),
                })
                .collect();
            (b.typ, items)
        })
        .collect()
}

/// Resolve all received objects against the local store.
pub(crate) fn unpack(
    objects: &mut ObjectStore,
    types: &mut TypeRegistry,
    me: usize,
    config: &XferConfig,
    msgs: &[ObjMsg],
    pruned: &BTreeSet<Gid>,
    stats: &mut XferStats,
) -> Result<Unpacked, DddError> {
    let mut slots: Vec<Slot> = msgs
        .iter()
        .enumerate()
        .flat_map(|(m, msg)| {
            msg.objs.iter().enumerate().map(move |(idx, o)| Slot {
                msg: m,
                idx,
                gid: o.gid,
                from: msg.from,
                prio: o.prio,
                state: NewState::ThisMsg,
            })
        })
        .collect();
    slots.sort_by_key(|s| (s.gid, s.from));
    stats.objs_received = slots.len();

    // --- 1. one winner per GID ---------------------------------------------
    let mut runs: Vec<Run> = Vec::new();
    let mut lo = 0;
    while lo < slots.len() {
        let gid = slots[lo].gid;
        let hi = lo + slots[lo..].partition_point(|s| s.gid == gid);
        let typ = entry(msgs, &slots[lo]).typ;
        let n_refs = types.get(typ)?.n_refs();
        let mut winner = lo;
        let mut prio = slots[lo].prio;
        for k in lo..hi {
            let e = entry(msgs, &slots[k]);
            if e.typ != typ {
                return Err(malformed(
                    slots[k].from,
                    format!("{gid} arrives as {:?} and {typ:?}", e.typ),
                ));
            }
            if e.refs.len() != n_refs {
                return Err(malformed(
                    slots[k].from,
                    format!("{gid} carries {} references, type has {n_refs}", e.refs.len()),
                ));
            }
            if k == lo {
                continue;
            }
            let (merged, w) = types.merge(typ, prio, slots[k].prio)?;
            if w == MergeWinner::Second {
                slots[winner].state = NewState::OtherMsg;
                winner = k;
            } else {
                slots[k].state = NewState::OtherMsg;
            }
            prio = merged;
        }
        for s in &mut slots[lo..hi] {
            s.prio = prio;
        }
        runs.push(Run {
            gid,
            typ,
            lo,
            hi,
            winner,
            prio,
            old_prio: prio,
            handle: None,
        });
        lo = hi;
    }

    // --- 2. local collision and construction -----------------------------------
    for run in &mut runs {
        let w = &slots[run.winner];
        let e = entry(msgs, w);
        let state = match objects.by_gid(run.gid) {
            Some(h) => {
                let desc = types.get(run.typ)?;
                let obj = objects.try_get_mut(h)?;
                if obj.typ() != run.typ {
                    return Err(malformed(
                        w.from,
                        format!(
                            "{} arrives as {:?}, local copy is {:?}",
                            run.gid,
                            run.typ,
                            obj.typ()
                        ),
                    ));
                }
                run.handle = Some(h);
                run.old_prio = obj.prio();
                let state = if pruned.contains(&run.gid) {
                    NewState::PrunedNew
                } else {
                    let (merged, win) = desc.merge().merge(run.prio, obj.prio());
                    run.prio = merged;
                    match win {
                        MergeWinner::Second => NewState::NotNew,
                        MergeWinner::First | MergeWinner::Unknown => NewState::PartNew,
                    }
                };
                if state.refreshed() {
                    desc.copy_global(&mut obj.data, &e.data);
                    obj.set_attr(e.attr);
                }
                state
            }
            None => {
                let n_refs = types.get(run.typ)?.n_refs();
                let hdr = DddHeader {
                    gid: run.gid,
                    typ: run.typ,
                    prio: run.prio,
                    attr: e.attr,
                };
                let mut obj = DddObject::new(hdr, e.data.clone(), n_refs);
                types.get_mut(run.typ)?.hooks().on_construct(&mut obj, run.prio);
                run.handle = Some(objects.insert(obj)?);
                NewState::TotalNew
            }
        };
        slots[run.winner].state = state;
        match state {
            NewState::TotalNew => stats.total_new += 1,
            NewState::PartNew => stats.part_new += 1,
            NewState::PrunedNew => stats.pruned_new += 1,
            _ => stats.not_new += 1,
        }
    }

    // --- 3. reference localization ------------------------------------------
    let incoming: HashSet<Gid> = runs.iter().map(|r| r.gid).collect();
    let tables: Vec<Vec<Option<ObjHandle>>> = msgs
        .iter()
        .map(|m| {
            m.syms
                .iter()
                .map(|g| {
                    objects.by_gid(*g).filter(|&h| {
                        incoming.contains(g)
                            || objects.get(h).is_some_and(|o| !o.couplings().is_empty())
                    })
                })
                .collect()
        })
        .collect();

    for run in &runs {
        let Some(h) = run.handle else { continue };
        let targets = types.get(run.typ)?.ref_targets().to_vec();
        let total_new = slots[run.winner].state == NewState::TotalNew;
        let mut refs: Vec<Option<ObjHandle>> = objects
            .try_get(h)?
            .refs
            .iter()
            .map(|r| r.filter(|&x| objects.contains(x)))
            .collect();
        for (n, k) in run.order().enumerate() {
            let s = &slots[k];
            let e = entry(msgs, s);
            let table = &tables[s.msg];
            for (i, (&idx, &target)) in e.refs.iter().zip(&targets).enumerate() {
                let new = resolve(objects, table, idx, target, run.gid);
                if n == 0 && total_new {
                    refs[i] = new;
                    continue;
                }
                match (refs[i], new) {
                    (None, new) => refs[i] = new,
                    (Some(old), Some(new)) if old != new && config.warn_ref_collision => {
                        log::warn!(
                            "reference collision in {} slot {i}: keeping local target",
                            run.gid
                        )
                    }
                    _ => {}
                }
            }
        }
        objects.try_get_mut(h)?.refs = refs;
    }

    // --- 4a. priority changes of existing copies ---------------------------------
    for run in &runs {
        let state = slots[run.winner].state;
        if state == NewState::TotalNew {
            continue;
        }
        let Some(h) = run.handle else { continue };
        let obj = objects.try_get_mut(h)?;
        types.get_mut(run.typ)?.hooks().on_prio_change(obj, run.old_prio, run.prio);
        obj.set_prio(run.prio);
    }

    // --- 4b. update of new copies ----------------------------------------------
    for run in &runs {
        if slots[run.winner].state != NewState::TotalNew {
            continue;
        }
        if let Some(h) = run.handle {
            types.get_mut(run.typ)?.hooks().on_update(objects, h);
        }
    }

    // --- 4c. scatter: new, refreshed, rejected winners, then losers ------------------
    let scatter_order: [fn(NewState) -> bool; 3] = [
        |s: NewState| s == NewState::TotalNew,
        |s: NewState| s.refreshed(),
        |s: NewState| s == NewState::NotNew,
    ];
    for pick in scatter_order {
        for run in &runs {
            let s = &slots[run.winner];
            if pick(s.state) {
                scatter_entry(objects, types, msgs, &tables, run, s, s.state.newness())?;
            }
        }
    }
    for run in &runs {
        for k in run.order().skip(1) {
            scatter_entry(objects, types, msgs, &tables, run, &slots[k], Newness::Reject)?;
        }
    }

    // --- 4d. make consistent -----------------------------------------------------
    for pick in [NewState::TotalNew, NewState::PartNew] {
        for run in &runs {
            let state = slots[run.winner].state;
            let hit = match pick {
                NewState::TotalNew => state == NewState::TotalNew,
                _ => state.refreshed(),
            };
            if let (true, Some(h)) = (hit, run.handle) {
                types
                    .get_mut(run.typ)?
                    .hooks()
                    .make_consistent(objects, h, state.newness());
            }
        }
    }

    let accepted: Vec<Accepted> = runs
        .iter()
        .filter_map(|r| {
            r.handle.map(|handle| Accepted {
                gid: r.gid,
                state: slots[r.winner].state,
                handle,
            })
        })
        .collect();

    // --- 5. old-coupling bootstrap of new copies ---------------------------------------
    for msg in msgs {
        for hint in &msg.old_cpl {
            if hint.proc == me {
                continue;
            }
            let Ok(i) = accepted.binary_search_by_key(&hint.gid, |a| a.gid) else {
                continue;
            };
            if accepted[i].state == NewState::TotalNew {
                objects
                    .try_get_mut(accepted[i].handle)?
                    .couplings_mut()
                    .upsert(hint.proc, hint.prio);
            }
        }
    }

    let new_cpl = compact_hints(objects, types, me, msgs)?;
    log::debug!(
        "rank {me}: unpacked {} entries ({} new, {} refreshed, {} pruned, {} rejected)",
        stats.objs_received,
        stats.total_new,
        stats.part_new,
        stats.pruned_new,
        stats.not_new
    );
    Ok(Unpacked { accepted, new_cpl })
}

fn scatter_entry(
    objects: &mut ObjectStore,
    types: &mut TypeRegistry,
    msgs: &[ObjMsg],
    tables: &[Vec<Option<ObjHandle>>],
    run: &Run,
    s: &Slot,
    newness: Newness,
) -> Result<(), DddError> {
    let e = entry(msgs, s);
    let Some(h) = run.handle else { return Ok(()) };
    if e.aux.is_empty() {
        return Ok(());
    }
    let blocks = localize_aux(objects, &tables[s.msg], &e.aux, run.gid);
    let obj = objects.try_get_mut(h)?;
    let hooks = types.get_mut(run.typ)?.hooks();
    for (typ, items) in blocks {
        hooks.scatter(obj, typ, items, newness);
    }
    Ok(())
}

/// Gather all new-coupling hints, drop those about this rank and fold
/// duplicates of one `(gid, proc)` through the type's merge.
fn compact_hints(
    objects: &ObjectStore,
    types: &TypeRegistry,
    me: usize,
    msgs: &[ObjMsg],
) -> Result<Vec<CplHint>, DddError> {
    let mut hints: Vec<CplHint> = msgs
        .iter()
        .flat_map(|m| m.new_cpl.iter().copied())
        .filter(|h| h.proc != me)
        .collect();
    hints.sort_by_key(|h| (h.gid, h.proc));
    let fallback = PrioMergeMode::default();
    let mut out: Vec<CplHint> = Vec::with_capacity(hints.len());
    for h in hints {
        match out.last_mut() {
            Some(last) if last.gid == h.gid && last.proc == h.proc => {
                let mode = match objects.find(h.gid) {
                    Some(o) => types.get(o.typ())?.merge(),
                    None => &fallback,
                };
                last.prio = mode.merge(last.prio, h.prio).0;
            }
            _ => out.push(h),
        }
    }
    Ok(out)
}
