#![allow(dead_code)]
use ddd_xfer::prelude::*;

pub fn p(v: u32) -> Priority {
    Priority::new(v).unwrap()
}

/// Plain view of one local copy, safe to hand across threads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct View {
    pub gid: Gid,
    pub prio: Priority,
    pub data: Vec<u8>,
    pub couplings: Vec<(usize, Priority)>,
}

/// All local copies of a rank, sorted by GID.
pub fn views<C: Communicator>(ddd: &Ddd<C>) -> Vec<View> {
    let mut v: Vec<View> = ddd
        .objects()
        .iter()
        .map(|(_, o)| View {
            gid: o.gid(),
            prio: o.prio(),
            data: o.data.clone(),
            couplings: o.couplings().iter().map(|c| (c.proc, c.prio)).collect(),
        })
        .collect();
    v.sort_by_key(|x| x.gid);
    v
}

pub fn find(views: &[View], gid: Gid) -> Option<&View> {
    views.iter().find(|v| v.gid == gid)
}

/// Run `f` once per rank of an `n`-rank in-process world, each rank on its
/// own thread. Results are returned by rank.
pub fn run_world<T, F>(n: usize, config: XferConfig, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(&mut Ddd<LocalComm>) -> T + Sync,
{
    std::thread::scope(|s| {
        let handles: Vec<_> = LocalComm::world(n)
            .into_iter()
            .map(|comm| {
                let f = &f;
                let config = config.clone();
                s.spawn(move || {
                    let mut ddd = Ddd::new(comm, config);
                    f(&mut ddd)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

/// Every coupling `(q, prio)` on rank `r` must be matched by rank `q`
/// holding the object at `prio`, and `q` must list `r` with `r`'s priority.
pub fn assert_couplings_consistent(world: &[Vec<View>]) {
    for (r, objs) in world.iter().enumerate() {
        for o in objs {
            for &(q, prio) in &o.couplings {
                let there = find(&world[q], o.gid)
                    .unwrap_or_else(|| {
                        panic!("rank {r} lists rank {q} for {}, which has no copy", o.gid)
                    });
                assert_eq!(there.prio, prio, "rank {r}: stale priority of rank {q} for {}", o.gid);
                assert!(
                    there.couplings.contains(&(r, o.prio)),
                    "rank {q} does not list rank {r} for {}: {:?}",
                    o.gid,
                    there.couplings
                );
            }
            let holders = world
                .iter()
                .enumerate()
                .filter(|(q, w)| *q != r && find(w, o.gid).is_some())
                .count();
            assert_eq!(holders, o.couplings.len(), "rank {r}: incomplete couplings for {}", o.gid);
        }
    }
}

/// Set up `gid` on this rank as a replica held by all of `holders` at `prio`.
pub fn replica<C: Communicator>(
    ddd: &mut Ddd<C>,
    typ: DddType,
    gid: Gid,
    holders: &[usize],
    prio: Priority,
    data: Vec<u8>,
) -> Option<ObjHandle> {
    let me = ddd.me();
    if !holders.contains(&me) {
        return None;
    }
    let h = ddd.adopt_object(gid, typ, prio, 0, data).unwrap();
    for &q in holders.iter().filter(|&&q| q != me) {
        ddd.add_coupling(h, q, prio).unwrap();
    }
    Some(h)
}
