mod util;

use ddd_xfer::prelude::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serial_test::serial;
use util::*;

const RANKS: usize = 4;
const OBJECTS: u64 = 8;
const EPOCHS: usize = 4;

/// Initial holders of each GID, identical on every rank.
fn layout(seed: u64) -> Vec<(Gid, Vec<usize>)> {
    let mut rng = SmallRng::seed_from_u64(seed);
    (1..=OBJECTS)
        .map(|g| {
            let mut holders: Vec<usize> = (0..RANKS).filter(|_| rng.gen_bool(0.5)).collect();
            if holders.is_empty() {
                holders.push(rng.gen_range(0..RANKS));
            }
            (Gid::new(g), holders)
        })
        .collect()
}

fn run(seed: u64, merge: PrioMergeMode) -> Vec<Vec<Vec<View>>> {
    let per_rank = run_world(RANKS, XferConfig::default(), move |ddd| {
        let me = ddd.me();
        let t = ddd.register_type(TypeDesc::new("cell", 2).merge_mode(merge.clone()));
        for (gid, holders) in layout(seed) {
            replica(ddd, t, gid, &holders, p(2), vec![me as u8, 0]);
        }
        let mut rng = SmallRng::seed_from_u64(seed ^ (me as u64 + 1) * 0x9E37);
        let mut history = Vec::with_capacity(EPOCHS);
        for _ in 0..EPOCHS {
            let handles: Vec<ObjHandle> = ddd
                .objects()
                .gids()
                .into_iter()
                .filter_map(|g| ddd.objects().by_gid(g))
                .collect();
            let mut epoch = ddd.xfer_begin();
            for h in handles {
                let prio = p(rng.gen_range(0..8));
                match rng.gen_range(0..10) {
                    0..=3 => epoch.copy_object(h, rng.gen_range(0..RANKS), prio).unwrap(),
                    4 => epoch.set_priority(h, prio).unwrap(),
                    5 => epoch.delete_object(h).unwrap(),
                    _ => {}
                }
            }
            epoch.end().unwrap();
            history.push(views(ddd));
        }
        history
    });
    // regroup by epoch
    (0..EPOCHS)
        .map(|e| per_rank.iter().map(|h| h[e].clone()).collect())
        .collect()
}

#[test]
#[serial]
fn couplings_stay_consistent_maximum() {
    for seed in [1, 7, 42] {
        for world in run(seed, PrioMergeMode::Maximum) {
            assert_couplings_consistent(&world);
        }
    }
}

#[test]
#[serial]
fn couplings_stay_consistent_minimum() {
    for world in run(3, PrioMergeMode::Minimum) {
        assert_couplings_consistent(&world);
    }
}
