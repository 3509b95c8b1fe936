mod common;

use common::*;
use phvcore::*;
use phvcore::algo::{
    allocate_all, AllocEnv,
    super_cluster::SuperClusterAllocator,
    trivial::TrivialAllocator,
};
use phvcore::copack::make_hints;

const SEEDS: [u64; 6] = [1, 7, 42, 1234, 99991, 31337];

#[test]
fn greedy_allocation_invariants() {
    for seed in SEEDS {
        let mut b = random_problem(seed, 12);
        let clusters = std::mem::take(&mut b.clusters);
        let device = PhvSpec::default();
        let env = AllocEnv::new(&device, &NoActionConstraints);

        let report = allocate_all(&mut b.phv, &env, clusters);
        assert_no_double_booking(&b.phv, &report.allocation);
        assert_solitary_alone(&b.phv, &report.allocation);
        assert_widths_conserved(&b.phv);
        assert_eq!(report.allocated.len() + report.errors.len(), 12);
    }
}

#[test]
fn placed_actions_stay_synthesizable() {
    for seed in SEEDS {
        let mut b = random_problem(seed, 12);
        let oracle = random_actions(seed, &b, 10);
        let clusters = std::mem::take(&mut b.clusters);
        let device = PhvSpec::default();
        let env = AllocEnv::new(&device, &oracle);

        let report = allocate_all(&mut b.phv, &env, clusters);
        assert_no_double_booking(&b.phv, &report.allocation);
        assert_widths_conserved(&b.phv);
        assert_eq!(report.allocated.len() + report.errors.len(), 12);
        // Whatever order sources and destinations were placed in, every
        // container still passes the oracle.
        for (c, _) in report.allocation.containers() {
            let sources = match oracle.can_pack(&b.phv, &report.allocation, c, ActionCheckMode::Strict) {
                Ok(s) => s,
                Err(e) => panic!("seed {seed}: {e}"),
            };
            if report.is_complete() {
                let mut m = AllocatorMetrics::default();
                let hints = make_hints(&b.phv, &report.allocation, &sources, ActionCheckMode::Strict, None, &mut m);
                assert!(hints.is_ok(), "seed {seed}: {:?}", hints.err());
            }
        }
    }
}

#[test]
fn trivial_allocation_invariants() {
    for seed in SEEDS {
        let mut b = random_problem(seed, 12);
        let clusters = std::mem::take(&mut b.clusters);
        let device = PhvSpec::default();
        let mut env = AllocEnv::new(&device, &NoActionConstraints);
        env.config = AllocConfig::trivial();

        let report = allocate_all(&mut b.phv, &env, clusters);
        assert_no_double_booking(&b.phv, &report.allocation);
        assert_solitary_alone(&b.phv, &report.allocation);
        assert_widths_conserved(&b.phv);
        // Normal containers of one width are handed out without gaps.
        for size in SIZE_ORDER {
            let mut used = report.allocation
                .containers()
                .map(|(c, _)| *c)
                .filter(|c| c.size == size)
                .map(|c| c.index)
                .collect::<Vec<_>>();
            used.sort();
            assert!(used.iter().enumerate().all(|(i, idx)| *idx == i as u32));
        }
    }
}

#[test]
fn trivially_allocatable_means_allocatable() {
    for seed in SEEDS {
        let b = random_problem(seed, 12);
        let device = PhvSpec::default();
        let trivial = TrivialAllocator::new(&NoActionConstraints, &AnyParserPacking);
        let mut env = AllocEnv::new(&device, &NoActionConstraints);
        env.config.max_dfs_steps = 1 << 16;
        let ctx = env.ctx(&b.phv);

        let verdicts = trivial.can_be_allocated_all(&b.phv, &b.clusters);
        for (sc, verdict) in b.clusters.iter().zip(verdicts) {
            let mut allocator = SuperClusterAllocator::new(&ctx);
            let full = allocator.allocate_sliced(&Allocation::new(), sc);
            if verdict.is_ok() {
                assert!(full.is_ok(), "seed {seed}, cluster {}: {:?}", sc.id, full.err());
            }
        }
    }
}

#[test]
fn discarded_transaction_leaves_parent_untouched() {
    let mut b = Builder::new();
    let fa = b.field("a", 4);
    let fc = b.field("c", 4);
    let device = normal_device(ContainerSize::B8, 2);
    let b0 = Container::new(ContainerKind::Normal, ContainerSize::B8, 0);
    let b1 = Container::new(ContainerKind::Normal, ContainerSize::B8, 1);

    let mut alloc = Allocation::new();
    let mut tx = Transaction::new(&alloc);
    tx.add_slice(AllocSlice::new(b.whole(fa), b0, 0), b.phv.field(fa), &device);
    let diff = tx.into_diff();
    alloc.commit(diff);
    let before = alloc.status(&b0).cloned();

    {
        let mut parent = Transaction::new(&alloc);
        let mut child = Transaction::new(&parent);
        child.add_slice(AllocSlice::new(b.whole(fc), b0, 4), b.phv.field(fc), &device);
        child.add_slice(AllocSlice::new(b.whole(fc), b1, 0), b.phv.field(fc), &device);
        assert_eq!(child.status(&b0).unwrap().slices.len(), 2);
        assert!(parent.status(&b1).is_none());
        drop(child);
        assert_eq!(parent.status(&b0).unwrap().slices.len(), 1);
        assert!(parent.field_slices(fc).is_empty());

        // A sibling sees nothing of the discarded child either.
        let mut sibling = Transaction::new(&parent);
        sibling.add_slice(AllocSlice::new(b.whole(fc), b1, 4), b.phv.field(fc), &device);
        let d = sibling.into_diff();
        parent.commit(d);
        assert_eq!(parent.field_slices(fc).len(), 1);
    }

    assert_eq!(alloc.status(&b0).cloned().map(|s| s.slices), before.map(|s| s.slices));
    assert!(alloc.field_slices(fc).is_empty());
}

#[test]
fn scoring_is_repeatable() {
    let mut b = random_problem(5, 1);
    let fresh = b.field("x", 8);
    let device = PhvSpec::default();
    let alloc = Allocation::new();
    let mut tx = Transaction::new(&alloc);
    let b0 = Container::new(ContainerKind::Normal, ContainerSize::B8, 0);
    tx.add_slice(AllocSlice::new(b.whole(fresh), b0, 0), b.phv.field(fresh), &device);

    for maker in [&DefaultScoreMaker as &dyn TxScoreMaker, &PackingScoreMaker] {
        let s1 = maker.make(&tx);
        let s2 = maker.make(&tx);
        assert!(!s1.better_than(s1.as_ref()));
        assert!(!s1.better_than(s2.as_ref()));
        assert!(!s2.better_than(s1.as_ref()));
        assert_eq!(s1.to_string(), s2.to_string());
    }

    let empty = Transaction::new(&alloc);
    let none = DefaultScoreMaker.make(&empty);
    let one = DefaultScoreMaker.make(&tx);
    assert!(none.better_than(one.as_ref()));
    assert!(!one.better_than(none.as_ref()));
}
