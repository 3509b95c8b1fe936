pub mod container;
pub mod dfs;
pub mod group;
pub mod super_cluster;
pub mod trivial;

use crate::helpe::*;
use self::{
    super_cluster::SuperClusterAllocator,
    trivial::TrivialAllocator,
};

/// Everything a search consults. Cheap to build, one per super cluster.
#[derive(Clone, Copy)]
pub struct AllocCtx<'a> {
    pub phv:        &'a PhvInfo,
    pub device:     &'a PhvSpec,
    pub actions:    &'a dyn ActionConstraints,
    pub parser:     &'a dyn ParserPackingValidator,
    pub liveranges: Option<&'a dyn LiverangeOracle>,
    pub score:      &'a dyn TxScoreMaker,
    pub config:     &'a AllocConfig,
}

/// The collaborators of a whole run, minus the field registry, which the
/// run writes into.
pub struct AllocEnv<'a> {
    pub device:     &'a PhvSpec,
    pub actions:    &'a dyn ActionConstraints,
    pub parser:     &'a dyn ParserPackingValidator,
    pub liveranges: Option<&'a dyn LiverangeOracle>,
    pub config:     AllocConfig,
}

impl<'a> AllocEnv<'a> {
    pub fn new(device: &'a PhvSpec, actions: &'a dyn ActionConstraints) -> Self {
        Self {
            device,
            actions,
            parser:     &AnyParserPacking,
            liveranges: None,
            config:     AllocConfig::default(),
        }
    }

    pub fn ctx<'b>(&'b self, phv: &'b PhvInfo) -> AllocCtx<'b> {
        AllocCtx {
            phv,
            device:     self.device,
            actions:    self.actions,
            parser:     self.parser,
            liveranges: self.liveranges,
            score:      &DefaultScoreMaker,
            config:     &self.config,
        }
    }
}

/// Outcome of [`allocate_all`].
#[derive(Debug, Default)]
pub struct AllocationReport {
    pub allocation: Allocation,
    /// Ids of the super clusters that were placed.
    pub allocated:  Vec<u32>,
    pub errors:     Vec<(u32, AllocError)>,
    pub metrics:    AllocatorMetrics,
}

impl AllocationReport {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Super clusters with pinned starts or forced sizes go first, then wider
/// ones.
fn constrainedness(phv: &PhvInfo, sc: &SuperCluster) -> (std::cmp::Reverse<usize>, std::cmp::Reverse<Bits>) {
    let pinned = sc.fields()
        .into_iter()
        .filter(|f| {
            let f = phv.field(*f);
            f.exact_containers || f.required_size.is_some() || f.alignment.is_some() || f.solitary
        })
        .count();

    (std::cmp::Reverse(pinned + sc.wide_arith().len() + sc.strides().len()), std::cmp::Reverse(sc.total_width()))
}

/// Allocates every super cluster, writing the committed placements into
/// `phv`. Clusters the trivial allocator already rejects are diagnosed and
/// skipped; clusters the full search cannot place are diagnosed after the
/// fact.
pub fn allocate_all(
    phv:        &mut PhvInfo,
    env:        &AllocEnv,
    clusters:   Vec<SuperCluster>,
) -> AllocationReport {
    let total_start = Instant::now();
    let mut report = AllocationReport::default();
    let mut trivial = TrivialAllocator::new(env.actions, env.parser);
    trivial.config.max_slicings = env.config.max_slicings;

    if env.config.is_trivial() {
        for sc in clusters {
            match trivial.allocate(phv, &sc) {
                Ok(()) => report.allocated.push(sc.id),
                Err(e) => {
                    warn!("Super cluster {} is not trivially allocatable", sc.id);
                    let e = trivial.diagnose(phv, &sc, e);
                    report.errors.push((sc.id, e));
                },
            }
        }
        report.metrics = trivial.metrics;
        report.metrics.clusters_allocated = report.allocated.len();
        report.metrics.clusters_failed = report.errors.len();
        report.allocation = trivial.into_allocation();
        info!("Trivial allocation done in {} μs", total_start.elapsed().as_micros());

        return report;
    }

    let verdicts = trivial.can_be_allocated_all(phv, &clusters);
    let mut todo = vec![];
    for (sc, verdict) in clusters.into_iter().zip(verdicts) {
        match verdict {
            Ok(()) => todo.push(sc),
            Err(e) => {
                let e = trivial.diagnose(phv, &sc, e);
                warn!("Super cluster {} failed the feasibility check", sc.id);
                report.errors.push((sc.id, e));
            },
        }
    }
    todo.sort_by_cached_key(|sc| constrainedness(phv, sc));

    for sc in todo {
        let ctx = env.ctx(phv);
        let mut allocator = SuperClusterAllocator::new(&ctx);
        let outcome = allocator.allocate_sliced(&report.allocation, &sc);
        report.metrics.merge(&allocator.metrics);
        match outcome {
            Ok((res, _)) => {
                let facts: Vec<AllocSlice> = res.diff.new_slices().copied().collect();
                info!(
                    "Super cluster {} placed in {}-bit containers ({})",
                    sc.id, res.width.bits(), res.score
                );
                report.allocation.commit(res.diff);
                for a in facts {
                    phv.add_alloc(a);
                }
                report.allocated.push(sc.id);
            },
            Err(e) => {
                warn!("Super cluster {} could not be placed: {}", sc.id, e.code);
                let e = trivial.diagnose(phv, &sc, e);
                report.errors.push((sc.id, e));
            },
        }
    }
    report.metrics.clusters_allocated = report.allocated.len();
    report.metrics.clusters_failed = report.errors.len();
    info!(
        "Placed {} super clusters, {} failed, in {} μs",
        report.allocated.len(),
        report.errors.len(),
        total_start.elapsed().as_micros()
    );

    report
}
