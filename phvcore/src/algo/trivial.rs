//! The trivial allocator.
//!
//! It runs the same search as the real one, but against an endless device:
//! every width has one contiguous index space of normal containers, handed
//! out in order. Kind screening is off and packing is maximized, so a
//! failure here means the cluster cannot be placed on *any* device.

use crate::helpe::*;
use super::{
    AllocCtx,
    super_cluster::{ScAllocResult, SuperClusterAllocator},
};

/// Next never-used container index, per width.
#[derive(Clone, Debug, Default)]
pub struct PhvStatus {
    next: IndexMap<ContainerSize, u32>,
}

impl PhvStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the next container of `size` to hand out.
    #[inline(always)]
    pub fn next_index(&self, size: ContainerSize) -> u32 {
        self.next.get(&size).copied().unwrap_or(0)
    }

    /// Accounts for containers opened by a committed placement.
    pub fn observe(&mut self, diff: &TxDiff) {
        for (c, _) in diff.containers() {
            let idx = self.next.entry(c.size).or_insert(0);
            *idx = (*idx).max(c.index + 1);
        }
    }
}

pub struct TrivialAllocator<'a> {
    device:         PhvSpec,
    actions:        &'a dyn ActionConstraints,
    parser:         &'a dyn ParserPackingValidator,
    pub config:     AllocConfig,
    status:         PhvStatus,
    alloc:          Allocation,
    pub metrics:    AllocatorMetrics,
}

impl<'a> TrivialAllocator<'a> {
    pub fn new(actions: &'a dyn ActionConstraints, parser: &'a dyn ParserPackingValidator) -> Self {
        Self {
            device:     PhvSpec::unbounded(),
            actions,
            parser,
            config:     AllocConfig::trivial(),
            status:     PhvStatus::new(),
            alloc:      Allocation::new(),
            metrics:    AllocatorMetrics::default(),
        }
    }

    fn ctx<'b>(&'b self, phv: &'b PhvInfo, config: &'b AllocConfig) -> AllocCtx<'b> {
        AllocCtx {
            phv,
            device:     &self.device,
            actions:    self.actions,
            parser:     self.parser,
            liveranges: None,
            score:      &PackingScoreMaker,
            config,
        }
    }

    /// One full search of `sc` on top of `alloc`.
    fn place(
        &self,
        phv:    &PhvInfo,
        sc:     &SuperCluster,
        alloc:  &Allocation,
        status: &PhvStatus,
        config: &AllocConfig,
    ) -> (Result<(ScAllocResult, SuperCluster), AllocError>, AllocatorMetrics) {
        let ctx = self.ctx(phv, config);
        let mut allocator = SuperClusterAllocator::unbounded(&ctx, status.clone());
        let res = allocator.allocate_sliced(alloc, sc);

        (res, allocator.metrics)
    }

    /// Whether `sc` fits on an empty endless device. Nothing is written.
    pub fn can_be_allocated(&self, phv: &PhvInfo, sc: &SuperCluster) -> Result<(), AllocError> {
        self.place(phv, sc, &Allocation::new(), &PhvStatus::new(), &self.config).0.map(|_| ())
    }

    /// [`Self::can_be_allocated`] for a batch, one cluster per task.
    pub fn can_be_allocated_all(&self, phv: &PhvInfo, clusters: &[SuperCluster]) -> Vec<Result<(), AllocError>> {
        clusters.par_iter()
            .map(|sc| self.can_be_allocated(phv, sc))
            .collect()
    }

    /// Places `sc` next to everything placed so far and writes the facts
    /// into the registry.
    pub fn allocate(&mut self, phv: &mut PhvInfo, sc: &SuperCluster) -> Result<(), AllocError> {
        let (res, metrics) = self.place(phv, sc, &self.alloc, &self.status, &self.config);
        self.metrics.merge(&metrics);
        let (res, _) = res?;
        debug!("Super cluster {} trivially placed: {}", sc.id, res.score);
        self.status.observe(&res.diff);
        for a in res.diff.new_slices() {
            phv.add_alloc(*a);
        }
        self.alloc.commit(res.diff);

        Ok(())
    }

    /// Picks the first slicing of `sc` that is trivially allocatable, splits
    /// it into independent parts and places each of them.
    pub fn slice_and_allocate(&mut self, phv: &mut PhvInfo, sc: &SuperCluster) -> Result<Vec<SuperCluster>, AllocError> {
        let mut err: Option<AllocError> = None;
        let mut chosen = None;
        for variant in sc.slicings(self.config.max_slicings) {
            match self.can_be_allocated(phv, &variant) {
                Ok(()) => {
                    chosen = Some(variant);
                    break;
                },
                Err(e) => err = prefer_error(err, e),
            }
        }
        let Some(chosen) = chosen else {
            return Err(err.unwrap_or_else(|| AllocError::new(
                ErrorCode::NoSlicingFound,
                format!("super cluster {}: no slicing to try", sc.id),
            )));
        };

        let parts = chosen.components();
        for part in &parts {
            self.allocate(phv, part)?;
        }

        Ok(parts)
    }

    pub fn allocation(&self) -> &Allocation {
        &self.alloc
    }

    pub fn into_allocation(self) -> Allocation {
        self.alloc
    }

    /// Turns a failure of `sc` into something a human can act on.
    ///
    /// When the cluster does not fit even with action constraints ignored,
    /// `err` is returned with a note saying so. Otherwise lists are added one
    /// at a time until the search breaks, and the list that broke it is
    /// reported along with a suggestion to re-slice it. A cluster that only
    /// breaks next to others keeps `err` as is.
    pub fn diagnose(&self, phv: &PhvInfo, sc: &SuperCluster, err: AllocError) -> AllocError {
        let here = format!("super cluster {}", sc.id);
        let loose = self.config.with_mode(ActionCheckMode::Loose);
        let empty = Allocation::new();
        let fresh = PhvStatus::new();
        if self.place(phv, sc, &empty, &fresh, &loose).0.is_err() {
            return err.context("fails even without action constraints");
        }

        let order = sc.lists().map(|(l, _)| l).collect_vec();
        for k in 1..=order.len() {
            let prefix = sc.restrict(&order[..k]);
            let Err(e) = self.place(phv, &prefix, &empty, &fresh, &self.config).0 else {
                continue;
            };
            let offender = order[k - 1];
            let others = order[..k - 1].iter().map(|l| sc.fmt_list(phv, *l)).join(", ");
            let mut msg = format!("{here}: list {} cannot be synthesized", sc.fmt_list(phv, offender));
            if !others.is_empty() {
                msg.push_str(&format!(" together with {others}"));
            }
            msg.push_str(&format!("\n  because: {e}\n  originally: {err}"));
            let reslice = sc.list_slices(offender).into_iter().map(|fs| vec![fs]).collect();
            warn!("{here} is only placeable without action constraints");

            return AllocError::new(ErrorCode::InvalidAllocation, msg).with_reslice(reslice);
        }

        err
    }
}
