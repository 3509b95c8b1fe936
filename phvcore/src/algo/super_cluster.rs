use crate::{
    helpe::*,
    copack::HintScope,
};
use super::{
    AllocCtx,
    container::try_slices_to_container,
    dfs::{DfsListAllocator, DfsState},
    group::ContainerSupply,
    trivial::PhvStatus,
};

/// The best placement found for one super cluster, detached from any
/// borrow so it can be committed.
pub struct ScAllocResult {
    pub diff:       TxDiff,
    pub width:      ContainerSize,
    pub alignment:  ScAllocAlignment,
    pub score:      Box<dyn TxScore>,
}

impl fmt::Debug for ScAllocResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScAllocResult")
            .field("width", &self.width)
            .field("score", &self.score.to_string())
            .finish()
    }
}

pub struct SuperClusterAllocator<'c> {
    ctx:            &'c AllocCtx<'c>,
    /// Set for the trivial allocator: containers are minted from here on.
    unbounded_from: Option<PhvStatus>,
    pub metrics:    AllocatorMetrics,
}

impl<'c> SuperClusterAllocator<'c> {
    pub fn new(ctx: &'c AllocCtx<'c>) -> Self {
        Self {
            ctx,
            unbounded_from: None,
            metrics:        AllocatorMetrics::default(),
        }
    }

    /// Draws containers from an endless supply instead of device groups.
    pub fn unbounded(ctx: &'c AllocCtx<'c>, next: PhvStatus) -> Self {
        Self {
            ctx,
            unbounded_from: Some(next),
            metrics:        AllocatorMetrics::default(),
        }
    }

    /// Widths every field and every list of `sc` can live with.
    pub fn legal_widths(&self, sc: &SuperCluster) -> Vec<ContainerSize> {
        let phv = self.ctx.phv;
        let fields = sc.fields();
        self.ctx.device.sizes()
            .into_iter()
            .filter(|size| {
                fields.iter().all(|f| phv.field(*f).required_size.map_or(true, |r| r == *size))
            })
            .filter(|size| {
                sc.lists().all(|(l, _)| {
                    let w = sc.list_width(l);
                    let exact = sc.list_slices(l).iter().any(|fs| phv.field(fs.field).exact_containers);
                    w <= size.bits() && (!exact || w == size.bits())
                })
            })
            .collect()
    }

    fn supplies<'g>(&self, size: ContainerSize, groups: &'g ContainerGroupsBySize) -> Vec<ContainerSupply<'g>> {
        match &self.unbounded_from {
            Some(status) => vec![ContainerSupply::Unbounded {
                size,
                next: status.next_index(size),
            }],
            None => groups.get(&size)
                .map(|gs| gs.iter().map(ContainerSupply::Group).collect())
                .unwrap_or_default(),
        }
    }

    /// Pins each wide-arith pair to an even/odd normal pair, first fit.
    fn place_wide<'t>(
        &mut self,
        tx:     &mut Transaction<'t>,
        state:  &mut DfsState,
        sc:     &SuperCluster,
        supply: &ContainerSupply,
    ) -> Result<(), AllocError> {
        let phv = self.ctx.phv;
        let width = supply.size().bits();
        for (lo, hi) in sc.wide_arith() {
            let what = format!("wide pair {} / {}", sc.fmt_list(phv, *lo), sc.fmt_list(phv, *hi));
            let mut err: Option<AllocError> = None;
            let mut done = false;
            'pairs: for (c_lo, c_hi) in supply.pairs(&*tx) {
                for start in sc.list_starts(phv, *lo, width, &state.alignment) {
                    let mut alignment = state.alignment.clone();
                    if !alignment.record_list(sc, *lo, start) || !alignment.record_list(sc, *hi, start) {
                        continue;
                    }
                    let scope = Some(HintScope { sc, alignment: &alignment });
                    let lo_ok = match try_slices_to_container(
                        self.ctx, &*tx, &sc.place_list(*lo, start), c_lo, scope, &[], &mut self.metrics,
                    ) {
                        Ok(ok) => ok,
                        Err(e) => { err = prefer_error(err, e); continue; },
                    };
                    let hi_ok = match try_slices_to_container(
                        self.ctx, &lo_ok.tx, &sc.place_list(*hi, start), c_hi, scope, &[], &mut self.metrics,
                    ) {
                        Ok(ok) => ok,
                        Err(e) => { err = prefer_error(err, e); continue; },
                    };
                    let hi_diff = hi_ok.tx.into_diff();
                    let mut lo_diff = lo_ok.tx.into_diff();
                    lo_diff.merge(hi_diff);
                    tx.commit(lo_diff);
                    state.alignment = alignment;
                    state.allocated.insert(*lo);
                    state.allocated.insert(*hi);
                    done = true;
                    break 'pairs;
                }
            }
            if !done {
                let inner = err.map_or_else(|| "no even/odd pair left".to_string(), |e| e.to_string());
                return Err(AllocError::new(ErrorCode::WideArithAllocFailed, inner).context(what));
            }
        }

        Ok(())
    }

    /// Places each stride group from a leader container, falling back to the
    /// next leader when any replica fails.
    fn place_strides<'t>(
        &mut self,
        tx:     &mut Transaction<'t>,
        state:  &mut DfsState,
        sc:     &SuperCluster,
        supply: &ContainerSupply,
    ) -> Result<(), AllocError> {
        let phv = self.ctx.phv;
        let width = supply.size().bits();
        for stride in sc.strides() {
            let leader_list = stride.lists[0];
            let what = format!("stride of {} lists led by {}", stride.lists.len(), sc.fmt_list(phv, leader_list));
            let mut err: Option<AllocError> = None;
            let mut done = false;
            'leaders: for leader in supply.candidates(&*tx) {
                for start in sc.list_starts(phv, leader_list, width, &state.alignment) {
                    let mut alignment = state.alignment.clone();
                    if !stride.lists.iter().all(|l| alignment.record_list(sc, *l, start)) {
                        continue;
                    }
                    let mut diff = TxDiff::default();
                    let mut failed = false;
                    for (i, l) in stride.lists.iter().enumerate() {
                        let c = leader.offset_by(i as u32 * stride.step);
                        if !supply.contains(&c) {
                            failed = true;
                            break;
                        }
                        let base = Transaction::from_diff(&*tx, diff.clone());
                        let scope = Some(HintScope { sc, alignment: &alignment });
                        match try_slices_to_container(
                            self.ctx, &base, &sc.place_list(*l, start), c, scope, &[], &mut self.metrics,
                        ) {
                            Ok(ok) => {
                                let d = ok.tx.into_diff();
                                diff.merge(d);
                            },
                            Err(e) => {
                                err = prefer_error(err, e);
                                failed = true;
                                break;
                            },
                        }
                    }
                    if failed {
                        continue;
                    }
                    tx.commit(diff);
                    state.alignment = alignment;
                    state.allocated.extend(stride.lists.iter().copied());
                    done = true;
                    break 'leaders;
                }
            }
            if !done {
                return Err(err
                    .unwrap_or_else(|| AllocError::new(ErrorCode::NotEnoughSpace, "no leader fits"))
                    .context(what));
            }
        }

        Ok(())
    }

    /// One width, one supply: special lists first, then the DFS.
    fn allocate_in(
        &mut self,
        alloc:  &Allocation,
        sc:     &SuperCluster,
        supply: ContainerSupply,
        best:   &mut Option<ScAllocResult>,
    ) -> Result<(), AllocError> {
        let size = supply.size();
        let mut tx = Transaction::new(alloc);
        let mut state = DfsState::default();
        self.place_wide(&mut tx, &mut state, sc, &supply)?;
        self.place_strides(&mut tx, &mut state, sc, &supply)?;

        let ctx = self.ctx;
        let mut dfs = DfsListAllocator::new(ctx, sc, supply);
        let mut on_solution = |view: &dyn AllocView, alignment: &ScAllocAlignment| {
            let diff = view.accumulated();
            let score = ctx.score.make(&Transaction::from_diff(alloc, diff.clone()));
            debug!("Super cluster {} solved in {}-bit containers: {score}", sc.id, size.bits());
            if improves(score.as_ref(), best.as_ref().map(|b| b.score.as_ref())) {
                *best = Some(ScAllocResult {
                    diff,
                    width:      size,
                    alignment:  alignment.clone(),
                    score,
                });
            }
            true
        };
        let found = dfs.search(&tx, state, &mut on_solution);
        self.metrics.merge(&dfs.metrics);
        if found {
            Ok(())
        } else {
            Err(dfs.into_deepest_error()
                .unwrap_or_else(|| AllocError::new(ErrorCode::NotEnoughSpace, "search exhausted")))
        }
    }

    fn tally<T>(&mut self, res: &Result<T, AllocError>) {
        if res.is_ok() {
            stat!(self.metrics, clusters_allocated);
        } else {
            stat!(self.metrics, clusters_failed);
        }
    }

    /// Best placement of `sc` over every legal width and container group.
    pub fn allocate(&mut self, alloc: &Allocation, sc: &SuperCluster) -> Result<ScAllocResult, AllocError> {
        let res = self.search(alloc, sc).map_err(|e| e.context(format!("super cluster {}", sc.id)));
        self.tally(&res);

        res
    }

    fn search(&mut self, alloc: &Allocation, sc: &SuperCluster) -> Result<ScAllocResult, AllocError> {
        let widths = self.legal_widths(sc);
        if widths.is_empty() {
            let widest = sc.lists().map(|(l, _)| sc.list_width(l)).max().unwrap_or(0);
            return Err(AllocError::new(
                ErrorCode::NoValidContainerSize,
                format!("no container width fits (widest list has {widest} bits)"),
            ));
        }
        let groups = self.ctx.device.groups_by_size();
        let mut best: Option<ScAllocResult> = None;
        let mut err: Option<AllocError> = None;
        'widths: for size in widths {
            for (gi, supply) in self.supplies(size, &groups).into_iter().enumerate() {
                let layout = format!("{}-bit group {gi}", size.bits());
                if let Err(e) = self.allocate_in(alloc, sc, supply, &mut best) {
                    trace!("Super cluster {} failed in {layout}: {}", sc.id, e.code);
                    err = prefer_error(err, e.context(layout));
                }
                if best.is_some() && self.ctx.config.first_solution_only {
                    break 'widths;
                }
            }
        }

        best.ok_or_else(|| err.unwrap_or_else(|| AllocError::new(ErrorCode::NotEnoughSpace, "no container group")))
    }

    /// Tries the cluster and its re-sliced variants, keeping the best.
    /// Returns the variant that was placed along with the placement.
    ///
    /// When every variant fails, oracle failures are forwarded as they are;
    /// anything else becomes `NoSlicingFound`, attachments kept.
    pub fn allocate_sliced(
        &mut self,
        alloc:  &Allocation,
        sc:     &SuperCluster,
    ) -> Result<(ScAllocResult, SuperCluster), AllocError> {
        let mut best: Option<(ScAllocResult, SuperCluster)> = None;
        let mut err: Option<AllocError> = None;
        for (i, variant) in sc.slicings(self.ctx.config.max_slicings).into_iter().enumerate() {
            match self.search(alloc, &variant) {
                Ok(res) => {
                    if improves(res.score.as_ref(), best.as_ref().map(|(b, _)| b.score.as_ref())) {
                        best = Some((res, variant));
                    }
                    if self.ctx.config.first_solution_only {
                        break;
                    }
                },
                Err(e) => err = prefer_error(err, e.context(format!("slicing {i}"))),
            }
        }

        let res = best.ok_or_else(|| {
            let e = err.unwrap_or_else(|| AllocError::new(ErrorCode::NoSlicingFound, "no slicing to try"));
            let e = match e.code {
                ErrorCode::ActionCannotBeSynthesized | ErrorCode::CannotApplyRequiredCopackHints => e,
                _ => e.recode(ErrorCode::NoSlicingFound),
            };
            e.context(format!("super cluster {}", sc.id))
        });
        self.tally(&res);

        res
    }
}
