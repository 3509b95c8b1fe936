//! Depth-first placement of the slice lists of one super cluster.
//!
//! Lists are taken in a fixed order. At each level every legal start of the
//! current list is tried against the container supply, the successful
//! placements are ranked best score first, and the search descends into
//! them in that order. The first child reaching a full allocation ends the
//! level: earlier siblings are never revisited.

use crate::{
    helpe::*,
    copack::{CoPackHint, HintScope},
};
use super::{
    AllocCtx,
    container::try_slices_to_container,
    group::{allocate_to_group, ContainerSupply},
};

#[derive(Clone, Debug, Default)]
pub struct DfsState {
    pub alignment:  ScAllocAlignment,
    pub allocated:  IndexSet<SliceListId>,
}

/// Receives each full allocation; returns whether to keep searching.
pub type SolutionCallback<'f> = dyn FnMut(&dyn AllocView, &ScAllocAlignment) -> bool + 'f;

pub struct DfsListAllocator<'c> {
    ctx:            &'c AllocCtx<'c>,
    sc:             &'c SuperCluster,
    supply:         ContainerSupply<'c>,
    order:          Vec<SliceListId>,
    max_steps:      usize,
    n_steps:        usize,
    caller_pruned:  bool,
    deepest:        Option<(usize, AllocError)>,
    pub metrics:    AllocatorMetrics,
}

impl<'c> DfsListAllocator<'c> {
    pub fn new(ctx: &'c AllocCtx<'c>, sc: &'c SuperCluster, supply: ContainerSupply<'c>) -> Self {
        let width = supply.size().bits();
        let none = ScAllocAlignment::new();
        let order = sc.lists()
            .map(|(l, _)| (l, sc.list_starts(ctx.phv, l, width, &none).len()))
            .sorted_by_key(|(l, n)| (*n != 1, std::cmp::Reverse(sc.list_width(*l)), *n, *l))
            .map(|(l, _)| l)
            .collect();

        Self {
            ctx,
            sc,
            supply,
            order,
            max_steps:      ctx.config.max_dfs_steps,
            n_steps:        0,
            caller_pruned:  false,
            deepest:        None,
            metrics:        AllocatorMetrics::default(),
        }
    }

    #[inline(always)]
    fn width(&self) -> Bits {
        self.supply.size().bits()
    }

    /// The error of the deepest failed level, ties going to the more
    /// specific one.
    pub fn into_deepest_error(self) -> Option<AllocError> {
        self.deepest.map(|(_, e)| e)
    }

    fn record(&mut self, depth: usize, e: AllocError) {
        let replace = match &self.deepest {
            None => true,
            Some((d, cur)) => depth > *d || (depth == *d && e.more_specific_than(cur)),
        };
        if replace {
            self.deepest = Some((depth, e));
        }
    }

    /// Runs the search from `root`. Returns whether at least one full
    /// allocation was reported.
    pub fn search(&mut self, root: &dyn AllocView, state: DfsState, cb: &mut SolutionCallback) -> bool {
        self.dfs(root, &state, 0, cb)
    }

    /// Starts of `lid`, cheapest in crossbar bytes first when table keys
    /// are involved.
    fn starts_of(&self, lid: SliceListId, alignment: &ScAllocAlignment) -> Vec<Bits> {
        let phv = self.ctx.phv;
        let mut starts = self.sc.list_starts(phv, lid, self.width(), alignment);
        if self.ctx.config.sort_for_xbar {
            let keys = self.sc.list_slices(lid)
                .iter()
                .any(|fs| phv.field(fs.field).table_key);
            if keys {
                starts.sort_by_cached_key(|s| {
                    self.sc.place_list(lid, *s)
                        .iter()
                        .filter(|(fs, _)| phv.field(fs.field).table_key)
                        .map(|(fs, p)| BitRange::from_lo_width(*p, fs.size()).bytes_spanned())
                        .sum::<usize>()
                });
            }
        }

        starts
    }

    /// Other unallocated lists that can only go one place.
    fn single_start_lists(&self, cur: SliceListId, state: &DfsState) -> Vec<Vec<(FieldSlice, Bits)>> {
        self.order.iter()
            .filter(|l| **l != cur && !state.allocated.contains(*l))
            .filter_map(|l| {
                let starts = self.sc.list_starts(self.ctx.phv, *l, self.width(), &state.alignment);
                (starts.len() == 1).then(|| self.sc.place_list(*l, starts[0]))
            })
            .collect()
    }

    fn dfs(
        &mut self,
        view:   &dyn AllocView,
        state:  &DfsState,
        depth:  usize,
        cb:     &mut SolutionCallback,
    ) -> bool {
        if self.caller_pruned {
            return false;
        }
        let Some(lid) = self.order.iter().copied().find(|l| !state.allocated.contains(l)) else {
            stat!(self.metrics, solutions);
            if !cb(view, &state.alignment) {
                self.caller_pruned = true;
            }
            return true;
        };
        stat!(self.metrics, dfs_steps);
        self.n_steps += 1;
        let phv = self.ctx.phv;
        let what = format!("list {}", self.sc.fmt_list(phv, lid));

        let starts = self.starts_of(lid, &state.alignment);
        if starts.is_empty() {
            self.record(depth, AllocError::new(
                ErrorCode::NoValidScAllocAlignment,
                format!("no legal start in {} bits", self.width()),
            ).context(&what));
            return false;
        }
        let speculative = self.single_start_lists(lid, state);

        let mut cands = vec![];
        for start in starts {
            let placed = self.sc.place_list(lid, start);
            let mut alignment = state.alignment.clone();
            if !alignment.record_list(self.sc, lid, start) {
                continue;
            }
            let scope = Some(HintScope { sc: self.sc, alignment: &alignment });
            match allocate_to_group(self.ctx, view, &placed, &self.supply, scope, &speculative, &mut self.metrics) {
                Ok(found) => cands.extend(found.into_iter().map(|(ok, score)| (ok, score, alignment.clone()))),
                Err(e) => self.record(depth, e.context(format!("{what} at bit {start}"))),
            }
        }
        // Stable: equal scores keep enumeration order.
        cands.sort_by(|a, b| {
            if a.1.better_than(b.1.as_ref()) {
                Ordering::Less
            } else if b.1.better_than(a.1.as_ref()) {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        });
        debug!("Depth {depth}: {what} has {} candidates", cands.len());

        for (i, (ok, _, alignment)) in cands.into_iter().enumerate() {
            if self.caller_pruned {
                break;
            }
            if i > 0 && self.n_steps >= self.max_steps {
                stat!(self.metrics, budget_exhausted);
                break;
            }
            let mut next = DfsState {
                alignment,
                allocated:  state.allocated.clone(),
            };
            next.allocated.insert(lid);
            let container = ok.container;
            let mut tx = ok.tx;
            if let Err(e) = self.apply_hints(&mut tx, &mut next, &ok.hints) {
                self.record(depth, e.context(format!("{what} in {container}")));
                stat!(self.metrics, backtracks);
                continue;
            }
            if self.dfs(&tx, &next, depth + 1, cb) {
                return true;
            }
            stat!(self.metrics, backtracks);
        }

        false
    }

    /// Applies required hints (all or fail) then optional ones (each on its
    /// own, best effort).
    fn apply_hints(
        &mut self,
        tx:     &mut Transaction,
        state:  &mut DfsState,
        hints:  &[CoPackHint],
    ) -> Result<(), AllocError> {
        for hint in hints.iter().filter(|h| h.required) {
            self.apply_hint(tx, state, hint)
                .map_err(|e| e.recode(ErrorCode::CannotApplyRequiredCopackHints))?;
            stat!(self.metrics, hints_applied);
        }
        for hint in hints.iter().filter(|h| !h.required) {
            let mut scratch_tx = tx.clone();
            let mut scratch_state = state.clone();
            match self.apply_hint(&mut scratch_tx, &mut scratch_state, hint) {
                Ok(()) => {
                    *tx = scratch_tx;
                    *state = scratch_state;
                    stat!(self.metrics, hints_applied);
                },
                Err(e) => {
                    debug!("Optional hint of {} dropped: {}", hint.action, e.message);
                    stat!(self.metrics, hints_dropped);
                },
            }
        }

        Ok(())
    }

    /// Places (or, without a target container, aligns) every list of this
    /// super cluster the hint names. Runs of the hint may be any part of a
    /// cluster slice. A required hint fails if its target is out of reach.
    fn apply_hint(
        &mut self,
        tx:     &mut Transaction,
        state:  &mut DfsState,
        hint:   &CoPackHint,
    ) -> Result<(), AllocError> {
        let phv = self.ctx.phv;
        let ctx_msg = format!("hint of action {} writing {}", hint.action, hint.dst);
        let fail = |part: &FieldSlice, at: Bits| AllocError::new(
            ErrorCode::ActionCannotBeSynthesized,
            format!("{} cannot start at bit {at}", phv.fmt_slice(part)),
        ).context(&ctx_msg);
        let mut lists: IndexMap<SliceListId, Bits> = IndexMap::new();
        for (run, start) in hint.unplaced(&*tx).collect_vec() {
            for (sid, part) in self.sc.slices_covering(&run) {
                let lid = self.sc.list_of(sid);
                if state.allocated.contains(&lid) {
                    continue;
                }
                let at = start + (part.range.lo - run.range.lo);
                let Some(list_start) = self.sc.list_start_for(sid, &part, at) else {
                    return Err(fail(&part, at));
                };
                if *lists.entry(lid).or_insert(list_start) != list_start {
                    return Err(fail(&part, at));
                }
            }
        }

        for (lid, start) in lists {
            if !self.sc.list_starts(phv, lid, self.width(), &state.alignment).contains(&start)
                || !state.alignment.record_list(self.sc, lid, start)
            {
                return Err(AllocError::new(
                    ErrorCode::NoValidScAllocAlignment,
                    format!("{} cannot start at bit {start}", self.sc.fmt_list(phv, lid)),
                ).context(&ctx_msg));
            }
            let Some(target) = hint.srcs[0].container else { continue; };
            if !self.supply.contains(&target) {
                if hint.required {
                    return Err(AllocError::new(
                        ErrorCode::NotEnoughSpace,
                        format!("{} must go to {target}, outside this group", self.sc.fmt_list(phv, lid)),
                    ).context(&ctx_msg));
                }
                continue;
            }
            let placed = self.sc.place_list(lid, start);
            let scope = Some(HintScope { sc: self.sc, alignment: &state.alignment });
            let ok = try_slices_to_container(self.ctx, &*tx, &placed, target, scope, &[], &mut self.metrics)
                .map_err(|e| e.context(&ctx_msg))?;
            let diff = ok.tx.into_diff();
            tx.commit(diff);
            state.allocated.insert(lid);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{algo::AllocEnv, copack::SrcPackVec};

    fn half(i: u32) -> Container {
        Container::new(ContainerKind::Normal, ContainerSize::H16, i)
    }

    /// `x` and `y`, one byte each, in separate lists over a two-halfword
    /// group.
    fn two_lists() -> (PhvInfo, PhvSpec, ContainerGroup, SuperCluster, FieldId) {
        let mut phv = PhvInfo::new();
        let x = phv.add_field(Field::new("x", 8, Gress::Ingress));
        let y = phv.add_field(Field::new("y", 8, Gress::Ingress));
        let mut dev = PhvSpec::new();
        dev.add_containers(ContainerKind::Normal, ContainerSize::H16, 2);
        let group = ContainerGroup::new(ContainerSize::H16, vec![half(0), half(1)]);
        let sc = SuperCluster::new(vec![vec![phv.field(x).whole()], vec![phv.field(y).whole()]], vec![], vec![]);

        (phv, dev, group, sc, x)
    }

    fn hint(target: Container, run: FieldSlice, at: Bits, required: bool) -> CoPackHint {
        CoPackHint {
            action:     "mv".to_string(),
            dst:        half(0),
            srcs:       vec![SrcPackVec { container: Some(target), shift: 0, starts: IndexMap::from([(run, at)]) }],
            required,
        }
    }

    #[test]
    fn hint_on_part_of_a_slice_moves_its_list() {
        let (phv, dev, group, sc, x) = two_lists();
        let env = AllocEnv::new(&dev, &NoActionConstraints);
        let ctx = env.ctx(&phv);
        let mut dfs = DfsListAllocator::new(&ctx, &sc, ContainerSupply::Group(&group));
        let alloc = Allocation::new();
        let mut tx = Transaction::new(&alloc);
        let mut state = DfsState::default();

        // x[2:5] at bit 6 puts the whole of x at bit 4.
        let h = hint(half(1), phv.field(x).slice(2, 5), 6, true);
        dfs.apply_hints(&mut tx, &mut state, &[h]).unwrap();
        let placed = tx.field_slices(x);
        assert_eq!(placed.len(), 1);
        assert_eq!((placed[0].container, placed[0].container_range.lo), (half(1), 4));
        assert_eq!(state.allocated.len(), 1);
        assert_eq!(dfs.metrics.hints_applied, 1);
    }

    #[test]
    fn required_hints_fail_loudly() {
        let (phv, dev, group, sc, x) = two_lists();
        let env = AllocEnv::new(&dev, &NoActionConstraints);
        let ctx = env.ctx(&phv);
        let mut dfs = DfsListAllocator::new(&ctx, &sc, ContainerSupply::Group(&group));
        let alloc = Allocation::new();

        let elsewhere = hint(half(5), phv.field(x).whole(), 0, true);
        let err = dfs.apply_hints(&mut Transaction::new(&alloc), &mut DfsState::default(), &[elsewhere])
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::CannotApplyRequiredCopackHints);
        assert!(err.message.contains("outside this group"));

        // x[2:5] at bit 1 would need x to start below bit 0.
        let misaligned = hint(half(1), phv.field(x).slice(2, 5), 1, true);
        let err = dfs.apply_hints(&mut Transaction::new(&alloc), &mut DfsState::default(), &[misaligned])
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::CannotApplyRequiredCopackHints);
    }

    #[test]
    fn optional_hints_are_dropped_quietly() {
        let (phv, dev, group, sc, x) = two_lists();
        let env = AllocEnv::new(&dev, &NoActionConstraints);
        let ctx = env.ctx(&phv);
        let mut dfs = DfsListAllocator::new(&ctx, &sc, ContainerSupply::Group(&group));
        let alloc = Allocation::new();
        let mut tx = Transaction::new(&alloc);
        let mut state = DfsState::default();

        let misaligned = hint(half(1), phv.field(x).slice(2, 5), 1, false);
        dfs.apply_hints(&mut tx, &mut state, &[misaligned]).unwrap();
        assert!(tx.field_slices(x).is_empty());
        assert!(state.allocated.is_empty());
        assert_eq!((dfs.metrics.hints_applied, dfs.metrics.hints_dropped), (0, 1));
    }

    #[test]
    fn search_reports_full_allocations() {
        let (phv, dev, group, sc, x) = two_lists();
        let env = AllocEnv::new(&dev, &NoActionConstraints);
        let ctx = env.ctx(&phv);
        let mut dfs = DfsListAllocator::new(&ctx, &sc, ContainerSupply::Group(&group));
        let alloc = Allocation::new();

        let mut seen = vec![];
        let mut cb = |view: &dyn AllocView, _: &ScAllocAlignment| {
            seen.push(view.field_slices(x));
            false
        };
        assert!(dfs.search(&alloc, DfsState::default(), &mut cb));
        assert_eq!(seen.len(), 1);
        assert_eq!(dfs.metrics.solutions, 1);
    }

    #[test]
    fn step_budget_stops_new_branches() {
        let mut phv = PhvInfo::new();
        let a = phv.add_field(Field::new("a", 4, Gress::Ingress));
        let b = phv.add_field(Field::new("b", 7, Gress::Ingress));
        let mut dev = PhvSpec::new();
        dev.add_containers(ContainerKind::Normal, ContainerSize::B8, 1);
        let group = ContainerGroup::new(ContainerSize::B8, vec![Container::new(ContainerKind::Normal, ContainerSize::B8, 0)]);
        let sc = SuperCluster::new(vec![vec![phv.field(a).whole()], vec![phv.field(b).whole()]], vec![], vec![]);
        let alloc = Allocation::new();
        let mut cb = |_: &dyn AllocView, _: &ScAllocAlignment| true;

        // b goes first and leaves one bit, whichever of its two starts wins.
        let mut env = AllocEnv::new(&dev, &NoActionConstraints);
        let ctx = env.ctx(&phv);
        let mut dfs = DfsListAllocator::new(&ctx, &sc, ContainerSupply::Group(&group));
        assert!(!dfs.search(&alloc, DfsState::default(), &mut cb));
        assert_eq!((dfs.metrics.budget_exhausted, dfs.metrics.backtracks), (0, 2));
        let err = dfs.into_deepest_error().unwrap();
        assert_eq!(err.code, ErrorCode::NotEnoughSpace);

        env.config.max_dfs_steps = 1;
        let ctx = env.ctx(&phv);
        let mut dfs = DfsListAllocator::new(&ctx, &sc, ContainerSupply::Group(&group));
        assert!(!dfs.search(&alloc, DfsState::default(), &mut cb));
        assert_eq!((dfs.metrics.budget_exhausted, dfs.metrics.backtracks), (1, 1));
    }
}
