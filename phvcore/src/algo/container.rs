use crate::{
    helpe::*,
    checks::check_container,
    copack::{make_hints, CoPackHint, HintScope},
};
use super::AllocCtx;

/// A successful placement of one batch into one container.
#[derive(Clone)]
pub struct ContainerScopeOk<'a> {
    pub tx:         Transaction<'a>,
    pub container:  Container,
    /// The container held something before.
    pub packed:     bool,
    pub hints:      Vec<CoPackHint>,
}

/// Pseudo-places lists with a single legal start into speculative
/// containers, first fit, so the oracle can reason about sources that are
/// not committed yet.
fn speculate(
    ctx:    &AllocCtx,
    tx:     &mut Transaction,
    size:   ContainerSize,
    lists:  &[Vec<(FieldSlice, Bits)>],
) {
    let mut bins: Vec<Vec<BitRange>> = vec![];
    for list in lists {
        let ranges = list.iter()
            .map(|(fs, p)| BitRange::from_lo_width(*p, fs.size()))
            .collect_vec();
        if ranges.iter().any(|r| r.hi >= size.bits()) {
            continue;
        }
        let bin = bins.iter()
            .position(|b| !b.iter().any(|x| ranges.iter().any(|r| r.overlaps(x))))
            .unwrap_or_else(|| {
                bins.push(vec![]);
                bins.len() - 1
            });
        bins[bin].extend(ranges);
        let c = Container::speculative(size, bin as u32);
        for (fs, p) in list {
            tx.add_slice(AllocSlice::new(*fs, c, *p), ctx.phv.field(fs.field), ctx.device);
        }
    }
}

/// Tries to put every `(slice, start)` of `starts` into `c` on top of
/// `parent`.
///
/// Overlaps, static checks, parser packing and synthesizability are checked
/// in that order; the first failure is returned with `c` in its trace.
/// Synthesizability covers the actions writing `c` and those reading the
/// batch from wherever they write. For mocha and dark containers,
/// `speculative` lists are pseudo-placed before consulting the oracle.
pub fn try_slices_to_container<'a>(
    ctx:            &AllocCtx,
    parent:         &'a dyn AllocView,
    starts:         &[(FieldSlice, Bits)],
    c:              Container,
    scope:          Option<HintScope>,
    speculative:    &[Vec<(FieldSlice, Bits)>],
    metrics:        &mut AllocatorMetrics,
) -> Result<ContainerScopeOk<'a>, AllocError> {
    stat!(metrics, containers_tried);
    let here = |e: AllocError| e.context(format!("container {c}"));
    let phv = ctx.phv;

    if !ctx.device.contains(&c) {
        return Err(here(AllocError::new(ErrorCode::NotEnoughSpace, format!("{c} does not exist"))));
    }
    let overlay = ctx.config.physical_liverange_overlay;
    let mut batch: Vec<AllocSlice> = Vec::with_capacity(starts.len());
    for (fs, p) in starts {
        if p + fs.size() > c.width() {
            return Err(here(AllocError::new(
                ErrorCode::NotEnoughSpace,
                format!("{} at bit {p} overflows", phv.fmt_slice(fs)),
            )));
        }
        let mut a = AllocSlice::new(*fs, c, *p);
        if overlay {
            a.live = ctx.liveranges.and_then(|l| l.live_range(fs));
        }
        let resident = parent.status(&c).map(|s| s.slices.as_slice()).unwrap_or(&[]);
        for b in resident.iter().chain(batch.iter()) {
            if !b.container_range.overlaps(&a.container_range) {
                continue;
            }
            if phv.is_mutex(a.field(), b.field()) || (overlay && a.live_disjoint(b)) {
                continue;
            }
            return Err(here(AllocError::new(
                ErrorCode::NotEnoughSpace,
                format!("{} overlaps {}", phv.fmt_alloc(&a), phv.fmt_alloc(b)),
            )));
        }
        batch.push(a);
    }
    trace!("Trying {}", batch.iter().map(|a| phv.fmt_alloc(a)).join(", "));

    if let Some(e) = check_container(ctx, parent, &batch, &c) {
        return Err(here(e));
    }

    if batch.iter().any(|a| phv.field(a.field()).extracted) {
        let extracted = parent.status(&c)
            .map(|s| s.slices.as_slice())
            .unwrap_or(&[])
            .iter()
            .chain(batch.iter())
            .filter(|a| phv.field(a.field()).extracted)
            .map(|a| (a.slice, a.container_range.lo))
            .collect_vec();
        ctx.parser
            .validate(phv, &c, &extracted)
            .map_err(|e| here(e.recode(ErrorCode::ContainerParserPackingInvalid)))?;
    }

    let packed = !parent.is_empty_container(&c);
    let mut tx = Transaction::new(parent);
    for a in &batch {
        tx.add_slice(*a, phv.field(a.field()), ctx.device);
    }

    stat!(metrics, oracle_calls);
    let mode = ctx.config.action_mode;
    let reports = if c.kind.is_whole_container_set() && !speculative.is_empty() {
        let mut spec = Transaction::new(&tx);
        speculate(ctx, &mut spec, c.size, speculative);
        let mut reports = ctx.actions.can_pack(phv, &spec, &c, mode).map_err(here)?;
        // Speculative homes are not real: hints must not target them.
        for r in reports.iter_mut() {
            for op in r.operands.iter_mut() {
                if op.placed.is_some_and(|(pc, _)| pc.is_speculative()) {
                    op.placed = None;
                }
            }
        }
        reports
    } else {
        ctx.actions.can_pack(phv, &tx, &c, mode).map_err(here)?
    };
    let mut hints = make_hints(phv, &tx, &reports, mode, scope, metrics).map_err(here)?;

    // The batch may feed actions writing elsewhere: judge those again.
    let read = batch.iter().map(|a| a.slice).collect_vec();
    for dst in ctx.actions.written_from(&tx, &read) {
        if dst == c {
            continue;
        }
        stat!(metrics, oracle_calls);
        let reader = |e: AllocError| here(e.context(format!("read by {dst}")));
        let reports = ctx.actions.can_pack(phv, &tx, &dst, mode).map_err(reader)?;
        hints.extend(make_hints(phv, &tx, &reports, mode, scope, metrics).map_err(reader)?);
    }

    Ok(ContainerScopeOk {
        tx,
        container: c,
        packed,
        hints,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        actions::{Action, MoveActionConstraints, Operand},
        algo::AllocEnv,
    };

    fn device() -> PhvSpec {
        let mut dev = PhvSpec::new();
        dev.add_containers(ContainerKind::Normal, ContainerSize::B8, 1);
        dev.add_containers(ContainerKind::Mocha, ContainerSize::B8, 1);
        dev
    }

    #[test]
    fn pinned_sources_count_against_mocha_limits() {
        let mut phv = PhvInfo::new();
        let d = phv.add_field(Field::new("d", 8, Gress::Ingress));
        let s0 = phv.add_field(Field::new("s0", 4, Gress::Ingress));
        let s1 = phv.add_field(Field::new("s1", 4, Gress::Ingress));
        phv.field_mut(d).mocha_candidate = true;
        let oracle = MoveActionConstraints::new(vec![
            Action::new("set")
                .with_move(phv.field(d).slice(0, 3), Operand::Field(phv.field(s0).whole()))
                .with_move(phv.field(d).slice(4, 7), Operand::Field(phv.field(s1).whole())),
        ]);
        let dev = device();
        let env = AllocEnv::new(&dev, &oracle);
        let ctx = env.ctx(&phv);
        let alloc = Allocation::new();
        let m0 = Container::new(ContainerKind::Mocha, ContainerSize::B8, 0);
        let starts = [(phv.field(d).whole(), 0)];
        let pin = |f: FieldId| vec![(phv.field(f).whole(), 0)];
        let mut m = AllocatorMetrics::default();

        // Nothing placed yet: the oracle has nothing to object to.
        assert!(try_slices_to_container(&ctx, &alloc, &starts, m0, None, &[], &mut m).is_ok());

        // Both sources can only start at bit 0, so they need two containers.
        let err = try_slices_to_container(&ctx, &alloc, &starts, m0, None, &[pin(s0), pin(s1)], &mut m)
            .err()
            .unwrap();
        assert_eq!(err.code, ErrorCode::ActionCannotBeSynthesized);

        // Pseudo-placements never become hint targets.
        let ok = try_slices_to_container(&ctx, &alloc, &starts, m0, None, &[pin(s0)], &mut m).ok().unwrap();
        assert_eq!(ok.hints.len(), 1);
        assert_eq!(ok.hints[0].srcs[0].container, None);
        assert!(ok.tx.field_slices(s0).is_empty());
    }

    #[test]
    fn disjoint_liveranges_share_bits_when_overlaid() {
        let mut phv = PhvInfo::new();
        let a = phv.add_field(Field::new("a", 8, Gress::Ingress));
        let c = phv.add_field(Field::new("c", 8, Gress::Ingress));
        let late = phv.add_field(Field::new("late", 8, Gress::Ingress));
        let mut live = StageLiveness::new();
        live.insert(a, 0, 2);
        live.insert(c, 3, 5);
        live.insert(late, 2, 5);
        let dev = device();
        let b0 = Container::new(ContainerKind::Normal, ContainerSize::B8, 0);
        let mut env = AllocEnv::new(&dev, &NoActionConstraints);
        env.liveranges = Some(&live);
        env.config.physical_liverange_overlay = true;
        let mut m = AllocatorMetrics::default();

        let mut alloc = Allocation::new();
        let ok = try_slices_to_container(&env.ctx(&phv), &alloc, &[(phv.field(a).whole(), 0)], b0, None, &[], &mut m)
            .ok()
            .unwrap();
        assert_eq!(ok.tx.field_slices(a)[0].live, Some(LiveRange { start: 0, end: 2 }));
        let diff = ok.tx.into_diff();
        alloc.commit(diff);

        let try_in = |env: &AllocEnv, f: FieldId, m: &mut AllocatorMetrics| {
            try_slices_to_container(&env.ctx(&phv), &alloc, &[(phv.field(f).whole(), 0)], b0, None, &[], m)
                .map(|_| ())
        };
        assert!(try_in(&env, c, &mut m).is_ok());
        assert_eq!(try_in(&env, late, &mut m).unwrap_err().code, ErrorCode::NotEnoughSpace);

        env.config.physical_liverange_overlay = false;
        assert_eq!(try_in(&env, c, &mut m).unwrap_err().code, ErrorCode::NotEnoughSpace);
    }
}
