use crate::{
    helpe::*,
    copack::HintScope,
};
use super::{
    AllocCtx,
    container::{try_slices_to_container, ContainerScopeOk},
};

/// Where containers of one width come from.
#[derive(Clone, Debug)]
pub enum ContainerSupply<'c> {
    /// A device MAU group.
    Group(&'c ContainerGroup),
    /// The trivial allocator's endless normal containers: whatever is open,
    /// plus the next never-used index (never below `next`).
    Unbounded { size: ContainerSize, next: u32 },
}

impl ContainerSupply<'_> {
    pub fn size(&self) -> ContainerSize {
        match self {
            ContainerSupply::Group(g)               => g.size,
            ContainerSupply::Unbounded { size, .. } => *size,
        }
    }

    fn fresh_index(view: &dyn AllocView, size: ContainerSize, next: u32) -> u32 {
        view.occupied()
            .iter()
            .filter(|c| c.size == size && !c.is_speculative())
            .map(|c| c.index + 1)
            .max()
            .unwrap_or(0)
            .max(next)
    }

    /// Candidate containers in visiting order.
    pub fn candidates(&self, view: &dyn AllocView) -> Vec<Container> {
        match self {
            ContainerSupply::Group(g) => g.containers().to_vec(),
            ContainerSupply::Unbounded { size, next } => {
                let fresh = Self::fresh_index(view, *size, *next);
                view.occupied()
                    .into_iter()
                    .filter(|c| c.size == *size && !c.is_speculative())
                    .sorted()
                    .chain(std::iter::once(Container::new(ContainerKind::Normal, *size, fresh)))
                    .collect()
            },
        }
    }

    /// Even/odd normal pairs for wide arithmetic.
    pub fn pairs(&self, view: &dyn AllocView) -> Vec<(Container, Container)> {
        match self {
            ContainerSupply::Group(g) => g.of_kind(ContainerKind::Normal)
                .filter(|c| c.index % 2 == 0)
                .map(|c| (*c, c.offset_by(1)))
                .filter(|(_, hi)| g.contains(hi))
                .collect(),
            ContainerSupply::Unbounded { size, next } => {
                let fresh = Self::fresh_index(view, *size, *next);
                let lo = Container::new(ContainerKind::Normal, *size, fresh + fresh % 2);
                vec![(lo, lo.offset_by(1))]
            },
        }
    }

    pub fn contains(&self, c: &Container) -> bool {
        match self {
            ContainerSupply::Group(g)               => g.contains(c),
            ContainerSupply::Unbounded { size, .. } => c.size == *size && c.kind == ContainerKind::Normal,
        }
    }
}

/// Containers that cannot be told apart by any check share a key. Only
/// empty containers whose hardware groups carry no gress or write mode yet
/// qualify.
fn equivalence_key(ctx: &AllocCtx, view: &dyn AllocView, c: &Container) -> Option<(ContainerKind, ContainerSize)> {
    if !view.is_empty_container(c) || ctx.device.clear_on_write_erratum == Some(*c) {
        return None;
    }
    let groups = [ctx.device.parser_group(c), ctx.device.deparser_group(c)];
    let sensitive = groups.iter()
        .flatten()
        .any(|g| view.group_gress(g).is_some() || view.group_write_mode(g).is_some());
    if sensitive {
        return None;
    }

    Some((c.kind, c.size))
}

/// A scored placement.
pub type Scored<'a> = (ContainerScopeOk<'a>, Box<dyn TxScore>);

/// Places one batch into the best containers `supply` offers.
///
/// Returns up to three candidates, best first: the best overall, the best
/// that does not pack with existing data, and the best of those outside
/// mocha and dark containers. On failure the most specific error seen is
/// returned.
pub fn allocate_to_group<'a>(
    ctx:            &AllocCtx,
    parent:         &'a dyn AllocView,
    starts:         &[(FieldSlice, Bits)],
    supply:         &ContainerSupply,
    scope:          Option<HintScope>,
    speculative:    &[Vec<(FieldSlice, Bits)>],
    metrics:        &mut AllocatorMetrics,
) -> Result<Vec<Scored<'a>>, AllocError> {
    let mut tiers: [Option<Scored<'a>>; 3] = [None, None, None];
    let mut tried: AHashSet<(ContainerKind, ContainerSize)> = AHashSet::new();
    let mut err: Option<AllocError> = None;

    let candidates = supply.candidates(parent);
    'kinds: for kind in KIND_ORDER {
        for c in candidates.iter().filter(|c| c.kind == kind) {
            let key = equivalence_key(ctx, parent, c);
            if let Some(k) = key {
                if !tried.insert(k) {
                    stat!(metrics, equivalence_skips);
                    continue;
                }
            }
            let ok = match try_slices_to_container(ctx, parent, starts, *c, scope, speculative, metrics) {
                Ok(ok) => ok,
                Err(e) => {
                    err = prefer_error(err, e);
                    continue;
                },
            };
            let score = ctx.score.make(&ok.tx);
            trace!("{c} works: {score}");
            let fresh = !ok.packed;
            let plain = fresh && !c.kind.is_whole_container_set();
            let stop = ctx.config.early_stop_on_empty_normal && c.kind == ContainerKind::Normal && fresh;
            for (tier, eligible) in [true, fresh, plain].into_iter().enumerate() {
                if eligible && improves(score.as_ref(), tiers[tier].as_ref().map(|(_, s)| s.as_ref())) {
                    tiers[tier] = Some((ok.clone(), ctx.score.make(&ok.tx)));
                }
            }
            if stop {
                break 'kinds;
            }
        }
    }

    let mut res: Vec<Scored<'a>> = vec![];
    for cand in tiers.into_iter().flatten() {
        if !res.iter().any(|(r, _)| r.container == cand.0.container) {
            res.push(cand);
        }
    }
    if res.is_empty() {
        return Err(err.unwrap_or_else(|| AllocError::new(
            ErrorCode::NotEnoughSpace,
            format!("no {}-bit container available", supply.size().bits()),
        )));
    }

    Ok(res)
}
