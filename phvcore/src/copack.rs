//! Turns the oracle's per-action source reports into co-packing hints.
//!
//! For a source bit feeding destination bit `d` of a `W`-bit container, the
//! source must sit at `(d + shift) mod W` of its own container, where the
//! right shift `shift = (src_start - dst_start) mod W` is shared by every
//! source read from that container. Placed sources fix the shift, unplaced
//! ones inherit it.

use crate::helpe::*;

/// One source container of an action and where each of its slices must sit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrcPackVec {
    /// `None` when no source is placed yet: any one container will do.
    pub container:  Option<Container>,
    pub shift:      Bits,
    pub starts:     IndexMap<FieldSlice, Bits>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoPackHint {
    pub action:     String,
    pub dst:        Container,
    /// One or two source containers. Unplaced slices go to the first.
    pub srcs:       Vec<SrcPackVec>,
    /// Skipping the hint leaves the action unsynthesizable.
    pub required:   bool,
}

impl CoPackHint {
    /// Slices of the hint that still need a home.
    pub fn unplaced<'a>(&'a self, view: &'a dyn AllocView) -> impl Iterator<Item = (FieldSlice, Bits)> + 'a {
        self.srcs[0].starts
            .iter()
            .filter(move |(fs, _)| {
                !view.field_slices(fs.field)
                    .iter()
                    .any(|a| a.slice.range.overlaps(&fs.range))
            })
            .map(|(fs, p)| (*fs, *p))
    }
}

/// What the adapter knows about the super cluster being allocated.
#[derive(Clone, Copy)]
pub struct HintScope<'a> {
    pub sc:         &'a SuperCluster,
    pub alignment:  &'a ScAllocAlignment,
}

#[inline(always)]
fn wrap_shift(src: Bits, dst: Bits, width: Bits) -> Bits {
    (src % width + width - dst % width) % width
}

/// Builds the hints for every action reported by the oracle. Hints that
/// cannot be honored are dropped when optional and fail the placement when
/// required.
pub fn make_hints(
    phv:        &PhvInfo,
    view:       &dyn AllocView,
    reports:    &[ActionSources],
    mode:       ActionCheckMode,
    scope:      Option<HintScope>,
    metrics:    &mut AllocatorMetrics,
) -> Result<Vec<CoPackHint>, AllocError> {
    if mode == ActionCheckMode::Loose {
        return Ok(vec![]);
    }
    let mut res = vec![];
    for report in reports {
        match hint_for(phv, view, report, mode, scope) {
            Ok(Some(h)) => res.push(h),
            Ok(None) => {},
            Err((e, true)) => return Err(e),
            Err((e, false)) => {
                trace!("Dropping optional hint: {e}");
                stat!(metrics, hints_dropped);
            },
        }
    }

    Ok(res)
}

/// The error flag tells whether the failure is fatal.
fn hint_for(
    phv:    &PhvInfo,
    view:   &dyn AllocView,
    report: &ActionSources,
    mode:   ActionCheckMode,
    scope:  Option<HintScope>,
) -> Result<Option<CoPackHint>, (AllocError, bool)> {
    let width = report.dst.width();
    let fail = |msg: String| {
        AllocError::new(ErrorCode::ActionCannotBeSynthesized, msg)
            .context(format!("action {} writing {}", report.action, report.dst))
    };

    // Placed sources, grouped by container.
    let mut groups: IndexMap<Container, (Bits, IndexMap<FieldSlice, Bits>)> = IndexMap::new();
    let mut unplaced = vec![];
    for op in &report.operands {
        let Some((c, p)) = op.placed else {
            unplaced.push(op);
            continue;
        };
        let shift = wrap_shift(p, op.dst_start, width);
        if c == report.dst && shift == 0 {
            continue;
        }
        let entry = groups.entry(c).or_insert_with(|| (shift, IndexMap::new()));
        if entry.0 != shift {
            let bad = vec![
                AllocSlice::new(op.slice, c, p),
            ];
            let e = fail(format!(
                "sources in {c} disagree on shift ({} vs {shift})",
                entry.0
            )).with_invalid_packing(bad);
            return Err((e, true));
        }
        entry.1.insert(op.slice, p);
    }
    if groups.is_empty() && unplaced.is_empty() {
        return Ok(None);
    }
    let limit = if report.whole_container { 1 } else { 2 };
    if groups.len() > limit {
        return Err((fail(format!("{} source containers", groups.len())), true));
    }
    let required = mode == ActionCheckMode::Strict
        && !unplaced.is_empty()
        && (report.whole_container || groups.len() == limit);

    let mut srcs: Vec<SrcPackVec> = groups.into_iter()
        .map(|(c, (shift, starts))| SrcPackVec { container: Some(c), shift, starts })
        .collect();
    if srcs.is_empty() {
        srcs.push(SrcPackVec { container: None, shift: 0, starts: IndexMap::new() });
    }

    let target = srcs[0].container;
    let target_width = target.map_or(width, |c| c.width());
    let shift = srcs[0].shift;
    let mut claimed: Vec<(FieldSlice, BitRange)> = vec![];
    for op in unplaced {
        let start = (op.dst_start + shift) % width;
        let check = (|| {
            if start + op.slice.size() > target_width {
                return Err(format!("{} would wrap around at bit {start}", phv.fmt_slice(&op.slice)));
            }
            let range = BitRange::from_lo_width(start, op.slice.size());
            if let Some(HintScope { sc, alignment }) = scope {
                for (sid, part) in sc.slices_covering(&op.slice) {
                    let Some(q) = alignment.get(sc.cluster_of(sid)) else { continue; };
                    let want = q + (part.range.lo - sc.slice(sid).range.lo);
                    let at = start + (part.range.lo - op.slice.range.lo);
                    if want != at {
                        return Err(format!(
                            "{} is aligned at {want}, not {at}",
                            phv.fmt_slice(&part)
                        ));
                    }
                }
            }
            let me = phv.field(op.slice.field);
            if let Some(tc) = target {
                if let Some(st) = view.status(&tc) {
                    for a in st.overlapping(&range) {
                        if !phv.is_mutex(a.field(), me.id) {
                            return Err(format!("{tc} has no room at {range} ({} is there)", phv.fmt_alloc(a)));
                        }
                    }
                    for other in st.fields() {
                        let o = phv.field(other);
                        if other != me.id && (me.solitary || o.solitary) && !me.padding && !o.padding {
                            return Err(format!("{tc} would mix {} with solitary {}", me.name, o.name));
                        }
                    }
                }
            }
            for (fs, r) in &claimed {
                let o = phv.field(fs.field);
                if r.overlaps(&range) {
                    return Err(format!("{} and {} both claim {range}", phv.fmt_slice(fs), phv.fmt_slice(&op.slice)));
                }
                if fs.field != me.id && (me.solitary || o.solitary) {
                    return Err(format!("solitary {} cannot join {}", me.name, o.name));
                }
            }
            claimed.push((op.slice, range));
            Ok(())
        })();
        if let Err(msg) = check {
            return Err((fail(msg), required));
        }
        srcs[0].starts.insert(op.slice, start);
    }

    Ok(Some(CoPackHint {
        action: report.action.clone(),
        dst:    report.dst,
        srcs,
        required,
    }))
}
