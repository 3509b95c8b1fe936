//! Static per-container constraints.
//!
//! Every check looks at the state *before* the batch (`view`) plus the batch
//! itself and never writes anything. The first failure wins.

use crate::{
    helpe::*,
    algo::AllocCtx,
};

pub fn check_container(
    ctx:    &AllocCtx,
    view:   &dyn AllocView,
    batch:  &[AllocSlice],
    c:      &Container,
) -> Option<AllocError> {
    if !ctx.config.is_trivial() {
        if let Some(e) = check_type(ctx, batch, c) {
            return Some(e);
        }
    }

    check_gress(ctx, view, batch, c)
        .or_else(|| check_write_mode(ctx, view, batch, c))
        .or_else(|| check_solitary(ctx, view, batch, c))
        .or_else(|| check_max_bytes(ctx, view, batch))
}

pub fn check_type(ctx: &AllocCtx, batch: &[AllocSlice], c: &Container) -> Option<AllocError> {
    for a in batch {
        let f = ctx.phv.field(a.field());
        if !f.can_use_kind(c.kind) {
            return Some(AllocError::new(
                ErrorCode::ContainerTypeMismatch,
                format!("{} cannot live in a {} container", f.name, c.kind),
            ));
        }
        if f.required_size.is_some_and(|s| s != c.size) {
            return Some(AllocError::new(
                ErrorCode::ContainerTypeMismatch,
                format!("{} requires {}-bit containers", f.name, f.required_size.map_or(0, |s| s.bits())),
            ));
        }
    }

    None
}

pub fn check_gress(
    ctx:    &AllocCtx,
    view:   &dyn AllocView,
    batch:  &[AllocSlice],
    c:      &Container,
) -> Option<AllocError> {
    let mismatch = |what: String| Some(AllocError::new(ErrorCode::ContainerGressMismatch, what));
    let mut batch_gress: Option<Gress> = None;
    for a in batch {
        let f = ctx.phv.field(a.field());
        if f.padding {
            continue;
        }
        match batch_gress {
            Some(g) if g != f.gress => return mismatch(format!("{} and its list disagree on gress", f.name)),
            _ => batch_gress = Some(f.gress),
        }
        if let Some(g) = view.status(c).and_then(|s| s.gress) {
            if g != f.gress {
                return mismatch(format!("{c} is {g}, {} is {}", f.name, f.gress));
            }
        }
        if f.extracted {
            if let Some(g) = ctx.device.parser_group(c).and_then(|k| view.group_gress(&k)) {
                if g != f.gress {
                    return mismatch(format!("parser group of {c} is {g}, {} is {}", f.name, f.gress));
                }
            }
        }
        if f.deparsed {
            if let Some(g) = ctx.device.deparser_group(c).and_then(|k| view.group_gress(&k)) {
                if g != f.gress {
                    return mismatch(format!("deparser group of {c} is {g}, {} is {}", f.name, f.gress));
                }
            }
        }
    }

    None
}

#[inline(always)]
fn clears(m: ParserWriteMode) -> bool {
    m == ParserWriteMode::ClearOnWrite
}

pub fn check_write_mode(
    ctx:    &AllocCtx,
    view:   &dyn AllocView,
    batch:  &[AllocSlice],
    c:      &Container,
) -> Option<AllocError> {
    let mismatch = |what: String| Some(AllocError::new(ErrorCode::ContainerParserWriteModeMismatch, what));
    let group_mode = ctx.device.parser_group(c).and_then(|k| view.group_write_mode(&k));
    let mut seen = view.status(c).and_then(|s| s.write_mode);
    for a in batch {
        let f = ctx.phv.field(a.field());
        if !f.extracted {
            continue;
        }
        if clears(f.write_mode) && ctx.device.clear_on_write_erratum == Some(*c) {
            return mismatch(format!("{c} cannot be clear-on-write on this device"));
        }
        if let Some(m) = group_mode {
            if clears(m) != clears(f.write_mode) {
                return mismatch(format!("parser group of {c} is {m:?}, {} is {:?}", f.name, f.write_mode));
            }
        }
        match seen {
            Some(m) if clears(m) != clears(f.write_mode) => {
                return mismatch(format!("{c} is {m:?}, {} is {:?}", f.name, f.write_mode));
            },
            _ => seen = Some(f.write_mode),
        }
    }

    None
}

pub fn check_solitary(
    ctx:    &AllocCtx,
    view:   &dyn AllocView,
    batch:  &[AllocSlice],
    c:      &Container,
) -> Option<AllocError> {
    let resident = view.status(c).map(|s| s.slices.as_slice()).unwrap_or(&[]);
    for a in batch {
        let me = ctx.phv.field(a.field());
        if me.padding {
            continue;
        }
        for b in resident.iter().chain(batch.iter()) {
            if std::ptr::eq(a, b) {
                continue;
            }
            let other = ctx.phv.field(b.field());
            if other.padding || !(me.solitary || other.solitary) {
                continue;
            }
            if me.id == other.id {
                // Same field: fine only if it reads as one contiguous run.
                let aligned = a.container_range.lo as isize - b.container_range.lo as isize
                    == a.slice.range.lo as isize - b.slice.range.lo as isize;
                if aligned {
                    continue;
                }
            } else if ctx.config.physical_liverange_overlay && a.live_disjoint(b) {
                continue;
            }
            let solitary = if me.solitary { me } else { other };
            return Some(AllocError::new(
                ErrorCode::NotEnoughSpace,
                format!(
                    "{} is solitary and {c} would also hold {}",
                    solitary.name,
                    if me.solitary { ctx.phv.fmt_alloc(b) } else { ctx.phv.fmt_alloc(a) },
                ),
            ));
        }
    }

    None
}

pub fn check_max_bytes(ctx: &AllocCtx, view: &dyn AllocView, batch: &[AllocSlice]) -> Option<AllocError> {
    for f in batch.iter().map(|a| a.field()).unique() {
        let field = ctx.phv.field(f);
        let Some(max) = field.max_container_bytes else { continue; };
        let mut spans: IndexMap<Container, BitRange> = IndexMap::new();
        for a in view.field_slices(f).iter().chain(batch.iter().filter(|a| a.field() == f)) {
            if a.container.is_speculative() {
                continue;
            }
            spans.entry(a.container)
                .and_modify(|r| *r = BitRange::new(r.lo.min(a.container_range.lo), r.hi.max(a.container_range.hi)))
                .or_insert(a.container_range);
        }
        let used: usize = spans.values().map(|r| r.bytes_spanned()).sum();
        if used > max {
            return Some(AllocError::new(
                ErrorCode::FieldMaxContainerBytesExceeded,
                format!("{} would use {used} container bytes, at most {max} allowed", field.name),
            ));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn byte(i: u32) -> Container {
        Container::new(ContainerKind::Normal, ContainerSize::B8, i)
    }

    fn env<'a>(phv: &'a PhvInfo, device: &'a PhvSpec, config: &'a AllocConfig) -> AllocCtx<'a> {
        AllocCtx {
            phv,
            device,
            actions:    &NoActionConstraints,
            parser:     &AnyParserPacking,
            liveranges: None,
            score:      &DefaultScoreMaker,
            config,
        }
    }

    fn commit(phv: &PhvInfo, device: &PhvSpec, alloc: &mut Allocation, placed: &[AllocSlice]) {
        let mut tx = Transaction::new(&*alloc);
        for a in placed {
            tx.add_slice(*a, phv.field(a.field()), device);
        }
        let diff = tx.into_diff();
        alloc.commit(diff);
    }

    fn device() -> PhvSpec {
        let mut d = PhvSpec::new();
        d.add_containers(ContainerKind::Normal, ContainerSize::B8, 8);
        d.add_containers(ContainerKind::Normal, ContainerSize::H16, 2);
        d.add_containers(ContainerKind::Mocha, ContainerSize::B8, 1);
        d
    }

    #[test]
    fn kind_and_size_pragmas() {
        let mut phv = PhvInfo::new();
        let a = phv.add_field(Field::new("a", 4, Gress::Ingress));
        let b = phv.add_field(Field::new("b", 4, Gress::Ingress));
        phv.field_mut(b).required_size = Some(ContainerSize::H16);
        let dev = device();
        let config = AllocConfig::default();
        let b0 = byte(0);
        let ctx = env(&phv, &dev, &config);
        let m0 = Container::new(ContainerKind::Mocha, ContainerSize::B8, 0);

        let e = check_type(&ctx, &[AllocSlice::new(phv.field(a).whole(), m0, 0)], &m0).unwrap();
        assert_eq!(e.code, ErrorCode::ContainerTypeMismatch);
        let e = check_type(&ctx, &[AllocSlice::new(phv.field(b).whole(), b0, 0)], &b0).unwrap();
        assert_eq!(e.code, ErrorCode::ContainerTypeMismatch);
        assert!(check_type(&ctx, &[AllocSlice::new(phv.field(a).whole(), b0, 0)], &b0).is_none());

        // The trivial pass leaves kinds to later passes.
        let trivial = AllocConfig::trivial();
        let ctx = env(&phv, &dev, &trivial);
        let alloc = Allocation::new();
        assert!(check_container(&ctx, &alloc, &[AllocSlice::new(phv.field(a).whole(), m0, 0)], &m0).is_none());
    }

    #[test]
    fn gress_of_container_and_groups() {
        let mut phv = PhvInfo::new();
        let i = phv.add_field(Field::new("i", 4, Gress::Ingress));
        let e = phv.add_field(Field::new("e", 4, Gress::Egress));
        let pi = phv.add_field(Field::new("pi", 4, Gress::Ingress));
        let pe = phv.add_field(Field::new("pe", 4, Gress::Egress));
        phv.field_mut(pi).extracted = true;
        phv.field_mut(pe).extracted = true;
        let di = phv.add_field(Field::new("di", 4, Gress::Ingress));
        let de = phv.add_field(Field::new("de", 4, Gress::Egress));
        phv.field_mut(di).deparsed = true;
        phv.field_mut(de).deparsed = true;
        let dev = device();
        let config = AllocConfig::default();
        let (b0, b1) = (byte(0), byte(1));
        let ctx = env(&phv, &dev, &config);

        let mut alloc = Allocation::new();
        commit(&phv, &dev, &mut alloc, &[AllocSlice::new(phv.field(i).whole(), b0, 0)]);
        let egress = [AllocSlice::new(phv.field(e).whole(), b0, 4)];
        let err = check_gress(&ctx, &alloc, &egress, &b0).unwrap();
        assert_eq!(err.code, ErrorCode::ContainerGressMismatch);
        let mixed = [
            AllocSlice::new(phv.field(i).whole(), b1, 0),
            AllocSlice::new(phv.field(e).whole(), b1, 4),
        ];
        assert!(check_gress(&ctx, &alloc, &mixed, &b1).is_some());

        // B0 and B1 share a parser group, and all of B0..B7 a deparser group.
        let mut alloc = Allocation::new();
        commit(&phv, &dev, &mut alloc, &[
            AllocSlice::new(phv.field(pi).whole(), b0, 0),
            AllocSlice::new(phv.field(di).whole(), b0, 4),
        ]);
        assert!(check_gress(&ctx, &alloc, &[AllocSlice::new(phv.field(e).whole(), b1, 0)], &b1).is_none());
        let err = check_gress(&ctx, &alloc, &[AllocSlice::new(phv.field(pe).whole(), b1, 0)], &b1).unwrap();
        assert!(err.message.contains("parser group"));
        let b5 = byte(5);
        let err = check_gress(&ctx, &alloc, &[AllocSlice::new(phv.field(de).whole(), b5, 0)], &b5).unwrap();
        assert!(err.message.contains("deparser group"));
    }

    #[test]
    fn write_modes_agree_per_group() {
        let mut phv = PhvInfo::new();
        let x = phv.add_field(Field::new("x", 4, Gress::Ingress));
        let or = phv.add_field(Field::new("or", 4, Gress::Ingress));
        let cw = phv.add_field(Field::new("cw", 4, Gress::Ingress));
        for f in [x, or, cw] {
            phv.field_mut(f).extracted = true;
        }
        phv.field_mut(or).write_mode = ParserWriteMode::BitwiseOr;
        phv.field_mut(cw).write_mode = ParserWriteMode::ClearOnWrite;
        let mut dev = device();
        dev.clear_on_write_erratum = Some(byte(6));
        let config = AllocConfig::default();
        let (b0, b1) = (byte(0), byte(1));
        let ctx = env(&phv, &dev, &config);

        let mut alloc = Allocation::new();
        commit(&phv, &dev, &mut alloc, &[AllocSlice::new(phv.field(x).whole(), b0, 0)]);
        assert!(check_write_mode(&ctx, &alloc, &[AllocSlice::new(phv.field(or).whole(), b1, 0)], &b1).is_none());
        let err = check_write_mode(&ctx, &alloc, &[AllocSlice::new(phv.field(cw).whole(), b1, 0)], &b1).unwrap();
        assert_eq!(err.code, ErrorCode::ContainerParserWriteModeMismatch);

        let b6 = byte(6);
        let b5 = byte(5);
        let err = check_write_mode(&ctx, &alloc, &[AllocSlice::new(phv.field(cw).whole(), b6, 0)], &b6).unwrap();
        assert!(err.message.contains("cannot be clear-on-write"));
        assert!(check_write_mode(&ctx, &alloc, &[AllocSlice::new(phv.field(cw).whole(), b5, 0)], &b5).is_none());
    }

    #[test]
    fn container_bytes_add_up_across_containers() {
        let mut phv = PhvInfo::new();
        let f = phv.add_field(Field::new("f", 16, Gress::Ingress));
        phv.field_mut(f).max_container_bytes = Some(2);
        let dev = device();
        let config = AllocConfig::default();
        let b0 = byte(0);
        let ctx = env(&phv, &dev, &config);
        let h0 = Container::new(ContainerKind::Normal, ContainerSize::H16, 0);

        let mut alloc = Allocation::new();
        commit(&phv, &dev, &mut alloc, &[AllocSlice::new(phv.field(f).slice(0, 7), b0, 0)]);
        let upper = phv.field(f).slice(8, 15);
        let err = check_max_bytes(&ctx, &alloc, &[AllocSlice::new(upper, h0, 4)]).unwrap();
        assert_eq!(err.code, ErrorCode::FieldMaxContainerBytesExceeded);
        assert!(check_max_bytes(&ctx, &alloc, &[AllocSlice::new(upper, h0, 8)]).is_none());
    }
}
