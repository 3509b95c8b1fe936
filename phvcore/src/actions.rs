//! A move-only action model and the synthesizability oracle built on it.
//!
//! Real programs are judged by the instruction-selection backend. This model
//! is what the CLI, the tests and the trivial allocator run against: every
//! action is a set of parallel moves `dst <- src`, where `src` is a field
//! slice, a constant or action data.

use crate::helpe::*;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operand {
    Field(FieldSlice),
    Const,
    ActionData,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Move {
    pub dst: FieldSlice,
    pub src: Operand,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Action {
    pub name:   String,
    pub moves:  Vec<Move>,
}

impl Action {
    pub fn new(name: &str) -> Self {
        Self {
            name:   name.to_string(),
            moves:  vec![],
        }
    }

    pub fn with_move(mut self, dst: FieldSlice, src: Operand) -> Self {
        if let Operand::Field(s) = src {
            assert_eq!(s.size(), dst.size(), "Move width mismatch in {}", self.name);
        }
        self.moves.push(Move { dst, src });
        self
    }
}

/// Source containers a single action may read when writing one container.
const MAX_SOURCES: usize = 2;
const MAX_SOURCES_WHOLE: usize = 1;

#[derive(Clone, Debug, Default)]
pub struct MoveActionConstraints {
    actions: Vec<Action>,
}

/// One destination bit run of a move, resolved against the container.
struct Write<'a> {
    mv:         &'a Move,
    dst:        FieldSlice,
    dst_start:  Bits,
}

impl MoveActionConstraints {
    pub fn new(actions: Vec<Action>) -> Self {
        Self { actions }
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Runs of `action`'s destinations that land in `c`.
    fn writes_into<'a>(&self, action: &'a Action, status: &ContainerStatus) -> Vec<Write<'a>> {
        let mut res = vec![];
        for mv in &action.moves {
            for a in status.slices.iter().filter(|a| a.field() == mv.dst.field) {
                if let Some(r) = a.slice.range.intersect(&mv.dst.range) {
                    res.push(Write {
                        mv,
                        dst:        FieldSlice { field: mv.dst.field, range: r },
                        dst_start:  a.container_range.lo + (r.lo - a.slice.range.lo),
                    });
                }
            }
        }

        res
    }

    /// Splits the source of `w` into runs that are contiguous in one
    /// container (or unplaced throughout).
    fn source_runs(view: &dyn AllocView, w: &Write, src: &FieldSlice) -> Vec<SourceOperand> {
        let lo = src.range.lo + (w.dst.range.lo - w.mv.dst.range.lo);
        let placements = view.field_slices(src.field);
        let mut res: Vec<SourceOperand> = vec![];
        for (i, bit) in (lo..lo + w.dst.size()).enumerate() {
            let at = placements.iter().find_map(|a| a.container_bit_of(bit).map(|p| (a.container, p)));
            if let Some(last) = res.last_mut() {
                let contiguous = match (last.placed, at) {
                    (None, None) => true,
                    (Some((c0, p0)), Some((c1, p1))) => c0 == c1 && p1 == p0 + last.slice.size(),
                    _ => false,
                };
                if contiguous {
                    last.slice.range.hi += 1;
                    continue;
                }
            }
            res.push(SourceOperand {
                slice:      FieldSlice::new(src.field, bit, bit),
                dst_start:  w.dst_start + i,
                placed:     at,
            });
        }

        res
    }
}

impl ActionConstraints for MoveActionConstraints {
    fn can_pack(
        &self,
        phv:        &PhvInfo,
        view:       &dyn AllocView,
        container:  &Container,
        mode:       ActionCheckMode,
    ) -> Result<Vec<ActionSources>, AllocError> {
        if mode == ActionCheckMode::Loose {
            return Ok(vec![]);
        }
        let status = match view.status(container) {
            Some(s) if !s.is_empty() => s,
            _ => return Ok(vec![]),
        };
        let whole = container.kind.is_whole_container_set();
        let mut res = vec![];
        for action in &self.actions {
            let writes = self.writes_into(action, status);
            if writes.is_empty() {
                continue;
            }
            let context = |msg: String| {
                AllocError::new(ErrorCode::ActionCannotBeSynthesized, msg)
                    .with_invalid_packing(status.slices.clone())
                    .context(format!("action {} writing {}", action.name, container))
            };

            if whole {
                let written: BTreeSet<FieldId> = writes.iter().map(|w| w.dst.field).collect();
                for a in &status.slices {
                    let f = phv.field(a.field());
                    let covered = writes.iter().any(|w| w.dst.field == a.field() && w.dst.range.contains(&a.slice.range));
                    if covered || f.padding || written.iter().all(|w| phv.is_mutex(*w, a.field())) {
                        continue;
                    }
                    return Err(context(format!(
                        "whole-container write clobbers {}",
                        phv.fmt_alloc(a)
                    )));
                }
                let has_field = writes.iter().any(|w| matches!(w.mv.src, Operand::Field(_)));
                let has_imm = writes.iter().any(|w| !matches!(w.mv.src, Operand::Field(_)));
                if has_field && has_imm {
                    return Err(context("mixes field and immediate sources".to_string()));
                }
            }

            let mut operands = vec![];
            for w in &writes {
                if let Operand::Field(src) = &w.mv.src {
                    operands.extend(Self::source_runs(view, w, src));
                }
            }
            let in_place = |o: &SourceOperand| matches!(o.placed, Some((c, p)) if c == *container && p == o.dst_start);
            let sources: BTreeSet<Container> = operands.iter()
                .filter(|o| !in_place(o))
                .filter_map(|o| o.placed.map(|(c, _)| c))
                .collect();
            let limit = if whole { MAX_SOURCES_WHOLE } else { MAX_SOURCES };
            if sources.len() > limit {
                return Err(context(format!(
                    "{} source containers ({}) exceed the limit of {limit}",
                    sources.len(),
                    sources.iter().join(", ")
                )));
            }
            if !operands.is_empty() {
                res.push(ActionSources {
                    action:             action.name.clone(),
                    dst:                *container,
                    whole_container:    whole,
                    operands,
                });
            }
        }

        Ok(res)
    }

    fn written_from(&self, view: &dyn AllocView, read: &[FieldSlice]) -> Vec<Container> {
        let mut res: BTreeSet<Container> = BTreeSet::new();
        for mv in self.actions.iter().flat_map(|a| a.moves.iter()) {
            let Operand::Field(src) = &mv.src else { continue; };
            for fs in read.iter().filter(|fs| fs.field == src.field) {
                let Some(r) = fs.range.intersect(&src.range) else { continue; };
                let fed = BitRange::from_lo_width(mv.dst.range.lo + (r.lo - src.range.lo), r.width());
                for a in view.field_slices(mv.dst.field) {
                    if a.slice.range.overlaps(&fed) && !a.container.is_speculative() {
                        res.insert(a.container);
                    }
                }
            }
        }

        res.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn place(phv: &PhvInfo, tx: &mut Transaction, fs: FieldSlice, c: Container, lo: Bits) {
        tx.add_slice(AllocSlice::new(fs, c, lo), phv.field(fs.field), &PhvSpec::default());
    }

    #[test]
    fn three_sources_are_too_many() {
        let mut phv = PhvInfo::new();
        let d = phv.add_field(Field::new("d", 8, Gress::Ingress));
        let s: Vec<FieldId> = (0..3)
            .map(|i| phv.add_field(Field::new(&format!("s{i}"), 2, Gress::Ingress)))
            .collect();
        let b = |i| Container::new(ContainerKind::Normal, ContainerSize::B8, i);
        let mut action = Action::new("set");
        for (i, f) in s.iter().enumerate() {
            action = action.with_move(phv.field(d).slice(2 * i, 2 * i + 1), Operand::Field(phv.field(*f).whole()));
        }
        let oracle = MoveActionConstraints::new(vec![action]);

        let alloc = Allocation::new();
        let mut tx = Transaction::new(&alloc);
        place(&phv, &mut tx, phv.field(d).whole(), b(0), 0);
        place(&phv, &mut tx, phv.field(s[0]).whole(), b(1), 0);
        place(&phv, &mut tx, phv.field(s[1]).whole(), b(2), 2);
        let ok = oracle.can_pack(&phv, &tx, &b(0), ActionCheckMode::Strict).unwrap();
        assert_eq!(ok.len(), 1);
        assert_eq!(ok[0].operands.len(), 3);
        assert!(ok[0].operands[2].placed.is_none());

        place(&phv, &mut tx, phv.field(s[2]).whole(), b(3), 4);
        let err = oracle.can_pack(&phv, &tx, &b(0), ActionCheckMode::Strict).unwrap_err();
        assert_eq!(err.code, ErrorCode::ActionCannotBeSynthesized);
        assert!(err.invalid_packing.is_some());
        assert!(oracle.can_pack(&phv, &tx, &b(0), ActionCheckMode::Loose).unwrap().is_empty());
    }

    #[test]
    fn sources_lead_to_their_destinations() {
        let mut phv = PhvInfo::new();
        let d = phv.add_field(Field::new("d", 8, Gress::Ingress));
        let e = phv.add_field(Field::new("e", 8, Gress::Ingress));
        let s = phv.add_field(Field::new("s", 4, Gress::Ingress));
        let oracle = MoveActionConstraints::new(vec![
            Action::new("set")
                .with_move(phv.field(d).slice(4, 7), Operand::Field(phv.field(s).whole()))
                .with_move(phv.field(e).slice(0, 3), Operand::Const),
        ]);
        let b = |i| Container::new(ContainerKind::Normal, ContainerSize::B8, i);
        let alloc = Allocation::new();
        let mut tx = Transaction::new(&alloc);
        let src = phv.field(s).whole();
        assert!(oracle.written_from(&tx, &[src]).is_empty());

        // d is split: only the half fed by s counts.
        place(&phv, &mut tx, phv.field(d).slice(0, 3), b(0), 0);
        place(&phv, &mut tx, phv.field(d).slice(4, 7), b(1), 0);
        place(&phv, &mut tx, phv.field(e).whole(), b(2), 0);
        assert_eq!(oracle.written_from(&tx, &[src]), vec![b(1)]);
        assert_eq!(oracle.written_from(&tx, &[phv.field(s).slice(2, 3)]), vec![b(1)]);
        assert!(oracle.written_from(&tx, &[phv.field(e).whole()]).is_empty());
    }

    #[test]
    fn whole_container_write_clobbers_bystanders() {
        let mut phv = PhvInfo::new();
        let d = phv.add_field(Field::new("d", 4, Gress::Ingress));
        let e = phv.add_field(Field::new("e", 4, Gress::Ingress));
        let oracle = MoveActionConstraints::new(vec![
            Action::new("init").with_move(phv.field(d).whole(), Operand::Const),
        ]);
        let m = Container::new(ContainerKind::Mocha, ContainerSize::B8, 0);
        let alloc = Allocation::new();
        let mut tx = Transaction::new(&alloc);
        place(&phv, &mut tx, phv.field(d).whole(), m, 0);
        place(&phv, &mut tx, phv.field(e).whole(), m, 4);
        assert!(oracle.can_pack(&phv, &tx, &m, ActionCheckMode::Strict).is_err());

        phv.set_mutex(d, e);
        assert!(oracle.can_pack(&phv, &tx, &m, ActionCheckMode::Strict).unwrap().is_empty());
    }
}
