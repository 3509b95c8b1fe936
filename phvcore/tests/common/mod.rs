#![allow(dead_code)]

use phvcore::*;
use phvcore::actions::{Action, MoveActionConstraints, Operand};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Field registry and clusters under construction.
#[derive(Default)]
pub struct Builder {
    pub phv:        PhvInfo,
    pub clusters:   Vec<SuperCluster>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(&mut self, name: &str, size: Bits) -> FieldId {
        self.phv.add_field(Field::new(name, size, Gress::Ingress))
    }

    pub fn solitary(&mut self, name: &str, size: Bits) -> FieldId {
        let id = self.field(name, size);
        self.phv.field_mut(id).solitary = true;
        id
    }

    pub fn whole(&self, f: FieldId) -> FieldSlice {
        self.phv.field(f).whole()
    }

    /// One super cluster made of the given lists, next id.
    pub fn cluster(&self, lists: &[&[FieldId]]) -> SuperCluster {
        let lists = lists.iter()
            .map(|l| l.iter().map(|f| self.whole(*f)).collect())
            .collect();
        SuperCluster::new(lists, vec![], vec![]).with_id(self.clusters.len() as u32)
    }

    pub fn push(&mut self, sc: SuperCluster) {
        self.clusters.push(sc);
    }
}

/// A device with `count` normal containers of one width, one MAU group.
pub fn normal_device(size: ContainerSize, count: u32) -> PhvSpec {
    let mut spec = PhvSpec::new();
    spec.add_containers(ContainerKind::Normal, size, count);
    spec
}

/// Random clusters of small lists: every list fits in 16 bits, a few
/// fields are solitary.
pub fn random_problem(seed: u64, n_clusters: usize) -> Builder {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut b = Builder::new();
    for ci in 0..n_clusters {
        let n_lists = rng.gen_range(1..=3);
        let mut lists: Vec<Vec<FieldId>> = vec![];
        for li in 0..n_lists {
            if rng.gen_bool(0.15) {
                let f = b.solitary(&format!("s{ci}_{li}"), rng.gen_range(1..=8));
                lists.push(vec![f]);
                continue;
            }
            let n_fields = rng.gen_range(1..=3);
            let mut left: Bits = 16;
            let mut list = vec![];
            for fi in 0..n_fields {
                if left == 0 {
                    break;
                }
                let size = rng.gen_range(1..=left.min(8));
                left -= size;
                list.push(b.field(&format!("f{ci}_{li}_{fi}"), size));
            }
            lists.push(list);
        }
        let refs = lists.iter().map(|l| l.as_slice()).collect::<Vec<_>>();
        let sc = b.cluster(&refs);
        b.push(sc);
    }

    b
}

/// Random moves between the fields of `b`; about one in five writes a
/// constant instead.
pub fn random_actions(seed: u64, b: &Builder, n_actions: usize) -> MoveActionConstraints {
    let mut rng = StdRng::seed_from_u64(seed.wrapping_mul(31).wrapping_add(17));
    let fields = b.phv.fields().map(|f| (f.id, f.size)).collect::<Vec<_>>();
    let mut actions = vec![];
    for i in 0..n_actions {
        let mut action = Action::new(&format!("act{i}"));
        for _ in 0..rng.gen_range(1..=2) {
            let (d, dsize) = fields[rng.gen_range(0..fields.len())];
            let (s, ssize) = fields[rng.gen_range(0..fields.len())];
            if s == d || rng.gen_bool(0.2) {
                action = action.with_move(b.phv.field(d).whole(), Operand::Const);
                continue;
            }
            let w = rng.gen_range(1..=dsize.min(ssize));
            let dlo = rng.gen_range(0..=dsize - w);
            let slo = rng.gen_range(0..=ssize - w);
            action = action.with_move(
                b.phv.field(d).slice(dlo, dlo + w - 1),
                Operand::Field(b.phv.field(s).slice(slo, slo + w - 1)),
            );
        }
        actions.push(action);
    }

    MoveActionConstraints::new(actions)
}

/// Panics if two slices of different, non-exclusive fields share a bit.
pub fn assert_no_double_booking(phv: &PhvInfo, alloc: &Allocation) {
    for (c, st) in alloc.containers() {
        for (x, y) in st.slices.iter().tuple_combinations() {
            assert!(
                !x.container_range.overlaps(&y.container_range) || phv.is_mutex(x.field(), y.field()),
                "{c}: {} overlaps {}", phv.fmt_alloc(x), phv.fmt_alloc(y)
            );
        }
    }
}

/// Panics if a solitary field shares its container with another field.
pub fn assert_solitary_alone(phv: &PhvInfo, alloc: &Allocation) {
    for (c, st) in alloc.containers() {
        let fields = st.fields();
        let lonely = fields.iter().any(|f| phv.field(*f).solitary);
        if lonely {
            assert_eq!(fields.len(), 1, "{c} holds a solitary field and more");
        }
    }
}

/// Panics unless every bit of every placed field is claimed exactly once.
pub fn assert_widths_conserved(phv: &PhvInfo) {
    for f in phv.fields() {
        let allocs = f.get_alloc();
        if allocs.is_empty() {
            continue;
        }
        let mut bits = vec![0usize; f.size];
        for a in allocs {
            assert_eq!(a.slice.size(), a.container_range.width());
            for b in a.slice.range.lo..=a.slice.range.hi {
                bits[b] += 1;
            }
        }
        assert!(bits.iter().all(|n| *n == 1), "{} is not covered exactly once", f.name);
    }
}
