//! Transactional allocation state.
//!
//! [`Allocation`] is the append-only ground truth. A [`Transaction`] layers a
//! [`TxDiff`] over a parent view (the allocation or another transaction)
//! without ever touching it: lookups hit the diff first and fall back to the
//! parent on a miss. Writes copy the parent's [`ContainerStatus`] into the
//! diff before appending, so a diff always holds *complete* statuses for the
//! containers it touched. That makes merging a diff into its parent a plain
//! overwrite of those statuses.
//!
//! Dropping a transaction is how a branch gets discarded.

use crate::helpe::*;

/// Everything known about one container at some point of the search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerStatus {
    pub slices:     Vec<AllocSlice>,
    /// Gress of the non-padding slices living here.
    pub gress:      Option<Gress>,
    pub write_mode: Option<ParserWriteMode>,
}

impl ContainerStatus {
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    /// Number of container bits claimed by at least one slice.
    pub fn used_bits(&self) -> Bits {
        self.slices.iter()
            .flat_map(|s| s.container_range.lo..=s.container_range.hi)
            .collect::<BTreeSet<_>>()
            .len()
    }

    pub fn fields(&self) -> BTreeSet<FieldId> {
        self.slices.iter().map(|s| s.field()).collect()
    }

    /// Slices claiming at least one bit of `range`.
    pub fn overlapping(&self, range: &BitRange) -> impl Iterator<Item = &AllocSlice> + '_ {
        let range = *range;
        self.slices.iter().filter(move |s| s.container_range.overlaps(&range))
    }
}

/// The write set of a transaction.
#[derive(Debug, Clone, Default)]
pub struct TxDiff {
    containers:     IndexMap<Container, ContainerStatus>,
    group_gress:    IndexMap<GroupKey, Gress>,
    group_mode:     IndexMap<GroupKey, ParserWriteMode>,
    // Only the slices added at this layer.
    by_field:       IndexMap<FieldId, Vec<AllocSlice>>,
}

impl TxDiff {
    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    pub fn containers(&self) -> impl Iterator<Item = (&Container, &ContainerStatus)> {
        self.containers.iter()
    }

    /// Every slice this diff introduced, in insertion order.
    pub fn new_slices(&self) -> impl Iterator<Item = &AllocSlice> {
        self.by_field.values().flatten()
    }

    /// Overwrites statuses, appends field indices.
    pub fn merge(&mut self, other: TxDiff) {
        for (c, st) in other.containers {
            self.containers.insert(c, st);
        }
        for (g, gress) in other.group_gress {
            self.group_gress.insert(g, gress);
        }
        for (g, mode) in other.group_mode {
            self.group_mode.insert(g, mode);
        }
        for (f, mut slices) in other.by_field {
            self.by_field.entry(f).or_default().append(&mut slices);
        }
    }
}

/// Read access to an allocation state, whichever layer it sits on.
pub trait AllocView {
    fn status(&self, c: &Container) -> Option<&ContainerStatus>;
    fn group_gress(&self, g: &GroupKey) -> Option<Gress>;
    fn group_write_mode(&self, g: &GroupKey) -> Option<ParserWriteMode>;
    /// All slices of `f`, committed or proposed, oldest first.
    fn field_slices(&self, f: FieldId) -> Vec<AllocSlice>;
    /// Every container with at least one slice, in no particular order.
    fn occupied(&self) -> Vec<Container>;
    /// The merged write set of this view relative to the ground-truth
    /// [`Allocation`] at the bottom of its chain.
    fn accumulated(&self) -> TxDiff;
    /// The ground-truth allocation at the bottom of the chain.
    fn root(&self) -> &dyn AllocView;

    #[inline(always)]
    fn is_empty_container(&self, c: &Container) -> bool {
        self.status(c).map_or(true, |s| s.is_empty())
    }
}

/// The committed, long-lived allocation.
#[derive(Debug, Clone, Default)]
pub struct Allocation {
    state: TxDiff,
}

impl Allocation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a transaction's write set. Consuming the diff (rather than the
    /// transaction) lets the caller drop the transaction's borrow first.
    pub fn commit(&mut self, diff: TxDiff) {
        self.state.merge(diff);
    }

    pub fn slices(&self) -> impl Iterator<Item = &AllocSlice> {
        self.state.new_slices()
    }

    pub fn containers(&self) -> impl Iterator<Item = (&Container, &ContainerStatus)> {
        self.state.containers()
            .filter(|(_, st)| !st.is_empty())
            .sorted_by_key(|(c, _)| **c)
    }
}

impl AllocView for Allocation {
    fn status(&self, c: &Container) -> Option<&ContainerStatus> {
        self.state.containers.get(c)
    }

    fn group_gress(&self, g: &GroupKey) -> Option<Gress> {
        self.state.group_gress.get(g).copied()
    }

    fn group_write_mode(&self, g: &GroupKey) -> Option<ParserWriteMode> {
        self.state.group_mode.get(g).copied()
    }

    fn field_slices(&self, f: FieldId) -> Vec<AllocSlice> {
        self.state.by_field.get(&f).cloned().unwrap_or_default()
    }

    fn occupied(&self) -> Vec<Container> {
        self.state.containers
            .iter()
            .filter(|(_, st)| !st.is_empty())
            .map(|(c, _)| *c)
            .collect()
    }

    fn accumulated(&self) -> TxDiff {
        TxDiff::default()
    }

    fn root(&self) -> &dyn AllocView {
        self
    }
}

/// A speculative child view. See the module docs.
#[derive(Clone)]
pub struct Transaction<'p> {
    parent: &'p dyn AllocView,
    diff:   TxDiff,
}

impl<'p> Transaction<'p> {
    pub fn new(parent: &'p dyn AllocView) -> Self {
        Self {
            parent,
            diff:   TxDiff::default(),
        }
    }

    /// Re-attaches a detached write set to `parent`.
    pub fn from_diff(parent: &'p dyn AllocView, diff: TxDiff) -> Self {
        Self { parent, diff }
    }

    pub fn diff(&self) -> &TxDiff {
        &self.diff
    }

    /// Detaches the write set, ending the borrow of the parent.
    pub fn into_diff(self) -> TxDiff {
        self.diff
    }

    /// Merges a child's write set into this transaction.
    pub fn commit(&mut self, diff: TxDiff) {
        self.diff.merge(diff);
    }

    pub fn new_slices(&self) -> impl Iterator<Item = &AllocSlice> {
        self.diff.new_slices()
    }

    /// Records a placement. Container and group bookkeeping (gress, parser
    /// write mode) is updated along the way; the caller is responsible for
    /// having checked that the slice fits.
    pub fn add_slice(&mut self, slice: AllocSlice, field: &Field, device: &PhvSpec) {
        debug_assert!(slice.field() == field.id);
        let c = slice.container;
        let parent = self.parent;
        let status = self.diff.containers
            .entry(c)
            .or_insert_with(|| parent.status(&c).cloned().unwrap_or_default());
        status.slices.push(slice);
        if !field.padding {
            status.gress = Some(field.gress);
        }
        if field.extracted {
            status.write_mode = Some(field.write_mode);
            if let Some(g) = device.parser_group(&c) {
                self.diff.group_gress.insert(g, field.gress);
                self.diff.group_mode.insert(g, field.write_mode);
            }
        }
        if field.deparsed {
            if let Some(g) = device.deparser_group(&c) {
                self.diff.group_gress.insert(g, field.gress);
            }
        }
        self.diff.by_field.entry(field.id).or_default().push(slice);
    }
}

impl AllocView for Transaction<'_> {
    fn status(&self, c: &Container) -> Option<&ContainerStatus> {
        match self.diff.containers.get(c) {
            Some(st) => Some(st),
            None => self.parent.status(c),
        }
    }

    fn group_gress(&self, g: &GroupKey) -> Option<Gress> {
        self.diff.group_gress
            .get(g)
            .copied()
            .or_else(|| self.parent.group_gress(g))
    }

    fn group_write_mode(&self, g: &GroupKey) -> Option<ParserWriteMode> {
        self.diff.group_mode
            .get(g)
            .copied()
            .or_else(|| self.parent.group_write_mode(g))
    }

    fn field_slices(&self, f: FieldId) -> Vec<AllocSlice> {
        let mut res = self.parent.field_slices(f);
        if let Some(mine) = self.diff.by_field.get(&f) {
            res.extend(mine.iter().copied());
        }

        res
    }

    fn occupied(&self) -> Vec<Container> {
        let mut res: IndexSet<Container> = self.parent.occupied().into_iter().collect();
        for (c, st) in &self.diff.containers {
            if !st.is_empty() {
                res.insert(*c);
            }
        }

        res.into_iter().collect()
    }

    fn accumulated(&self) -> TxDiff {
        let mut res = self.parent.accumulated();
        res.merge(self.diff.clone());

        res
    }

    fn root(&self) -> &dyn AllocView {
        self.parent.root()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (PhvInfo, PhvSpec, FieldId, FieldId) {
        let mut phv = PhvInfo::new();
        let a = phv.add_field(Field::new("a", 4, Gress::Ingress));
        let b = phv.add_field(Field::new("b", 4, Gress::Ingress));

        (phv, PhvSpec::default(), a, b)
    }

    #[test]
    fn child_sees_parent_parent_does_not_see_child() {
        let (phv, spec, a, b) = setup();
        let c = Container::new(ContainerKind::Normal, ContainerSize::B8, 0);
        let mut alloc = Allocation::new();
        let mut base = Transaction::new(&alloc);
        base.add_slice(AllocSlice::new(phv.field(a).whole(), c, 0), phv.field(a), &spec);
        let d = base.into_diff();
        alloc.commit(d);

        let mut child = Transaction::new(&alloc);
        child.add_slice(AllocSlice::new(phv.field(b).whole(), c, 4), phv.field(b), &spec);
        assert_eq!(child.status(&c).unwrap().slices.len(), 2);
        assert_eq!(alloc.status(&c).unwrap().slices.len(), 1);
        drop(child);
        assert_eq!(alloc.status(&c).unwrap().slices.len(), 1);
        assert_eq!(alloc.field_slices(a).len(), 1);
        assert!(alloc.field_slices(b).is_empty());
    }

    #[test]
    fn nested_commit_and_accumulate() {
        let (phv, spec, a, b) = setup();
        let c0 = Container::new(ContainerKind::Normal, ContainerSize::B8, 0);
        let c1 = Container::new(ContainerKind::Normal, ContainerSize::B8, 1);
        let alloc = Allocation::new();
        let mut outer = Transaction::new(&alloc);
        outer.add_slice(AllocSlice::new(phv.field(a).whole(), c0, 0), phv.field(a), &spec);
        let mut inner = Transaction::new(&outer);
        inner.add_slice(AllocSlice::new(phv.field(b).whole(), c1, 0), phv.field(b), &spec);
        let acc = inner.accumulated();
        assert_eq!(acc.new_slices().count(), 2);
        let d = inner.into_diff();
        outer.commit(d);
        assert_eq!(outer.occupied().len(), 2);
        assert_eq!(outer.field_slices(b).len(), 1);
    }

    #[test]
    fn group_gress_follows_extracted_fields() {
        let (mut phv, spec, a, _) = setup();
        phv.field_mut(a).extracted = true;
        let c = Container::new(ContainerKind::Normal, ContainerSize::B8, 1);
        let alloc = Allocation::new();
        let mut tx = Transaction::new(&alloc);
        tx.add_slice(AllocSlice::new(phv.field(a).whole(), c, 0), phv.field(a), &spec);
        let g = spec.parser_group(&c).unwrap();
        assert_eq!(tx.group_gress(&g), Some(Gress::Ingress));
        assert_eq!(alloc.group_gress(&g), None);
    }

    #[test]
    fn used_bits_counts_union() {
        let (phv, spec, a, b) = setup();
        let c = Container::new(ContainerKind::Normal, ContainerSize::B8, 0);
        let alloc = Allocation::new();
        let mut tx = Transaction::new(&alloc);
        tx.add_slice(AllocSlice::new(phv.field(a).whole(), c, 0), phv.field(a), &spec);
        tx.add_slice(AllocSlice::new(phv.field(b).whole(), c, 2), phv.field(b), &spec);
        assert_eq!(tx.status(&c).unwrap().used_bits(), 6);
    }
}
