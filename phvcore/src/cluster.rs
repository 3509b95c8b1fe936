//! Co-allocation units.
//!
//! A [`SuperCluster`] is an arena of [`FieldSlice`]s. Slice lists and aligned
//! clusters are index sets over that arena, so the same slice can be viewed
//! from both sides without aliasing.

use crate::helpe::*;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SliceId(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AlignedClusterId(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SliceListId(pub u32);

/// Slices packed contiguously, lsb first, into one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceList {
    pub slices: Vec<SliceId>,
}

/// Slices that must all start at the same container bit, wherever they land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignedCluster {
    pub slices: Vec<SliceId>,
}

/// Header-stack replicas: list `i` goes to the leader's index plus
/// `i * step`, at the leader's start bit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrideGroup {
    pub lists:  Vec<SliceListId>,
    pub step:   u32,
}

#[derive(Debug, Clone)]
pub struct SuperCluster {
    pub id:         u32,
    slices:         Vec<FieldSlice>,
    slice_cluster:  Vec<AlignedClusterId>,
    slice_list:     Vec<SliceListId>,
    aligned:        Vec<AlignedCluster>,
    lists:          Vec<SliceList>,
    /// (lo, hi) halves of one double-width value.
    wide_arith:     Vec<(SliceListId, SliceListId)>,
    strides:        Vec<StrideGroup>,
}

impl SuperCluster {
    /// Builds a well-formed cluster or panics. Slices named by no list become
    /// singleton lists, slices named by no aligned cluster become singleton
    /// clusters. Lists keep the order given; singletons follow.
    pub fn new(
        lists:      Vec<Vec<FieldSlice>>,
        aligned:    Vec<Vec<FieldSlice>>,
        standalone: Vec<FieldSlice>,
    ) -> Self {
        let mut arena: IndexSet<FieldSlice> = IndexSet::new();
        for fs in lists.iter().flatten().chain(aligned.iter().flatten()).chain(standalone.iter()) {
            arena.insert(*fs);
        }
        for (a, b) in arena.iter().tuple_combinations() {
            assert!(
                a.field != b.field || !a.range.overlaps(&b.range),
                "Overlapping slices {:?} and {:?} in one super cluster", a, b
            );
        }
        let slices: Vec<FieldSlice> = arena.iter().copied().collect();
        let sid = |fs: &FieldSlice| SliceId(arena.get_index_of(fs).unwrap() as u32);

        let mut slice_cluster: Vec<Option<AlignedClusterId>> = vec![None; slices.len()];
        let mut clusters = vec![];
        for members in aligned {
            let id = AlignedClusterId(clusters.len() as u32);
            let width = members[0].size();
            let mut ids = vec![];
            for fs in &members {
                assert_eq!(fs.size(), width, "Unequal widths in aligned cluster");
                let s = sid(fs);
                assert!(slice_cluster[s.0 as usize].is_none(), "Slice in two aligned clusters");
                slice_cluster[s.0 as usize] = Some(id);
                ids.push(s);
            }
            clusters.push(AlignedCluster { slices: ids });
        }
        let slice_cluster = slice_cluster.into_iter()
            .enumerate()
            .map(|(i, c)| c.unwrap_or_else(|| {
                let id = AlignedClusterId(clusters.len() as u32);
                clusters.push(AlignedCluster { slices: vec![SliceId(i as u32)] });
                id
            }))
            .collect();

        let mut slice_list: Vec<Option<SliceListId>> = vec![None; slices.len()];
        let mut all_lists = vec![];
        for members in lists {
            assert!(!members.is_empty(), "Empty slice list");
            let id = SliceListId(all_lists.len() as u32);
            let mut ids = vec![];
            for fs in &members {
                let s = sid(fs);
                assert!(slice_list[s.0 as usize].is_none(), "Slice in two slice lists");
                slice_list[s.0 as usize] = Some(id);
                ids.push(s);
            }
            all_lists.push(SliceList { slices: ids });
        }
        let slice_list = slice_list.into_iter()
            .enumerate()
            .map(|(i, l)| l.unwrap_or_else(|| {
                let id = SliceListId(all_lists.len() as u32);
                all_lists.push(SliceList { slices: vec![SliceId(i as u32)] });
                id
            }))
            .collect();

        Self {
            id:             0,
            slices,
            slice_cluster,
            slice_list,
            aligned:        clusters,
            lists:          all_lists,
            wide_arith:     vec![],
            strides:        vec![],
        }
    }

    pub fn with_id(mut self, id: u32) -> Self {
        self.id = id;
        self
    }

    pub fn with_wide_arith(mut self, lo: SliceListId, hi: SliceListId) -> Self {
        assert!(lo != hi && (lo.0 as usize) < self.lists.len() && (hi.0 as usize) < self.lists.len());
        self.wide_arith.push((lo, hi));
        self
    }

    pub fn with_stride(mut self, lists: Vec<SliceListId>, step: u32) -> Self {
        assert!(lists.len() > 1 && step > 0, "Degenerate stride");
        let w = self.list_width(lists[0]);
        assert!(lists.iter().all(|l| self.list_width(*l) == w), "Stride replicas differ in width");
        self.strides.push(StrideGroup { lists, step });
        self
    }

    #[inline(always)]
    pub fn slice(&self, id: SliceId) -> FieldSlice {
        self.slices[id.0 as usize]
    }

    pub fn slices(&self) -> &[FieldSlice] {
        &self.slices
    }

    /// Slices of this cluster holding bits of `fs`, each paired with the
    /// part of `fs` it holds. Bits held elsewhere are left out.
    pub fn slices_covering(&self, fs: &FieldSlice) -> Vec<(SliceId, FieldSlice)> {
        self.slices.iter()
            .enumerate()
            .filter(|(_, s)| s.field == fs.field)
            .filter_map(|(i, s)| {
                s.range.intersect(&fs.range)
                    .map(|range| (SliceId(i as u32), FieldSlice { field: fs.field, range }))
            })
            .collect()
    }

    /// Where list `lid` must start for bit `part.range.lo` of slice `sid`
    /// (a member of `lid`) to land at container bit `at`.
    pub fn list_start_for(&self, sid: SliceId, part: &FieldSlice, at: Bits) -> Option<Bits> {
        let lid = self.list_of(sid);
        let mut offset = 0;
        for s in &self.list(lid).slices {
            if *s == sid {
                break;
            }
            offset += self.slice(*s).size();
        }
        offset += part.range.lo - self.slice(sid).range.lo;
        at.checked_sub(offset)
    }

    #[inline(always)]
    pub fn cluster_of(&self, id: SliceId) -> AlignedClusterId {
        self.slice_cluster[id.0 as usize]
    }

    #[inline(always)]
    pub fn list_of(&self, id: SliceId) -> SliceListId {
        self.slice_list[id.0 as usize]
    }

    pub fn aligned_cluster(&self, id: AlignedClusterId) -> &AlignedCluster {
        &self.aligned[id.0 as usize]
    }

    pub fn num_aligned(&self) -> usize {
        self.aligned.len()
    }

    pub fn lists(&self) -> impl Iterator<Item = (SliceListId, &SliceList)> + '_ {
        self.lists.iter()
            .enumerate()
            .map(|(i, l)| (SliceListId(i as u32), l))
    }

    pub fn num_lists(&self) -> usize {
        self.lists.len()
    }

    pub fn list(&self, id: SliceListId) -> &SliceList {
        &self.lists[id.0 as usize]
    }

    pub fn list_slices(&self, id: SliceListId) -> Vec<FieldSlice> {
        self.list(id).slices.iter().map(|s| self.slice(*s)).collect()
    }

    pub fn list_width(&self, id: SliceListId) -> Bits {
        self.list(id).slices.iter().map(|s| self.slice(*s).size()).sum()
    }

    pub fn wide_arith(&self) -> &[(SliceListId, SliceListId)] {
        &self.wide_arith
    }

    pub fn strides(&self) -> &[StrideGroup] {
        &self.strides
    }

    pub fn fields(&self) -> BTreeSet<FieldId> {
        self.slices.iter().map(|s| s.field).collect()
    }

    pub fn total_width(&self) -> Bits {
        self.slices.iter().map(|s| s.size()).sum()
    }

    /// The container lsb of every slice of `id` if the list starts at `start`.
    pub fn place_list(&self, id: SliceListId, start: Bits) -> Vec<(FieldSlice, Bits)> {
        let mut at = start;
        self.list(id).slices
            .iter()
            .map(|s| {
                let fs = self.slice(*s);
                let res = (fs, at);
                at += fs.size();
                res
            })
            .collect()
    }

    /// Starts at which every member of aligned cluster `id` satisfies its
    /// own field's placement pragmas within a `width`-bit container.
    pub fn cluster_positions(&self, phv: &PhvInfo, id: AlignedClusterId, width: Bits) -> Vec<Bits> {
        let members = &self.aligned_cluster(id).slices;
        let w = self.slice(members[0]).size();
        if w > width {
            return vec![];
        }
        (0..=width - w)
            .filter(|p| members.iter().all(|s| slice_fits_at(phv, &self.slice(*s), *p)))
            .collect()
    }

    /// Legal starts of list `id` in a `width`-bit container given what is
    /// already decided about cluster alignment.
    pub fn list_starts(
        &self,
        phv:        &PhvInfo,
        id:         SliceListId,
        width:      Bits,
        decided:    &ScAllocAlignment,
    ) -> Vec<Bits> {
        let total = self.list_width(id);
        if total > width {
            return vec![];
        }
        let exact = self.list_slices(id)
            .iter()
            .any(|fs| phv.field(fs.field).exact_containers);
        if exact && total != width {
            return vec![];
        }
        let cluster_ok: AHashMap<AlignedClusterId, Vec<Bits>> = self.list(id).slices
            .iter()
            .map(|s| self.cluster_of(*s))
            .unique()
            .map(|c| (c, self.cluster_positions(phv, c, width)))
            .collect();

        (0..=width - total)
            .filter(|start| !exact || *start == 0)
            .filter(|start| {
                let mut local = decided.clone();
                self.list(id).slices
                    .iter()
                    .zip(self.place_list(id, *start))
                    .all(|(s, (_, p))| {
                        let c = self.cluster_of(*s);
                        cluster_ok[&c].contains(&p) && local.insert(c, p)
                    })
            })
            .collect()
    }

    /// A sub-cluster made of the given lists only. Wide-arith pairs and
    /// strides survive if all of their lists do.
    pub fn restrict(&self, keep: &[SliceListId]) -> Self {
        let keep_set: AHashSet<SliceListId> = keep.iter().copied().collect();
        let lists = keep.iter().map(|l| self.list_slices(*l)).collect_vec();
        let kept_slices: AHashSet<FieldSlice> = lists.iter().flatten().copied().collect();
        let aligned = self.aligned
            .iter()
            .map(|c| c.slices.iter().map(|s| self.slice(*s)).filter(|fs| kept_slices.contains(fs)).collect_vec())
            .filter(|c| c.len() > 1)
            .collect();
        let mut res = Self::new(lists, aligned, vec![]).with_id(self.id);
        let remap = |l: &SliceListId| SliceListId(keep.iter().position(|k| k == l).unwrap() as u32);
        for (lo, hi) in &self.wide_arith {
            if keep_set.contains(lo) && keep_set.contains(hi) {
                res = res.with_wide_arith(remap(lo), remap(hi));
            }
        }
        for st in &self.strides {
            if st.lists.iter().all(|l| keep_set.contains(l)) {
                res = res.with_stride(st.lists.iter().map(remap).collect(), st.step);
            }
        }

        res
    }

    pub fn fmt_list(&self, phv: &PhvInfo, id: SliceListId) -> String {
        format!(
            "[{}]",
            self.list_slices(id).iter().map(|fs| phv.fmt_slice(fs)).join(" ")
        )
    }
}

/// Field-level pragmas for one slice at container bit `p`.
fn slice_fits_at(phv: &PhvInfo, fs: &FieldSlice, p: Bits) -> bool {
    let f = phv.field(fs.field);
    if let Some(a) = f.alignment {
        if (p % 8 + 8 - fs.range.lo % 8) % 8 != a % 8 {
            return false;
        }
    }
    if f.deparsed_bottom_bits && fs.range.lo == 0 && p != 0 {
        return false;
    }

    true
}

/// Decided start bits of aligned clusters for one container width.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScAllocAlignment {
    starts: IndexMap<AlignedClusterId, Bits>,
}

impl ScAllocAlignment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: AlignedClusterId) -> Option<Bits> {
        self.starts.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    /// Returns false, leaving `self` as is, if `id` is already bound elsewhere.
    pub fn insert(&mut self, id: AlignedClusterId, start: Bits) -> bool {
        match self.starts.get(&id) {
            Some(s) => *s == start,
            None => {
                self.starts.insert(id, start);
                true
            }
        }
    }

    /// Binds every aligned cluster touched by list `id` placed at `start`.
    /// All or nothing.
    pub fn record_list(&mut self, sc: &SuperCluster, id: SliceListId, start: Bits) -> bool {
        let mut next = self.clone();
        for (s, (_, p)) in sc.list(id).slices.iter().zip(sc.place_list(id, start)) {
            if !next.insert(sc.cluster_of(*s), p) {
                return false;
            }
        }
        *self = next;

        true
    }

    /// Union of two consistent alignments. All or nothing.
    pub fn merge(&mut self, other: &Self) -> bool {
        let mut next = self.clone();
        for (c, s) in &other.starts {
            if !next.insert(*c, *s) {
                return false;
            }
        }
        *self = next;

        true
    }
}
