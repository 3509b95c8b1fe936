use crate::helpe::*;

/// Chunk widths tried, coarsest first.
const CHUNKS: [Bits; 3] = [32, 16, 8];

impl SuperCluster {
    /// The cluster itself followed by up to `max - 1` re-sliced variants, in
    /// which every list is cut at multiples of 32, 16 and 8 bits. Cuts are
    /// propagated to every member of an aligned cluster so that members keep
    /// equal widths. Lists carrying wide-arith or stride obligations keep
    /// their list boundaries.
    pub fn slicings(&self, max: usize) -> Vec<SuperCluster> {
        let mut seen: AHashSet<Vec<Vec<FieldSlice>>> = AHashSet::new();
        seen.insert(self.lists().map(|(l, _)| self.list_slices(l)).collect());
        let mut res = vec![self.clone()];
        for chunk in CHUNKS {
            if res.len() >= max {
                break;
            }
            if let Some(v) = self.split_lists(chunk) {
                let key = v.lists().map(|(l, _)| v.list_slices(l)).collect_vec();
                if seen.insert(key) {
                    res.push(v);
                }
            }
        }

        res
    }

    fn pinned_lists(&self) -> AHashSet<SliceListId> {
        self.wide_arith()
            .iter()
            .flat_map(|(lo, hi)| [*lo, *hi])
            .chain(self.strides().iter().flat_map(|s| s.lists.iter().copied()))
            .collect()
    }

    fn split_lists(&self, chunk: Bits) -> Option<SuperCluster> {
        let pinned = self.pinned_lists();
        let n = self.slices().len();
        let mut cuts: Vec<BTreeSet<Bits>> = vec![BTreeSet::new(); n];
        for (lid, list) in self.lists() {
            if pinned.contains(&lid) {
                continue;
            }
            let mut at = 0;
            for s in &list.slices {
                let w = self.slice(*s).size();
                let mut b = chunk;
                while b < at + w {
                    if b > at {
                        cuts[s.0 as usize].insert(b - at);
                    }
                    b += chunk;
                }
                at += w;
            }
        }
        // Aligned members must be cut alike.
        let mut changed = true;
        while changed {
            changed = false;
            for c in 0..self.num_aligned() {
                let members = &self.aligned_cluster(AlignedClusterId(c as u32)).slices;
                let all: BTreeSet<Bits> = members.iter()
                    .flat_map(|s| cuts[s.0 as usize].iter().copied())
                    .collect();
                for s in members {
                    if cuts[s.0 as usize] != all {
                        cuts[s.0 as usize] = all.clone();
                        changed = true;
                    }
                }
            }
        }
        if cuts.iter().all(|c| c.is_empty()) {
            return None;
        }

        let pieces: Vec<Vec<FieldSlice>> = (0..n)
            .map(|i| {
                let fs = self.slice(SliceId(i as u32));
                let mut res = vec![];
                let mut lo = 0;
                let size = fs.size();
                for cut in cuts[i].iter().chain(std::iter::once(&size)) {
                    res.push(FieldSlice::new(fs.field, fs.range.lo + lo, fs.range.lo + cut - 1));
                    lo = *cut;
                }
                res
            })
            .collect();

        let mut lists: Vec<Vec<FieldSlice>> = vec![];
        let mut remap: AHashMap<SliceListId, SliceListId> = AHashMap::new();
        for (lid, list) in self.lists() {
            let all = list.slices.iter().flat_map(|s| pieces[s.0 as usize].iter().copied());
            if pinned.contains(&lid) {
                remap.insert(lid, SliceListId(lists.len() as u32));
                lists.push(all.collect());
                continue;
            }
            let mut at = 0;
            let mut cur = vec![];
            for fs in all {
                if at > 0 && at % chunk == 0 && !cur.is_empty() {
                    lists.push(std::mem::take(&mut cur));
                }
                at += fs.size();
                cur.push(fs);
            }
            lists.push(cur);
        }
        let aligned = (0..self.num_aligned())
            .flat_map(|c| {
                let members = &self.aligned_cluster(AlignedClusterId(c as u32)).slices;
                let k = pieces[members[0].0 as usize].len();
                (0..k).map(|i| {
                    members.iter().map(|s| pieces[s.0 as usize][i]).collect_vec()
                }).collect_vec()
            })
            .filter(|c| c.len() > 1)
            .collect();

        let mut res = SuperCluster::new(lists, aligned, vec![]).with_id(self.id);
        for (lo, hi) in self.wide_arith() {
            res = res.with_wide_arith(remap[lo], remap[hi]);
        }
        for st in self.strides() {
            res = res.with_stride(st.lists.iter().map(|l| remap[l]).collect(), st.step);
        }

        Some(res)
    }

    /// Splits the cluster into independent sub-clusters. Lists are linked by
    /// shared aligned clusters, wide-arith pairs and strides.
    pub fn components(&self) -> Vec<SuperCluster> {
        let n = self.num_lists();
        let mut parent: Vec<usize> = (0..n).collect();
        fn find(parent: &mut Vec<usize>, x: usize) -> usize {
            let mut r = x;
            while parent[r] != r {
                r = parent[r];
            }
            let mut y = x;
            while parent[y] != r {
                let next = parent[y];
                parent[y] = r;
                y = next;
            }
            r
        }
        let union = |parent: &mut Vec<usize>, a: SliceListId, b: SliceListId| {
            let (ra, rb) = (find(parent, a.0 as usize), find(parent, b.0 as usize));
            if ra != rb {
                parent[ra.max(rb)] = ra.min(rb);
            }
        };
        for c in 0..self.num_aligned() {
            let members = &self.aligned_cluster(AlignedClusterId(c as u32)).slices;
            for (x, y) in members.iter().tuple_windows() {
                union(&mut parent, self.list_of(*x), self.list_of(*y));
            }
        }
        for (lo, hi) in self.wide_arith() {
            union(&mut parent, *lo, *hi);
        }
        for st in self.strides() {
            for (x, y) in st.lists.iter().tuple_windows() {
                union(&mut parent, *x, *y);
            }
        }

        let mut groups: IndexMap<usize, Vec<SliceListId>> = IndexMap::new();
        for l in 0..n {
            let r = find(&mut parent, l);
            groups.entry(r).or_default().push(SliceListId(l as u32));
        }
        if groups.len() == 1 {
            return vec![self.clone()];
        }

        groups.into_values()
            .map(|keep| self.restrict(&keep))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_list_splits_at_bytes() {
        let mut phv = PhvInfo::new();
        let a = phv.add_field(Field::new("a", 12, Gress::Ingress));
        let b = phv.add_field(Field::new("b", 12, Gress::Ingress));
        let sc = SuperCluster::new(
            vec![vec![phv.field(a).whole(), phv.field(b).whole()]], vec![], vec![],
        );
        let vs = sc.slicings(8);
        // 24 bits fit in 32, so the 32-bit chunking is a no-op.
        assert_eq!(vs.len(), 3);
        let halves = &vs[1];
        assert_eq!(halves.num_lists(), 2);
        assert_eq!(halves.list_width(SliceListId(0)), 16);
        assert_eq!(halves.list_width(SliceListId(1)), 8);
        let bytes = &vs[2];
        assert_eq!(bytes.num_lists(), 3);
        assert!(bytes.lists().all(|(l, _)| bytes.list_width(l) == 8));
    }

    #[test]
    fn cuts_follow_aligned_members() {
        let mut phv = PhvInfo::new();
        let a = phv.add_field(Field::new("a", 4, Gress::Ingress));
        let b = phv.add_field(Field::new("b", 8, Gress::Ingress));
        let c = phv.add_field(Field::new("c", 8, Gress::Ingress));
        let fb = phv.field(b).whole();
        let fc = phv.field(c).whole();
        let sc = SuperCluster::new(
            vec![vec![phv.field(a).whole(), fb], vec![fc]],
            vec![vec![fb, fc]],
            vec![],
        );
        let bytes = sc.split_lists(8).unwrap();
        // b is cut at 4 bits, so c is too.
        assert!(bytes.slices().contains(&FieldSlice::new(c, 0, 3)));
        assert!(bytes.slices().contains(&FieldSlice::new(c, 4, 7)));
    }

    #[test]
    fn components_split_unrelated_lists() {
        let mut phv = PhvInfo::new();
        let a = phv.add_field(Field::new("a", 4, Gress::Ingress));
        let b = phv.add_field(Field::new("b", 4, Gress::Ingress));
        let c = phv.add_field(Field::new("c", 4, Gress::Ingress));
        let fa = phv.field(a).whole();
        let fb = phv.field(b).whole();
        let sc = SuperCluster::new(vec![vec![fa], vec![fb]], vec![vec![fa, fb]], vec![phv.field(c).whole()]);
        let comps = sc.components();
        assert_eq!(comps.len(), 2);
        assert_eq!(comps[0].num_lists(), 2);
        assert_eq!(comps[1].num_lists(), 1);
    }
}
