use crate::helpe::*;

impl Container {
    pub fn new(kind: ContainerKind, size: ContainerSize, index: u32) -> Self {
        Self { kind, size, index }
    }

    /// A pseudo-container for speculative placements. Never backed by
    /// hardware, never committed.
    pub fn speculative(size: ContainerSize, n: u32) -> Self {
        Self {
            kind:   ContainerKind::Normal,
            size,
            index:  SPECULATIVE_BASE + n,
        }
    }

    #[inline(always)]
    pub fn is_speculative(&self) -> bool {
        self.index >= SPECULATIVE_BASE
    }

    #[inline(always)]
    pub fn width(&self) -> Bits {
        self.size.bits()
    }

    /// Same kind and size, `delta` indices away.
    pub fn offset_by(&self, delta: u32) -> Self {
        Self { index: self.index + delta, ..*self }
    }
}

/// A hardware group whose containers must agree on gress (and, for parser
/// groups, on write mode).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GroupKey {
    Parser(ContainerKind, ContainerSize, u32),
    Deparser(ContainerKind, ContainerSize, u32),
}

/// Containers of one width sharing a read/write port budget, in the order
/// the group allocator visits them: by kind preference, then by index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerGroup {
    pub size:       ContainerSize,
    containers:     Vec<Container>,
}

impl ContainerGroup {
    pub fn new(size: ContainerSize, containers: Vec<Container>) -> Self {
        assert!(containers.iter().all(|c| c.size == size), "Mixed widths in one group");
        Self {
            size,
            containers: containers.into_iter()
                .sorted_by_key(|c| (c.kind, c.index))
                .dedup()
                .collect(),
        }
    }

    pub fn containers(&self) -> &[Container] {
        &self.containers
    }

    pub fn of_kind(&self, kind: ContainerKind) -> impl Iterator<Item = &Container> + '_ {
        self.containers.iter().filter(move |c| c.kind == kind)
    }

    #[inline(always)]
    pub fn contains(&self, c: &Container) -> bool {
        self.containers.binary_search_by_key(&(c.kind, c.index), |x| (x.kind, x.index)).is_ok()
            && c.size == self.size
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}

pub type ContainerGroupsBySize = IndexMap<ContainerSize, Vec<ContainerGroup>>;

/// The device description: container inventory plus the hardware wiring
/// groups that constrain gress and parser write modes.
///
/// Containers of a `(kind, size)` are numbered `0..count`. MAU groups split
/// every such index space into `mau_groups` equal runs; parser and deparser
/// groups are runs of `parser_group_width` / `deparser_group_width`
/// consecutive indices.
#[derive(Debug, Clone)]
pub struct PhvSpec {
    inventory:              IndexMap<(ContainerKind, ContainerSize), u32>,
    pub mau_groups:         u32,
    parser_group_width:     IndexMap<ContainerSize, u32>,
    deparser_group_width:   IndexMap<ContainerSize, u32>,
    /// This container cannot be clear-on-write on this device variant.
    pub clear_on_write_erratum: Option<Container>,
    unbounded:              bool,
}

impl Default for PhvSpec {
    /// Four MAU groups per width, each with twelve normal, four mocha and
    /// four dark containers.
    fn default() -> Self {
        let mut spec = Self::new();
        for size in SIZE_ORDER {
            spec.add_containers(ContainerKind::Normal, size, 48);
            spec.add_containers(ContainerKind::Mocha, size, 16);
            spec.add_containers(ContainerKind::Dark, size, 16);
        }
        spec.mau_groups = 4;

        spec
    }
}

impl PhvSpec {
    /// An empty device, to be filled with [`PhvSpec::add_containers`].
    pub fn new() -> Self {
        Self {
            inventory:              IndexMap::new(),
            mau_groups:             1,
            parser_group_width:     IndexMap::from([
                (ContainerSize::B8, 4),
                (ContainerSize::H16, 2),
                (ContainerSize::W32, 1),
            ]),
            deparser_group_width:   IndexMap::from([
                (ContainerSize::B8, 8),
                (ContainerSize::H16, 8),
                (ContainerSize::W32, 8),
            ]),
            clear_on_write_erratum: None,
            unbounded:              false,
        }
    }

    /// The idealized device of the trivial allocator: every container
    /// exists, there is no hardware grouping.
    pub fn unbounded() -> Self {
        Self {
            inventory:              IndexMap::new(),
            mau_groups:             1,
            parser_group_width:     IndexMap::new(),
            deparser_group_width:   IndexMap::new(),
            clear_on_write_erratum: None,
            unbounded:              true,
        }
    }

    pub fn add_containers(&mut self, kind: ContainerKind, size: ContainerSize, count: u32) {
        *self.inventory.entry((kind, size)).or_insert(0) += count;
    }

    pub fn set_parser_group_width(&mut self, size: ContainerSize, width: u32) {
        assert!(width > 0);
        self.parser_group_width.insert(size, width);
    }

    pub fn set_deparser_group_width(&mut self, size: ContainerSize, width: u32) {
        assert!(width > 0);
        self.deparser_group_width.insert(size, width);
    }

    pub fn count(&self, kind: ContainerKind, size: ContainerSize) -> u32 {
        self.inventory.get(&(kind, size)).copied().unwrap_or(0)
    }

    /// Widths for which the device has at least one container.
    pub fn sizes(&self) -> Vec<ContainerSize> {
        if self.unbounded {
            return SIZE_ORDER.to_vec();
        }
        SIZE_ORDER.into_iter()
            .filter(|s| KIND_ORDER.iter().any(|k| self.count(*k, *s) > 0))
            .collect()
    }

    #[inline(always)]
    pub fn contains(&self, c: &Container) -> bool {
        if c.is_speculative() {
            false
        } else if self.unbounded {
            true
        } else {
            c.index < self.count(c.kind, c.size)
        }
    }

    pub fn mau_group(&self, c: &Container) -> u32 {
        let count = self.count(c.kind, c.size).max(1);
        let per_group = count.div_ceil(self.mau_groups.max(1)).max(1);
        (c.index / per_group).min(self.mau_groups.max(1) - 1)
    }

    pub fn parser_group(&self, c: &Container) -> Option<GroupKey> {
        if c.is_speculative() { return None; }
        self.parser_group_width
            .get(&c.size)
            .map(|w| GroupKey::Parser(c.kind, c.size, c.index / w))
    }

    pub fn deparser_group(&self, c: &Container) -> Option<GroupKey> {
        if c.is_speculative() { return None; }
        self.deparser_group_width
            .get(&c.size)
            .map(|w| GroupKey::Deparser(c.kind, c.size, c.index / w))
    }

    /// Builds every MAU container group, partitioned by width.
    pub fn groups_by_size(&self) -> ContainerGroupsBySize {
        let mut res: ContainerGroupsBySize = IndexMap::new();
        for size in self.sizes() {
            let mut buckets: BTreeMap<u32, Vec<Container>> = BTreeMap::new();
            for kind in KIND_ORDER {
                for index in 0..self.count(kind, size) {
                    let c = Container::new(kind, size, index);
                    buckets.entry(self.mau_group(&c))
                        .or_default()
                        .push(c);
                }
            }
            res.insert(
                size,
                buckets.into_values()
                    .map(|cs| ContainerGroup::new(size, cs))
                    .collect()
            );
        }

        res
    }
}
