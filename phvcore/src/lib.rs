//! Welcome to `phvcore`!
//!
//! The container allocation search engine of a packet-pipeline compiler
//! backend. Every live value of a compiled program must be pinned to a bit
//! range of some fixed-width hardware *container* (8, 16 or 32 bits wide,
//! one of four kinds). Values arrive here already clustered into
//! [`SuperCluster`]s: closed sets of [`FieldSlice`]s that must be decided
//! together. The engine packs them into containers through a scored,
//! backtracking depth-first search over copy-on-branch [`Transaction`]s.

/// Bumps an [`AllocatorMetrics`] counter.
macro_rules! stat {
    ($stats:expr, $field:ident) => {
        $stats.$field += 1
    };
    ($stats:expr, $field:ident, $count:expr) => {
        $stats.$field += $count
    };
}

mod field;
mod container;
mod score;
mod slicing;

pub mod alloc;
pub mod actions;
pub mod algo;
pub mod checks;
pub mod cluster;
pub mod config;
pub mod copack;
pub mod error;
pub mod helpe;
pub mod metrics;
pub mod oracle;
pub mod problem;

pub use crate::helpe::*;

/// A named program value that needs container bits.
///
/// Fields never move after registration in [`PhvInfo`]; everything else in
/// the crate refers to them by [`FieldId`]. The boolean flags mirror what the
/// upstream "uses" analysis and the pragma layer computed for the field.
#[derive(Debug, Clone)]
pub struct Field {
    pub id:                     FieldId,
    pub name:                   String,
    pub size:                   Bits,
    pub gress:                  Gress,
    /// Must not share a container with any other non-padding field.
    pub solitary:               bool,
    /// Padding is trivial: it never conflicts with solitary fields.
    pub padding:                bool,
    pub extracted:              bool,
    pub deparsed:               bool,
    pub write_mode:             ParserWriteMode,
    pub mocha_candidate:        bool,
    pub dark_candidate:         bool,
    pub tagalong_candidate:     bool,
    /// Pragma-forced container kind.
    pub required_kind:          Option<ContainerKind>,
    /// Pragma-forced container size.
    pub required_size:          Option<ContainerSize>,
    /// Bit position (modulo 8) at which the field's lsb must land.
    pub alignment:              Option<Bits>,
    pub max_container_bytes:    Option<usize>,
    /// Slice lists holding this field must fill their container exactly.
    pub exact_containers:       bool,
    /// The lsb of the field must sit at container bit 0.
    pub deparsed_bottom_bits:   bool,
    /// Matched on by some table; placements crossing fewer bytes are cheaper.
    pub table_key:              bool,
    // Final placement facts, written back once a super cluster commits.
    alloc:                      Vec<AllocSlice>,
}

/// A contiguous bit sub-range of a [`Field`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldSlice {
    pub field:  FieldId,
    pub range:  BitRange,
}

/// One fixed-width hardware storage slot.
///
/// Containers of one `(kind, size)` share a single contiguous index space.
/// Indices at or above [`SPECULATIVE_BASE`] never exist on a device; they
/// are handed out to pseudo-placements during speculation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Container {
    pub kind:   ContainerKind,
    pub size:   ContainerSize,
    pub index:  u32,
}

/// The atomic placement fact: bits `slice.range` of a field live in bits
/// `container_range` of `container`, optionally only during `live`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct AllocSlice {
    pub slice:              FieldSlice,
    pub container:          Container,
    pub container_range:    BitRange,
    pub live:               Option<LiveRange>,
}

/// The field registry: an arena of [`Field`]s plus the control-flow mutual
/// exclusion relation between them.
#[derive(Debug, Clone, Default)]
pub struct PhvInfo {
    fields: Vec<Field>,
    mutex:  AHashSet<(FieldId, FieldId)>,
}
