pub use std::{
    any::Any,
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet},
    fmt,
    io::{BufRead, BufReader},
    path::PathBuf,
    time::Instant,
};
pub use thiserror::Error;
pub use itertools::Itertools;
pub use rayon::prelude::*;
pub use indexmap::{IndexMap, IndexSet};
pub use ahash::{AHashMap, AHashSet};
pub use tracing::{debug, info, trace, warn};

pub use crate::{
    AllocSlice, Container, Field, FieldSlice, PhvInfo,
    alloc::*,
    cluster::*,
    config::*,
    error::*,
    metrics::AllocatorMetrics,
    oracle::*,
    container::*,
    score::*,
};

/// The unit for measuring positions and widths, in bits. Container widths
/// top out at 32, but field widths do not, so we do not skimp here.
pub type Bits = usize;

/// Indices at or above this value are never backed by a device container.
/// They name pseudo-containers minted while speculating.
pub const SPECULATIVE_BASE: u32 = u32::MAX / 2 + 1;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldId(pub u32);

/// Packet-processing direction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Gress {
    Ingress,
    Egress,
}

impl fmt::Display for Gress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gress::Ingress  => write!(f, "ingress"),
            Gress::Egress   => write!(f, "egress"),
        }
    }
}

/// Container kinds. The declaration order is the order in which the
/// container-group allocator tries them.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ContainerKind {
    Dark,
    Mocha,
    Normal,
    Tagalong,
}

pub const KIND_ORDER: [ContainerKind; 4] = [
    ContainerKind::Dark,
    ContainerKind::Mocha,
    ContainerKind::Normal,
    ContainerKind::Tagalong,
];

impl ContainerKind {
    /// Mocha and dark containers can only be written as a whole.
    #[inline(always)]
    pub fn is_whole_container_set(&self) -> bool {
        matches!(self, ContainerKind::Mocha | ContainerKind::Dark)
    }

    fn prefix(&self) -> &'static str {
        match self {
            ContainerKind::Dark     => "D",
            ContainerKind::Mocha    => "M",
            ContainerKind::Normal   => "",
            ContainerKind::Tagalong => "T",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ContainerSize {
    B8,
    H16,
    W32,
}

pub const SIZE_ORDER: [ContainerSize; 3] = [
    ContainerSize::B8,
    ContainerSize::H16,
    ContainerSize::W32,
];

impl ContainerSize {
    #[inline(always)]
    pub fn bits(&self) -> Bits {
        match self {
            ContainerSize::B8   => 8,
            ContainerSize::H16  => 16,
            ContainerSize::W32  => 32,
        }
    }

    pub fn from_bits(bits: Bits) -> Option<Self> {
        match bits {
            8   => Some(ContainerSize::B8),
            16  => Some(ContainerSize::H16),
            32  => Some(ContainerSize::W32),
            _   => None,
        }
    }

    fn letter(&self) -> &'static str {
        match self {
            ContainerSize::B8   => "B",
            ContainerSize::H16  => "H",
            ContainerSize::W32  => "W",
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContainerKind::Dark     => "dark",
            ContainerKind::Mocha    => "mocha",
            ContainerKind::Normal   => "normal",
            ContainerKind::Tagalong => "tagalong",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_speculative() {
            write!(f, "?{}{}", self.size.letter(), self.index - SPECULATIVE_BASE)
        } else {
            write!(f, "{}{}{}", self.kind.prefix(), self.size.letter(), self.index)
        }
    }
}

/// How the parser writes into a container.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum ParserWriteMode {
    #[default]
    Extract,
    BitwiseOr,
    ClearOnWrite,
}

/// An inclusive range of bits, `[lo:hi]`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BitRange {
    pub lo: Bits,
    pub hi: Bits,
}

impl BitRange {
    #[inline(always)]
    pub fn new(lo: Bits, hi: Bits) -> Self {
        assert!(lo <= hi, "Bad bit range [{lo}:{hi}]");
        Self { lo, hi }
    }

    #[inline(always)]
    pub fn from_lo_width(lo: Bits, width: Bits) -> Self {
        assert!(width > 0, "Zero-width bit range");
        Self { lo, hi: lo + width - 1 }
    }

    #[inline(always)]
    pub fn width(&self) -> Bits {
        self.hi - self.lo + 1
    }

    #[inline(always)]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.lo <= other.hi && other.lo <= self.hi
    }

    #[inline(always)]
    pub fn contains(&self, other: &Self) -> bool {
        self.lo <= other.lo && other.hi <= self.hi
    }

    pub fn intersect(&self, other: &Self) -> Option<Self> {
        if self.overlaps(other) {
            Some(Self::new(self.lo.max(other.lo), self.hi.min(other.hi)))
        } else { None }
    }

    /// Number of distinct bytes the range touches.
    #[inline(always)]
    pub fn bytes_spanned(&self) -> usize {
        self.hi / 8 - self.lo / 8 + 1
    }
}

impl fmt::Display for BitRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{}]", self.lo, self.hi)
    }
}

/// A window of pipeline stages (inclusive) during which a slice is live.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LiveRange {
    pub start:  u32,
    pub end:    u32,
}

impl LiveRange {
    #[inline(always)]
    pub fn disjoint(&self, other: &Self) -> bool {
        self.end < other.start || other.end < self.start
    }
}
