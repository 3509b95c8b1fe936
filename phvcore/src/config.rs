use crate::helpe::*;
use clap::ValueEnum;

/// Which flavor of search runs. The two share all machinery and differ in
/// container supply, scoring and a few toggles.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AllocatorKind {
    Greedy,
    Trivial,
}

/// How strictly the synthesizability oracle judges a packing.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum, Default)]
pub enum ActionCheckMode {
    /// Full checks; hints may be required.
    #[default]
    Strict,
    /// Full checks, but every hint is best-effort.
    MinimalPacking,
    /// No checks. Used to localize failures.
    Loose,
}

#[derive(Clone, Debug)]
pub struct AllocConfig {
    pub kind:                       AllocatorKind,
    /// Per DFS run. New branches stop once exceeded.
    pub max_dfs_steps:              usize,
    /// Slicing variants tried per super cluster, the unsliced one included.
    pub max_slicings:               usize,
    /// Stop scanning a group once a strictly empty normal container works.
    pub early_stop_on_empty_normal: bool,
    /// Let liverange-disjoint slices share container bits.
    pub physical_liverange_overlay: bool,
    /// Order starts to minimize crossbar bytes of table-key fields.
    pub sort_for_xbar:              bool,
    pub action_mode:                ActionCheckMode,
    /// Keep the first success instead of comparing every width and group.
    pub first_solution_only:        bool,
}

impl Default for AllocConfig {
    fn default() -> Self {
        Self {
            kind:                       AllocatorKind::Greedy,
            max_dfs_steps:              4096,
            max_slicings:               8,
            early_stop_on_empty_normal: false,
            physical_liverange_overlay: false,
            sort_for_xbar:              true,
            action_mode:                ActionCheckMode::Strict,
            first_solution_only:        false,
        }
    }
}

impl AllocConfig {
    /// Settings of the first trivial-allocation pass.
    pub fn trivial() -> Self {
        Self {
            kind:                       AllocatorKind::Trivial,
            max_dfs_steps:              1 << 16,
            early_stop_on_empty_normal: true,
            sort_for_xbar:              false,
            action_mode:                ActionCheckMode::MinimalPacking,
            first_solution_only:        true,
            ..Default::default()
        }
    }

    #[inline(always)]
    pub fn is_trivial(&self) -> bool {
        self.kind == AllocatorKind::Trivial
    }

    /// Same settings, other check mode.
    pub fn with_mode(&self, action_mode: ActionCheckMode) -> Self {
        Self { action_mode, ..self.clone() }
    }
}
