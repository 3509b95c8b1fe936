use crate::helpe::*;

/// Search counters. One value per search, merged upward; never global.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocatorMetrics {
    pub dfs_steps:          usize,
    pub containers_tried:   usize,
    pub equivalence_skips:  usize,
    pub oracle_calls:       usize,
    pub hints_applied:      usize,
    pub hints_dropped:      usize,
    pub backtracks:         usize,
    pub budget_exhausted:   usize,
    pub solutions:          usize,
    pub clusters_allocated: usize,
    pub clusters_failed:    usize,
}

impl AllocatorMetrics {
    pub fn merge(&mut self, other: &Self) {
        self.dfs_steps += other.dfs_steps;
        self.containers_tried += other.containers_tried;
        self.equivalence_skips += other.equivalence_skips;
        self.oracle_calls += other.oracle_calls;
        self.hints_applied += other.hints_applied;
        self.hints_dropped += other.hints_dropped;
        self.backtracks += other.backtracks;
        self.budget_exhausted += other.budget_exhausted;
        self.solutions += other.solutions;
        self.clusters_allocated += other.clusters_allocated;
        self.clusters_failed += other.clusters_failed;
    }
}

impl fmt::Display for AllocatorMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:#?}")
    }
}
