use crate::helpe::*;

/// A comparable summary of what a transaction did to the ground truth.
pub trait TxScore: fmt::Display + Send {
    /// Strictly better. Never true for a score and itself.
    fn better_than(&self, other: &dyn TxScore) -> bool;
    fn as_any(&self) -> &dyn Any;
}

/// Builds scores for transactions. Which maker is in use is what
/// distinguishes the greedy allocator from the trivial one.
pub trait TxScoreMaker: Sync {
    fn make(&self, tx: &Transaction) -> Box<dyn TxScore>;
}

/// Counts shared by both score flavors.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
struct Footprint {
    /// Previously empty containers the transaction writes to.
    opened:         usize,
    /// Previously occupied containers the transaction adds slices to.
    packed:         usize,
    /// New bits claimed in normal containers.
    normal_bits:    Bits,
    /// Unclaimed bits left in the opened containers.
    wasted:         Bits,
}

fn footprint(tx: &Transaction) -> Footprint {
    let root = tx.root();
    let mut res = Footprint::default();
    for (c, st) in tx.accumulated().containers() {
        if c.is_speculative() || st.is_empty() {
            continue;
        }
        let before = root.status(c).map_or(0, |s| s.used_bits());
        let now = st.used_bits();
        if root.is_empty_container(c) {
            res.opened += 1;
            res.wasted += c.width() - now;
        } else {
            res.packed += 1;
        }
        if c.kind == ContainerKind::Normal {
            res.normal_bits += now - before;
        }
    }

    res
}

fn peer<T: 'static>(other: &dyn TxScore) -> &T {
    match other.as_any().downcast_ref::<T>() {
        Some(s) => s,
        None    => panic!("Comparing scores from different makers"),
    }
}

/// The greedy allocator's score: open as few containers as possible, keep
/// normal containers free for what can only live there, waste little.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DefaultScore {
    fp: Footprint,
}

impl DefaultScore {
    fn key(&self) -> (usize, Bits, Bits, std::cmp::Reverse<usize>) {
        (self.fp.opened, self.fp.normal_bits, self.fp.wasted, std::cmp::Reverse(self.fp.packed))
    }
}

impl TxScore for DefaultScore {
    fn better_than(&self, other: &dyn TxScore) -> bool {
        self.key() < peer::<Self>(other).key()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Display for DefaultScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "opened={} packed={} normal_bits={} wasted={}",
            self.fp.opened, self.fp.packed, self.fp.normal_bits, self.fp.wasted
        )
    }
}

pub struct DefaultScoreMaker;

impl TxScoreMaker for DefaultScoreMaker {
    fn make(&self, tx: &Transaction) -> Box<dyn TxScore> {
        Box::new(DefaultScore { fp: footprint(tx) })
    }
}

/// The trivial allocator's score: pack as much as possible.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PackingScore {
    opened: usize,
    packed: usize,
}

impl TxScore for PackingScore {
    fn better_than(&self, other: &dyn TxScore) -> bool {
        let other = peer::<Self>(other);
        (self.opened, other.packed) < (other.opened, self.packed)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Display for PackingScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "opened={} packed={}", self.opened, self.packed)
    }
}

pub struct PackingScoreMaker;

impl TxScoreMaker for PackingScoreMaker {
    fn make(&self, tx: &Transaction) -> Box<dyn TxScore> {
        let fp = footprint(tx);
        Box::new(PackingScore { opened: fp.opened, packed: fp.packed })
    }
}

/// `a` replaces the incumbent `b` only if strictly better, so the first
/// enumerated candidate wins ties.
#[inline(always)]
pub fn improves(a: &dyn TxScore, b: Option<&dyn TxScore>) -> bool {
    b.map_or(true, |b| a.better_than(b))
}
