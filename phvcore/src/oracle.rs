//! Contracts of the collaborators the search consults but does not own.

use crate::helpe::*;

/// Decides whether the parser can extract a set of slices into one
/// container at the given starts.
pub trait ParserPackingValidator: Sync {
    fn validate(
        &self,
        phv:        &PhvInfo,
        container:  &Container,
        starts:     &[(FieldSlice, Bits)],
    ) -> Result<(), AllocError>;
}

impl<F> ParserPackingValidator for F
where
    F: Fn(&PhvInfo, &Container, &[(FieldSlice, Bits)]) -> Result<(), AllocError> + Sync,
{
    fn validate(
        &self,
        phv:        &PhvInfo,
        container:  &Container,
        starts:     &[(FieldSlice, Bits)],
    ) -> Result<(), AllocError> {
        self(phv, container, starts)
    }
}

/// A parser that can extract anything anywhere.
pub struct AnyParserPacking;

impl ParserPackingValidator for AnyParserPacking {
    fn validate(&self, _: &PhvInfo, _: &Container, _: &[(FieldSlice, Bits)]) -> Result<(), AllocError> {
        Ok(())
    }
}

/// Per-slice physical liveness, when the pipeline layout is known.
pub trait LiverangeOracle: Sync {
    fn live_range(&self, slice: &FieldSlice) -> Option<LiveRange>;
}

/// Stage windows per field.
#[derive(Debug, Clone, Default)]
pub struct StageLiveness {
    ranges: AHashMap<FieldId, LiveRange>,
}

impl StageLiveness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, f: FieldId, start: u32, end: u32) {
        assert!(start <= end, "Inverted live range");
        self.ranges.insert(f, LiveRange { start, end });
    }
}

impl LiverangeOracle for StageLiveness {
    fn live_range(&self, slice: &FieldSlice) -> Option<LiveRange> {
        self.ranges.get(&slice.field).copied()
    }
}

/// A source operand of one action writing a container, as the
/// synthesizability oracle sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceOperand {
    pub slice:      FieldSlice,
    /// Destination container bit fed by the lsb of `slice`.
    pub dst_start:  Bits,
    /// Where `slice` currently lives, if anywhere.
    pub placed:     Option<(Container, Bits)>,
}

/// What the oracle reports for one action writing `dst`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSources {
    pub action:             String,
    pub dst:                Container,
    /// The write sets the whole container, so every source must come
    /// from a single container.
    pub whole_container:    bool,
    pub operands:           Vec<SourceOperand>,
}

/// The instruction-synthesizability oracle.
///
/// Given a view holding candidate placements, judge whether every action
/// writing `container` can still be realized, and on success describe the
/// field sources of each such action so hints can be derived from them.
pub trait ActionConstraints: Sync {
    fn can_pack(
        &self,
        phv:        &PhvInfo,
        view:       &dyn AllocView,
        container:  &Container,
        mode:       ActionCheckMode,
    ) -> Result<Vec<ActionSources>, AllocError>;

    /// Containers, as placed in `view`, written by some action that reads
    /// any bit of `read`. Moving a source can break the destination's
    /// action, so these must be judged again.
    fn written_from(&self, view: &dyn AllocView, read: &[FieldSlice]) -> Vec<Container>;
}

/// A program without actions.
pub struct NoActionConstraints;

impl ActionConstraints for NoActionConstraints {
    fn can_pack(&self, _: &PhvInfo, _: &dyn AllocView, _: &Container, _: ActionCheckMode) -> Result<Vec<ActionSources>, AllocError> {
        Ok(vec![])
    }

    fn written_from(&self, _: &dyn AllocView, _: &[FieldSlice]) -> Vec<Container> {
        vec![]
    }
}
