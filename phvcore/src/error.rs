use crate::helpe::*;

/// Why a placement attempt failed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Static constraints preclude the placement.
    NotEnoughSpace,
    /// The synthesizability oracle rejected the implied instructions.
    ActionCannotBeSynthesized,
    ContainerTypeMismatch,
    ContainerGressMismatch,
    ContainerParserWriteModeMismatch,
    ContainerParserPackingInvalid,
    FieldMaxContainerBytesExceeded,
    NoValidContainerSize,
    NoValidScAllocAlignment,
    WideArithAllocFailed,
    NoSlicingFound,
    CannotApplyRequiredCopackHints,
    /// Summary produced by the trivial allocator's diagnostic pass.
    InvalidAllocation,
}

impl ErrorCode {
    /// Higher is more actionable. Oracle failures carry repack information
    /// and win over plain space failures.
    pub fn specificity(&self) -> u8 {
        match self {
            ErrorCode::ActionCannotBeSynthesized        => 4,
            ErrorCode::CannotApplyRequiredCopackHints   => 3,
            ErrorCode::NotEnoughSpace                   => 0,
            ErrorCode::InvalidAllocation                => 0,
            _                                           => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::NotEnoughSpace                   => "NOT_ENOUGH_SPACE",
            ErrorCode::ActionCannotBeSynthesized        => "ACTION_CANNOT_BE_SYNTHESIZED",
            ErrorCode::ContainerTypeMismatch            => "CONTAINER_TYPE_MISMATCH",
            ErrorCode::ContainerGressMismatch           => "CONTAINER_GRESS_MISMATCH",
            ErrorCode::ContainerParserWriteModeMismatch => "CONTAINER_PARSER_WRITE_MODE_MISMATCH",
            ErrorCode::ContainerParserPackingInvalid    => "CONTAINER_PARSER_PACKING_INVALID",
            ErrorCode::FieldMaxContainerBytesExceeded   => "FIELD_MAX_CONTAINER_BYTES_EXCEEDED",
            ErrorCode::NoValidContainerSize             => "NO_VALID_CONTAINER_SIZE",
            ErrorCode::NoValidScAllocAlignment          => "NO_VALID_SC_ALLOC_ALIGNMENT",
            ErrorCode::WideArithAllocFailed             => "WIDE_ARITH_ALLOC_FAILED",
            ErrorCode::NoSlicingFound                   => "NO_SLICING_FOUND",
            ErrorCode::CannotApplyRequiredCopackHints   => "CANNOT_APPLY_REQUIRED_COPACK_HINTS",
            ErrorCode::InvalidAllocation                => "INVALID_ALLOCATION",
        };
        write!(f, "{s}")
    }
}

/// An ordinary allocation failure. Carries enough structure for the caller
/// to decide between trying another container, another alignment, or asking
/// upstream to re-slice the super cluster.
#[derive(Error, Debug, Clone)]
#[error("{code}: {message}")]
pub struct AllocError {
    pub code:               ErrorCode,
    pub message:            String,
    /// Slices whose combination the oracle refused.
    pub invalid_packing:    Option<Vec<AllocSlice>>,
    /// Slice lists whose split is intrinsically unallocatable.
    pub reslice_required:   Option<Vec<Vec<FieldSlice>>>,
}

impl AllocError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message:            message.into(),
            invalid_packing:    None,
            reslice_required:   None,
        }
    }

    pub fn with_invalid_packing(mut self, slices: Vec<AllocSlice>) -> Self {
        self.invalid_packing = Some(slices);
        self
    }

    pub fn with_reslice(mut self, lists: Vec<Vec<FieldSlice>>) -> Self {
        self.reslice_required = Some(lists);
        self
    }

    /// Prefixes the message with what the caller was attempting, one level
    /// of indentation per layer.
    pub fn context(mut self, what: impl fmt::Display) -> Self {
        let inner = self.message
            .lines()
            .map(|l| format!("  {l}"))
            .join("\n");
        self.message = format!("{what}:\n{inner}");
        self
    }

    /// Re-labels the error while keeping the trace and attachments.
    pub fn recode(mut self, code: ErrorCode) -> Self {
        self.code = code;
        self
    }

    #[inline(always)]
    pub fn more_specific_than(&self, other: &Self) -> bool {
        self.code.specificity() > other.code.specificity()
    }
}

/// Keeps the most diagnostically specific of two errors; the incumbent wins
/// ties so that the first-seen failure is reported.
pub fn prefer_error(current: Option<AllocError>, new: AllocError) -> Option<AllocError> {
    match current {
        Some(cur) if !new.more_specific_than(&cur) => Some(cur),
        _ => Some(new),
    }
}
