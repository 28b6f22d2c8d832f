//! Error types for partition layout resolution

use thiserror::Error;

/// Errors raised while loading or resolving a partition layout
///
/// Every failure aborts the resolve of the affected region. The only
/// non-fatal diagnostics are the info-level notices emitted when a partition
/// is dropped because its size is 0.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PartitionError {
    /// A requirement document could not be parsed
    #[error("Failed to parse {source_name}: {message}")]
    Parse {
        /// Where the document came from
        source_name: String,
        /// Parser diagnostic
        message: String,
    },

    /// Two merged documents define the same partition differently
    #[error(
        "Conflicting configuration found for '{key}' in '{source_name}': value differs from an earlier definition"
    )]
    ConflictingDefinition {
        /// Partition name
        key: String,
        /// Document that redefined it
        source_name: String,
    },

    /// A partition has a `placement` table with no recognized keys
    #[error("Found empty 'placement' property for partition '{0}'")]
    EmptyPlacement(String),

    /// A `one_of` group did not match any existing partition
    #[error(
        "'one_of' in partition '{partition}' did not evaluate to any partition. Available partitions {available:?}, one_of {candidates:?}"
    )]
    EmptyOneOf {
        /// Partition holding the group
        partition: String,
        /// Candidates listed in the group
        candidates: Vec<String>,
        /// Names that could have matched
        available: Vec<String>,
    },

    /// `align` or `align_next` was given outside of `placement`
    #[error("'{key}' of partition '{partition}' must be specified under 'placement'")]
    MisplacedAlignment {
        /// Partition name
        partition: String,
        /// Offending key
        key: &'static str,
    },

    /// An alignment value is unusable
    #[error("Invalid alignment requirement for partition '{partition}': {reason}")]
    InvalidAlignment {
        /// Partition name
        partition: String,
        /// What is wrong with it
        reason: String,
    },

    /// A partition refers to another partition in a way that cannot work
    #[error("Partition '{partition}' references '{target}': {reason}")]
    InvalidReference {
        /// Referring partition
        partition: String,
        /// Referenced name
        target: String,
        /// What is wrong with it
        reason: String,
    },

    /// A partition name is looked up but not present
    #[error("Unknown partition '{0}'")]
    UnknownPartition(String),

    /// A partition is placed before `start` or after `end`
    #[error("Partition '{partition}' can not be placed {direction} '{sentinel}'")]
    PlacedOutsideBounds {
        /// Partition name
        partition: String,
        /// `before` or `after`
        direction: &'static str,
        /// `start` or `end`
        sentinel: &'static str,
    },

    /// No progress was made while ordering partitions
    #[error("Unable to solve placement, endless loop detected. Unsolved partitions: {unsolved}")]
    Unsolvable {
        /// Pretty-printed set of partitions that could not be placed
        unsolved: String,
    },

    /// A container's members are not adjacent in the final order
    #[error("Partition '{partition}' ({span:?}) does not span over consecutive parts. Solution: {solution:?}")]
    SpanNotContiguous {
        /// Container name
        partition: String,
        /// Flattened members
        span: Vec<String>,
        /// Final order
        solution: Vec<String>,
    },

    /// Some members of a container were never placed
    #[error("Some or all parts of partition '{partition}' have not been placed: {missing:?}")]
    SpanNotPlaced {
        /// Container name
        partition: String,
        /// Members missing from the order
        missing: Vec<String>,
    },

    /// A partition has no before/after constraint reaching it
    #[error("Partition '{0}' has no placement and could not be ordered")]
    Unplaced(String),

    /// A container (transitively) spans itself
    #[error("Partition '{0}' spans itself")]
    CircularSpan(String),

    /// `share_size` references form a loop
    #[error("Circular 'share_size' dependency: {0}")]
    CircularShareSize(String),

    /// The partitions of a region need more space than it has
    #[error("Partitions in region '{region}' require {required:#x} bytes, but only {available:#x} bytes are available")]
    DoesNotFit {
        /// Region name
        region: String,
        /// Bytes needed
        required: u64,
        /// Bytes available
        available: u64,
    },

    /// A partition that must have a size has none
    #[error("Partition '{0}' has no size")]
    MissingSize(String),

    /// A statically defined partition lacks its address or size
    #[error("Statically defined partition '{0}' must have both 'address' and 'size'")]
    IncompleteStatic(String),

    /// A container resolved to zero bytes
    #[error("No compatible parent partition found for '{0}'")]
    EmptyContainer(String),

    /// Static partitions leave the wrong number of gaps
    #[error(
        "Incorrect amount of gaps found in static configuration. Found gaps: {gaps}. Fill the gaps with statically defined partitions, or reorder them so that exactly one gap is left for the dynamic partition"
    )]
    StaticGaps {
        /// Hex ranges of all gaps found
        gaps: String,
    },

    /// Static partitions of a simple region are not packed against its boundary
    #[error("Statically defined partitions are not packed at the {side} of region '{region}'")]
    StaticNotPacked {
        /// Region name
        region: String,
        /// `start` or `end`
        side: &'static str,
    },

    /// `align_next` clashes with an alignment already on the next partition
    #[error("Alignment of partition '{partition}' is already present: {reason}")]
    AlignmentConflict {
        /// Partition receiving the alignment
        partition: String,
        /// What clashes
        reason: String,
    },

    /// A partition sharing size with the dynamic partition cannot be aligned
    #[error("Invalid alignment attempt for dynamic partition '{partition}': {reason}")]
    DynamicAlignment {
        /// Partition being aligned
        partition: String,
        /// What went wrong
        reason: String,
    },

    /// Alignment can not be satisfied, either because the dynamic partition
    /// ran out of space for fillers or because the fix-up loop hit its cap
    #[error(
        "Unable to satisfy alignment requirements: {reason}. Reduce the alignment values or reorder the partitions so that fewer alignment gaps are needed"
    )]
    AlignmentUnsatisfiable {
        /// What ran out
        reason: String,
    },

    /// The computed layout failed its consistency check
    #[error("Layout verification failed: {0}")]
    Verification(String),

    /// Regions depend on each other through `share_size`
    #[error("Region dependency cycle detected: {0}")]
    RegionCycle(String),

    /// A user partition uses the name of a region
    #[error("Found partition named '{0}', this is the name of a region, and is a reserved name")]
    ReservedName(String),
}

/// Result type for partition layout operations
pub type Result<T> = std::result::Result<T, PartitionError>;
