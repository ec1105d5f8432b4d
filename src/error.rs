//! Error types for kyro-import.
//!
//! All errors are strongly typed using thiserror. Recoverable data problems
//! (duplicate ids, unresolved endpoints) are never raised through these types;
//! they are routed to the bad-entry collector instead. Anything that surfaces
//! as an `ImportError` stops the import.

use thiserror::Error;

/// Validation errors for ids, groups and configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("External id {value} is negative; integer ids must be >= 0")]
    NegativeExternalId {
        value: i64,
    },

    #[error("Id {id} is out of range (max: {max})")]
    IdOutOfRange {
        id: u64,
        max: u64,
    },

    #[error("Expected {expected} external id, got {actual}")]
    IdTypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Actual id mode requires internal id {internal} to equal external id {external}")]
    ActualIdMismatch {
        external: u64,
        internal: u64,
    },

    #[error("Node has no external id; {id_type} id mode requires one")]
    MissingExternalId {
        id_type: &'static str,
    },

    #[error("Too many id groups (max: {max})")]
    TooManyGroups {
        max: usize,
    },

    #[error("Unknown group id {id}")]
    UnknownGroup {
        id: u16,
    },

    #[error("The {input} source can only be read once, but the import reads it more than once")]
    SinglePassSource {
        input: &'static str,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Errors raised by the number array allocator.
#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("Out of memory: cannot allocate {element_count} x {width}-byte elements ({requested_bytes} bytes) with any backing")]
    OutOfMemory {
        element_count: u64,
        width: usize,
        requested_bytes: u64,
    },

    #[error("Index {index} exceeds array capacity {capacity}")]
    CapacityExceeded {
        index: u64,
        capacity: u64,
    },
}

/// Misuse of the identifier mapper's phase machine.
#[derive(Debug, Error)]
pub enum MapperError {
    #[error("Id mapper has not been prepared; call prepare() before get()")]
    NotPrepared,

    #[error("Id mapper is already prepared; no further put() calls are permitted")]
    AlreadyPrepared,
}

/// Errors raised by the bad-entry collector.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("Too many bad entries: {total} (duplicates: {duplicates}, unresolved: {unresolved}, tolerance: {tolerance}); last was: {last}")]
    ToleranceExceeded {
        total: u64,
        duplicates: u64,
        unresolved: u64,
        tolerance: String,
        last: String,
    },

    #[error("Bad entry of a kind that is not collected: {entry}")]
    NotCollected {
        entry: String,
    },

    #[error("Collector is closed")]
    Closed,

    #[error("Failed to write bad-entry report: {message}")]
    ReportWrite {
        message: String,
    },
}

/// Top-level error type for kyro-import.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Allocation error: {0}")]
    Allocation(#[from] AllocationError),

    #[error("Id mapper error: {0}")]
    Mapper(#[from] MapperError),

    #[error("Bad-entry collector error: {0}")]
    Collector(#[from] CollectorError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl ImportError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if the allocator could not satisfy a request.
    #[must_use]
    pub const fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::Allocation(AllocationError::OutOfMemory { .. }))
    }

    /// Returns true if the mapper was used out of phase.
    #[must_use]
    pub const fn is_usage_error(&self) -> bool {
        matches!(self, Self::Mapper(_))
    }

    /// Returns true if the collector's tolerance was exceeded.
    #[must_use]
    pub const fn is_tolerance_exceeded(&self) -> bool {
        matches!(self, Self::Collector(CollectorError::ToleranceExceeded { .. }))
    }

    /// Returns true if this is an I/O error.
    #[must_use]
    pub const fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

/// Result type alias for import operations.
pub type ImportResult<T> = Result<T, ImportError>;
