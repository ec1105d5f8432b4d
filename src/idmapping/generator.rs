//! Internal id assignment.

use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{IdType, InternalId};
use crate::error::{ImportResult, ValidationError};
use crate::input::ExternalId;

/// Assigns one internal id per node, in node encounter order.
///
/// Ids are never handed back: a node later found to be a duplicate keeps the
/// id it was issued and that id is simply left unused.
#[derive(Debug)]
pub enum IdGenerator {
    /// The external id is a dense non-negative integer and is used unchanged.
    Actual {
        /// Exclusive upper bound for accepted ids.
        max_id: u64,
        /// Highest id seen + 1.
        high: AtomicU64,
    },
    /// A counter from 0, independent of the external id.
    Generated {
        /// Exclusive upper bound for issued ids.
        max_id: u64,
        next: AtomicU64,
    },
}

impl IdGenerator {
    /// Generator matching the mapper for `id_type`.
    #[must_use]
    pub const fn for_id_type(id_type: IdType, max_id: u64) -> Self {
        match id_type {
            IdType::Actual => Self::Actual {
                max_id,
                high: AtomicU64::new(0),
            },
            IdType::String | IdType::Integer => Self::Generated {
                max_id,
                next: AtomicU64::new(0),
            },
        }
    }

    /// Returns true if ids come from a counter rather than the input.
    #[must_use]
    pub const fn is_generated(&self) -> bool {
        matches!(self, Self::Generated { .. })
    }

    /// Internal id for the next node.
    ///
    /// # Errors
    /// - `MissingExternalId` / `NegativeExternalId` / `IdTypeMismatch` for an
    ///   unusable id under `Actual`
    /// - `IdOutOfRange` once `max_id` is reached
    pub fn next(&self, external: Option<&ExternalId>) -> ImportResult<InternalId> {
        match self {
            Self::Actual { max_id, high } => {
                let external = external.ok_or(ValidationError::MissingExternalId { id_type: "actual" })?;
                let id = external.as_non_negative()?;
                if id >= *max_id {
                    return Err(ValidationError::IdOutOfRange { id, max: *max_id }.into());
                }
                high.fetch_max(id + 1, Ordering::AcqRel);
                Ok(id)
            }
            Self::Generated { .. } => Ok(self.reserve(1)?.start),
        }
    }

    /// Hand out `count` consecutive ids for one batch.
    ///
    /// Under `Actual` the ids come from the input, so this returns an empty
    /// range at the current high mark.
    ///
    /// # Errors
    /// `IdOutOfRange` if the block would pass `max_id`; nothing is issued then.
    pub fn reserve(&self, count: u64) -> ImportResult<Range<InternalId>> {
        match self {
            Self::Actual { high, .. } => {
                let at = high.load(Ordering::Acquire);
                Ok(at..at)
            }
            Self::Generated { max_id, next } => {
                let mut start = next.load(Ordering::Acquire);
                loop {
                    let end = start
                        .checked_add(count)
                        .filter(|end| *end <= *max_id)
                        .ok_or(ValidationError::IdOutOfRange {
                            id: start.saturating_add(count).saturating_sub(1),
                            max: *max_id,
                        })?;
                    match next.compare_exchange_weak(start, end, Ordering::AcqRel, Ordering::Acquire) {
                        Ok(_) => return Ok(start..end),
                        Err(actual) => start = actual,
                    }
                }
            }
        }
    }

    /// Number of ids issued so far (highest id + 1 under `Actual`).
    #[must_use]
    pub fn highest_id(&self) -> u64 {
        match self {
            Self::Actual { high, .. } => high.load(Ordering::Acquire),
            Self::Generated { next, .. } => next.load(Ordering::Acquire),
        }
    }

    /// Exclusive upper bound for ids.
    #[must_use]
    pub const fn max_id(&self) -> u64 {
        match self {
            Self::Actual { max_id, .. } | Self::Generated { max_id, .. } => *max_id,
        }
    }
}
