//! Identity mapper for inputs whose ids already are internal ids.

use std::sync::atomic::{AtomicU64, Ordering};

use super::{InternalId, Phase, PrepareSummary};
use crate::error::{ImportResult, MapperError, ValidationError};
use crate::input::{ExternalId, Group};

/// Every external id maps to itself.
///
/// The input is trusted to be dense; only the range is checked. Groups are
/// ignored since a single integer space is shared by all of them.
#[derive(Debug)]
pub struct ActualIdMapper {
    max_id: u64,
    high: AtomicU64,
    puts: AtomicU64,
    phase: Phase,
}

impl ActualIdMapper {
    #[must_use]
    pub const fn new(max_id: u64) -> Self {
        Self {
            max_id,
            high: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            phase: Phase::Accumulating,
        }
    }

    fn check(&self, external: &ExternalId) -> ImportResult<u64> {
        let id = external.as_non_negative()?;
        if id >= self.max_id {
            return Err(ValidationError::IdOutOfRange { id, max: self.max_id }.into());
        }
        Ok(id)
    }

    /// # Errors
    /// `AlreadyPrepared` after `prepare`, or a validation error for an id that
    /// is not a non-negative integer below the maximum.
    pub fn put(&self, _group: &Group, external: &ExternalId, internal: InternalId) -> ImportResult<()> {
        if self.phase != Phase::Accumulating {
            return Err(MapperError::AlreadyPrepared.into());
        }
        let id = self.check(external)?;
        if id != internal {
            return Err(ValidationError::ActualIdMismatch { external: id, internal }.into());
        }
        self.high.fetch_max(id + 1, Ordering::AcqRel);
        self.puts.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Nothing to sort; only closes the mapper for further puts.
    ///
    /// # Errors
    /// `AlreadyPrepared` if called twice.
    pub fn prepare(&mut self) -> ImportResult<PrepareSummary> {
        if self.phase != Phase::Accumulating {
            return Err(MapperError::AlreadyPrepared.into());
        }
        self.phase = Phase::Prepared;
        Ok(PrepareSummary {
            entries: self.puts.load(Ordering::Acquire),
            ..PrepareSummary::default()
        })
    }

    /// `Some(id)` for any id below the highest one put. Usable before prepare.
    ///
    /// # Errors
    /// A validation error for a string, negative or out-of-range id.
    pub fn get(&self, _group: &Group, external: &ExternalId) -> ImportResult<Option<InternalId>> {
        let id = self.check(external)?;
        Ok((id < self.high.load(Ordering::Acquire)).then_some(id))
    }

    /// Highest id put + 1.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.high.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
