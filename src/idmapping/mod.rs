//! External to internal id resolution.
//!
//! An import numbers every node with an [`IdGenerator`] while reading, records
//! (group, external id, internal id) with [`IdMapper::put`], calls
//! [`IdMapper::prepare`] once all nodes are in, and then resolves relationship
//! endpoints with [`IdMapper::get`].
//!
//! ```text
//! Accumulating --prepare()--> Preparing --> Prepared
//!   put() only                              get() only
//! ```

mod actual;
mod encoder;
mod encoding;
mod generator;
mod keys;
mod sort;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::array::NumberArrayFactory;
use crate::collector::BadCollector;
use crate::error::ImportResult;
use crate::input::{ExternalId, Group, Groups};

pub use actual::ActualIdMapper;
pub use encoder::Encoder;
pub use encoding::EncodingIdMapper;
pub use generator::IdGenerator;

/// Dense, zero-based id of a node inside the store.
pub type InternalId = u64;

/// How external node ids are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdType {
    /// Dense non-negative integers used as internal ids directly.
    Actual,
    /// Arbitrary string keys, scoped per group.
    #[default]
    String,
    /// Sparse non-negative integers, scoped per group.
    Integer,
}

impl fmt::Display for IdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Actual => write!(f, "actual"),
            Self::String => write!(f, "string"),
            Self::Integer => write!(f, "integer"),
        }
    }
}

/// Mapper lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Accumulating,
    Preparing,
    Prepared,
}

/// Outcome of [`IdMapper::prepare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PrepareSummary {
    /// Unique entries left for lookups.
    pub entries: u64,
    /// Entries dropped as duplicates.
    pub duplicates: u64,
    pub elapsed: Duration,
}

/// The mapper selected for an import.
#[derive(Debug)]
pub enum IdMapper {
    Actual(ActualIdMapper),
    Encoding(EncodingIdMapper),
}

impl IdMapper {
    /// Build the mapper for `id_type`. Internal ids must stay below `max_id`;
    /// `partitions` sets the parallelism of `prepare`.
    #[must_use]
    pub fn for_id_type(
        id_type: IdType,
        factory: &NumberArrayFactory,
        groups: Arc<Groups>,
        max_id: u64,
        partitions: usize,
    ) -> Self {
        match id_type {
            IdType::Actual => Self::Actual(ActualIdMapper::new(max_id)),
            IdType::String => Self::Encoding(EncodingIdMapper::new(
                Encoder::String,
                factory,
                groups,
                max_id,
                partitions,
            )),
            IdType::Integer => Self::Encoding(EncodingIdMapper::new(
                Encoder::Long,
                factory,
                groups,
                max_id,
                partitions,
            )),
        }
    }

    /// Record one node. Concurrent callers must use distinct `internal` ids.
    ///
    /// # Errors
    /// See [`EncodingIdMapper::put`] and [`ActualIdMapper::put`].
    pub fn put(&self, group: &Group, external: &ExternalId, internal: InternalId) -> ImportResult<()> {
        match self {
            Self::Actual(m) => m.put(group, external, internal),
            Self::Encoding(m) => m.put(group, external, internal),
        }
    }

    /// Finish accumulation. Duplicates go to `collector`.
    ///
    /// # Errors
    /// See [`EncodingIdMapper::prepare`].
    pub fn prepare(&mut self, collector: &BadCollector) -> ImportResult<PrepareSummary> {
        match self {
            Self::Actual(m) => m.prepare(),
            Self::Encoding(m) => m.prepare(collector),
        }
    }

    /// Resolve an external id; `None` if it was never put.
    ///
    /// # Errors
    /// See [`EncodingIdMapper::get`].
    pub fn get(&self, group: &Group, external: &ExternalId) -> ImportResult<Option<InternalId>> {
        match self {
            Self::Actual(m) => m.get(group, external),
            Self::Encoding(m) => m.get(group, external),
        }
    }

    /// Whether `prepare` must run before `get`.
    #[must_use]
    pub const fn needs_preparation(&self) -> bool {
        matches!(self, Self::Encoding(_))
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        match self {
            Self::Actual(m) => m.len(),
            Self::Encoding(m) => m.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes currently held.
    #[must_use]
    pub fn memory_usage(&self) -> u64 {
        match self {
            Self::Actual(_) => 0,
            Self::Encoding(m) => m.memory_usage(),
        }
    }

    /// Release every array and budget reservation.
    pub fn close(self) {
        tracing::debug!(released_bytes = self.memory_usage(), "closing id mapper");
    }
}
