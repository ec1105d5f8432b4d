//! Import configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::array::AllocatorConfig;
use crate::collector::CollectorConfig;
use crate::error::{ImportResult, ValidationError};
use crate::idmapping::IdType;

/// Default exclusive upper bound for internal ids (16 billion nodes).
pub const DEFAULT_MAX_ID: u64 = 1 << 34;

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub id_type: IdType,
    pub allocator: AllocatorConfig,
    pub collector: CollectorConfig,
    /// Worker threads for both passes and partitions for the sort.
    pub workers: usize,
    /// Records handed to a worker at a time.
    pub batch_size: usize,
    /// Max batches queued ahead of the workers.
    pub queue_capacity: usize,
    /// Exclusive upper bound for internal ids.
    pub max_id: u64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            id_type: IdType::default(),
            allocator: AllocatorConfig::default(),
            collector: CollectorConfig::default(),
            workers: std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get),
            batch_size: 10_000,
            queue_capacity: 16,
            max_id: DEFAULT_MAX_ID,
        }
    }
}

impl ImportConfig {
    /// Parse a JSON document; missing fields take their defaults.
    ///
    /// # Errors
    /// `InvalidConfig` for malformed JSON or values rejected by [`Self::validate`].
    pub fn from_json_str(json: &str) -> ImportResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| ValidationError::InvalidConfig {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON file.
    ///
    /// # Errors
    /// I/O errors reading `path`, plus everything [`Self::from_json_str`] rejects.
    pub fn from_json_file(path: impl AsRef<Path>) -> ImportResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Reject settings the import cannot run with.
    ///
    /// # Errors
    /// `InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |reason: &str| {
            Err(ValidationError::InvalidConfig {
                reason: reason.to_string(),
            })
        };
        if self.workers == 0 {
            return invalid("workers must be at least 1");
        }
        if self.batch_size == 0 {
            return invalid("batch_size must be at least 1");
        }
        if self.queue_capacity == 0 {
            return invalid("queue_capacity must be at least 1");
        }
        if self.max_id == 0 {
            return invalid("max_id must be at least 1");
        }
        if self.allocator.page_len == 0 {
            return invalid("allocator.page_len must be at least 1");
        }
        if self.collector.queue_capacity == 0 {
            return invalid("collector.queue_capacity must be at least 1");
        }
        Ok(())
    }
}
