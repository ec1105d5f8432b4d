//! What an import reads: node and relationship sources plus the identity
//! resolution components chosen for them.

mod entity;
mod estimates;
mod source;

use std::sync::Arc;

use crate::array::NumberArrayFactory;
use crate::collector::BadCollector;
use crate::config::ImportConfig;
use crate::error::ImportResult;
use crate::idmapping::{IdGenerator, IdMapper};
use crate::value::Value;

pub use entity::{ExternalId, Group, Groups, InputNode, InputRelationship};
pub use estimates::{calculate_estimates, Estimates};
pub(crate) use source::ensure_replayable;
pub use source::{FnSource, InputIter, InputIterable, VecSource};

/// Everything an import needs from its data source.
///
/// `id_mapper` and `id_generator` must agree on the id type; `bad_collector`
/// returns the same shared collector on every call.
pub trait Input: Send + Sync {
    fn nodes(&self) -> &dyn InputIterable<InputNode>;

    fn relationships(&self) -> &dyn InputIterable<InputRelationship>;

    /// Group registry shared by nodes, relationships and the mapper.
    fn groups(&self) -> &Arc<Groups>;

    /// A fresh mapper allocating from `factory`.
    fn id_mapper(&self, factory: &NumberArrayFactory) -> IdMapper;

    /// A fresh generator matching [`Input::id_mapper`].
    fn id_generator(&self) -> IdGenerator;

    fn bad_collector(&self) -> Arc<BadCollector>;

    /// One independent pass over both sources.
    ///
    /// # Errors
    /// I/O errors from either source.
    fn calculate_estimates(&self, size_calculator: &dyn Fn(&[Value]) -> u64) -> ImportResult<Estimates> {
        calculate_estimates(self.nodes(), self.relationships(), size_calculator)
    }
}

/// [`Input`] over any pair of sources, configured by an [`ImportConfig`].
pub struct DataInput<N, R> {
    nodes: N,
    relationships: R,
    groups: Arc<Groups>,
    collector: Arc<BadCollector>,
    config: ImportConfig,
}

impl<N, R> DataInput<N, R>
where
    N: InputIterable<InputNode>,
    R: InputIterable<InputRelationship>,
{
    /// # Errors
    /// An invalid `config`, or if the collector's writer cannot be started.
    pub fn new(nodes: N, relationships: R, config: ImportConfig) -> ImportResult<Self> {
        config.validate()?;
        let collector = Arc::new(BadCollector::new(config.collector.clone())?);
        Ok(Self::with_collector(nodes, relationships, config, collector))
    }

    /// Use an existing collector, e.g. one writing a report file.
    #[must_use]
    pub fn with_collector(nodes: N, relationships: R, config: ImportConfig, collector: Arc<BadCollector>) -> Self {
        Self {
            nodes,
            relationships,
            groups: Arc::new(Groups::new()),
            collector,
            config,
        }
    }

    /// Share a group registry with the code building the records.
    #[must_use]
    pub fn with_groups(mut self, groups: Arc<Groups>) -> Self {
        self.groups = groups;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &ImportConfig {
        &self.config
    }
}

impl<N, R> Input for DataInput<N, R>
where
    N: InputIterable<InputNode>,
    R: InputIterable<InputRelationship>,
{
    fn nodes(&self) -> &dyn InputIterable<InputNode> {
        &self.nodes
    }

    fn relationships(&self) -> &dyn InputIterable<InputRelationship> {
        &self.relationships
    }

    fn groups(&self) -> &Arc<Groups> {
        &self.groups
    }

    fn id_mapper(&self, factory: &NumberArrayFactory) -> IdMapper {
        IdMapper::for_id_type(
            self.config.id_type,
            factory,
            Arc::clone(&self.groups),
            self.config.max_id,
            self.config.workers,
        )
    }

    fn id_generator(&self) -> IdGenerator {
        IdGenerator::for_id_type(self.config.id_type, self.config.max_id)
    }

    fn bad_collector(&self) -> Arc<BadCollector> {
        Arc::clone(&self.collector)
    }
}

impl<N, R> std::fmt::Debug for DataInput<N, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataInput")
            .field("config", &self.config)
            .field("groups", &self.groups.len())
            .finish_non_exhaustive()
    }
}
