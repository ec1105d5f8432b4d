//! Two-pass import driver.
//!
//! 1. Node pass: a single reader numbers every node with the generator, in
//!    encounter order, and hands batches to workers that `put` them into the
//!    mapper and pass them on to the node sink.
//! 2. `prepare` sorts the mapper and reports duplicates.
//! 3. Relationship pass: workers resolve both endpoints with `get`. A
//!    relationship with a missing endpoint is reported to the collector and
//!    never reaches the relationship sink.
//!
//! Any error, including the collector's tolerance being exceeded, stops both
//! the reader and the workers and is returned from [`Importer::run`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::bounded;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::array::NumberArrayFactory;
use crate::collector::{BadEntry, Side};
use crate::config::ImportConfig;
use crate::error::{ImportError, ImportResult};
use crate::idmapping::{InternalId, PrepareSummary};
use crate::input::{ensure_replayable, Input, InputNode, InputRelationship};
use crate::value::Value;

/// A relationship with both endpoints resolved to internal ids.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRelationship {
    /// Position in the relationship stream.
    pub position: u64,
    pub start: InternalId,
    pub end: InternalId,
    pub rel_type: String,
    pub properties: Vec<(String, Value)>,
}

/// Receives every node together with its internal id.
///
/// Called from several worker threads at once. Duplicate nodes are passed
/// on too; they are only detected after the node pass.
pub trait NodeSink: Send + Sync {
    /// # Errors
    /// Any error stops the import.
    fn accept(&self, id: InternalId, node: &InputNode) -> ImportResult<()>;
}

impl<F> NodeSink for F
where
    F: Fn(InternalId, &InputNode) -> ImportResult<()> + Send + Sync,
{
    fn accept(&self, id: InternalId, node: &InputNode) -> ImportResult<()> {
        self(id, node)
    }
}

/// Receives every relationship whose endpoints both resolved.
pub trait RelationshipSink: Send + Sync {
    /// # Errors
    /// Any error stops the import.
    fn accept(&self, relationship: ResolvedRelationship) -> ImportResult<()>;
}

impl<F> RelationshipSink for F
where
    F: Fn(ResolvedRelationship) -> ImportResult<()> + Send + Sync,
{
    fn accept(&self, relationship: ResolvedRelationship) -> ImportResult<()> {
        self(relationship)
    }
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct Discard;

impl NodeSink for Discard {
    fn accept(&self, _id: InternalId, _node: &InputNode) -> ImportResult<()> {
        Ok(())
    }
}

impl RelationshipSink for Discard {
    fn accept(&self, _relationship: ResolvedRelationship) -> ImportResult<()> {
        Ok(())
    }
}

/// Result of a successful import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Nodes read, duplicates included.
    pub nodes: u64,
    /// Relationships read, unresolved included.
    pub relationships: u64,
    /// Relationships handed to the sink.
    pub resolved_relationships: u64,
    pub duplicates: u64,
    pub unresolved: u64,
    pub prepare: PrepareSummary,
    pub elapsed: Duration,
}

/// Runs imports with a fixed worker layout and allocator.
#[derive(Debug, Clone)]
pub struct Importer {
    factory: NumberArrayFactory,
    workers: usize,
    batch_size: usize,
    queue_capacity: usize,
}

impl Importer {
    /// # Errors
    /// `InvalidConfig` if `config` does not validate.
    pub fn new(config: &ImportConfig) -> ImportResult<Self> {
        config.validate()?;
        Ok(Self {
            factory: NumberArrayFactory::new(config.allocator.clone()),
            workers: config.workers,
            batch_size: config.batch_size,
            queue_capacity: config.queue_capacity,
        })
    }

    /// Allocate from `factory` instead of one built from the config.
    #[must_use]
    pub fn with_factory(mut self, factory: NumberArrayFactory) -> Self {
        self.factory = factory;
        self
    }

    #[must_use]
    pub const fn factory(&self) -> &NumberArrayFactory {
        &self.factory
    }

    /// Import `input`, feeding `nodes` and `relationships`.
    ///
    /// The input's collector is closed when the run ends, successful or not.
    ///
    /// # Errors
    /// `SinglePassSource` before anything is read if either source cannot be
    /// replayed. I/O errors from the sources, validation errors for unusable ids,
    /// `OutOfMemory`, the collector's `ToleranceExceeded`, and any sink error.
    pub fn run<N, R>(&self, input: &dyn Input, nodes: &N, relationships: &R) -> ImportResult<ImportSummary>
    where
        N: NodeSink,
        R: RelationshipSink,
    {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("import", %run_id);
        let _guard = span.enter();

        let outcome = self.run_passes(run_id, input, nodes, relationships);
        let closed = input.bad_collector().close();
        match (outcome, closed) {
            (Ok(summary), Ok(_)) => {
                tracing::info!(
                    nodes = summary.nodes,
                    relationships = summary.relationships,
                    duplicates = summary.duplicates,
                    unresolved = summary.unresolved,
                    elapsed_ms = summary.elapsed.as_millis() as u64,
                    "import finished"
                );
                Ok(summary)
            }
            (Ok(_), Err(err)) => Err(err),
            (Err(err), _) => {
                tracing::warn!(error = %err, "import failed");
                Err(err)
            }
        }
    }

    fn run_passes<N, R>(
        &self,
        run_id: Uuid,
        input: &dyn Input,
        nodes: &N,
        relationships: &R,
    ) -> ImportResult<ImportSummary>
    where
        N: NodeSink,
        R: RelationshipSink,
    {
        ensure_replayable(input.nodes(), "node")?;
        ensure_replayable(input.relationships(), "relationship")?;

        let started_at = Utc::now();
        let started = Instant::now();
        let collector = input.bad_collector();
        let generator = input.id_generator();
        let mut mapper = input.id_mapper(&self.factory);

        let node_count = {
            let _pass = tracing::debug_span!("node_pass").entered();
            let mapper = &mapper;
            let numbered = input.nodes().iter()?.map(|node| -> ImportResult<(InternalId, InputNode)> {
                let node = node?;
                let id = generator.next(node.id.as_ref())?;
                Ok((id, node))
            });
            self.parallel_batches("nodes", numbered, |(id, node): (InternalId, InputNode)| {
                if let Some(external) = &node.id {
                    mapper.put(&node.group, external, id)?;
                }
                nodes.accept(id, &node)
            })?
        };
        tracing::info!(nodes = node_count, highest_id = generator.highest_id(), "node pass finished");

        let prepare = mapper.prepare(&collector)?;

        let resolved = AtomicU64::new(0);
        let relationship_count = {
            let _pass = tracing::debug_span!("relationship_pass").entered();
            let mapper = &mapper;
            let positioned = input
                .relationships()
                .iter()?
                .enumerate()
                .map(|(position, rel)| -> ImportResult<(u64, InputRelationship)> { Ok((position as u64, rel?)) });
            self.parallel_batches("relationships", positioned, |(position, rel): (u64, InputRelationship)| {
                let start = mapper.get(&rel.start_group, &rel.start)?;
                let end = mapper.get(&rel.end_group, &rel.end)?;
                match (start, end) {
                    (Some(start), Some(end)) => {
                        relationships.accept(ResolvedRelationship {
                            position,
                            start,
                            end,
                            rel_type: rel.rel_type,
                            properties: rel.properties,
                        })?;
                        resolved.fetch_add(1, Ordering::AcqRel);
                        Ok(())
                    }
                    (start, end) => {
                        let side = Side::from_missing(start.is_none(), end.is_none())
                            .ok_or_else(|| ImportError::internal("unresolved relationship without a missing side"))?;
                        collector.collect(BadEntry::UnresolvedEndpoint {
                            position,
                            relationship: Box::new(rel),
                            side,
                        })
                    }
                }
            })?
        };

        mapper.close();
        Ok(ImportSummary {
            run_id,
            started_at,
            nodes: node_count,
            relationships: relationship_count,
            resolved_relationships: resolved.load(Ordering::Acquire),
            duplicates: collector.duplicates(),
            unresolved: collector.unresolved(),
            prepare,
            elapsed: started.elapsed(),
        })
    }

    /// Read `items` on the calling thread in batches and run `work` on each
    /// item from `self.workers` named threads. Returns the number of items read.
    ///
    /// The first error from the reader or any worker stops the rest; queued
    /// batches are drained without being worked on.
    fn parallel_batches<T, I, W>(&self, name: &str, items: I, work: W) -> ImportResult<u64>
    where
        T: Send,
        I: Iterator<Item = ImportResult<T>>,
        W: Fn(T) -> ImportResult<()> + Sync,
    {
        let failed = AtomicBool::new(false);
        let first_error: Mutex<Option<ImportError>> = Mutex::new(None);
        let fail = |err: ImportError| {
            failed.store(true, Ordering::Release);
            let mut slot = first_error.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                *slot = Some(err);
            }
        };

        let read = thread::scope(|scope| -> ImportResult<u64> {
            let (tx, rx) = bounded::<Vec<T>>(self.queue_capacity.max(1));
            let mut handles = Vec::with_capacity(self.workers);
            for idx in 0..self.workers.max(1) {
                let rx = rx.clone();
                let (work, failed, fail) = (&work, &failed, &fail);
                let handle = thread::Builder::new()
                    .name(format!("kyro-import-{name}-{idx}"))
                    .spawn_scoped(scope, move || {
                        for batch in rx {
                            if failed.load(Ordering::Acquire) {
                                continue;
                            }
                            for item in batch {
                                if let Err(err) = work(item) {
                                    fail(err);
                                    break;
                                }
                            }
                        }
                    })?;
                handles.push(handle);
            }
            drop(rx);

            let batch_size = self.batch_size.max(1);
            let mut count = 0u64;
            let mut batch = Vec::with_capacity(batch_size);
            for item in items {
                if failed.load(Ordering::Acquire) {
                    break;
                }
                match item {
                    Ok(item) => {
                        batch.push(item);
                        count += 1;
                    }
                    Err(err) => {
                        fail(err);
                        break;
                    }
                }
                if batch.len() == batch_size {
                    let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                    if tx.send(full).is_err() {
                        break;
                    }
                }
            }
            if !batch.is_empty() && !failed.load(Ordering::Acquire) {
                let _ = tx.send(batch);
            }
            drop(tx);

            let mut panicked = false;
            for handle in handles {
                panicked |= handle.join().is_err();
            }
            if panicked {
                return Err(ImportError::internal(format!("{name} worker panicked")));
            }
            Ok(count)
        });

        if let Some(err) = first_error.into_inner().unwrap_or_else(PoisonError::into_inner) {
            return Err(err);
        }
        read
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::collector::{BadCollector, CollectorConfig, Tolerance};
    use crate::error::ValidationError;
    use crate::idmapping::IdType;
    use crate::input::{DataInput, FnSource, InputIter, VecSource};

    fn config(id_type: IdType, tolerance: Tolerance) -> ImportConfig {
        ImportConfig {
            id_type,
            workers: 3,
            batch_size: 2,
            queue_capacity: 2,
            collector: CollectorConfig {
                tolerance,
                ..CollectorConfig::default()
            },
            ..ImportConfig::default()
        }
    }

    fn run(
        config: &ImportConfig,
        nodes: Vec<InputNode>,
        rels: Vec<InputRelationship>,
    ) -> (ImportResult<ImportSummary>, Vec<ResolvedRelationship>, Arc<BadCollector>) {
        let input = DataInput::new(VecSource::new(nodes), VecSource::new(rels), config.clone()).unwrap();
        let out = Mutex::new(Vec::new());
        let sink = |rel: ResolvedRelationship| -> ImportResult<()> {
            out.lock().unwrap().push(rel);
            Ok(())
        };
        let result = Importer::new(config).unwrap().run(&input, &Discard, &sink);
        let mut resolved = out.into_inner().unwrap();
        resolved.sort_by_key(|r| r.position);
        (result, resolved, input.bad_collector())
    }

    #[test]
    fn resolves_and_reports() {
        let nodes = ["a", "b", "a", "c"].into_iter().map(InputNode::new).collect();
        let rels = vec![
            InputRelationship::new("a", "KNOWS", "c"),
            InputRelationship::new("z", "KNOWS", "b"),
        ];
        let (result, resolved, collector) = run(&config(IdType::String, Tolerance::Unbounded), nodes, rels);
        let summary = result.unwrap();

        assert_eq!(summary.nodes, 4);
        assert_eq!(summary.relationships, 2);
        assert_eq!(summary.resolved_relationships, 1);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.unresolved, 1);
        assert_eq!(summary.prepare.entries, 3);

        assert_eq!(resolved.len(), 1);
        assert_eq!((resolved[0].start, resolved[0].end), (0, 3));

        let unresolved: Vec<_> = collector
            .entries()
            .into_iter()
            .filter(|e| matches!(e, BadEntry::UnresolvedEndpoint { .. }))
            .collect();
        assert!(matches!(
            unresolved.as_slice(),
            [BadEntry::UnresolvedEndpoint { position: 1, side: Side::Start, .. }]
        ));
    }

    #[test]
    fn tolerance_stops_the_import() {
        let nodes = vec![InputNode::new("a")];
        let rels = (0..50).map(|i| InputRelationship::new("a", "R", format!("missing-{i}"))).collect();
        let (result, _, collector) = run(&config(IdType::String, Tolerance::Bounded(3)), nodes, rels);
        assert!(result.unwrap_err().is_tolerance_exceeded());
        assert!(collector.threshold_exceeded());
    }

    #[test]
    fn actual_ids_pass_through() {
        let nodes = (0..10i64).map(InputNode::new).collect();
        let rels = vec![InputRelationship::new(3i64, "R", 7i64), InputRelationship::new(2i64, "R", 99i64)];
        let (result, resolved, _) = run(&config(IdType::Actual, Tolerance::Unbounded), nodes, rels);
        let summary = result.unwrap();
        assert_eq!(summary.unresolved, 1);
        assert_eq!((resolved[0].start, resolved[0].end), (3, 7));
    }

    #[test]
    fn invalid_node_id_fails_the_run() {
        let nodes = vec![InputNode::new(1i64), InputNode::new("oops")];
        let (result, _, _) = run(&config(IdType::Integer, Tolerance::Unbounded), nodes, Vec::new());
        assert!(result.unwrap_err().is_validation());
    }

    #[test]
    fn sink_errors_propagate() {
        let config = config(IdType::String, Tolerance::Unbounded);
        let input = DataInput::new(
            VecSource::new(vec![InputNode::new("a"), InputNode::new("b")]),
            VecSource::<InputRelationship>::new(Vec::new()),
            config.clone(),
        )
        .unwrap();
        let failing = |_: InternalId, _: &InputNode| -> ImportResult<()> { Err(ImportError::internal("sink full")) };
        let err = Importer::new(&config).unwrap().run(&input, &failing, &Discard).unwrap_err();
        assert!(err.to_string().contains("sink full"));
    }

    #[test]
    fn single_pass_input_is_refused_before_reading() {
        let config = config(IdType::String, Tolerance::Unbounded);
        let opened = AtomicU64::new(0);
        let rels = FnSource::single_pass(|| -> std::io::Result<InputIter<'static, InputRelationship>> {
            opened.fetch_add(1, Ordering::Relaxed);
            Ok(Box::new(std::iter::empty::<std::io::Result<InputRelationship>>()))
        });
        let input = DataInput::new(VecSource::new(vec![InputNode::new("a")]), rels, config.clone()).unwrap();
        let seen = AtomicU64::new(0);
        let count = |_: InternalId, _: &InputNode| -> ImportResult<()> {
            seen.fetch_add(1, Ordering::Relaxed);
            Ok(())
        };

        let err = Importer::new(&config).unwrap().run(&input, &count, &Discard).unwrap_err();
        assert!(matches!(
            err,
            ImportError::Validation(ValidationError::SinglePassSource { input: "relationship" })
        ));
        assert_eq!(seen.load(Ordering::Relaxed), 0);
        assert_eq!(opened.load(Ordering::Relaxed), 0);
        assert_eq!(input.bad_collector().total(), 0);
    }
}
