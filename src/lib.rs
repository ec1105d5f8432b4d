//! # kyro-import - identity resolution for bulk graph imports
//!
//! Nodes arrive with external ids: dense integers, sparse integers or
//! arbitrary strings, each scoped to a named group. Relationships refer to
//! their endpoints by those external ids. This crate turns that into a graph
//! over dense internal ids:
//!
//! - **NumberArray**: large integer arrays on the heap, in anonymous memory
//!   maps, or in pages allocated on demand, chosen against memory budgets
//! - **IdGenerator**: assigns internal ids in node encounter order
//! - **IdMapper**: records (group, external id, internal id), sorts once,
//!   reports duplicates and answers lookups
//! - **BadCollector**: counts and reports duplicates and unresolved
//!   endpoints, failing the import past a tolerance
//! - **Importer**: the two-pass driver tying them together
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kyro_import::{DataInput, Discard, ImportConfig, Importer, InputNode, InputRelationship, VecSource};
//!
//! let config = ImportConfig::default();
//! let input = DataInput::new(
//!     VecSource::new(vec![InputNode::new("alice"), InputNode::new("bob")]),
//!     VecSource::new(vec![InputRelationship::new("alice", "KNOWS", "bob")]),
//!     config.clone(),
//! )?;
//! let summary = Importer::new(&config)?.run(&input, &Discard, &Discard)?;
//! assert_eq!(summary.unresolved, 0);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod array;
pub mod collector;
pub mod config;
pub mod error;
pub mod idmapping;
pub mod import;
pub mod input;
pub mod value;

pub use array::{AllocatorConfig, Backing, DynamicArray, MemoryBudget, NumberArray, NumberArrayFactory};
pub use collector::{BadCollector, BadEntry, BadEntryKind, CollectorConfig, CollectorSummary, Side, Tolerance};
pub use config::ImportConfig;
pub use error::{AllocationError, CollectorError, ImportError, ImportResult, MapperError, ValidationError};
pub use idmapping::{IdGenerator, IdMapper, IdType, InternalId, Phase, PrepareSummary};
pub use import::{Discard, ImportSummary, Importer, NodeSink, RelationshipSink, ResolvedRelationship};
pub use input::{
    calculate_estimates, DataInput, Estimates, ExternalId, FnSource, Group, Groups, Input, InputIter, InputIterable,
    InputNode, InputRelationship, VecSource,
};
pub use value::Value;
