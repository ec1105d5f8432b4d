//! Up-front size estimates for an input.

use serde::{Deserialize, Serialize};

use super::entity::{InputNode, InputRelationship};
use super::source::{ensure_replayable, InputIterable};
use crate::error::ImportResult;
use crate::value::Value;

/// Counts and sizes for a whole input. Any field may be [`Estimates::UNKNOWN`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Estimates {
    pub number_of_nodes: i64,
    pub number_of_relationships: i64,
    pub number_of_node_properties: i64,
    pub number_of_relationship_properties: i64,
    /// Bytes the node properties are expected to take on disk.
    pub size_of_node_properties: i64,
    /// Bytes the relationship properties are expected to take on disk.
    pub size_of_relationship_properties: i64,
    /// Sum of label counts over all nodes: 2 nodes with 2 labels each is 4.
    pub number_of_node_labels: i64,
}

impl Estimates {
    /// Sentinel for a field that was not computed.
    pub const UNKNOWN: i64 = -1;

    /// Estimates with every field unknown.
    #[must_use]
    pub const fn unknown() -> Self {
        Self {
            number_of_nodes: Self::UNKNOWN,
            number_of_relationships: Self::UNKNOWN,
            number_of_node_properties: Self::UNKNOWN,
            number_of_relationship_properties: Self::UNKNOWN,
            size_of_node_properties: Self::UNKNOWN,
            size_of_relationship_properties: Self::UNKNOWN,
            number_of_node_labels: Self::UNKNOWN,
        }
    }

    /// Returns true if `value` is a computed estimate.
    #[must_use]
    pub const fn is_known(value: i64) -> bool {
        value != Self::UNKNOWN
    }
}

impl Default for Estimates {
    fn default() -> Self {
        Self::unknown()
    }
}

#[derive(Default)]
struct Tally {
    entities: u64,
    properties: u64,
    size: u64,
    labels: u64,
}

fn clamp(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn tally_properties<S>(tally: &mut Tally, buf: &mut Vec<Value>, properties: &[(String, Value)], size_calculator: &S)
where
    S: Fn(&[Value]) -> u64,
{
    tally.entities += 1;
    tally.properties += properties.len() as u64;
    if !properties.is_empty() {
        buf.clear();
        buf.extend(properties.iter().map(|(_, v)| v.clone()));
        tally.size = tally.size.saturating_add(size_calculator(buf.as_slice()));
    }
}

/// Scan both sources once and compute [`Estimates`].
///
/// `size_calculator` maps the property values of one entity to their on-disk
/// size. Mapper state is not touched.
///
/// # Errors
/// `SinglePassSource` if either source cannot be replayed, since the import
/// still has to read it afterwards. Any I/O error from either source; this
/// aborts estimation only.
pub fn calculate_estimates<S>(
    nodes: &dyn InputIterable<InputNode>,
    relationships: &dyn InputIterable<InputRelationship>,
    size_calculator: S,
) -> ImportResult<Estimates>
where
    S: Fn(&[Value]) -> u64,
{
    ensure_replayable(nodes, "node")?;
    ensure_replayable(relationships, "relationship")?;
    let mut buf = Vec::new();

    let mut node_tally = Tally::default();
    for node in nodes.iter()? {
        let node = node?;
        node_tally.labels += node.labels.len() as u64;
        tally_properties(&mut node_tally, &mut buf, &node.properties, &size_calculator);
    }

    let mut rel_tally = Tally::default();
    for rel in relationships.iter()? {
        let rel = rel?;
        tally_properties(&mut rel_tally, &mut buf, &rel.properties, &size_calculator);
    }

    let estimates = Estimates {
        number_of_nodes: clamp(node_tally.entities),
        number_of_relationships: clamp(rel_tally.entities),
        number_of_node_properties: clamp(node_tally.properties),
        number_of_relationship_properties: clamp(rel_tally.properties),
        size_of_node_properties: clamp(node_tally.size),
        size_of_relationship_properties: clamp(rel_tally.size),
        number_of_node_labels: clamp(node_tally.labels),
    };
    tracing::debug!(?estimates, "calculated input estimates");
    Ok(estimates)
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;
    use crate::input::{FnSource, InputIter, VecSource};

    fn value_size(values: &[Value]) -> u64 {
        values
            .iter()
            .map(|v| match v {
                Value::String(s) => s.len() as u64,
                _ => 8,
            })
            .sum()
    }

    #[test]
    fn counts_entities_properties_and_labels() {
        let nodes = VecSource::new(vec![
            InputNode::new("a").with_label("Person").with_label("Admin").with_property("name", "Ada"),
            InputNode::new("b").with_label("Person").with_property("age", 36i64),
        ]);
        let rels = VecSource::new(vec![
            InputRelationship::new("a", "KNOWS", "b").with_property("since", 1843i64),
            InputRelationship::new("b", "KNOWS", "a"),
        ]);

        let est = calculate_estimates(&nodes, &rels, value_size).unwrap();
        assert_eq!(est.number_of_nodes, 2);
        assert_eq!(est.number_of_relationships, 2);
        assert_eq!(est.number_of_node_properties, 2);
        assert_eq!(est.number_of_relationship_properties, 1);
        assert_eq!(est.size_of_node_properties, 3 + 8);
        assert_eq!(est.size_of_relationship_properties, 8);
        assert_eq!(est.number_of_node_labels, 3);
    }

    #[test]
    fn io_failure_aborts_estimation() {
        let nodes = FnSource::new(|| -> io::Result<InputIter<'static, InputNode>> {
            Err(io::Error::new(io::ErrorKind::NotFound, "nodes.csv"))
        });
        let rels = VecSource::<InputRelationship>::new(Vec::new());
        let err = calculate_estimates(&nodes, &rels, value_size).unwrap_err();
        assert!(err.is_io());
    }

    #[test]
    fn single_pass_sources_are_not_estimated() {
        let nodes = FnSource::single_pass(|| -> io::Result<InputIter<'static, InputNode>> {
            Ok(Box::new(vec![Ok(InputNode::new("a"))].into_iter()))
        });
        let rels = VecSource::<InputRelationship>::new(Vec::new());
        let err = calculate_estimates(&nodes, &rels, value_size).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("node source"));
        // The refused source was never opened, so the import can still read it.
        assert_eq!(nodes.iter().unwrap().count(), 1);
    }

    #[test]
    fn unknown_is_the_default() {
        let est = Estimates::default();
        assert!(!Estimates::is_known(est.number_of_nodes));
        assert!(!Estimates::is_known(est.size_of_relationship_properties));
    }
}
