use std::fmt;

use serde::{Deserialize, Serialize};

use crate::idmapping::InternalId;
use crate::input::{ExternalId, Group, InputRelationship};

/// Which endpoint of a relationship failed to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Start,
    End,
    Both,
}

impl Side {
    /// Combine the lookup outcome of both ends; `None` if both resolved.
    #[must_use]
    pub const fn from_missing(start_missing: bool, end_missing: bool) -> Option<Self> {
        match (start_missing, end_missing) {
            (true, true) => Some(Self::Both),
            (true, false) => Some(Self::Start),
            (false, true) => Some(Self::End),
            (false, false) => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::End => write!(f, "end"),
            Self::Both => write!(f, "start and end"),
        }
    }
}

/// Kind of a [`BadEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BadEntryKind {
    DuplicateNode,
    UnresolvedEndpoint,
}

/// A recoverable data problem found during identity resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum BadEntry {
    /// `id` occurs more than once in `group`. The first occurrence keeps
    /// `canonical`; `duplicate` is the internal id the later node was issued.
    ///
    /// Every node, anonymous or not, is issued the next internal id in stream
    /// order, so both ids are also positions in the node stream. The record
    /// at `duplicate` is the one that was dropped.
    DuplicateNode {
        group: Group,
        id: ExternalId,
        canonical: InternalId,
        duplicate: InternalId,
    },
    /// The relationship at stream `position` refers to a node that was never
    /// mapped.
    UnresolvedEndpoint {
        position: u64,
        relationship: Box<InputRelationship>,
        side: Side,
    },
}

impl BadEntry {
    #[must_use]
    pub const fn kind(&self) -> BadEntryKind {
        match self {
            Self::DuplicateNode { .. } => BadEntryKind::DuplicateNode,
            Self::UnresolvedEndpoint { .. } => BadEntryKind::UnresolvedEndpoint,
        }
    }
}

impl fmt::Display for BadEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateNode {
                group,
                id,
                canonical,
                duplicate,
            } => write!(
                f,
                "Id '{id}' is defined more than once in group '{group}' (kept node {canonical}, dropped node {duplicate} at node position {duplicate})"
            ),
            Self::UnresolvedEndpoint {
                position,
                relationship,
                side,
            } => {
                write!(f, "Relationship {position} {relationship} refers to missing ")?;
                match side {
                    Side::Start => write!(
                        f,
                        "start node '{}' in group '{}'",
                        relationship.start, relationship.start_group
                    ),
                    Side::End => write!(
                        f,
                        "end node '{}' in group '{}'",
                        relationship.end, relationship.end_group
                    ),
                    Side::Both => write!(
                        f,
                        "start node '{}' in group '{}' and end node '{}' in group '{}'",
                        relationship.start, relationship.start_group, relationship.end, relationship.end_group
                    ),
                }
            }
        }
    }
}
