//! Input records and their external identifiers.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{ImportError, ImportResult, ValidationError};
use crate::value::Value;

/// An identifier as supplied by the input source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExternalId {
    /// Integer id; must be non-negative.
    Int(i64),
    /// Arbitrary string key.
    Str(String),
}

impl ExternalId {
    /// Bytes used for exact comparison of string-encoded ids.
    ///
    /// Integers are rendered in decimal so `Int(7)` and `Str("7")` compare
    /// equal under a string id space.
    #[must_use]
    pub fn key_bytes(&self) -> Cow<'_, [u8]> {
        match self {
            Self::Int(v) => Cow::Owned(v.to_string().into_bytes()),
            Self::Str(s) => Cow::Borrowed(s.as_bytes()),
        }
    }

    /// The integer value, rejecting strings and negatives.
    pub fn as_non_negative(&self) -> Result<u64, ValidationError> {
        match self {
            Self::Int(v) if *v < 0 => Err(ValidationError::NegativeExternalId { value: *v }),
            Self::Int(v) => Ok(v.unsigned_abs()),
            Self::Str(_) => Err(ValidationError::IdTypeMismatch {
                expected: "integer",
                actual: "string",
            }),
        }
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for ExternalId {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for ExternalId {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for ExternalId {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// A namespace of external ids. Equal ids in different groups are different
/// entities.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Group {
    id: u16,
    name: Arc<str>,
}

impl Group {
    /// Name of the default group.
    pub const GLOBAL_NAME: &'static str = "global id space";

    /// The default group (id 0).
    #[must_use]
    pub fn global() -> Self {
        Self {
            id: 0,
            name: Arc::from(Self::GLOBAL_NAME),
        }
    }

    /// Numeric id stored alongside every mapping entry.
    #[must_use]
    pub const fn id(&self) -> u16 {
        self.id
    }

    /// Group name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Default for Group {
    fn default() -> Self {
        Self::global()
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[derive(Debug)]
struct GroupState {
    by_name: HashMap<Arc<str>, u16>,
    by_id: Vec<Group>,
}

/// Registry of groups for one import.
#[derive(Debug)]
pub struct Groups {
    state: RwLock<GroupState>,
}

impl Default for Groups {
    fn default() -> Self {
        Self::new()
    }
}

impl Groups {
    /// Maximum number of groups, including the global one.
    pub const MAX: usize = u16::MAX as usize + 1;

    /// Create a registry holding only the global group.
    #[must_use]
    pub fn new() -> Self {
        let global = Group::global();
        let mut by_name = HashMap::new();
        by_name.insert(Arc::clone(&global.name), 0);
        Self {
            state: RwLock::new(GroupState {
                by_name,
                by_id: vec![global],
            }),
        }
    }

    /// Return the group called `name`, creating it on first use.
    ///
    /// # Errors
    /// `TooManyGroups` once `Groups::MAX` groups exist.
    pub fn get_or_create(&self, name: &str) -> ImportResult<Group> {
        {
            let state = self.state.read().map_err(|_| lock_err("groups"))?;
            if let Some(&id) = state.by_name.get(name) {
                return Ok(state.by_id[usize::from(id)].clone());
            }
        }

        let mut state = self.state.write().map_err(|_| lock_err("groups"))?;
        if let Some(&id) = state.by_name.get(name) {
            return Ok(state.by_id[usize::from(id)].clone());
        }
        let id = u16::try_from(state.by_id.len())
            .map_err(|_| ValidationError::TooManyGroups { max: Self::MAX })?;
        let group = Group {
            id,
            name: Arc::from(name),
        };
        state.by_name.insert(Arc::clone(&group.name), id);
        state.by_id.push(group.clone());
        Ok(group)
    }

    /// Look up a group by numeric id.
    pub fn get(&self, id: u16) -> ImportResult<Group> {
        let state = self.state.read().map_err(|_| lock_err("groups"))?;
        state
            .by_id
            .get(usize::from(id))
            .cloned()
            .ok_or_else(|| ValidationError::UnknownGroup { id }.into())
    }

    /// Number of registered groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.by_id.len()).unwrap_or(0)
    }

    /// Always false; the global group exists from the start.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock_err(context: &'static str) -> ImportError {
    ImportError::internal(format!("poisoned lock: {context}"))
}

/// A node as read from the input.
#[derive(Debug, Clone, PartialEq)]
pub struct InputNode {
    /// External id, or `None` for nodes that are never referenced.
    pub id: Option<ExternalId>,
    pub group: Group,
    pub labels: Vec<String>,
    pub properties: Vec<(String, Value)>,
}

impl InputNode {
    /// A node with `id` in the global group.
    pub fn new(id: impl Into<ExternalId>) -> Self {
        Self {
            id: Some(id.into()),
            group: Group::global(),
            labels: Vec::new(),
            properties: Vec::new(),
        }
    }

    /// A node without an external id.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            id: None,
            group: Group::global(),
            labels: Vec::new(),
            properties: Vec::new(),
        }
    }

    #[must_use]
    pub fn in_group(mut self, group: Group) -> Self {
        self.group = group;
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.push((key.into(), value.into()));
        self
    }
}

/// A relationship as read from the input. Identified only by its position in
/// the relationship stream.
#[derive(Debug, Clone, PartialEq)]
pub struct InputRelationship {
    pub start: ExternalId,
    pub start_group: Group,
    pub end: ExternalId,
    pub end_group: Group,
    pub rel_type: String,
    pub properties: Vec<(String, Value)>,
}

impl InputRelationship {
    /// A relationship between two ids in the global group.
    pub fn new(start: impl Into<ExternalId>, rel_type: impl Into<String>, end: impl Into<ExternalId>) -> Self {
        Self {
            start: start.into(),
            start_group: Group::global(),
            end: end.into(),
            end_group: Group::global(),
            rel_type: rel_type.into(),
            properties: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_groups(mut self, start_group: Group, end_group: Group) -> Self {
        self.start_group = start_group;
        self.end_group = end_group;
        self
    }

    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.push((key.into(), value.into()));
        self
    }
}

impl fmt::Display for InputRelationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})-[{}]->({})", self.start, self.rel_type, self.end)
    }
}
