//! Entity, key and query types shared by every datastore backend.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Identifier of the last element of a key path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyId {
    Name(String),
    Id(i64),
}

impl std::fmt::Display for KeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyId::Name(name) => write!(f, "{}", name),
            KeyId::Id(id) => write!(f, "{}", id),
        }
    }
}

/// One `(kind, id)` step of a key path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathElement {
    pub kind: String,
    /// `None` for incomplete keys
    pub id: Option<KeyId>,
}

/// Entity key. Ancestor paths are kept intact so keys read from a query can be
/// handed back for deletion unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    pub path: Vec<PathElement>,
}

impl Key {
    /// Key with a single named path element, e.g. `User/alice`
    pub fn named(kind: &str, name: &str) -> Self {
        Self {
            path: vec![PathElement {
                kind: kind.to_string(),
                id: Some(KeyId::Name(name.to_string())),
            }],
        }
    }

    /// Key with a single numeric path element
    pub fn with_id(kind: &str, id: i64) -> Self {
        Self {
            path: vec![PathElement {
                kind: kind.to_string(),
                id: Some(KeyId::Id(id)),
            }],
        }
    }

    /// Kind of the last path element
    pub fn kind(&self) -> &str {
        self.path.last().map(|e| e.kind.as_str()).unwrap_or("")
    }

    /// Id or name of the last path element
    pub fn id(&self) -> Option<&KeyId> {
        self.path.last().and_then(|e| e.id.as_ref())
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .path
            .iter()
            .map(|e| match &e.id {
                Some(id) => format!("{}/{}", e.kind, id),
                None => e.kind.clone(),
            })
            .collect();
        write!(f, "{}", parts.join("/"))
    }
}

/// Property value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    Key(Key),
    Array(Vec<Value>),
    /// Value types this crate never inspects (blobs, geo points, embedded
    /// entities) are carried through as their raw wire form.
    Other(serde_json::Value),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(values) => Some(values),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(ts: DateTime<Utc>) -> Self {
        Value::Timestamp(ts)
    }
}

impl From<Vec<String>> for Value {
    fn from(values: Vec<String>) -> Self {
        Value::Array(values.into_iter().map(Value::String).collect())
    }
}

/// A stored entity
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Entity {
    pub key: Option<Key>,
    pub properties: BTreeMap<String, Value>,
}

impl Entity {
    pub fn new(key: Key) -> Self {
        Self {
            key: Some(key),
            properties: BTreeMap::new(),
        }
    }

    /// Builder-style property setter
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(name.to_string(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Equal,
    In,
}

impl FilterOp {
    /// Operator name on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Equal => "EQUAL",
            FilterOp::In => "IN",
        }
    }
}

/// Single-property filter
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub property: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn eq(property: &str, value: impl Into<Value>) -> Self {
        Self {
            property: property.to_string(),
            op: FilterOp::Equal,
            value: value.into(),
        }
    }

    pub fn is_in(property: &str, values: Vec<String>) -> Self {
        Self {
            property: property.to_string(),
            op: FilterOp::In,
            value: Value::from(values),
        }
    }

    /// Whether `entity` satisfies this filter
    pub fn matches(&self, entity: &Entity) -> bool {
        let Some(actual) = entity.get(&self.property) else {
            return false;
        };
        match self.op {
            FilterOp::Equal => actual == &self.value,
            FilterOp::In => self
                .value
                .as_array()
                .map(|candidates| candidates.contains(actual))
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyOrder {
    pub property: String,
    pub direction: Direction,
}

/// Structured query over one kind
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub kind: String,
    pub filter: Option<Filter>,
    pub order: Vec<PropertyOrder>,
    pub keys_only: bool,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            filter: None,
            order: Vec::new(),
            keys_only: false,
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn order_desc(mut self, property: &str) -> Self {
        self.order.push(PropertyOrder {
            property: property.to_string(),
            direction: Direction::Descending,
        });
        self
    }

    pub fn keys_only(mut self) -> Self {
        self.keys_only = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// GQL statement with named bindings (`@name`)
#[derive(Debug, Clone, PartialEq)]
pub struct GqlQuery {
    pub query_string: String,
    pub named_bindings: BTreeMap<String, Value>,
}

impl GqlQuery {
    pub fn new(query_string: &str) -> Self {
        Self {
            query_string: query_string.to_string(),
            named_bindings: BTreeMap::new(),
        }
    }

    pub fn bind(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.named_bindings.insert(name.to_string(), value.into());
        self
    }

    /// Row cap from the `limit` binding, if one is bound to a non-negative integer
    pub fn limit(&self) -> Option<usize> {
        match self.named_bindings.get("limit") {
            Some(Value::Integer(n)) => usize::try_from(*n).ok(),
            _ => None,
        }
    }
}
