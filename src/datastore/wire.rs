// Cloud Datastore v1 JSON wire format

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};

use super::types::{Direction, Entity, GqlQuery, Key, KeyId, PathElement, Query, Value};
use crate::error::{DatastoreError, Result};

// ==================================================================================================
// Envelopes
// ==================================================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PartitionId {
    pub project_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupRequest {
    pub keys: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupResponse {
    #[serde(default)]
    pub found: Vec<EntityResult>,
    #[serde(default)]
    pub missing: Vec<EntityResult>,
    #[serde(default)]
    pub deferred: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunQueryRequest {
    pub partition_id: PartitionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gql_query: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunQueryResponse {
    pub batch: QueryResultBatch,
    /// Parsed form of a GQL request
    #[serde(default)]
    pub query: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResultBatch {
    #[serde(default)]
    pub entity_results: Vec<EntityResult>,
    #[serde(default)]
    pub more_results: String,
    #[serde(default)]
    pub end_cursor: Option<String>,
}

impl QueryResultBatch {
    /// The server stopped early and more results can be read from `end_cursor`
    pub fn is_unfinished(&self) -> bool {
        self.more_results == "NOT_FINISHED"
    }
}

#[derive(Debug, Deserialize)]
pub struct EntityResult {
    pub entity: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginTransactionRequest {}

#[derive(Debug, Deserialize)]
pub struct BeginTransactionResponse {
    pub transaction: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRequest {
    pub mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    pub mutations: Vec<serde_json::Value>,
}

// ==================================================================================================
// Keys
// ==================================================================================================

pub fn key_to_json(key: &Key, partition: &PartitionId) -> serde_json::Value {
    let path: Vec<serde_json::Value> = key
        .path
        .iter()
        .map(|element| {
            let mut obj = Map::new();
            obj.insert("kind".to_string(), json!(element.kind));
            match &element.id {
                Some(KeyId::Name(name)) => {
                    obj.insert("name".to_string(), json!(name));
                }
                // int64 travels as a decimal string
                Some(KeyId::Id(id)) => {
                    obj.insert("id".to_string(), json!(id.to_string()));
                }
                None => {}
            }
            serde_json::Value::Object(obj)
        })
        .collect();

    json!({
        "partitionId": partition,
        "path": path,
    })
}

pub fn key_from_json(value: &serde_json::Value) -> Result<Key> {
    let path = value
        .get("path")
        .and_then(|p| p.as_array())
        .ok_or_else(|| DatastoreError::Malformed("key without path".to_string()))?;

    let mut elements = Vec::with_capacity(path.len());
    for element in path {
        let kind = element
            .get("kind")
            .and_then(|k| k.as_str())
            .ok_or_else(|| DatastoreError::Malformed("key path element without kind".to_string()))?;

        let id = if let Some(name) = element.get("name").and_then(|n| n.as_str()) {
            Some(KeyId::Name(name.to_string()))
        } else if let Some(id) = element.get("id") {
            Some(KeyId::Id(parse_int64(id)?))
        } else {
            None
        };

        elements.push(PathElement {
            kind: kind.to_string(),
            id,
        });
    }

    Ok(Key { path: elements })
}

fn parse_int64(value: &serde_json::Value) -> Result<i64> {
    match value {
        serde_json::Value::String(s) => s
            .parse()
            .map_err(|_| DatastoreError::Malformed(format!("invalid int64: {}", s))),
        serde_json::Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| DatastoreError::Malformed(format!("invalid int64: {}", n))),
        other => Err(DatastoreError::Malformed(format!("invalid int64: {}", other))),
    }
}

// ==================================================================================================
// Values and entities
// ==================================================================================================

pub fn value_to_json(value: &Value, partition: &PartitionId) -> serde_json::Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Boolean(b) => json!({ "booleanValue": b }),
        Value::Integer(n) => json!({ "integerValue": n.to_string() }),
        Value::Double(d) => json!({ "doubleValue": d }),
        Value::String(s) => json!({ "stringValue": s }),
        Value::Timestamp(ts) => {
            json!({ "timestampValue": ts.to_rfc3339_opts(SecondsFormat::Micros, true) })
        }
        Value::Key(key) => json!({ "keyValue": key_to_json(key, partition) }),
        Value::Array(values) => {
            let values: Vec<serde_json::Value> =
                values.iter().map(|v| value_to_json(v, partition)).collect();
            json!({ "arrayValue": { "values": values } })
        }
        Value::Other(raw) => raw.clone(),
    }
}

pub fn value_from_json(value: &serde_json::Value) -> Result<Value> {
    let obj = value
        .as_object()
        .ok_or_else(|| DatastoreError::Malformed(format!("value is not an object: {}", value)))?;

    if obj.contains_key("nullValue") {
        return Ok(Value::Null);
    }
    if let Some(b) = obj.get("booleanValue").and_then(|v| v.as_bool()) {
        return Ok(Value::Boolean(b));
    }
    if let Some(n) = obj.get("integerValue") {
        return Ok(Value::Integer(parse_int64(n)?));
    }
    if let Some(d) = obj.get("doubleValue").and_then(|v| v.as_f64()) {
        return Ok(Value::Double(d));
    }
    if let Some(s) = obj.get("stringValue").and_then(|v| v.as_str()) {
        return Ok(Value::String(s.to_string()));
    }
    if let Some(ts) = obj.get("timestampValue").and_then(|v| v.as_str()) {
        let parsed = DateTime::parse_from_rfc3339(ts)
            .map_err(|e| DatastoreError::Malformed(format!("invalid timestamp {}: {}", ts, e)))?;
        return Ok(Value::Timestamp(parsed.with_timezone(&Utc)));
    }
    if let Some(key) = obj.get("keyValue") {
        return Ok(Value::Key(key_from_json(key)?));
    }
    if let Some(array) = obj.get("arrayValue") {
        let values = match array.get("values").and_then(|v| v.as_array()) {
            Some(values) => values
                .iter()
                .map(value_from_json)
                .collect::<Result<Vec<_>>>()?,
            // Empty arrays come back as `{}`
            None => Vec::new(),
        };
        return Ok(Value::Array(values));
    }

    Ok(Value::Other(value.clone()))
}

pub fn entity_from_json(value: &serde_json::Value) -> Result<Entity> {
    let key = value.get("key").map(key_from_json).transpose()?;

    let mut entity = Entity {
        key,
        ..Default::default()
    };

    if let Some(properties) = value.get("properties").and_then(|p| p.as_object()) {
        for (name, raw) in properties {
            entity
                .properties
                .insert(name.clone(), value_from_json(raw)?);
        }
    }

    Ok(entity)
}

// ==================================================================================================
// Queries
// ==================================================================================================

pub fn query_to_json(query: &Query, partition: &PartitionId) -> serde_json::Value {
    let mut obj = Map::new();
    obj.insert("kind".to_string(), json!([{ "name": query.kind }]));

    if let Some(filter) = &query.filter {
        obj.insert(
            "filter".to_string(),
            json!({
                "propertyFilter": {
                    "property": { "name": filter.property },
                    "op": filter.op.as_str(),
                    "value": value_to_json(&filter.value, partition),
                }
            }),
        );
    }

    if !query.order.is_empty() {
        let order: Vec<serde_json::Value> = query
            .order
            .iter()
            .map(|o| {
                let direction = match o.direction {
                    Direction::Ascending => "ASCENDING",
                    Direction::Descending => "DESCENDING",
                };
                json!({ "property": { "name": o.property }, "direction": direction })
            })
            .collect();
        obj.insert("order".to_string(), json!(order));
    }

    if query.keys_only {
        obj.insert(
            "projection".to_string(),
            json!([{ "property": { "name": "__key__" } }]),
        );
    }

    if let Some(limit) = query.limit {
        obj.insert("limit".to_string(), json!(limit));
    }

    serde_json::Value::Object(obj)
}

pub fn gql_to_json(query: &GqlQuery, partition: &PartitionId) -> serde_json::Value {
    let mut bindings = Map::new();
    for (name, value) in &query.named_bindings {
        bindings.insert(
            name.clone(),
            json!({ "value": value_to_json(value, partition) }),
        );
    }

    json!({
        "queryString": query.query_string,
        "namedBindings": bindings,
        "allowLiterals": false,
    })
}
