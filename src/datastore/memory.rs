// In-process datastore backed by a concurrent map

use async_trait::async_trait;
use dashmap::DashMap;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use super::types::{Direction, Entity, FilterOp, Key, Query, Value};
use super::Datastore;
use crate::error::{DatastoreError, Result};

/// Thread-safe in-memory datastore.
///
/// Supports the structured queries the tools issue (single-property `=`/`IN`
/// filters, ordering, key-only projection, limit). GQL is not available.
/// Capability toggles let callers reproduce backends that reject IN filters
/// or fail for specific authors.
#[derive(Clone, Default)]
pub struct MemoryDatastore {
    entities: Arc<DashMap<Key, Entity>>,
    next_id: Arc<AtomicI64>,
    reject_in_filter: bool,
    failing_authors: Arc<HashSet<String>>,
    /// Sizes of committed delete transactions, in order
    delete_log: Arc<Mutex<Vec<usize>>>,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject `IN` filters with [`DatastoreError::Unsupported`]
    pub fn without_in_filter(mut self) -> Self {
        self.reject_in_filter = true;
        self
    }

    /// Fail every query whose filter mentions one of `authors`
    pub fn with_failing_authors(mut self, authors: &[&str]) -> Self {
        self.failing_authors = Arc::new(authors.iter().map(|a| a.to_string()).collect());
        self
    }

    /// Store `entity` under `key`, replacing any previous entity
    pub fn put(&self, key: Key, mut entity: Entity) -> Key {
        entity.key = Some(key.clone());
        self.entities.insert(key.clone(), entity);
        key
    }

    /// Store a `User` entity with a `follows` list
    pub fn put_user(&self, name: &str, follows: &[&str]) -> Key {
        let follows: Vec<String> = follows.iter().map(|f| f.to_string()).collect();
        let key = Key::named("User", name);
        self.put(key.clone(), Entity::new(key).with("follows", follows))
    }

    /// Store a `Post` entity with an auto-allocated id
    pub fn put_post(&self, author: &str, created: chrono::DateTime<chrono::Utc>) -> Key {
        let id = self.next_id.fetch_add(1, AtomicOrdering::Relaxed) + 1;
        let key = Key::with_id("Post", id);
        self.put(
            key.clone(),
            Entity::new(key)
                .with("author", author)
                .with("created", created),
        )
    }

    /// Number of stored entities of `kind`
    pub fn count(&self, kind: &str) -> usize {
        self.entities
            .iter()
            .filter(|entry| entry.key().kind() == kind)
            .count()
    }

    /// Sizes of the delete transactions committed so far
    pub fn delete_log(&self) -> Vec<usize> {
        self.delete_log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    fn check_filter(&self, query: &Query) -> Result<()> {
        let Some(filter) = &query.filter else {
            return Ok(());
        };

        if filter.op == FilterOp::In && self.reject_in_filter {
            return Err(DatastoreError::Unsupported("IN filter".to_string()));
        }

        let mentioned: Vec<&str> = match &filter.value {
            Value::Array(values) => values.iter().filter_map(|v| v.as_str()).collect(),
            other => other.as_str().into_iter().collect(),
        };
        if let Some(author) = mentioned.iter().find(|a| self.failing_authors.contains(**a)) {
            return Err(DatastoreError::ApiError {
                status: 503,
                message: format!("backend unavailable for {}", author),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn lookup(&self, key: &Key) -> Result<Option<Entity>> {
        Ok(self.entities.get(key).map(|entry| entry.value().clone()))
    }

    async fn run_query(&self, query: &Query) -> Result<Vec<Entity>> {
        self.check_filter(query)?;

        let mut matched: Vec<Entity> = self
            .entities
            .iter()
            .filter(|entry| entry.key().kind() == query.kind)
            .filter(|entry| {
                query
                    .filter
                    .as_ref()
                    .map(|f| f.matches(entry.value()))
                    .unwrap_or(true)
            })
            .map(|entry| entry.value().clone())
            .collect();

        // Stable key order first so results are deterministic
        matched.sort_by(|a, b| a.key.cmp(&b.key));
        for order in query.order.iter().rev() {
            matched.sort_by(|a, b| {
                let ord = compare_values(a.get(&order.property), b.get(&order.property));
                match order.direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                }
            });
        }

        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }

        if query.keys_only {
            matched = matched
                .into_iter()
                .map(|e| Entity {
                    key: e.key,
                    ..Default::default()
                })
                .collect();
        }

        Ok(matched)
    }

    async fn delete_in_transaction(&self, keys: &[Key]) -> Result<()> {
        for key in keys {
            self.entities.remove(key);
        }
        if let Ok(mut log) = self.delete_log.lock() {
            log.push(keys.len());
        }
        Ok(())
    }
}

/// Datastore-style ordering for the value types used as sort keys.
/// Missing properties sort first, like nulls.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a, b) {
            (Value::Timestamp(x), Value::Timestamp(y)) => x.cmp(y),
            (Value::Integer(x), Value::Integer(y)) => x.cmp(y),
            (Value::Double(x), Value::Double(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
            (Value::String(x), Value::String(y)) => x.cmp(y),
            (Value::Boolean(x), Value::Boolean(y)) => x.cmp(y),
            _ => Ordering::Equal,
        },
    }
}
