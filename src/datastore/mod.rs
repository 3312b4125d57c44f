//! Datastore access layer.
//!
//! The [`Datastore`] trait is the only seam the timeline resolver, the load
//! driver and the cleanup loop depend on. Two backends implement it:
//! - [`RestDatastore`]: Cloud Datastore v1 REST API (or the local emulator)
//! - [`MemoryDatastore`]: in-process store used by tests

pub mod memory;
pub mod rest;
pub mod types;
mod wire;

use async_trait::async_trait;

use crate::error::{DatastoreError, Result};

pub use memory::MemoryDatastore;
pub use rest::RestDatastore;
pub use types::{Direction, Entity, Filter, FilterOp, GqlQuery, Key, KeyId, PathElement, Query, Value};

/// Operations the tools need from the managed datastore.
///
/// Implementations are shared across concurrent load-test tasks, so every
/// method takes `&self`.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Fetch one entity by key, `None` when it does not exist
    async fn lookup(&self, key: &Key) -> Result<Option<Entity>>;

    /// Run a structured query, honoring its filter, order, projection and limit
    async fn run_query(&self, query: &Query) -> Result<Vec<Entity>>;

    /// Whether [`Datastore::run_gql`] is available on this backend
    fn supports_gql(&self) -> bool {
        false
    }

    /// Run a GQL statement with named bindings
    async fn run_gql(&self, _query: &GqlQuery) -> Result<Vec<Entity>> {
        Err(DatastoreError::Unsupported("GQL".to_string()))
    }

    /// Delete all `keys` atomically in one transaction
    async fn delete_in_transaction(&self, keys: &[Key]) -> Result<()>;
}
