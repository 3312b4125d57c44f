use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;

use super::types::{Entity, GqlQuery, Key, Query};
use super::wire::{
    self, BeginTransactionRequest, BeginTransactionResponse, CommitRequest, LookupRequest,
    LookupResponse, PartitionId, RunQueryRequest, RunQueryResponse,
};
use super::Datastore;
use crate::config::DatastoreSettings;
use crate::error::{DatastoreError, Result};

/// Lookups answered with `deferred` keys are re-issued at most this many times
const MAX_DEFERRED_LOOKUPS: u32 = 3;

/// Cloud Datastore v1 REST client with retry logic
pub struct RestDatastore {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// API root, e.g. `https://datastore.googleapis.com` or `http://localhost:8081`
    base_url: String,

    /// Project and namespace every request is scoped to
    partition: PartitionId,

    /// Bearer token; `None` against the emulator
    access_token: Option<String>,

    /// Maximum number of retries
    max_retries: u32,

    /// Base delay for exponential backoff (milliseconds)
    base_delay_ms: u64,
}

impl RestDatastore {
    /// Create a new client from resolved settings
    pub fn new(settings: &DatastoreSettings) -> anyhow::Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(settings.max_connections)
            .connect_timeout(Duration::from_secs(settings.connect_timeout))
            .timeout(Duration::from_secs(settings.request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            partition: PartitionId {
                project_id: settings.project_id.clone(),
                namespace_id: settings.namespace.clone(),
            },
            access_token: settings.access_token.clone(),
            max_retries: settings.max_retries,
            base_delay_ms: 1000, // 1 second base delay
        })
    }

    /// Override the backoff base delay
    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/v1/projects/{}:{}",
            self.base_url, self.partition.project_id, method
        )
    }

    /// POST a JSON body to a project method
    /// Automatically handles:
    /// - 429: exponential backoff
    /// - 5xx: exponential backoff
    /// - network errors: exponential backoff
    async fn post<Req, Resp>(&self, method: &str, body: &Req) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = self.method_url(method);
        let payload = serde_json::to_vec(body)
            .map_err(|e| DatastoreError::Internal(anyhow::anyhow!("Failed to encode request: {}", e)))?;
        let mut attempt = 0;

        tracing::debug!(method = method, url = %url, "Sending Datastore request");

        loop {
            let mut request = self
                .client
                .post(&url)
                .header("Content-Type", "application/json")
                .body(payload.clone());
            if let Some(token) = &self.access_token {
                request = request.header("Authorization", format!("Bearer {}", token));
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let bytes = response.bytes().await.map_err(|e| DatastoreError::Transport {
                            kind: "body_error".to_string(),
                            message: e.to_string(),
                        })?;
                        return serde_json::from_slice(&bytes).map_err(|e| {
                            DatastoreError::Malformed(format!("{} response: {}", method, e))
                        });
                    }

                    if is_retryable(status) && attempt < self.max_retries {
                        let delay = self.calculate_backoff_delay(attempt);
                        tracing::warn!(
                            "Received {} from {}, retrying after {}ms (attempt {}/{})",
                            status,
                            method,
                            delay,
                            attempt + 1,
                            self.max_retries
                        );
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        attempt += 1;
                        continue;
                    }

                    let error_text = response.text().await.unwrap_or_default();
                    tracing::debug!(
                        status = status.as_u16(),
                        url = %url,
                        response_body = %error_text,
                        attempt = attempt + 1,
                        "Datastore request failed with error response"
                    );
                    return Err(DatastoreError::ApiError {
                        status: status.as_u16(),
                        message: extract_error_message(&error_text),
                    });
                }

                Err(e) => {
                    let error_kind = if e.is_timeout() {
                        "timeout"
                    } else if e.is_connect() {
                        "connection_failed"
                    } else if e.is_request() {
                        "request_error"
                    } else if e.is_body() {
                        "body_error"
                    } else {
                        "unknown"
                    };

                    if attempt < self.max_retries {
                        let delay = self.calculate_backoff_delay(attempt);
                        tracing::warn!(
                            error_kind = error_kind,
                            error = %e,
                            "Datastore request failed, retrying after {}ms (attempt {}/{})",
                            delay,
                            attempt + 1,
                            self.max_retries
                        );
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        attempt += 1;
                        continue;
                    }

                    tracing::error!(
                        error_kind = error_kind,
                        error = %e,
                        url = %url,
                        total_attempts = attempt + 1,
                        "Datastore request failed after all retries"
                    );
                    return Err(DatastoreError::Transport {
                        kind: error_kind.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    /// Exponential backoff: base_delay * 2^attempt plus up to 10% jitter
    fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let delay = self.base_delay_ms * 2_u64.pow(attempt);
        let jitter = (delay as f64 * 0.1 * rand::random::<f64>()) as u64;
        delay + jitter
    }

    /// Run a query request, following `NOT_FINISHED` batches until `limit`
    /// entities are collected or the server reports no more results.
    async fn collect_batches(
        &self,
        mut request: RunQueryRequest,
        limit: Option<usize>,
    ) -> Result<Vec<Entity>> {
        let mut entities = Vec::new();

        loop {
            let response: RunQueryResponse = self.post("runQuery", &request).await?;
            let batch_len = response.batch.entity_results.len();

            for result in &response.batch.entity_results {
                entities.push(wire::entity_from_json(&result.entity)?);
            }

            if let Some(limit) = limit {
                if entities.len() >= limit {
                    entities.truncate(limit);
                    break;
                }
            }

            let cursor = match (&response.batch.end_cursor, response.batch.is_unfinished()) {
                (Some(cursor), true) if batch_len > 0 => cursor.clone(),
                _ => break,
            };

            // GQL responses echo the parsed structured query; continue with that
            let Some(mut query) = response.query.or(request.query.take()) else {
                break;
            };
            query["startCursor"] = json!(cursor);
            if let Some(limit) = limit {
                query["limit"] = json!(limit - entities.len());
            }

            tracing::debug!(collected = entities.len(), "Continuing query from cursor");

            request = RunQueryRequest {
                partition_id: self.partition.clone(),
                query: Some(query),
                gql_query: None,
            };
        }

        Ok(entities)
    }
}

#[async_trait]
impl Datastore for RestDatastore {
    async fn lookup(&self, key: &Key) -> Result<Option<Entity>> {
        let request = LookupRequest {
            keys: vec![wire::key_to_json(key, &self.partition)],
        };

        for _ in 0..MAX_DEFERRED_LOOKUPS {
            let response: LookupResponse = self.post("lookup", &request).await?;

            if let Some(found) = response.found.first() {
                return wire::entity_from_json(&found.entity).map(Some);
            }
            if response.deferred.is_empty() {
                return Ok(None);
            }
            tracing::debug!(key = %key, "Lookup deferred, retrying");
        }

        Err(DatastoreError::Transport {
            kind: "deferred".to_string(),
            message: format!("lookup of {} kept being deferred", key),
        })
    }

    async fn run_query(&self, query: &Query) -> Result<Vec<Entity>> {
        let request = RunQueryRequest {
            partition_id: self.partition.clone(),
            query: Some(wire::query_to_json(query, &self.partition)),
            gql_query: None,
        };
        self.collect_batches(request, query.limit).await
    }

    fn supports_gql(&self) -> bool {
        true
    }

    async fn run_gql(&self, query: &GqlQuery) -> Result<Vec<Entity>> {
        let request = RunQueryRequest {
            partition_id: self.partition.clone(),
            query: None,
            gql_query: Some(wire::gql_to_json(query, &self.partition)),
        };
        self.collect_batches(request, query.limit()).await
    }

    async fn delete_in_transaction(&self, keys: &[Key]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let begin: BeginTransactionResponse = self
            .post("beginTransaction", &BeginTransactionRequest {})
            .await?;

        let mutations = keys
            .iter()
            .map(|key| json!({ "delete": wire::key_to_json(key, &self.partition) }))
            .collect();

        let commit = CommitRequest {
            mode: "TRANSACTIONAL",
            transaction: Some(begin.transaction),
            mutations,
        };
        let _: serde_json::Value = self.post("commit", &commit).await?;

        tracing::debug!(count = keys.len(), "Committed delete transaction");
        Ok(())
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Pull `error.message` out of a Google API error body, falling back to the raw text
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::types::Filter;

    fn settings(base_url: &str) -> DatastoreSettings {
        DatastoreSettings {
            project_id: "tiny-insta".to_string(),
            namespace: None,
            base_url: base_url.to_string(),
            access_token: Some("test-token".to_string()),
            max_connections: 20,
            connect_timeout: 5,
            request_timeout: 5,
            max_retries: 2,
        }
    }

    #[test]
    fn test_backoff_calculation() {
        let store = RestDatastore::new(&settings("http://localhost:8081")).unwrap();

        let delay0 = store.calculate_backoff_delay(0);
        let delay1 = store.calculate_backoff_delay(1);
        let delay2 = store.calculate_backoff_delay(2);

        assert!((1000..=1100).contains(&delay0));
        assert!((2000..=2200).contains(&delay1));
        assert!((4000..=4400).contains(&delay2));
    }

    #[test]
    fn test_extract_error_message() {
        let body = r#"{"error":{"code":400,"message":"no matching index found","status":"FAILED_PRECONDITION"}}"#;
        assert_eq!(extract_error_message(body), "no matching index found");
        assert_eq!(extract_error_message("plain text"), "plain text");
    }

    #[tokio::test]
    async fn test_lookup_found() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/projects/tiny-insta:lookup")
            .match_header("authorization", "Bearer test-token")
            .match_body(mockito::Matcher::PartialJson(json!({
                "keys": [{ "path": [{ "kind": "User", "name": "alice" }] }]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "found": [{
                        "entity": {
                            "key": { "path": [{ "kind": "User", "name": "alice" }] },
                            "properties": {
                                "follows": { "arrayValue": { "values": [{ "stringValue": "bob" }] } }
                            }
                        }
                    }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let store = RestDatastore::new(&settings(&server.url())).unwrap();
        let entity = store.lookup(&Key::named("User", "alice")).await.unwrap().unwrap();

        assert_eq!(entity.key, Some(Key::named("User", "alice")));
        assert!(entity.get("follows").is_some());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_lookup_missing() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/projects/tiny-insta:lookup")
            .with_status(200)
            .with_body(
                json!({
                    "missing": [{ "entity": { "key": { "path": [{ "kind": "User", "name": "ghost" }] } } }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let store = RestDatastore::new(&settings(&server.url())).unwrap();
        let entity = store.lookup(&Key::named("User", "ghost")).await.unwrap();
        assert!(entity.is_none());
    }

    #[tokio::test]
    async fn test_run_query_follows_cursor() {
        let mut server = mockito::Server::new_async().await;

        let second = server
            .mock("POST", "/v1/projects/tiny-insta:runQuery")
            .match_body(mockito::Matcher::PartialJson(json!({
                "query": { "startCursor": "page-2", "limit": 1 }
            })))
            .with_status(200)
            .with_body(
                json!({
                    "batch": {
                        "entityResults": [
                            { "entity": { "key": { "path": [{ "kind": "Post", "id": "3" }] } } }
                        ],
                        "moreResults": "MORE_RESULTS_AFTER_LIMIT",
                        "endCursor": "page-3"
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let first = server
            .mock("POST", "/v1/projects/tiny-insta:runQuery")
            .match_body(mockito::Matcher::PartialJson(json!({
                "query": { "limit": 3 }
            })))
            .with_status(200)
            .with_body(
                json!({
                    "batch": {
                        "entityResults": [
                            { "entity": { "key": { "path": [{ "kind": "Post", "id": "1" }] } } },
                            { "entity": { "key": { "path": [{ "kind": "Post", "id": "2" }] } } }
                        ],
                        "moreResults": "NOT_FINISHED",
                        "endCursor": "page-2"
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let store = RestDatastore::new(&settings(&server.url())).unwrap();
        let query = Query::new("Post")
            .filter(Filter::eq("author", "alice"))
            .order_desc("created")
            .limit(3);
        let entities = store.run_query(&query).await.unwrap();

        assert_eq!(entities.len(), 3);
        assert_eq!(entities[2].key, Some(Key::with_id("Post", 3)));
        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_run_query_error_response() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/projects/tiny-insta:runQuery")
            .with_status(400)
            .with_body(r#"{"error":{"code":400,"message":"no matching index found"}}"#)
            .create_async()
            .await;

        let store = RestDatastore::new(&settings(&server.url())).unwrap();
        let err = store.run_query(&Query::new("Post").limit(1)).await.unwrap_err();

        match err {
            DatastoreError::ApiError { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "no matching index found");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/projects/tiny-insta:lookup")
            .with_status(503)
            .with_body("unavailable")
            .expect(3)
            .create_async()
            .await;

        let store = RestDatastore::new(&settings(&server.url()))
            .unwrap()
            .with_base_delay_ms(1);
        let err = store.lookup(&Key::named("User", "alice")).await.unwrap_err();

        assert!(matches!(err, DatastoreError::ApiError { status: 503, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_delete_in_transaction() {
        let mut server = mockito::Server::new_async().await;
        let begin = server
            .mock("POST", "/v1/projects/tiny-insta:beginTransaction")
            .with_status(200)
            .with_body(r#"{"transaction":"dHgtMQ=="}"#)
            .create_async()
            .await;
        let commit = server
            .mock("POST", "/v1/projects/tiny-insta:commit")
            .match_body(mockito::Matcher::PartialJson(json!({
                "mode": "TRANSACTIONAL",
                "transaction": "dHgtMQ==",
                "mutations": [
                    { "delete": { "path": [{ "kind": "Post", "id": "1" }] } },
                    { "delete": { "path": [{ "kind": "Post", "id": "2" }] } }
                ]
            })))
            .with_status(200)
            .with_body(r#"{"mutationResults":[{},{}]}"#)
            .create_async()
            .await;

        let store = RestDatastore::new(&settings(&server.url())).unwrap();
        store
            .delete_in_transaction(&[Key::with_id("Post", 1), Key::with_id("Post", 2)])
            .await
            .unwrap();

        begin.assert_async().await;
        commit.assert_async().await;
    }

    #[tokio::test]
    async fn test_run_gql_sends_bindings() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/projects/tiny-insta:runQuery")
            .match_body(mockito::Matcher::PartialJson(json!({
                "gqlQuery": {
                    "queryString": "SELECT * FROM Post WHERE author IN @authors",
                    "allowLiterals": false
                }
            })))
            .with_status(200)
            .with_body(r#"{"batch":{"moreResults":"NO_MORE_RESULTS"}}"#)
            .create_async()
            .await;

        let store = RestDatastore::new(&settings(&server.url())).unwrap();
        assert!(store.supports_gql());

        let gql = GqlQuery::new("SELECT * FROM Post WHERE author IN @authors")
            .bind("authors", vec!["alice".to_string()]);
        let entities = store.run_gql(&gql).await.unwrap();

        assert!(entities.is_empty());
        mock.assert_async().await;
    }
}
