// Timeline resolution with ordered fetch-strategy fallback

use async_trait::async_trait;
use futures::future::try_join_all;
use std::future::Future;
use std::sync::Arc;

use crate::datastore::{Datastore, Filter, GqlQuery, Query};
use crate::error::{DatastoreError, Result};
use crate::models::{Post, User, POST_KIND};

const TIMELINE_GQL: &str =
    "SELECT * FROM Post WHERE author IN @authors ORDER BY created DESC LIMIT @limit";

/// One way of fetching the newest posts of a set of authors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    /// GQL `author IN @authors`; only on backends that expose GQL
    Gql,
    /// Structured query with an `IN` filter
    InFilter,
    /// One `author =` query per author, merged client-side
    FanOut,
}

/// Preference order. Every strategy but the last may fail silently.
pub const STRATEGY_ORDER: [FetchStrategy; 3] = [
    FetchStrategy::Gql,
    FetchStrategy::InFilter,
    FetchStrategy::FanOut,
];

impl std::fmt::Display for FetchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchStrategy::Gql => write!(f, "gql"),
            FetchStrategy::InFilter => write!(f, "in_filter"),
            FetchStrategy::FanOut => write!(f, "fan_out"),
        }
    }
}

/// Run `attempt` for each strategy in order and return the first success.
///
/// Errors from every strategy except the last are swallowed (logged at debug
/// level); the last strategy's error is returned to the caller. An empty plan
/// is an internal error.
pub async fn first_success<F, Fut, T>(
    strategies: &[FetchStrategy],
    mut attempt: F,
) -> Result<(FetchStrategy, T)>
where
    F: FnMut(FetchStrategy) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let Some((last, fallible)) = strategies.split_last() else {
        return Err(DatastoreError::Internal(anyhow::anyhow!(
            "no fetch strategy available"
        )));
    };

    for &strategy in fallible {
        match attempt(strategy).await {
            Ok(value) => return Ok((strategy, value)),
            Err(e) => {
                tracing::debug!(strategy = %strategy, error = %e, "Fetch strategy failed, falling back");
            }
        }
    }

    attempt(*last).await.map(|value| (*last, value))
}

/// A resolved timeline and the strategy that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    pub posts: Vec<Post>,
    /// `None` when no fetch was needed (empty user)
    pub strategy: Option<FetchStrategy>,
}

/// Anything that can produce a user's timeline. The load driver depends on
/// this rather than on [`TimelineResolver`] directly.
#[async_trait]
pub trait TimelineSource: Send + Sync {
    async fn get_timeline(&self, user: &str, limit: usize) -> Result<Vec<Post>>;
}

/// Resolves timelines against a shared datastore handle
pub struct TimelineResolver {
    store: Arc<dyn Datastore>,
}

impl TimelineResolver {
    pub fn new(store: Arc<dyn Datastore>) -> Self {
        Self { store }
    }

    /// Authors whose posts make up `user`'s timeline, always including `user`.
    /// A missing `User` entity yields just `[user]`.
    pub async fn follow_set(&self, user: &str) -> Result<Vec<String>> {
        let follows = match self.store.lookup(&User::key(user)).await? {
            Some(entity) => User::from_entity(user, &entity).follows,
            None => Vec::new(),
        };
        Ok(crate::models::follow_set(user, &follows))
    }

    /// Strategies to try for this backend, in preference order
    pub fn plan(&self) -> Vec<FetchStrategy> {
        STRATEGY_ORDER
            .iter()
            .copied()
            .filter(|s| *s != FetchStrategy::Gql || self.store.supports_gql())
            .collect()
    }

    /// Resolve `user`'s timeline: at most `limit` posts, newest first.
    ///
    /// Resolution pipeline:
    /// 1. Empty user → empty timeline
    /// 2. Compute the follow set
    /// 3. Try each strategy of [`TimelineResolver::plan`] until one succeeds
    pub async fn resolve(&self, user: &str, limit: usize) -> Result<Timeline> {
        if user.is_empty() {
            return Ok(Timeline {
                posts: Vec::new(),
                strategy: None,
            });
        }

        let authors = self.follow_set(user).await?;
        let plan = self.plan();

        let (strategy, posts) = first_success(&plan, |strategy| {
            self.fetch_with(strategy, &authors, limit)
        })
        .await?;

        tracing::debug!(
            user = user,
            authors = authors.len(),
            strategy = %strategy,
            posts = posts.len(),
            "Resolved timeline"
        );

        Ok(Timeline {
            posts,
            strategy: Some(strategy),
        })
    }

    async fn fetch_with(
        &self,
        strategy: FetchStrategy,
        authors: &[String],
        limit: usize,
    ) -> Result<Vec<Post>> {
        match strategy {
            FetchStrategy::Gql => {
                let gql = GqlQuery::new(TIMELINE_GQL)
                    .bind("authors", authors.to_vec())
                    .bind("limit", limit as i64);
                let entities = self.store.run_gql(&gql).await?;
                Ok(entities.into_iter().map(Post::from).collect())
            }

            FetchStrategy::InFilter => {
                let query = Query::new(POST_KIND)
                    .filter(Filter::is_in("author", authors.to_vec()))
                    .order_desc("created")
                    .limit(limit);
                let entities = self.store.run_query(&query).await?;
                Ok(entities.into_iter().map(Post::from).collect())
            }

            FetchStrategy::FanOut => {
                let per_author = authors.iter().map(|author| {
                    let query = Query::new(POST_KIND)
                        .filter(Filter::eq("author", author.as_str()))
                        .order_desc("created")
                        .limit(limit);
                    async move { self.store.run_query(&query).await }
                });

                let batches = try_join_all(per_author).await?;
                Ok(merge_newest_first(batches, limit))
            }
        }
    }
}

#[async_trait]
impl TimelineSource for TimelineResolver {
    async fn get_timeline(&self, user: &str, limit: usize) -> Result<Vec<Post>> {
        self.resolve(user, limit).await.map(|timeline| timeline.posts)
    }
}

/// Concatenate per-author batches, sort newest first, keep `limit`
fn merge_newest_first(batches: Vec<Vec<crate::datastore::Entity>>, limit: usize) -> Vec<Post> {
    let mut posts: Vec<Post> = batches.into_iter().flatten().map(Post::from).collect();
    posts.sort_by(Post::cmp_newest_first);
    posts.truncate(limit);
    posts
}
