use chrono::{DateTime, Utc};
use std::cmp::Ordering;

use crate::datastore::{Entity, Key};

/// Kind names used by the feed application
pub const USER_KIND: &str = "User";
pub const POST_KIND: &str = "Post";

// ==================================================================================================
// User
// ==================================================================================================

/// A `User` entity; only the follow list matters here
#[derive(Debug, Clone, PartialEq, Default)]
pub struct User {
    pub name: String,
    pub follows: Vec<String>,
}

impl User {
    pub fn key(name: &str) -> Key {
        Key::named(USER_KIND, name)
    }

    /// Read a user from its entity. A missing or non-array `follows`
    /// property is an empty list; non-string members are skipped.
    pub fn from_entity(name: &str, entity: &Entity) -> Self {
        let follows = entity
            .get("follows")
            .and_then(|v| v.as_array())
            .map(|values| {
                values
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            name: name.to_string(),
            follows,
        }
    }

    /// Users whose posts appear in this user's timeline: the follow list,
    /// deduplicated in first-seen order, plus the user itself.
    pub fn follow_set(&self) -> Vec<String> {
        follow_set(&self.name, &self.follows)
    }
}

/// `dedup(follows ∪ {user})`; `user` is appended when not already followed
pub fn follow_set(user: &str, follows: &[String]) -> Vec<String> {
    let mut set: Vec<String> = Vec::with_capacity(follows.len() + 1);
    for name in follows.iter().map(String::as_str).chain(std::iter::once(user)) {
        if !set.iter().any(|existing| existing == name) {
            set.push(name.to_string());
        }
    }
    set
}

// ==================================================================================================
// Post
// ==================================================================================================

/// A `Post` entity. `author` and `created` are extracted; the rest of the
/// entity is carried through untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub author: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub entity: Entity,
}

impl Post {
    pub fn key(&self) -> Option<&Key> {
        self.entity.key.as_ref()
    }

    /// Newest first; posts without `created` go last
    pub fn cmp_newest_first(a: &Post, b: &Post) -> Ordering {
        match (&a.created, &b.created) {
            (Some(x), Some(y)) => y.cmp(x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

impl From<Entity> for Post {
    fn from(entity: Entity) -> Self {
        let author = entity
            .get("author")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let created = entity.get("created").and_then(|v| v.as_timestamp());

        Self {
            author,
            created,
            entity,
        }
    }
}
