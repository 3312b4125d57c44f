// Data models for the feed entities

pub mod feed;

pub use feed::{follow_set, Post, User, POST_KIND, USER_KIND};
