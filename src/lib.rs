// Timeline bench - Library root

pub mod cleanup;
pub mod config;
pub mod datastore;
pub mod error;
pub mod loadtest;
pub mod logging;
pub mod models;
pub mod timeline;
