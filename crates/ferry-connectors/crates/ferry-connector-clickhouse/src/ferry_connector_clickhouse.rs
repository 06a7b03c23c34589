//! ClickHouse connector for ferry
//!
//! Talks to ClickHouse over its HTTP interface. Reads stream as
//! JSONEachRow; writes merge through ReplacingMergeTree tables so retried
//! batches deduplicate at merge time.

mod connector;

pub use connector::*;

#[cfg(test)]
mod connector_tests;
