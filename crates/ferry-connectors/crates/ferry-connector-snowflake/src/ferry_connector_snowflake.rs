//! Snowflake connector for ferry
//!
//! Uses the Snowflake SQL API (v2 statements endpoint) with OAuth bearer
//! authentication. Reads page through result partitions; writes merge via
//! `MERGE INTO ... USING (VALUES ...)` when the table has a primary key.

mod connector;
mod sql;

pub use connector::*;
pub use sql::*;

#[cfg(test)]
mod connector_tests;
