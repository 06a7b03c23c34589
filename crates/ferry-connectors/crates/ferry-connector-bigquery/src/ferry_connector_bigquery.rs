//! BigQuery connector for ferry
//!
//! Uses the BigQuery REST API with OAuth bearer authentication: `jobs.query`
//! for introspection, reads and DDL, `tabledata.insertAll` for writes.
//! BigQuery enforces no primary keys, so it is an append-only destination.

mod connector;
mod sql;

pub use connector::*;
pub use sql::*;

#[cfg(test)]
mod connector_tests;
