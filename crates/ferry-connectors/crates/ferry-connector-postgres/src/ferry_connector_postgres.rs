//! PostgreSQL and Redshift connectors for ferry
//!
//! Both backends speak the postgres wire protocol and share one
//! implementation. Postgres destinations merge with
//! `INSERT ... ON CONFLICT DO UPDATE`; Redshift has no conflict clause and
//! is append-only.

mod connector;
mod params;
mod sql;

pub use connector::*;
pub use params::*;
pub use sql::*;

#[cfg(test)]
mod connector_tests;
