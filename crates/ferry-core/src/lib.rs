//! Ferry Core - Shared abstractions for the cross-warehouse sync pipeline
//!
//! This crate provides the fundamental traits and types that all other
//! ferry crates depend on. It defines:
//!
//! - `WarehouseConnector` / `WarehouseConnection` - Traits for warehouse backends
//! - `CredentialCodec` - Authenticated encryption for credential records
//! - `ColumnDescriptor` - Introspected source schema metadata
//! - `TypeMapping` - Canonical-to-destination type matrices and DDL generation
//! - Common types like `Value`, `Row`, `WarehouseKind`, `FerryError`

mod connector;
mod credentials;
mod error;
mod schema;
mod type_map;
mod types;

pub use connector::*;
pub use credentials::*;
pub use error::*;
pub use schema::*;
pub use type_map::*;
pub use types::*;
