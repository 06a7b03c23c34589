//! Connector registry for ferry
//!
//! Collects the compiled-in warehouse backends behind one lookup keyed by
//! [`WarehouseKind`]. Backends are feature-gated so deployments only link
//! the wire protocols they use.

mod registry;

pub use registry::*;
