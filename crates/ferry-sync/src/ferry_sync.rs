//! Ferry Sync - the cross-warehouse sync engine
//!
//! Ties the core abstractions together: validates a job payload, records a
//! job row, opens source and destination connections, streams source rows
//! in chunks, converts and batches them, writes them into the destination,
//! and guarantees cleanup and bounded retry on failure.

mod batch;
mod convert;
mod dispatch;
mod job;
mod retry;
mod store;
mod syncer;

pub use batch::*;
pub use convert::*;
pub use dispatch::*;
pub use job::*;
pub use retry::*;
pub use store::*;
pub use syncer::*;
