//! Durable state layer for the relay runtime
//!
//! Runs, checkpoints, attempt history, worker heartbeats, queue audit
//! records and persisted bus events live behind the traits in [`traits`].
//! Backends:
//!
//! - [`MemoryStore`] - in-memory reference implementation
//! - [`SqliteStore`] - authoritative SQLite tier (sqlx, embedded migrations)
//! - [`HybridStore`] - durable + accelerator-cache compose

pub mod error;
pub mod hybrid;
pub mod memory;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use hybrid::HybridStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{AttemptStore, EventStore, StateStore, StoreSink};
