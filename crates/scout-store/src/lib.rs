//! Trader storage for the scout pipeline.
//!
//! - [`TraderStore`]: the queue/history contract the pipeline is written against
//! - [`MemoryStore`]: in-memory implementation, optionally journaled to disk
//! - [`Journal`]: append-only JSON Lines log used to rebuild state on restart

pub mod error;
pub mod journal;
pub mod memory;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use journal::{Journal, JournalRecord};
pub use memory::{MemoryStore, StoreConfig};
pub use store::TraderStore;
