//! Contact storage.
//!
//! [`ContactStore`] is the contract the resolver depends on. Two backends
//! implement it:
//! - [`InMemoryContactStore`] for tests and embedded use
//! - `PersistentContactStore` (feature `persistent`) for durable, single-process storage

mod index;
mod memory;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use index::{ContactIndex, ContactSnapshot};
pub use memory::InMemoryContactStore;
pub use traits::{ContactStore, StorageError};

#[cfg(feature = "persistent")]
pub use persistent::{open_database, CompactionResult, PersistentConfig, PersistentContactStore};
