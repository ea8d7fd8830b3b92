//! Persistent storage backend.
//!
//! Durable, crash-safe contact storage built from:
//! - a write-ahead log replayed on open
//! - an exclusive directory lock (one process per database)
//! - CRC32-checked frames so corruption is detected, not silently read
//! - segment snapshots that the WAL is folded into on compaction
//!
//! # Layout
//!
//! ```text
//! <dir>/
//! ├── .lock
//! ├── contacts.wal
//! └── segments/
//!     └── segment_000001.seg
//! ```

mod codec;
mod file_lock;
mod segment;
mod store;
mod wal;

pub use file_lock::FileLock;
pub use segment::{Segment, SegmentHeader, SegmentManager};
pub use store::{CompactionResult, PersistentContactStore};
pub use wal::{WalEntry, WalEntryKind, WriteAheadLog};

use std::path::Path;

use crate::storage::traits::StorageError;

/// Configuration for persistent storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistentConfig {
    /// WAL size (bytes) at which a write triggers compaction.
    pub max_wal_size: u64,
    /// Whether to fsync after every write.
    pub sync_on_write: bool,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            max_wal_size: 64 * 1024 * 1024,
            sync_on_write: true,
        }
    }
}

impl PersistentConfig {
    /// Smallest accepted `max_wal_size`; anything lower compacts on nearly every write.
    pub const MIN_WAL_SIZE: u64 = 4 * 1024;

    /// Check limits, returning the config unchanged when valid.
    pub fn validate(self) -> Result<Self, StorageError> {
        if self.max_wal_size < Self::MIN_WAL_SIZE {
            return Err(StorageError::BackendError(format!(
                "max_wal_size must be at least {} bytes (got {})",
                Self::MIN_WAL_SIZE,
                self.max_wal_size
            )));
        }
        Ok(self)
    }
}

/// Open or create a contact database at `path`.
///
/// # Errors
/// - `ConnectionError` if another process holds the lock
/// - `SerializationError` if the WAL or a segment is corrupted
/// - `BackendError` for invalid config or any other I/O failure
///
/// # Example
/// ```rust,ignore
/// use contactlink::storage::persistent::open_database;
///
/// let store = open_database("./contacts.db", None)?;
/// let resolver = IdentityResolver::new(Arc::new(store));
/// ```
pub fn open_database(
    path: impl AsRef<Path>,
    config: Option<PersistentConfig>,
) -> Result<PersistentContactStore, StorageError> {
    let cfg = config.unwrap_or_default().validate()?;
    PersistentContactStore::open(path.as_ref(), cfg)
}
