//! Durable [`ContactStore`] backed by a WAL and segment snapshots.
//!
//! Reads are served from an in-memory [`ContactIndex`]. Writes take the index
//! write lock, append to the WAL, then apply to the index, so the log order
//! always matches id order.

use std::fs;
use std::io::{Error as IoError, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use chrono::Utc;

use crate::contact::{Contact, ContactId, NewContact};
use crate::storage::index::ContactIndex;
use crate::storage::traits::{ContactStore, StorageError};

use super::file_lock::FileLock;
use super::segment::SegmentManager;
use super::wal::{WalEntryKind, WriteAheadLog};
use super::PersistentConfig;

const WAL_FILE_NAME: &str = "contacts.wal";
const SEGMENTS_DIR_NAME: &str = "segments";

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

fn io_err(context: &'static str) -> impl FnOnce(IoError) -> StorageError {
    move |e| match e.kind() {
        ErrorKind::WouldBlock => StorageError::ConnectionError(format!("{context}: {e}")),
        ErrorKind::InvalidData => StorageError::SerializationError(format!("{context}: {e}")),
        _ => StorageError::BackendError(format!("{context}: {e}")),
    }
}

/// Outcome of a [`PersistentContactStore::compact`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionResult {
    /// Contacts written to the new segment.
    pub contacts_compacted: usize,
    /// Path of the new segment, or `None` if there was nothing to compact.
    pub segment_path: Option<PathBuf>,
    /// WAL size before compaction.
    pub wal_size_before: u64,
    /// WAL size after compaction.
    pub wal_size_after: u64,
}

/// Persistent contact store.
pub struct PersistentContactStore {
    dir: PathBuf,
    _lock: FileLock,
    wal: WriteAheadLog,
    segments: Mutex<SegmentManager>,
    index: RwLock<ContactIndex>,
    /// WAL sequence of the last checkpoint; no compaction is needed while
    /// the WAL has not moved past it.
    checkpoint_sequence: AtomicU64,
    config: PersistentConfig,
}

impl PersistentContactStore {
    /// Open or create a store in `dir`.
    pub fn open(dir: &Path, config: PersistentConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(dir).map_err(io_err("failed to create database directory"))?;
        let lock = FileLock::acquire(dir).map_err(io_err("failed to acquire lock"))?;

        let segments = SegmentManager::open(&dir.join(SEGMENTS_DIR_NAME))
            .map_err(io_err("failed to open segments"))?;
        let mut index = match segments.latest() {
            Some(segment) => {
                let (header, snapshot) = segment.read().map_err(io_err("failed to read segment"))?;
                tracing::debug!(
                    segment = %segment.path().display(),
                    contacts = header.contact_count,
                    sequence_end = header.sequence_end,
                    "loaded segment"
                );
                ContactIndex::from_snapshot(snapshot)?
            }
            None => ContactIndex::new(),
        };

        let wal = WriteAheadLog::open(&dir.join(WAL_FILE_NAME), config.sync_on_write)
            .map_err(io_err("failed to open WAL"))?;
        let replayed = replay(&wal, &mut index)?;
        let current = wal.current_sequence().map_err(io_err("failed to read WAL sequence"))?;

        if replayed > 0 {
            tracing::info!(entries = replayed, contacts = index.len(), "replayed WAL");
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            _lock: lock,
            wal,
            segments: Mutex::new(segments),
            index: RwLock::new(index),
            checkpoint_sequence: AtomicU64::new(if replayed == 0 { current } else { 0 }),
            config,
        })
    }

    /// The database directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current WAL size in bytes.
    pub fn wal_size_bytes(&self) -> Result<u64, StorageError> {
        self.wal.size_bytes().map_err(io_err("failed to stat WAL"))
    }

    /// Fold the WAL into a new segment and truncate it.
    ///
    /// Writers are blocked for the duration. If this fails partway the WAL
    /// still holds every entry and is replayed on next open.
    pub fn compact(&self) -> Result<CompactionResult, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("contact.compact"))?;

        let wal_size_before = self.wal_size_bytes()?;
        let current = self
            .wal
            .current_sequence()
            .map_err(io_err("failed to read WAL sequence"))?;
        if current == self.checkpoint_sequence.load(Ordering::Acquire) {
            return Ok(CompactionResult {
                contacts_compacted: 0,
                segment_path: None,
                wal_size_before,
                wal_size_after: wal_size_before,
            });
        }

        let snapshot = index.snapshot();
        let contacts_compacted = snapshot.contacts.len();
        let segment = self
            .segments
            .lock()
            .map_err(|_| lock_err("contact.segments"))?
            .write_snapshot(&snapshot, current)
            .map_err(io_err("failed to write segment"))?;

        self.wal.truncate().map_err(io_err("failed to truncate WAL"))?;
        let checkpoint = self
            .wal
            .append(WalEntryKind::Checkpoint {
                up_to_sequence: current,
            })
            .map_err(io_err("failed to write checkpoint"))?;
        self.checkpoint_sequence.store(checkpoint, Ordering::Release);
        drop(index);

        let wal_size_after = self.wal_size_bytes()?;
        tracing::info!(
            contacts = contacts_compacted,
            up_to_sequence = current,
            wal_size_before,
            wal_size_after,
            "compacted WAL into segment"
        );

        Ok(CompactionResult {
            contacts_compacted,
            segment_path: Some(segment.path().to_path_buf()),
            wal_size_before,
            wal_size_after,
        })
    }

    /// Compact once the WAL outgrows its configured limit.
    ///
    /// The triggering write is already durable, so a failure here is only
    /// logged.
    fn maybe_compact(&self) {
        match self.wal.size_bytes() {
            Ok(size) if size >= self.config.max_wal_size => {
                if let Err(e) = self.compact() {
                    tracing::warn!(error = %e, "automatic compaction failed");
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "failed to stat WAL"),
        }
    }
}

/// Apply every WAL entry to `index`. Returns the number of entries applied.
///
/// Replay is idempotent: an insert whose id is already present (because a
/// segment was written but the WAL not yet truncated) is skipped.
fn replay(wal: &WriteAheadLog, index: &mut ContactIndex) -> Result<usize, StorageError> {
    let mut applied = 0;
    for entry in wal.iter().map_err(io_err("failed to iterate WAL"))? {
        let entry = entry.map_err(io_err("corrupted WAL entry"))?;
        match entry.kind {
            WalEntryKind::ContactInsert(contact) => {
                if index.get(contact.id).is_none() {
                    index.insert(contact)?;
                }
            }
            WalEntryKind::ContactDemote {
                id,
                linked_id,
                updated_at,
            } => index.demote(id, linked_id, updated_at)?,
            WalEntryKind::Checkpoint { .. } => continue,
        }
        applied += 1;
    }
    Ok(applied)
}

impl ContactStore for PersistentContactStore {
    fn find_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Vec<Contact>, StorageError> {
        if email.is_none() && phone_number.is_none() {
            return Err(StorageError::InvalidQuery(
                "find_by_email_or_phone needs an email or a phone number".to_string(),
            ));
        }
        let index = self.index.read().map_err(|_| lock_err("contact.find"))?;
        Ok(index.find_by_email_or_phone(email, phone_number))
    }

    fn create(&self, contact: NewContact) -> Result<Contact, StorageError> {
        let created = {
            let mut index = self.index.write().map_err(|_| lock_err("contact.create"))?;
            let contact = index.allocate(contact, Utc::now());
            self.wal
                .append(WalEntryKind::ContactInsert(contact.clone()))
                .map_err(io_err("failed to append to WAL"))?;
            index.insert(contact.clone())?;
            contact
        };
        self.maybe_compact();
        Ok(created)
    }

    fn update_link_precedence(
        &self,
        id: ContactId,
        linked_id: ContactId,
    ) -> Result<(), StorageError> {
        {
            let mut index = self.index.write().map_err(|_| lock_err("contact.demote"))?;
            if index.get(id).is_none() {
                return Err(StorageError::ContactNotFound(id));
            }
            let updated_at = Utc::now();
            self.wal
                .append(WalEntryKind::ContactDemote {
                    id,
                    linked_id,
                    updated_at,
                })
                .map_err(io_err("failed to append to WAL"))?;
            index.demote(id, linked_id, updated_at)?;
        }
        self.maybe_compact();
        Ok(())
    }

    fn find_all_linked_contacts(
        &self,
        primary_id: ContactId,
    ) -> Result<Vec<Contact>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("contact.linked"))?;
        Ok(index.find_linked(primary_id))
    }

    fn get(&self, id: ContactId) -> Result<Option<Contact>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("contact.get"))?;
        Ok(index.get(id).cloned())
    }

    fn len(&self) -> Result<usize, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("contact.len"))?;
        Ok(index.len())
    }
}
