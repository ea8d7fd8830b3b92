//! Write-ahead log for crash recovery.
//!
//! Every mutation is appended (and optionally fsynced) before it is applied
//! to the in-memory index. On open the log is replayed on top of the newest
//! segment snapshot.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [ENTRY 1: codec frame]
//! [ENTRY 2: codec frame]
//! ...
//! ```
//!
//! A frame cut off by a crash is dropped on open. A frame that is complete
//! but fails its checksum makes open fail, and so does a frame that runs past
//! the end of the file while intact frames still follow it.

use std::fs::{File, OpenOptions};
use std::io::{
    BufReader, BufWriter, Error as IoError, ErrorKind, Read, Result as IoResult, Seek, SeekFrom,
    Write,
};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::contact::{Contact, ContactId};

use super::codec;

/// A single entry in the write-ahead log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Monotonically increasing sequence number.
    pub sequence: u64,
    /// When this entry was written.
    pub timestamp: DateTime<Utc>,
    /// The logged mutation.
    pub kind: WalEntryKind,
}

/// The mutation recorded by a WAL entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalEntryKind {
    /// A contact was created (full post-insert record).
    ContactInsert(Contact),
    /// A contact was demoted to secondary.
    ContactDemote {
        /// The demoted contact.
        id: ContactId,
        /// Primary it now links to.
        linked_id: ContactId,
        /// New `updated_at` of the demoted contact.
        updated_at: DateTime<Utc>,
    },
    /// Everything up to this sequence is in a segment.
    Checkpoint {
        /// Last sequence folded into the segment.
        up_to_sequence: u64,
    },
}

struct WalWriter {
    file: BufWriter<File>,
    sequence: u64,
}

/// Append-only log shared by the persistent store.
pub struct WriteAheadLog {
    path: PathBuf,
    writer: Mutex<WalWriter>,
    sync_on_write: bool,
}

impl WriteAheadLog {
    /// Open or create a WAL file.
    ///
    /// An existing log is scanned to find the last sequence number. A torn
    /// trailing frame is cut off so new appends start on a frame boundary.
    pub fn open(path: &Path, sync_on_write: bool) -> IoResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();

        let sequence = if len >= codec::HEADER_LEN {
            let (last_sequence, valid_end) = scan(path)?;
            if valid_end < len {
                tracing::warn!(
                    path = %path.display(),
                    dropped_bytes = len - valid_end,
                    "WAL ends in a torn entry; truncating to last complete entry"
                );
                file.set_len(valid_end)?;
                file.sync_all()?;
            }
            last_sequence
        } else {
            file.set_len(0)?;
            let mut file = file;
            codec::write_header(&mut file)?;
            file.sync_all()?;
            0
        };

        let file = OpenOptions::new().append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(WalWriter {
                file: BufWriter::new(file),
                sequence,
            }),
            sync_on_write,
        })
    }

    fn lock(&self) -> IoResult<MutexGuard<'_, WalWriter>> {
        self.writer
            .lock()
            .map_err(|_| IoError::new(ErrorKind::Other, "poisoned lock: wal.writer"))
    }

    /// Append an entry, returning its sequence number.
    ///
    /// The sequence only advances once the bytes are written.
    pub fn append(&self, kind: WalEntryKind) -> IoResult<u64> {
        let mut writer = self.lock()?;
        let sequence = writer.sequence + 1;
        let encoded = codec::encode(&WalEntry {
            sequence,
            timestamp: Utc::now(),
            kind,
        })?;

        writer.file.write_all(&encoded)?;
        writer.file.flush()?;
        if self.sync_on_write {
            writer.file.get_ref().sync_data()?;
        }

        writer.sequence = sequence;
        Ok(sequence)
    }

    /// Iterate over all entries currently in the file.
    pub fn iter(&self) -> IoResult<WalIterator> {
        WalIterator::new(&self.path)
    }

    /// Sequence number of the last appended entry.
    pub fn current_sequence(&self) -> IoResult<u64> {
        Ok(self.lock()?.sequence)
    }

    /// WAL file size in bytes.
    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    /// Drop every entry, leaving just the header.
    ///
    /// Only call this once the entries are safely in a segment. Sequence
    /// numbers keep counting up across truncations.
    pub fn truncate(&self) -> IoResult<()> {
        let mut writer = self.lock()?;
        writer.file.flush()?;
        writer.file.get_ref().set_len(0)?;
        codec::write_header(&mut writer.file)?;
        writer.file.flush()?;
        writer.file.get_ref().sync_all()?;
        Ok(())
    }
}

/// Walk the log, returning the last good sequence and the byte offset just
/// past the last complete frame.
fn scan(path: &Path) -> IoResult<(u64, u64)> {
    let mut iter = WalIterator::new(path)?;
    let mut last_sequence = 0;
    let mut valid_end = codec::HEADER_LEN;

    while let Some(entry) = iter.next() {
        let entry = entry.map_err(|e| {
            IoError::new(
                e.kind(),
                format!("WAL corrupted after sequence {last_sequence}: {e}"),
            )
        })?;
        last_sequence = entry.sequence;
        valid_end = iter.reader.stream_position()?;
    }

    if valid_end < iter.file_size {
        if let Some(offset) = intact_frame_after(path, valid_end)? {
            return Err(IoError::new(
                ErrorKind::InvalidData,
                format!(
                    "WAL corrupted after sequence {last_sequence}: entry at byte {valid_end} \
                     overruns the file but an intact entry follows at byte {offset}"
                ),
            ));
        }
    }

    Ok((last_sequence, valid_end))
}

/// Offset of the first intact frame starting after `from`, if any.
///
/// A crash only ever cuts the last frame, so bytes past `from` that still
/// hold a whole frame mean the break at `from` is damage, not a torn write.
fn intact_frame_after(path: &Path, from: u64) -> IoResult<Option<u64>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(from))?;
    let mut rest = Vec::new();
    file.read_to_end(&mut rest)?;

    Ok((1..rest.len())
        .find(|&i| codec::is_complete_frame(&rest[i..]))
        .map(|i| from + i as u64))
}

/// Iterator over WAL entries.
///
/// Stops quietly at a torn trailing frame; yields an error for a corrupt one.
pub struct WalIterator {
    reader: BufReader<File>,
    file_size: u64,
}

impl WalIterator {
    fn new(path: &Path) -> IoResult<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        codec::read_header(&mut reader)?;
        Ok(Self { reader, file_size })
    }
}

impl Iterator for WalIterator {
    type Item = IoResult<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.stream_position() {
            Ok(pos) if pos >= self.file_size => return None,
            Ok(_) => {}
            Err(e) => return Some(Err(e)),
        }

        match codec::decode(&mut self.reader) {
            Ok(entry) => Some(Ok(entry)),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => None,
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::LinkPrecedence;
    use tempfile::tempdir;

    fn sample_contact(id: u64) -> Contact {
        let now = Utc::now();
        Contact {
            id: ContactId::new(id),
            email: Some(format!("user{id}@x.io")),
            phone_number: None,
            linked_id: None,
            link_precedence: LinkPrecedence::Primary,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn test_wal_append_and_iterate() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("test.wal");

        let wal = WriteAheadLog::open(&wal_path, false).unwrap();
        wal.append(WalEntryKind::ContactInsert(sample_contact(1))).unwrap();
        wal.append(WalEntryKind::ContactDemote {
            id: ContactId::new(1),
            linked_id: ContactId::new(2),
            updated_at: Utc::now(),
        })
        .unwrap();
        assert_eq!(wal.current_sequence().unwrap(), 2);
        drop(wal);

        let wal = WriteAheadLog::open(&wal_path, false).unwrap();
        assert_eq!(wal.current_sequence().unwrap(), 2);
        let entries: Vec<_> = wal.iter().unwrap().collect::<IoResult<_>>().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].sequence, 1);
        assert!(matches!(entries[0].kind, WalEntryKind::ContactInsert(_)));
        assert!(matches!(entries[1].kind, WalEntryKind::ContactDemote { .. }));
    }

    #[test]
    fn test_torn_tail_is_cut_on_open() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("torn.wal");

        {
            let wal = WriteAheadLog::open(&wal_path, true).unwrap();
            wal.append(WalEntryKind::ContactInsert(sample_contact(1))).unwrap();
            wal.append(WalEntryKind::ContactInsert(sample_contact(2))).unwrap();
        }
        let len = std::fs::metadata(&wal_path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&wal_path).unwrap();
        file.set_len(len - 3).unwrap();
        drop(file);

        let wal = WriteAheadLog::open(&wal_path, true).unwrap();
        assert_eq!(wal.current_sequence().unwrap(), 1);
        wal.append(WalEntryKind::ContactInsert(sample_contact(2))).unwrap();
        drop(wal);

        let wal = WriteAheadLog::open(&wal_path, true).unwrap();
        let entries: Vec<_> = wal.iter().unwrap().collect::<IoResult<_>>().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].sequence, 2);
    }

    #[test]
    fn test_truncate_keeps_sequence_counting() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("trunc.wal");

        let wal = WriteAheadLog::open(&wal_path, false).unwrap();
        wal.append(WalEntryKind::ContactInsert(sample_contact(1))).unwrap();
        wal.truncate().unwrap();
        assert_eq!(wal.size_bytes().unwrap(), codec::HEADER_LEN);
        assert_eq!(wal.iter().unwrap().count(), 0);

        let seq = wal.append(WalEntryKind::Checkpoint { up_to_sequence: 1 }).unwrap();
        assert_eq!(seq, 2);
    }

    #[test]
    fn test_overrun_with_intact_entries_after_fails_open() {
        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("overrun.wal");

        {
            let wal = WriteAheadLog::open(&wal_path, true).unwrap();
            for id in 1..=3 {
                wal.append(WalEntryKind::ContactInsert(sample_contact(id))).unwrap();
            }
        }
        let len = std::fs::metadata(&wal_path).unwrap().len();

        // First frame's length field (right after header and version byte).
        let mut bytes = std::fs::read(&wal_path).unwrap();
        let bogus = u32::try_from(len * 2).unwrap();
        bytes[6..10].copy_from_slice(&bogus.to_le_bytes());
        std::fs::write(&wal_path, &bytes).unwrap();

        let err = WriteAheadLog::open(&wal_path, true).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert!(err.to_string().contains("overruns the file"));
        assert_eq!(std::fs::metadata(&wal_path).unwrap().len(), len);
    }
}
