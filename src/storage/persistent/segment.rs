//! Compacted snapshots of the contact index.
//!
//! Each compaction writes one segment file holding the whole index:
//! ```text
//! [MAGIC + VERSION][SegmentHeader frame][ContactSnapshot frame]
//! ```
//! Segments are numbered (`segment_000001.seg`, ...). Only the newest one is
//! read on open; older ones are removed after a newer one is in place.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Result as IoResult, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::index::ContactSnapshot;

use super::codec;

const SEGMENT_PREFIX: &str = "segment_";
const SEGMENT_EXT: &str = "seg";

/// Metadata stored at the front of a segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentHeader {
    /// Last WAL sequence folded into this segment.
    pub sequence_end: u64,
    /// Number of contacts in the snapshot.
    pub contact_count: u64,
    /// When the segment was written.
    pub created_at: DateTime<Utc>,
}

/// A segment file on disk.
#[derive(Debug, Clone)]
pub struct Segment {
    number: u64,
    path: PathBuf,
}

impl Segment {
    /// Segment number (higher is newer).
    #[must_use]
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Path to the segment file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the header and snapshot.
    pub fn read(&self) -> IoResult<(SegmentHeader, ContactSnapshot)> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        codec::read_header(&mut reader)?;
        let header: SegmentHeader = codec::decode(&mut reader)?;
        let snapshot: ContactSnapshot = codec::decode(&mut reader)?;
        Ok((header, snapshot))
    }
}

fn parse_segment_number(path: &Path) -> Option<u64> {
    if path.extension()?.to_str()? != SEGMENT_EXT {
        return None;
    }
    path.file_stem()?
        .to_str()?
        .strip_prefix(SEGMENT_PREFIX)?
        .parse()
        .ok()
}

/// Owns the segment directory.
#[derive(Debug)]
pub struct SegmentManager {
    dir: PathBuf,
    segments: Vec<Segment>,
}

impl SegmentManager {
    /// Open (creating if needed) a segment directory.
    ///
    /// Leftover temporary files from an interrupted compaction are removed.
    pub fn open(dir: &Path) -> IoResult<Self> {
        fs::create_dir_all(dir)?;

        let mut segments = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("tmp") {
                tracing::warn!(path = %path.display(), "removing incomplete segment");
                fs::remove_file(&path)?;
                continue;
            }
            if let Some(number) = parse_segment_number(&path) {
                segments.push(Segment { number, path });
            }
        }
        segments.sort_by_key(Segment::number);

        Ok(Self {
            dir: dir.to_path_buf(),
            segments,
        })
    }

    /// All known segments, oldest first.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The newest segment, if any.
    #[must_use]
    pub fn latest(&self) -> Option<&Segment> {
        self.segments.last()
    }

    /// Write `snapshot` as a new segment and drop the older ones.
    ///
    /// The file is written under a temporary name, fsynced, then renamed, so
    /// a crash leaves either the old segment set or the new one.
    pub fn write_snapshot(
        &mut self,
        snapshot: &ContactSnapshot,
        sequence_end: u64,
    ) -> IoResult<Segment> {
        let number = self.latest().map_or(1, |s| s.number + 1);
        let name = format!("{SEGMENT_PREFIX}{number:06}.{SEGMENT_EXT}");
        let path = self.dir.join(&name);
        let tmp_path = self.dir.join(format!("{name}.tmp"));

        let header = SegmentHeader {
            sequence_end,
            contact_count: snapshot.contacts.len() as u64,
            created_at: Utc::now(),
        };

        {
            let file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            codec::write_header(&mut writer)?;
            writer.write_all(&codec::encode(&header)?)?;
            writer.write_all(&codec::encode(snapshot)?)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;
        sync_dir(&self.dir)?;

        let segment = Segment { number, path };
        for old in self.segments.drain(..) {
            if let Err(e) = fs::remove_file(&old.path) {
                tracing::warn!(path = %old.path.display(), error = %e, "failed to remove old segment");
            }
        }
        self.segments.push(segment.clone());
        Ok(segment)
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> IoResult<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> IoResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::NewContact;
    use crate::storage::index::ContactIndex;
    use tempfile::tempdir;

    fn snapshot_with(n: usize) -> ContactSnapshot {
        let mut index = ContactIndex::new();
        for i in 0..n {
            let c = index.allocate(NewContact::primary(Some(format!("u{i}@x.io")), None), Utc::now());
            index.insert(c).unwrap();
        }
        index.snapshot()
    }

    #[test]
    fn test_write_and_reopen_latest() {
        let dir = tempdir().unwrap();
        let mut manager = SegmentManager::open(dir.path()).unwrap();
        assert!(manager.latest().is_none());

        manager.write_snapshot(&snapshot_with(2), 5).unwrap();
        manager.write_snapshot(&snapshot_with(3), 9).unwrap();

        let reopened = SegmentManager::open(dir.path()).unwrap();
        assert_eq!(reopened.segments().len(), 1);
        let latest = reopened.latest().unwrap();
        assert_eq!(latest.number(), 2);

        let (header, snapshot) = latest.read().unwrap();
        assert_eq!(header.sequence_end, 9);
        assert_eq!(header.contact_count, 3);
        assert_eq!(snapshot.contacts.len(), 3);
    }

    #[test]
    fn test_leftover_tmp_files_are_removed() {
        let dir = tempdir().unwrap();
        let tmp = dir.path().join("segment_000001.seg.tmp");
        fs::write(&tmp, b"partial").unwrap();

        let manager = SegmentManager::open(dir.path()).unwrap();
        assert!(manager.segments().is_empty());
        assert!(!tmp.exists());
    }

    #[test]
    fn test_parse_segment_number() {
        assert_eq!(parse_segment_number(Path::new("segment_000042.seg")), Some(42));
        assert_eq!(parse_segment_number(Path::new("segment_x.seg")), None);
        assert_eq!(parse_segment_number(Path::new("notes.txt")), None);
    }
}
