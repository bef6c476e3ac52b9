use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::limits::MAX_WAL_RECORD_LEN;

use super::CommitRecord;

/// Encode one commit as `[len][bincode][crc32]`.
fn encode_record(record: &CommitRecord) -> io::Result<Vec<u8>> {
    let payload =
        bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_WAL_RECORD_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("commit of {} bytes exceeds {MAX_WAL_RECORD_LEN}", payload.len()),
        ));
    }
    let mut frame = Vec::with_capacity(payload.len() + 8);
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(frame)
}

/// Failures the tests can force on the next append.
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    /// Half the frame reaches the file, then the write fails.
    TornWrite,
    /// The whole frame reaches the file, then fsync fails.
    FailedSync,
    /// Like `TornWrite`, and truncating the file back fails too.
    StuckRollback,
}

/// Append-only commit log backing [`super::MemoryLedger`].
///
/// Format per entry: `[u32: len][bincode: CommitRecord][u32: crc32]`
/// - One entry holds every write of one transaction, so replay applies a
///   transaction entirely or not at all.
/// - A failed append truncates the file back to where it started. If that
///   truncation fails the log is poisoned and refuses appends until the next
///   compaction rewrites it.
/// - A truncated or corrupt tail (crash mid-append) is discarded on replay.
pub struct Wal {
    file: File,
    path: PathBuf,
    appends_since_compact: u64,
    poisoned: bool,
    #[cfg(test)]
    fault: Option<Fault>,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            file: open_append(path)?,
            path: path.to_path_buf(),
            appends_since_compact: 0,
            poisoned: false,
            #[cfg(test)]
            fault: None,
        })
    }

    /// Append a commit and fsync before returning. On error the file is left
    /// exactly as it was before the call.
    pub fn append(&mut self, record: &CommitRecord) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other(
                "log holds an unrolled failed append, compaction required",
            ));
        }
        let frame = encode_record(record)?;
        let len_before = self.file.metadata()?.len();

        if let Err(e) = self.write_synced(&frame) {
            if let Err(rollback) = self.truncate_to(len_before) {
                tracing::error!(
                    "WAL {}: rollback to {len_before} bytes failed ({rollback}), refusing appends",
                    self.path.display()
                );
                self.poisoned = true;
            }
            return Err(e);
        }
        self.appends_since_compact += 1;
        Ok(())
    }

    fn write_synced(&mut self, frame: &[u8]) -> io::Result<()> {
        #[cfg(test)]
        if let Some(fault) = self.fault {
            let cut = if fault == Fault::FailedSync { frame.len() } else { frame.len() / 2 };
            self.file.write_all(&frame[..cut])?;
            if fault != Fault::StuckRollback {
                self.fault = None;
            }
            return Err(io::Error::other("injected append failure"));
        }
        self.file.write_all(frame)?;
        self.file.sync_all()
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        #[cfg(test)]
        if self.fault == Some(Fault::StuckRollback) {
            return Err(io::Error::other("injected truncate failure"));
        }
        self.file.set_len(len)?;
        self.file.sync_all()
    }

    #[cfg(test)]
    pub(crate) fn inject_fault(&mut self, fault: Option<Fault>) {
        self.fault = fault;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Write the compacted log to a temp file and fsync it.
    pub fn write_compact_file(path: &Path, records: &[CommitRecord]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for record in records {
            writer.write_all(&encode_record(record)?)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Rename the temp file over the log and reopen it for appending. The new
    /// file holds only committed state, so a poisoned log is usable again.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        self.file = open_append(&self.path)?;
        self.appends_since_compact = 0;
        self.poisoned = false;
        Ok(())
    }

    /// Read every intact commit from disk. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<CommitRecord>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut records = Vec::new();

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_WAL_RECORD_LEN {
                tracing::warn!("WAL {}: record length {len} out of range, dropping tail", path.display());
                break;
            }

            let mut payload = vec![0u8; len];
            match reader.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }

            let mut crc_buf = [0u8; 4];
            match reader.read_exact(&mut crc_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                tracing::warn!("WAL {}: checksum mismatch, dropping tail", path.display());
                break;
            }

            match bincode::deserialize::<CommitRecord>(&payload) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!("WAL {}: undecodable record ({e}), dropping tail", path.display());
                    break;
                }
            }
        }

        Ok(records)
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{Collection, Document, FieldValue, Mutation};

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("hostel_test_wal");
        fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn room_set(id: &str, status: &str) -> CommitRecord {
        let mut data = Document::new();
        data.insert("name".into(), FieldValue::Str(format!("Room {id}")));
        data.insert("status".into(), FieldValue::Str(status.into()));
        CommitRecord {
            committed_at: 1,
            writes: vec![Mutation::Set {
                collection: Collection::Rooms,
                id: id.into(),
                data,
            }],
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let _ = fs::remove_file(&path);

        let records = vec![room_set("101", "available"), room_set("102", "booked")];
        {
            let mut wal = Wal::open(&path).unwrap();
            for r in &records {
                wal.append(r).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 2);
        }

        assert_eq!(Wal::replay(&path).unwrap(), records);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_drops_truncated_tail() {
        let path = tmp_path("truncated.wal");
        let _ = fs::remove_file(&path);

        let record = room_set("101", "available");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&record).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[9u8, 0, 0, 0, 1, 2]).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![record]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_stops_at_bad_crc() {
        let path = tmp_path("bad_crc.wal");
        let _ = fs::remove_file(&path);

        {
            let payload = bincode::serialize(&room_set("101", "available")).unwrap();
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        }

        assert!(Wal::replay(&path).unwrap().is_empty());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_missing_file_is_empty() {
        let path = tmp_path("never_written.wal");
        let _ = fs::remove_file(&path);
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn compact_then_append() {
        let path = tmp_path("compact_append.wal");
        let _ = fs::remove_file(&path);

        let mut wal = Wal::open(&path).unwrap();
        for _ in 0..10 {
            wal.append(&room_set("101", "booked")).unwrap();
            wal.append(&room_set("101", "available")).unwrap();
        }
        let before = fs::metadata(&path).unwrap().len();

        let compacted = vec![room_set("101", "available")];
        Wal::write_compact_file(wal.path(), &compacted).unwrap();
        wal.swap_compact_file().unwrap();
        assert_eq!(wal.appends_since_compact(), 0);

        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should be smaller: {after} < {before}");

        let next = room_set("102", "available");
        wal.append(&next).unwrap();
        drop(wal);

        assert_eq!(Wal::replay(&path).unwrap(), vec![compacted[0].clone(), next]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn failed_append_leaves_file_untouched() {
        for fault in [Fault::TornWrite, Fault::FailedSync] {
            let path = tmp_path(&format!("failed_append_{fault:?}.wal"));
            let _ = fs::remove_file(&path);

            let mut wal = Wal::open(&path).unwrap();
            let kept = room_set("101", "available");
            wal.append(&kept).unwrap();
            let len = fs::metadata(&path).unwrap().len();

            wal.inject_fault(Some(fault));
            assert!(wal.append(&room_set("101", "booked")).is_err());
            assert_eq!(fs::metadata(&path).unwrap().len(), len, "{fault:?}");
            assert_eq!(wal.appends_since_compact(), 1);
            assert!(!wal.is_poisoned());

            let next = room_set("102", "available");
            wal.append(&next).unwrap();
            drop(wal);

            assert_eq!(Wal::replay(&path).unwrap(), vec![kept, next], "{fault:?}");
            let _ = fs::remove_file(&path);
        }
    }

    #[test]
    fn failed_rollback_poisons_until_compaction() {
        let path = tmp_path("stuck_rollback.wal");
        let _ = fs::remove_file(&path);

        let mut wal = Wal::open(&path).unwrap();
        let kept = room_set("101", "available");
        wal.append(&kept).unwrap();

        wal.inject_fault(Some(Fault::StuckRollback));
        assert!(wal.append(&room_set("101", "booked")).is_err());
        assert!(wal.is_poisoned());

        wal.inject_fault(None);
        assert!(wal.append(&room_set("102", "available")).is_err());

        Wal::write_compact_file(wal.path(), std::slice::from_ref(&kept)).unwrap();
        wal.swap_compact_file().unwrap();
        assert!(!wal.is_poisoned());

        let next = room_set("103", "available");
        wal.append(&next).unwrap();
        drop(wal);

        assert_eq!(Wal::replay(&path).unwrap(), vec![kept, next]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_rejects_oversized_length_header() {
        let path = tmp_path("oversized_len.wal");
        let _ = fs::remove_file(&path);

        let record = room_set("101", "available");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&record).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&u32::MAX.to_le_bytes()).unwrap();
            f.write_all(&[0u8; 16]).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![record]);
        let _ = fs::remove_file(&path);
    }
}
