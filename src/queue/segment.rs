//! Durable, append-only FIFO of string records backed by a single file
//!
//! A segment log owns one file laid out as described in [`crate::queue::format`].
//! Every mutation is made durable before it returns:
//!
//! - `append` writes the frame past the committed tail, syncs it, and only
//!   then commits a header that covers it. A crash in between leaves the old
//!   header authoritative and the partial frame invisible.
//! - removals commit a header with an advanced head offset. Space at the front
//!   of the file is reclaimed by truncating when the log empties, or by
//!   compacting the live region into a fresh file that replaces the old one
//!   with an atomic rename.

use crate::queue::error::{LogError, LogResult};
use crate::queue::format::{
    checksum, encode_frame, select_header, FrameHeader, Header, FRAME_HEADER_LEN, HEADER_LEN, MAX_RECORD_LEN,
    SLOT_LEN,
};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Dead bytes at the front of a log before compaction is considered
const COMPACT_MIN_DEAD_BYTES: u64 = 1024 * 1024;

/// A single-owner durable FIFO log
#[derive(Debug)]
pub struct SegmentLog {
    path: PathBuf,
    file: File,
    header: Header,
}

impl SegmentLog {
    /// Creates a new empty log at `path`, replacing any file already there
    pub fn create(path: impl AsRef<Path>) -> LogResult<Self> {
        let path = path.as_ref().to_path_buf();

        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_error(&path)(e)),
        }

        let header = Header::empty();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(io_error(&path))?;

        write_blank_header(&mut file, &header).map_err(io_error(&path))?;
        sync_parent_dir(&path).map_err(io_error(&path))?;

        tracing::trace!("Created segment log {}", path.display());

        Ok(Self { path, file, header })
    }

    /// Reopens an existing log, recovering the last committed state
    ///
    /// Bytes past the committed tail (a partially written frame) are discarded.
    pub fn open(path: impl AsRef<Path>) -> LogResult<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(LogError::NotFound { path });
            }
            Err(e) => return Err(io_error(&path)(e)),
        };

        let file_len = file.metadata().map_err(io_error(&path))?.len();
        if file_len < HEADER_LEN {
            return Err(corrupt(&path, format!("file is {} bytes, shorter than its header", file_len)));
        }

        let mut slots = [0u8; HEADER_LEN as usize];
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.read_exact(&mut slots))
            .map_err(io_error(&path))?;

        let mut first = [0u8; SLOT_LEN];
        let mut second = [0u8; SLOT_LEN];
        first.copy_from_slice(&slots[..SLOT_LEN]);
        second.copy_from_slice(&slots[SLOT_LEN..]);

        let header = select_header(Header::decode(&first), Header::decode(&second))
            .ok_or_else(|| corrupt(&path, "no valid header slot".to_string()))?;

        if header.head < HEADER_LEN || header.head > header.tail {
            return Err(corrupt(
                &path,
                format!("head {} / tail {} out of order", header.head, header.tail),
            ));
        }
        if header.tail > file_len {
            return Err(corrupt(
                &path,
                format!("tail {} beyond end of file {}", header.tail, file_len),
            ));
        }
        if (header.count == 0) != (header.head == header.tail) {
            return Err(corrupt(
                &path,
                format!("record count {} disagrees with live region", header.count),
            ));
        }

        if file_len > header.tail {
            tracing::warn!(
                "Discarding {} uncommitted bytes at the end of {}",
                file_len - header.tail,
                path.display()
            );
            file.set_len(header.tail)
                .and_then(|_| file.sync_all())
                .map_err(io_error(&path))?;
        }

        Ok(Self { path, file, header })
    }

    /// Durably appends a record to the tail
    pub fn append(&mut self, record: &str) -> LogResult<()> {
        let payload = record.as_bytes();
        if payload.len() > MAX_RECORD_LEN as usize {
            return Err(LogError::RecordTooLarge { len: payload.len() });
        }

        let frame = encode_frame(payload);
        self.write_at(self.header.tail, &frame)?;
        self.file.sync_data().map_err(io_error(&self.path))?;

        let next = self.header.next(
            self.header.head,
            self.header.tail + frame.len() as u64,
            self.header.count + 1,
        );
        self.commit(next)
    }

    /// Returns the oldest record without removing it
    pub fn peek_oldest(&self) -> LogResult<Option<String>> {
        Ok(self.peek_oldest_n(1)?.pop())
    }

    /// Returns up to `n` oldest records in FIFO order without removing them
    pub fn peek_oldest_n(&self, n: usize) -> LogResult<Vec<String>> {
        let wanted = n.min(self.len());
        let mut records = Vec::with_capacity(wanted);
        if wanted == 0 {
            return Ok(records);
        }

        let mut reader = BufReader::new(&self.file);
        reader
            .seek(SeekFrom::Start(self.header.head))
            .map_err(io_error(&self.path))?;

        let mut offset = self.header.head;
        for _ in 0..wanted {
            let frame = self.read_frame_header(&mut reader, offset)?;

            let mut payload = vec![0u8; frame.len as usize];
            reader
                .read_exact(&mut payload)
                .map_err(io_error(&self.path))?;

            if checksum(&payload) != frame.checksum {
                return Err(corrupt(
                    &self.path,
                    format!("checksum mismatch in record at offset {}", offset),
                ));
            }

            let record = String::from_utf8(payload).map_err(|_| {
                corrupt(
                    &self.path,
                    format!("record at offset {} is not valid UTF-8", offset),
                )
            })?;

            records.push(record);
            offset += frame.frame_len();
        }

        Ok(records)
    }

    /// Returns every live record in FIFO order
    pub fn read_all(&self) -> LogResult<Vec<String>> {
        self.peek_oldest_n(self.len())
    }

    /// Durably removes the oldest record
    pub fn remove_oldest(&mut self) -> LogResult<()> {
        if self.is_empty() {
            return Err(LogError::Empty {
                path: self.path.clone(),
            });
        }
        self.remove_oldest_n(1).map(|_| ())
    }

    /// Durably removes up to `n` oldest records in one commit, returning how many were removed
    pub fn remove_oldest_n(&mut self, n: usize) -> LogResult<usize> {
        let removed = n.min(self.len());
        if removed == 0 {
            return Ok(0);
        }

        if removed == self.len() {
            self.reset()?;
            return Ok(removed);
        }

        let mut reader = BufReader::new(&self.file);
        reader
            .seek(SeekFrom::Start(self.header.head))
            .map_err(io_error(&self.path))?;

        let mut head = self.header.head;
        for _ in 0..removed {
            let frame = self.read_frame_header(&mut reader, head)?;
            reader
                .seek_relative(i64::from(frame.len))
                .map_err(io_error(&self.path))?;
            head += frame.frame_len();
        }

        let next = self
            .header
            .next(head, self.header.tail, self.header.count - removed as u64);
        self.commit(next)?;
        self.maybe_compact()?;

        Ok(removed)
    }

    /// Durably removes every record
    pub fn clear(&mut self) -> LogResult<()> {
        self.reset()
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.header.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.header.count == 0
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Forces file contents and metadata to stable storage
    pub fn sync(&self) -> LogResult<()> {
        self.file.sync_all().map_err(io_error(&self.path))
    }

    /// Flushes and releases the backing file
    pub fn close(self) -> LogResult<()> {
        self.sync()?;
        tracing::trace!("Closed segment log {}", self.path.display());
        Ok(())
    }

    fn commit(&mut self, next: Header) -> LogResult<()> {
        self.write_at(next.slot_offset(), &next.encode())?;
        self.file.sync_data().map_err(io_error(&self.path))?;
        self.header = next;
        Ok(())
    }

    fn reset(&mut self) -> LogResult<()> {
        let next = self.header.next(HEADER_LEN, HEADER_LEN, 0);
        self.commit(next)?;
        self.file
            .set_len(HEADER_LEN)
            .and_then(|_| self.file.sync_data())
            .map_err(io_error(&self.path))
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> LogResult<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.write_all(bytes))
            .map_err(io_error(&self.path))
    }

    fn read_frame_header<R: Read>(&self, reader: &mut R, offset: u64) -> LogResult<FrameHeader> {
        let mut prefix = [0u8; FRAME_HEADER_LEN as usize];
        reader
            .read_exact(&mut prefix)
            .map_err(io_error(&self.path))?;

        let frame = FrameHeader::decode(&prefix);
        if frame.len > MAX_RECORD_LEN || offset + frame.frame_len() > self.header.tail {
            return Err(corrupt(
                &self.path,
                format!("record at offset {} overruns the committed tail", offset),
            ));
        }

        Ok(frame)
    }

    fn maybe_compact(&mut self) -> LogResult<()> {
        let dead = self.header.dead_bytes();
        if dead >= COMPACT_MIN_DEAD_BYTES && dead > self.header.live_bytes() {
            self.compact()?;
        }
        Ok(())
    }

    /// Rewrites the live region into a fresh file and swaps it in atomically
    fn compact(&mut self) -> LogResult<()> {
        let mut scratch = self.path.clone().into_os_string();
        scratch.push(".compact");
        let scratch = PathBuf::from(scratch);

        let live = self.header.live_bytes();
        let compacted = Header {
            sequence: self.header.sequence + 1,
            head: HEADER_LEN,
            tail: HEADER_LEN + live,
            count: self.header.count,
        };

        let mut out = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&scratch)
            .map_err(io_error(&scratch))?;

        write_blank_header(&mut out, &compacted).map_err(io_error(&scratch))?;

        let mut source = &self.file;
        source
            .seek(SeekFrom::Start(self.header.head))
            .map_err(io_error(&self.path))?;
        let copied = io::copy(&mut source.take(live), &mut out).map_err(io_error(&scratch))?;
        if copied != live {
            return Err(corrupt(
                &self.path,
                format!("expected {} live bytes, found {}", live, copied),
            ));
        }
        out.sync_all().map_err(io_error(&scratch))?;

        fs::rename(&scratch, &self.path).map_err(io_error(&self.path))?;

        // The scratch handle now names the file at `self.path`, so the swap
        // cannot fail once the rename has happened
        let reclaimed = self.header.dead_bytes();
        self.file = out;
        self.header = compacted;

        sync_parent_dir(&self.path).map_err(io_error(&self.path))?;

        tracing::debug!(
            "Compacted {} ({} dead bytes reclaimed)",
            self.path.display(),
            reclaimed
        );

        Ok(())
    }
}

/// Writes both header slots (`header` in its slot, the other blank) and syncs
fn write_blank_header(file: &mut File, header: &Header) -> io::Result<()> {
    let mut slots = [0u8; HEADER_LEN as usize];
    let at = header.slot_offset() as usize;
    slots[at..at + SLOT_LEN].copy_from_slice(&header.encode());

    file.seek(SeekFrom::Start(0))?;
    file.write_all(&slots)?;
    file.sync_all()
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => File::open(parent)?.sync_all(),
        _ => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> LogError + '_ {
    move |source| LogError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn corrupt(path: &Path, detail: String) -> LogError {
    LogError::Corrupt {
        path: path.to_path_buf(),
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn urls(log: &SegmentLog) -> Vec<String> {
        log.read_all().unwrap()
    }

    #[test]
    fn test_created_log_is_empty() {
        let dir = tempdir().unwrap();
        let log = SegmentLog::create(dir.path().join("a.queue")).unwrap();

        assert!(log.is_empty());
        assert_eq!(log.len(), 0);
        assert_eq!(log.peek_oldest().unwrap(), None);
    }

    #[test]
    fn test_append_and_remove_are_fifo() {
        let dir = tempdir().unwrap();
        let mut log = SegmentLog::create(dir.path().join("a.queue")).unwrap();

        log.append("first").unwrap();
        log.append("second").unwrap();
        log.append("third").unwrap();
        assert_eq!(log.len(), 3);

        assert_eq!(log.peek_oldest().unwrap().as_deref(), Some("first"));
        log.remove_oldest().unwrap();
        assert_eq!(log.peek_oldest().unwrap().as_deref(), Some("second"));
        log.remove_oldest().unwrap();
        assert_eq!(log.peek_oldest().unwrap().as_deref(), Some("third"));
        log.remove_oldest().unwrap();

        assert!(log.is_empty());
    }

    #[test]
    fn test_peek_oldest_n_is_bounded_by_len() {
        let dir = tempdir().unwrap();
        let mut log = SegmentLog::create(dir.path().join("a.queue")).unwrap();
        for i in 0..5 {
            log.append(&format!("url-{}", i)).unwrap();
        }

        assert_eq!(log.peek_oldest_n(2).unwrap(), vec!["url-0", "url-1"]);
        assert_eq!(log.peek_oldest_n(50).unwrap().len(), 5);
        assert!(log.peek_oldest_n(0).unwrap().is_empty());
        assert_eq!(log.len(), 5);
    }

    #[test]
    fn test_empty_record_is_preserved() {
        let dir = tempdir().unwrap();
        let mut log = SegmentLog::create(dir.path().join("a.queue")).unwrap();
        log.append("").unwrap();

        assert_eq!(log.peek_oldest().unwrap().as_deref(), Some(""));
    }

    #[test]
    fn test_remove_from_empty_log_fails() {
        let dir = tempdir().unwrap();
        let mut log = SegmentLog::create(dir.path().join("a.queue")).unwrap();

        let err = log.remove_oldest().unwrap_err();
        assert!(matches!(err, LogError::Empty { .. }));
        assert!(!err.is_storage_fault());
    }

    #[test]
    fn test_remove_oldest_n_removes_a_prefix() {
        let dir = tempdir().unwrap();
        let mut log = SegmentLog::create(dir.path().join("a.queue")).unwrap();
        for i in 0..4 {
            log.append(&format!("url-{}", i)).unwrap();
        }

        assert_eq!(log.remove_oldest_n(3).unwrap(), 3);
        assert_eq!(urls(&log), vec!["url-3"]);
        assert_eq!(log.remove_oldest_n(10).unwrap(), 1);
        assert!(log.is_empty());
    }

    #[test]
    fn test_reopen_restores_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.queue");

        let mut log = SegmentLog::create(&path).unwrap();
        log.append("one").unwrap();
        log.append("two").unwrap();
        log.append("three").unwrap();
        log.remove_oldest().unwrap();
        log.close().unwrap();

        let mut log = SegmentLog::open(&path).unwrap();
        assert_eq!(urls(&log), vec!["two", "three"]);

        log.append("four").unwrap();
        log.close().unwrap();

        let log = SegmentLog::open(&path).unwrap();
        assert_eq!(urls(&log), vec!["two", "three", "four"]);
    }

    #[test]
    fn test_open_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let err = SegmentLog::open(dir.path().join("missing.queue")).unwrap_err();
        assert!(matches!(err, LogError::NotFound { .. }));
    }

    #[test]
    fn test_create_replaces_existing_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.queue");

        let mut log = SegmentLog::create(&path).unwrap();
        log.append("stale").unwrap();
        log.close().unwrap();

        let log = SegmentLog::create(&path).unwrap();
        assert!(log.is_empty());
    }

    #[test]
    fn test_torn_append_is_discarded_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.queue");

        let mut log = SegmentLog::create(&path).unwrap();
        log.append("kept-1").unwrap();
        log.append("kept-2").unwrap();
        log.close().unwrap();

        // A frame whose header claims more bytes than were written
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[40, 0, 0, 0, 1, 2, 3, 4, b'h', b't']).unwrap();
        drop(file);

        let mut log = SegmentLog::open(&path).unwrap();
        assert_eq!(urls(&log), vec!["kept-1", "kept-2"]);

        log.append("kept-3").unwrap();
        log.close().unwrap();

        let log = SegmentLog::open(&path).unwrap();
        assert_eq!(urls(&log), vec!["kept-1", "kept-2", "kept-3"]);
    }

    #[test]
    fn test_damaged_latest_slot_falls_back_to_previous_commit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.queue");

        let mut log = SegmentLog::create(&path).unwrap();
        log.append("one").unwrap(); // sequence 1, second slot
        log.append("two").unwrap(); // sequence 2, first slot
        log.close().unwrap();

        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        file.write_all(&[0xFF; 8]).unwrap();
        drop(file);

        let log = SegmentLog::open(&path).unwrap();
        assert_eq!(urls(&log), vec!["one"]);
    }

    #[test]
    fn test_destroyed_header_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.queue");

        let mut log = SegmentLog::create(&path).unwrap();
        log.append("one").unwrap();
        log.close().unwrap();

        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        file.write_all(&[0u8; HEADER_LEN as usize]).unwrap();
        drop(file);

        let err = SegmentLog::open(&path).unwrap_err();
        assert!(matches!(err, LogError::Corrupt { .. }));
        assert!(err.is_storage_fault());
    }

    #[test]
    fn test_payload_corruption_is_detected_on_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.queue");

        let mut log = SegmentLog::create(&path).unwrap();
        log.append("http://a.onion/").unwrap();
        log.close().unwrap();

        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(HEADER_LEN + FRAME_HEADER_LEN + 3))
            .unwrap();
        file.write_all(b"X").unwrap();
        drop(file);

        let log = SegmentLog::open(&path).unwrap();
        let err = log.peek_oldest().unwrap_err();
        assert!(matches!(err, LogError::Corrupt { .. }));
    }

    #[test]
    fn test_emptying_the_log_truncates_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.queue");

        let mut log = SegmentLog::create(&path).unwrap();
        log.append("one").unwrap();
        log.append("two").unwrap();
        log.remove_oldest().unwrap();
        log.remove_oldest().unwrap();

        assert_eq!(fs::metadata(&path).unwrap().len(), HEADER_LEN);

        log.append("three").unwrap();
        assert_eq!(urls(&log), vec!["three"]);
    }

    #[test]
    fn test_clear_empties_durably() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.queue");

        let mut log = SegmentLog::create(&path).unwrap();
        log.append("one").unwrap();
        log.append("two").unwrap();
        log.clear().unwrap();
        assert!(log.is_empty());
        log.close().unwrap();

        let log = SegmentLog::open(&path).unwrap();
        assert!(log.is_empty());
    }

    #[test]
    fn test_compaction_keeps_order_and_reclaims_space() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.queue");
        let filler = "x".repeat(8 * 1024);

        let mut log = SegmentLog::create(&path).unwrap();
        for i in 0..300 {
            log.append(&format!("{:03}-{}", i, filler)).unwrap();
        }
        let before = fs::metadata(&path).unwrap().len();

        log.remove_oldest_n(200).unwrap();
        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before / 2, "expected compaction: {} -> {}", before, after);

        let head = log.peek_oldest().unwrap().unwrap();
        assert!(head.starts_with("200-"));
        assert_eq!(log.len(), 100);
        log.close().unwrap();

        let log = SegmentLog::open(&path).unwrap();
        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 100);
        assert!(records[99].starts_with("299-"));
    }

    #[test]
    fn test_writes_after_compaction_reach_the_named_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.queue");
        let filler = "x".repeat(8 * 1024);

        let mut log = SegmentLog::create(&path).unwrap();
        for i in 0..300 {
            log.append(&format!("{:03}-{}", i, filler)).unwrap();
        }
        log.remove_oldest_n(250).unwrap();
        assert_eq!(log.header.head, HEADER_LEN);
        assert!(!dir.path().join("a.queue.compact").exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            let handle = log.file.metadata().unwrap();
            let named = fs::metadata(&path).unwrap();
            assert_eq!(handle.ino(), named.ino());
        }

        log.append("after").unwrap();
        log.close().unwrap();

        let log = SegmentLog::open(&path).unwrap();
        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 51);
        assert_eq!(records[50], "after");
    }
}
