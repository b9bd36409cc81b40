//! Crash-safe snapshot writer: write rows to a `.inprogress` file, fsync
//! periodically, append the EOF marker, then fsync-rename into place.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use duskdb_core::{SpaceId, Vclock};
use tracing::debug;

use crate::error::{Error, Result};
use crate::format::{self, Row};
use crate::paths;

/// Bytes written between forced `fsync` calls during large sequential
/// writes.
pub const SYNC_INTERVAL_BYTES: u64 = 16 * 1024 * 1024;

/// Optional throttle on how fast the writer is allowed to push bytes to
/// disk, so a checkpoint does not starve foreground I/O.
#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    /// Maximum sustained bytes per second.
    pub bytes_per_sec: u64,
}

/// Writes one snapshot file: a header, a dense ascending run of rows, and a
/// closing EOF marker.
pub struct SnapshotWriter {
    file: BufWriter<File>,
    inprogress_path: PathBuf,
    final_path: PathBuf,
    next_lsn: u64,
    bytes_since_sync: u64,
    rate_limit: Option<RateLimit>,
    window_start: Instant,
    window_bytes: u64,
    closed: bool,
}

impl SnapshotWriter {
    /// Create a new snapshot file under `dir` named from `vclock`'s
    /// signature, with an `.inprogress` suffix until [`SnapshotWriter::close`]
    /// succeeds.
    pub fn create(dir: &Path, vclock: &Vclock, rate_limit: Option<RateLimit>) -> Result<Self> {
        let inprogress_path = paths::inprogress_path(dir, vclock);
        let final_path = paths::final_path(dir, vclock);

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&inprogress_path)?;
        let mut file = BufWriter::new(file);
        format::write_header(&mut file, vclock)?;

        Ok(SnapshotWriter {
            file,
            inprogress_path,
            final_path,
            next_lsn: 1,
            bytes_since_sync: 0,
            rate_limit,
            window_start: Instant::now(),
            window_bytes: 0,
            closed: false,
        })
    }

    /// Append one row, assigning it the next dense ascending lsn.
    pub fn write_row(&mut self, space_id: SpaceId, tuple: Vec<u8>) -> Result<()> {
        let row = Row {
            lsn: self.next_lsn,
            space_id,
            tuple,
        };
        let framed = format::encode_row(&row);
        self.file.write_all(&framed)?;
        self.next_lsn += 1;

        self.bytes_since_sync += framed.len() as u64;
        self.window_bytes += framed.len() as u64;
        self.throttle();

        if self.bytes_since_sync >= SYNC_INTERVAL_BYTES {
            self.file.flush()?;
            self.file.get_ref().sync_data()?;
            self.bytes_since_sync = 0;
        }
        Ok(())
    }

    fn throttle(&mut self) {
        let Some(limit) = self.rate_limit else {
            return;
        };
        if limit.bytes_per_sec == 0 {
            return;
        }
        let elapsed = self.window_start.elapsed();
        let allowed = (elapsed.as_secs_f64() * limit.bytes_per_sec as f64) as u64;
        if self.window_bytes > allowed {
            let owed_bytes = self.window_bytes - allowed;
            let owed_secs = owed_bytes as f64 / limit.bytes_per_sec as f64;
            std::thread::sleep(Duration::from_secs_f64(owed_secs));
        }
        if elapsed >= Duration::from_secs(1) {
            self.window_start = Instant::now();
            self.window_bytes = 0;
        }
    }

    /// Write the EOF marker, fsync the file and its parent directory, then
    /// atomically rename `.inprogress` into its final name. Returns the
    /// final path.
    pub fn close(mut self) -> Result<PathBuf> {
        self.file.write_all(&format::EOF_MARKER)?;
        self.file.flush()?;
        self.file.get_ref().sync_all()?;

        fs::rename(&self.inprogress_path, &self.final_path)?;
        if let Some(parent) = self.final_path.parent() {
            File::open(parent)?.sync_all()?;
        }

        self.closed = true;
        debug!(path = %self.final_path.display(), rows = self.next_lsn - 1, "snapshot committed");
        Ok(self.final_path.clone())
    }

    /// Abandon the write, leaving the `.inprogress` file on disk for a
    /// later recovery pass to discard.
    pub fn abort(self) {
        debug!(path = %self.inprogress_path.display(), "snapshot write aborted");
    }
}

impl Drop for SnapshotWriter {
    fn drop(&mut self) {
        if !self.closed {
            debug!(
                path = %self.inprogress_path.display(),
                "snapshot writer dropped without close(); .inprogress file left for recovery"
            );
        }
    }
}

/// Surface the corrupt-file variant for a caller that wants to attach a
/// path to an I/O failure from outside this module.
pub fn wrap_corrupt(path: &Path, reason: impl Into<String>) -> Error {
    Error::corrupt(path.display().to_string(), reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::RowRead;
    use std::io::{BufReader, Read};

    #[test]
    fn writes_header_rows_and_eof_marker() {
        let dir = tempfile::tempdir().unwrap();
        let vclock = Vclock::new(vec![(0, 3)]);
        let mut writer = SnapshotWriter::create(dir.path(), &vclock, None).unwrap();
        writer.write_row(SpaceId(1), b"a".to_vec()).unwrap();
        writer.write_row(SpaceId(1), b"bb".to_vec()).unwrap();
        let final_path = writer.close().unwrap();

        assert!(final_path.exists());
        assert!(!paths::inprogress_path(dir.path(), &vclock).exists());

        let mut file = BufReader::new(File::open(&final_path).unwrap());
        let read_vclock = format::read_header(&mut file).unwrap();
        assert_eq!(read_vclock, vclock);

        let mut rows = Vec::new();
        loop {
            match format::decode_row(&mut file).unwrap() {
                RowRead::Row(row) => rows.push(row),
                RowRead::Eof => break,
            }
        }
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].lsn, 1);
        assert_eq!(rows[1].lsn, 2);

        let mut trailing = Vec::new();
        file.read_to_end(&mut trailing).unwrap();
        assert!(trailing.is_empty());
    }

    #[test]
    fn aborted_write_leaves_inprogress_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let vclock = Vclock::new(vec![(0, 1)]);
        let writer = SnapshotWriter::create(dir.path(), &vclock, None).unwrap();
        writer.abort();
        assert!(paths::inprogress_path(dir.path(), &vclock).exists());
        assert!(!paths::final_path(dir.path(), &vclock).exists());
    }
}
