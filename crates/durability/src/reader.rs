//! Snapshot file reader: validates the header, replays rows in dense
//! ascending lsn order, and treats a missing EOF marker as corruption.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use duskdb_core::Vclock;

use crate::error::{Error, Result};
use crate::format::{self, Row, RowRead};

/// Sequential cursor over one snapshot file's rows.
pub struct SnapshotReader {
    path: PathBuf,
    file: BufReader<File>,
    vclock: Vclock,
    expected_lsn: u64,
    finished: bool,
}

impl SnapshotReader {
    /// Open `path`, validating its header and returning a cursor positioned
    /// at the first row.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut file = BufReader::new(file);
        let vclock = format::read_header(&mut file)
            .map_err(|e| Error::corrupt(path.display().to_string(), e.to_string()))?;

        Ok(SnapshotReader {
            path: path.to_path_buf(),
            file,
            vclock,
            expected_lsn: 1,
            finished: false,
        })
    }

    /// The checkpoint signature this file was written under.
    pub fn vclock(&self) -> &Vclock {
        &self.vclock
    }

    /// Read the next row, or `None` once the EOF marker has been consumed.
    ///
    /// Returns [`Error::Corrupt`] if the file ends without an EOF marker, a
    /// row fails its CRC check, or a row's lsn is not the next dense
    /// ascending value.
    pub fn next_row(&mut self) -> Result<Option<Row>> {
        if self.finished {
            return Ok(None);
        }
        match format::decode_row(&mut self.file) {
            Ok(RowRead::Row(row)) => {
                if row.lsn != self.expected_lsn {
                    return Err(Error::NonDenseLsn {
                        path: self.path.display().to_string(),
                        expected: self.expected_lsn,
                        found: row.lsn,
                    });
                }
                self.expected_lsn += 1;
                Ok(Some(row))
            }
            Ok(RowRead::Eof) => {
                self.finished = true;
                Ok(None)
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(Error::corrupt(
                    self.path.display().to_string(),
                    "truncated before EOF marker",
                ))
            }
            Err(e) => Err(Error::corrupt(self.path.display().to_string(), e.to_string())),
        }
    }

    /// Drain every remaining row, calling `on_row` for each.
    pub fn replay(mut self, mut on_row: impl FnMut(Row) -> Result<()>) -> Result<()> {
        while let Some(row) = self.next_row()? {
            on_row(row)?;
        }
        Ok(())
    }
}
