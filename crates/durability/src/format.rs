//! On-disk segment and record format for the replicated log.
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ Segment header (16 bytes)    │
//! ├──────────────────────────────┤
//! │ Record 0: len(4) crc(4) body │
//! │ Record 1: len(4) crc(4) body │
//! │ ...                          │
//! └──────────────────────────────┘
//! ```
//!
//! Records are framed independently so a reader can stop at the first
//! truncated or corrupt record (a crash mid-write) without losing every
//! record written before it.

use crate::error::WalError;
use byteorder::{LittleEndian, WriteBytesExt};
use crc32fast::Hasher;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes identifying a replicated-log segment file.
pub const SEGMENT_MAGIC: [u8; 4] = *b"SETL";

/// Current segment format version.
pub const SEGMENT_FORMAT_VERSION: u32 = 1;

/// Size of the segment header in bytes.
pub const SEGMENT_HEADER_SIZE: u64 = 16;

/// Reason a segment read stopped before end-of-file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Clean end of file: the last record was fully read and checksummed.
    Eof,
    /// A record was partially written (crash mid-append); everything
    /// before it is valid and the log may continue appending after it.
    Truncated,
    /// A record's CRC did not match; treated the same as truncation for
    /// recovery purposes; everything after this point is discarded.
    ChecksumMismatch,
}

fn header_bytes() -> [u8; SEGMENT_HEADER_SIZE as usize] {
    let mut bytes = [0u8; SEGMENT_HEADER_SIZE as usize];
    bytes[0..4].copy_from_slice(&SEGMENT_MAGIC);
    bytes[4..8].copy_from_slice(&SEGMENT_FORMAT_VERSION.to_le_bytes());
    bytes
}

/// An append-only segment file: one header followed by framed records.
pub struct Segment {
    file: File,
    path: PathBuf,
    write_position: u64,
}

impl Segment {
    /// Create a fresh segment at `path`, failing if it already exists.
    pub fn create(path: &Path) -> io::Result<Self> {
        let mut file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(path)?;
        file.write_all(&header_bytes())?;
        Ok(Segment {
            file,
            path: path.to_path_buf(),
            write_position: SEGMENT_HEADER_SIZE,
        })
    }

    /// Open `path` for append, validating its header. Creates it with a
    /// fresh header if it does not exist yet.
    pub fn open_or_create(path: &Path) -> Result<Self, WalError> {
        if !path.exists() {
            return Self::create(path).map_err(WalError::from);
        }
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut header = [0u8; SEGMENT_HEADER_SIZE as usize];
        file.read_exact(&mut header)?;
        if header[0..4] != SEGMENT_MAGIC {
            return Err(WalError::InvalidHeader("bad magic bytes".into()));
        }
        let version = u32::from_le_bytes(header[4..8].try_into().unwrap());
        if version != SEGMENT_FORMAT_VERSION {
            return Err(WalError::InvalidHeader(format!(
                "unsupported segment version {version}"
            )));
        }
        let end = file.seek(SeekFrom::End(0))?;
        Ok(Segment {
            file,
            path: path.to_path_buf(),
            write_position: end,
        })
    }

    /// Append one record, returning the byte offset it was written at.
    pub fn append(&mut self, payload: &[u8]) -> io::Result<u64> {
        self.file.seek(SeekFrom::Start(self.write_position))?;
        let offset = self.write_position;

        let mut hasher = Hasher::new();
        hasher.update(payload);
        let crc = hasher.finalize();

        self.file.write_u32::<LittleEndian>(payload.len() as u32)?;
        self.file.write_u32::<LittleEndian>(crc)?;
        self.file.write_all(payload)?;

        self.write_position = self.file.stream_position()?;
        Ok(offset)
    }

    /// Force the segment's contents to stable storage.
    pub fn sync(&mut self) -> io::Result<()> {
        self.file.sync_data()
    }

    /// Truncate the file at `offset`, discarding everything after a
    /// corrupt or partially written record found during recovery.
    pub fn truncate_at(&mut self, offset: u64) -> io::Result<()> {
        self.file.set_len(offset)?;
        self.write_position = offset;
        Ok(())
    }

    /// Path to the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current write position (end of the last complete record).
    pub fn size(&self) -> u64 {
        self.write_position
    }

    /// Read every well-formed record from the start of the segment,
    /// stopping at the first truncated or checksum-mismatched one.
    /// Returns the records read and where reading stopped, plus the
    /// offset reading stopped at (useful to truncate a reopened segment
    /// before resuming writes).
    pub fn read_all(&mut self) -> io::Result<(Vec<Vec<u8>>, StopReason, u64)> {
        self.file.seek(SeekFrom::Start(SEGMENT_HEADER_SIZE))?;
        let mut records = Vec::new();
        let mut offset = SEGMENT_HEADER_SIZE;

        loop {
            let mut len_buf = [0u8; 4];
            match self.file.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Ok((records, StopReason::Eof, offset));
                }
                Err(e) => return Err(e),
            }
            let len = u32::from_le_bytes(len_buf) as usize;

            let mut crc_buf = [0u8; 4];
            if self.file.read_exact(&mut crc_buf).is_err() {
                return Ok((records, StopReason::Truncated, offset));
            }
            let expected_crc = u32::from_le_bytes(crc_buf);

            let mut payload = vec![0u8; len];
            if self.file.read_exact(&mut payload).is_err() {
                return Ok((records, StopReason::Truncated, offset));
            }

            let mut hasher = Hasher::new();
            hasher.update(&payload);
            if hasher.finalize() != expected_crc {
                return Ok((records, StopReason::ChecksumMismatch, offset));
            }

            offset += 8 + len as u64;
            records.push(payload);
        }
    }
}
