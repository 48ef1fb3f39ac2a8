//! # WAL - Batch Write-Ahead Log
//!
//! Durability layer for a single rotating-store piece.
//!
//! Every unit of work (a single insert/delete, or a whole write batch) is
//! serialized into **one** binary frame and appended to the log before the
//! piece's in-memory table is touched. Because a frame is checksummed as a
//! whole and a torn tail frame is discarded on replay, a batch is either fully
//! present after a crash or not present at all.
//!
//! ## Binary Record Format
//!
//! ```text
//! [record_len: u32 LE][crc32: u32 LE][body ...]
//! ```
//!
//! Body: `[seq: u64][op_count: u32]` followed by `op_count` operations:
//!
//! - Put: `[op=0: u8][key_len: u32][key][val_len: u32][value]`
//! - Del: `[op=1: u8][key_len: u32][key]`
//!
//! `record_len` includes the 4-byte CRC but **not** itself.
//!
//! ## Example
//!
//! ```rust,no_run
//! use wal::{WalOp, WalReader, WalRecord, WalWriter};
//!
//! let mut w = WalWriter::create("wal.log", true).unwrap();
//! w.append(&WalRecord {
//!     seq: 1,
//!     ops: vec![WalOp::Put { key: b"hello".to_vec(), value: b"world".to_vec() }],
//! }).unwrap();
//! drop(w);
//!
//! let mut r = WalReader::open("wal.log").unwrap();
//! r.replay(|rec| println!("{:?}", rec)).unwrap();
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use thiserror::Error;

/// Upper bound on a single frame. Anything larger is treated as corruption.
const MAX_RECORD_SIZE: u32 = 256 * 1024 * 1024;

const OP_PUT: u8 = 0;
const OP_DEL: u8 = 1;

/// One mutation inside a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalOp {
    /// A key-value insertion (overwrites any previous value).
    Put {
        /// The lookup key.
        key: Vec<u8>,
        /// The payload value.
        value: Vec<u8>,
    },
    /// A key deletion.
    Del {
        /// The key to delete.
        key: Vec<u8>,
    },
}

impl WalOp {
    /// The key this operation touches.
    pub fn key(&self) -> &[u8] {
        match self {
            WalOp::Put { key, .. } | WalOp::Del { key } => key,
        }
    }
}

/// A single atomic frame: every operation in `ops` is applied, or none is.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WalRecord {
    /// Sequence number assigned by the piece engine.
    pub seq: u64,
    /// Operations in application order.
    pub ops: Vec<WalOp>,
}

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A record failed CRC validation or contained an unknown op code.
    #[error("corrupt record")]
    Corrupt,
}

/// Append-only WAL writer.
///
/// Records are serialized into an in-memory buffer, CRC-checksummed, and then
/// written to the underlying file in a single `write_all` call. When `sync` is
/// `true`, every append is followed by `sync_all()` (fsync).
pub struct WalWriter {
    file: File,
    sync: bool,
    /// Reusable scratch buffer to avoid allocation on every append.
    buf: Vec<u8>,
}

impl std::fmt::Debug for WalWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalWriter").field("sync", &self.sync).finish()
    }
}

impl WalWriter {
    /// Opens (or creates) a WAL file in append mode.
    pub fn create<P: AsRef<Path>>(path: P, sync: bool) -> Result<Self, WalError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)?;
        Ok(Self {
            file,
            sync,
            buf: Vec::with_capacity(256),
        })
    }

    /// Serializes `record` and appends it to the WAL file as one frame.
    ///
    /// Returns the number of bytes written (header included).
    pub fn append(&mut self, record: &WalRecord) -> Result<usize, WalError> {
        self.buf.clear();

        // Frame header (record_len + crc) is filled in once the body is known.
        self.buf.extend_from_slice(&[0u8; 8]);

        self.buf.write_u64::<LittleEndian>(record.seq)?;
        self.buf.write_u32::<LittleEndian>(len_u32(record.ops.len())?)?;
        for op in &record.ops {
            match op {
                WalOp::Put { key, value } => {
                    self.buf.write_u8(OP_PUT)?;
                    self.buf.write_u32::<LittleEndian>(len_u32(key.len())?)?;
                    self.buf.extend_from_slice(key);
                    self.buf.write_u32::<LittleEndian>(len_u32(value.len())?)?;
                    self.buf.extend_from_slice(value);
                }
                WalOp::Del { key } => {
                    self.buf.write_u8(OP_DEL)?;
                    self.buf.write_u32::<LittleEndian>(len_u32(key.len())?)?;
                    self.buf.extend_from_slice(key);
                }
            }
        }

        let body = &self.buf[8..];
        let mut hasher = Crc32::new();
        hasher.update(body);
        let crc = hasher.finalize();

        let record_len = (body.len() as u64) + 4;
        if record_len > MAX_RECORD_SIZE as u64 {
            return Err(WalError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "WAL record too large",
            )));
        }

        self.buf[0..4].copy_from_slice(&(record_len as u32).to_le_bytes());
        self.buf[4..8].copy_from_slice(&crc.to_le_bytes());

        self.file.write_all(&self.buf)?;
        self.file.flush()?;

        if self.sync {
            self.file.sync_all()?;
        }

        Ok(self.buf.len())
    }

    /// Forces all buffered data to be written to disk via `sync_all()`.
    pub fn sync_to_disk(&mut self) -> Result<(), WalError> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

fn len_u32(len: usize) -> Result<u32, WalError> {
    u32::try_from(len).map_err(|_| {
        WalError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            "length exceeds u32::MAX",
        ))
    })
}

/// Sequential WAL reader that yields valid records.
///
/// A truncated tail frame (crash mid-write) is treated as a clean EOF: all
/// complete frames before it are returned and the partial one is dropped.
pub struct WalReader<R: Read> {
    rdr: BufReader<R>,
}

impl WalReader<File> {
    /// Opens an existing WAL file for sequential replay.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<WalReader<File>, WalError> {
        let f = File::open(path)?;
        Ok(WalReader {
            rdr: BufReader::new(f),
        })
    }
}

impl<R: Read> WalReader<R> {
    /// Constructs a reader from any `Read` implementor.
    pub fn from_reader(reader: R) -> Self {
        WalReader {
            rdr: BufReader::new(reader),
        }
    }

    /// Replays every valid record in the WAL, calling `apply` for each one.
    ///
    /// - **Clean EOF** or **truncated tail** -> `Ok(())`.
    /// - **CRC mismatch** or **unknown op code** -> `Err(WalError::Corrupt)`.
    pub fn replay<F>(&mut self, mut apply: F) -> Result<(), WalError>
    where
        F: FnMut(WalRecord),
    {
        let mut body = Vec::with_capacity(256);

        loop {
            let record_len = match self.rdr.read_u32::<LittleEndian>() {
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(WalError::Io(e)),
            };

            if record_len <= 4 || record_len > MAX_RECORD_SIZE {
                return Err(WalError::Corrupt);
            }

            let crc = match self.rdr.read_u32::<LittleEndian>() {
                Ok(v) => v,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(WalError::Io(e)),
            };

            let body_len = (record_len - 4) as usize;
            body.clear();
            body.resize(body_len, 0);
            match self.rdr.read_exact(&mut body) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(WalError::Io(e)),
            }

            let mut hasher = Crc32::new();
            hasher.update(&body);
            if hasher.finalize() != crc {
                return Err(WalError::Corrupt);
            }

            apply(decode_body(&body)?);
        }
    }
}

fn decode_body(body: &[u8]) -> Result<WalRecord, WalError> {
    let mut br = body;
    let seq = br.read_u64::<LittleEndian>().map_err(|_| WalError::Corrupt)?;
    let count = br.read_u32::<LittleEndian>().map_err(|_| WalError::Corrupt)? as usize;

    // every op needs at least 5 bytes, so a larger count cannot be genuine
    if count > body.len() / 5 + 1 {
        return Err(WalError::Corrupt);
    }

    let mut ops = Vec::with_capacity(count);
    for _ in 0..count {
        let op = br.read_u8().map_err(|_| WalError::Corrupt)?;
        let key = read_chunk(&mut br)?;
        match op {
            OP_PUT => {
                let value = read_chunk(&mut br)?;
                ops.push(WalOp::Put { key, value });
            }
            OP_DEL => ops.push(WalOp::Del { key }),
            _ => return Err(WalError::Corrupt),
        }
    }

    if !br.is_empty() {
        return Err(WalError::Corrupt);
    }

    Ok(WalRecord { seq, ops })
}

fn read_chunk(br: &mut &[u8]) -> Result<Vec<u8>, WalError> {
    let len = br.read_u32::<LittleEndian>().map_err(|_| WalError::Corrupt)? as usize;
    if len > br.len() {
        return Err(WalError::Corrupt);
    }
    let (chunk, rest) = br.split_at(len);
    *br = rest;
    Ok(chunk.to_vec())
}
