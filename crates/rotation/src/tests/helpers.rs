use crate::rotating_io::piece_file_name;
use crate::*;
use anyhow::Result;
use config::{EngineOptions, HistoricConfig, RotationConfig};
use std::path::Path;
use std::sync::Arc;

pub fn options() -> EngineOptions {
    EngineOptions {
        wal_sync: false,
        checkpoint_bytes: 0,
        max_piece_bytes: 0,
    }
}

pub fn ring(pieces: usize) -> RotationConfig {
    RotationConfig::default()
        .with_pieces(pieces)
        .with_engine(options())
}

pub fn history() -> HistoricConfig {
    HistoricConfig::default().with_engine(options())
}

pub fn open_ring(base: &Path, pieces: usize) -> Result<RotatingDbIo> {
    Ok(RotatingDbIo::open(base, &ring(pieces), no_crash())?)
}

pub fn open_engine(path: &Path) -> Result<Arc<Engine>> {
    Ok(Arc::new(Engine::open(path, &options())?))
}

/// File numbers of the ring pieces holding the marker, ascending.
pub fn marked(io: &RotatingDbIo) -> Result<Vec<usize>> {
    let n = io.pieces_count();
    let mut out = Vec::new();
    for (i, piece) in io.pieces().take(n).enumerate() {
        if piece.exists(CURRENT_PIECE_MARK_KEY)? {
            out.push((io.current_piece_file_no() + i) % n);
        }
    }
    out.sort_unstable();
    Ok(out)
}

/// Marked file numbers as found on disk, without running recovery. The
/// store must not be open.
pub fn marked_on_disk(base: &Path, pieces: usize) -> Result<Vec<usize>> {
    let mut out = Vec::new();
    for file_no in 0..pieces {
        let piece = Engine::open(base.join(piece_file_name(file_no)), &options())?;
        if piece.exists(CURRENT_PIECE_MARK_KEY)? {
            out.push(file_no);
        }
    }
    Ok(out)
}

pub fn text(value: Option<Vec<u8>>) -> Option<String> {
    value.map(|v| String::from_utf8_lossy(&v).into_owned())
}
