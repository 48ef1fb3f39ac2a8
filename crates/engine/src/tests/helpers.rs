use crate::{Engine, EngineOptions};
use anyhow::Result;
use std::path::Path;

/// Options with checkpoints disabled so tests control when they happen.
pub fn no_checkpoint() -> EngineOptions {
    EngineOptions {
        wal_sync: false,
        checkpoint_bytes: 0,
        max_piece_bytes: 0,
    }
}

pub fn open(dir: &Path) -> Result<Engine> {
    Engine::open(dir.join("piece"), &no_checkpoint())
}

/// Collects a full scan as `(key, value)` string pairs.
pub fn dump(engine: &Engine) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    engine.for_each(&mut |k, v| {
        out.push((
            String::from_utf8_lossy(k).into_owned(),
            String::from_utf8_lossy(v).into_owned(),
        ));
        true
    })?;
    Ok(out)
}
