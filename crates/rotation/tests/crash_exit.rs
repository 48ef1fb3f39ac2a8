//! Crash scenarios that really terminate the process.
//!
//! The parent test re-runs this test binary, filtered to one child test, with
//! the scenario passed through the environment. The child arms an exiting
//! crash point and never returns normally; the parent checks the exit status
//! and reopens the store.

use anyhow::Result;
use config::{EngineOptions, RotationConfig};
use rotation::crash::points;
use rotation::*;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use tempfile::tempdir;

const SCENARIO_ENV: &str = "ROTATION_CRASH_SCENARIO";
const PIECES: usize = 3;

fn options() -> EngineOptions {
    EngineOptions {
        wal_sync: true,
        checkpoint_bytes: 0,
        max_piece_bytes: 0,
    }
}

fn ring() -> RotationConfig {
    RotationConfig::default()
        .with_pieces(PIECES)
        .with_engine(options())
}

/// Runs `child` in a fresh process with `scenario` and returns its exit code.
fn run_child(child: &str, scenario: String) -> Result<Option<i32>> {
    let status = Command::new(std::env::current_exe()?)
        .args([child, "--exact", "--test-threads=1"])
        .env(SCENARIO_ENV, scenario)
        .status()?;
    Ok(status.code())
}

fn scenario() -> Option<(String, String)> {
    let raw = std::env::var(SCENARIO_ENV).ok()?;
    let (point, dir) = raw.split_once('|')?;
    Some((point.to_string(), dir.to_string()))
}

#[test]
fn child_rotate() {
    let Some((point, dir)) = scenario() else {
        return;
    };
    let crash = Arc::new(CrashPoints::exiting());
    crash.enable_crash_at(&point).unwrap();
    let mut io = RotatingDbIo::open(&dir, &ring(), crash).unwrap();
    io.rotate().unwrap();
    panic!("crash point {point} was never reached");
}

#[test]
fn child_commit() {
    let Some((point, dir)) = scenario() else {
        return;
    };
    let crash = Arc::new(CrashPoints::exiting());
    crash.enable_crash_at(&point).unwrap();
    let engine = Arc::new(Engine::open(Path::new(&dir).join("piece"), &options()).unwrap());
    let db = BatchedDb::new(engine, crash);
    for i in 0..100 {
        db.insert(format!("block{i}").as_bytes(), b"payload").unwrap();
    }
    db.commit(&point).unwrap();
    panic!("crash point {point} was never reached");
}

#[test]
fn process_exit_during_rotation_recovers() -> Result<()> {
    for point in [
        points::AFTER_REMOVE_OLDEST,
        points::AFTER_OPEN_LEVELDB,
        points::WITH_TWO_KEYS,
    ] {
        let dir = tempdir()?;
        {
            let mut io = RotatingDbIo::open(dir.path(), &ring(), no_crash())?;
            io.rotate()?;
            assert_eq!(io.current_piece_file_no(), 2);
        }

        let code = run_child("child_rotate", format!("{point}|{}", dir.path().display()))?;
        assert_eq!(code, Some(CRASH_EXIT_CODE), "{point}");

        let io = RotatingDbIo::open(dir.path(), &ring(), no_crash())?;
        let current = io.current_piece_file_no();
        assert!(current == 2 || current == 1, "{point}: current {current}");
        let mut marks = 0;
        for piece in io.pieces() {
            if piece.exists(CURRENT_PIECE_MARK_KEY)? {
                marks += 1;
            }
        }
        assert_eq!(marks, 1, "{point}");
    }
    Ok(())
}

#[test]
fn process_exit_before_commit_loses_whole_batch() -> Result<()> {
    let dir = tempdir()?;
    let code = run_child(
        "child_commit",
        format!("commit_blocks|{}", dir.path().display()),
    )?;
    assert_eq!(code, Some(CRASH_EXIT_CODE));

    let engine = Engine::open(dir.path().join("piece"), &options())?;
    assert!(engine.is_empty());
    Ok(())
}
