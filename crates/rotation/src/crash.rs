//! Named crash checkpoints for recovery tests.
//!
//! Multi-step durable sequences (rotation, batch commit, recovery) call
//! [`Checkpoint::checkpoint`] after every step. Production code passes
//! [`NoCrash`]; tests pass a [`CrashPoints`] armed at one name and then
//! reopen the store to check that recovery copes with whatever was left on
//! disk.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::{Error, Result};

/// Checkpoint names used by the rotating stores.
pub mod points {
    /// Fixed-count store, archive mode: the evicted piece was renamed.
    pub const AFTER_RENAME_OLDEST: &str = "after_rename_oldest";
    /// Fixed-count store: the evicted piece was deleted.
    pub const AFTER_REMOVE_OLDEST: &str = "after_remove_oldest";
    /// A fresh piece was created (both stores).
    pub const AFTER_OPEN_LEVELDB: &str = "after_open_leveldb";
    /// Fixed-count store: both the new and the previous current piece hold
    /// the marker.
    pub const WITH_TWO_KEYS: &str = "with_two_keys";
    /// Fixed-count recovery removed a duplicate marker.
    pub const AFTER_PIECES_KILL: &str = "after_pieces_kill";
    /// Historic store finished opening.
    pub const AFTER_RECOVER: &str = "after_recover";
}

/// Exit status used by [`CrashPoints::exiting`].
pub const CRASH_EXIT_CODE: i32 = 33;

/// Hook invoked at every named step of a durable sequence.
pub trait Checkpoint: Send + Sync {
    fn checkpoint(&self, name: &str) -> Result<()>;
}

/// The production hook: every checkpoint passes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCrash;

impl Checkpoint for NoCrash {
    fn checkpoint(&self, _name: &str) -> Result<()> {
        Ok(())
    }
}

/// Shared no-op hook, for constructors that take an `Arc<dyn Checkpoint>`.
pub fn no_crash() -> Arc<dyn Checkpoint> {
    Arc::new(NoCrash)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CrashAction {
    Exit(i32),
    Fail,
}

/// A hook that can be armed at exactly one checkpoint name.
#[derive(Debug)]
pub struct CrashPoints {
    armed: Mutex<Option<String>>,
    action: CrashAction,
}

impl CrashPoints {
    /// Terminates the process with [`CRASH_EXIT_CODE`] when the armed
    /// checkpoint is reached.
    pub fn exiting() -> Self {
        Self {
            armed: Mutex::new(None),
            action: CrashAction::Exit(CRASH_EXIT_CODE),
        }
    }

    /// Returns [`Error::SimulatedCrash`] when the armed checkpoint is reached
    /// and disarms itself.
    pub fn failing() -> Self {
        Self {
            armed: Mutex::new(None),
            action: CrashAction::Fail,
        }
    }

    /// Arms `name`. Only one checkpoint may be armed at a time.
    pub fn enable_crash_at(&self, name: &str) -> Result<()> {
        let mut armed = self.armed.lock();
        if let Some(current) = armed.as_ref() {
            return Err(Error::CrashAlreadyArmed {
                armed: current.clone(),
            });
        }
        *armed = Some(name.to_string());
        Ok(())
    }

    pub fn armed(&self) -> Option<String> {
        self.armed.lock().clone()
    }

    /// Fires if `name` is the armed checkpoint. An empty name never fires.
    pub fn crash_before_commit(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Ok(());
        }
        let mut armed = self.armed.lock();
        if armed.as_deref() != Some(name) {
            return Ok(());
        }
        match self.action {
            CrashAction::Exit(code) => {
                tracing::warn!(checkpoint = name, code, "simulated crash, exiting");
                std::process::exit(code)
            }
            CrashAction::Fail => {
                *armed = None;
                tracing::warn!(checkpoint = name, "simulated crash");
                Err(Error::SimulatedCrash {
                    checkpoint: name.to_string(),
                })
            }
        }
    }
}

impl Checkpoint for CrashPoints {
    fn checkpoint(&self, name: &str) -> Result<()> {
        self.crash_before_commit(name)
    }
}
