use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by the rotating stores and their wrappers.
#[derive(Debug, Error)]
pub enum Error {
    /// A piece failed to open, read, or write.
    #[error(transparent)]
    Engine(#[from] anyhow::Error),

    /// A filesystem operation on the store layout failed.
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The historic store has no piece old enough to answer the query.
    #[error("timestamp {requested} predates the earliest piece ({earliest})")]
    InvalidTimestamp { requested: u64, earliest: u64 },

    #[error("rotation timestamp {requested} does not advance past {latest}")]
    NonIncreasingTimestamp { requested: u64, latest: u64 },

    /// A directory under the historic store's base is not a decimal timestamp.
    #[error("piece directory {name:?} is not a decimal timestamp")]
    InvalidPieceName { name: String },

    #[error("{outstanding} write batch(es) outstanding, refusing to rotate")]
    OutstandingBatches { outstanding: usize },

    /// Returned by [`CrashPoints::failing`](crate::CrashPoints::failing) in
    /// place of terminating the process.
    #[error("simulated crash at checkpoint {checkpoint:?}")]
    SimulatedCrash { checkpoint: String },

    #[error("crash point already armed at {armed:?}")]
    CrashAlreadyArmed { armed: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True if this is a [`Error::SimulatedCrash`], including one that was
    /// wrapped into an engine error on its way out of a `Database` call.
    pub fn is_simulated_crash(&self) -> bool {
        match self {
            Self::SimulatedCrash { .. } => true,
            Self::Engine(e) => matches!(
                e.downcast_ref::<Error>(),
                Some(Self::SimulatedCrash { .. })
            ),
            _ => false,
        }
    }
}
