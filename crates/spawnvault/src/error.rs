//! # Runtime Error Types
//!
//! Expected conditions (busy, full, validation) are reported through
//! outcome enums. A full inventory is never an error: generation trims
//! and raises the capacity flag. The outcome enums convert into these
//! errors through `into_result` for callers that want `?`.

use spawnvault_economy::EconomyError;
use spawnvault_shared::SpawnerId;
use thiserror::Error;

/// Errors that can occur in the spawner runtime.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpawnerError {
    /// Another operation holds the spawner's exclusive lock.
    #[error("transaction in progress on {0}")]
    LockContention(SpawnerId),

    /// Commit-time re-validation failed.
    #[error("validation failed: {0}")]
    ValidationFailure(String),

    /// The currency gateway refused the deposit.
    #[error("deposit failed: {0}")]
    DepositFailure(String),

    /// Paid, but the quoted items could not be removed.
    #[error("removal inconsistency on {0}")]
    RemovalInconsistency(SpawnerId),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// No spawner with this id.
    #[error("unknown spawner: {0}")]
    UnknownSpawner(SpawnerId),

    /// Requested stack size outside `1..=max_stack_size`.
    #[error("stack size {requested} outside 1..={max}")]
    StackOutOfRange {
        /// Requested stack size.
        requested: u32,
        /// Configured maximum.
        max: u32,
    },

    /// Shrinking would leave more used slots than the new capacity.
    #[error("cannot shrink to {new_slots} slots while {used_slots} are used")]
    ResizeWouldOverflow {
        /// Slots currently used.
        used_slots: u64,
        /// Capacity after the resize.
        new_slots: u64,
    },

    /// An executor has shut down.
    #[error("executor closed")]
    ExecutorClosed,

    /// A ticket was not resolved in time.
    #[error("timed out waiting for result")]
    WaitTimedOut,

    /// Persistence collaborator failure.
    #[error("store error: {0}")]
    Store(String),

    /// Economy layer error.
    #[error(transparent)]
    Economy(#[from] EconomyError),
}

/// Result type for runtime operations.
pub type SpawnerResult<T> = Result<T, SpawnerError>;
