//! Chunked file transfer over the command executor, with persisted task
//! state, progress events and cooperative cancellation.

mod engine;
mod progress;
mod store;
mod task;

#[cfg(test)]
mod testing;

pub use engine::{TransferEngine, TransferEvent};
pub use progress::SpeedCalculator;
pub use store::{JsonTaskStore, MemoryTaskStore, StoreError, TaskStore};
pub use task::{TransferDirection, TransferState, TransferTask};

use pcex_client::CommandError;
use uuid::Uuid;

/// Upload chunk size: 32 KiB, the same slice the remote host reads with.
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

/// Errors produced by the transfer crate.
///
/// Failures after a task has been created are recorded on the task instead;
/// these variants cover everything before that point plus task lookups.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("task store error: {0}")]
    Store(#[from] StoreError),

    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("task {id} is {state} and cannot be retried")]
    NotRetryable { id: Uuid, state: String },
}
