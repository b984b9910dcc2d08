//! Command execution infrastructure for the robot
//!
//! This module handles:
//! - The batch control surface driven by the response parser
//! - Sequential execution of each batch on a single background worker
//! - STOP preemption of an executing batch
//! - Reporting one result per finalized batch

mod executor;
pub mod handlers;

pub use executor::{BatchExecutor, ExecutorError};

use picar_shared::{BatchId, CommandSpec};

/// Control surface for batch execution
///
/// Implementations must never block the caller: they only record the event
/// and wake whatever executes the batch.
pub trait BatchControl: Send + Sync {
    /// A batch header was recognized
    fn start_batch(&self, batch_id: BatchId) -> Result<(), ExecutorError>;

    /// A command line of the current batch was recognized
    fn enqueue_command(&self, command: CommandSpec) -> Result<(), ExecutorError>;

    /// The model's turn ended while a batch was open
    fn finish_batch(&self) -> Result<(), ExecutorError>;
}
