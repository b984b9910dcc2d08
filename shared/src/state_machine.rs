//! Batch Executor State Machine
//!
//! Decides batch lifecycle transitions for the executor: which batch is
//! executing, which one is arriving behind it, and whether an arriving batch
//! may preempt the executing one. Queues, cancellation and locking live in
//! the executor; this type only tracks ids and state.

use std::fmt;

use crate::{BatchId, CommandSpec};

/// Command name that is allowed to preempt an executing batch
pub const PREEMPT_COMMAND: &str = "STOP";

/// Executor lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    /// No batch open
    Idle,
    /// A batch is open and accepting commands
    Executing,
    /// The executing batch's stream ended; remaining commands drain
    FinishCalled,
    /// A new header arrived while a batch executes; waiting for its first command
    CollectingIncomingFirst,
    /// The incoming batch did not start with STOP; its commands are dropped
    IncomingIgnoring,
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutorState::Idle => "idle",
            ExecutorState::Executing => "executing",
            ExecutorState::FinishCalled => "finish-called",
            ExecutorState::CollectingIncomingFirst => "collecting-incoming",
            ExecutorState::IncomingIgnoring => "incoming-ignoring",
        };
        f.write_str(name)
    }
}

/// Result of a StartBatch event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// The batch became the executing batch
    Started(BatchId),
    /// Another batch is executing; the new one waits for its first command
    Incoming { executing: BatchId, incoming: BatchId },
}

/// Result of an EnqueueCommand event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueDecision {
    /// Queue the command for the executing batch
    Accept(BatchId),
    /// Stop the executing batch and promote the incoming one
    Preempt { preempted: BatchId, promoted: BatchId },
    /// Drop the command
    Reject(RejectReason),
}

/// Why a command was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// No batch accepts commands in this state
    NotAccepting(ExecutorState),
    /// First command of the incoming batch was not STOP
    IncomingNotStop(BatchId),
    /// The incoming batch was already rejected
    IncomingIgnored(BatchId),
}

/// The executor state machine
#[derive(Debug)]
pub struct BatchStateMachine {
    state: ExecutorState,
    executing: Option<BatchId>,
    incoming: Option<BatchId>,
    /// FinishBatch arrived for the incoming batch before any of its commands
    incoming_closed: bool,
}

impl Default for BatchStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchStateMachine {
    /// Create a new state machine in Idle state
    pub fn new() -> Self {
        Self {
            state: ExecutorState::Idle,
            executing: None,
            incoming: None,
            incoming_closed: false,
        }
    }

    /// Get current state
    pub fn state(&self) -> ExecutorState {
        self.state
    }

    /// Currently executing batch
    pub fn executing(&self) -> Option<BatchId> {
        self.executing
    }

    /// Batch received behind the executing one
    pub fn incoming(&self) -> Option<BatchId> {
        self.incoming
    }

    /// Whether the executing batch may still receive commands
    pub fn is_accepting(&self) -> bool {
        self.state == ExecutorState::Executing
    }

    /// Process a batch header
    pub fn start_batch(&mut self, batch_id: BatchId) -> StartOutcome {
        match (self.state, self.executing) {
            (ExecutorState::Idle, _) | (_, None) => {
                self.state = ExecutorState::Executing;
                self.executing = Some(batch_id);
                self.incoming = None;
                self.incoming_closed = false;
                StartOutcome::Started(batch_id)
            }
            (_, Some(executing)) => {
                self.state = ExecutorState::CollectingIncomingFirst;
                self.incoming = Some(batch_id);
                self.incoming_closed = false;
                StartOutcome::Incoming {
                    executing,
                    incoming: batch_id,
                }
            }
        }
    }

    /// Process a command line
    pub fn enqueue(&mut self, command: &CommandSpec) -> EnqueueDecision {
        use ExecutorState::*;

        match (self.state, self.executing, self.incoming) {
            (Executing, Some(executing), _) => EnqueueDecision::Accept(executing),

            (CollectingIncomingFirst, Some(executing), Some(incoming)) => {
                if command.is(PREEMPT_COMMAND) {
                    self.state = Executing;
                    self.executing = Some(incoming);
                    self.incoming = None;
                    self.incoming_closed = false;
                    EnqueueDecision::Preempt {
                        preempted: executing,
                        promoted: incoming,
                    }
                } else {
                    self.state = IncomingIgnoring;
                    EnqueueDecision::Reject(RejectReason::IncomingNotStop(incoming))
                }
            }

            (IncomingIgnoring, _, Some(incoming)) => {
                EnqueueDecision::Reject(RejectReason::IncomingIgnored(incoming))
            }

            (state, _, _) => EnqueueDecision::Reject(RejectReason::NotAccepting(state)),
        }
    }

    /// Process the end of a batch's stream
    ///
    /// Returns true if the executing batch moved to FinishCalled
    pub fn finish_batch(&mut self) -> bool {
        match self.state {
            ExecutorState::Executing => {
                self.state = ExecutorState::FinishCalled;
                true
            }
            ExecutorState::CollectingIncomingFirst => {
                self.incoming_closed = true;
                false
            }
            _ => false,
        }
    }

    /// Retire the executing batch after the worker finalized it
    ///
    /// An incoming batch that has not sent a command yet is promoted and its
    /// id returned; otherwise the machine goes back to Idle.
    pub fn finalize(&mut self) -> Option<BatchId> {
        self.executing = None;
        let incoming = self.incoming.take();
        let closed = std::mem::take(&mut self.incoming_closed);

        match (self.state, incoming) {
            (ExecutorState::CollectingIncomingFirst, Some(promoted)) => {
                self.executing = Some(promoted);
                self.state = if closed {
                    ExecutorState::FinishCalled
                } else {
                    ExecutorState::Executing
                };
                Some(promoted)
            }
            _ => {
                self.state = ExecutorState::Idle;
                None
            }
        }
    }
}
