//! Batch executor - queues, runs, preempts and reports command batches
//!
//! One background worker per executor runs every command. Control calls only
//! touch the state behind a single lock and wake the worker, so they never
//! block the parser.

use super::handlers::{Command, CommandRegistry};
use super::BatchControl;
use crate::body::RobotBody;
use crate::report::ResultReporter;
use futures::FutureExt;
use picar_shared::state_machine::{
    BatchStateMachine, EnqueueDecision, ExecutorState, RejectReason, StartOutcome,
};
use picar_shared::{BatchId, BatchResult, CommandOutcome, CommandSpec};
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Executor is shut down")]
    ShutDown,

    #[error("Executor worker failed: {0}")]
    Worker(#[from] JoinError),
}

/// State shared between the control surface and the worker
struct Shared {
    fsm: BatchStateMachine,
    queue: VecDeque<CommandSpec>,
    /// Signal of the executing batch; None while idle
    cancel: Option<CancellationToken>,
    /// Bumped on every preemption
    epoch: u64,
    shutting_down: bool,
}

struct Inner {
    shared: Mutex<Shared>,
    wake_tx: mpsc::Sender<()>,
    registry: CommandRegistry,
    body: Arc<dyn RobotBody>,
    reporter: Arc<dyn ResultReporter>,
    report_timeout: Duration,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock for a control call; fails once shutdown has begun
    fn open(&self) -> Result<MutexGuard<'_, Shared>, ExecutorError> {
        let shared = self.lock();
        if shared.shutting_down {
            return Err(ExecutorError::ShutDown);
        }
        Ok(shared)
    }

    fn wake(&self) {
        // A full slot means a wake is already pending
        let _ = self.wake_tx.try_send(());
    }
}

/// Executes command batches on a single background worker
pub struct BatchExecutor {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BatchExecutor {
    /// Create the executor and spawn its worker
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        registry: CommandRegistry,
        body: Arc<dyn RobotBody>,
        reporter: Arc<dyn ResultReporter>,
        report_timeout: Duration,
    ) -> Self {
        let (wake_tx, wake_rx) = mpsc::channel(1);
        let inner = Arc::new(Inner {
            shared: Mutex::new(Shared {
                fsm: BatchStateMachine::new(),
                queue: VecDeque::new(),
                cancel: None,
                epoch: 0,
                shutting_down: false,
            }),
            wake_tx,
            registry,
            body,
            reporter,
            report_timeout,
        });

        let worker = Worker {
            inner: inner.clone(),
            wake_rx,
            epoch: 0,
            started: Vec::new(),
            outcome: CommandOutcome::Ok,
        };
        let handle = tokio::spawn(worker.run());
        info!("[EXEC] Worker started");

        Self {
            inner,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Current executor state
    pub fn state(&self) -> ExecutorState {
        self.inner.lock().fsm.state()
    }

    /// Id of the executing batch, if any
    pub fn executing_batch(&self) -> Option<BatchId> {
        self.inner.lock().fsm.executing()
    }

    /// Commands waiting for the worker
    pub fn queued(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Stop the actuators and interrupt the executing batch
    ///
    /// The running command ends as interrupted and the batch reports a user
    /// stop. Works after shutdown as well.
    pub fn immediate_stop(&self) {
        let shared = self.inner.lock();
        warn!("[EXEC] Immediate stop requested");
        if let Err(e) = self.inner.body.stop() {
            error!("[EXEC] Failed to stop actuators: {:#}", e);
        }
        if let Some(cancel) = &shared.cancel {
            cancel.cancel();
        }
        drop(shared);
        self.inner.wake();
    }

    /// Stop accepting control calls, drain outstanding work and join the worker
    ///
    /// A batch that is still open is treated as finished.
    pub async fn shutdown(&self) -> Result<(), ExecutorError> {
        {
            let mut shared = self.inner.lock();
            shared.shutting_down = true;
            shared.fsm.finish_batch();
        }
        self.inner.wake();

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.await?;
            info!("[EXEC] Worker stopped");
        }
        Ok(())
    }
}

impl Drop for BatchExecutor {
    fn drop(&mut self) {
        let worker = self.worker.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = worker.take() {
            handle.abort();
        }
    }
}

impl BatchControl for BatchExecutor {
    fn start_batch(&self, batch_id: BatchId) -> Result<(), ExecutorError> {
        let mut shared = self.inner.open()?;
        match shared.fsm.start_batch(batch_id) {
            StartOutcome::Started(id) => {
                shared.cancel = Some(CancellationToken::new());
                info!("[EXEC] Batch {} executing", id);
            }
            StartOutcome::Incoming {
                executing,
                incoming,
            } => {
                info!(
                    "[EXEC] Batch {} arrived while batch {} executes",
                    incoming, executing
                );
            }
        }
        drop(shared);

        // The worker may be waiting on the previous batch's stream
        self.inner.wake();
        Ok(())
    }

    fn enqueue_command(&self, command: CommandSpec) -> Result<(), ExecutorError> {
        let mut shared = self.inner.open()?;
        match shared.fsm.enqueue(&command) {
            EnqueueDecision::Accept(batch_id) => {
                debug!("[EXEC] Batch {} queued {}", batch_id, command);
                shared.queue.push_back(command);
            }
            EnqueueDecision::Preempt {
                preempted,
                promoted,
            } => {
                warn!(
                    "[EXEC] STOP preempts batch {}, batch {} takes over",
                    preempted, promoted
                );
                if let Some(cancel) = shared.cancel.take() {
                    cancel.cancel();
                }
                if let Err(e) = self.inner.body.stop() {
                    error!("[EXEC] Failed to stop actuators: {:#}", e);
                }
                shared.cancel = Some(CancellationToken::new());
                shared.queue.clear();
                shared.epoch += 1;
            }
            EnqueueDecision::Reject(RejectReason::NotAccepting(state)) => {
                warn!("[EXEC] Dropping {}: no open batch ({})", command, state);
                return Ok(());
            }
            EnqueueDecision::Reject(RejectReason::IncomingNotStop(batch_id)) => {
                warn!(
                    "[EXEC] Batch {} did not open with STOP, ignoring it ({} dropped)",
                    batch_id, command
                );
                return Ok(());
            }
            EnqueueDecision::Reject(RejectReason::IncomingIgnored(batch_id)) => {
                debug!("[EXEC] Dropping {} for ignored batch {}", command, batch_id);
                return Ok(());
            }
        }
        drop(shared);

        self.inner.wake();
        Ok(())
    }

    fn finish_batch(&self) -> Result<(), ExecutorError> {
        let mut shared = self.inner.open()?;
        if shared.fsm.finish_batch() {
            debug!(
                "[EXEC] Batch {:?} stream finished",
                shared.fsm.executing()
            );
        }
        drop(shared);

        self.inner.wake();
        Ok(())
    }
}

/// What the worker does next
enum Step {
    Run {
        batch_id: BatchId,
        command: CommandSpec,
        cancel: CancellationToken,
    },
    Finalize {
        batch_id: BatchId,
        cancel: CancellationToken,
    },
    Wait,
    Exit,
}

/// The background worker; sole owner of the started-handler list
struct Worker {
    inner: Arc<Inner>,
    wake_rx: mpsc::Receiver<()>,
    /// Preemption epoch the bookkeeping below belongs to
    epoch: u64,
    /// Handlers started in the executing batch, in invocation order
    started: Vec<Arc<dyn Command>>,
    /// Running outcome of the executing batch
    outcome: CommandOutcome,
}

impl Worker {
    async fn run(mut self) {
        loop {
            match self.next_step() {
                Step::Run {
                    batch_id,
                    command,
                    cancel,
                } => self.run_command(batch_id, command, cancel).await,
                Step::Finalize { batch_id, cancel } => self.finalize(batch_id, cancel).await,
                Step::Wait => {
                    if self.wake_rx.recv().await.is_none() {
                        break;
                    }
                }
                Step::Exit => break,
            }
        }
    }

    fn next_step(&mut self) -> Step {
        let mut shared = self.inner.lock();

        if shared.epoch != self.epoch {
            // Preempted: the old batch's handlers are dropped without finish
            debug!(
                "[EXEC] Discarding {} started handler(s) of a preempted batch",
                self.started.len()
            );
            self.epoch = shared.epoch;
            self.started.clear();
            self.outcome = CommandOutcome::Ok;
        }

        let Some(batch_id) = shared.fsm.executing() else {
            shared.queue.clear();
            return if shared.shutting_down {
                Step::Exit
            } else {
                Step::Wait
            };
        };
        let cancel = shared
            .cancel
            .get_or_insert_with(CancellationToken::new)
            .clone();

        if self.outcome.is_ok() && cancel.is_cancelled() {
            self.outcome = CommandOutcome::Interrupted;
        }
        if !self.outcome.is_ok() {
            return Step::Finalize { batch_id, cancel };
        }
        if let Some(command) = shared.queue.pop_front() {
            return Step::Run {
                batch_id,
                command,
                cancel,
            };
        }
        if shared.fsm.state() != ExecutorState::Executing {
            return Step::Finalize { batch_id, cancel };
        }
        Step::Wait
    }

    async fn run_command(
        &mut self,
        batch_id: BatchId,
        spec: CommandSpec,
        cancel: CancellationToken,
    ) {
        let command = match self.inner.registry.resolve(&spec.name) {
            Ok(command) => command,
            Err(e) => {
                warn!("[EXEC] Batch {}: {}", batch_id, e);
                self.outcome = e.outcome();
                return;
            }
        };

        info!("[EXEC] Batch {} running {}", batch_id, spec);
        {
            // A preemption may have landed since the command was popped
            let shared = self.inner.lock();
            if shared.epoch != self.epoch || cancel.is_cancelled() {
                debug!("[EXEC] Batch {}: {} skipped, batch interrupted", batch_id, spec.name);
                self.outcome = CommandOutcome::Interrupted;
                return;
            }
        }
        self.started.push(command.clone());

        let run = AssertUnwindSafe(command.execute(&spec.args, &cancel)).catch_unwind();
        let outcome = tokio::select! {
            biased;
            result = run => match result {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    warn!("[EXEC] Batch {}: {} failed: {}", batch_id, spec.name, e);
                    e.outcome()
                }
                Err(_) => {
                    error!("[EXEC] Batch {}: {} panicked", batch_id, spec.name);
                    CommandOutcome::Failed
                }
            },
            _ = cancel.cancelled() => CommandOutcome::Interrupted,
        };

        if !outcome.is_ok() {
            info!("[EXEC] Batch {}: {} ended {:?}", batch_id, spec.name, outcome);
        }
        self.outcome = outcome;
    }

    async fn finalize(&mut self, batch_id: BatchId, cancel: CancellationToken) {
        for command in std::mem::take(&mut self.started) {
            let finished = AssertUnwindSafe(command.finish(&cancel))
                .catch_unwind()
                .await;
            match finished {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    "[EXEC] Batch {}: finishing {} failed: {}",
                    batch_id,
                    command.name(),
                    e
                ),
                Err(_) => error!(
                    "[EXEC] Batch {}: finishing {} panicked",
                    batch_id,
                    command.name()
                ),
            }
        }

        let outcome = std::mem::replace(&mut self.outcome, CommandOutcome::Ok);
        let result = BatchResult::from_outcome(batch_id, outcome);

        {
            let mut shared = self.inner.lock();
            if shared.epoch != self.epoch {
                debug!("[EXEC] Batch {} preempted while finishing, result dropped", batch_id);
                return;
            }
            if !outcome.is_ok() {
                cancel.cancel();
            }
            shared.queue.clear();
            shared.cancel = None;
            if let Some(promoted) = shared.fsm.finalize() {
                shared.cancel = Some(CancellationToken::new());
                info!("[EXEC] Batch {} executing", promoted);
            }
        }

        info!(
            "[EXEC] Batch {} finished: {} {}",
            batch_id, result.status, result.reason
        );
        self.report(result).await;
    }

    async fn report(&self, result: BatchResult) {
        let sent = tokio::time::timeout(
            self.inner.report_timeout,
            self.inner.reporter.send_result(result),
        )
        .await;

        match sent {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("[EXEC] Failed to report batch {}: {:#}", result.batch_id, e),
            Err(_) => warn!(
                "[EXEC] Reporting batch {} timed out after {:?}",
                result.batch_id, self.inner.report_timeout
            ),
        }
    }
}
