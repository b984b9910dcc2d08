//! Command handlers for the model's directives

mod camera;
mod motion;
mod speech;
mod stop;

pub use camera::CameraCommand;
pub use motion::{DriveCommand, TurnCommand};
pub use speech::SayCommand;
pub use stop::StopCommand;

use crate::body::{RobotBody, TextPlayer};
use crate::config::MotionConfig;
use async_trait::async_trait;
use picar_shared::CommandOutcome;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Errors raised while resolving or running a handler
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Unknown command {0}")]
    UnknownCommand(String),

    #[error("Command {command} expects {expected} argument(s), got {got}")]
    ArgumentCount {
        command: String,
        expected: usize,
        got: usize,
    },

    #[error("Command {command} argument {index} is invalid: {value:?}")]
    InvalidArgument {
        command: String,
        index: usize,
        value: String,
    },

    #[error("Actuator error: {0:#}")]
    Actuator(#[from] anyhow::Error),
}

impl HandlerError {
    /// Outcome reported for this error
    pub fn outcome(&self) -> CommandOutcome {
        match self {
            HandlerError::UnknownCommand(_)
            | HandlerError::ArgumentCount { .. }
            | HandlerError::InvalidArgument { .. } => CommandOutcome::ParseError,
            HandlerError::Actuator(_) => CommandOutcome::Failed,
        }
    }
}

/// A named capability the executor can run
///
/// `execute` must observe `cancel` promptly; `finish` runs once per batch for
/// every handler that was started in it.
#[async_trait]
pub trait Command: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<CommandOutcome, HandlerError>;

    async fn finish(&self, _cancel: &CancellationToken) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// A group of commands registered together
pub trait CommandProvider {
    fn commands(&self) -> Vec<Arc<dyn Command>>;
}

/// Name-keyed handler lookup, case-insensitive
#[derive(Default)]
pub struct CommandRegistry {
    commands: HashMap<String, Arc<dyn Command>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; the first handler registered under a name wins
    pub fn register(&mut self, command: Arc<dyn Command>) {
        let key = command.name().to_ascii_uppercase();
        if self.commands.contains_key(&key) {
            warn!("Duplicate handler for {}, keeping the first", key);
            return;
        }
        self.commands.insert(key, command);
    }

    pub fn register_provider(&mut self, provider: &dyn CommandProvider) {
        for command in provider.commands() {
            self.register(command);
        }
    }

    /// Look up a handler by name
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Command>, HandlerError> {
        self.commands
            .get(&name.to_ascii_uppercase())
            .cloned()
            .ok_or_else(|| HandlerError::UnknownCommand(name.to_string()))
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.commands.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Wheels, steering and camera commands
pub struct ChassisProvider {
    body: Arc<dyn RobotBody>,
    config: MotionConfig,
}

impl ChassisProvider {
    pub fn new(body: Arc<dyn RobotBody>, config: MotionConfig) -> Self {
        Self { body, config }
    }
}

impl CommandProvider for ChassisProvider {
    fn commands(&self) -> Vec<Arc<dyn Command>> {
        let body = &self.body;
        let config = &self.config;
        vec![
            Arc::new(DriveCommand::forward(body.clone(), config.clone())),
            Arc::new(DriveCommand::back(body.clone(), config.clone())),
            Arc::new(TurnCommand::left(body.clone(), config.clone())),
            Arc::new(TurnCommand::right(body.clone(), config.clone())),
            Arc::new(CameraCommand::new(body.clone(), config.clone())),
            Arc::new(StopCommand::new(body.clone())),
        ]
    }
}

/// Speech commands
pub struct SpeechProvider {
    player: Arc<dyn TextPlayer>,
}

impl SpeechProvider {
    pub fn new(player: Arc<dyn TextPlayer>) -> Self {
        Self { player }
    }
}

impl CommandProvider for SpeechProvider {
    fn commands(&self) -> Vec<Arc<dyn Command>> {
        vec![Arc::new(SayCommand::new(self.player.clone()))]
    }
}

/// Fail unless at least `expected` arguments are present
pub(crate) fn expect_args(
    command: &str,
    args: &[String],
    expected: usize,
) -> Result<(), HandlerError> {
    if args.len() < expected {
        return Err(HandlerError::ArgumentCount {
            command: command.to_string(),
            expected,
            got: args.len(),
        });
    }
    Ok(())
}

/// Parse the integer argument at `index`
pub(crate) fn int_arg(command: &str, args: &[String], index: usize) -> Result<i32, HandlerError> {
    let value = args.get(index).ok_or_else(|| HandlerError::ArgumentCount {
        command: command.to_string(),
        expected: index + 1,
        got: args.len(),
    })?;

    value.parse().map_err(|_| HandlerError::InvalidArgument {
        command: command.to_string(),
        index: index + 1,
        value: value.clone(),
    })
}
