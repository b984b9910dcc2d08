mod body;
mod command;
mod config;
mod parser;
mod report;

use anyhow::Context;
use body::{ConsolePlayer, SimulatedBody};
use clap::Parser;
use command::handlers::{ChassisProvider, CommandRegistry, SpeechProvider};
use command::BatchExecutor;
use config::PilotConfig;
use parser::ResponseParser;
use report::ChannelReporter;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};

use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Drive the robot from a streamed model response
#[derive(Parser, Debug)]
#[command(name = "picar-edge", version)]
struct Args {
    /// JSON configuration file (defaults when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Read the model stream from a file instead of stdin
    #[arg(long)]
    input: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing; stdout carries the result messages
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let config = PilotConfig::load(args.config.as_deref())?;
    info!("Edge pilot starting");
    debug!("  Config: {:?}", config);

    let body = Arc::new(SimulatedBody::new(config.simulation.front_distance_cm));
    let player = Arc::new(ConsolePlayer::new(config.simulation.speech_ms_per_word));

    let mut registry = CommandRegistry::new();
    registry.register_provider(&ChassisProvider::new(body.clone(), config.motion.clone()));
    registry.register_provider(&SpeechProvider::new(player));
    info!("  Commands: {}", registry.names().join(", "));

    let (reporter, mut results) = ChannelReporter::new(16);
    let executor = Arc::new(BatchExecutor::new(
        registry,
        body,
        Arc::new(reporter),
        config.report_timeout(),
    ));
    let mut parser = ResponseParser::new(executor.clone())?;

    // Relay results to the model client (stdout here)
    let relay = tokio::spawn(async move {
        while let Some(message) = results.recv().await {
            println!("{}\n", message);
        }
    });

    // Ctrl-C is the operator's out-of-band stop
    let stop_executor = executor.clone();
    let stop_task = tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            stop_executor.immediate_stop();
        }
    });

    let reader: Box<dyn AsyncRead + Unpin + Send> = match &args.input {
        Some(path) => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };
    stream_response(reader, &mut parser).await?;

    let continue_requested = parser.finish();
    executor.shutdown().await?;
    info!("Executor {}", executor.state());

    stop_task.abort();
    let _ = stop_task.await;
    drop(parser);
    drop(executor);
    relay.await?;

    if continue_requested {
        info!("Model asked to CONTINUE: re-prompt with fresh sensor state");
    }
    Ok(())
}

/// Feed raw chunks to the parser as they arrive
async fn stream_response(
    mut reader: Box<dyn AsyncRead + Unpin + Send>,
    parser: &mut ResponseParser,
) -> anyhow::Result<()> {
    let mut buf = [0u8; 512];
    let mut pending = Vec::new();

    loop {
        let n = reader
            .read(&mut buf)
            .await
            .context("Failed to read model stream")?;
        if n == 0 {
            break;
        }
        pending.extend_from_slice(&buf[..n]);

        let text = take_utf8(&mut pending);
        if !text.is_empty() {
            parser.add(&text);
        }
    }

    if !pending.is_empty() {
        warn!("Stream ended inside a UTF-8 sequence");
        parser.add(&String::from_utf8_lossy(&pending));
    }
    Ok(())
}

/// Take the decodable prefix of `pending`, keeping an incomplete trailing
/// sequence for the next read
fn take_utf8(pending: &mut Vec<u8>) -> String {
    let valid = match std::str::from_utf8(pending) {
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        _ => pending.len(),
    };
    let text = String::from_utf8_lossy(&pending[..valid]).into_owned();
    pending.drain(..valid);
    text
}
