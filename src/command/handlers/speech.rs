//! SAY handler
//!
//! Speech runs in the background so the robot can talk while it moves; the
//! batch only completes once the last utterance has been played.

use super::{Command, HandlerError};
use crate::body::TextPlayer;
use anyhow::anyhow;
use async_trait::async_trait;
use picar_shared::CommandOutcome;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct SayCommand {
    player: Arc<dyn TextPlayer>,
    pending: Mutex<Option<JoinHandle<anyhow::Result<()>>>>,
}

impl SayCommand {
    pub fn new(player: Arc<dyn TextPlayer>) -> Self {
        Self {
            player,
            pending: Mutex::new(None),
        }
    }

    /// Wait for the utterance in flight, if any
    ///
    /// Returns false if `cancel` fired first; the utterance is aborted then.
    async fn wait_pending(&self, cancel: &CancellationToken) -> Result<bool, HandlerError> {
        let Some(mut handle) = self.pending.lock().await.take() else {
            return Ok(true);
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("[SAY] Utterance aborted");
                handle.abort();
                Ok(false)
            }
            joined = &mut handle => match joined {
                Ok(played) => played.map(|_| true).map_err(HandlerError::from),
                Err(e) if e.is_cancelled() => Ok(true),
                Err(e) => Err(HandlerError::Actuator(anyhow!("Speech task failed: {}", e))),
            },
        }
    }
}

#[async_trait]
impl Command for SayCommand {
    fn name(&self) -> &str {
        "SAY"
    }

    async fn execute(
        &self,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<CommandOutcome, HandlerError> {
        if args.is_empty() {
            return Err(HandlerError::ArgumentCount {
                command: self.name().to_string(),
                expected: 1,
                got: 0,
            });
        }

        // A failed earlier utterance does not block this one
        match self.wait_pending(cancel).await {
            Ok(true) => {}
            Ok(false) => return Ok(CommandOutcome::Interrupted),
            Err(e) => warn!("[SAY] Previous utterance failed: {}", e),
        }

        // Playback belongs to the batch; it stops when the batch is cancelled
        let text = args.join(" ");
        let player = self.player.clone();
        let batch = cancel.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = batch.cancelled() => {
                    debug!("[SAY] Utterance cut off by batch cancellation");
                    Ok(())
                }
                played = player.play(&text) => played,
            }
        });
        *self.pending.lock().await = Some(handle);

        Ok(CommandOutcome::Ok)
    }

    async fn finish(&self, cancel: &CancellationToken) -> Result<(), HandlerError> {
        self.wait_pending(cancel).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::time::Instant;

    /// Records what was spoken and when playback ended
    struct RecordingPlayer {
        duration: Duration,
        spoken: StdMutex<Vec<(String, Instant)>>,
    }

    impl RecordingPlayer {
        fn new(duration: Duration) -> Arc<Self> {
            Arc::new(Self {
                duration,
                spoken: StdMutex::new(Vec::new()),
            })
        }

        fn spoken(&self) -> Vec<String> {
            self.spoken
                .lock()
                .unwrap()
                .iter()
                .map(|(text, _)| text.clone())
                .collect()
        }
    }

    #[async_trait]
    impl TextPlayer for RecordingPlayer {
        async fn play(&self, text: &str) -> anyhow::Result<()> {
            tokio::time::sleep(self.duration).await;
            self.spoken
                .lock()
                .unwrap()
                .push((text.to_string(), Instant::now()));
            Ok(())
        }
    }

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_say_returns_before_playback_ends() {
        let player = RecordingPlayer::new(Duration::from_secs(2));
        let say = SayCommand::new(player.clone());
        let cancel = CancellationToken::new();

        let started = Instant::now();
        let outcome = say.execute(&args(&["hello", "there"]), &cancel).await.unwrap();
        assert_eq!(outcome, CommandOutcome::Ok);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(player.spoken().is_empty());

        say.finish(&cancel).await.unwrap();
        assert_eq!(player.spoken(), vec!["hello there"]);
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_utterances_do_not_overlap() {
        let player = RecordingPlayer::new(Duration::from_secs(1));
        let say = SayCommand::new(player.clone());
        let cancel = CancellationToken::new();

        say.execute(&args(&["one"]), &cancel).await.unwrap();
        say.execute(&args(&["two"]), &cancel).await.unwrap();
        say.finish(&cancel).await.unwrap();

        let spoken = player.spoken.lock().unwrap().clone();
        assert_eq!(spoken.len(), 2);
        assert_eq!(spoken[0].0, "one");
        assert!(spoken[1].1 - spoken[0].1 >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_finish_aborts_playback() {
        let player = RecordingPlayer::new(Duration::from_secs(5));
        let say = SayCommand::new(player.clone());
        let cancel = CancellationToken::new();

        say.execute(&args(&["long", "speech"]), &cancel).await.unwrap();
        cancel.cancel();
        say.finish(&cancel).await.unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(player.spoken().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_batch_does_not_hold_next_utterance() {
        let player = RecordingPlayer::new(Duration::from_secs(5));
        let say = SayCommand::new(player.clone());

        // The old batch is cancelled without its finish ever running
        let old_batch = CancellationToken::new();
        say.execute(&args(&["old"]), &old_batch).await.unwrap();
        old_batch.cancel();

        let started = Instant::now();
        let new_batch = CancellationToken::new();
        say.execute(&args(&["new"]), &new_batch).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));

        say.finish(&new_batch).await.unwrap();
        assert_eq!(player.spoken(), vec!["new"]);
        assert!(started.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test]
    async fn test_say_needs_text() {
        let say = SayCommand::new(RecordingPlayer::new(Duration::ZERO));
        let err = say
            .execute(&[], &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.outcome(), CommandOutcome::ParseError);
    }
}
