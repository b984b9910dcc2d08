//! Speech output

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

/// Plays text aloud (text-to-speech + audio output)
#[async_trait]
pub trait TextPlayer: Send + Sync {
    /// Speak the text, returning once playback has finished
    async fn play(&self, text: &str) -> Result<()>;
}

/// Logs utterances and takes roughly as long as speaking them would
pub struct ConsolePlayer {
    ms_per_word: u64,
}

impl ConsolePlayer {
    pub fn new(ms_per_word: u64) -> Self {
        Self { ms_per_word }
    }
}

#[async_trait]
impl TextPlayer for ConsolePlayer {
    async fn play(&self, text: &str) -> Result<()> {
        info!("[SAY] {}", text);
        let words = text.split_whitespace().count() as u64;
        tokio::time::sleep(Duration::from_millis(words * self.ms_per_word)).await;
        Ok(())
    }
}
