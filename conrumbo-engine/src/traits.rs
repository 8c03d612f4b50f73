use std::time::Duration;

use conrumbo_core::types::GuideStep;

/// Mono PCM as handed to a recognizer.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioInput {
    pub sample_rate_hz: u32,
    pub samples: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub text: String,
    pub recognizer: String,
}

/// Microphone seam. The first `capture` (or an explicit `acquire`) doubles
/// as the permission request; `release` must drop the device handle so
/// nothing holds the microphone while the assistant is idle.
#[async_trait::async_trait]
pub trait MicSource: Send + Sync {
    async fn acquire(&self) -> anyhow::Result<()>;

    /// Record one bounded window of audio.
    async fn capture(&self, window: Duration) -> anyhow::Result<AudioInput>;

    async fn release(&self);
}

#[async_trait::async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn transcribe(&self, audio: &AudioInput, language: &str) -> anyhow::Result<Transcript>;

    fn name(&self) -> &'static str;
}

/// Spoken output seam.
#[async_trait::async_trait]
pub trait Speaker: Send + Sync {
    /// Speak and return once playback finished. Dropping the future must
    /// stop the audio.
    async fn speak(&self, text: &str, language: &str) -> anyhow::Result<()>;

    /// Cut any active speech immediately.
    fn stop(&self);

    /// Bounded readiness probe; a failure here must never block the
    /// interaction.
    async fn warm_up(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// The understanding seam: one utterance in, one instruction out.
#[async_trait::async_trait]
pub trait GuideService: Send + Sync {
    async fn guide(&self, query: &str, language: &str) -> anyhow::Result<GuideStep>;
}
