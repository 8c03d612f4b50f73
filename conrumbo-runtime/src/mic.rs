use std::sync::Arc;
use std::time::Duration;

use conrumbo_audio::playback::{BEEP_START_HZ, BEEP_STOP_HZ};
use conrumbo_audio::{AudioPlayer, AudioRecorder};
use conrumbo_engine::traits::{AudioInput, MicSource};

/// Real microphone behind the capture worker. The device opens on first use
/// and stays open across listen windows; `release` gives it back so nothing
/// holds the hardware while the assistant is idle.
pub struct CpalMicSource {
    recorder: tokio::sync::Mutex<Option<AudioRecorder>>,
    preferred_device: Option<String>,
    cues: Option<Arc<AudioPlayer>>,
}

impl CpalMicSource {
    pub fn new(preferred_device: Option<String>) -> Self {
        Self {
            recorder: tokio::sync::Mutex::new(None),
            preferred_device,
            cues: None,
        }
    }

    /// Play the start/stop tones through the shared output worker.
    pub fn with_cues(mut self, player: Arc<AudioPlayer>) -> Self {
        self.cues = Some(player);
        self
    }

    fn cue(&self, freq_hz: f32) {
        if let Some(player) = &self.cues {
            player.beep(freq_hz);
        }
    }

    async fn ensure_open(&self, slot: &mut Option<AudioRecorder>) -> anyhow::Result<()> {
        if slot.is_some() {
            return Ok(());
        }
        let device = self.preferred_device.clone();
        let recorder =
            tokio::task::spawn_blocking(move || AudioRecorder::open_named(device.as_deref()))
                .await
                .map_err(|e| anyhow::anyhow!("audio open join failed: {e}"))??;
        log::info!("microphone opened at {} Hz", recorder.sample_rate_hz());
        *slot = Some(recorder);
        self.cue(BEEP_START_HZ);
        Ok(())
    }
}

#[async_trait::async_trait]
impl MicSource for CpalMicSource {
    async fn acquire(&self) -> anyhow::Result<()> {
        let mut slot = self.recorder.lock().await;
        self.ensure_open(&mut slot).await
    }

    async fn capture(&self, window: Duration) -> anyhow::Result<AudioInput> {
        let mut slot = self.recorder.lock().await;
        self.ensure_open(&mut slot).await?;
        let recorder = match slot.as_ref() {
            Some(recorder) => recorder,
            None => anyhow::bail!("microphone not open"),
        };

        recorder.start()?;
        tokio::time::sleep(window).await;
        let captured = recorder.stop_captured()?;
        drop(slot);

        let samples = tokio::task::spawn_blocking(move || {
            AudioRecorder::resample_to_16k(&captured.samples, captured.sample_rate_hz)
        })
        .await
        .map_err(|e| anyhow::anyhow!("resample join failed: {e}"))??;

        Ok(AudioInput {
            sample_rate_hz: 16_000,
            samples,
        })
    }

    async fn release(&self) {
        let recorder = self.recorder.lock().await.take();
        if let Some(recorder) = recorder {
            match tokio::task::spawn_blocking(move || recorder.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::warn!("closing microphone failed: {e}"),
                Err(e) => log::warn!("close join failed: {e}"),
            }
            self.cue(BEEP_STOP_HZ);
        }
    }
}
