use std::sync::Arc;

use conrumbo_core::recognizer::{RECOGNIZER_LOCAL, RECOGNIZER_SERVER, normalize_recognizer};
use conrumbo_engine::traits::{AudioInput, SpeechRecognizer, Transcript};

/// Dispatches transcription to the engine picked in config.
///
/// Selections:
/// - "server" -> backend `/stt` relay
/// - "local"  -> on-device whisper (only when compiled in)
/// - "auto"   -> local when available, server otherwise
#[derive(Clone)]
pub struct RecognizerRouter {
    selection: &'static str,
    server: Option<Arc<dyn SpeechRecognizer>>,
    local: Option<Arc<dyn SpeechRecognizer>>,
}

impl RecognizerRouter {
    pub fn new(selection: &str) -> Self {
        Self {
            selection: normalize_recognizer(selection),
            server: None,
            local: None,
        }
    }

    pub fn with_server(mut self, recognizer: Arc<dyn SpeechRecognizer>) -> Self {
        self.server = Some(recognizer);
        self
    }

    pub fn with_local(mut self, recognizer: Arc<dyn SpeechRecognizer>) -> Self {
        self.local = Some(recognizer);
        self
    }

    fn pick(&self) -> anyhow::Result<Arc<dyn SpeechRecognizer>> {
        match self.selection {
            RECOGNIZER_SERVER => self.server.clone().ok_or_else(|| {
                anyhow::anyhow!("unsupported recognizer: server relay not configured")
            }),
            RECOGNIZER_LOCAL => self.local.clone().ok_or_else(|| {
                anyhow::anyhow!("unsupported recognizer: local engine not compiled in")
            }),
            _ => self
                .local
                .clone()
                .or_else(|| self.server.clone())
                .ok_or_else(|| anyhow::anyhow!("unsupported recognizer: nothing configured")),
        }
    }
}

#[async_trait::async_trait]
impl SpeechRecognizer for RecognizerRouter {
    async fn transcribe(&self, audio: &AudioInput, language: &str) -> anyhow::Result<Transcript> {
        let engine = self.pick()?;
        log::debug!("transcribing via {}", engine.name());
        engine.transcribe(audio, language).await
    }

    fn name(&self) -> &'static str {
        self.selection
    }
}
