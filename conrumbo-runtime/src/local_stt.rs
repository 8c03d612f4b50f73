use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use conrumbo_core::recognizer::RECOGNIZER_LOCAL;
use conrumbo_engine::traits::{AudioInput, SpeechRecognizer, Transcript};

/// On-device transcription through whisper.cpp. Compiled in behind the
/// `local-stt` feature; the model stays loaded after the first utterance.
#[derive(Clone)]
pub struct LocalWhisperRecognizer {
    model_path: PathBuf,
    ctx: Arc<Mutex<Option<Arc<WhisperContext>>>>,
}

impl LocalWhisperRecognizer {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            ctx: Arc::new(Mutex::new(None)),
        }
    }

    fn get_or_load_context(&self) -> anyhow::Result<Arc<WhisperContext>> {
        let mut guard = self.ctx.lock().unwrap();
        if let Some(ctx) = guard.as_ref() {
            return Ok(ctx.clone());
        }

        if !self.model_path.exists() {
            return Err(anyhow::anyhow!(
                "local whisper model does not exist: {}",
                self.model_path.display()
            ));
        }

        // whisper.cpp expects legacy GGML `.bin` models; a GGUF file loads
        // far enough to produce a confusing crash, so reject it up front.
        if has_gguf_magic(&self.model_path).unwrap_or(false) {
            return Err(anyhow::anyhow!(
                "local whisper model is GGUF (.gguf), but the local engine requires whisper.cpp GGML (.bin) models: {}",
                self.model_path.display()
            ));
        }

        let ctx = WhisperContext::new_with_params(
            self.model_path
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("invalid model path"))?,
            WhisperContextParameters::default(),
        )
        .map_err(|e| anyhow::anyhow!("failed to load whisper model: {e}"))?;

        let ctx = Arc::new(ctx);
        *guard = Some(ctx.clone());
        Ok(ctx)
    }

    fn transcribe_blocking(&self, audio: &AudioInput, language: &str) -> anyhow::Result<String> {
        if audio.sample_rate_hz != 16_000 {
            return Err(anyhow::anyhow!(
                "unsupported sample rate {} (expected 16000)",
                audio.sample_rate_hz
            ));
        }

        let ctx = self.get_or_load_context()?;
        let mut state = ctx
            .create_state()
            .map_err(|e| anyhow::anyhow!("failed to create whisper state: {e}"))?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });

        // Whisper takes a bare ISO 639-1 code, not a BCP 47 tag.
        let primary = language.split('-').next().unwrap_or_default();
        if !primary.is_empty() && primary != "auto" {
            params.set_language(Some(primary));
        }

        // Keep console output disabled.
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        state
            .full(params, &audio.samples)
            .map_err(|e| anyhow::anyhow!("whisper inference failed: {e}"))?;

        let n = state.full_n_segments();
        let mut out = String::new();
        for i in 0..n {
            let seg = state.get_segment(i).ok_or_else(|| {
                anyhow::anyhow!("failed reading whisper segment {i}: out of bounds")
            })?;
            let text = seg
                .to_str_lossy()
                .map_err(|e| anyhow::anyhow!("failed reading whisper segment {i}: {e}"))?;
            out.push_str(text.trim());
            if i + 1 < n {
                out.push(' ');
            }
        }

        Ok(out.trim().to_string())
    }
}

#[async_trait::async_trait]
impl SpeechRecognizer for LocalWhisperRecognizer {
    async fn transcribe(&self, audio: &AudioInput, language: &str) -> anyhow::Result<Transcript> {
        let text = tokio::task::spawn_blocking({
            let this = self.clone();
            let audio = audio.clone();
            let language = language.to_string();
            move || this.transcribe_blocking(&audio, &language)
        })
        .await
        .map_err(|e| anyhow::anyhow!("whisper task join failed: {e}"))??;

        Ok(Transcript {
            text,
            recognizer: RECOGNIZER_LOCAL.into(),
        })
    }

    fn name(&self) -> &'static str {
        RECOGNIZER_LOCAL
    }
}

fn has_gguf_magic(path: &Path) -> std::io::Result<bool> {
    use std::io::Read;
    let mut magic = [0u8; 4];
    let mut file = std::fs::File::open(path)?;
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(&magic == b"GGUF"),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}
