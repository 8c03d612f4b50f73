use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use conrumbo_audio::AudioPlayer;
use conrumbo_backend::api_base::{DEFAULT_API_BASE, normalize_api_base};
use conrumbo_backend::endpoints::{
    build_call_request, build_feedback_request, build_health_request, build_save_config_request,
};
use conrumbo_backend::parse::{
    NextStepResponse, ProtocolDocument, UnderstandResponse, parse_ack, parse_health,
};
use conrumbo_backend::runtime::{ensure_success, execute};
use conrumbo_core::config::AppConfig;
use conrumbo_core::messages::MSG_GREETING;
use conrumbo_core::recognizer::{clamp_capture_window_ms, normalize_recognizer};
use conrumbo_core::types::{PhoneNumber, ProtocolId, SessionId};
use conrumbo_engine::controller::{
    CALL_HIGHLIGHT_DURATION, ControllerDeps, ControllerOptions, InteractionController,
};
use conrumbo_engine::events::ControllerEvent;
use conrumbo_engine::traits::{MicSource, Speaker, SpeechRecognizer};
use conrumbo_runtime::config_store::ConfigStore;
use conrumbo_runtime::guide::GuideClient;
use conrumbo_runtime::mic::CpalMicSource;
use conrumbo_runtime::router::RecognizerRouter;
use conrumbo_runtime::server_stt::ServerRecognizer;
use conrumbo_runtime::speaker::ServerTtsSpeaker;
use tokio::sync::mpsc;

/// What `place_call` hands the UI: the number to dial plus whether the
/// backend managed to log the attempt.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub number: PhoneNumber,
    pub dial_uri: String,
    pub logged: bool,
}

/// Application facade: owns the persisted config, the backend session, and
/// the assembly of a hands-free controller from real devices.
#[derive(Clone)]
pub struct AppService {
    config: AppConfig,
    config_store: ConfigStore,
    guide: Arc<GuideClient>,
}

impl AppService {
    /// Load config from `path`, repairing anything out of range. A broken
    /// or missing file must still produce a working service.
    pub fn at_config_path(path: impl Into<PathBuf>) -> Self {
        let config_store = ConfigStore::at_path(path);
        let mut config = config_store.load_or_default();

        match normalize_api_base(&config.api_base) {
            Ok(base) => config.api_base = base,
            Err(e) => {
                log::warn!(
                    "invalid api base {:?}, using default: {e:#}",
                    config.api_base
                );
                config.api_base = DEFAULT_API_BASE.to_string();
            }
        }
        config.capture_window_ms = clamp_capture_window_ms(config.capture_window_ms);
        config.recognizer = normalize_recognizer(&config.recognizer).to_string();

        let guide = Arc::new(GuideClient::new(config.api_base.clone()));
        Self {
            config,
            config_store,
            guide,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn session(&self) -> &SessionId {
        self.guide.session()
    }

    /// Apply per-run overrides on top of the stored config. Nothing is
    /// written back; `save_config` is the persistent path.
    pub fn apply_overrides(
        &mut self,
        api_base: Option<&str>,
        language: Option<&str>,
        recognizer: Option<&str>,
    ) -> anyhow::Result<()> {
        let mut cfg = self.config.clone();
        if let Some(base) = api_base {
            cfg.api_base = normalize_api_base(base)?;
        }
        if let Some(language) = language {
            cfg.language = language.trim().to_string();
        }
        if let Some(recognizer) = recognizer {
            cfg.recognizer = normalize_recognizer(recognizer).to_string();
        }

        if cfg.api_base != self.config.api_base {
            self.guide = Arc::new(GuideClient::new(cfg.api_base.clone()));
        }
        self.config = cfg;
        Ok(())
    }

    pub async fn health_check(&self) -> bool {
        let req = build_health_request(&self.config.api_base);
        match execute(&req).await {
            Ok(resp) if resp.is_success() => parse_health(&resp.body).unwrap_or(false),
            Ok(resp) => {
                log::warn!("health check failed: status={}", resp.status);
                false
            }
            Err(e) => {
                log::warn!("health check failed: {e:#}");
                false
            }
        }
    }

    pub async fn understand(&self, text: &str) -> anyhow::Result<UnderstandResponse> {
        self.guide.understand(text).await
    }

    pub async fn next_step(
        &self,
        context: Option<&serde_json::Value>,
        intent: Option<&str>,
    ) -> anyhow::Result<NextStepResponse> {
        self.guide.next_step(context, intent).await
    }

    pub async fn protocol(&self, protocol_id: &ProtocolId) -> anyhow::Result<ProtocolDocument> {
        self.guide.protocol(protocol_id).await
    }

    /// Resolve the number to dial. The backend log entry is best effort;
    /// a dead backend must never stand between the user and the call.
    pub async fn place_call(&self, test: bool) -> CallOutcome {
        let number = PhoneNumber::new(if test {
            self.config.test_number.clone()
        } else {
            self.config.emergency_number.clone()
        });

        let req = build_call_request(&self.config.api_base, &number, self.session());
        let logged = match execute(&req).await {
            Ok(resp) if resp.is_success() => parse_ack(&resp.body).map(|a| a.ok).unwrap_or(true),
            Ok(resp) => {
                log::warn!("call logging failed: status={}", resp.status);
                false
            }
            Err(e) => {
                log::warn!("call logging failed: {e:#}");
                false
            }
        };

        CallOutcome {
            dial_uri: format!("tel:{}", number.as_str()),
            number,
            logged,
        }
    }

    pub async fn send_feedback(&self, notes: &str) -> anyhow::Result<()> {
        let req = build_feedback_request(&self.config.api_base, self.session(), notes);
        let resp = execute(&req).await?;
        ensure_success("feedback", &resp)?;
        let _ = parse_ack(&resp.body);
        Ok(())
    }

    /// Persist a new config locally, then mirror it to the backend. The
    /// mirror is diagnostics only; a failure there does not undo the save.
    pub async fn save_config(&mut self, mut cfg: AppConfig) -> anyhow::Result<AppConfig> {
        cfg.api_base = normalize_api_base(&cfg.api_base)?;
        cfg.capture_window_ms = clamp_capture_window_ms(cfg.capture_window_ms);
        cfg.recognizer = normalize_recognizer(&cfg.recognizer).to_string();

        self.config_store.save(&cfg)?;

        let req = build_save_config_request(&cfg.api_base, &cfg.api_base, &cfg.language);
        match execute(&req).await {
            Ok(resp) if resp.is_success() => {}
            Ok(resp) => log::warn!("backend config sync failed: status={}", resp.status),
            Err(e) => log::warn!("backend config sync failed: {e:#}"),
        }

        if cfg.api_base != self.config.api_base {
            self.guide = Arc::new(GuideClient::new(cfg.api_base.clone()));
        }
        self.config = cfg.clone();
        Ok(cfg)
    }

    /// Wire the hands-free controller to the real microphone, the shared
    /// audio output, and the configured recognizer.
    pub fn build_controller(
        &self,
    ) -> anyhow::Result<(
        InteractionController,
        mpsc::UnboundedReceiver<ControllerEvent>,
    )> {
        let player = Arc::new(AudioPlayer::open()?);

        let mic: Arc<dyn MicSource> = Arc::new(
            CpalMicSource::new(self.config.preferred_microphone.clone())
                .with_cues(player.clone()),
        );
        let speaker: Arc<dyn Speaker> =
            Arc::new(ServerTtsSpeaker::new(self.config.api_base.clone(), player));
        let recognizer = self.build_recognizer();

        let opts = ControllerOptions {
            language: self.config.language.clone(),
            capture_window: Duration::from_millis(self.config.capture_window_ms),
            greeting: Some(MSG_GREETING.to_string()),
            call_highlight: CALL_HIGHLIGHT_DURATION,
        };

        Ok(InteractionController::new(
            ControllerDeps {
                mic,
                recognizer,
                speaker,
                guide: self.guide.clone(),
            },
            opts,
        ))
    }

    fn build_recognizer(&self) -> Arc<dyn SpeechRecognizer> {
        #[cfg_attr(not(feature = "local-stt"), allow(unused_mut))]
        let mut router = RecognizerRouter::new(&self.config.recognizer)
            .with_server(Arc::new(ServerRecognizer::new(self.config.api_base.clone())));

        #[cfg(feature = "local-stt")]
        if let Some(path) = &self.config.local_model_path {
            router = router.with_local(Arc::new(
                conrumbo_runtime::local_stt::LocalWhisperRecognizer::new(path),
            ));
        }

        Arc::new(router)
    }
}
