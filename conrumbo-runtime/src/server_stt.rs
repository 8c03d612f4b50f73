use conrumbo_audio::encode_wav_mono_f32le;
use conrumbo_backend::endpoints::{AudioFile, build_stt_request};
use conrumbo_backend::parse::parse_stt_text;
use conrumbo_backend::runtime::{ensure_success, execute};
use conrumbo_core::recognizer::RECOGNIZER_SERVER;
use conrumbo_engine::traits::{AudioInput, SpeechRecognizer, Transcript};

/// Relays captured audio to the backend `/stt` endpoint. Works wherever the
/// backend does, which makes it the fallback for every device without an
/// on-device model.
#[derive(Debug, Clone)]
pub struct ServerRecognizer {
    api_base: String,
}

impl ServerRecognizer {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
        }
    }
}

#[async_trait::async_trait]
impl SpeechRecognizer for ServerRecognizer {
    async fn transcribe(&self, audio: &AudioInput, _language: &str) -> anyhow::Result<Transcript> {
        let wav = encode_wav_mono_f32le(&audio.samples, audio.sample_rate_hz);

        let req = build_stt_request(
            &self.api_base,
            &AudioFile {
                filename: "input.wav".into(),
                mime_type: "audio/wav".into(),
                bytes: wav,
            },
        );
        let resp = execute(&req).await?;
        ensure_success("stt", &resp)?;

        let text = parse_stt_text(&resp.body)?;
        Ok(Transcript {
            text,
            recognizer: RECOGNIZER_SERVER.into(),
        })
    }

    fn name(&self) -> &'static str {
        RECOGNIZER_SERVER
    }
}

#[derive(Debug, Clone)]
pub struct MockRecognizer {
    pub text: String,
}

#[async_trait::async_trait]
impl SpeechRecognizer for MockRecognizer {
    async fn transcribe(&self, _audio: &AudioInput, _language: &str) -> anyhow::Result<Transcript> {
        Ok(Transcript {
            text: self.text.clone(),
            recognizer: "mock".into(),
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn uploads_wav_and_decodes_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/stt"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{"text":"no reacciona"}"#,
                "application/json",
            ))
            .mount(&server)
            .await;

        let stt = ServerRecognizer::new(format!("{}/api", server.uri()));
        let audio = AudioInput {
            sample_rate_hz: 16_000,
            samples: vec![0.0; 320],
        };
        let t = stt.transcribe(&audio, "es-ES").await.unwrap();
        assert_eq!(t.text, "no reacciona");
        assert_eq!(t.recognizer, "server");

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let content_type = requests[0]
            .headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        assert!(content_type.starts_with("multipart/form-data"));
        assert!(
            requests[0].body.windows(4).any(|w| w == b"RIFF"),
            "upload must carry an encoded wav"
        );
    }

    #[tokio::test]
    async fn backend_failure_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/stt"))
            .respond_with(
                ResponseTemplate::new(500)
                    .set_body_raw(r#"{"error":"sin modelo de voz"}"#, "application/json"),
            )
            .mount(&server)
            .await;

        let stt = ServerRecognizer::new(format!("{}/api", server.uri()));
        let audio = AudioInput {
            sample_rate_hz: 16_000,
            samples: vec![0.0; 320],
        };
        let err = stt.transcribe(&audio, "es-ES").await.unwrap_err();
        assert!(err.to_string().contains("sin modelo de voz"));
    }
}
