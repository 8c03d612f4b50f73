use std::sync::Arc;
use std::time::Duration;

use conrumbo_audio::AudioPlayer;
use conrumbo_backend::endpoints::build_tts_request;
use conrumbo_backend::runtime::{ensure_success, execute};
use conrumbo_engine::traits::Speaker;

/// An instruction read at a calm pace can run long; only truly stuck
/// playback should trip this.
const SPEECH_WAIT_TIMEOUT: Duration = Duration::from_secs(120);

/// How long startup waits for the output side before carrying on without it.
const VOICE_READY_TIMEOUT: Duration = Duration::from_millis(1_500);

/// Speaks through the backend `/tts` endpoint: fetch the encoded clip, hand
/// it to the shared output worker, wait for the sink to drain.
pub struct ServerTtsSpeaker {
    api_base: String,
    player: Arc<AudioPlayer>,
}

impl ServerTtsSpeaker {
    pub fn new(api_base: impl Into<String>, player: Arc<AudioPlayer>) -> Self {
        Self {
            api_base: api_base.into(),
            player,
        }
    }
}

pub async fn fetch_tts_clip(api_base: &str, text: &str, lang: &str) -> anyhow::Result<Vec<u8>> {
    let req = build_tts_request(api_base, text, lang);
    let resp = execute(&req).await?;
    ensure_success("tts", &resp)?;
    if resp.body.is_empty() {
        anyhow::bail!("tts returned no audio");
    }
    Ok(resp.body)
}

/// Stops the clip if the owning future goes away before playback finished;
/// a superseded turn must not keep talking.
struct StopOnDrop {
    player: Arc<AudioPlayer>,
    armed: bool,
}

impl StopOnDrop {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.player.stop();
        }
    }
}

#[async_trait::async_trait]
impl Speaker for ServerTtsSpeaker {
    async fn speak(&self, text: &str, language: &str) -> anyhow::Result<()> {
        let bytes = fetch_tts_clip(&self.api_base, text, language).await?;

        let ticket = self.player.begin_encoded(bytes)?;
        let mut guard = StopOnDrop {
            player: self.player.clone(),
            armed: true,
        };

        let waited = tokio::task::spawn_blocking(move || ticket.wait(SPEECH_WAIT_TIMEOUT))
            .await
            .map_err(|e| anyhow::anyhow!("playback wait join failed: {e}"))?;
        guard.disarm();
        waited?;
        Ok(())
    }

    fn stop(&self) {
        self.player.stop();
    }

    async fn warm_up(&self) -> anyhow::Result<()> {
        let player = self.player.clone();
        match tokio::task::spawn_blocking(move || player.ping(VOICE_READY_TIMEOUT)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("voice output not ready, continuing without it: {e}"),
            Err(e) => log::warn!("voice probe join failed: {e}"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn fetches_encoded_clip() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tts"))
            .and(query_param("text", "Mantén la calma"))
            .and(query_param("lang", "es-ES"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(vec![1u8, 2, 3, 4], "audio/mpeg"),
            )
            .mount(&server)
            .await;

        let bytes = fetch_tts_clip(
            &format!("{}/api", server.uri()),
            "Mantén la calma",
            "es-ES",
        )
        .await
        .unwrap();
        assert_eq!(bytes, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn empty_clip_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tts"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let err = fetch_tts_clip(&format!("{}/api", server.uri()), "hola", "es-ES")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no audio"));
    }

    #[tokio::test]
    async fn backend_error_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tts"))
            .respond_with(
                ResponseTemplate::new(502)
                    .set_body_raw(r#"{"error":"motor de voz caido"}"#, "application/json"),
            )
            .mount(&server)
            .await;

        let err = fetch_tts_clip(&format!("{}/api", server.uri()), "hola", "es-ES")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("motor de voz caido"));
    }
}
