use anyhow::Context;
use conrumbo_core::messages::MSG_NO_MORE_INSTRUCTIONS;
use conrumbo_core::types::GuideStep;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    #[serde(default)]
    pub ok: bool,
}

pub fn parse_health(body: &[u8]) -> anyhow::Result<bool> {
    let resp: HealthResponse = serde_json::from_slice(body).context("decode health JSON")?;
    Ok(resp.ok)
}

/// Wire shape of `/guide`. Every field except the continuation flag is
/// optional; the backend omits what it has no value for.
#[derive(Debug, Clone, Deserialize)]
pub struct GuideReply {
    #[serde(default)]
    pub step: Option<u32>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub say: Option<String>,
    #[serde(default)]
    pub next: bool,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub total_steps: Option<u32>,
}

impl GuideReply {
    /// Collapse the wire shape into a renderable step. Display text falls
    /// back to the no-more-instructions notice; spoken text prefers `say`,
    /// then the raw display text, and stays empty when the backend sent
    /// neither (nothing gets spoken in that case).
    pub fn into_step(self) -> GuideStep {
        let raw_text = self.text.filter(|t| !t.trim().is_empty());
        let speech = self
            .say
            .filter(|s| !s.trim().is_empty())
            .or_else(|| raw_text.clone())
            .unwrap_or_default();
        let text = raw_text.unwrap_or_else(|| MSG_NO_MORE_INSTRUCTIONS.to_string());

        GuideStep {
            number: self.step,
            title: self.title.filter(|t| !t.trim().is_empty()),
            text,
            speech,
            total_steps: self.total_steps,
            continue_listening: self.next,
        }
    }
}

pub fn parse_guide_reply(body: &[u8]) -> anyhow::Result<GuideReply> {
    serde_json::from_slice(body).context("decode guide JSON")
}

#[derive(Debug, Deserialize)]
pub struct UnderstandResponse {
    pub intent: String,
    pub confidence: f64,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
    #[serde(default)]
    pub session_id: Option<String>,
}

pub fn parse_understand(body: &[u8]) -> anyhow::Result<UnderstandResponse> {
    serde_json::from_slice(body).context("decode understand JSON")
}

#[derive(Debug, Deserialize)]
pub struct NextStepResponse {
    pub step_text: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub total_steps: Option<u32>,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
    #[serde(default)]
    pub title: Option<String>,
}

pub fn parse_next_step(body: &[u8]) -> anyhow::Result<NextStepResponse> {
    serde_json::from_slice(body).context("decode next_step JSON")
}

#[derive(Debug, Deserialize)]
pub struct ProtocolDocument {
    #[serde(default)]
    pub protocol_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub steps: Vec<serde_json::Value>,
}

pub fn parse_protocol(body: &[u8]) -> anyhow::Result<ProtocolDocument> {
    serde_json::from_slice(body).context("decode protocol JSON")
}

/// Protocol steps come as plain strings or `{"text": ...}` objects depending
/// on how the document was authored.
pub fn protocol_step_text(step: &serde_json::Value) -> String {
    match step {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(map) => map
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    }
}

#[derive(Debug, Deserialize)]
struct SttResponse {
    text: String,
}

pub fn parse_stt_text(body: &[u8]) -> anyhow::Result<String> {
    let resp: SttResponse = serde_json::from_slice(body).context("decode stt JSON")?;
    Ok(resp.text)
}

#[derive(Debug, Deserialize)]
pub struct AckResponse {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub message: Option<String>,
}

pub fn parse_ack(body: &[u8]) -> anyhow::Result<AckResponse> {
    serde_json::from_slice(body).context("decode ack JSON")
}

/// Error payloads carry `{"error": message}`; anything else is surfaced raw.
pub fn error_detail(body: &[u8]) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: String,
    }
    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(e) => e.error,
        Err(_) => String::from_utf8_lossy(body).into_owned(),
    }
}
