use conrumbo_backend::endpoints::{
    build_guide_request, build_next_step_request, build_protocol_request, build_understand_request,
};
use conrumbo_backend::parse::{
    NextStepResponse, ProtocolDocument, UnderstandResponse, parse_guide_reply, parse_next_step,
    parse_protocol, parse_understand,
};
use conrumbo_backend::runtime::{ensure_success, execute};
use conrumbo_core::types::{GuideStep, ProtocolId, SessionId};
use conrumbo_engine::traits::GuideService;

/// Conversational client for the guidance backend. One instance per process
/// session; the session id ties consecutive requests to the same dialogue
/// on the server side.
#[derive(Debug, Clone)]
pub struct GuideClient {
    api_base: String,
    session: SessionId,
}

impl GuideClient {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            session: SessionId::new(),
        }
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub async fn understand(&self, text: &str) -> anyhow::Result<UnderstandResponse> {
        let req = build_understand_request(&self.api_base, text, &self.session);
        let resp = execute(&req).await?;
        ensure_success("understand", &resp)?;
        parse_understand(&resp.body)
    }

    /// Advance a protocol walk. `context` is whatever the previous response
    /// handed back; it goes over the wire untouched.
    pub async fn next_step(
        &self,
        context: Option<&serde_json::Value>,
        intent: Option<&str>,
    ) -> anyhow::Result<NextStepResponse> {
        let req = build_next_step_request(&self.api_base, &self.session, context, intent);
        let resp = execute(&req).await?;
        ensure_success("next_step", &resp)?;
        parse_next_step(&resp.body)
    }

    pub async fn protocol(&self, protocol_id: &ProtocolId) -> anyhow::Result<ProtocolDocument> {
        let req = build_protocol_request(&self.api_base, protocol_id);
        let resp = execute(&req).await?;
        ensure_success("protocol", &resp)?;
        parse_protocol(&resp.body)
    }
}

#[async_trait::async_trait]
impl GuideService for GuideClient {
    async fn guide(&self, query: &str, language: &str) -> anyhow::Result<GuideStep> {
        let req = build_guide_request(&self.api_base, query, language, &self.session);
        let resp = execute(&req).await?;
        ensure_success("guide", &resp)?;
        Ok(parse_guide_reply(&resp.body)?.into_step())
    }
}
