use crate::request::{Body, HttpRequest};
use conrumbo_core::types::{PhoneNumber, ProtocolId, SessionId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFile {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

fn json_post(url: String, payload: serde_json::Value) -> HttpRequest {
    HttpRequest {
        method: "POST".into(),
        url,
        headers: vec![
            ("Content-Type".into(), "application/json".into()),
            ("Accept".into(), "application/json".into()),
        ],
        body: Body::Json(payload.to_string()),
    }
}

pub fn build_health_request(api_base: &str) -> HttpRequest {
    HttpRequest {
        method: "GET".into(),
        url: format!("{api_base}/health"),
        headers: vec![("Accept".into(), "application/json".into())],
        body: Body::Empty,
    }
}

/// The main conversational endpoint: one utterance in, one instruction out.
pub fn build_guide_request(
    api_base: &str,
    query: &str,
    lang: &str,
    session: &SessionId,
) -> HttpRequest {
    json_post(
        format!("{api_base}/guide"),
        serde_json::json!({
            "query": query,
            "lang": lang,
            "session_id": session.to_string(),
        }),
    )
}

pub fn build_understand_request(api_base: &str, text: &str, session: &SessionId) -> HttpRequest {
    json_post(
        format!("{api_base}/understand"),
        serde_json::json!({
            "text": text,
            "session_id": session.to_string(),
        }),
    )
}

pub fn build_next_step_request(
    api_base: &str,
    session: &SessionId,
    context: Option<&serde_json::Value>,
    intent: Option<&str>,
) -> HttpRequest {
    let mut payload = serde_json::json!({ "session_id": session.to_string() });
    if let Some(context) = context {
        payload["context"] = context.clone();
    }
    if let Some(intent) = intent {
        payload["intent"] = serde_json::Value::String(intent.to_string());
    }
    json_post(format!("{api_base}/next_step"), payload)
}

pub fn build_protocol_request(api_base: &str, protocol_id: &ProtocolId) -> HttpRequest {
    json_post(
        format!("{api_base}/protocol"),
        serde_json::json!({ "protocol_id": protocol_id.as_str() }),
    )
}

pub fn build_stt_request(api_base: &str, audio: &AudioFile) -> HttpRequest {
    let boundary = format!("Boundary-{}", uuid::Uuid::new_v4());

    let mut body: Vec<u8> = Vec::new();
    append_file(
        &mut body,
        &boundary,
        "audio",
        &audio.filename,
        &audio.mime_type,
        &audio.bytes,
    );
    body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());

    HttpRequest {
        method: "POST".into(),
        url: format!("{api_base}/stt"),
        headers: vec![
            (
                "Content-Type".into(),
                format!("multipart/form-data; boundary={}", boundary),
            ),
            ("Accept".into(), "application/json".into()),
        ],
        body: Body::MultipartFormData {
            boundary,
            bytes: body,
        },
    }
}

/// `/tts` streams encoded audio back; parameters travel in the query string.
pub fn build_tts_request(api_base: &str, text: &str, lang: &str) -> HttpRequest {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("text", text)
        .append_pair("lang", lang)
        .finish();
    HttpRequest {
        method: "GET".into(),
        url: format!("{api_base}/tts?{query}"),
        headers: vec![],
        body: Body::Empty,
    }
}

pub fn build_call_request(
    api_base: &str,
    number: &PhoneNumber,
    session: &SessionId,
) -> HttpRequest {
    json_post(
        format!("{api_base}/call"),
        serde_json::json!({
            "number": number.as_str(),
            "session_id": session.to_string(),
        }),
    )
}

pub fn build_save_config_request(api_base: &str, configured_base: &str, lang: &str) -> HttpRequest {
    json_post(
        format!("{api_base}/save-config"),
        serde_json::json!({
            "api_base": configured_base,
            "lang": lang,
        }),
    )
}

pub fn build_feedback_request(api_base: &str, session: &SessionId, notes: &str) -> HttpRequest {
    json_post(
        format!("{api_base}/feedback"),
        serde_json::json!({
            "session_id": session.to_string(),
            "notes": notes,
        }),
    )
}

fn append_file(
    body: &mut Vec<u8>,
    boundary: &str,
    name: &str,
    filename: &str,
    mime_type: &str,
    bytes: &[u8],
) {
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            name, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", mime_type).as_bytes());
    body.extend_from_slice(bytes);
    body.extend_from_slice(b"\r\n");
}
