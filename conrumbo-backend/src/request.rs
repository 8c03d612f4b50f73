use serde::{Deserialize, Serialize};

/// Transport-independent request description. Builders in `endpoints` fill
/// these in; `runtime::execute` turns them into real HTTP calls. Keeping the
/// two apart lets tests assert on exact request shapes without a server.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Body,
}

impl std::fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let headers: Vec<(String, String)> = self
            .headers
            .iter()
            .map(|(k, v)| {
                let sensitive = k.eq_ignore_ascii_case("authorization")
                    || k.to_ascii_lowercase().contains("api-key");
                let v = if sensitive { "[REDACTED]".into() } else { v.clone() };
                (k.clone(), v)
            })
            .collect();

        // Audio uploads carry megabytes; log a summary, never the payload.
        let body_summary = match &self.body {
            Body::Empty => "Empty".to_string(),
            Body::Json(s) => format!("Json(len={})", s.len()),
            Body::MultipartFormData { boundary, bytes } => {
                format!(
                    "MultipartFormData(boundary={}, bytes_len={})",
                    boundary,
                    bytes.len()
                )
            }
        };

        f.debug_struct("HttpRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &headers)
            .field("body", &body_summary)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Body {
    Empty,
    Json(String),
    MultipartFormData { boundary: String, bytes: Vec<u8> },
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let req = HttpRequest {
            method: "GET".into(),
            url: "http://127.0.0.1:8000/api/health".into(),
            headers: vec![("Content-Type".into(), "application/json".into())],
            body: Body::Empty,
        };
        assert_eq!(req.header("content-type"), Some("application/json"));
    }

    #[test]
    fn debug_summarizes_multipart_instead_of_dumping_bytes() {
        let req = HttpRequest {
            method: "POST".into(),
            url: "http://127.0.0.1:8000/api/stt".into(),
            headers: vec![],
            body: Body::MultipartFormData {
                boundary: "Boundary-x".into(),
                bytes: vec![0u8; 4096],
            },
        };
        let s = format!("{req:?}");
        assert!(s.contains("bytes_len=4096"));
        assert!(!s.contains("\\u{0}"));
    }

    #[test]
    fn debug_redacts_auth_headers() {
        let req = HttpRequest {
            method: "GET".into(),
            url: "http://127.0.0.1:8000/api/health".into(),
            headers: vec![("Authorization".into(), "Bearer abc".into())],
            body: Body::Empty,
        };
        let s = format!("{req:?}");
        assert!(!s.contains("abc"));
        assert!(s.contains("[REDACTED]"));
    }
}
