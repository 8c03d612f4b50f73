use anyhow::Context;
use url::Url;

pub const DEFAULT_API_BASE: &str = "http://127.0.0.1:8000/api";

/// Normalize a user-provided backend address into the API base every builder
/// expects: scheme added when missing, wildcard bind hosts mapped to
/// loopback, trailing slashes stripped, `/api` appended unless present.
///
/// People paste in whatever their server printed on startup
/// (`0.0.0.0:8000`), a LAN address, or a full HTTPS origin; all of these
/// should just work.
pub fn normalize_api_base(raw: &str) -> anyhow::Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(DEFAULT_API_BASE.to_string());
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };

    let mut url = Url::parse(&candidate)
        .with_context(|| format!("invalid backend address: {raw}"))?;

    match url.host_str() {
        Some("0.0.0.0") | Some("[::]") | Some("::") => {
            url.set_host(Some("127.0.0.1"))
                .context("rewrite wildcard host")?;
        }
        Some(_) => {}
        None => anyhow::bail!("backend address has no host: {raw}"),
    }

    url.set_query(None);
    url.set_fragment(None);

    let mut path = url.path().trim_end_matches('/').to_string();
    if !path.ends_with("/api") {
        path.push_str("/api");
    }
    url.set_path(&path);

    Ok(url.to_string().trim_end_matches('/').to_string())
}
