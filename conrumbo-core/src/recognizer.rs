// Small helpers/constants for interpreting recognizer selections in config.

pub const RECOGNIZER_AUTO: &str = "auto";
pub const RECOGNIZER_SERVER: &str = "server";
pub const RECOGNIZER_LOCAL: &str = "local";

pub fn is_known_recognizer(value: &str) -> bool {
    matches!(
        value,
        RECOGNIZER_AUTO | RECOGNIZER_SERVER | RECOGNIZER_LOCAL
    )
}

/// Accept user-provided selections case-insensitively; anything unknown
/// falls back to `auto` so a typo never disables voice input outright.
pub fn normalize_recognizer(value: &str) -> &'static str {
    match value.trim().to_ascii_lowercase().as_str() {
        RECOGNIZER_SERVER => RECOGNIZER_SERVER,
        RECOGNIZER_LOCAL => RECOGNIZER_LOCAL,
        _ => RECOGNIZER_AUTO,
    }
}

/// Keep the capture window inside sane bounds regardless of what config or
/// environment hands us.
pub fn clamp_capture_window_ms(ms: u64) -> u64 {
    ms.clamp(500, 30_000)
}
