use conrumbo_backend::api_base::DEFAULT_API_BASE;
use conrumbo_core::config::AppConfig;
use conrumbo_core::recognizer::RECOGNIZER_AUTO;

pub const DEFAULT_LANGUAGE: &str = "es-ES";
pub const DEFAULT_CAPTURE_WINDOW_MS: u64 = 5_000;
pub const DEFAULT_EMERGENCY_NUMBER: &str = "112";
pub const DEFAULT_TEST_NUMBER: &str = "689876686";

pub fn default_app_config() -> AppConfig {
    AppConfig {
        api_base: DEFAULT_API_BASE.to_string(),
        language: DEFAULT_LANGUAGE.to_string(),
        recognizer: RECOGNIZER_AUTO.to_string(),
        capture_window_ms: DEFAULT_CAPTURE_WINDOW_MS,
        emergency_number: DEFAULT_EMERGENCY_NUMBER.to_string(),
        test_number: DEFAULT_TEST_NUMBER.to_string(),
        preferred_microphone: None,
        local_model_path: None,
    }
}
