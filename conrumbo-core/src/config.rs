use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Normalized backend base, always ending in `/api`.
    pub api_base: String,
    pub language: String,
    /// Recognizer selection: `auto`, `server`, or `local`.
    pub recognizer: String,
    /// Bounded recording duration per listen phase.
    pub capture_window_ms: u64,
    pub emergency_number: String,
    pub test_number: String,

    #[serde(default)]
    pub preferred_microphone: Option<String>,

    // Only meaningful when the on-device recognizer is compiled in.
    #[serde(default)]
    pub local_model_path: Option<String>,
}
