pub mod config_store;
pub mod defaults;
pub mod guide;
#[cfg(feature = "local-stt")]
pub mod local_stt;
pub mod mic;
pub mod router;
pub mod server_stt;
pub mod speaker;

pub use config_store::ConfigStore;
pub use defaults::default_app_config;
pub use guide::GuideClient;
#[cfg(feature = "local-stt")]
pub use local_stt::LocalWhisperRecognizer;
pub use mic::CpalMicSource;
pub use router::RecognizerRouter;
pub use server_stt::{MockRecognizer, ServerRecognizer};
pub use speaker::ServerTtsSpeaker;
