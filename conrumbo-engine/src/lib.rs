pub mod controller;
pub mod events;
pub mod traits;

pub use controller::{
    CALL_HIGHLIGHT_DURATION, ControllerDeps, ControllerOptions, InteractionController,
    MAX_SILENCE_RETRIES, STEP_LOG_CAPACITY,
};
pub use events::ControllerEvent;
pub use traits::{AudioInput, GuideService, MicSource, Speaker, SpeechRecognizer, Transcript};
