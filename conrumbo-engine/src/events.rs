use std::time::Duration;

use conrumbo_core::state::AssistantState;
use conrumbo_core::types::GuideStep;

/// Everything the host UI needs to render the interaction. Emitted over an
/// unbounded channel; the controller never blocks on a slow consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    StateChanged {
        from: AssistantState,
        to: AssistantState,
    },
    /// User-facing status line, already localized.
    Status(String),
    FinalTranscript(String),
    StepReady(GuideStep),
    /// Call controls should be emphasized for this long.
    CallHighlight(Duration),
    /// The backend signaled there is nothing further to listen for.
    LoopEnded,
}
