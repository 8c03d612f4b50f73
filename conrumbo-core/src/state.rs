use serde::{Deserialize, Serialize};

/// Where the assistant currently is in the listen-respond cycle. Exactly one
/// state holds at a time; capturing and speaking are mutually exclusive by
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssistantState {
    Idle,
    RequestingPermission,
    Capturing,
    Transcribing,
    Understanding,
    Speaking,
}

impl AssistantState {
    pub fn is_active(self) -> bool {
        self != AssistantState::Idle
    }
}

pub fn state_label(state: AssistantState) -> &'static str {
    match state {
        AssistantState::Idle => "idle",
        AssistantState::RequestingPermission => "requesting_permission",
        AssistantState::Capturing => "capturing",
        AssistantState::Transcribing => "transcribing",
        AssistantState::Understanding => "understanding",
        AssistantState::Speaking => "speaking",
    }
}
