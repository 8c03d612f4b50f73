/// Utterances containing any of these trigger the call-control highlight.
/// Matching is a lowercase substring check, so "necesito una ambulancia" and
/// "AYUDA" both count.
pub const CALL_KEYWORDS: [&str; 6] = [
    "llamar",
    "emergencia",
    "112",
    "ambulancia",
    "ayuda",
    "socorro",
];

pub fn contains_call_keyword(text: &str) -> bool {
    let lowered = text.to_lowercase();
    CALL_KEYWORDS
        .iter()
        .any(|keyword| lowered.contains(keyword))
}

/// Collapse runs of whitespace and trim. Recognizers pad their output in
/// inconsistent ways; duplicate suppression compares normalized text.
pub fn normalize_utterance(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
