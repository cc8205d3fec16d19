//! Routing of raw model replies.
//!
//! The persona instruction tells the model to answer an image request with
//! `GENERATING_IMAGE: <prompt>` inline in its reply. Matching is an exact,
//! case-sensitive substring check with no escaping, so a reply that happens
//! to contain the literal marker is routed to the image branch as well.

pub const IMAGE_MARKER: &str = "GENERATING_IMAGE:";

/// Stored in place of an empty model reply; an empty assistant message is
/// never produced.
pub const EMPTY_REPLY_FALLBACK: &str = "Something went wrong, but I'm still the strongest.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyAction {
    /// Plain assistant text, ready to store and speak.
    Say(String),
    /// The model asked the client to run an image generation with this prompt.
    GenerateImage(String),
}

/// Decides the reply branch for a raw text result from the model.
///
/// Text before the marker is discarded; only the trimmed trailing segment
/// becomes the image prompt.
pub fn interpret_reply(raw: &str) -> ReplyAction {
    if let Some(idx) = raw.find(IMAGE_MARKER) {
        let prompt = raw[idx + IMAGE_MARKER.len()..].trim().to_string();
        return ReplyAction::GenerateImage(prompt);
    }
    if raw.is_empty() {
        return ReplyAction::Say(EMPTY_REPLY_FALLBACK.to_string());
    }
    ReplyAction::Say(raw.to_string())
}
