//! Response Classifier
//!
//! Collapses the provider's heterogeneous response shapes into one
//! tagged outcome, and maps known refusal phrasings to fixed
//! user-facing messages.

use super::wire::GenerateContentResponse;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use once_cell::sync::Lazy;
use regex::Regex;

/// Provider-reported reason a generation did not proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefusalReason {
    Safety,
    ImageSafety,
    Recitation,
}

impl RefusalReason {
    fn from_finish_reason(reason: &str) -> Option<Self> {
        match reason {
            "SAFETY" => Some(RefusalReason::Safety),
            "IMAGE_SAFETY" => Some(RefusalReason::ImageSafety),
            "RECITATION" => Some(RefusalReason::Recitation),
            _ => None,
        }
    }

    /// Fixed user-facing message per refusal reason.
    pub fn user_message(&self) -> &'static str {
        match self {
            RefusalReason::Safety => {
                "The request was rejected by the safety system, please rephrase your prompt."
            }
            RefusalReason::ImageSafety => {
                "The generated image was rejected by the safety system, please adjust your prompt."
            }
            RefusalReason::Recitation => {
                "The prompt was flagged for recited or copied content, please rework it."
            }
        }
    }
}

/// One generated image with the text the provider emitted just before it.
#[derive(Debug, Clone)]
pub struct ImageReply {
    pub bytes: Vec<u8>,
    /// May be empty when no text preceded the image.
    pub caption: String,
}

/// Classified provider response.
#[derive(Debug)]
pub enum Outcome {
    Success {
        pairs: Vec<ImageReply>,
        final_text: Option<String>,
    },
    Refused(RefusalReason),
    Blocked { reason: String },
    Empty,
    Failed { reason: String },
}

/// Evaluate the response shape once, in the documented order: block
/// reason, refusal finish reasons, other non-STOP finish reasons, then
/// the part-pairing walk.
pub fn classify(response: GenerateContentResponse) -> Outcome {
    let Some(candidate) = response.candidates.into_iter().next() else {
        if let Some(reason) = response
            .prompt_feedback
            .and_then(|f| f.block_reason)
            .filter(|r| !r.is_empty())
        {
            tracing::warn!("[Classifier] Prompt blocked: {}", reason);
            return Outcome::Blocked { reason };
        }
        return Outcome::Empty;
    };

    if let Some(reason) = candidate.finish_reason.as_deref() {
        if let Some(refusal) = RefusalReason::from_finish_reason(reason) {
            tracing::warn!("[Classifier] Generation refused: {}", reason);
            return Outcome::Refused(refusal);
        }
        if !reason.is_empty() && reason != "STOP" {
            tracing::warn!("[Classifier] Generation failed with reason {}", reason);
            return Outcome::Failed {
                reason: reason.to_string(),
            };
        }
    }

    let parts = candidate
        .content
        .map(|content| content.parts)
        .unwrap_or_default();

    let mut pairs = Vec::new();
    let mut final_text: Option<String> = None;
    let mut current_text = String::new();

    for part in parts {
        if let Some(text) = part.text.as_deref() {
            let text = text.trim();
            if !text.is_empty() {
                current_text = text.to_string();
                final_text = Some(text.to_string());
            }
        }
        if let Some(inline) = part.inline_data {
            match BASE64.decode(inline.data.as_bytes()) {
                Ok(bytes) => {
                    pairs.push(ImageReply {
                        bytes,
                        caption: std::mem::take(&mut current_text),
                    });
                }
                Err(e) => {
                    tracing::warn!("[Classifier] Dropping undecodable image part: {}", e);
                }
            }
        }
    }

    if pairs.is_empty() && final_text.is_none() {
        return Outcome::Empty;
    }
    Outcome::Success { pairs, final_text }
}

/// Concatenated text of the first candidate, for text-only operations.
pub fn text_of(response: &GenerateContentResponse) -> Option<String> {
    let candidate = response.candidates.first()?;
    let parts = &candidate.content.as_ref()?.parts;
    let text: String = parts
        .iter()
        .filter_map(|p| p.text.as_deref())
        .collect::<Vec<_>>()
        .join("");
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

static UNABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)i'?\s?a?m unable to create").expect("refusal regex"));
static SEXUAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)sexually suggestive").expect("refusal regex"));
static HARMFUL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)harmful|dangerous").expect("refusal regex"));
static VIOLENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)violent").expect("refusal regex"));
static CANNOT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)can(?:not|'t) generate").expect("refusal regex"));
static POLICY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)content policy").expect("refusal regex"));

/// Map known provider refusal phrasings to fixed messages; anything
/// unrecognized passes through unchanged.
pub fn localize_refusal(text: &str) -> String {
    if text.contains("SAFETY") {
        return "Your request tripped the content safety policy, no image can be produced. \
                Please describe something safer."
            .to_string();
    }
    if UNABLE_RE.is_match(text) {
        if SEXUAL_RE.is_match(text) {
            return "Sorry, this image cannot be created: sexually suggestive content and \
                    harmful stereotypes are off limits. Please describe something else."
                .to_string();
        }
        if VIOLENT_RE.is_match(text) {
            return "Sorry, this image cannot be created: violent or graphic content is off \
                    limits. Please describe something else."
                .to_string();
        }
        if HARMFUL_RE.is_match(text) {
            return "Sorry, this image cannot be created: potentially harmful or dangerous \
                    content is off limits. Please describe something else."
                .to_string();
        }
        return "Sorry, this image cannot be created. Please adjust your description and try \
                again."
            .to_string();
    }
    if CANNOT_RE.is_match(text) {
        return "Sorry, an image matching that description cannot be generated. Please try a \
                different description."
            .to_string();
    }
    if POLICY_RE.is_match(text) {
        return "That request goes against the content policy, so no image was generated. \
                Please describe something else."
            .to_string();
    }
    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(body: serde_json::Value) -> GenerateContentResponse {
        serde_json::from_value(body).unwrap()
    }

    fn b64(bytes: &[u8]) -> String {
        BASE64.encode(bytes)
    }

    #[test]
    fn test_success_with_images_pairs_text_to_following_image() {
        let outcome = classify(response(json!({
            "candidates": [{
                "finishReason": "STOP",
                "content": {"parts": [
                    {"text": "first sketch"},
                    {"inlineData": {"mimeType": "image/png", "data": b64(b"img-a")}},
                    {"inlineData": {"mimeType": "image/png", "data": b64(b"img-b")}},
                    {"text": "closing words"}
                ]}
            }]
        })));

        match outcome {
            Outcome::Success { pairs, final_text } => {
                assert_eq!(pairs.len(), 2);
                assert_eq!(pairs[0].caption, "first sketch");
                assert_eq!(pairs[0].bytes, b"img-a");
                // The buffer was consumed by the first image.
                assert_eq!(pairs[1].caption, "");
                assert_eq!(final_text.as_deref(), Some("closing words"));
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[test]
    fn test_success_text_only() {
        let outcome = classify(response(json!({
            "candidates": [{
                "content": {"parts": [{"text": "just words"}]}
            }]
        })));

        match outcome {
            Outcome::Success { pairs, final_text } => {
                assert!(pairs.is_empty());
                assert_eq!(final_text.as_deref(), Some("just words"));
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[test]
    fn test_blocked_prompt() {
        let outcome = classify(response(json!({
            "promptFeedback": {"blockReason": "PROHIBITED_CONTENT"}
        })));
        match outcome {
            Outcome::Blocked { reason } => assert_eq!(reason, "PROHIBITED_CONTENT"),
            other => panic!("expected blocked, got {:?}", other),
        }
    }

    #[test]
    fn test_no_candidates_and_no_block_reason_is_empty() {
        assert!(matches!(classify(response(json!({}))), Outcome::Empty));
    }

    #[test]
    fn test_refusal_reasons() {
        for (reason, expected) in [
            ("SAFETY", RefusalReason::Safety),
            ("IMAGE_SAFETY", RefusalReason::ImageSafety),
            ("RECITATION", RefusalReason::Recitation),
        ] {
            let outcome = classify(response(json!({
                "candidates": [{"finishReason": reason}]
            })));
            match outcome {
                Outcome::Refused(r) => assert_eq!(r, expected),
                other => panic!("expected refusal for {}, got {:?}", reason, other),
            }
        }
        // Safety refusal messages name the safety policy.
        assert!(RefusalReason::Safety.user_message().contains("safety"));
    }

    #[test]
    fn test_other_finish_reason_is_failure() {
        let outcome = classify(response(json!({
            "candidates": [{"finishReason": "MAX_TOKENS"}]
        })));
        match outcome {
            Outcome::Failed { reason } => assert_eq!(reason, "MAX_TOKENS"),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_stop_with_no_parts_is_empty() {
        let outcome = classify(response(json!({
            "candidates": [{"finishReason": "STOP", "content": {"parts": []}}]
        })));
        assert!(matches!(outcome, Outcome::Empty));
    }

    #[test]
    fn test_text_of_concatenates_parts() {
        let resp = response(json!({
            "candidates": [{
                "content": {"parts": [{"text": "a "}, {"text": "b"}]}
            }]
        }));
        assert_eq!(text_of(&resp).as_deref(), Some("a b"));
    }

    #[test]
    fn test_localize_known_refusals() {
        let localized = localize_refusal(
            "I'm unable to create this image because it is sexually suggestive.",
        );
        assert!(localized.contains("sexually suggestive"));

        let localized = localize_refusal("I'm unable to create violent imagery.");
        assert!(localized.contains("violent"));

        let localized = localize_refusal("This could be harmful, I'm unable to create it.");
        assert!(localized.contains("harmful"));

        let localized = localize_refusal("I cannot generate that image.");
        assert!(localized.contains("cannot be generated"));

        let localized = localize_refusal("That is against our content policy.");
        assert!(localized.contains("content policy"));

        let localized = localize_refusal("finishReason: SAFETY");
        assert!(localized.contains("safety"));
    }

    #[test]
    fn test_localize_passes_unknown_text_through() {
        let text = "Here is a perfectly normal reply.";
        assert_eq!(localize_refusal(text), text);
    }
}
