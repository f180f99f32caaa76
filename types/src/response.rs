//! The internal response - one upstream chunk (streaming) or the full
//! upstream body (batch), already unwrapped from its envelope.

use serde::{Deserialize, Serialize};

use crate::part::{Content, Part};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct InternalResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<UsageMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

impl InternalResponse {
    /// Parts of the first candidate, in wire order.
    #[must_use]
    pub fn parts(&self) -> &[Part] {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| content.parts.as_slice())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.candidates.first().and_then(|c| c.finish_reason)
    }

    #[must_use]
    pub fn has_function_call(&self) -> bool {
        self.parts().iter().any(Part::is_function_call)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

/// Upstream finish reasons this gateway distinguishes; anything newer folds
/// into `Other` rather than failing the parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinishReason {
    Stop,
    MaxTokens,
    Safety,
    Recitation,
    FinishReasonUnspecified,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u32,
    #[serde(default)]
    pub candidates_token_count: u32,
    #[serde(default)]
    pub total_token_count: u32,
    #[serde(default)]
    pub thoughts_token_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_a_text_chunk() {
        let response: InternalResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Hello!"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2}
        }))
        .unwrap();

        assert_eq!(response.parts().len(), 1);
        assert_eq!(response.finish_reason(), Some(FinishReason::Stop));
        assert_eq!(response.usage_metadata.unwrap().prompt_token_count, 4);
    }

    #[test]
    fn unknown_finish_reason_folds_into_other() {
        let response: InternalResponse = serde_json::from_value(json!({
            "candidates": [{"finishReason": "SOME_FUTURE_REASON"}]
        }))
        .unwrap();
        assert_eq!(response.finish_reason(), Some(FinishReason::Other));
    }

    #[test]
    fn empty_response_has_no_parts() {
        let response = InternalResponse::default();
        assert!(response.parts().is_empty());
        assert!(!response.has_function_call());
    }

    #[test]
    fn detects_function_calls() {
        let response: InternalResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"functionCall": {"name": "search", "args": {"q": "rust"}}}
                ]}
            }]
        }))
        .unwrap();
        assert!(response.has_function_call());
    }
}
