//! The internal request - the single representation every dialect
//! translates into before the upstream envelope is applied.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::part::{Content, Part};

/// Tool-calling mode the upstream enforces; the client never chooses it.
pub const VALIDATED_MODE: &str = "VALIDATED";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalRequest {
    pub contents: Vec<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<SystemInstruction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_config: Option<ToolConfig>,
    /// Stable fingerprint of the conversation; the signature cache and the
    /// upstream session affinity both key on it.
    pub session_id: String,
}

impl InternalRequest {
    #[must_use]
    pub fn new(contents: Vec<Content>, session_id: impl Into<String>) -> Self {
        Self {
            contents,
            system_instruction: None,
            generation_config: None,
            tools: None,
            tool_config: None,
            session_id: session_id.into(),
        }
    }

    /// Number of function declarations across all tools.
    #[must_use]
    pub fn declaration_count(&self) -> usize {
        self.tools
            .as_deref()
            .map(|tools| tools.iter().map(|t| t.function_declarations.len()).sum())
            .unwrap_or(0)
    }
}

/// System instruction block. The upstream requires `role: "user"` here
/// regardless of what the client sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInstruction {
    pub role: String,
    pub parts: Vec<Part>,
}

impl SystemInstruction {
    #[must_use]
    pub fn from_texts(texts: Vec<String>) -> Self {
        Self {
            role: "user".to_string(),
            parts: texts.into_iter().map(Part::text).collect(),
        }
    }

    /// Append one more text part.
    pub fn push_text(&mut self, text: impl Into<String>) {
        self.parts.push(Part::text(text));
    }

    /// Concatenated text of all parts, for marker checks.
    #[must_use]
    pub fn joined_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingConfig {
    #[serde(default)]
    pub include_thoughts: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_config: Option<ThinkingConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
    pub function_calling_config: FunctionCallingConfig,
}

impl ToolConfig {
    /// The only configuration the upstream accepts from this gateway.
    #[must_use]
    pub fn validated() -> Self {
        Self {
            function_calling_config: FunctionCallingConfig {
                mode: VALIDATED_MODE.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallingConfig {
    pub mode: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::part::Role;
    use serde_json::json;

    #[test]
    fn request_serializes_with_camel_case_keys() {
        let mut request = InternalRequest::new(
            vec![Content::new(Role::User, vec![Part::text("hi")])],
            "-12345",
        );
        request.system_instruction = Some(SystemInstruction::from_texts(vec!["sys".into()]));
        request.generation_config = Some(GenerationConfig {
            max_output_tokens: Some(1024),
            thinking_config: Some(ThinkingConfig {
                include_thoughts: true,
                thinking_budget: Some(8192),
            }),
            ..GenerationConfig::default()
        });
        request.tool_config = Some(ToolConfig::validated());

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["sessionId"], "-12345");
        assert_eq!(value["systemInstruction"]["role"], "user");
        assert_eq!(value["generationConfig"]["maxOutputTokens"], 1024);
        assert_eq!(
            value["generationConfig"]["thinkingConfig"]["thinkingBudget"],
            8192
        );
        assert_eq!(
            value["toolConfig"]["functionCallingConfig"]["mode"],
            "VALIDATED"
        );
    }

    #[test]
    fn declaration_count_sums_across_tools() {
        let mut request = InternalRequest::new(vec![], "-1");
        request.tools = Some(vec![
            Tool {
                function_declarations: vec![
                    FunctionDeclaration {
                        name: "a".into(),
                        description: None,
                        parameters: Some(json!({"type": "object"})),
                    },
                    FunctionDeclaration {
                        name: "b".into(),
                        description: None,
                        parameters: None,
                    },
                ],
            },
            Tool {
                function_declarations: vec![FunctionDeclaration {
                    name: "c".into(),
                    description: None,
                    parameters: None,
                }],
            },
        ]);
        assert_eq!(request.declaration_count(), 3);
    }
}
