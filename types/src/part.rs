//! Content parts on the internal (upstream-shaped) wire.
//!
//! `Part` is a sum type over the shapes the upstream accepts inside a
//! `contents[].parts[]` array. Serialization is untagged: each variant has a
//! distinguishing key (`functionCall`, `functionResponse`, `inlineData`) or,
//! for thinking text, the required `thought` flag, so round-trips are
//! unambiguous. Variant order matters for deserialization - `Thought` must be
//! tried before `Text` so a `{"text": …, "thought": true}` part does not
//! collapse into plain text.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Conversation role on the internal wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

/// A function invocation emitted by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// The client-supplied result for a prior function call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub name: String,
    pub response: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Base64-encoded binary content (images).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blob {
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub data: String,
}

/// One part of a content entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    FunctionCall {
        #[serde(rename = "functionCall")]
        call: FunctionCall,
        /// Signature attached to the call itself (the upstream places it
        /// next to `functionCall`, not inside it).
        #[serde(
            rename = "thoughtSignature",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        thought_signature: Option<String>,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        response: FunctionResponse,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: Blob,
    },
    Thought {
        text: String,
        thought: bool,
        #[serde(
            rename = "thoughtSignature",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        signature: Option<String>,
    },
    Text {
        text: String,
    },
}

impl Part {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    #[must_use]
    pub fn thought(text: impl Into<String>, signature: Option<String>) -> Self {
        Part::Thought {
            text: text.into(),
            thought: true,
            signature,
        }
    }

    #[must_use]
    pub fn function_call(name: impl Into<String>, args: Value, id: Option<String>) -> Self {
        Part::FunctionCall {
            call: FunctionCall {
                name: name.into(),
                args,
                id,
            },
            thought_signature: None,
        }
    }

    #[must_use]
    pub fn function_response(name: impl Into<String>, response: Value, id: Option<String>) -> Self {
        Part::FunctionResponse {
            response: FunctionResponse {
                name: name.into(),
                response,
                id,
            },
        }
    }

    #[must_use]
    pub fn inline_data(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Part::InlineData {
            inline_data: Blob {
                mime_type: mime_type.into(),
                data: data.into(),
            },
        }
    }

    #[must_use]
    pub const fn is_thought(&self) -> bool {
        matches!(self, Part::Thought { .. })
    }

    #[must_use]
    pub const fn is_function_call(&self) -> bool {
        matches!(self, Part::FunctionCall { .. })
    }

    #[must_use]
    pub const fn is_function_response(&self) -> bool {
        matches!(self, Part::FunctionResponse { .. })
    }

    /// Plain (non-thinking) text, if this part carries any.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Thinking text, if this part is a thought.
    #[must_use]
    pub fn as_thought(&self) -> Option<(&str, Option<&str>)> {
        match self {
            Part::Thought {
                text, signature, ..
            } => Some((text, signature.as_deref())),
            _ => None,
        }
    }
}

/// One turn of the conversation on the internal wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub role: Role,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    #[must_use]
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self { role, parts }
    }

    #[must_use]
    pub fn user(parts: Vec<Part>) -> Self {
        Self::new(Role::User, parts)
    }

    #[must_use]
    pub fn model(parts: Vec<Part>) -> Self {
        Self::new(Role::Model, parts)
    }

    #[must_use]
    pub fn has_thought(&self) -> bool {
        self.parts.iter().any(Part::is_thought)
    }

    #[must_use]
    pub fn has_function_call(&self) -> bool {
        self.parts.iter().any(Part::is_function_call)
    }

    #[must_use]
    pub fn has_function_response(&self) -> bool {
        self.parts.iter().any(Part::is_function_response)
    }

    /// Reorder parts so every thought precedes all non-thought parts,
    /// preserving relative order within each group. The upstream rejects
    /// model turns where thinking appears after other content.
    pub fn thoughts_first(&mut self) {
        if !self.has_thought() {
            return;
        }
        let parts = std::mem::take(&mut self.parts);
        let (thoughts, rest): (Vec<_>, Vec<_>) = parts.into_iter().partition(Part::is_thought);
        self.parts = thoughts;
        self.parts.extend(rest);
    }
}
