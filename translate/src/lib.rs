//! Bidirectional translation between client dialects and the internal
//! (Gemini-shaped) protocol.
//!
//! Three dialects are spoken on the client side: OpenAI Chat Completions,
//! OpenAI Responses, and Anthropic Messages. Each dialect module implements
//! the same four operations - request in, batch response out, streaming
//! chunks out, stream finish - and owns a private stream-state type that the
//! orchestrator threads through explicitly. [`Translator`] is the registry
//! that resolves a dialect to its implementation; adding a dialect means
//! adding a module and a variant here.

pub mod anthropic;
pub mod normalize;
pub mod openai_chat;
pub mod openai_responses;
pub mod sanitize;
pub mod signature;

use serde_json::Value;
use slipstream_types::{InternalRequest, InternalResponse, ModelRegistry};

use crate::signature::SignatureCache;

/// A request body that failed to translate. Always a client fault; the
/// server renders it in the dialect's native error envelope.
#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("invalid request body: {0}")]
    InvalidBody(String),
    #[error("unsupported content: {0}")]
    Unsupported(String),
}

/// Everything a translator needs besides the body itself.
#[derive(Clone, Copy)]
pub struct TranslateOptions<'a> {
    pub registry: &'a ModelRegistry,
    pub cache: &'a SignatureCache,
}

/// Output of request translation.
#[derive(Debug, Clone)]
pub struct TranslatedRequest {
    pub request: InternalRequest,
    /// Canonical model id after route/alias resolution.
    pub model: String,
    /// Whatever the client called the model; echoed in responses only when
    /// no fallback rerouted the request.
    pub client_model: String,
    pub is_thinking: bool,
    pub thinking_budget: Option<i32>,
    pub stream: bool,
}

/// One server-sent-events frame on the way to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireFrame {
    /// SSE `event:` name; OpenAI chat frames carry data only.
    pub event: Option<&'static str>,
    /// SSE `data:` payload (JSON text, or the literal `[DONE]`).
    pub data: String,
}

impl WireFrame {
    #[must_use]
    pub fn data(value: &Value) -> Self {
        Self {
            event: None,
            data: value.to_string(),
        }
    }

    #[must_use]
    pub fn event(name: &'static str, value: &Value) -> Self {
        Self {
            event: Some(name),
            data: value.to_string(),
        }
    }

    /// The OpenAI stream terminator.
    #[must_use]
    pub fn done() -> Self {
        Self {
            event: None,
            data: "[DONE]".to_string(),
        }
    }
}

/// Client dialects this gateway speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    OpenAiChat,
    OpenAiResponses,
    Anthropic,
}

impl Dialect {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Dialect::OpenAiChat => "openai-chat",
            Dialect::OpenAiResponses => "openai-responses",
            Dialect::Anthropic => "anthropic",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "openai-chat" => Some(Dialect::OpenAiChat),
            "openai-responses" => Some(Dialect::OpenAiResponses),
            "anthropic" => Some(Dialect::Anthropic),
            _ => None,
        }
    }
}

/// Per-request stream state, variant-matched to the dialect that created it.
pub enum StreamState {
    OpenAiChat(openai_chat::ChatStreamState),
    OpenAiResponses(openai_responses::ResponsesStreamState),
    Anthropic(anthropic::MessagesStreamState),
}

/// Registry facade over the dialect modules.
#[derive(Debug, Clone, Copy)]
pub struct Translator {
    dialect: Dialect,
}

impl Translator {
    #[must_use]
    pub const fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    #[must_use]
    pub const fn dialect(self) -> Dialect {
        self.dialect
    }

    pub fn to_internal(
        self,
        body: &Value,
        opts: TranslateOptions<'_>,
    ) -> Result<TranslatedRequest, TranslateError> {
        match self.dialect {
            Dialect::OpenAiChat => openai_chat::to_internal(body, opts),
            Dialect::OpenAiResponses => openai_responses::to_internal(body, opts),
            Dialect::Anthropic => anthropic::to_internal(body, opts),
        }
    }

    /// Batch response translation. `model` is the id actually served (a
    /// fallback may have rerouted the request).
    #[must_use]
    pub fn from_internal(self, response: &InternalResponse, model: &str) -> Value {
        match self.dialect {
            Dialect::OpenAiChat => openai_chat::from_internal(response, model),
            Dialect::OpenAiResponses => openai_responses::from_internal(response, model),
            Dialect::Anthropic => anthropic::from_internal(response, model),
        }
    }

    #[must_use]
    pub fn new_stream_state(self, model: &str) -> StreamState {
        match self.dialect {
            Dialect::OpenAiChat => {
                StreamState::OpenAiChat(openai_chat::ChatStreamState::new(model))
            }
            Dialect::OpenAiResponses => {
                StreamState::OpenAiResponses(openai_responses::ResponsesStreamState::new(model))
            }
            Dialect::Anthropic => {
                StreamState::Anthropic(anthropic::MessagesStreamState::new(model))
            }
        }
    }

    /// Translate one upstream chunk into zero or more wire frames.
    #[must_use]
    pub fn stream_chunk(self, state: &mut StreamState, chunk: &InternalResponse) -> Vec<WireFrame> {
        match (self.dialect, state) {
            (Dialect::OpenAiChat, StreamState::OpenAiChat(state)) => {
                openai_chat::from_internal_stream(chunk, state)
            }
            (Dialect::OpenAiResponses, StreamState::OpenAiResponses(state)) => {
                openai_responses::from_internal_stream(chunk, state)
            }
            (Dialect::Anthropic, StreamState::Anthropic(state)) => {
                anthropic::from_internal_stream(chunk, state)
            }
            _ => Vec::new(),
        }
    }

    /// Close the stream: flush terminators for the dialect.
    #[must_use]
    pub fn finish_stream(self, state: &mut StreamState) -> Vec<WireFrame> {
        match (self.dialect, state) {
            (Dialect::OpenAiChat, StreamState::OpenAiChat(state)) => {
                openai_chat::finish_stream(state)
            }
            (Dialect::OpenAiResponses, StreamState::OpenAiResponses(state)) => {
                openai_responses::finish_stream(state)
            }
            (Dialect::Anthropic, StreamState::Anthropic(state)) => {
                anthropic::finish_stream(state)
            }
            _ => Vec::new(),
        }
    }

    /// A mid-stream failure after frames have been written; returns the
    /// dialect-appropriate error frames (Anthropic gets an `error` event,
    /// the OpenAI surfaces just close).
    #[must_use]
    pub fn error_frames(self, message: &str) -> Vec<WireFrame> {
        match self.dialect {
            Dialect::Anthropic => anthropic::error_frames(message),
            Dialect::OpenAiChat | Dialect::OpenAiResponses => vec![WireFrame::done()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialect_names_round_trip() {
        for dialect in [
            Dialect::OpenAiChat,
            Dialect::OpenAiResponses,
            Dialect::Anthropic,
        ] {
            assert_eq!(Dialect::from_name(dialect.as_str()), Some(dialect));
        }
        assert_eq!(Dialect::from_name("acp"), None);
    }

    #[test]
    fn wire_frame_done_is_the_literal() {
        assert_eq!(WireFrame::done().data, "[DONE]");
        assert!(WireFrame::done().event.is_none());
    }
}
