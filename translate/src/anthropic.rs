//! Anthropic Messages dialect.
//!
//! Batch translation is symmetrical with the other dialects; streaming is
//! not. Anthropic clients expect a block-structured event stream
//! (`message_start`, `content_block_start/delta/stop`, `message_delta`,
//! `message_stop`), so [`MessagesStreamState`] runs a small state machine
//! over the flat upstream chunks: one open block at a time, closed whenever
//! the part kind changes, with tool-use blocks emitted whole and closed
//! immediately.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Value, json};
use slipstream_types::{
    Content, FinishReason, GenerationConfig, InternalRequest, InternalResponse, Part,
    SystemInstruction, ThinkingConfig, Tool, UsageMetadata,
};
use uuid::Uuid;

use crate::normalize;
use crate::signature::{SKIP_SIGNATURE_SENTINEL, is_valid_signature};
use crate::{TranslateError, TranslateOptions, TranslatedRequest, WireFrame};

// ============================================================================
// Request wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct MessagesRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    #[serde(default)]
    system: Option<AnthropicContent>,
    #[serde(default)]
    tools: Option<Vec<AnthropicTool>>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default)]
    top_p: Option<f64>,
    #[serde(default)]
    top_k: Option<i32>,
    #[serde(default)]
    stop_sequences: Option<Vec<String>>,
    #[serde(default)]
    stream: bool,
    #[serde(default)]
    thinking: Option<ThinkingOption>,
}

#[derive(Debug, Deserialize)]
struct ThinkingOption {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    budget_tokens: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: AnthropicContent,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<AnthropicBlock>),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
        #[serde(default)]
        signature: Option<String>,
    },
    RedactedThinking {
        #[allow(dead_code)]
        data: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Option<ToolResultContent>,
    },
    Image {
        source: ImageSource,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ToolResultContent {
    Text(String),
    Blocks(Vec<AnthropicBlock>),
}

impl ToolResultContent {
    fn into_text(self) -> String {
        match self {
            ToolResultContent::Text(text) => text,
            ToolResultContent::Blocks(blocks) => blocks
                .into_iter()
                .filter_map(|b| match b {
                    AnthropicBlock::Text { text } => Some(text),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ImageSource {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    media_type: String,
    #[serde(default)]
    data: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicTool {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    input_schema: Option<Value>,
}

// ============================================================================
// Request translation
// ============================================================================

fn system_texts(system: Option<AnthropicContent>) -> Vec<String> {
    match system {
        None => Vec::new(),
        Some(AnthropicContent::Text(text)) => vec![text],
        Some(AnthropicContent::Blocks(blocks)) => blocks
            .into_iter()
            .filter_map(|b| match b {
                AnthropicBlock::Text { text } => Some(text),
                _ => None,
            })
            .collect(),
    }
}

/// Translate one assistant message's blocks. Tool-use blocks prefer the
/// turn's own valid thinking signature; failing that they carry the skip
/// sentinel, which the upstream accepts as "bypass the validator".
fn assistant_parts(blocks: Vec<AnthropicBlock>) -> Vec<Part> {
    let turn_signature = blocks.iter().find_map(|b| match b {
        AnthropicBlock::Thinking {
            signature: Some(signature),
            ..
        } if is_valid_signature(signature) => Some(signature.clone()),
        _ => None,
    });

    let mut parts = Vec::new();
    for block in blocks {
        match block {
            AnthropicBlock::Text { text } => parts.push(Part::text(text)),
            AnthropicBlock::Thinking {
                thinking,
                signature,
            } => parts.push(Part::thought(thinking, signature)),
            AnthropicBlock::ToolUse { id, name, input } => {
                let mut part = Part::function_call(name, input, Some(id));
                if let Part::FunctionCall {
                    thought_signature, ..
                } = &mut part
                {
                    *thought_signature = Some(
                        turn_signature
                            .clone()
                            .unwrap_or_else(|| SKIP_SIGNATURE_SENTINEL.to_string()),
                    );
                }
                parts.push(part);
            }
            // Redacted thinking cannot be replayed upstream.
            AnthropicBlock::RedactedThinking { .. } | AnthropicBlock::Unknown => {}
            AnthropicBlock::ToolResult { .. } | AnthropicBlock::Image { .. } => {}
        }
    }
    parts
}

fn user_parts(
    blocks: Vec<AnthropicBlock>,
    call_names: &HashMap<String, String>,
) -> Result<Vec<Part>, TranslateError> {
    let mut parts = Vec::new();
    for block in blocks {
        match block {
            AnthropicBlock::Text { text } => parts.push(Part::text(text)),
            AnthropicBlock::ToolResult {
                tool_use_id,
                content,
            } => {
                let name = call_names.get(&tool_use_id).cloned().ok_or_else(|| {
                    TranslateError::InvalidBody(format!(
                        "tool_result references unknown tool_use '{tool_use_id}'"
                    ))
                })?;
                let text = content.map(ToolResultContent::into_text).unwrap_or_default();
                parts.push(Part::function_response(
                    name,
                    json!({"result": text}),
                    Some(tool_use_id),
                ));
            }
            AnthropicBlock::Image { source } => {
                if source.kind != "base64" {
                    return Err(TranslateError::Unsupported(
                        "only base64 image sources are supported".to_string(),
                    ));
                }
                parts.push(Part::inline_data(source.media_type, source.data));
            }
            AnthropicBlock::Unknown => {}
            other => {
                return Err(TranslateError::InvalidBody(format!(
                    "unexpected block in user message: {other:?}"
                )));
            }
        }
    }
    Ok(parts)
}

pub fn to_internal(
    body: &Value,
    opts: TranslateOptions<'_>,
) -> Result<TranslatedRequest, TranslateError> {
    let parsed: MessagesRequest = serde_json::from_value(body.clone())
        .map_err(|e| TranslateError::InvalidBody(e.to_string()))?;
    if parsed.messages.is_empty() {
        return Err(TranslateError::InvalidBody("messages is empty".to_string()));
    }

    let model = opts.registry.resolve(&parsed.model);
    let is_thinking = opts.registry.is_thinking(&model);

    let mut contents: Vec<Content> = Vec::new();
    let mut call_names: HashMap<String, String> = HashMap::new();

    for message in parsed.messages {
        let blocks = match message.content {
            AnthropicContent::Text(text) => vec![AnthropicBlock::Text { text }],
            AnthropicContent::Blocks(blocks) => blocks,
        };
        match message.role.as_str() {
            "assistant" => {
                for block in &blocks {
                    if let AnthropicBlock::ToolUse { id, name, .. } = block {
                        call_names.insert(id.clone(), name.clone());
                    }
                }
                let parts = assistant_parts(blocks);
                if !parts.is_empty() {
                    contents.push(Content::model(parts));
                }
            }
            "user" => {
                let parts = user_parts(blocks, &call_names)?;
                if !parts.is_empty() {
                    contents.push(Content::user(parts));
                }
            }
            other => {
                return Err(TranslateError::InvalidBody(format!(
                    "invalid message role '{other}'"
                )));
            }
        }
    }

    let session_id = normalize::prepare(&mut contents, opts.cache);

    let mut system = {
        let texts = system_texts(parsed.system);
        (!texts.is_empty()).then(|| SystemInstruction::from_texts(texts))
    };
    normalize::inject_identity(&mut system);

    let requested_budget = parsed
        .thinking
        .as_ref()
        .filter(|t| t.kind == "enabled")
        .and_then(|t| t.budget_tokens);
    let thinking_budget = is_thinking.then(|| {
        let requested =
            requested_budget.unwrap_or_else(|| opts.registry.default_thinking_budget(&model));
        opts.registry.normalize_thinking_budget(&model, requested)
    });

    let mut request = InternalRequest::new(contents, session_id);
    request.system_instruction = system;
    request.generation_config = Some(GenerationConfig {
        temperature: parsed.temperature,
        top_p: parsed.top_p,
        top_k: parsed.top_k,
        max_output_tokens: parsed.max_tokens,
        stop_sequences: parsed.stop_sequences,
        thinking_config: thinking_budget.map(|budget| ThinkingConfig {
            include_thoughts: true,
            thinking_budget: Some(budget),
        }),
    });
    request.tools = parsed.tools.map(|tools| {
        vec![Tool {
            function_declarations: tools
                .into_iter()
                .map(|t| {
                    normalize::sanitized_declaration(t.name, t.description, t.input_schema.as_ref())
                })
                .collect(),
        }]
    });
    normalize::apply_family_quirks(&mut request, opts.registry, &model, is_thinking);

    Ok(TranslatedRequest {
        request,
        model,
        client_model: parsed.model,
        is_thinking,
        thinking_budget,
        stream: parsed.stream,
    })
}

// ============================================================================
// Response translation
// ============================================================================

fn stop_reason_str(reason: Option<FinishReason>, has_tool_use: bool) -> &'static str {
    if has_tool_use {
        return "tool_use";
    }
    match reason {
        Some(FinishReason::MaxTokens) => "max_tokens",
        _ => "end_turn",
    }
}

fn content_blocks(parts: &[Part]) -> Vec<Value> {
    parts
        .iter()
        .filter_map(|part| match part {
            Part::Text { text } => Some(json!({"type": "text", "text": text})),
            Part::Thought {
                text, signature, ..
            } => Some(json!({
                "type": "thinking",
                "thinking": text,
                "signature": signature.clone().unwrap_or_default(),
            })),
            Part::FunctionCall { call, .. } => Some(json!({
                "type": "tool_use",
                "id": call.id.clone().unwrap_or_else(|| format!("toolu_{}", Uuid::new_v4())),
                "name": call.name,
                "input": call.args,
            })),
            _ => None,
        })
        .collect()
}

fn usage_json(usage: Option<UsageMetadata>) -> Value {
    let usage = usage.unwrap_or_default();
    json!({
        "input_tokens": usage.prompt_token_count,
        "output_tokens": usage.candidates_token_count,
    })
}

pub fn from_internal(response: &InternalResponse, model: &str) -> Value {
    let parts = response.parts();
    json!({
        "id": format!("msg_{}", Uuid::new_v4().simple()),
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": content_blocks(parts),
        "stop_reason": stop_reason_str(response.finish_reason(), response.has_function_call()),
        "stop_sequence": Value::Null,
        "usage": usage_json(response.usage_metadata),
    })
}

/// Frames for a failure after the stream already started. Anthropic has a
/// first-class error event for this.
#[must_use]
pub fn error_frames(message: &str) -> Vec<WireFrame> {
    vec![WireFrame::event(
        "error",
        &json!({
            "type": "error",
            "error": {"type": "api_error", "message": message},
        }),
    )]
}

// ============================================================================
// Streaming
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    None,
    Text,
    Thinking,
    ToolUse,
}

/// Per-request state machine for a Messages stream.
pub struct MessagesStreamState {
    message_id: String,
    model: String,
    started: bool,
    block: BlockKind,
    /// Index of the currently open block; the next block gets `index + 1`.
    index: u32,
    next_index: u32,
    saw_tool_use: bool,
    finish: Option<FinishReason>,
    usage: Option<UsageMetadata>,
}

impl MessagesStreamState {
    #[must_use]
    pub fn new(model: &str) -> Self {
        Self {
            message_id: format!("msg_{}", Uuid::new_v4().simple()),
            model: model.to_string(),
            started: false,
            block: BlockKind::None,
            index: 0,
            next_index: 0,
            saw_tool_use: false,
            finish: None,
            usage: None,
        }
    }

    fn ensure_started(&mut self, frames: &mut Vec<WireFrame>) {
        if self.started {
            return;
        }
        self.started = true;
        frames.push(WireFrame::event(
            "message_start",
            &json!({
                "type": "message_start",
                "message": {
                    "id": self.message_id,
                    "type": "message",
                    "role": "assistant",
                    "model": self.model,
                    "content": [],
                    "stop_reason": Value::Null,
                    "stop_sequence": Value::Null,
                    "usage": usage_json(self.usage),
                },
            }),
        ));
    }

    fn close_block(&mut self, frames: &mut Vec<WireFrame>) {
        if self.block == BlockKind::None {
            return;
        }
        frames.push(WireFrame::event(
            "content_block_stop",
            &json!({"type": "content_block_stop", "index": self.index}),
        ));
        self.block = BlockKind::None;
    }

    fn open_block(&mut self, kind: BlockKind, template: Value, frames: &mut Vec<WireFrame>) {
        self.close_block(frames);
        self.index = self.next_index;
        self.next_index += 1;
        self.block = kind;
        frames.push(WireFrame::event(
            "content_block_start",
            &json!({
                "type": "content_block_start",
                "index": self.index,
                "content_block": template,
            }),
        ));
    }

    fn delta(&self, delta: Value) -> WireFrame {
        WireFrame::event(
            "content_block_delta",
            &json!({
                "type": "content_block_delta",
                "index": self.index,
                "delta": delta,
            }),
        )
    }
}

pub fn from_internal_stream(
    chunk: &InternalResponse,
    state: &mut MessagesStreamState,
) -> Vec<WireFrame> {
    if let Some(usage) = chunk.usage_metadata {
        state.usage = Some(usage);
    }
    if let Some(reason) = chunk.finish_reason() {
        state.finish = Some(reason);
    }

    let mut frames = Vec::new();
    for part in chunk.parts() {
        match part {
            Part::Text { text } => {
                if text.is_empty() {
                    continue;
                }
                state.ensure_started(&mut frames);
                if state.block != BlockKind::Text {
                    state.open_block(
                        BlockKind::Text,
                        json!({"type": "text", "text": ""}),
                        &mut frames,
                    );
                }
                frames.push(state.delta(json!({"type": "text_delta", "text": text})));
            }
            Part::Thought {
                text, signature, ..
            } => {
                state.ensure_started(&mut frames);
                if state.block != BlockKind::Thinking {
                    state.open_block(
                        BlockKind::Thinking,
                        json!({"type": "thinking", "thinking": ""}),
                        &mut frames,
                    );
                }
                if !text.is_empty() {
                    frames.push(state.delta(json!({"type": "thinking_delta", "thinking": text})));
                }
                if let Some(signature) = signature {
                    frames.push(
                        state.delta(json!({"type": "signature_delta", "signature": signature})),
                    );
                }
            }
            Part::FunctionCall { call, .. } => {
                state.ensure_started(&mut frames);
                state.saw_tool_use = true;
                let id = call
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("toolu_{}", Uuid::new_v4().simple()));
                state.open_block(
                    BlockKind::ToolUse,
                    json!({"type": "tool_use", "id": id, "name": call.name, "input": {}}),
                    &mut frames,
                );
                frames.push(state.delta(json!({
                    "type": "input_json_delta",
                    "partial_json": call.args.to_string(),
                })));
                state.close_block(&mut frames);
            }
            _ => {}
        }
    }
    frames
}

pub fn finish_stream(state: &mut MessagesStreamState) -> Vec<WireFrame> {
    let mut frames = Vec::new();
    // An upstream that produced nothing still owes the client a well-formed
    // envelope.
    state.ensure_started(&mut frames);
    state.close_block(&mut frames);

    frames.push(WireFrame::event(
        "message_delta",
        &json!({
            "type": "message_delta",
            "delta": {
                "stop_reason": stop_reason_str(state.finish, state.saw_tool_use),
                "stop_sequence": Value::Null,
            },
            "usage": {
                "output_tokens": state.usage.unwrap_or_default().candidates_token_count,
            },
        }),
    ));
    frames.push(WireFrame::event(
        "message_stop",
        &json!({"type": "message_stop"}),
    ));
    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::SignatureCache;
    use slipstream_types::{ModelRegistry, Role};

    fn opts<'a>(
        registry: &'a ModelRegistry,
        cache: &'a SignatureCache,
    ) -> TranslateOptions<'a> {
        TranslateOptions { registry, cache }
    }

    const GOOD_SIGNATURE: &str = "a-signature-that-is-long-enough";

    #[test]
    fn translates_text_conversation() {
        let registry = ModelRegistry::default();
        let cache = SignatureCache::new();
        let body = json!({
            "model": "claude-sonnet-4-5",
            "max_tokens": 64,
            "system": "stay focused",
            "messages": [
                {"role": "user", "content": "Hi"},
                {"role": "assistant", "content": "Hello!"},
                {"role": "user", "content": [{"type": "text", "text": "More?"}]}
            ]
        });
        let translated = to_internal(&body, opts(&registry, &cache)).unwrap();

        assert_eq!(translated.model, "claude-sonnet-4-5");
        assert!(!translated.is_thinking);
        assert_eq!(translated.request.contents.len(), 3);
        assert_eq!(translated.request.contents[1].role, Role::Model);
        assert_eq!(
            translated
                .request
                .generation_config
                .as_ref()
                .unwrap()
                .max_output_tokens,
            Some(64)
        );
        assert!(
            translated
                .request
                .system_instruction
                .unwrap()
                .joined_text()
                .contains("stay focused")
        );
    }

    #[test]
    fn tool_use_prefers_turn_thinking_signature() {
        let registry = ModelRegistry::default();
        let cache = SignatureCache::new();
        let body = json!({
            "model": "claude-sonnet-4-5-thinking",
            "max_tokens": 64,
            "messages": [
                {"role": "user", "content": "go"},
                {"role": "assistant", "content": [
                    {"type": "thinking", "thinking": "plan", "signature": GOOD_SIGNATURE},
                    {"type": "tool_use", "id": "toolu_1", "name": "run", "input": {"cmd": "ls"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "ok"}
                ]}
            ]
        });
        let translated = to_internal(&body, opts(&registry, &cache)).unwrap();

        let assistant = &translated.request.contents[1];
        let call_signature = assistant.parts.iter().find_map(|p| match p {
            Part::FunctionCall {
                thought_signature, ..
            } => thought_signature.as_deref(),
            _ => None,
        });
        assert_eq!(call_signature, Some(GOOD_SIGNATURE));
    }

    #[test]
    fn tool_use_without_thinking_gets_skip_sentinel() {
        let registry = ModelRegistry::default();
        let cache = SignatureCache::new();
        let body = json!({
            "model": "claude-sonnet-4-5",
            "max_tokens": 64,
            "messages": [
                {"role": "user", "content": "go"},
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "toolu_1", "name": "run", "input": {}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "ok"}
                ]}
            ]
        });
        let translated = to_internal(&body, opts(&registry, &cache)).unwrap();

        // The recovery pass also synthesized a closing thought stub.
        let assistant = translated
            .request
            .contents
            .iter()
            .find(|c| c.role == Role::Model)
            .unwrap();
        assert!(assistant.parts[0].is_thought());
        let call_signature = assistant.parts.iter().find_map(|p| match p {
            Part::FunctionCall {
                thought_signature, ..
            } => thought_signature.as_deref(),
            _ => None,
        });
        assert_eq!(call_signature, Some(SKIP_SIGNATURE_SENTINEL));
    }

    #[test]
    fn unsigned_thinking_restored_from_cache() {
        let registry = ModelRegistry::default();
        let cache = SignatureCache::new();
        // The session id is derived from the first user text.
        let session = crate::signature::derive_session_id(&[Content::user(vec![Part::text(
            "remember me",
        )])]);
        cache.set(&session, "old reasoning", GOOD_SIGNATURE);

        let body = json!({
            "model": "claude-sonnet-4-5-thinking",
            "max_tokens": 64,
            "messages": [
                {"role": "user", "content": "remember me"},
                {"role": "assistant", "content": [
                    {"type": "thinking", "thinking": "old reasoning"},
                    {"type": "text", "text": "done"}
                ]},
                {"role": "user", "content": "next"}
            ]
        });
        let translated = to_internal(&body, opts(&registry, &cache)).unwrap();

        let assistant = &translated.request.contents[1];
        assert_eq!(
            assistant.parts[0].as_thought(),
            Some(("old reasoning", Some(GOOD_SIGNATURE)))
        );
    }

    #[test]
    fn unsigned_thinking_without_cache_hit_is_dropped() {
        let registry = ModelRegistry::default();
        let cache = SignatureCache::new();
        let body = json!({
            "model": "claude-sonnet-4-5-thinking",
            "max_tokens": 64,
            "messages": [
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": [
                    {"type": "thinking", "thinking": "never cached"},
                    {"type": "text", "text": "done"}
                ]},
                {"role": "user", "content": "next"}
            ]
        });
        let translated = to_internal(&body, opts(&registry, &cache)).unwrap();
        let assistant = &translated.request.contents[1];
        assert_eq!(assistant.parts.len(), 1);
        assert_eq!(assistant.parts[0].as_text(), Some("done"));
    }

    #[test]
    fn base64_images_become_inline_data() {
        let registry = ModelRegistry::default();
        let cache = SignatureCache::new();
        let body = json!({
            "model": "claude-sonnet-4-5",
            "max_tokens": 64,
            "messages": [{"role": "user", "content": [
                {"type": "image", "source": {"type": "base64", "media_type": "image/jpeg", "data": "aGk="}}
            ]}]
        });
        let translated = to_internal(&body, opts(&registry, &cache)).unwrap();
        match &translated.request.contents[0].parts[0] {
            Part::InlineData { inline_data } => {
                assert_eq!(inline_data.mime_type, "image/jpeg");
            }
            other => panic!("expected inline data, got {other:?}"),
        }
    }

    #[test]
    fn thinking_budget_honors_client_request() {
        let registry = ModelRegistry::default();
        let cache = SignatureCache::new();
        let body = json!({
            "model": "claude-sonnet-4-5-thinking",
            "max_tokens": 64,
            "thinking": {"type": "enabled", "budget_tokens": 2048},
            "messages": [{"role": "user", "content": "hi"}]
        });
        let translated = to_internal(&body, opts(&registry, &cache)).unwrap();
        assert_eq!(translated.thinking_budget, Some(2048));
    }

    #[test]
    fn batch_response_maps_blocks_and_stop_reason() {
        let response: InternalResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "planning", "thought": true, "thoughtSignature": GOOD_SIGNATURE},
                    {"text": "answer"},
                    {"functionCall": {"name": "run", "args": {"cmd": "ls"}, "id": "toolu_9"}}
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 7, "candidatesTokenCount": 3}
        }))
        .unwrap();
        let out = from_internal(&response, "claude-sonnet-4-5");

        assert_eq!(out["type"], "message");
        assert_eq!(out["stop_reason"], "tool_use");
        let content = out["content"].as_array().unwrap();
        assert_eq!(content[0]["type"], "thinking");
        assert_eq!(content[0]["signature"], GOOD_SIGNATURE);
        assert_eq!(content[1]["type"], "text");
        assert_eq!(content[2]["type"], "tool_use");
        assert_eq!(content[2]["input"]["cmd"], "ls");
        assert_eq!(out["usage"]["input_tokens"], 7);
    }

    #[test]
    fn max_tokens_stop_reason() {
        let response: InternalResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "trunc"}]},
                "finishReason": "MAX_TOKENS"
            }]
        }))
        .unwrap();
        let out = from_internal(&response, "claude-sonnet-4-5");
        assert_eq!(out["stop_reason"], "max_tokens");
    }

    fn event_names(frames: &[WireFrame]) -> Vec<&'static str> {
        frames.iter().filter_map(|f| f.event).collect()
    }

    #[test]
    fn happy_stream_emits_the_canonical_sequence() {
        let chunk: InternalResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Hello!"}]},
                "finishReason": "STOP"
            }]
        }))
        .unwrap();

        let mut state = MessagesStreamState::new("claude-sonnet-4-5");
        let mut frames = from_internal_stream(&chunk, &mut state);
        frames.extend(finish_stream(&mut state));

        assert_eq!(
            event_names(&frames),
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );

        let start: Value = serde_json::from_str(&frames[1].data).unwrap();
        assert_eq!(start["index"], 0);
        assert_eq!(start["content_block"]["type"], "text");
        let delta: Value = serde_json::from_str(&frames[2].data).unwrap();
        assert_eq!(delta["delta"]["text"], "Hello!");
        let message_delta: Value = serde_json::from_str(&frames[4].data).unwrap();
        assert_eq!(message_delta["delta"]["stop_reason"], "end_turn");
    }

    #[test]
    fn thinking_block_gets_signature_delta() {
        let chunk: InternalResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "mulling", "thought": true, "thoughtSignature": GOOD_SIGNATURE}
                ]}
            }]
        }))
        .unwrap();

        let mut state = MessagesStreamState::new("claude-sonnet-4-5-thinking");
        let frames = from_internal_stream(&chunk, &mut state);

        let deltas: Vec<Value> = frames
            .iter()
            .filter(|f| f.event == Some("content_block_delta"))
            .map(|f| serde_json::from_str(&f.data).unwrap())
            .collect();
        assert_eq!(deltas[0]["delta"]["type"], "thinking_delta");
        assert_eq!(deltas[1]["delta"]["type"], "signature_delta");
        assert_eq!(deltas[1]["delta"]["signature"], GOOD_SIGNATURE);
    }

    #[test]
    fn tool_use_block_opens_and_closes_immediately() {
        let chunk: InternalResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "calling now"},
                    {"functionCall": {"name": "run", "args": {"cmd": "ls"}, "id": "toolu_1"}}
                ]},
                "finishReason": "STOP"
            }]
        }))
        .unwrap();

        let mut state = MessagesStreamState::new("claude-sonnet-4-5");
        let mut frames = from_internal_stream(&chunk, &mut state);
        frames.extend(finish_stream(&mut state));

        assert_eq!(
            event_names(&frames),
            vec![
                "message_start",
                "content_block_start",  // text, index 0
                "content_block_delta",
                "content_block_stop",   // text closed by the tool block
                "content_block_start",  // tool_use, index 1
                "content_block_delta",  // full input_json_delta
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
        let tool_start: Value = serde_json::from_str(&frames[4].data).unwrap();
        assert_eq!(tool_start["index"], 1);
        assert_eq!(tool_start["content_block"]["type"], "tool_use");
        let json_delta: Value = serde_json::from_str(&frames[5].data).unwrap();
        assert_eq!(json_delta["delta"]["type"], "input_json_delta");
        let message_delta: Value = serde_json::from_str(&frames[7].data).unwrap();
        assert_eq!(message_delta["delta"]["stop_reason"], "tool_use");
    }

    #[test]
    fn empty_stream_still_closes_cleanly() {
        let mut state = MessagesStreamState::new("claude-sonnet-4-5");
        let frames = finish_stream(&mut state);
        assert_eq!(
            event_names(&frames),
            vec!["message_start", "message_delta", "message_stop"]
        );
    }

    #[test]
    fn error_frames_use_the_native_envelope() {
        let frames = error_frames("upstream went away");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, Some("error"));
        let body: Value = serde_json::from_str(&frames[0].data).unwrap();
        assert_eq!(body["error"]["type"], "api_error");
    }
}
