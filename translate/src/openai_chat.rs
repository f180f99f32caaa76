//! OpenAI Chat Completions dialect.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Value, json};
use slipstream_types::{
    Content, FinishReason, GenerationConfig, InternalRequest, InternalResponse, Part,
    SystemInstruction, ThinkingConfig, Tool, UsageMetadata,
};
use uuid::Uuid;

use crate::normalize;
use crate::{TranslateError, TranslateOptions, TranslatedRequest, WireFrame};

// ============================================================================
// Request wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(default)]
    tools: Option<Vec<ChatTool>>,
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default)]
    top_p: Option<f64>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    max_completion_tokens: Option<u32>,
    #[serde(default)]
    stop: Option<StopSequences>,
    #[serde(default)]
    stream: bool,
    #[serde(default)]
    reasoning_effort: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StopSequences {
    One(String),
    Many(Vec<String>),
}

impl StopSequences {
    fn into_vec(self) -> Vec<String> {
        match self {
            StopSequences::One(s) => vec![s],
            StopSequences::Many(v) => v,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<ChatContent>,
    #[serde(default)]
    tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(default)]
    tool_call_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChatContent {
    Text(String),
    Parts(Vec<ChatContentPart>),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ChatContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatToolCall {
    #[serde(default)]
    id: Option<String>,
    function: ChatToolCallFunction,
}

#[derive(Debug, Deserialize)]
struct ChatToolCallFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatTool {
    function: ChatToolFunction,
}

#[derive(Debug, Deserialize)]
struct ChatToolFunction {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<Value>,
}

// ============================================================================
// Request translation
// ============================================================================

/// Thinking budgets for the `reasoning_effort` levels, before model clamping.
fn effort_budget(effort: &str) -> Option<i32> {
    match effort {
        "low" => Some(1024),
        "medium" => Some(10_240),
        "high" => Some(24_576),
        _ => None,
    }
}

/// Parse a `data:<mime>;base64,<payload>` URI.
fn parse_data_uri(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (mime, payload) = rest.split_once(";base64,")?;
    Some((mime.to_string(), payload.to_string()))
}

pub fn to_internal(
    body: &Value,
    opts: TranslateOptions<'_>,
) -> Result<TranslatedRequest, TranslateError> {
    let parsed: ChatRequest = serde_json::from_value(body.clone())
        .map_err(|e| TranslateError::InvalidBody(e.to_string()))?;
    if parsed.messages.is_empty() {
        return Err(TranslateError::InvalidBody("messages is empty".to_string()));
    }

    let model = opts.registry.resolve(&parsed.model);
    let is_thinking = opts.registry.is_thinking(&model);

    let mut system_texts: Vec<String> = Vec::new();
    let mut contents: Vec<Content> = Vec::new();
    // OpenAI tool messages carry only the call id; remember call names.
    let mut call_names: HashMap<String, String> = HashMap::new();

    for message in parsed.messages {
        match message.role.as_str() {
            "system" | "developer" => {
                if let Some(text) = content_text(message.content) {
                    system_texts.push(text);
                }
            }
            "user" => {
                let parts = user_parts(message.content)?;
                if !parts.is_empty() {
                    contents.push(Content::user(parts));
                }
            }
            "assistant" => {
                let mut parts: Vec<Part> = Vec::new();
                if let Some(text) = content_text(message.content)
                    && !text.is_empty()
                {
                    parts.push(Part::text(text));
                }
                for tool_call in message.tool_calls.unwrap_or_default() {
                    let args = serde_json::from_str(&tool_call.function.arguments)
                        .unwrap_or_else(|_| json!({}));
                    if let Some(id) = &tool_call.id {
                        call_names.insert(id.clone(), tool_call.function.name.clone());
                    }
                    parts.push(Part::function_call(
                        tool_call.function.name,
                        args,
                        tool_call.id,
                    ));
                }
                if !parts.is_empty() {
                    contents.push(Content::model(parts));
                }
            }
            "tool" => {
                let text = content_text(message.content).unwrap_or_default();
                let name = message
                    .name
                    .or_else(|| {
                        message
                            .tool_call_id
                            .as_ref()
                            .and_then(|id| call_names.get(id).cloned())
                    })
                    .ok_or_else(|| {
                        TranslateError::InvalidBody(
                            "tool message without resolvable tool name".to_string(),
                        )
                    })?;
                contents.push(Content::user(vec![Part::function_response(
                    name,
                    json!({"result": text}),
                    message.tool_call_id,
                )]));
            }
            other => {
                return Err(TranslateError::InvalidBody(format!(
                    "unknown message role '{other}'"
                )));
            }
        }
    }

    let session_id = normalize::prepare(&mut contents, opts.cache);

    let mut system = (!system_texts.is_empty()).then(|| SystemInstruction::from_texts(system_texts));
    normalize::inject_identity(&mut system);

    let thinking_budget = is_thinking.then(|| {
        let requested = parsed
            .reasoning_effort
            .as_deref()
            .and_then(effort_budget)
            .unwrap_or_else(|| opts.registry.default_thinking_budget(&model));
        opts.registry.normalize_thinking_budget(&model, requested)
    });

    let mut request = InternalRequest::new(contents, session_id);
    request.system_instruction = system;
    request.generation_config = Some(GenerationConfig {
        temperature: parsed.temperature,
        top_p: parsed.top_p,
        top_k: None,
        max_output_tokens: parsed.max_completion_tokens.or(parsed.max_tokens),
        stop_sequences: parsed.stop.map(StopSequences::into_vec),
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
                    normalize::sanitized_declaration(
                        t.function.name,
                        t.function.description,
                        t.function.parameters.as_ref(),
                    )
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

fn content_text(content: Option<ChatContent>) -> Option<String> {
    match content? {
        ChatContent::Text(text) => Some(text),
        ChatContent::Parts(parts) => {
            let joined = parts
                .into_iter()
                .filter_map(|p| match p {
                    ChatContentPart::Text { text } => Some(text),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            Some(joined)
        }
    }
}

fn user_parts(content: Option<ChatContent>) -> Result<Vec<Part>, TranslateError> {
    let Some(content) = content else {
        return Ok(Vec::new());
    };
    match content {
        ChatContent::Text(text) => Ok(vec![Part::text(text)]),
        ChatContent::Parts(parts) => {
            let mut out = Vec::new();
            for part in parts {
                match part {
                    ChatContentPart::Text { text } => out.push(Part::text(text)),
                    ChatContentPart::ImageUrl { image_url } => {
                        let (mime, data) = parse_data_uri(&image_url.url).ok_or_else(|| {
                            TranslateError::Unsupported(
                                "image_url must be a base64 data: URI".to_string(),
                            )
                        })?;
                        out.push(Part::inline_data(mime, data));
                    }
                    ChatContentPart::Unknown => {}
                }
            }
            Ok(out)
        }
    }
}

// ============================================================================
// Response translation
// ============================================================================

fn finish_reason_str(reason: Option<FinishReason>, has_tool_calls: bool) -> Option<&'static str> {
    if has_tool_calls {
        return Some("tool_calls");
    }
    match reason? {
        FinishReason::Stop => Some("stop"),
        FinishReason::MaxTokens => Some("length"),
        FinishReason::Safety | FinishReason::Recitation => Some("content_filter"),
        FinishReason::FinishReasonUnspecified | FinishReason::Other => None,
    }
}

fn usage_json(usage: Option<UsageMetadata>) -> Value {
    let usage = usage.unwrap_or_default();
    json!({
        "prompt_tokens": usage.prompt_token_count,
        "completion_tokens": usage.candidates_token_count,
        "total_tokens": usage.total_token_count,
    })
}

fn tool_calls_json(parts: &[Part]) -> Vec<Value> {
    parts
        .iter()
        .filter_map(|part| match part {
            Part::FunctionCall { call, .. } => Some(json!({
                "id": call.id.clone().unwrap_or_else(|| format!("call_{}", Uuid::new_v4())),
                "type": "function",
                "function": {
                    "name": call.name,
                    "arguments": call.args.to_string(),
                },
            })),
            _ => None,
        })
        .collect()
}

pub fn from_internal(response: &InternalResponse, model: &str) -> Value {
    let parts = response.parts();
    // Thought-flagged parts never reach the chat surface.
    let text: String = parts
        .iter()
        .filter_map(Part::as_text)
        .collect::<Vec<_>>()
        .join("");
    let tool_calls = tool_calls_json(parts);

    let mut message = json!({"role": "assistant"});
    message["content"] = if text.is_empty() {
        Value::Null
    } else {
        Value::String(text)
    };
    if !tool_calls.is_empty() {
        message["tool_calls"] = Value::Array(tool_calls.clone());
    }

    json!({
        "id": format!("chatcmpl-{}", Uuid::new_v4()),
        "object": "chat.completion",
        "created": chrono::Utc::now().timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": finish_reason_str(response.finish_reason(), !tool_calls.is_empty()),
        }],
        "usage": usage_json(response.usage_metadata),
    })
}

// ============================================================================
// Streaming
// ============================================================================

/// Per-request state for a chat-completions stream.
pub struct ChatStreamState {
    id: String,
    created: i64,
    model: String,
    sent_role: bool,
    tool_index: u32,
    saw_tool_call: bool,
    finish: Option<FinishReason>,
    usage: Option<UsageMetadata>,
}

impl ChatStreamState {
    #[must_use]
    pub fn new(model: &str) -> Self {
        Self {
            id: format!("chatcmpl-{}", Uuid::new_v4()),
            created: chrono::Utc::now().timestamp(),
            model: model.to_string(),
            sent_role: false,
            tool_index: 0,
            saw_tool_call: false,
            finish: None,
            usage: None,
        }
    }

    fn chunk(&mut self, mut delta: Value, finish_reason: Option<&'static str>) -> WireFrame {
        if !self.sent_role {
            delta["role"] = json!("assistant");
            self.sent_role = true;
        }
        WireFrame::data(&json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": finish_reason,
            }],
        }))
    }
}

pub fn from_internal_stream(
    chunk: &InternalResponse,
    state: &mut ChatStreamState,
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
                if !text.is_empty() {
                    let frame = state.chunk(json!({"content": text}), None);
                    frames.push(frame);
                }
            }
            Part::FunctionCall { call, .. } => {
                state.saw_tool_call = true;
                let index = state.tool_index;
                state.tool_index += 1;
                let frame = state.chunk(
                    json!({
                        "tool_calls": [{
                            "index": index,
                            "id": call.id.clone().unwrap_or_else(|| format!("call_{}", Uuid::new_v4())),
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": call.args.to_string(),
                            },
                        }]
                    }),
                    None,
                );
                frames.push(frame);
            }
            // Thought parts are internal; the chat surface never sees them.
            _ => {}
        }
    }
    frames
}

pub fn finish_stream(state: &mut ChatStreamState) -> Vec<WireFrame> {
    let reason =
        finish_reason_str(state.finish, state.saw_tool_call).unwrap_or("stop");
    let mut final_chunk = state.chunk(json!({}), Some(reason));
    // Attach usage to the terminal chunk when the upstream reported it.
    if let Some(usage) = state.usage {
        let mut value: Value = serde_json::from_str(&final_chunk.data).unwrap_or_default();
        value["usage"] = usage_json(Some(usage));
        final_chunk = WireFrame::data(&value);
    }
    vec![final_chunk, WireFrame::done()]
}
