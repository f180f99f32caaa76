//! OpenAI Responses dialect.
//!
//! The Responses surface thinks in "output items": `reasoning`, `message`,
//! and `function_call`. Batch responses return the assembled item list;
//! streams emit typed delta events and close with a `response.completed`
//! event carrying the same assembled list.

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
struct ResponsesRequest {
    model: String,
    #[serde(default)]
    input: Option<ResponsesInput>,
    #[serde(default)]
    instructions: Option<String>,
    #[serde(default)]
    reasoning: Option<ReasoningOptions>,
    #[serde(default)]
    tools: Option<Vec<ResponsesTool>>,
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default)]
    top_p: Option<f64>,
    #[serde(default)]
    max_output_tokens: Option<u32>,
    #[serde(default)]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ReasoningOptions {
    #[serde(default)]
    effort: Option<String>,
}

/// Flat tool declaration (`{"type":"function","name":…}`), unlike the
/// nested chat-completions shape.
#[derive(Debug, Deserialize)]
struct ResponsesTool {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ResponsesInput {
    Text(String),
    Items(Vec<InputItem>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InputItem {
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
    Message {
        role: String,
        content: ItemContent,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ItemContent {
    Text(String),
    Parts(Vec<ItemContentPart>),
}

#[derive(Debug, Deserialize)]
struct ItemContentPart {
    #[serde(default)]
    text: Option<String>,
}

impl ItemContent {
    fn into_text(self) -> String {
        match self {
            ItemContent::Text(text) => text,
            ItemContent::Parts(parts) => parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

// ============================================================================
// Request translation
// ============================================================================

/// Budget for each `reasoning.effort` level, before model clamping.
fn effort_budget(effort: &str) -> Option<i32> {
    match effort {
        "low" => Some(1024),
        "medium" => Some(10_240),
        "high" => Some(24_576),
        _ => None,
    }
}

pub fn to_internal(
    body: &Value,
    opts: TranslateOptions<'_>,
) -> Result<TranslatedRequest, TranslateError> {
    let parsed: ResponsesRequest = serde_json::from_value(body.clone())
        .map_err(|e| TranslateError::InvalidBody(e.to_string()))?;

    let model = opts.registry.resolve(&parsed.model);
    let is_thinking = opts.registry.is_thinking(&model);

    let mut system_texts: Vec<String> = Vec::new();
    if let Some(instructions) = parsed.instructions
        && !instructions.is_empty()
    {
        system_texts.push(instructions);
    }

    let mut contents: Vec<Content> = Vec::new();
    // function_call_output items reference calls by id only.
    let mut call_names: HashMap<String, String> = HashMap::new();

    match parsed.input {
        Some(ResponsesInput::Text(text)) => {
            contents.push(Content::user(vec![Part::text(text)]));
        }
        Some(ResponsesInput::Items(items)) => {
            for item in items {
                match item {
                    InputItem::Message { role, content } => {
                        let text = content.into_text();
                        match role.as_str() {
                            "system" | "developer" => system_texts.push(text),
                            "assistant" => {
                                contents.push(Content::model(vec![Part::text(text)]));
                            }
                            "user" => {
                                contents.push(Content::user(vec![Part::text(text)]));
                            }
                            other => {
                                return Err(TranslateError::InvalidBody(format!(
                                    "unknown input role '{other}'"
                                )));
                            }
                        }
                    }
                    InputItem::FunctionCall {
                        call_id,
                        name,
                        arguments,
                    } => {
                        let args =
                            serde_json::from_str(&arguments).unwrap_or_else(|_| json!({}));
                        call_names.insert(call_id.clone(), name.clone());
                        contents.push(Content::model(vec![Part::function_call(
                            name,
                            args,
                            Some(call_id),
                        )]));
                    }
                    InputItem::FunctionCallOutput { call_id, output } => {
                        let name = call_names.get(&call_id).cloned().ok_or_else(|| {
                            TranslateError::InvalidBody(format!(
                                "function_call_output references unknown call '{call_id}'"
                            ))
                        })?;
                        contents.push(Content::user(vec![Part::function_response(
                            name,
                            json!({"result": output}),
                            Some(call_id),
                        )]));
                    }
                }
            }
        }
        None => {
            return Err(TranslateError::InvalidBody("input is required".to_string()));
        }
    }

    let session_id = normalize::prepare(&mut contents, opts.cache);

    let mut system = (!system_texts.is_empty()).then(|| SystemInstruction::from_texts(system_texts));
    normalize::inject_identity(&mut system);

    let thinking_budget = is_thinking.then(|| {
        let requested = parsed
            .reasoning
            .as_ref()
            .and_then(|r| r.effort.as_deref())
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
        max_output_tokens: parsed.max_output_tokens,
        stop_sequences: None,
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
                    normalize::sanitized_declaration(t.name, t.description, t.parameters.as_ref())
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
// Response assembly
// ============================================================================

/// Collected output for one response, shared by batch and stream paths.
#[derive(Debug, Default)]
struct AssembledOutput {
    reasoning: String,
    text: String,
    calls: Vec<(String, String, String)>,
}

impl AssembledOutput {
    fn absorb(&mut self, parts: &[Part]) {
        for part in parts {
            match part {
                Part::Thought { text, .. } => self.reasoning.push_str(text),
                Part::Text { text } => self.text.push_str(text),
                Part::FunctionCall { call, .. } => {
                    let id = call
                        .id
                        .clone()
                        .unwrap_or_else(|| format!("call_{}", Uuid::new_v4()));
                    self.calls
                        .push((id, call.name.clone(), call.args.to_string()));
                }
                _ => {}
            }
        }
    }

    fn output_items(&self, id: &str) -> Vec<Value> {
        let mut items = Vec::new();
        if !self.reasoning.is_empty() {
            items.push(json!({
                "type": "reasoning",
                "id": format!("rs_{id}"),
                "content": [{"type": "reasoning_text", "text": self.reasoning}],
            }));
        }
        if !self.text.is_empty() {
            items.push(json!({
                "type": "message",
                "id": format!("msg_{id}"),
                "role": "assistant",
                "status": "completed",
                "content": [{"type": "output_text", "text": self.text, "annotations": []}],
            }));
        }
        for (index, (call_id, name, arguments)) in self.calls.iter().enumerate() {
            items.push(json!({
                "type": "function_call",
                "id": format!("fc_{id}-{index}"),
                "call_id": call_id,
                "name": name,
                "arguments": arguments,
            }));
        }
        items
    }
}

fn usage_json(usage: Option<UsageMetadata>) -> Value {
    let usage = usage.unwrap_or_default();
    json!({
        "input_tokens": usage.prompt_token_count,
        "output_tokens": usage.candidates_token_count,
        "total_tokens": usage.total_token_count,
    })
}

fn status_str(reason: Option<FinishReason>) -> &'static str {
    match reason {
        Some(FinishReason::MaxTokens) => "incomplete",
        _ => "completed",
    }
}

fn response_json(
    id: &str,
    model: &str,
    created: i64,
    output: &AssembledOutput,
    reason: Option<FinishReason>,
    usage: Option<UsageMetadata>,
) -> Value {
    json!({
        "id": format!("resp_{id}"),
        "object": "response",
        "created_at": created,
        "status": status_str(reason),
        "model": model,
        "output": output.output_items(id),
        "usage": usage_json(usage),
    })
}

pub fn from_internal(response: &InternalResponse, model: &str) -> Value {
    let mut output = AssembledOutput::default();
    output.absorb(response.parts());
    response_json(
        &Uuid::new_v4().to_string(),
        model,
        chrono::Utc::now().timestamp(),
        &output,
        response.finish_reason(),
        response.usage_metadata,
    )
}

// ============================================================================
// Streaming
// ============================================================================

/// Per-request state for a Responses stream.
pub struct ResponsesStreamState {
    id: String,
    created: i64,
    model: String,
    output: AssembledOutput,
    finish: Option<FinishReason>,
    usage: Option<UsageMetadata>,
}

impl ResponsesStreamState {
    #[must_use]
    pub fn new(model: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created: chrono::Utc::now().timestamp(),
            model: model.to_string(),
            output: AssembledOutput::default(),
            finish: None,
            usage: None,
        }
    }
}

pub fn from_internal_stream(
    chunk: &InternalResponse,
    state: &mut ResponsesStreamState,
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
            Part::Thought { text, .. } => {
                if !text.is_empty() {
                    frames.push(WireFrame::event(
                        "response.reasoning.delta",
                        &json!({"type": "response.reasoning.delta", "delta": text}),
                    ));
                }
            }
            Part::Text { text } => {
                if !text.is_empty() {
                    frames.push(WireFrame::event(
                        "response.output_text.delta",
                        &json!({"type": "response.output_text.delta", "delta": text}),
                    ));
                }
            }
            Part::FunctionCall { call, .. } => {
                let id = call
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("call_{}", Uuid::new_v4()));
                frames.push(WireFrame::event(
                    "response.function_call.delta",
                    &json!({
                        "type": "response.function_call.delta",
                        "call_id": id,
                        "name": call.name,
                        "arguments": call.args.to_string(),
                    }),
                ));
            }
            _ => {}
        }
    }
    state.output.absorb(chunk.parts());
    frames
}

pub fn finish_stream(state: &mut ResponsesStreamState) -> Vec<WireFrame> {
    let completed = response_json(
        &state.id,
        &state.model,
        state.created,
        &state.output,
        state.finish,
        state.usage,
    );
    vec![
        WireFrame::event(
            "response.completed",
            &json!({"type": "response.completed", "response": completed}),
        ),
        WireFrame::done(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::SignatureCache;
    use slipstream_types::ModelRegistry;

    fn opts<'a>(
        registry: &'a ModelRegistry,
        cache: &'a SignatureCache,
    ) -> TranslateOptions<'a> {
        TranslateOptions { registry, cache }
    }

    #[test]
    fn string_input_becomes_a_user_turn() {
        let registry = ModelRegistry::default();
        let cache = SignatureCache::new();
        let body = json!({"model": "gemini-2.5-pro", "input": "hello"});
        let translated = to_internal(&body, opts(&registry, &cache)).unwrap();
        assert_eq!(translated.request.contents.len(), 1);
        assert_eq!(
            translated.request.contents[0].parts[0].as_text(),
            Some("hello")
        );
    }

    #[test]
    fn item_input_translates_calls_and_outputs() {
        let registry = ModelRegistry::default();
        let cache = SignatureCache::new();
        let body = json!({
            "model": "gemini-2.5-pro",
            "input": [
                {"role": "user", "content": "look this up"},
                {"type": "function_call", "call_id": "call_7", "name": "search",
                 "arguments": "{\"q\":\"x\"}"},
                {"type": "function_call_output", "call_id": "call_7", "output": "result text"}
            ]
        });
        let translated = to_internal(&body, opts(&registry, &cache)).unwrap();
        let contents = &translated.request.contents;
        assert_eq!(contents.len(), 3);
        assert!(contents[1].has_function_call());
        match &contents[2].parts[0] {
            Part::FunctionResponse { response } => {
                assert_eq!(response.name, "search");
                assert_eq!(response.id.as_deref(), Some("call_7"));
            }
            other => panic!("expected function response, got {other:?}"),
        }
    }

    #[test]
    fn orphan_function_output_is_rejected() {
        let registry = ModelRegistry::default();
        let cache = SignatureCache::new();
        let body = json!({
            "model": "gemini-2.5-pro",
            "input": [
                {"type": "function_call_output", "call_id": "call_9", "output": "x"}
            ]
        });
        assert!(matches!(
            to_internal(&body, opts(&registry, &cache)),
            Err(TranslateError::InvalidBody(_))
        ));
    }

    #[test]
    fn effort_levels_map_to_budgets() {
        let registry = ModelRegistry::default();
        let cache = SignatureCache::new();
        for (effort, budget) in [("low", 1024), ("medium", 10_240), ("high", 24_576)] {
            let body = json!({
                "model": "gemini-2.5-pro",
                "input": "think",
                "reasoning": {"effort": effort}
            });
            let translated = to_internal(&body, opts(&registry, &cache)).unwrap();
            assert_eq!(translated.thinking_budget, Some(budget), "effort {effort}");
        }
    }

    #[test]
    fn instructions_join_the_system_instruction() {
        let registry = ModelRegistry::default();
        let cache = SignatureCache::new();
        let body = json!({
            "model": "gemini-2.5-pro",
            "input": "hi",
            "instructions": "answer in haiku"
        });
        let translated = to_internal(&body, opts(&registry, &cache)).unwrap();
        assert!(
            translated
                .request
                .system_instruction
                .unwrap()
                .joined_text()
                .contains("answer in haiku")
        );
    }

    #[test]
    fn batch_output_assembles_typed_items() {
        let response: InternalResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "let me think", "thought": true},
                    {"text": "the answer"},
                    {"functionCall": {"name": "save", "args": {"k": 1}, "id": "call_1"}}
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 4, "totalTokenCount": 14}
        }))
        .unwrap();
        let out = from_internal(&response, "gemini-2.5-pro");

        assert_eq!(out["object"], "response");
        assert_eq!(out["status"], "completed");
        let output = out["output"].as_array().unwrap();
        assert_eq!(output.len(), 3);
        assert_eq!(output[0]["type"], "reasoning");
        assert_eq!(output[0]["content"][0]["text"], "let me think");
        assert_eq!(output[1]["type"], "message");
        assert_eq!(output[1]["content"][0]["text"], "the answer");
        assert_eq!(output[2]["type"], "function_call");
        assert_eq!(output[2]["call_id"], "call_1");
        assert_eq!(out["usage"]["total_tokens"], 14);
    }

    #[test]
    fn stream_emits_typed_deltas_then_completed() {
        let chunk: InternalResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "hmm", "thought": true},
                    {"text": "partial"}
                ]}
            }]
        }))
        .unwrap();
        let mut state = ResponsesStreamState::new("gemini-2.5-pro");
        let frames = from_internal_stream(&chunk, &mut state);
        assert_eq!(frames[0].event, Some("response.reasoning.delta"));
        assert_eq!(frames[1].event, Some("response.output_text.delta"));

        let tail = finish_stream(&mut state);
        assert_eq!(tail[0].event, Some("response.completed"));
        let completed: Value = serde_json::from_str(&tail[0].data).unwrap();
        let output = completed["response"]["output"].as_array().unwrap();
        assert_eq!(output[0]["type"], "reasoning");
        assert_eq!(output[1]["content"][0]["text"], "partial");
        assert_eq!(tail[1], WireFrame::done());
    }

    #[test]
    fn max_tokens_marks_response_incomplete() {
        let response: InternalResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "cut off"}]},
                "finishReason": "MAX_TOKENS"
            }]
        }))
        .unwrap();
        let out = from_internal(&response, "gemini-2.5-pro");
        assert_eq!(out["status"], "incomplete");
    }
}
