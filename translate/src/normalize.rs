//! Shared transcript normalization.
//!
//! Every dialect runs its translated `contents` through the same pipeline
//! before the request leaves the translator: signature restoration from the
//! cache, FIFO tool-call id matching, and conversation-state recovery for
//! transcripts whose last assistant turn is malformed from the upstream's
//! point of view.

use std::collections::HashMap;
use std::collections::VecDeque;

use serde_json::{Value, json};
use slipstream_types::{
    Content, Family, FunctionDeclaration, InternalRequest, ModelRegistry, Part, Role,
    SystemInstruction, ToolConfig,
};

use crate::sanitize::sanitize_schema;
use crate::signature::{
    SKIP_SIGNATURE_SENTINEL, SignatureCache, derive_session_id, is_valid_signature,
};

/// Sentence identifying the upstream product; requests lacking it are
/// rejected by some upstream deployments.
pub const IDENTITY_SENTENCE: &str =
    "You are Antigravity, an agentic coding assistant built by Google.";

/// Substring whose presence means the client already asserted the product
/// identity and the injection is skipped.
pub const IDENTITY_MARKER: &str = "Antigravity";

/// Hint appended for Claude thinking models when tools are present.
pub const INTERLEAVED_THINKING_HINT: &str =
    "Interleaved thinking is enabled: you may think between tool calls and after tool results.";

/// Thinking stub synthesized when the last assistant turn called tools
/// without any thinking and results are already pending.
const RECOVERY_THOUGHT: &str = "Proceeding with the requested tool calls.";

/// Run the whole pipeline and return the derived session id.
pub fn prepare(contents: &mut Vec<Content>, cache: &SignatureCache) -> String {
    let session_id = derive_session_id(contents);
    restore_signatures(contents, &session_id, cache);
    assign_tool_call_ids(contents);
    recover_conversation_state(contents);
    session_id
}

/// Restore cached signatures onto thinking parts and drop the ones that
/// cannot be signed. A thinking part with no valid signature and no cache
/// hit is removed entirely - an invalid signature upstream is a hard 400,
/// a missing thought is not. Model contents are also reordered so thoughts
/// come first, and contents emptied by the drops disappear.
pub fn restore_signatures(
    contents: &mut Vec<Content>,
    session_id: &str,
    cache: &SignatureCache,
) {
    for content in contents.iter_mut() {
        if content.role != Role::Model {
            continue;
        }

        content.parts.retain_mut(|part| match part {
            Part::Thought {
                text, signature, ..
            } => {
                if signature.as_deref().is_some_and(is_valid_signature) {
                    return true;
                }
                match cache.get(session_id, text) {
                    Some(cached) => {
                        *signature = Some(cached);
                        true
                    }
                    None => {
                        tracing::debug!("dropping unsigned thinking part with no cache hit");
                        false
                    }
                }
            }
            Part::FunctionCall {
                thought_signature, ..
            } => {
                if let Some(sig) = thought_signature.as_deref()
                    && sig != SKIP_SIGNATURE_SENTINEL
                    && !is_valid_signature(sig)
                {
                    *thought_signature = None;
                }
                true
            }
            _ => true,
        });
        content.thoughts_first();
    }

    contents.retain(|content| !content.parts.is_empty());
}

/// Match function responses to function calls FIFO per tool name. Calls
/// without an id get `tool-call-N` (N counted across the transcript);
/// responses without an id consume the next queued id for their name.
pub fn assign_tool_call_ids(contents: &mut [Content]) {
    let mut queues: HashMap<String, VecDeque<String>> = HashMap::new();
    let mut next = 1usize;

    for content in contents.iter_mut() {
        for part in &mut content.parts {
            match part {
                Part::FunctionCall { call, .. } => {
                    let id = call.id.get_or_insert_with(|| {
                        let id = format!("tool-call-{next}");
                        next += 1;
                        id
                    });
                    queues
                        .entry(call.name.clone())
                        .or_default()
                        .push_back(id.clone());
                }
                Part::FunctionResponse { response } => {
                    let queue = queues.entry(response.name.clone()).or_default();
                    match &response.id {
                        Some(id) => {
                            // Consume the matching queued id so later
                            // responses still pair up in order.
                            if let Some(pos) = queue.iter().position(|queued| queued == id) {
                                queue.remove(pos);
                            }
                        }
                        None => {
                            response.id = queue.pop_front();
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

/// Transcript shape flags used by conversation-state recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TranscriptFlags {
    pub last_assistant_has_thinking: bool,
    pub last_assistant_has_tool_call: bool,
    pub has_pending_tool_results: bool,
}

#[must_use]
pub fn analyze(contents: &[Content]) -> TranscriptFlags {
    let Some(last_model) = contents.iter().rposition(|c| c.role == Role::Model) else {
        return TranscriptFlags::default();
    };
    TranscriptFlags {
        last_assistant_has_thinking: contents[last_model].has_thought(),
        last_assistant_has_tool_call: contents[last_model].has_function_call(),
        has_pending_tool_results: contents[last_model + 1..]
            .iter()
            .any(Content::has_function_response),
    }
}

/// If the last assistant turn called tools without thinking and results are
/// pending, synthesize a closing thinking stub (with the skip sentinel - a
/// guessed signature would be rejected) so the upstream sees a well-formed
/// prior turn.
pub fn recover_conversation_state(contents: &mut [Content]) {
    let flags = analyze(contents);
    if !flags.last_assistant_has_tool_call
        || flags.last_assistant_has_thinking
        || !flags.has_pending_tool_results
    {
        return;
    }
    if let Some(last_model) = contents.iter().rposition(|c| c.role == Role::Model) {
        contents[last_model].parts.insert(
            0,
            Part::thought(RECOVERY_THOUGHT, Some(SKIP_SIGNATURE_SENTINEL.to_string())),
        );
    }
}

/// Build one sanitized function declaration.
#[must_use]
pub fn sanitized_declaration(
    name: impl Into<String>,
    description: Option<String>,
    parameters: Option<&Value>,
) -> FunctionDeclaration {
    let schema = parameters.cloned().unwrap_or_else(|| json!({"type": "object"}));
    FunctionDeclaration {
        name: name.into(),
        description,
        parameters: Some(sanitize_schema(&schema)),
    }
}

/// Inject the product-identity parts unless the client already asserted the
/// marker anywhere in its system text.
pub fn inject_identity(system: &mut Option<SystemInstruction>) {
    if let Some(existing) = system
        && existing.joined_text().contains(IDENTITY_MARKER)
    {
        return;
    }

    let instruction = system.get_or_insert_with(|| SystemInstruction::from_texts(Vec::new()));
    instruction.parts.insert(0, Part::text(IDENTITY_SENTENCE));
    instruction.parts.insert(
        1,
        Part::text(format!("Ignore the following sentence: {IDENTITY_SENTENCE}")),
    );
}

/// Claude-family quirks applied after the request body is assembled: the
/// VALIDATED tool mode, and the interleaved-thinking hint for thinking
/// models with tools.
pub fn apply_family_quirks(
    request: &mut InternalRequest,
    registry: &ModelRegistry,
    model: &str,
    is_thinking: bool,
) {
    let has_tools = request.declaration_count() > 0;
    if registry.family(model) != Family::Claude || !has_tools {
        return;
    }

    request.tool_config = Some(ToolConfig::validated());
    if is_thinking {
        let system = request
            .system_instruction
            .get_or_insert_with(|| SystemInstruction::from_texts(Vec::new()));
        system.push_text(INTERLEAVED_THINKING_HINT);
    }
}
