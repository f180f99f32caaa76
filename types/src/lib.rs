//! Core domain types for the gateway.
//!
//! Every client dialect translates into (and back out of) the single
//! Gemini-shaped representation defined here. The types serialize directly
//! to the upstream wire format, so field casing follows the upstream JSON
//! (`camelCase` throughout the `v1internal` surface).

mod part;
mod registry;
mod request;
mod response;

pub use part::{Blob, Content, FunctionCall, FunctionResponse, Part, Role};
pub use registry::{
    Family, ModelDescriptor, ModelRegistry, ThinkingCaps, catalog, describe, fallbacks,
};
pub use request::{
    FunctionCallingConfig, FunctionDeclaration, GenerationConfig, InternalRequest,
    SystemInstruction, ThinkingConfig, Tool, ToolConfig, VALIDATED_MODE,
};
pub use response::{Candidate, FinishReason, InternalResponse, UsageMetadata};
