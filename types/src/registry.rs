//! Static model catalog and client-name resolution.
//!
//! The catalog is immutable; per-deployment routing lives in
//! [`ModelRegistry`], which layers an optional user route map (exact and
//! `*`-glob entries) over the built-in route table and alias table.

use serde::{Deserialize, Serialize};

/// Upstream model family. Families differ in which envelope quirks apply
/// (tool-mode forcing, `maxOutputTokens` stripping).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    Claude,
    Gemini,
}

impl Family {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Family::Claude => "claude",
            Family::Gemini => "gemini",
        }
    }
}

/// Thinking-budget bounds for a thinking-capable model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThinkingCaps {
    pub default_budget: i32,
    pub min_budget: i32,
    pub max_budget: i32,
}

/// One entry of the static catalog.
#[derive(Debug, Clone, Copy)]
pub struct ModelDescriptor {
    pub id: &'static str,
    pub display_name: &'static str,
    /// Id sent to the upstream (preview ids share a base model).
    pub base_model: &'static str,
    pub family: Family,
    pub context_window: u32,
    pub max_output_tokens: u32,
    pub streaming: bool,
    pub thinking: Option<ThinkingCaps>,
    /// Alternate ids attempted, in order, when this model is
    /// quota-exhausted.
    pub fallbacks: &'static [&'static str],
}

const GEMINI_THINKING: ThinkingCaps = ThinkingCaps {
    default_budget: 8192,
    min_budget: 128,
    max_budget: 32_768,
};

const CLAUDE_THINKING: ThinkingCaps = ThinkingCaps {
    default_budget: 8192,
    min_budget: 1024,
    max_budget: 32_768,
};

const CATALOG: &[ModelDescriptor] = &[
    ModelDescriptor {
        id: "claude-sonnet-4-5",
        display_name: "Claude Sonnet 4.5",
        base_model: "claude-sonnet-4-5",
        family: Family::Claude,
        context_window: 200_000,
        max_output_tokens: 64_000,
        streaming: true,
        thinking: None,
        fallbacks: &[],
    },
    ModelDescriptor {
        id: "claude-sonnet-4-5-thinking",
        display_name: "Claude Sonnet 4.5 (thinking)",
        base_model: "claude-sonnet-4-5",
        family: Family::Claude,
        context_window: 200_000,
        max_output_tokens: 64_000,
        streaming: true,
        thinking: Some(CLAUDE_THINKING),
        fallbacks: &[],
    },
    ModelDescriptor {
        id: "gemini-2.5-pro",
        display_name: "Gemini 2.5 Pro",
        base_model: "gemini-2.5-pro",
        family: Family::Gemini,
        context_window: 1_048_576,
        max_output_tokens: 65_536,
        streaming: true,
        thinking: Some(GEMINI_THINKING),
        fallbacks: &["gemini-2.5-pro-preview"],
    },
    ModelDescriptor {
        id: "gemini-2.5-pro-preview",
        display_name: "Gemini 2.5 Pro Preview",
        base_model: "gemini-2.5-pro-preview-06-05",
        family: Family::Gemini,
        context_window: 1_048_576,
        max_output_tokens: 65_536,
        streaming: true,
        thinking: Some(GEMINI_THINKING),
        fallbacks: &[],
    },
    ModelDescriptor {
        id: "gemini-2.5-flash",
        display_name: "Gemini 2.5 Flash",
        base_model: "gemini-2.5-flash",
        family: Family::Gemini,
        context_window: 1_048_576,
        max_output_tokens: 65_536,
        streaming: true,
        thinking: Some(GEMINI_THINKING),
        fallbacks: &[],
    },
    ModelDescriptor {
        id: "gemini-3-pro-preview",
        display_name: "Gemini 3 Pro Preview",
        base_model: "gemini-3-pro-preview",
        family: Family::Gemini,
        context_window: 1_048_576,
        max_output_tokens: 65_536,
        streaming: true,
        thinking: Some(GEMINI_THINKING),
        fallbacks: &["gemini-2.5-pro"],
    },
];

/// Built-in route table: legacy client names onto catalog ids.
const BUILTIN_ROUTES: &[(&str, &str)] = &[
    ("gpt-4o", "claude-sonnet-4-5"),
    ("gpt-4o-mini", "gemini-2.5-flash"),
    ("gpt-4-turbo", "claude-sonnet-4-5"),
    ("gpt-3.5-turbo", "gemini-2.5-flash"),
    ("o1", "claude-sonnet-4-5-thinking"),
    ("o3", "claude-sonnet-4-5-thinking"),
    ("o3-mini", "gemini-2.5-flash"),
    ("claude-3-5-sonnet-20241022", "claude-sonnet-4-5"),
    ("claude-3-5-sonnet-latest", "claude-sonnet-4-5"),
    ("claude-3-7-sonnet-latest", "claude-sonnet-4-5-thinking"),
    ("claude-3-5-haiku-latest", "gemini-2.5-flash"),
];

/// Alias table: cosmetic spellings of catalog ids.
const ALIASES: &[(&str, &str)] = &[
    ("claude-sonnet-4.5", "claude-sonnet-4-5"),
    ("claude-sonnet-4.5-thinking", "claude-sonnet-4-5-thinking"),
    ("gemini-2.5-pro-latest", "gemini-2.5-pro"),
    ("sonnet", "claude-sonnet-4-5"),
    ("flash", "gemini-2.5-flash"),
];

/// The whole catalog, for `/v1/models`.
#[must_use]
pub fn catalog() -> &'static [ModelDescriptor] {
    CATALOG
}

/// Look up a canonical id.
#[must_use]
pub fn describe(id: &str) -> Option<&'static ModelDescriptor> {
    CATALOG.iter().find(|d| d.id == id)
}

/// Fallback chain for a canonical id; empty for unknown ids.
#[must_use]
pub fn fallbacks(id: &str) -> &'static [&'static str] {
    describe(id).map(|d| d.fallbacks).unwrap_or_default()
}

/// Single-`*` glob with prefix+suffix semantics; a pattern without `*`
/// matches exactly.
fn glob_match(pattern: &str, candidate: &str) -> bool {
    match pattern.split_once('*') {
        Some((prefix, suffix)) => {
            candidate.len() >= prefix.len() + suffix.len()
                && candidate.starts_with(prefix)
                && candidate.ends_with(suffix)
        }
        None => pattern == candidate,
    }
}

/// Per-deployment view over the catalog.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    /// User route map, in declaration order (first glob hit wins).
    user_routes: Vec<(String, String)>,
    default_model: String,
}

impl ModelRegistry {
    #[must_use]
    pub fn new(user_routes: Vec<(String, String)>, default_model: impl Into<String>) -> Self {
        Self {
            user_routes,
            default_model: default_model.into(),
        }
    }

    #[must_use]
    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Resolve a client-supplied model name to a canonical id.
    ///
    /// Priority: user exact match, user glob match, built-in route table;
    /// then the alias table on the routed id. Unknown ids with a `gemini-`
    /// prefix or a `thinking` infix pass through untouched; everything else
    /// falls back to the configured default.
    #[must_use]
    pub fn resolve(&self, client_model: &str) -> String {
        let routed = self.route(client_model);
        let canonical = ALIASES
            .iter()
            .find(|(alias, _)| *alias == routed)
            .map_or(routed.as_str(), |(_, id)| *id);

        if describe(canonical).is_some() {
            return canonical.to_string();
        }
        if canonical.starts_with("gemini-") || canonical.contains("thinking") {
            return canonical.to_string();
        }
        self.default_model.clone()
    }

    fn route(&self, client_model: &str) -> String {
        if let Some((_, target)) = self
            .user_routes
            .iter()
            .find(|(pattern, _)| pattern == client_model)
        {
            return target.clone();
        }
        if let Some((_, target)) = self
            .user_routes
            .iter()
            .find(|(pattern, _)| pattern.contains('*') && glob_match(pattern, client_model))
        {
            return target.clone();
        }
        if let Some((_, target)) = BUILTIN_ROUTES.iter().find(|(name, _)| *name == client_model) {
            return (*target).to_string();
        }
        client_model.to_string()
    }

    /// Id sent upstream for a canonical id; unknown ids pass through.
    #[must_use]
    pub fn base_model_id<'a>(&self, canonical: &'a str) -> &'a str {
        describe(canonical).map_or(canonical, |d| d.base_model)
    }

    /// Family of an id; unknown ids are classified by prefix (the
    /// passthrough case only admits `gemini-` and `thinking` names, and a
    /// bare `thinking` name without a `claude` prefix is a Gemini variant).
    #[must_use]
    pub fn family(&self, id: &str) -> Family {
        if let Some(descriptor) = describe(id) {
            return descriptor.family;
        }
        if id.starts_with("claude") {
            Family::Claude
        } else {
            Family::Gemini
        }
    }

    #[must_use]
    pub fn is_thinking(&self, id: &str) -> bool {
        describe(id).map_or_else(|| id.contains("thinking"), |d| d.thinking.is_some())
    }

    /// Clamp a requested thinking budget into the model's bounds. Ids
    /// without catalog thinking caps use the Gemini defaults.
    #[must_use]
    pub fn normalize_thinking_budget(&self, id: &str, requested: i32) -> i32 {
        let caps = describe(id)
            .and_then(|d| d.thinking)
            .unwrap_or(GEMINI_THINKING);
        requested.clamp(caps.min_budget, caps.max_budget)
    }

    /// Default budget for a thinking model when the client did not ask for
    /// one.
    #[must_use]
    pub fn default_thinking_budget(&self, id: &str) -> i32 {
        describe(id)
            .and_then(|d| d.thinking)
            .unwrap_or(GEMINI_THINKING)
            .default_budget
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(Vec::new(), "gemini-2.5-pro")
    }
}
