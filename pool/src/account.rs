//! Account records as they live in the store.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Service tier; selection prefers lower numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Ultra,
    Pro,
    Free,
    #[default]
    #[serde(other)]
    Unknown,
}

impl Tier {
    #[must_use]
    pub const fn priority(self) -> u8 {
        match self {
            Tier::Ultra => 0,
            Tier::Pro => 1,
            Tier::Free => 2,
            Tier::Unknown => 3,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Tier::Ultra => "ultra",
            Tier::Pro => "pro",
            Tier::Free => "free",
            Tier::Unknown => "unknown",
        }
    }
}

/// Access/refresh token pair with its absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBundle {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenBundle {
    /// True when the access token expires within `margin` of now.
    #[must_use]
    pub fn expires_within(&self, margin: Duration) -> bool {
        self.expires_at - Utc::now() <= margin
    }
}

/// Cooldown state for one (account, model) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PerModelState {
    #[serde(default)]
    pub unavailable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub backoff_level: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl PerModelState {
    /// Blocked right now for this model?
    #[must_use]
    pub fn is_blocking(&self, now: DateTime<Utc>) -> bool {
        self.unavailable && self.next_retry_after.is_some_and(|until| until > now)
    }
}

/// One pooled identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Upstream project this account is provisioned under; empty when
    /// project discovery failed at login.
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub tier: Tier,
    #[serde(flatten)]
    pub tokens: TokenBundle,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_reason: Option<String>,
    /// Global cooldown; shadows every model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limited_until: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub model_states: HashMap<String, PerModelState>,
    /// Opaque quota summary kept for operators; the pool never reads it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<Value>,
}

impl Account {
    #[must_use]
    pub fn new(email: impl Into<String>, tokens: TokenBundle) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            email: email.into(),
            name: None,
            project_id: String::new(),
            tier: Tier::Unknown,
            tokens,
            created_at: Utc::now(),
            last_used_at: None,
            disabled: false,
            disabled_reason: None,
            rate_limited_until: None,
            model_states: HashMap::new(),
            quota: None,
        }
    }

    /// Blocked for `model` at `now`: the per-model cooldown when one exists,
    /// otherwise the global cooldown.
    #[must_use]
    pub fn is_blocked_for(&self, model: &str, now: DateTime<Utc>) -> bool {
        match self.model_states.get(model) {
            Some(state) => state.is_blocking(now),
            None => self.rate_limited_until.is_some_and(|until| until > now),
        }
    }

    /// Earliest instant this account could become usable for `model`, if it
    /// is currently blocked.
    #[must_use]
    pub fn blocked_until(&self, model: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !self.is_blocked_for(model, now) {
            return None;
        }
        match self.model_states.get(model) {
            Some(state) => state.next_retry_after,
            None => self.rate_limited_until,
        }
    }
}
