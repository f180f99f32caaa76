//! Account selection and cooldown bookkeeping.

use std::collections::{HashMap, HashSet};

use chrono::{Duration, Utc};
use slipstream_types::Family;
use tokio::sync::Mutex;

use crate::account::{Account, PerModelState};
use crate::oauth::{OAuthClient, RefreshError};
use crate::store::{AccountStore, StoreError};

/// Cooldown applied when the caller could not parse a server hint.
pub const DEFAULT_RETRY_MS: u64 = 60_000;

const BASE_COOLDOWN_MS: u64 = 1000;
const MAX_COOLDOWN_MS: u64 = 30 * 60 * 1000;

/// Access tokens this close to expiry are refreshed before being handed out.
const EXPIRY_MARGIN_MINUTES: i64 = 5;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// How long to cool an account down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cooldown {
    /// No server hint was parsed; per-model marks run the exponential
    /// backoff ladder, global marks use [`DEFAULT_RETRY_MS`].
    Default,
    /// Milliseconds parsed from the server's response, used verbatim.
    Hinted(u64),
}

/// A usable token handed to the orchestrator.
#[derive(Debug, Clone)]
pub struct AccountLease {
    pub account_id: String,
    pub email: String,
    pub token: String,
    pub project_id: String,
}

struct PoolState {
    accounts: Vec<Account>,
    /// Round-robin cursor per model family.
    cursors: HashMap<Family, usize>,
}

/// The pool. One mutex guards all account state; every mutation persists
/// best-effort through the store before the lock is released.
pub struct AccountPool<S> {
    state: Mutex<PoolState>,
    store: S,
    oauth: OAuthClient,
    fallback_project_id: String,
}

/// Cooldown for the current backoff level, and the level to store next.
/// Once the ladder tops out at the cap the level stops climbing.
fn backoff_step(level: u32) -> (u64, u32) {
    let raw = BASE_COOLDOWN_MS.saturating_mul(1u64 << level.min(31));
    if raw >= MAX_COOLDOWN_MS {
        (MAX_COOLDOWN_MS, level)
    } else {
        (raw, level + 1)
    }
}

impl<S: AccountStore> AccountPool<S> {
    /// Load the pool from its store.
    pub async fn load(
        store: S,
        oauth: OAuthClient,
        fallback_project_id: impl Into<String>,
    ) -> Result<Self, PoolError> {
        let accounts = store.load().await?;
        Ok(Self {
            state: Mutex::new(PoolState {
                accounts,
                cursors: HashMap::new(),
            }),
            store,
            oauth,
            fallback_project_id: fallback_project_id.into(),
        })
    }

    pub async fn account_count(&self) -> usize {
        self.state.lock().await.accounts.len()
    }

    /// Snapshot of the records, for diagnostics and tests.
    pub async fn accounts(&self) -> Vec<Account> {
        self.state.lock().await.accounts.clone()
    }

    pub async fn add(&self, account: Account) {
        let mut state = self.state.lock().await;
        state.accounts.push(account);
        self.persist(&state.accounts).await;
    }

    pub async fn remove(&self, account_id: &str) -> bool {
        let mut state = self.state.lock().await;
        let before = state.accounts.len();
        state.accounts.retain(|a| a.id != account_id);
        let removed = state.accounts.len() != before;
        if removed {
            self.persist(&state.accounts).await;
        }
        removed
    }

    /// Select an account eligible for `model` and return a token valid for
    /// at least the expiry margin. Returns `Ok(None)` when every account is
    /// disabled or cooling down.
    pub async fn get_valid_access_token(
        &self,
        family: Family,
        model: &str,
    ) -> Result<Option<AccountLease>, PoolError> {
        let mut state = self.state.lock().await;
        let mut excluded: HashSet<String> = HashSet::new();

        loop {
            let now = Utc::now();
            let PoolState { accounts, cursors } = &mut *state;

            let mut eligible: Vec<usize> = accounts
                .iter()
                .enumerate()
                .filter(|(_, a)| {
                    !a.disabled && !excluded.contains(&a.id) && !a.is_blocked_for(model, now)
                })
                .map(|(i, _)| i)
                .collect();

            if eligible.is_empty() {
                let earliest_reset = accounts
                    .iter()
                    .filter(|a| !a.disabled)
                    .filter_map(|a| a.blocked_until(model, now))
                    .min();
                if let Some(reset) = earliest_reset {
                    tracing::info!(
                        model,
                        reset = %reset,
                        "all accounts cooling down; earliest reset logged"
                    );
                }
                return Ok(None);
            }

            // Stable sort: tier first, original order within a tier.
            eligible.sort_by_key(|&i| accounts[i].tier.priority());

            let cursor = cursors.entry(family).or_insert(0);
            let pick = eligible[*cursor % eligible.len()];
            *cursor = cursor.wrapping_add(1);

            if accounts[pick]
                .tokens
                .expires_within(Duration::minutes(EXPIRY_MARGIN_MINUTES))
            {
                let refresh_token = accounts[pick].tokens.refresh_token.clone();
                match self.oauth.refresh(&refresh_token).await {
                    Ok(refreshed) => {
                        let account = &mut accounts[pick];
                        account.tokens.access_token = refreshed.access_token;
                        account.tokens.expires_at = refreshed.expires_at;
                        if let Some(rotated) = refreshed.refresh_token {
                            account.tokens.refresh_token = rotated;
                        }
                    }
                    Err(RefreshError::InvalidGrant(reason)) => {
                        let account = &mut accounts[pick];
                        tracing::warn!(
                            email = %account.email,
                            "refresh token revoked; disabling account"
                        );
                        account.disabled = true;
                        account.disabled_reason = Some(reason);
                        excluded.insert(account.id.clone());
                        self.persist(accounts).await;
                        continue;
                    }
                    Err(e) => {
                        let account = &accounts[pick];
                        tracing::warn!(
                            email = %account.email,
                            error = %e,
                            "token refresh failed; trying the next account"
                        );
                        excluded.insert(account.id.clone());
                        continue;
                    }
                }
            }

            let account = &mut accounts[pick];
            account.last_used_at = Some(now);
            let project_id = if account.project_id.is_empty() {
                tracing::warn!(
                    email = %account.email,
                    fallback = %self.fallback_project_id,
                    "account has no project id; using the configured fallback"
                );
                self.fallback_project_id.clone()
            } else {
                account.project_id.clone()
            };
            let lease = AccountLease {
                account_id: account.id.clone(),
                email: account.email.clone(),
                token: account.tokens.access_token.clone(),
                project_id,
            };
            self.persist(accounts).await;
            return Ok(Some(lease));
        }
    }

    /// Cool an account down. With a `model`, the per-model ladder (or the
    /// verbatim hint); without one, the global cooldown.
    pub async fn mark_rate_limited(
        &self,
        account_id: &str,
        cooldown: Cooldown,
        model: Option<&str>,
    ) {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let Some(account) = state.accounts.iter_mut().find(|a| a.id == account_id) else {
            return;
        };

        match model {
            Some(model) => {
                let entry = account.model_states.entry(model.to_string()).or_default();
                let (cooldown_ms, new_level) = match cooldown {
                    Cooldown::Default => backoff_step(entry.backoff_level),
                    Cooldown::Hinted(ms) => (ms, entry.backoff_level),
                };
                *entry = PerModelState {
                    unavailable: true,
                    next_retry_after: Some(now + Duration::milliseconds(cooldown_ms as i64)),
                    backoff_level: new_level,
                    last_error: Some("rate_limited".to_string()),
                };
                tracing::debug!(
                    email = %account.email,
                    model,
                    cooldown_ms,
                    backoff_level = new_level,
                    "account cooling down for model"
                );
            }
            None => {
                let ms = match cooldown {
                    Cooldown::Default => DEFAULT_RETRY_MS,
                    Cooldown::Hinted(ms) => ms,
                };
                account.rate_limited_until = Some(now + Duration::milliseconds(ms as i64));
            }
        }
        self.persist(&state.accounts).await;
    }

    /// A call succeeded: reset the per-model ladder and lift the global
    /// cooldown.
    pub async fn mark_success(&self, account_id: &str, model: Option<&str>) {
        let mut state = self.state.lock().await;
        let Some(account) = state.accounts.iter_mut().find(|a| a.id == account_id) else {
            return;
        };
        if let Some(model) = model {
            account
                .model_states
                .insert(model.to_string(), PerModelState::default());
        }
        account.rate_limited_until = None;
        self.persist(&state.accounts).await;
    }

    pub async fn mark_disabled(&self, account_id: &str, reason: impl Into<String>) {
        let mut state = self.state.lock().await;
        let Some(account) = state.accounts.iter_mut().find(|a| a.id == account_id) else {
            return;
        };
        account.disabled = true;
        account.disabled_reason = Some(reason.into());
        self.persist(&state.accounts).await;
    }

    /// Operator escape hatch: lift every cooldown, global and per-model.
    pub async fn clear_all_rate_limits(&self) {
        let mut state = self.state.lock().await;
        for account in &mut state.accounts {
            account.rate_limited_until = None;
            account.model_states.clear();
        }
        self.persist(&state.accounts).await;
    }

    async fn persist(&self, accounts: &[Account]) {
        if let Err(e) = self.store.save(accounts).await {
            tracing::warn!(error = %e, "failed to persist account store");
        }
    }
}
