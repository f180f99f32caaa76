//! The per-request driver.
//!
//! One translated request comes in; the orchestrator walks the model-attempt
//! chain (primary plus fallbacks when enabled), asks the pool for an account
//! per attempt, classifies every upstream failure, and either rotates the
//! account (rate limit, auth), advances the model (quota exhaustion), or
//! surfaces the error. Streaming runs the same machine but loses the right
//! to rotate once the first upstream chunk has arrived.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use slipstream_pool::{AccountStore, Cooldown};
use slipstream_translate::{TranslatedRequest, Translator, WireFrame};
use slipstream_types::{InternalResponse, Part};
use slipstream_upstream::{UpstreamError, hints};
use tokio::sync::mpsc;

use crate::error::GatewayError;
use crate::state::AppState;

/// Minimum cooldown for a quota-exhausted (account, model) pair.
const QUOTA_COOLDOWN_MS: u64 = 60 * 60 * 1000;

/// What the attempt loop decided about one upstream failure.
enum Classified {
    /// Cool the account down and pick another.
    RotateAccount(Cooldown),
    /// Long-cool this (account, model); advance the fallback chain.
    AdvanceModel(u64),
    /// Disable the account and pick another.
    DisableAccount,
    /// Not retryable; surface now.
    Fatal,
}

fn classify(error: &UpstreamError) -> Classified {
    if error.is_rate_limited() {
        let hint = hints::parse_retry_hint(error.body());
        if error.is_quota_exhausted() {
            return Classified::AdvanceModel(hint.unwrap_or(0).max(QUOTA_COOLDOWN_MS));
        }
        return Classified::RotateAccount(hint.map_or(Cooldown::Default, Cooldown::Hinted));
    }
    if error.is_auth() {
        return Classified::DisableAccount;
    }
    Classified::Fatal
}

/// Models attempted for one request, in order.
fn attempt_models<S: AccountStore>(state: &AppState<S>, primary: &str) -> Vec<String> {
    let mut models = vec![primary.to_string()];
    if state.config.proxy.switch_preview_model {
        for fallback in slipstream_types::fallbacks(primary) {
            models.push((*fallback).to_string());
        }
    }
    models
}

/// Remember every signature the upstream shows us.
fn harvest_signatures<S: AccountStore>(
    state: &AppState<S>,
    session_id: &str,
    response: &InternalResponse,
) {
    for part in response.parts() {
        if let Part::Thought {
            text,
            signature: Some(signature),
            ..
        } = part
        {
            state.cache.set(session_id, text, signature);
        }
    }
}

/// Drive one batch request to completion.
pub async fn run_batch<S: AccountStore>(
    state: &AppState<S>,
    translator: Translator,
    translated: &TranslatedRequest,
) -> Result<Value, GatewayError> {
    let work = run_batch_inner(state, translator, translated);
    match state.config.proxy.request_timeout_secs {
        0 => work.await,
        secs => tokio::time::timeout(Duration::from_secs(secs), work)
            .await
            .unwrap_or(Err(GatewayError::Timeout)),
    }
}

async fn run_batch_inner<S: AccountStore>(
    state: &AppState<S>,
    translator: Translator,
    translated: &TranslatedRequest,
) -> Result<Value, GatewayError> {
    let mut last_error: Option<GatewayError> = None;

    for attempt_model in attempt_models(state, &translated.model) {
        let family = state.registry.family(&attempt_model);
        let base_model = state.registry.base_model_id(&attempt_model).to_string();
        let budget = 2 * state.pool.account_count().await.max(1);

        for _ in 0..budget {
            let lease = match state.pool.get_valid_access_token(family, &attempt_model).await {
                Ok(Some(lease)) => lease,
                Ok(None) => {
                    last_error.get_or_insert(GatewayError::NoAccounts);
                    break;
                }
                Err(e) => return Err(GatewayError::Internal(e.to_string())),
            };

            let result = state
                .upstream
                .generate(
                    &base_model,
                    &translated.request,
                    &lease.token,
                    &lease.project_id,
                    family,
                )
                .await;

            match result {
                Ok(response) => {
                    state
                        .pool
                        .mark_success(&lease.account_id, Some(attempt_model.as_str()))
                        .await;
                    harvest_signatures(state, &translated.request.session_id, &response);
                    return Ok(translator.from_internal(&response, &attempt_model));
                }
                Err(error) => match classify(&error) {
                    Classified::RotateAccount(cooldown) => {
                        tracing::warn!(
                            model = %attempt_model,
                            account = %lease.email,
                            "rate limited; rotating account"
                        );
                        state
                            .pool
                            .mark_rate_limited(&lease.account_id, cooldown, Some(attempt_model.as_str()))
                            .await;
                        last_error = Some(GatewayError::from_upstream(&error));
                    }
                    Classified::AdvanceModel(cooldown_ms) => {
                        tracing::warn!(
                            model = %attempt_model,
                            account = %lease.email,
                            cooldown_ms,
                            "quota exhausted; advancing model fallback chain"
                        );
                        state
                            .pool
                            .mark_rate_limited(
                                &lease.account_id,
                                Cooldown::Hinted(cooldown_ms),
                                Some(attempt_model.as_str()),
                            )
                            .await;
                        last_error = Some(GatewayError::from_upstream(&error));
                        break;
                    }
                    Classified::DisableAccount => {
                        tracing::warn!(
                            account = %lease.email,
                            "upstream rejected the token; disabling account"
                        );
                        state
                            .pool
                            .mark_disabled(&lease.account_id, format!("upstream auth: {error}"))
                            .await;
                        last_error = Some(GatewayError::AuthExhausted(error.to_string()));
                    }
                    Classified::Fatal => return Err(GatewayError::from_upstream(&error)),
                },
            }
        }
    }

    Err(last_error.unwrap_or(GatewayError::NoAccounts))
}

/// Drive one streaming request; frames go to `tx` until the request is
/// done or the client goes away (receiver dropped).
pub async fn run_stream<S: AccountStore>(
    state: Arc<AppState<S>>,
    translator: Translator,
    translated: TranslatedRequest,
    tx: mpsc::Sender<WireFrame>,
) {
    let secs = state.config.proxy.request_timeout_secs;
    let work = run_stream_inner(&state, translator, &translated, &tx);
    let timed_out = match secs {
        0 => {
            work.await;
            false
        }
        secs => tokio::time::timeout(Duration::from_secs(secs), work)
            .await
            .is_err(),
    };
    if timed_out {
        for frame in translator.error_frames("request timed out") {
            let _ = tx.send(frame).await;
        }
    }
}

async fn run_stream_inner<S: AccountStore>(
    state: &AppState<S>,
    translator: Translator,
    translated: &TranslatedRequest,
    tx: &mpsc::Sender<WireFrame>,
) {
    let mut last_error: Option<GatewayError> = None;

    'models: for attempt_model in attempt_models(state, &translated.model) {
        let family = state.registry.family(&attempt_model);
        let base_model = state.registry.base_model_id(&attempt_model).to_string();
        let budget = 2 * state.pool.account_count().await.max(1);

        for _ in 0..budget {
            let lease = match state.pool.get_valid_access_token(family, &attempt_model).await {
                Ok(Some(lease)) => lease,
                Ok(None) => {
                    last_error.get_or_insert(GatewayError::NoAccounts);
                    continue 'models;
                }
                Err(e) => {
                    last_error = Some(GatewayError::Internal(e.to_string()));
                    break 'models;
                }
            };

            let mut upstream = match state
                .upstream
                .stream_generate(
                    &base_model,
                    &translated.request,
                    &lease.token,
                    &lease.project_id,
                    family,
                )
                .await
            {
                Ok(stream) => stream,
                Err(error) => {
                    match classify(&error) {
                        Classified::RotateAccount(cooldown) => {
                            state
                                .pool
                                .mark_rate_limited(
                                    &lease.account_id,
                                    cooldown,
                                    Some(attempt_model.as_str()),
                                )
                                .await;
                            last_error = Some(GatewayError::from_upstream(&error));
                            continue;
                        }
                        Classified::AdvanceModel(cooldown_ms) => {
                            state
                                .pool
                                .mark_rate_limited(
                                    &lease.account_id,
                                    Cooldown::Hinted(cooldown_ms),
                                    Some(attempt_model.as_str()),
                                )
                                .await;
                            last_error = Some(GatewayError::from_upstream(&error));
                            continue 'models;
                        }
                        Classified::DisableAccount => {
                            state
                                .pool
                                .mark_disabled(
                                    &lease.account_id,
                                    format!("upstream auth: {error}"),
                                )
                                .await;
                            last_error = Some(GatewayError::AuthExhausted(error.to_string()));
                            continue;
                        }
                        Classified::Fatal => {
                            last_error = Some(GatewayError::from_upstream(&error));
                            break 'models;
                        }
                    }
                }
            };

            // Connected. Until the first chunk arrives the account may still
            // be rotated; afterwards the stream is committed.
            let mut stream_state = translator.new_stream_state(&attempt_model);
            let mut received_any = false;

            loop {
                match upstream.next_chunk().await {
                    Ok(Some(chunk)) => {
                        received_any = true;
                        harvest_signatures(state, &translated.request.session_id, &chunk);
                        for frame in translator.stream_chunk(&mut stream_state, &chunk) {
                            if tx.send(frame).await.is_err() {
                                // Client disconnected; dropping the upstream
                                // stream aborts the read.
                                return;
                            }
                        }
                    }
                    Ok(None) => {
                        state
                            .pool
                            .mark_success(&lease.account_id, Some(attempt_model.as_str()))
                            .await;
                        for frame in translator.finish_stream(&mut stream_state) {
                            if tx.send(frame).await.is_err() {
                                return;
                            }
                        }
                        return;
                    }
                    Err(error) => {
                        if !received_any
                            && let Classified::RotateAccount(cooldown) = classify(&error)
                        {
                            state
                                .pool
                                .mark_rate_limited(
                                    &lease.account_id,
                                    cooldown,
                                    Some(attempt_model.as_str()),
                                )
                                .await;
                            last_error = Some(GatewayError::from_upstream(&error));
                            break;
                        }
                        // Mid-stream failure: no retry, report in-band.
                        tracing::warn!(
                            model = %attempt_model,
                            error = %error,
                            "stream failed after first chunk"
                        );
                        for frame in translator.error_frames(&error.to_string()) {
                            let _ = tx.send(frame).await;
                        }
                        return;
                    }
                }
            }
        }
    }

    let error = last_error.unwrap_or(GatewayError::NoAccounts);
    for frame in translator.error_frames(&error.to_string()) {
        let _ = tx.send(frame).await;
    }
}
