//! HTTP handlers for the three dialect endpoints, the model catalog, and
//! the health probe.

use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use slipstream_pool::AccountStore;
use slipstream_translate::{Dialect, TranslateOptions, Translator, WireFrame};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use crate::auth;
use crate::error::GatewayError;
use crate::orchestrator;
use crate::state::AppState;

pub async fn chat_completions<S: AccountStore>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    dispatch(state, Dialect::OpenAiChat, &headers, body).await
}

pub async fn responses<S: AccountStore>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    dispatch(state, Dialect::OpenAiResponses, &headers, body).await
}

pub async fn messages<S: AccountStore>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    dispatch(state, Dialect::Anthropic, &headers, body).await
}

async fn dispatch<S: AccountStore>(
    state: Arc<AppState<S>>,
    dialect: Dialect,
    headers: &HeaderMap,
    body: Value,
) -> Response {
    if let Some(denied) = auth::check(headers, state.config.server.api_key.as_deref()) {
        return denied;
    }

    let translator = Translator::new(dialect);
    let translated = {
        let opts = TranslateOptions {
            registry: &state.registry,
            cache: &state.cache,
        };
        match translator.to_internal(&body, opts) {
            Ok(translated) => translated,
            Err(e) => return GatewayError::from(e).into_response(dialect),
        }
    };

    tracing::info!(
        dialect = dialect.as_str(),
        client_model = %translated.client_model,
        model = %translated.model,
        stream = translated.stream,
        "request accepted"
    );

    if translated.stream {
        let (tx, rx) = mpsc::channel::<WireFrame>(64);
        tokio::spawn(orchestrator::run_stream(
            state,
            translator,
            translated,
            tx,
        ));
        let stream = ReceiverStream::new(rx)
            .map(|frame| Ok::<Event, Infallible>(frame_to_event(frame)));
        return Sse::new(stream).keep_alive(KeepAlive::default()).into_response();
    }

    match orchestrator::run_batch(&state, translator, &translated).await {
        Ok(body) => Json(body).into_response(),
        Err(e) => e.into_response(dialect),
    }
}

fn frame_to_event(frame: WireFrame) -> Event {
    let event = Event::default().data(frame.data);
    match frame.event {
        Some(name) => event.event(name),
        None => event,
    }
}

/// `GET /v1/models` - the catalog in OpenAI list form, augmented with
/// context and capability fields.
pub async fn models<S: AccountStore>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
) -> Response {
    if let Some(denied) = auth::check(&headers, state.config.server.api_key.as_deref()) {
        return denied;
    }

    let data: Vec<Value> = slipstream_types::catalog()
        .iter()
        .map(|descriptor| {
            json!({
                "id": descriptor.id,
                "object": "model",
                "created": 0,
                "owned_by": "slipstream",
                "display_name": descriptor.display_name,
                "context_window": descriptor.context_window,
                "max_output_tokens": descriptor.max_output_tokens,
                "capabilities": {
                    "streaming": descriptor.streaming,
                    "reasoning": descriptor.thinking.is_some(),
                },
            })
        })
        .collect();

    Json(json!({"object": "list", "data": data})).into_response()
}

/// `GET /health`.
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
