use axum::body::Bytes;
use axum::http::{HeaderValue, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::{Json, extract::State};
use futures_util::FutureExt;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::clock::to_iso;
use crate::error::ChatError;
use crate::metrics::{CANNED_REPLIES, CHAT_REQUESTS, FALLBACK_REPLIES};
use crate::models::{ChatReply, ChatRequest, ConversationRecord, Message, ReplySource};
use crate::persona::{DEFAULT_VOICE, Voice, canned_reply};
use crate::rate_limit::CHAT_PATHS;
use crate::state::AppState;

pub const FALLBACK_REPLY: &str =
    "Hey, I'm having a bit of trouble connecting right now, but I'm here to help. Can you try asking again?";
const DEFAULT_USER: &str = "default_user";

// post handler; a panic anywhere below still answers with the apology body
pub async fn chat_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    respond(handle_chat(state, body)).await
}

async fn respond<F>(turn: F) -> Response
where
    F: Future<Output = Result<ChatReply, ChatError>>,
{
    match AssertUnwindSafe(turn).catch_unwind().await {
        Ok(Ok(reply)) => Json(reply).into_response(),
        Ok(Err(e)) => e.into_response(),
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "internal error".to_string());
            error!(error = %msg, "chat handler panicked");
            ChatError::Internal(msg).into_response()
        }
    }
}

async fn handle_chat(state: Arc<AppState>, body: Bytes) -> Result<ChatReply, ChatError> {
    CHAT_REQUESTS.inc();

    let request: ChatRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ChatRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            warn!(error = %e, "failed to parse chat body");
            ChatError::InvalidJson
        })?
    };

    let message = request.message.as_deref().unwrap_or_default().trim().to_string();
    if message.is_empty() {
        return Err(ChatError::MissingMessage);
    }
    let user_id = request
        .user_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_USER.to_string());
    let voice = request
        .voice
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_VOICE.to_string());
    debug!(user_id = %user_id, voice = %voice, chars = message.chars().count(), "chat turn");

    if let Some(reply) = canned_reply(&message) {
        CANNED_REPLIES.inc();
        info!(user_id = %user_id, "matched canned reply");
        save(&state, &user_id, &message, reply, &voice);
        return Ok(ChatReply {
            reply: reply.to_string(),
            source: ReplySource::Custom,
            voice_response_finished: None,
            selected_voice: None,
            timestamp: None,
        });
    }

    let conversation = [
        Message::system(Voice::from_name(&voice).system_prompt()),
        Message::user(message.clone()),
    ];
    let params = state.generation;
    let reply = match state
        .dispatcher
        .dispatch(&conversation, params.max_tokens, params.temperature)
        .await
    {
        Some(reply) => reply,
        None => {
            FALLBACK_REPLIES.inc();
            warn!(user_id = %user_id, "no upstream reply, using fallback message");
            FALLBACK_REPLY.to_string()
        }
    };

    save(&state, &user_id, &message, &reply, &voice);

    Ok(ChatReply {
        reply,
        source: ReplySource::Api,
        voice_response_finished: Some(true),
        selected_voice: Some(voice),
        timestamp: Some(state.clock.now_ms() as i64),
    })
}

fn save(state: &AppState, user_id: &str, message: &str, reply: &str, voice: &str) {
    state.store.spawn_save(ConversationRecord {
        user_id: user_id.to_string(),
        message: message.to_string(),
        reply: reply.to_string(),
        voice: voice.to_string(),
        created_at: to_iso(state.clock.now_ms()),
    });
}

// CORS preflight
pub async fn preflight_handler() -> StatusCode {
    StatusCode::NO_CONTENT
}

pub async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({ "error": "Method not allowed" })),
    )
        .into_response()
}

// Chat routes only; /metrics is not meant for browsers
pub async fn apply_cors(uri: Uri, mut resp: Response) -> Response {
    if !CHAT_PATHS.contains(&uri.path()) {
        return resp;
    }
    let headers = resp.headers_mut();
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET,POST,OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type,Authorization,X-Requested-With"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("false"),
    );
    headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("86400"));
    resp
}
