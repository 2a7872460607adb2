//! REST routes under `/api/conversations`.
//!
//! Every mutating handler persists first and publishes the exact record it
//! stored; a storage failure returns before anything is published.

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use chatline_core::{ContextRecord, Conversation, ConversationId, MessageRecord, Role};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::assistant::AssistantError;
use crate::server::AppState;
use crate::store::StoreError;

/// Errors returned by the REST handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Unknown conversation.
    #[error("conversation not found: {0}")]
    NotFound(ConversationId),
    /// Invalid request body.
    #[error("{0}")]
    BadRequest(String),
    /// The assistant backend failed.
    #[error(transparent)]
    Assistant(#[from] AssistantError),
    /// The storage backend failed.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(id),
            StoreError::Backend(message) => Self::Storage(message),
        }
    }
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Assistant(_) => StatusCode::BAD_GATEWAY,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Assistant(_) => "assistant_error",
            Self::Storage(_) => "storage_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(code = self.code(), error = %self, "request failed");
        }
        let body = serde_json::json!({
            "error": { "code": self.code(), "message": self.to_string() }
        });
        (status, Json(body)).into_response()
    }
}

/// Body of `POST /api/conversations`.
#[derive(Debug, Default, Deserialize)]
pub struct CreateConversationRequest {
    /// Optional display title.
    #[serde(default)]
    pub title: Option<String>,
}

/// Body of the message and context routes.
#[derive(Debug, Deserialize)]
pub struct ContentRequest {
    /// Message or context text.
    pub content: String,
}

/// Response of `POST /api/conversations/{id}/messages`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    /// The stored user message.
    pub user_message: MessageRecord,
    /// The stored assistant reply, when a backend is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_message: Option<MessageRecord>,
}

const DEFAULT_TITLE: &str = "New conversation";

/// Routes mounted under `/api`.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route(
            "/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route("/conversations/{id}", get(get_conversation))
        .route("/conversations/{id}/messages", post(send_message))
        .route("/conversations/{id}/context", put(update_context))
}

fn require_content(content: &str, what: &str) -> Result<(), ApiError> {
    if content.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("{what} must not be empty")));
    }
    Ok(())
}

/// GET /api/conversations
async fn list_conversations(
    State(state): State<AppState>,
) -> Result<Json<Vec<Conversation>>, ApiError> {
    Ok(Json(state.store.list_conversations().await?))
}

/// POST /api/conversations
async fn create_conversation(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Conversation>), ApiError> {
    let req: CreateConversationRequest = if body.is_empty() {
        CreateConversationRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?
    };
    let title = req
        .title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());
    let conversation = state.store.create_conversation(title).await?;
    info!(conversation_id = %conversation.id, "conversation created");
    Ok((StatusCode::CREATED, Json(conversation)))
}

/// GET /api/conversations/{id}
async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Conversation>, ApiError> {
    Ok(Json(state.store.get_conversation(&id.into()).await?))
}

/// POST /api/conversations/{id}/messages
async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ContentRequest>,
) -> Result<Json<SendMessageResponse>, ApiError> {
    require_content(&req.content, "content")?;
    let id = ConversationId::from(id);

    let user_message = MessageRecord::new(Role::User, req.content);
    let appended = user_message.clone();
    let conversation = state
        .store
        .modify_conversation(&id, Box::new(move |c| c.push_message(appended)))
        .await?;
    let report = state.publisher.user_message_sent(&id, user_message.clone());
    info!(
        conversation_id = %id,
        message_id = %user_message.id,
        recipients = report.recipients,
        "user message stored"
    );

    let Some(assistant) = state.assistant.clone() else {
        return Ok(Json(SendMessageResponse {
            user_message,
            assistant_message: None,
        }));
    };

    let reply = assistant.reply(&conversation).await.inspect_err(|e| {
        warn!(conversation_id = %id, error = %e, "assistant reply failed");
    })?;

    // `conversation` is stale by now; edit the stored copy instead.
    let assistant_message = MessageRecord::new(Role::Assistant, reply.content);
    let metadata = reply.metadata.filter(|m| !m.is_empty());
    let (appended, merged) = (assistant_message.clone(), metadata.clone());
    let _ = state
        .store
        .modify_conversation(
            &id,
            Box::new(move |c| {
                c.push_message(appended);
                if let Some(metadata) = merged {
                    c.metadata.merge(metadata);
                }
            }),
        )
        .await?;
    let report = state
        .publisher
        .ai_response_complete(&id, assistant_message.clone(), metadata);
    info!(
        conversation_id = %id,
        message_id = %assistant_message.id,
        recipients = report.recipients,
        "assistant reply stored"
    );

    Ok(Json(SendMessageResponse {
        user_message,
        assistant_message: Some(assistant_message),
    }))
}

/// PUT /api/conversations/{id}/context
async fn update_context(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ContentRequest>,
) -> Result<Json<ContextRecord>, ApiError> {
    require_content(&req.content, "context")?;
    let id = ConversationId::from(id);

    let context = ContextRecord::new(req.content);
    let stored = context.clone();
    let _ = state
        .store
        .modify_conversation(&id, Box::new(move |c| c.set_context(stored)))
        .await?;
    let report = state.publisher.context_updated(&id, context.clone());
    info!(conversation_id = %id, recipients = report.recipients, "context updated");

    Ok(Json(context))
}
