//! HTTP API over the relay operations.

use std::{path::PathBuf, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use relay_core::{RelayError, SessionMeta, SessionSnapshot};
use relay_session::RendezvousCoordinator;
use serde_json::json;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::{
    auth::require_token,
    protocol::{
        Ack, ActivityRequest, AskRequest, AskResponse, InboxBody, MessagesBody, MessagesQuery,
        NotifyRequest, RespondRequest, SendRequest, SessionQuery, SessionsBody, StatusRequest,
        WaitQuery,
    },
    sse::sse_handler,
};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub relay: RendezvousCoordinator,
    pub token: Arc<str>,
}

impl AppState {
    /// Create state guarding `relay` with `token`.
    pub fn new(relay: RendezvousCoordinator, token: impl Into<Arc<str>>) -> Self {
        Self {
            relay,
            token: token.into(),
        }
    }
}

/// Relay error rendered as `{error}` with a matching status code.
#[derive(Debug)]
pub struct ApiError(pub RelayError);

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self.0 {
            RelayError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            RelayError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
        };
        tracing::warn!(%status, %message, "request rejected");
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Build the relay router.
///
/// Everything except the static fallback sits behind the token check.
#[must_use]
pub fn create_router(state: AppState, public_dir: Option<PathBuf>) -> Router {
    let api = Router::new()
        .route("/api/sessions", get(list_sessions))
        .route("/api/session/register", post(register_session))
        .route("/api/activity", post(record_activity))
        .route("/api/message", post(notify))
        .route("/api/ask", post(ask))
        .route("/api/status", post(set_status))
        .route("/api/inbox", get(drain_inbox))
        .route("/api/wait-for-instruction", get(wait_for_instruction))
        .route("/api/respond", post(respond))
        .route("/api/send", post(send_message))
        .route("/api/state", get(get_state))
        .route("/api/messages", get(messages_since))
        .route("/api/events", get(sse_handler));

    #[cfg(feature = "websocket")]
    let api = api.route("/ws", get(crate::websocket::ws_handler));

    let mut app = api
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token))
        .with_state(state);

    if let Some(dir) = public_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    app.layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn list_sessions(State(state): State<AppState>) -> Json<SessionsBody> {
    Json(SessionsBody {
        sessions: state.relay.list_sessions().await,
    })
}

async fn register_session(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    Json(meta): Json<SessionMeta>,
) -> Json<Ack> {
    let session_id = state.relay.register_session_meta(query.id(), meta).await;
    Json(Ack::with_session(session_id))
}

async fn record_activity(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    Json(body): Json<ActivityRequest>,
) -> Json<Ack> {
    let id = state
        .relay
        .record_activity(query.id(), &body.tool, &body.summary)
        .await;
    Json(Ack::with_id(id))
}

async fn notify(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    Json(body): Json<NotifyRequest>,
) -> Json<Ack> {
    let id = state
        .relay
        .notify(query.id(), &body.message, body.level.unwrap_or_default())
        .await;
    Json(Ack::with_id(id))
}

async fn ask(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    Json(body): Json<AskRequest>,
) -> Json<AskResponse> {
    tracing::info!(session = query.id(), question = %body.question, "agent asking");
    let outcome = state
        .relay
        .ask_question(query.id(), &body.question, body.options)
        .await;
    Json(AskResponse::from(outcome))
}

async fn set_status(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    Json(body): Json<StatusRequest>,
) -> Json<Ack> {
    state
        .relay
        .set_status(query.id(), body.status.as_deref().unwrap_or_default())
        .await;
    Json(Ack::ok())
}

async fn drain_inbox(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Json<InboxBody> {
    Json(InboxBody {
        messages: state.relay.drain_inbox(query.id()).await,
    })
}

async fn wait_for_instruction(
    State(state): State<AppState>,
    Query(query): Query<WaitQuery>,
) -> impl IntoResponse {
    let session = query.session.as_deref().unwrap_or_default();
    let timeout = query.timeout.map(Duration::from_millis);
    Json(state.relay.wait_for_instruction(session, timeout).await)
}

async fn respond(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    Json(body): Json<RespondRequest>,
) -> Result<Json<Ack>, ApiError> {
    state.relay.respond(query.id(), &body.answer).await?;
    Ok(Json(Ack::ok()))
}

async fn send_message(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    Json(body): Json<SendRequest>,
) -> Result<Json<Ack>, ApiError> {
    let id = state.relay.send_message(query.id(), &body.message).await?;
    Ok(Json(Ack::with_id(id)))
}

async fn get_state(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Json<SessionSnapshot> {
    Json(state.relay.get_state(query.id()).await)
}

async fn messages_since(
    State(state): State<AppState>,
    Query(query): Query<MessagesQuery>,
) -> Json<MessagesBody> {
    let session = query.session.as_deref().unwrap_or_default();
    Json(MessagesBody {
        messages: state.relay.messages_since(session, query.after).await,
    })
}
