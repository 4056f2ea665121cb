//! The HTTP surface: signup, the audit log, and the Key RPC methods.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use keydir_core::{name, Error, Kind, UserRecord};
use serde::Deserialize;
use std::collections::HashMap;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tracing::warn;

use crate::server::{KeyServer, ServerContext};
use crate::signup::{SignupOutcome, SignupServer};

/// Header carrying the authenticated caller for `Put`. Establishing that
/// identity (an authenticating front-end) is outside this service.
pub const CALLER_HEADER: &str = "x-key-user";

#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<ServerContext>,
    pub signup: Arc<SignupServer>,
}

/// Build the service router with permissive CORS and a per-request timeout.
pub fn router(state: AppState, request_timeout: Duration) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        .route("/signup", post(signup_handler))
        .route("/log", get(log_handler))
        .route("/api/Key/Lookup", post(lookup_handler))
        .route("/api/Key/Put", post(put_handler))
        .layer(
            tower::ServiceBuilder::new()
                .layer(cors)
                .layer(TimeoutLayer::new(request_timeout)),
        )
        .with_state(state)
}

// ── /signup ──────────────────────────────────────────────────────────────────

async fn signup_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    match state.signup.handle(&params).await {
        SignupOutcome::Ok(body) => (StatusCode::OK, body).into_response(),
        SignupOutcome::RateLimited(wait) => {
            let retry_after = wait.as_secs().max(1).to_string();
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, retry_after)],
                "too many signup requests for this name\n",
            )
                .into_response()
        }
        SignupOutcome::Failed(err) => {
            warn!(error = %err, "signup failed");
            let status = match err.kind {
                Kind::IO | Kind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::BAD_REQUEST,
            };
            (status, format!("{}\n", public_message(&err))).into_response()
        }
    }
}

// ── /log ─────────────────────────────────────────────────────────────────────

async fn log_handler(State(state): State<AppState>) -> Response {
    match state.ctx.log.read_all() {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            bytes,
        )
            .into_response(),
        Err(err) => {
            warn!(error = %err, "audit log read failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error\n").into_response()
        }
    }
}

// ── /api/Key/* ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct LookupRequest {
    #[serde(rename = "UserName")]
    user_name: String,
}

async fn lookup_handler(
    State(state): State<AppState>,
    Json(request): Json<LookupRequest>,
) -> Response {
    let server = KeyServer::anonymous(state.ctx.clone());
    match server.lookup(&request.user_name) {
        Ok(record) => Json(record).into_response(),
        Err(err) => error_response(err),
    }
}

async fn put_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(record): Json<UserRecord>,
) -> Response {
    let Some(raw_caller) = headers.get(CALLER_HEADER).and_then(|v| v.to_str().ok()) else {
        return error_response(
            Error::new("KeyServer.Put", Kind::Permission)
                .with_cause("request is not authenticated"),
        );
    };
    let caller = match name::canonicalize(raw_caller) {
        Ok(caller) => caller,
        Err(err) => return error_response(err),
    };
    let server = KeyServer::for_user(state.ctx.clone(), caller);
    match server.put(&record).await {
        Ok(()) => (StatusCode::OK, "OK\n").into_response(),
        Err(err) => error_response(err),
    }
}

fn error_response(err: Error) -> Response {
    let status = match err.kind {
        Kind::Invalid => StatusCode::BAD_REQUEST,
        Kind::NotExist => StatusCode::NOT_FOUND,
        Kind::Exist => StatusCode::CONFLICT,
        Kind::Permission => StatusCode::FORBIDDEN,
        Kind::IO => StatusCode::SERVICE_UNAVAILABLE,
        Kind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        warn!(error = %err, "request failed");
    }
    (status, format!("{}\n", public_message(&err))).into_response()
}

/// What a client is told. `Permission` failures hide their cause, and
/// backend trouble stays generic.
fn public_message(err: &Error) -> String {
    match err.kind {
        Kind::Permission => "permission denied".to_string(),
        Kind::IO => "temporary failure, try again".to_string(),
        Kind::Internal => "internal error".to_string(),
        _ => err.to_string(),
    }
}
