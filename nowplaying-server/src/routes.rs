//! HTTP surface: login flow, client page, status and the WebSocket endpoint.

use crate::login::LoginStates;
use crate::ws;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Json, Router};
use nowplaying_core::{BroadcastHub, TrackSearch};
use nowplaying_spotify::{AuthorizeRequest, TokenError, TokenManager};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

const INDEX_HTML: &str = include_str!("../assets/index.html");

const UNAUTHORIZED_HTML: &str = "<!doctype html><title>nowplaying</title>\
<p>Not connected to Spotify yet. <a href=\"/login\">Log in</a> to start.</p>";

const ROBOTS_TXT: &str = "User-agent: *\nDisallow: /\n";

/// Shared handles for request handlers.
#[derive(Clone)]
pub struct AppState {
    pub tokens: TokenManager,
    pub hub: Arc<BroadcastHub>,
    pub search: Arc<dyn TrackSearch>,
    pub authorize: Arc<AuthorizeRequest>,
    pub login_states: Arc<LoginStates>,
}

impl AppState {
    #[must_use]
    pub fn new(
        tokens: TokenManager,
        hub: Arc<BroadcastHub>,
        search: Arc<dyn TrackSearch>,
        authorize: AuthorizeRequest,
    ) -> Self {
        Self {
            tokens,
            hub,
            search,
            authorize: Arc::new(authorize),
            login_states: Arc::new(LoginStates::default()),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/login", get(login))
        .route("/callback", get(callback))
        .route("/status", get(status))
        .route("/robots.txt", get(robots))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}

async fn index(State(state): State<AppState>) -> Response {
    match state.tokens.has_credential().await {
        Ok(true) => Html(INDEX_HTML).into_response(),
        Ok(false) => (StatusCode::SERVICE_UNAVAILABLE, Html(UNAUTHORIZED_HTML)).into_response(),
        Err(e) => {
            error!("Could not check authorization: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, Html(UNAUTHORIZED_HTML)).into_response()
        }
    }
}

async fn login(State(state): State<AppState>) -> Response {
    let login_state = state.login_states.issue().await;
    match state.authorize.url(&login_state) {
        Ok(url) => Redirect::to(url.as_str()).into_response(),
        Err(e) => {
            error!("Failed to build authorization URL: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// OAuth callback query parameters
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

async fn callback(State(state): State<AppState>, Query(params): Query<CallbackParams>) -> Response {
    let Some(login_state) = params.state else {
        return (StatusCode::BAD_REQUEST, "Missing state parameter").into_response();
    };
    if !state.login_states.consume(login_state).await {
        warn!("Rejected OAuth callback with unknown or expired state");
        return (StatusCode::BAD_REQUEST, "Unknown or expired login attempt").into_response();
    }
    if let Some(error) = params.error {
        warn!("Spotify authorization denied: {}", error);
        return (
            StatusCode::UNAUTHORIZED,
            format!("Authorization denied: {error}"),
        )
            .into_response();
    }
    let Some(code) = params.code else {
        return (StatusCode::UNAUTHORIZED, "Missing authorization code").into_response();
    };

    match state.tokens.complete_authorization(&code).await {
        Ok(_) => {
            info!("Spotify authorization complete");
            Redirect::to("/").into_response()
        }
        Err(TokenError::PersistFailed { reason }) => {
            error!("Authorized, but the credential was not saved: {}", reason);
            Redirect::to("/").into_response()
        }
        Err(e) => {
            error!("OAuth callback failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Authorization failed, try /login again",
            )
                .into_response()
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    ok: bool,
    version: &'static str,
    authorized: bool,
    subscribers: usize,
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let authorized = state.tokens.has_credential().await.unwrap_or(false);
    Json(StatusResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION"),
        authorized,
        subscribers: state.hub.len().await,
    })
}

async fn robots() -> &'static str {
    ROBOTS_TXT
}
