//! Method dispatch and ambient response headers (§4.6, §6, §7).
//!
//! Custom verbs (PROPFIND, MKCOL, SUBSCRIBE, EDITOR) aren't in axum's
//! standard method set, so the whole tree is served by a single fallback
//! that dispatches on the raw method string.

use std::time::{Duration, Instant};

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::auth;
use crate::editor;
use crate::error::DavError;
use crate::state::AppState;
use crate::subscribe;
use crate::verbs;

pub fn router(state: AppState) -> Router {
    Router::new()
        .fallback(dispatch)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
    let start = Instant::now();
    let method = request.method().as_str().to_string();

    let (parts, body) = request.into_parts();

    if let Err(e) = auth::check(state.config(), &parts.headers) {
        let response = e.into_response();
        log_request(&state, &method, parts.uri.path(), response.status(), start);
        return with_ambient_headers(response);
    }

    let relative = match state.mapper().to_relative(parts.uri.path()) {
        Ok(relative) => relative,
        Err(e) => {
            let response = DavError::from(e).into_response();
            log_request(&state, &method, parts.uri.path(), response.status(), start);
            return with_ambient_headers(response);
        }
    };

    // §6: depth 0 means self only, anything else (including the standard
    // `infinity`) means recursive. Absent header defaults to self-only.
    let depth = match parts.headers.get("depth").and_then(|v| v.to_str().ok()) {
        Some("0") => 0,
        Some(_) => 1,
        None => 0,
    };

    let result: Result<Response, DavError> = match method.as_str() {
        "OPTIONS" => Ok(verbs::options(state.config().open_in_editor.is_some())),
        "PROPFIND" => verbs::propfind(&state, relative, depth).await,
        "GET" => {
            state.rate_limiter().on_get();
            verbs::get(&state, relative).await
        }
        "HEAD" => verbs::head(&state, relative).await,
        "PUT" => match to_bytes(body).await {
            Ok(bytes) => verbs::put(&state, relative, &parts.headers, bytes).await,
            Err(e) => Err(e),
        },
        "MKCOL" => verbs::mkcol(&state, relative).await,
        "DELETE" => verbs::delete(&state, relative).await,
        "SUBSCRIBE" => {
            let timeout = parts
                .headers
                .get("timeout")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            subscribe::handle(&state, relative, depth, timeout).await
        }
        "EDITOR" => editor::handle(&state, relative).await,
        _ => Ok(StatusCode::METHOD_NOT_ALLOWED.into_response()),
    };

    let response = result.unwrap_or_else(|e| e.into_response());
    log_request(&state, &method, parts.uri.path(), response.status(), start);
    with_ambient_headers(response)
}

async fn to_bytes(body: Body) -> Result<Bytes, DavError> {
    axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| DavError::Unexpected(e.into()))
}

fn with_ambient_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        "cache-control",
        HeaderValue::from_static("no-store, no-cache, must-revalidate, post-check=0, pre-check=0"),
    );
    headers.insert("dav", HeaderValue::from_static("1"));
    response
}

fn log_request(state: &AppState, method: &str, path: &str, status: StatusCode, start: Instant) {
    let elapsed_ms = start.elapsed().as_millis() as u64;
    if state.config().debug {
        tracing::debug!(method, path, %status, elapsed_ms, "request");
    } else {
        tracing::info!(method, path, %status, elapsed_ms, "request");
    }
}
