use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors surfaced by [`crate::path_mapper`].
#[derive(Debug, Error)]
pub enum PathError {
    #[error("path `{0}` escapes the storage root")]
    Traversal(String),

    #[error("path `{0}` is not valid UTF-8")]
    NotUtf8(String),
}

/// Errors surfaced by the verb handlers ([`crate::verbs`], [`crate::subscribe`], [`crate::editor`]).
#[derive(Debug, Error)]
pub enum DavError {
    #[error("invalid path: {0}")]
    InvalidPath(#[from] PathError),

    #[error("not found: {0}")]
    NotFound(Utf8PathBuf),

    #[error("already exists: {0}")]
    AlreadyExists(Utf8PathBuf),

    #[error("target is a directory: {0}")]
    IsADirectory(Utf8PathBuf),

    #[error("unauthorized")]
    Unauthorized,

    #[error("request cancelled")]
    Cancelled,

    #[error("unexpected error: {0}")]
    Unexpected(#[from] anyhow::Error),
}

impl IntoResponse for DavError {
    fn into_response(self) -> Response {
        match self {
            DavError::InvalidPath(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
            DavError::NotFound(path) => {
                (StatusCode::NOT_FOUND, format!("not found: {path}")).into_response()
            }
            DavError::AlreadyExists(path) => {
                let body = crate::xml::error_document("MethodNotAllowed", &path);
                (
                    StatusCode::METHOD_NOT_ALLOWED,
                    [("content-type", "application/xml; charset=utf-8")],
                    body,
                )
                    .into_response()
            }
            DavError::IsADirectory(path) => {
                (StatusCode::BAD_REQUEST, format!("is a directory: {path}")).into_response()
            }
            DavError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                [("www-authenticate", "Basic realm=\"Enter credentials\"")],
                "unauthorized",
            )
                .into_response(),
            // The client has already disconnected by the time this would be observed;
            // this arm only exists so the type is total.
            DavError::Cancelled => StatusCode::from_u16(499)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
                .into_response(),
            DavError::Unexpected(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
            }
        }
    }
}

/// Errors surfaced by [`crate::watcher`].
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to watch `{0}`: {1}")]
    Watch(Utf8PathBuf, notify::Error),

    #[error("failed to create watcher: {0}")]
    Create(notify::Error),
}
