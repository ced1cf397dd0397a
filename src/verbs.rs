//! PROPFIND / GET / PUT / MKCOL / DELETE / HEAD / OPTIONS (§4.6).
//!
//! Straight filesystem operations; only PROPFIND and MKCOL build an XML
//! body, and none of these touch the change bus directly (the watcher
//! picks up the resulting filesystem events on its own).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use camino::{Utf8Path, Utf8PathBuf};

use crate::error::DavError;
use crate::state::AppState;
use crate::xml::{self, Entry};

static CURSOR: AtomicU64 = AtomicU64::new(0);

const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

pub async fn propfind(
    state: &AppState,
    relative: Utf8PathBuf,
    depth: u32,
) -> Result<Response, DavError> {
    let absolute = state.mapper().to_absolute(&relative);
    let meta = tokio::fs::metadata(&absolute)
        .await
        .map_err(|_| DavError::NotFound(relative.clone()))?;

    let mut entries = vec![Entry::stat(relative.clone(), &absolute).await];

    if depth != 0 && meta.is_dir() {
        walk(&absolute, &relative, &mut entries).await?;
    }

    let cursor = state
        .watcher()
        .has_session(&relative)
        .then(|| CURSOR.fetch_add(1, Ordering::Relaxed));

    let body = xml::build(&entries, cursor);
    Ok((
        StatusCode::MULTI_STATUS,
        [("content-type", XML_CONTENT_TYPE)],
        body,
    )
        .into_response())
}

fn walk<'a>(
    absolute_dir: &'a Utf8Path,
    relative_dir: &'a Utf8Path,
    entries: &'a mut Vec<Entry>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), DavError>> + Send + 'a>> {
    Box::pin(async move {
        let mut read_dir = tokio::fs::read_dir(absolute_dir)
            .await
            .map_err(|e| DavError::Unexpected(e.into()))?;

        while let Some(child) = read_dir
            .next_entry()
            .await
            .map_err(|e| DavError::Unexpected(e.into()))?
        {
            let name = child.file_name();
            let Some(name) = name.to_str() else { continue };

            let child_relative = if relative_dir == Utf8Path::new(".") {
                Utf8PathBuf::from(name)
            } else {
                relative_dir.join(name)
            };
            let child_absolute = absolute_dir.join(name);

            let is_dir = child
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);

            entries.push(Entry::stat(child_relative.clone(), &child_absolute).await);

            if is_dir {
                walk(&child_absolute, &child_relative, entries).await?;
            }
        }

        Ok(())
    })
}

pub async fn get(state: &AppState, relative: Utf8PathBuf) -> Result<Response, DavError> {
    let absolute = state.mapper().to_absolute(&relative);
    let meta = tokio::fs::metadata(&absolute)
        .await
        .map_err(|_| DavError::NotFound(relative.clone()))?;

    if meta.is_dir() {
        return Err(DavError::IsADirectory(relative));
    }

    let bytes = tokio::fs::read(&absolute)
        .await
        .map_err(|e| DavError::Unexpected(e.into()))?;

    Ok((
        StatusCode::OK,
        [("content-type", "application/octet-stream")],
        bytes,
    )
        .into_response())
}

pub async fn head(state: &AppState, relative: Utf8PathBuf) -> Result<Response, DavError> {
    let absolute = state.mapper().to_absolute(&relative);
    let meta = tokio::fs::metadata(&absolute)
        .await
        .map_err(|_| DavError::NotFound(relative))?;

    Ok((
        StatusCode::OK,
        [
            ("content-type", "application/octet-stream".to_string()),
            ("content-length", meta.len().to_string()),
        ],
    )
        .into_response())
}

pub async fn put(
    state: &AppState,
    relative: Utf8PathBuf,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, DavError> {
    let absolute = state.mapper().to_absolute(&relative);

    if let Some(parent) = absolute.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DavError::Unexpected(e.into()))?;
    }

    tokio::fs::write(&absolute, &body)
        .await
        .map_err(|e| DavError::Unexpected(e.into()))?;

    let mut response_headers = Vec::new();

    if let Some(mtime) = headers
        .get("x-oc-mtime")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<f64>().ok())
    {
        let time = SystemTime::UNIX_EPOCH + Duration::from_secs_f64(mtime);
        let filetime = filetime::FileTime::from_system_time(time);
        let absolute = absolute.clone();
        tokio::task::spawn_blocking(move || filetime::set_file_times(&absolute, filetime, filetime))
            .await
            .map_err(|e| DavError::Unexpected(e.into()))?
            .map_err(|e| DavError::Unexpected(e.into()))?;
        response_headers.push(("x-oc-mtime", "accepted"));
    }

    Ok((StatusCode::OK, response_headers).into_response())
}

pub async fn mkcol(state: &AppState, relative: Utf8PathBuf) -> Result<Response, DavError> {
    let absolute = state.mapper().to_absolute(&relative);

    match tokio::fs::create_dir(&absolute).await {
        Ok(()) => propfind(state, relative, 0).await,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(DavError::AlreadyExists(relative))
        }
        Err(e) => Err(DavError::Unexpected(e.into())),
    }
}

pub async fn delete(state: &AppState, relative: Utf8PathBuf) -> Result<Response, DavError> {
    let absolute = state.mapper().to_absolute(&relative);
    let meta = tokio::fs::metadata(&absolute)
        .await
        .map_err(|_| DavError::NotFound(relative.clone()))?;

    let result = if meta.is_dir() {
        tokio::fs::remove_dir_all(&absolute).await
    } else {
        tokio::fs::remove_file(&absolute).await
    };

    result.map_err(|e| DavError::Unexpected(e.into()))?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub fn options(debug_editor: bool) -> Response {
    let methods = if debug_editor {
        "GET,HEAD,OPTIONS,PUT,PROPFIND,MKCOL,DELETE,SUBSCRIBE,EDITOR"
    } else {
        "GET,HEAD,OPTIONS,PUT,PROPFIND,MKCOL,DELETE,SUBSCRIBE"
    };

    (
        StatusCode::OK,
        [
            ("access-control-allow-methods", methods),
            ("access-control-allow-credentials", "true"),
            (
                "access-control-allow-headers",
                "Authorization, Content-Type, Depth, Timeout, Cursor, X-OC-Mtime",
            ),
        ],
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn test_state(root: &camino::Utf8Path) -> AppState {
        AppState::new(Config {
            root: root.to_path_buf(),
            host: "localhost".to_string(),
            port: 7000,
            username: None,
            password: None,
            meta_touch: false,
            debug: false,
            open_in_editor: None,
            no_auth_warning: true,
        })
    }

    #[tokio::test]
    async fn propfind_empty_root_has_only_self_entry() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let state = test_state(&root);

        let response = propfind(&state, Utf8PathBuf::from("."), 1).await.unwrap();
        assert_eq!(response.status(), StatusCode::MULTI_STATUS);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert_eq!(body.matches("<d:response>").count(), 1);
        assert!(body.contains("<d:href>/</d:href>"));
    }

    #[tokio::test]
    async fn propfind_lists_file_with_size() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("test.txt"), b"Hello, world!").unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let state = test_state(&root);

        let response = propfind(&state, Utf8PathBuf::from("."), 1).await.unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("<d:href>/test.txt</d:href>"));
        assert!(body.contains("<d:getcontentlength>13</d:getcontentlength>"));
    }

    #[tokio::test]
    async fn propfind_missing_target_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let state = test_state(&root);

        let err = propfind(&state, Utf8PathBuf::from("missing"), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, DavError::NotFound(_)));
    }

    #[tokio::test]
    async fn put_then_get_roundtrips_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let state = test_state(&root);

        let headers = HeaderMap::new();
        put(
            &state,
            Utf8PathBuf::from("a.txt"),
            &headers,
            Bytes::from_static(b"hello"),
        )
        .await
        .unwrap();

        let response = get(&state, Utf8PathBuf::from("a.txt")).await.unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"hello");
    }

    #[tokio::test]
    async fn get_on_directory_is_400() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let state = test_state(&root);

        let err = get(&state, Utf8PathBuf::from("sub")).await.unwrap_err();
        assert!(matches!(err, DavError::IsADirectory(_)));
    }

    #[tokio::test]
    async fn mkcol_twice_is_405() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let state = test_state(&root);

        mkcol(&state, Utf8PathBuf::from("sub")).await.unwrap();
        let err = mkcol(&state, Utf8PathBuf::from("sub")).await.unwrap_err();
        assert!(matches!(err, DavError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn delete_missing_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let state = test_state(&root);

        let err = delete(&state, Utf8PathBuf::from("missing")).await.unwrap_err();
        assert!(matches!(err, DavError::NotFound(_)));
    }

    #[tokio::test]
    async fn put_honors_x_oc_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let state = test_state(&root);

        let mut headers = HeaderMap::new();
        headers.insert("x-oc-mtime", "1000000000".parse().unwrap());

        let response = put(
            &state,
            Utf8PathBuf::from("a.txt"),
            &headers,
            Bytes::from_static(b"hi"),
        )
        .await
        .unwrap();
        assert_eq!(
            response.headers().get("x-oc-mtime").unwrap(),
            "accepted"
        );

        let meta = std::fs::metadata(dir.path().join("a.txt")).unwrap();
        let modified = meta.modified().unwrap();
        let seconds = modified
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        assert_eq!(seconds, 1_000_000_000);
    }
}
