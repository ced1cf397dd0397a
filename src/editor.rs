//! The EDITOR verb (§4.7). Never touches the ChangeBus.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use camino::Utf8PathBuf;

use crate::error::DavError;
use crate::state::AppState;

pub async fn handle(state: &AppState, relative: Utf8PathBuf) -> Result<Response, DavError> {
    let Some(template) = state.config().open_in_editor.as_deref() else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };

    let absolute = state.mapper().to_absolute(&relative);
    let command = template.replace("{}", absolute.as_str());

    tokio::spawn(async move {
        let result = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .spawn();

        match result {
            Ok(mut child) => {
                if let Err(e) = child.wait().await {
                    tracing::warn!(error = %e, command = %command, "editor command failed");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, command = %command, "failed to spawn editor command");
            }
        }
    });

    Ok((StatusCode::FOUND, [("location", "/")]).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn test_state(root: &camino::Utf8Path, open_in_editor: Option<String>) -> AppState {
        AppState::new(Config {
            root: root.to_path_buf(),
            host: "localhost".to_string(),
            port: 7000,
            username: None,
            password: None,
            meta_touch: false,
            debug: false,
            open_in_editor,
            no_auth_warning: true,
        })
    }

    #[tokio::test]
    async fn unconfigured_editor_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let state = test_state(&root, None);

        let response = handle(&state, Utf8PathBuf::from("a.user.js")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn configured_editor_redirects() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let state = test_state(&root, Some("true {}".to_string()));

        let response = handle(&state, Utf8PathBuf::from("a.user.js")).await.unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers().get("location").unwrap(), "/");
    }
}
