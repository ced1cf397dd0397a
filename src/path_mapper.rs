//! Normalizes request URL paths to root-relative paths, and back.
//!
//! Every relative path in the rest of the system uses `/` as the separator
//! regardless of the host OS; conversion to an OS path only happens in
//! [`PathMapper::to_absolute`].

use camino::{Utf8Path, Utf8PathBuf};
use percent_encoding::percent_decode_str;

use crate::error::PathError;

#[derive(Debug, Clone)]
pub struct PathMapper {
    root: Utf8PathBuf,
}

impl PathMapper {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Normalizes a request path (as taken raw from the URL) into a
    /// root-relative path. The path is percent-decoded first; a sequence
    /// that decodes to invalid UTF-8 is rejected. `.` and `..` segments are
    /// then collapsed without touching the filesystem; a result that would
    /// escape the root is rejected.
    pub fn to_relative(&self, url_path: &str) -> Result<Utf8PathBuf, PathError> {
        let decoded = percent_decode_str(url_path)
            .decode_utf8()
            .map_err(|_| PathError::NotUtf8(url_path.to_string()))?;
        let trimmed = decoded.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Utf8PathBuf::from("."));
        }

        let mut stack: Vec<&str> = Vec::new();
        for segment in trimmed.split('/') {
            match segment {
                "" | "." => continue,
                ".." => {
                    if stack.pop().is_none() {
                        return Err(PathError::Traversal(url_path.to_string()));
                    }
                }
                seg => stack.push(seg),
            }
        }

        if stack.is_empty() {
            return Ok(Utf8PathBuf::from("."));
        }

        Ok(Utf8PathBuf::from(stack.join("/")))
    }

    /// Maps a root-relative path (as produced by [`Self::to_relative`]) to
    /// an absolute filesystem path.
    pub fn to_absolute(&self, relative: &Utf8Path) -> Utf8PathBuf {
        if relative == Utf8Path::new(".") {
            self.root.clone()
        } else {
            self.root.join(relative)
        }
    }

    /// The relative path's `href` form: leading slash, POSIX separators,
    /// `.` rendered as `/`.
    pub fn to_href(relative: &Utf8Path) -> String {
        if relative == Utf8Path::new(".") {
            "/".to_string()
        } else {
            format!("/{relative}")
        }
    }
}
