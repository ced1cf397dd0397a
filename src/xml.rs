//! Builds WebDAV `multistatus` documents.
//!
//! One document is built per response; see §4.2 for the exact shape.

use std::fmt::Write as _;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};

use crate::path_mapper::PathMapper;

/// A single filesystem entry about to be rendered as a `<d:response>`.
#[derive(Debug, Clone)]
pub struct Entry {
    /// Root-relative path.
    pub relative: Utf8PathBuf,
    pub is_dir: bool,
    /// -1 when the stat failed.
    pub size: i64,
    pub mtime: DateTime<Utc>,
}

impl Entry {
    /// Stats `absolute` and builds the entry. On stat failure the entry is
    /// still produced, with `size = -1` and `mtime = now` (§4.2, §7 IOError).
    pub async fn stat(relative: Utf8PathBuf, absolute: &Utf8Path) -> Self {
        match tokio::fs::metadata(absolute).await {
            Ok(meta) => Entry {
                relative,
                is_dir: meta.is_dir(),
                size: if meta.is_dir() { 0 } else { meta.len() as i64 },
                mtime: meta
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now()),
            },
            Err(_) => Entry {
                relative,
                is_dir: false,
                size: -1,
                mtime: Utc::now(),
            },
        }
    }
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn iso8601(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Builds the `multistatus` document for a set of entries, with an
/// optional `<td:cursor>` trailer.
pub fn build(entries: &[Entry], cursor: Option<u64>) -> String {
    let mut out = String::with_capacity(256 + entries.len() * 192);

    out.push_str("<?xml version=\"1.0\"?>\n");
    out.push_str(
        "<d:multistatus xmlns:d=\"DAV:\" xmlns:td=\"http://dav.tampermonkey.net/ns\">\n",
    );

    for entry in entries {
        let href = escape(&PathMapper::to_href(&entry.relative));
        let last_modified = iso8601(entry.mtime);

        out.push_str("  <d:response>\n");
        let _ = writeln!(out, "    <d:href>{href}</d:href>");
        let _ = writeln!(out, "    <d:getlastmodified>{last_modified}</d:getlastmodified>");

        if entry.is_dir {
            out.push_str("    <d:resourcetype><d:collection/></d:resourcetype>\n");
            out.push_str("    <d:getcontentlength />\n");
        } else {
            out.push_str("    <d:resourcetype />\n");
            let _ = writeln!(out, "    <d:getcontentlength>{}</d:getcontentlength>", entry.size);
        }

        out.push_str("  </d:response>\n");
    }

    if let Some(cursor) = cursor {
        let _ = writeln!(out, "  <td:cursor>{cursor}</td:cursor>");
    }

    out.push_str("</d:multistatus>\n");
    out
}

/// Builds a minimal DAV error document, used for the MKCOL-already-exists
/// 405 response (§7).
pub fn error_document(condition: &str, path: &Utf8Path) -> String {
    format!(
        "<?xml version=\"1.0\"?>\n<d:error xmlns:d=\"DAV:\">\n  <d:{condition}/>\n  <d:message>{}</d:message>\n</d:error>\n",
        escape(&format!("{path}"))
    )
}
