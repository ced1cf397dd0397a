//! One filesystem-watch session per subscribed subtree.
//!
//! Sessions are identified by `(path, recursive)` and live for the process
//! lifetime once created (§3 Watcher session). Events are filtered down to
//! the kinds that imply a content change, converted to root-relative POSIX
//! paths, and forwarded to the [`ChangeBus`](crate::changebus::ChangeBus).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};

use crate::changebus::ChangeBus;
use crate::error::WatchError;
use crate::path_mapper::PathMapper;

/// Key identifying one watch session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SessionKey {
    path: Utf8PathBuf,
    recursive: bool,
}

struct Session {
    // Keeps the OS watch alive; never read again after creation.
    _watcher: RecommendedWatcher,
}

/// Registry of live watch sessions, shared process-wide.
pub struct WatcherRegistry {
    mapper: PathMapper,
    bus: Arc<ChangeBus>,
    sessions: Mutex<HashMap<SessionKey, Session>>,
}

impl WatcherRegistry {
    pub fn new(mapper: PathMapper, bus: Arc<ChangeBus>) -> Arc<Self> {
        Arc::new(Self {
            mapper,
            bus,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Starts a watch on `relative` if one doesn't already exist for this
    /// `(path, recursive)` pair. Idempotent.
    pub fn ensure_watch(
        self: &Arc<Self>,
        relative: &Utf8Path,
        recursive: bool,
    ) -> Result<(), WatchError> {
        let key = SessionKey {
            path: relative.to_path_buf(),
            recursive,
        };

        let mut sessions = self.sessions.lock().expect("watcher registry poisoned");
        if sessions.contains_key(&key) {
            return Ok(());
        }

        let absolute = self.mapper.to_absolute(relative);
        let registry = Arc::clone(self);
        let watch_relative = relative.to_path_buf();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => registry.on_event(event),
                Err(err) => {
                    tracing::warn!(path = %watch_relative, error = %err, "watch channel failed");
                    registry.bus.notify_watch_failure(&watch_relative);
                }
            }
        })
        .map_err(WatchError::Create)?;

        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };

        watcher
            .watch(absolute.as_std_path(), mode)
            .map_err(|e| WatchError::Watch(absolute.clone(), e))?;

        tracing::info!(path = %relative, recursive, "watching");
        sessions.insert(key, Session { _watcher: watcher });
        Ok(())
    }

    pub fn has_session(&self, relative: &Utf8Path) -> bool {
        let sessions = self.sessions.lock().expect("watcher registry poisoned");
        sessions
            .keys()
            .any(|key| key.path.as_path() == relative)
    }

    fn on_event(&self, event: Event) {
        if is_trivial(&event.kind) {
            return;
        }

        for absolute in event.paths {
            let Some(absolute) = Utf8PathBuf::from_path_buf(absolute).ok() else {
                continue;
            };
            let Ok(relative) = absolute.strip_prefix(self.mapper.root()) else {
                continue;
            };
            self.bus.post(relative.to_path_buf());
        }
    }
}

/// Kinds meaning "no content change": access-only, catch-all, and unknown
/// events are dropped (§4.3).
fn is_trivial(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Access(_) | EventKind::Other | EventKind::Any)
}
