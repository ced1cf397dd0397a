//! The SUBSCRIBE verb: a long-poll endpoint backed by [`ChangeBus`](crate::changebus::ChangeBus) (§4.5).

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use camino::Utf8PathBuf;

use crate::error::DavError;
use crate::state::AppState;
use crate::verbs;
use crate::xml::{self, Entry};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const VOID_BUDGET_MAX: u32 = 4;
const IDLE_RECOVERY_GAP: Duration = Duration::from_secs(11);
const CLAMP_CEILING: Duration = Duration::from_secs(10);

/// The client-compatibility rate limiter's process-wide counters (§4.5).
pub struct RateLimiter {
    inner: Mutex<RateLimiterState>,
}

struct RateLimiterState {
    void_budget: u32,
    last_subscribe_at: Option<Instant>,
}

enum Decision {
    /// Proceed with a long-poll, capped at this duration.
    Wait(Duration),
    /// The client has been idle long enough to be treated as a fresh
    /// PROPFIND instead of a long-poll.
    AsPropfind,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RateLimiterState {
                void_budget: VOID_BUDGET_MAX,
                last_subscribe_at: None,
            }),
        }
    }

    /// `requested` is only used as a fallback for a call that reaches the
    /// gap-based branches with no prior subscribe on record — which, since
    /// the void budget starts non-empty, cannot happen on a live server; it
    /// exists so the function is total rather than because it fires.
    fn decide(&self, requested: Duration) -> Decision {
        let now = Instant::now();
        let mut state = self.inner.lock().expect("rate limiter poisoned");
        let gap = state.last_subscribe_at.map(|prev| now.duration_since(prev));
        state.last_subscribe_at = Some(now);

        if state.void_budget > 0 {
            state.void_budget -= 1;
            return Decision::Wait(Duration::ZERO);
        }

        match gap {
            Some(gap) if gap >= IDLE_RECOVERY_GAP => Decision::AsPropfind,
            Some(gap) => Decision::Wait(CLAMP_CEILING.saturating_sub(gap).min(CLAMP_CEILING)),
            None => Decision::Wait(requested),
        }
    }

    fn on_resolved_nonempty(&self) {
        let mut state = self.inner.lock().expect("rate limiter poisoned");
        state.void_budget = VOID_BUDGET_MAX;
    }

    /// Touched by the GET handler: evidence the client is alive, not mid-storm.
    pub fn on_get(&self) {
        let mut state = self.inner.lock().expect("rate limiter poisoned");
        state.void_budget = std::cmp::max(VOID_BUDGET_MAX, state.void_budget.saturating_sub(1));
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn handle(
    state: &AppState,
    relative: Utf8PathBuf,
    depth: u32,
    requested_timeout: Option<Duration>,
) -> Result<Response, DavError> {
    let requested = requested_timeout.unwrap_or(DEFAULT_TIMEOUT);

    match state.rate_limiter().decide(requested) {
        Decision::AsPropfind => verbs::propfind(state, relative, depth).await,
        Decision::Wait(timeout) => {
            let matched = wait_for_change(state, &relative, depth, timeout).await?;
            Ok(build_response(state, matched).await)
        }
    }
}

async fn wait_for_change(
    state: &AppState,
    relative: &Utf8PathBuf,
    depth: u32,
    timeout: Duration,
) -> Result<HashSet<Utf8PathBuf>, DavError> {
    state
        .watcher()
        .ensure_watch(relative, depth != 0)
        .map_err(|e| DavError::Unexpected(e.into()))?;

    // timeoutSeconds == 0: return immediately with whatever is already
    // pending, rather than registering and waiting on a debounce flush
    // that a zero-length timeout could never observe (§3 Subscription).
    if timeout.is_zero() {
        let matched = state.bus().peek(relative, depth);
        if matched.is_empty() || matched.iter().all(is_meta_touch) {
            return Ok(HashSet::new());
        }
        state.rate_limiter().on_resolved_nonempty();
        return Ok(matched);
    }

    let deadline = Instant::now() + timeout;

    loop {
        let (_registration, rx) = state.bus().register(relative.clone(), depth);
        let remaining = deadline.saturating_duration_since(Instant::now());

        let matched = match tokio::time::timeout(remaining, rx).await {
            Ok(Ok(matched)) => matched,
            Ok(Err(_)) | Err(_) => HashSet::new(),
        };

        if matched.is_empty() {
            return Ok(matched);
        }

        if matched.iter().all(is_meta_touch) {
            if Instant::now() >= deadline {
                return Ok(HashSet::new());
            }
            continue;
        }

        state.rate_limiter().on_resolved_nonempty();
        return Ok(matched);
    }
}

fn is_meta_touch(path: &Utf8PathBuf) -> bool {
    path.as_str().ends_with(".meta.json")
}

async fn build_response(state: &AppState, matched: HashSet<Utf8PathBuf>) -> Response {
    if matched.is_empty() {
        return StatusCode::NO_CONTENT.into_response();
    }

    let mut matched = matched;

    if state.config().meta_touch {
        touch_meta_siblings(state, &mut matched).await;
    }

    let mut entries = Vec::with_capacity(matched.len());
    for relative in matched {
        let absolute = state.mapper().to_absolute(&relative);
        entries.push(Entry::stat(relative, &absolute).await);
    }
    entries.sort_by(|a, b| a.relative.cmp(&b.relative));

    let body = xml::build(&entries, None);
    (
        StatusCode::MULTI_STATUS,
        [("content-type", "application/xml; charset=utf-8")],
        body,
    )
        .into_response()
}

/// For every matched `*.user.js`, bumps its sibling `*.meta.json`'s mtime
/// (ignored if missing) and adds it to the result set (§4.5 step 1).
async fn touch_meta_siblings(state: &AppState, matched: &mut HashSet<Utf8PathBuf>) {
    let user_scripts: Vec<Utf8PathBuf> = matched
        .iter()
        .filter(|p| p.as_str().ends_with(".user.js"))
        .cloned()
        .collect();

    for script in user_scripts {
        let Some(stem) = script.as_str().strip_suffix(".user.js") else {
            continue;
        };
        let meta_relative = Utf8PathBuf::from(format!("{stem}.meta.json"));
        let meta_absolute = state.mapper().to_absolute(&meta_relative);

        let now = filetime::FileTime::now();
        let meta_absolute_clone = meta_absolute.clone();
        let touched = tokio::task::spawn_blocking(move || {
            filetime::set_file_times(&meta_absolute_clone, now, now).is_ok()
        })
        .await
        .unwrap_or(false);

        if touched {
            matched.insert(meta_relative);
        }
    }
}
