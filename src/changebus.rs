//! Process-wide aggregator: collects filesystem changes, debounces them,
//! and matches them against waiting long-poll subscribers (§4.4).

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use tokio::sync::oneshot;

/// Quiet period after the last change before a flush runs.
const DEBOUNCE: Duration = Duration::from_millis(500);

type ChangeSet = HashSet<Utf8PathBuf>;

struct Subscriber {
    id: u64,
    path: Utf8PathBuf,
    depth: u32,
    resolver: Option<oneshot::Sender<ChangeSet>>,
}

struct Inner {
    changes: ChangeSet,
    subscribers: Vec<Subscriber>,
    next_id: u64,
    debounce_generation: u64,
}

pub struct ChangeBus {
    inner: Mutex<Inner>,
}

/// RAII handle returned by [`ChangeBus::register`]. Dropping it — whether
/// because the wait completed, the caller's future was cancelled, or the
/// client disconnected — removes the subscriber if it is still pending.
/// This is how client disconnect (§5 Cancellation) is modeled: axum drops
/// the handler's future when the connection goes away, and that drop runs
/// synchronously here without needing a cooperative cancellation signal.
pub struct Registration {
    bus: Arc<ChangeBus>,
    id: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.bus.cancel(self.id);
    }
}

impl ChangeBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                changes: HashSet::new(),
                subscribers: Vec::new(),
                next_id: 0,
                debounce_generation: 0,
            }),
        })
    }

    /// Registers a pending subscriber for `path`/`depth`. Returns a guard
    /// and the receiving half of its one-shot result slot.
    pub fn register(
        self: &Arc<Self>,
        path: Utf8PathBuf,
        depth: u32,
    ) -> (Registration, oneshot::Receiver<ChangeSet>) {
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut inner = self.inner.lock().expect("change bus poisoned");
            let id = inner.next_id;
            inner.next_id += 1;
            inner.subscribers.push(Subscriber {
                id,
                path,
                depth,
                resolver: Some(tx),
            });
            id
        };

        (
            Registration {
                bus: Arc::clone(self),
                id,
            },
            rx,
        )
    }

    fn cancel(&self, id: u64) {
        let mut inner = self.inner.lock().expect("change bus poisoned");
        inner.subscribers.retain(|s| s.id != id);
    }

    /// Records a change and arms (or re-arms) the debounce timer.
    pub fn post(self: &Arc<Self>, change: Utf8PathBuf) {
        let generation = {
            let mut inner = self.inner.lock().expect("change bus poisoned");
            inner.changes.insert(change);
            inner.debounce_generation += 1;
            inner.debounce_generation
        };

        let bus = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(DEBOUNCE).await;
            bus.maybe_flush(generation);
        });
    }

    /// Runs `flush` only if no further change arrived after this task was
    /// scheduled (i.e. this is the last debounce task for the current
    /// quiet period).
    fn maybe_flush(&self, generation: u64) {
        let mut inner = self.inner.lock().expect("change bus poisoned");
        if inner.debounce_generation != generation {
            return;
        }
        Self::flush_locked(&mut inner);
    }

    fn flush_locked(inner: &mut Inner) {
        if inner.changes.is_empty() {
            return;
        }

        let changes = std::mem::take(&mut inner.changes);
        inner.subscribers.retain_mut(|sub| {
            let matched: ChangeSet = changes
                .iter()
                .filter(|c| matches(&sub.path, sub.depth, c))
                .cloned()
                .collect();

            if matched.is_empty() {
                return true;
            }

            if let Some(resolver) = sub.resolver.take() {
                let _ = resolver.send(matched);
            }
            false
        });
    }

    /// Snapshots the currently pending (not-yet-flushed) changes matching
    /// `path`/`depth`, without consuming them or touching subscribers.
    /// Used for a `timeoutSeconds == 0` SUBSCRIBE, which must return
    /// immediately with whatever is already pending (§3 Subscription).
    pub fn peek(&self, path: &Utf8Path, depth: u32) -> ChangeSet {
        let inner = self.inner.lock().expect("change bus poisoned");
        inner
            .changes
            .iter()
            .filter(|c| matches(path, depth, c))
            .cloned()
            .collect()
    }

    /// Called by the watcher when its OS watch channel dies. Resolves any
    /// subscriber registered on exactly this path with whatever had
    /// already accumulated (possibly empty), and removes them so the next
    /// subscriber re-creates the watch session (§4.3, §7).
    pub fn notify_watch_failure(&self, failed_path: &Utf8Path) {
        let mut inner = self.inner.lock().expect("change bus poisoned");
        let changes = inner.changes.clone();

        inner.subscribers.retain_mut(|sub| {
            if sub.path != failed_path {
                return true;
            }

            let matched: ChangeSet = changes
                .iter()
                .filter(|c| matches(&sub.path, sub.depth, c))
                .cloned()
                .collect();

            if let Some(resolver) = sub.resolver.take() {
                let _ = resolver.send(matched);
            }
            false
        });
    }
}

/// §4.4 `matches(s, c)`.
fn matches(sub_path: &Utf8Path, depth: u32, change: &Utf8Path) -> bool {
    let root = Utf8Path::new(".");
    let is_prefix_match = sub_path == root
        || change == sub_path
        || change.as_str().starts_with(&format!("{sub_path}/"));

    if !is_prefix_match {
        return false;
    }

    if depth == 0 {
        change == sub_path
    } else {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    #[test]
    fn depth_zero_requires_exact_match() {
        let foo = Utf8Path::new("foo");
        assert!(matches(foo, 0, Utf8Path::new("foo")));
        assert!(!matches(foo, 0, Utf8Path::new("foo/bar")));
    }

    #[test]
    fn depth_one_accepts_descendants() {
        let foo = Utf8Path::new("foo");
        assert!(matches(foo, 1, Utf8Path::new("foo")));
        assert!(matches(foo, 1, Utf8Path::new("foo/bar")));
        assert!(matches(foo, 1, Utf8Path::new("foo/bar/baz")));
    }

    #[test]
    fn rejects_sibling_with_shared_prefix() {
        // S6: subscribing to "test" must not match "test-not-equal/file".
        let test = Utf8Path::new("test");
        assert!(!matches(test, 1, Utf8Path::new("test-not-equal/file")));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn resolves_on_matching_change() {
        let bus = ChangeBus::new();
        let (_reg, rx) = bus.register(Utf8PathBuf::from("."), 1);

        bus.post(Utf8PathBuf::from("test.txt"));

        tokio::time::advance(DEBOUNCE + StdDuration::from_millis(10)).await;
        let matched = rx.await.expect("resolved");
        assert!(matched.contains(Utf8Path::new("test.txt")));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn debounces_a_burst_into_one_wake() {
        let bus = ChangeBus::new();
        let (_reg, rx) = bus.register(Utf8PathBuf::from("."), 1);

        for name in ["a.txt", "b.txt", "c.txt"] {
            bus.post(Utf8PathBuf::from(name));
            tokio::time::advance(StdDuration::from_millis(50)).await;
        }

        tokio::time::advance(DEBOUNCE).await;
        let matched = rx.await.expect("resolved");
        assert_eq!(matched.len(), 3);
    }

    #[tokio::test]
    async fn dropping_registration_cancels_it() {
        let bus = ChangeBus::new();
        let (reg, rx) = bus.register(Utf8PathBuf::from("."), 1);
        drop(reg);

        bus.post(Utf8PathBuf::from("test.txt"));
        tokio::time::sleep(DEBOUNCE + StdDuration::from_millis(50)).await;

        // The subscriber was cancelled before the flush; the sender was
        // dropped along with it, so the receiver observes a closed channel.
        assert!(rx.await.is_err());
    }

    #[test]
    fn peek_sees_pending_changes_without_consuming_them() {
        let bus = ChangeBus::new();
        bus.post(Utf8PathBuf::from("test.txt"));

        let matched = bus.peek(Utf8Path::new("."), 1);
        assert!(matched.contains(Utf8Path::new("test.txt")));

        // Peeking doesn't drain the pending set.
        let matched_again = bus.peek(Utf8Path::new("."), 1);
        assert!(matched_again.contains(Utf8Path::new("test.txt")));
    }

    #[test]
    fn peek_respects_depth_and_path_matching() {
        let bus = ChangeBus::new();
        bus.post(Utf8PathBuf::from("foo/bar.txt"));

        assert!(bus.peek(Utf8Path::new("foo"), 0).is_empty());
        assert!(!bus.peek(Utf8Path::new("foo"), 1).is_empty());
        assert!(bus.peek(Utf8Path::new("baz"), 1).is_empty());
    }

    #[test]
    fn unmatched_subscriber_survives_a_flush() {
        let bus_arc = ChangeBus::new();
        let (_reg_a, _rx_a) = bus_arc.register(Utf8PathBuf::from("foo"), 0);
        let (_reg_b, _rx_b) = bus_arc.register(Utf8PathBuf::from("bar"), 0);

        {
            let mut inner = bus_arc.inner.lock().unwrap();
            inner.changes.insert(Utf8PathBuf::from("foo"));
            ChangeBus::flush_locked(&mut inner);
            assert_eq!(inner.subscribers.len(), 1);
            assert_eq!(inner.subscribers[0].path, Utf8PathBuf::from("bar"));
        }
    }
}
