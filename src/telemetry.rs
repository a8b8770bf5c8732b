//! Load telemetry sink
//!
//! Observers are fire-and-forget: the registry reports load begin/end
//! and never waits on or fails because of an observer.

use std::fmt;

/// Which kind of resource a load event concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadKind {
    Pack,
    Item,
}

impl fmt::Display for LoadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pack => write!(f, "pack"),
            Self::Item => write!(f, "item"),
        }
    }
}

/// Sink for load lifecycle events.
///
/// `on_load_begin` fires only when a physical load starts; `on_load_end`
/// fires for every request outcome, with `cached = true` when the
/// request was served from an already-loaded entry.
pub trait LoadObserver: Send + Sync {
    fn on_load_begin(&self, _kind: LoadKind, _path: &str, _owner: &str) {}

    #[allow(clippy::too_many_arguments)]
    fn on_load_end(
        &self,
        _kind: LoadKind,
        _path: &str,
        _owner: &str,
        _success: bool,
        _cached: bool,
        _error: Option<&str>,
    ) {
    }
}

/// Discards all events
#[derive(Debug, Default)]
pub struct NullObserver;

impl LoadObserver for NullObserver {}

/// Forwards events to `tracing`
#[derive(Debug, Default)]
pub struct LogObserver;

impl LoadObserver for LogObserver {
    fn on_load_begin(&self, kind: LoadKind, path: &str, owner: &str) {
        tracing::debug!(%kind, path, owner, "load begin");
    }

    fn on_load_end(
        &self,
        kind: LoadKind,
        path: &str,
        owner: &str,
        success: bool,
        cached: bool,
        error: Option<&str>,
    ) {
        if success {
            tracing::debug!(%kind, path, owner, cached, "load end");
        } else {
            tracing::info!(%kind, path, owner, error = error.unwrap_or("unknown"), "load failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        begins: AtomicUsize,
        ends: AtomicUsize,
    }

    impl LoadObserver for Counting {
        fn on_load_begin(&self, _: LoadKind, _: &str, _: &str) {
            self.begins.fetch_add(1, Ordering::SeqCst);
        }
        fn on_load_end(&self, _: LoadKind, _: &str, _: &str, _: bool, _: bool, _: Option<&str>) {
            self.ends.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn observer_methods_default_to_noop() {
        // NullObserver relies entirely on the trait defaults
        NullObserver.on_load_begin(LoadKind::Pack, "p.pack", "");
        NullObserver.on_load_end(LoadKind::Item, "a.bin", "p", false, false, Some("boom"));
    }

    #[test]
    fn custom_observer_receives_events() {
        let obs = Counting {
            begins: AtomicUsize::new(0),
            ends: AtomicUsize::new(0),
        };
        obs.on_load_begin(LoadKind::Pack, "p.pack", "");
        obs.on_load_end(LoadKind::Pack, "p.pack", "", true, false, None);
        assert_eq!(obs.begins.load(Ordering::SeqCst), 1);
        assert_eq!(obs.ends.load(Ordering::SeqCst), 1);
    }
}
