//! Suppression set — paths the transfer engine just materialized.
//!
//! The watcher consults this set before turning a filesystem event
//! into an upload, which is what breaks the echo loop: receive file,
//! watcher sees the write, file gets sent straight back.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use ferry_core::limits::SUPPRESS_WINDOW;

pub struct SuppressionSet {
    paths: Arc<DashMap<String, Instant>>,
    window: Duration,
}

impl Default for SuppressionSet {
    fn default() -> Self {
        Self::new()
    }
}

impl SuppressionSet {
    pub fn new() -> Self {
        Self::with_window(SUPPRESS_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            paths: Arc::new(DashMap::new()),
            window,
        }
    }

    /// Record a just-materialized path. A short-lived task removes the
    /// entry once the window elapses.
    pub fn insert(&self, path: &str) {
        self.paths.insert(path.to_string(), Instant::now() + self.window);
        let paths = self.paths.clone();
        let window = self.window;
        let key = path.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            // Only drop the entry if it was not refreshed meanwhile.
            paths.remove_if(&key, |_, expiry| Instant::now() >= *expiry);
        });
    }

    /// Whether events for this path should be ignored right now.
    pub fn contains(&self, path: &str) -> bool {
        self.paths
            .get(path)
            .is_some_and(|expiry| Instant::now() < *expiry)
    }
}

impl Clone for SuppressionSet {
    fn clone(&self) -> Self {
        Self {
            paths: self.paths.clone(),
            window: self.window,
        }
    }
}
