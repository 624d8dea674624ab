//! Resource fetching for `readFileSync`/`readFileAsync` and for the module itself.
//!
//! Fetchers are plain blocking functions. Asynchronous reads run a fetcher on a background
//! thread and hand the result back through a [`FetchQueue`]; the bridge delivers completions
//! on the host thread, between ticks.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use thiserror::Error;

#[cfg(feature = "http")]
mod http;
#[cfg(feature = "http")]
pub use http::HttpFetcher;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("resource `{0}` not found")]
    NotFound(String),

    #[error("invalid resource name `{0}`")]
    InvalidName(String),

    #[error("failed to read `{name}`: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("request for `{name}` failed: {message}")]
    Http { name: String, message: String },

    #[error("fetcher panicked while fetching `{0}`")]
    Panicked(String),
}

/// Retrieves named resources, blocking the calling thread.
pub trait ResourceFetcher: Send + Sync {
    fn fetch(&self, name: &str) -> Result<Vec<u8>, FetchError>;
}

/// Serves resources from a directory. Names are relative paths and may not escape the root.
#[derive(Clone, Debug)]
pub struct DirFetcher {
    root: PathBuf,
}

impl DirFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, name: &str) -> Result<PathBuf, FetchError> {
        let relative = Path::new(name);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if name.is_empty() || escapes {
            return Err(FetchError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

impl ResourceFetcher for DirFetcher {
    fn fetch(&self, name: &str) -> Result<Vec<u8>, FetchError> {
        let path = self.resolve(name)?;
        std::fs::read(&path).map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => FetchError::NotFound(name.to_string()),
            _ => FetchError::Io {
                name: name.to_string(),
                source,
            },
        })
    }
}

/// In-memory resources, keyed by name.
#[derive(Clone, Debug, Default)]
pub struct MemoryFetcher {
    resources: HashMap<String, Vec<u8>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(name, bytes);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.resources.insert(name.into(), bytes.into());
    }
}

impl ResourceFetcher for MemoryFetcher {
    fn fetch(&self, name: &str) -> Result<Vec<u8>, FetchError> {
        self.resources
            .get(name)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(name.to_string()))
    }
}

/// Result of one asynchronous fetch.
#[derive(Debug)]
pub struct FetchCompletion {
    pub name: String,
    pub result: Result<Vec<u8>, FetchError>,
}

/// Pending asynchronous fetches and the channel their results arrive on.
pub struct FetchQueue {
    tx: Sender<FetchCompletion>,
    rx: Receiver<FetchCompletion>,
    pending: usize,
}

impl Default for FetchQueue {
    fn default() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx, pending: 0 }
    }
}

impl FetchQueue {
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Start fetching `name` on a background thread. Every spawned fetch produces exactly one
    /// completion, even when the fetcher panics.
    pub fn spawn(&mut self, fetcher: Arc<dyn ResourceFetcher>, name: String) {
        let tx = self.tx.clone();
        self.pending += 1;
        std::thread::spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| fetcher.fetch(&name)))
                .unwrap_or_else(|_| {
                    tracing::error!(%name, "resource fetcher panicked");
                    Err(FetchError::Panicked(name.clone()))
                });
            // The receiver lives as long as the bridge; a send error only means it is gone.
            let _ = tx.send(FetchCompletion { name, result });
        });
    }

    /// Completions that have already arrived.
    pub fn drain_ready(&mut self) -> Vec<FetchCompletion> {
        let ready: Vec<_> = self.rx.try_iter().collect();
        self.pending -= ready.len();
        ready
    }

    /// Wait for the next completion until `deadline`.
    pub fn next_before(&mut self, deadline: Instant) -> Option<FetchCompletion> {
        if self.pending == 0 {
            return None;
        }
        let timeout = deadline.saturating_duration_since(Instant::now());
        match self.rx.recv_timeout(timeout) {
            Ok(completion) => {
                self.pending -= 1;
                Some(completion)
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Wait for a single completion for at most `timeout`.
    pub fn next_within(&mut self, timeout: Duration) -> Option<FetchCompletion> {
        self.next_before(Instant::now() + timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_fetcher_reads_relative_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("assets")).unwrap();
        std::fs::write(dir.path().join("assets/level.bin"), b"level").unwrap();

        let fetcher = DirFetcher::new(dir.path());
        assert_eq!(fetcher.fetch("assets/level.bin").unwrap(), b"level");
        assert_eq!(fetcher.fetch("./assets/level.bin").unwrap(), b"level");
    }

    #[test]
    fn dir_fetcher_rejects_names_escaping_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = DirFetcher::new(dir.path());
        for name in ["../secret", "/etc/passwd", "a/../../b", ""] {
            assert!(
                matches!(fetcher.fetch(name), Err(FetchError::InvalidName(_))),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn dir_fetcher_reports_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = DirFetcher::new(dir.path());
        assert!(matches!(
            fetcher.fetch("missing.bin"),
            Err(FetchError::NotFound(name)) if name == "missing.bin"
        ));
    }

    #[test]
    fn queue_delivers_background_results() {
        let fetcher: Arc<dyn ResourceFetcher> =
            Arc::new(MemoryFetcher::new().with("a", vec![1, 2, 3]));
        let mut queue = FetchQueue::default();
        queue.spawn(fetcher.clone(), "a".to_string());
        queue.spawn(fetcher, "b".to_string());
        assert_eq!(queue.pending(), 2);

        let mut results = Vec::new();
        while let Some(done) = queue.next_within(Duration::from_secs(5)) {
            results.push(done);
        }
        assert_eq!(queue.pending(), 0);
        results.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(results[0].result.as_deref().unwrap(), &[1, 2, 3]);
        assert!(matches!(results[1].result, Err(FetchError::NotFound(_))));
    }

    struct PanickingFetcher;

    impl ResourceFetcher for PanickingFetcher {
        fn fetch(&self, name: &str) -> Result<Vec<u8>, FetchError> {
            panic!("cannot fetch {name}");
        }
    }

    #[test]
    fn panicking_fetcher_still_completes() {
        let mut queue = FetchQueue::default();
        queue.spawn(Arc::new(PanickingFetcher), "boom.bin".to_string());

        let done = queue.next_within(Duration::from_secs(5)).unwrap();
        assert_eq!(queue.pending(), 0);
        assert!(matches!(done.result, Err(FetchError::Panicked(name)) if name == "boom.bin"));
    }

    #[test]
    fn empty_queue_does_not_block() {
        let mut queue = FetchQueue::default();
        assert!(queue.next_within(Duration::from_secs(60)).is_none());
        assert!(queue.drain_ready().is_empty());
    }
}
