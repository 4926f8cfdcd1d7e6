use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::parser::TranscriptParser;
use crate::scanner::{session_id_for, KnownPaths};
use crate::types::Message;

/// Why a session was announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// A transcript seen for the first time.
    New,
    /// A known transcript whose file changed since it was ingested.
    Resumed,
}

/// Events emitted to UI collaborators.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionDetected {
        path: PathBuf,
        project_name: String,
        session_id: String,
        kind: SessionKind,
    },
    /// Live update carrying the full reparsed message list.
    SessionUpdated {
        path: PathBuf,
        session_id: String,
        messages: Vec<Message>,
    },
}

/// Receives session notifications. Delivery is best effort.
pub trait NotificationSink: Send + Sync {
    fn session_detected(&self, path: &Path, project_name: &str, session_id: &str, kind: SessionKind);

    fn session_updated(&self, path: &Path, session_id: &str, messages: &[Message]);
}

/// Fans notifications out to any number of broadcast subscribers.
pub struct BroadcastSink {
    tx: broadcast::Sender<SessionEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(256)
    }
}

impl NotificationSink for BroadcastSink {
    fn session_detected(&self, path: &Path, project_name: &str, session_id: &str, kind: SessionKind) {
        // No subscribers is not an error.
        let _ = self.tx.send(SessionEvent::SessionDetected {
            path: path.to_path_buf(),
            project_name: project_name.to_string(),
            session_id: session_id.to_string(),
            kind,
        });
    }

    fn session_updated(&self, path: &Path, session_id: &str, messages: &[Message]) {
        let _ = self.tx.send(SessionEvent::SessionUpdated {
            path: path.to_path_buf(),
            session_id: session_id.to_string(),
            messages: messages.to_vec(),
        });
    }
}

/// Polling parameters for watched transcripts.
#[derive(Debug, Clone, Copy)]
pub struct WatchConfig {
    /// How often each watched file is stat'ed.
    pub poll_interval: Duration,
    /// Minimum time between two emissions for the same file.
    pub throttle: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            throttle: Duration::from_millis(250),
        }
    }
}

/// Per-file emission limiter.
///
/// Size changes inside the throttle window are remembered and emitted once
/// the window has elapsed.
#[derive(Debug)]
pub struct Throttle {
    min_interval: Duration,
    last_size: u64,
    pending: bool,
    last_emit: Option<Instant>,
}

impl Throttle {
    pub fn new(min_interval: Duration, initial_size: u64) -> Self {
        Self {
            min_interval,
            last_size: initial_size,
            pending: false,
            last_emit: None,
        }
    }

    /// Record an observed size. Returns true when a parse and emission
    /// should happen now.
    pub fn observe(&mut self, size: u64, now: Instant) -> bool {
        if size != self.last_size {
            self.last_size = size;
            self.pending = true;
        }
        if !self.pending {
            return false;
        }
        if let Some(last) = self.last_emit {
            if now.duration_since(last) < self.min_interval {
                return false;
            }
        }
        self.pending = false;
        self.last_emit = Some(now);
        true
    }

    pub fn last_size(&self) -> u64 {
        self.last_size
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }
}

type WatchedMap = Arc<Mutex<HashMap<PathBuf, JoinHandle<()>>>>;

fn lock_watched(watched: &WatchedMap) -> MutexGuard<'_, HashMap<PathBuf, JoinHandle<()>>> {
    watched.lock().unwrap_or_else(|e| e.into_inner())
}

/// Polls fresh or subscribed transcripts and forwards reparsed messages
/// to a [`NotificationSink`].
pub struct LiveWatcher {
    poller: Poller,
    runtime: Handle,
    stop_tx: watch::Sender<bool>,
}

#[derive(Clone)]
struct Poller {
    sink: Arc<dyn NotificationSink>,
    known: KnownPaths,
    parser: TranscriptParser,
    config: WatchConfig,
    watched: WatchedMap,
}

impl LiveWatcher {
    pub fn new(
        sink: Arc<dyn NotificationSink>,
        known: KnownPaths,
        parser: TranscriptParser,
        config: WatchConfig,
        runtime: Handle,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            poller: Poller {
                sink,
                known,
                parser,
                config,
                watched: Arc::new(Mutex::new(HashMap::new())),
            },
            runtime,
            stop_tx,
        }
    }

    /// Start polling `path` from its current size. Returns false if it is
    /// already watched or the watcher has been stopped.
    pub fn watch(&self, path: PathBuf) -> bool {
        let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        self.watch_from(path, size)
    }

    /// Start polling `path`, treating `known_size` as already delivered.
    ///
    /// Callers that just parsed the file pass the size they read so a write
    /// landing before the first poll is still emitted.
    pub fn watch_from(&self, path: PathBuf, known_size: u64) -> bool {
        if self.is_stopped() {
            return false;
        }

        let mut watched = lock_watched(&self.poller.watched);
        if watched.contains_key(&path) {
            return false;
        }

        let poller = self.poller.clone();
        let stop_rx = self.stop_tx.subscribe();
        let task_path = path.clone();
        let handle = self
            .runtime
            .spawn(async move { poller.run(task_path, known_size, stop_rx).await });

        tracing::debug!(path = %path.display(), "Watching transcript");
        watched.insert(path, handle);
        true
    }

    /// Stop polling `path`.
    pub fn unwatch(&self, path: &Path) -> bool {
        match lock_watched(&self.poller.watched).remove(path) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_watching(&self, path: &Path) -> bool {
        lock_watched(&self.poller.watched).contains_key(path)
    }

    pub fn watched_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = lock_watched(&self.poller.watched).keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Unwatch every watched file that no longer exists and drop it from the
    /// known paths. Returns the removed paths.
    pub fn sweep(&self) -> Vec<PathBuf> {
        let missing: Vec<PathBuf> = self
            .watched_paths()
            .into_iter()
            .filter(|p| !p.exists())
            .collect();

        for path in &missing {
            self.unwatch(path);
            self.poller.known.remove(path);
            tracing::info!(path = %path.display(), "Watched transcript removed");
        }

        missing
    }

    /// Stop all pollers. Idempotent; polls already in progress finish but no
    /// further timer firings are acted on.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
        let drained: Vec<PathBuf> = lock_watched(&self.poller.watched)
            .drain()
            .map(|(path, _)| path)
            .collect();
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "Stopped live watchers");
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }
}

impl Drop for LiveWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Poller {
    async fn run(self, path: PathBuf, known_size: u64, mut stop_rx: watch::Receiver<bool>) {
        let session_id = session_id_for(&path);
        let mut throttle = Throttle::new(self.config.throttle, known_size);

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop_rx.changed() => break,
            }
            if *stop_rx.borrow() {
                break;
            }

            let size = match tokio::fs::metadata(&path).await {
                Ok(metadata) => metadata.len(),
                Err(e) => {
                    if self.handle_poll_error(&path, &e).await {
                        break;
                    }
                    continue;
                }
            };

            if !throttle.observe(size, Instant::now()) {
                continue;
            }

            let parser = self.parser;
            let read_path = path.clone();
            let result = tokio::task::spawn_blocking(move || {
                std::fs::read(&read_path).map(|bytes| parser.parse(&String::from_utf8_lossy(&bytes)))
            })
            .await;

            match result {
                Ok(Ok(parsed)) => {
                    tracing::debug!(
                        path = %path.display(),
                        messages = parsed.messages.len(),
                        "Live transcript update"
                    );
                    self.sink.session_updated(&path, &session_id, &parsed.messages);
                }
                Ok(Err(e)) => {
                    if self.handle_poll_error(&path, &e).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Live parse task failed");
                }
            }
        }
    }

    /// Returns true when the file is gone and polling should end.
    async fn handle_poll_error(&self, path: &Path, error: &std::io::Error) -> bool {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            tracing::debug!(path = %path.display(), error = %error, "Transient poll failure");
            return false;
        }

        tracing::info!(path = %path.display(), "Watched transcript removed");
        lock_watched(&self.watched).remove(path);
        self.known.remove(path);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttle_first_change_emits_immediately() {
        let start = Instant::now();
        let mut throttle = Throttle::new(Duration::from_millis(250), 10);
        assert!(!throttle.observe(10, start));
        assert!(throttle.observe(20, start));
        assert_eq!(throttle.last_size(), 20);
    }

    #[test]
    fn test_throttle_coalesces_changes_inside_window() {
        let start = Instant::now();
        let mut throttle = Throttle::new(Duration::from_millis(250), 0);

        let mut emissions = 0;
        if throttle.observe(1, start) {
            emissions += 1;
        }
        for (i, size) in (2..=10).enumerate() {
            if throttle.observe(size, start + Duration::from_millis(10 * (i as u64 + 1))) {
                emissions += 1;
            }
        }
        assert_eq!(emissions, 1);
        assert!(throttle.is_pending());
        assert_eq!(throttle.last_size(), 10);

        // Once the window elapses the last observed size is emitted.
        assert!(throttle.observe(10, start + Duration::from_millis(300)));
        assert!(!throttle.is_pending());
        assert!(!throttle.observe(10, start + Duration::from_millis(600)));
    }

    #[test]
    fn test_broadcast_sink_delivers_events() {
        let sink = BroadcastSink::new(8);
        let mut rx = sink.subscribe();
        sink.session_detected(Path::new("/p/a.jsonl"), "p", "a", SessionKind::New);

        match rx.try_recv().unwrap() {
            SessionEvent::SessionDetected {
                session_id, kind, ..
            } => {
                assert_eq!(session_id, "a");
                assert_eq!(kind, SessionKind::New);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_broadcast_sink_without_subscribers_does_not_fail() {
        let sink = BroadcastSink::default();
        sink.session_updated(Path::new("/p/a.jsonl"), "a", &[]);
    }
}
