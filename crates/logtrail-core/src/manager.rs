use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::Utc;
use tokio::runtime::Handle;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use logtrail_logging::{LogEvent, Logger, ScanKind};
use logtrail_sessions::{
    classify, project_name_for, scan_directory, session_id_for, KnownPaths, LiveWatcher,
    NotificationSink, ScanOutcome, SessionFile, SessionFilter, SessionKind, SessionStatus,
    SessionStore, SessionUpsert, StoreError, TranscriptParser, WatchConfig,
};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::pricing::PricingLookup;
use crate::report::ScanReport;

/// What happened to one file handed to [`SessionManager::process_file`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Stored session is current; nothing was parsed.
    Unchanged,
    /// Parsed and written to the store.
    Ingested(SessionKind),
    /// Unchanged file reparsed because its stored session had no tokens.
    Recovered,
    /// Another caller is already processing this path.
    Skipped,
}

/// Orchestrates scanning, classification, parsing and store writes.
///
/// Owns the known-paths map and the live watcher; clones share state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: EngineConfig,
    store: Arc<dyn SessionStore>,
    pricing: Arc<dyn PricingLookup>,
    sink: Arc<dyn NotificationSink>,
    watcher: LiveWatcher,
    known: KnownPaths,
    in_flight: Mutex<HashSet<PathBuf>>,
    parser: TranscriptParser,
    logger: Arc<Logger>,
}

/// Releases a path's in-flight slot on drop.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<PathBuf>>,
    path: PathBuf,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        lock_set(self.set).remove(&self.path);
    }
}

fn lock_set(set: &Mutex<HashSet<PathBuf>>) -> MutexGuard<'_, HashSet<PathBuf>> {
    set.lock().unwrap_or_else(|e| e.into_inner())
}

impl SessionManager {
    /// Must be called from within a tokio runtime; live pollers are spawned on it.
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn SessionStore>,
        pricing: Arc<dyn PricingLookup>,
        sink: Arc<dyn NotificationSink>,
        logger: Arc<Logger>,
    ) -> Result<Self, EngineError> {
        let runtime = Handle::try_current()
            .map_err(|e| EngineError::Config(format!("no tokio runtime: {}", e)))?;
        let config = config.normalized();
        let known = KnownPaths::new();
        let parser = TranscriptParser::new().with_preview_chars(config.preview_chars);
        let watcher = LiveWatcher::new(
            sink.clone(),
            known.clone(),
            parser,
            WatchConfig {
                poll_interval: config.poll_interval,
                throttle: config.throttle,
            },
            runtime,
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                store,
                pricing,
                sink,
                watcher,
                known,
                in_flight: Mutex::new(HashSet::new()),
                parser,
                logger,
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.inner.store
    }

    pub fn known_paths(&self) -> &KnownPaths {
        &self.inner.known
    }

    pub fn watcher(&self) -> &LiveWatcher {
        &self.inner.watcher
    }

    /// Reload the known-paths map from the store.
    pub fn load_known_paths(&self) -> Result<usize, EngineError> {
        let known = self.inner.store.known_paths_with_modified_time()?;
        let count = known.len();
        self.inner.known.replace(known);
        debug!(count, "Loaded known session paths");
        Ok(count)
    }

    /// Scan the whole root and reprocess every file whose stored session is
    /// stale or needs recovery.
    pub async fn scan_all(&self) -> Result<ScanReport, EngineError> {
        let started = Instant::now();
        self.log_scan_started(ScanKind::Full);
        self.load_known_paths()?;

        let files = match self.scan().await? {
            ScanOutcome::Found(files) => files,
            ScanOutcome::NoSessions => return Ok(self.no_sessions()),
        };

        let mut report = ScanReport {
            total: files.len(),
            ..Default::default()
        };
        self.process_batches(files, &mut report).await;
        self.log_scan_completed(ScanKind::Full, &report, started);
        Ok(report)
    }

    /// Classify against the known paths and process only new and modified
    /// files, plus unchanged ones whose sessions need recovery.
    pub async fn refresh(&self) -> Result<ScanReport, EngineError> {
        let started = Instant::now();
        self.log_scan_started(ScanKind::Refresh);

        let files = match self.scan().await? {
            ScanOutcome::Found(files) => files,
            ScanOutcome::NoSessions => return Ok(self.no_sessions()),
        };

        let classification = classify(&files, &self.inner.known.snapshot());
        let recovery: HashSet<PathBuf> = self
            .inner
            .store
            .list_sessions(&SessionFilter {
                needs_recovery: true,
                ..Default::default()
            })?
            .into_iter()
            .map(|s| s.file_path)
            .collect();

        let mut candidates: Vec<SessionFile> = classification.changed().cloned().collect();
        candidates.extend(
            classification
                .unchanged
                .into_iter()
                .filter(|f| recovery.contains(&f.path)),
        );

        let mut report = ScanReport {
            total: files.len(),
            ..Default::default()
        };
        self.process_batches(candidates, &mut report).await;
        self.log_scan_completed(ScanKind::Refresh, &report, started);
        Ok(report)
    }

    /// Process one file if its stored session is stale or needs recovery.
    ///
    /// Blocking: reads the file and writes the store.
    pub fn process_file(&self, file: &SessionFile) -> Result<ProcessOutcome, EngineError> {
        let Some(_guard) = self.try_acquire(&file.path) else {
            debug!(path = %file.path.display(), "Already being processed");
            return Ok(ProcessOutcome::Skipped);
        };

        let session_id = session_id_for(&file.path);
        let project_name = project_name_for(&file.path);
        let existing = self.inner.store.get_session(&session_id)?;

        let (kind, recovering) = match &existing {
            None => (SessionKind::New, false),
            Some(session)
                if session.file_modified_time == file.modified_time
                    && session.file_path == file.path =>
            {
                if !session.needs_recovery() {
                    self.inner.known.insert(file.path.clone(), file.modified_time);
                    return Ok(ProcessOutcome::Unchanged);
                }
                (SessionKind::Resumed, true)
            }
            Some(_) => (SessionKind::Resumed, false),
        };

        let parsed = self.inner.parser.parse_file(&file.path);
        let model = parsed.model.clone();
        let cost_usd = if parsed.cost_usd > 0.0 {
            parsed.cost_usd
        } else {
            let as_of = parsed.start_time.unwrap_or_else(Utc::now);
            model
                .as_deref()
                .and_then(|m| self.inner.pricing.get_price(m, as_of))
                .map(|price| price.cost(&parsed.tokens))
                .unwrap_or(0.0)
        };

        let fresh = self.is_fresh(file);
        let upsert = SessionUpsert {
            id: session_id.clone(),
            project_name: project_name.clone(),
            file_path: file.path.clone(),
            start_time: parsed.start_time,
            end_time: parsed.end_time,
            message_count: parsed.message_count(),
            tokens: parsed.tokens,
            cost_usd,
            model,
            status: if fresh {
                SessionStatus::Active
            } else {
                SessionStatus::Idle
            },
            file_modified_time: file.modified_time,
        };

        self.inner.store.ingest_session(
            &upsert,
            &parsed.messages,
            &parsed.tool_usage_counts,
            &parsed.detailed_tool_usage,
        )?;
        self.inner.known.insert(file.path.clone(), file.modified_time);

        debug!(
            session_id = %session_id,
            messages = parsed.messages.len(),
            tokens = parsed.tokens.total(),
            skipped_lines = parsed.skipped_lines,
            "Ingested transcript"
        );

        if recovering {
            return Ok(ProcessOutcome::Recovered);
        }

        if fresh {
            self.inner
                .sink
                .session_detected(&file.path, &project_name, &session_id, kind);
            self.inner.logger.log(&LogEvent::SessionDetected {
                session_id: session_id.clone(),
                project_name,
                kind: kind_label(kind).to_string(),
            });
            self.inner
                .watcher
                .watch_from(file.path.clone(), parsed.bytes_read);
        }

        Ok(ProcessOutcome::Ingested(kind))
    }

    /// Start live-watching a stored session's transcript.
    pub fn watch_session(&self, session_id: &str) -> Result<bool, EngineError> {
        let session = self
            .inner
            .store
            .get_session(session_id)?
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))?;
        Ok(self.inner.watcher.watch(session.file_path))
    }

    /// Drop watched files that no longer exist.
    pub fn sweep(&self) -> Vec<PathBuf> {
        let removed = self.inner.watcher.sweep();
        for path in &removed {
            self.inner
                .logger
                .log(&LogEvent::SessionRemoved { path: path.clone() });
        }
        removed
    }

    /// Stop all live watching. Idempotent.
    pub fn stop(&self) {
        if self.inner.watcher.is_stopped() {
            return;
        }
        let watched = self.inner.watcher.watched_paths().len();
        self.inner.watcher.stop();
        self.inner.logger.log(&LogEvent::WatcherStopped { watched });
    }

    async fn scan(&self) -> Result<ScanOutcome, EngineError> {
        let root = self.inner.config.projects_dir.clone();
        let extension = self.inner.config.extension.clone();
        let outcome = tokio::task::spawn_blocking(move || scan_directory(&root, &extension)).await?;
        Ok(outcome)
    }

    /// Fixed-size batches; files within a batch run concurrently.
    async fn process_batches(&self, files: Vec<SessionFile>, report: &mut ScanReport) {
        for batch in files.chunks(self.inner.config.batch_size) {
            let mut set = JoinSet::new();
            for file in batch.iter().cloned() {
                let manager = self.clone();
                set.spawn_blocking(move || {
                    let result = manager.process_file(&file);
                    (file.path, result)
                });
            }

            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((_, Ok(outcome))) => tally(report, outcome),
                    Ok((path, Err(e))) => {
                        warn!(path = %path.display(), error = %e, "Failed to process transcript");
                        report.failed += 1;
                    }
                    Err(e) => {
                        warn!(error = %e, "Transcript task failed");
                        report.failed += 1;
                    }
                }
            }
        }
    }

    fn try_acquire(&self, path: &Path) -> Option<InFlightGuard<'_>> {
        if !lock_set(&self.inner.in_flight).insert(path.to_path_buf()) {
            return None;
        }
        Some(InFlightGuard {
            set: &self.inner.in_flight,
            path: path.to_path_buf(),
        })
    }

    fn is_fresh(&self, file: &SessionFile) -> bool {
        let age_ms = Utc::now().timestamp_millis() - file.modified_time;
        age_ms < self.inner.config.freshness.as_millis() as i64
    }

    fn no_sessions(&self) -> ScanReport {
        self.inner.logger.log(&LogEvent::NoSessions {
            root: self.inner.config.projects_dir.clone(),
        });
        ScanReport::no_sessions()
    }

    fn log_scan_started(&self, kind: ScanKind) {
        self.inner.logger.log(&LogEvent::ScanStarted {
            kind,
            root: self.inner.config.projects_dir.clone(),
        });
    }

    fn log_scan_completed(&self, kind: ScanKind, report: &ScanReport, started: Instant) {
        info!(
            total = report.total,
            new = report.new_count,
            updated = report.updated_count,
            recovered = report.recovered,
            "Scan complete"
        );
        self.inner.logger.log(&LogEvent::ScanCompleted {
            kind,
            total: report.total,
            new_count: report.new_count,
            updated_count: report.updated_count,
            skipped: report.skipped,
            failed: report.failed,
            duration_secs: started.elapsed().as_secs_f64(),
        });
    }
}

fn tally(report: &mut ScanReport, outcome: ProcessOutcome) {
    match outcome {
        ProcessOutcome::Unchanged => {}
        ProcessOutcome::Ingested(SessionKind::New) => report.new_count += 1,
        ProcessOutcome::Ingested(SessionKind::Resumed) => report.updated_count += 1,
        ProcessOutcome::Recovered => report.recovered += 1,
        ProcessOutcome::Skipped => report.skipped += 1,
    }
}

fn kind_label(kind: SessionKind) -> &'static str {
    match kind {
        SessionKind::New => "new",
        SessionKind::Resumed => "resumed",
    }
}
