use std::path::PathBuf;
use std::time::Duration;

use logtrail_sessions::{DEFAULT_PREVIEW_CHARS, TRANSCRIPT_EXTENSION};

const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Tunables for scanning, ingestion and live watching.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Root holding one directory per project.
    pub projects_dir: PathBuf,
    /// Transcript file extension, without the dot.
    pub extension: String,
    /// Period of the scheduler's refresh.
    pub scan_interval: Duration,
    /// Stat interval for live-watched files.
    pub poll_interval: Duration,
    /// Minimum time between two live updates for one file.
    pub throttle: Duration,
    /// Files modified within this window count as live.
    pub freshness: Duration,
    /// Files processed concurrently per batch.
    pub batch_size: usize,
    /// Characters kept from tool results.
    pub preview_chars: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            projects_dir: default_projects_dir(),
            extension: TRANSCRIPT_EXTENSION.to_string(),
            scan_interval: Duration::from_secs(60),
            poll_interval: Duration::from_millis(250),
            throttle: Duration::from_millis(250),
            freshness: Duration::from_secs(5 * 60),
            batch_size: 20,
            preview_chars: DEFAULT_PREVIEW_CHARS,
        }
    }
}

impl EngineConfig {
    pub fn new(projects_dir: PathBuf) -> Self {
        Self {
            projects_dir,
            ..Default::default()
        }
    }

    /// Clamp values that would stall or spin the engine.
    pub fn normalized(mut self) -> Self {
        self.batch_size = self.batch_size.max(1);
        self.scan_interval = self.scan_interval.max(MIN_INTERVAL);
        self.poll_interval = self.poll_interval.max(MIN_INTERVAL);
        self.extension = self.extension.trim_start_matches('.').to_string();
        if self.extension.is_empty() {
            self.extension = TRANSCRIPT_EXTENSION.to_string();
        }
        self
    }
}

/// `~/.claude/projects`, where the assistant writes its transcripts.
pub fn default_projects_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".claude")
        .join("projects")
}
