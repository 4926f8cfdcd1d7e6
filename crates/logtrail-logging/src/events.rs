use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Which operation produced a scan event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanKind {
    /// Full scan that reprocesses every changed file
    Full,
    /// Incremental refresh of new and modified files
    Refresh,
}

impl ScanKind {
    fn label(&self) -> &'static str {
        match self {
            ScanKind::Full => "scan",
            ScanKind::Refresh => "refresh",
        }
    }
}

/// Structured log events for the ingestion engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LogEvent {
    ScanStarted {
        kind: ScanKind,
        root: PathBuf,
    },
    ScanCompleted {
        kind: ScanKind,
        total: usize,
        new_count: usize,
        updated_count: usize,
        skipped: usize,
        failed: usize,
        duration_secs: f64,
    },
    /// The projects root does not exist
    NoSessions {
        root: PathBuf,
    },
    SessionDetected {
        session_id: String,
        project_name: String,
        /// `new` or `resumed`
        kind: String,
    },
    /// Live update forwarded by the file watcher
    LiveUpdate {
        session_id: String,
        messages: usize,
    },
    SessionRemoved {
        path: PathBuf,
    },
    WatcherStopped {
        watched: usize,
    },
}

impl LogEvent {
    /// Add a timestamp to serialize with the event
    fn with_timestamp(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "timestamp".to_string(),
                serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
            );
        }
        value
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format with colors
    #[default]
    Pretty,
    /// JSON lines format for machine consumption
    Json,
    /// Compact single-line format
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            _ => Err(format!("Unknown log format: {}", s)),
        }
    }
}

/// Logger for engine events. Writes to stderr and optionally to a JSON lines file.
pub struct Logger {
    format: LogFormat,
    file_writer: Option<Mutex<File>>,
}

impl Logger {
    pub fn new(format: LogFormat) -> Self {
        Self {
            format,
            file_writer: None,
        }
    }

    /// Create a logger with file output in addition to console
    pub fn with_file(format: LogFormat, log_path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        Ok(Self {
            format,
            file_writer: Some(Mutex::new(file)),
        })
    }

    pub fn log(&self, event: &LogEvent) {
        // File output is always JSON
        if let Some(ref writer) = self.file_writer {
            if let Ok(mut file) = writer.lock() {
                let _ = writeln!(file, "{}", event.with_timestamp());
            }
        }

        match self.format {
            LogFormat::Json => self.log_json(event),
            LogFormat::Pretty => self.log_pretty(event),
            LogFormat::Compact => self.log_compact(event),
        }
    }

    fn log_json(&self, event: &LogEvent) {
        if let Ok(json) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{}", json);
        }
    }

    fn log_pretty(&self, event: &LogEvent) {
        let mut stderr = std::io::stderr();
        match event {
            LogEvent::ScanStarted { kind, root } => {
                let _ = writeln!(
                    stderr,
                    "{} {} {}",
                    "▶".bright_cyan(),
                    format!("Starting {}", kind.label()).bright_cyan().bold(),
                    root.display().to_string().dimmed()
                );
            }
            LogEvent::ScanCompleted {
                kind,
                total,
                new_count,
                updated_count,
                skipped,
                failed,
                duration_secs,
            } => {
                let _ = writeln!(
                    stderr,
                    "  {} {} {} files: {} new, {} updated ({:.1}s)",
                    "✓".bright_green(),
                    kind.label(),
                    total,
                    new_count.to_string().green(),
                    updated_count.to_string().yellow(),
                    duration_secs
                );
                if *skipped > 0 || *failed > 0 {
                    let _ = writeln!(
                        stderr,
                        "    {} {} skipped, {} failed",
                        "⚠".bright_yellow(),
                        skipped,
                        failed.to_string().red()
                    );
                }
            }
            LogEvent::NoSessions { root } => {
                let _ = writeln!(
                    stderr,
                    "{} No sessions found: {} does not exist",
                    "⚠".bright_yellow(),
                    root.display()
                );
            }
            LogEvent::SessionDetected {
                session_id,
                project_name,
                kind,
            } => {
                let _ = writeln!(
                    stderr,
                    "  {} {} {} {}",
                    "●".bright_green(),
                    kind.bright_white(),
                    session_id,
                    format!("({})", project_name).dimmed()
                );
            }
            LogEvent::LiveUpdate {
                session_id,
                messages,
            } => {
                let _ = writeln!(
                    stderr,
                    "    {} {} {}",
                    "│".dimmed(),
                    session_id,
                    format!("{} messages", messages).dimmed()
                );
            }
            LogEvent::SessionRemoved { path } => {
                let _ = writeln!(
                    stderr,
                    "  {} removed {}",
                    "✗".bright_red(),
                    path.display().to_string().dimmed()
                );
            }
            LogEvent::WatcherStopped { watched } => {
                let _ = writeln!(
                    stderr,
                    "{} Stopped watching ({} live sessions)",
                    "■".bright_blue(),
                    watched
                );
            }
        }
    }

    fn log_compact(&self, event: &LogEvent) {
        let mut stderr = std::io::stderr();
        let timestamp = chrono::Utc::now().format("%H:%M:%S");
        let msg = match event {
            LogEvent::ScanStarted { kind, .. } => format!("[{}] {}:start", timestamp, kind.label()),
            LogEvent::ScanCompleted {
                kind,
                total,
                new_count,
                updated_count,
                skipped,
                failed,
                duration_secs,
            } => format!(
                "[{}] {}:done total={} new={} updated={} skipped={} failed={} {:.1}s",
                timestamp,
                kind.label(),
                total,
                new_count,
                updated_count,
                skipped,
                failed,
                duration_secs
            ),
            LogEvent::NoSessions { root } => {
                format!("[{}] scan:no-sessions {}", timestamp, root.display())
            }
            LogEvent::SessionDetected {
                session_id, kind, ..
            } => format!("[{}] session:{} {}", timestamp, kind, session_id),
            LogEvent::LiveUpdate {
                session_id,
                messages,
            } => format!("[{}] live:{} {}", timestamp, session_id, messages),
            LogEvent::SessionRemoved { path } => {
                format!("[{}] session:removed {}", timestamp, path.display())
            }
            LogEvent::WatcherStopped { watched } => {
                format!("[{}] watcher:stop {}", timestamp, watched)
            }
        };
        let _ = writeln!(stderr, "{}", msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = LogEvent::ScanCompleted {
            kind: ScanKind::Refresh,
            total: 3,
            new_count: 1,
            updated_count: 1,
            skipped: 0,
            failed: 0,
            duration_secs: 0.5,
        };
        let value = event.with_timestamp();
        assert_eq!(value["event"], "scan_completed");
        assert_eq!(value["kind"], "refresh");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_file_logger_appends_json_lines() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("logs").join("events.jsonl");
        let logger = Logger::with_file(LogFormat::Compact, &path).unwrap();

        logger.log(&LogEvent::NoSessions {
            root: PathBuf::from("/missing"),
        });
        logger.log(&LogEvent::WatcherStopped { watched: 2 });

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "no_sessions");
        assert_eq!(lines[1]["watched"], 2);
    }
}
