use serde::Serialize;

/// Counts produced by one full scan or refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    /// Transcript files found under the root.
    pub total: usize,
    pub new_count: usize,
    pub updated_count: usize,
    /// Unchanged sessions reprocessed because they had messages but no tokens.
    pub recovered: usize,
    /// Files already being processed by another caller.
    pub skipped: usize,
    pub failed: usize,
    /// The projects root does not exist.
    pub no_sessions: bool,
}

impl ScanReport {
    pub fn no_sessions() -> Self {
        Self {
            no_sessions: true,
            ..Default::default()
        }
    }

    /// "N new, M updated"
    pub fn summary(&self) -> String {
        format!("{} new, {} updated", self.new_count, self.updated_count)
    }
}

/// Scheduler state published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScanStatus {
    Idle,
    Scanning,
    Completed { report: ScanReport },
    /// Terminal: the projects root was missing at startup.
    NoSessions,
    Stopped,
}
