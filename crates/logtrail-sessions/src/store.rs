use std::collections::HashMap;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::{
    DetailedToolUsageEntry, Message, Session, SessionFilter, SessionUpsert, ToolUsageCounts,
};

/// Errors raised by a session store backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Session not found: {0}")]
    NotFound(String),
}

/// Persistent session storage consumed by the ingestion engine.
///
/// The engine only writes the fields carried by [`SessionUpsert`]; anything
/// else on a stored session belongs to other collaborators.
pub trait SessionStore: Send + Sync {
    /// Insert a session or update the engine-owned fields of an existing one.
    fn upsert_session(&self, session: &SessionUpsert) -> Result<(), StoreError>;

    /// Replace the full message list of a session.
    fn replace_messages(&self, session_id: &str, messages: &[Message]) -> Result<(), StoreError>;

    fn get_session(&self, session_id: &str) -> Result<Option<Session>, StoreError>;

    fn replace_tool_usage_counts(
        &self,
        session_id: &str,
        counts: &ToolUsageCounts,
    ) -> Result<(), StoreError>;

    fn replace_detailed_tool_usage(
        &self,
        session_id: &str,
        entries: &[DetailedToolUsageEntry],
    ) -> Result<(), StoreError>;

    /// Every ingested transcript path with the modified time it was ingested at.
    fn known_paths_with_modified_time(&self) -> Result<HashMap<PathBuf, i64>, StoreError>;

    fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>, StoreError>;

    /// Write everything derived from one parse of a transcript.
    ///
    /// The session row carries `file_modified_time`, so it is written
    /// last: a failure part way leaves the old mtime in place and the file
    /// is reprocessed on the next scan. Backends with transactions should
    /// override this to commit all four writes at once.
    fn ingest_session(
        &self,
        session: &SessionUpsert,
        messages: &[Message],
        counts: &ToolUsageCounts,
        entries: &[DetailedToolUsageEntry],
    ) -> Result<(), StoreError> {
        self.replace_messages(&session.id, messages)?;
        self.replace_tool_usage_counts(&session.id, counts)?;
        self.replace_detailed_tool_usage(&session.id, entries)?;
        self.upsert_session(session)
    }
}
