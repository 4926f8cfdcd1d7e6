//! Database layer for logtrail.
//!
//! Provides a `Database` struct that owns the SQLite connection and
//! implements the engine's [`SessionStore`] on top of it.

mod sessions;

pub use sessions::Sessions;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use logtrail_sessions::{
    DetailedToolUsageEntry, Message, Session, SessionFilter, SessionStore, SessionUpsert,
    StoreError, ToolUsageCounts,
};
use rusqlite::Connection;

/// The main database struct that owns the SQLite connection.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the default location.
    ///
    /// The default location is `~/.local/share/logtrail/logtrail.db`.
    pub fn open() -> Result<Self, rusqlite::Error> {
        Self::open_at(&Self::default_path())
    }

    /// Open or create a database at a specific path.
    pub fn open_at(path: &Path) -> Result<Self, rusqlite::Error> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Get the default database path.
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("logtrail")
            .join("logtrail.db")
    }

    /// Access the sessions store.
    pub fn sessions(&self) -> Sessions<'_> {
        Sessions::new(self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-statement leaves SQLite itself consistent.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Initialize the database schema.
    fn init_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                project_name TEXT NOT NULL,
                file_path TEXT NOT NULL,
                start_time TEXT,
                end_time TEXT,
                message_count INTEGER NOT NULL DEFAULT 0,
                input_tokens INTEGER NOT NULL DEFAULT 0,
                output_tokens INTEGER NOT NULL DEFAULT 0,
                cache_write_tokens INTEGER NOT NULL DEFAULT 0,
                cache_read_tokens INTEGER NOT NULL DEFAULT 0,
                token_count INTEGER NOT NULL DEFAULT 0,
                cost_usd REAL NOT NULL DEFAULT 0,
                model TEXT,
                status TEXT NOT NULL,
                file_modified_time INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                session_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp TEXT,
                token_count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (session_id, seq)
            );

            CREATE TABLE IF NOT EXISTS tool_usage_counts (
                session_id TEXT NOT NULL,
                tool_name TEXT NOT NULL,
                count INTEGER NOT NULL,
                PRIMARY KEY (session_id, tool_name)
            );

            CREATE TABLE IF NOT EXISTS tool_usage_details (
                session_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                tool_name TEXT NOT NULL,
                tool_input TEXT NOT NULL,
                tool_result_preview TEXT,
                success INTEGER NOT NULL,
                input_tokens INTEGER NOT NULL DEFAULT 0,
                output_tokens INTEGER NOT NULL DEFAULT 0,
                cache_write_tokens INTEGER NOT NULL DEFAULT 0,
                cache_read_tokens INTEGER NOT NULL DEFAULT 0,
                cost_usd REAL NOT NULL DEFAULT 0,
                message_id TEXT,
                request_id TEXT,
                entry_hash TEXT NOT NULL,
                tool_index INTEGER NOT NULL,
                model TEXT,
                timestamp TEXT,
                PRIMARY KEY (session_id, seq)
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_project_name ON sessions(project_name);
            CREATE INDEX IF NOT EXISTS idx_sessions_file_path ON sessions(file_path);
            CREATE INDEX IF NOT EXISTS idx_sessions_file_modified_time ON sessions(file_modified_time DESC);
            CREATE INDEX IF NOT EXISTS idx_tool_usage_details_hash ON tool_usage_details(entry_hash);
            "#,
        )
    }
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

impl SessionStore for Database {
    fn upsert_session(&self, session: &SessionUpsert) -> Result<(), StoreError> {
        self.sessions().upsert(session).map_err(backend)
    }

    fn replace_messages(&self, session_id: &str, messages: &[Message]) -> Result<(), StoreError> {
        self.sessions()
            .replace_messages(session_id, messages)
            .map_err(backend)
    }

    fn get_session(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        self.sessions().get(session_id).map_err(backend)
    }

    fn replace_tool_usage_counts(
        &self,
        session_id: &str,
        counts: &ToolUsageCounts,
    ) -> Result<(), StoreError> {
        self.sessions()
            .replace_tool_usage_counts(session_id, counts)
            .map_err(backend)
    }

    fn replace_detailed_tool_usage(
        &self,
        session_id: &str,
        entries: &[DetailedToolUsageEntry],
    ) -> Result<(), StoreError> {
        self.sessions()
            .replace_detailed_tool_usage(session_id, entries)
            .map_err(backend)
    }

    fn known_paths_with_modified_time(&self) -> Result<HashMap<PathBuf, i64>, StoreError> {
        self.sessions().known_paths().map_err(backend)
    }

    fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>, StoreError> {
        self.sessions().list(filter).map_err(backend)
    }

    fn ingest_session(
        &self,
        session: &SessionUpsert,
        messages: &[Message],
        counts: &ToolUsageCounts,
        entries: &[DetailedToolUsageEntry],
    ) -> Result<(), StoreError> {
        self.sessions()
            .ingest(session, messages, counts, entries)
            .map_err(backend)
    }
}
