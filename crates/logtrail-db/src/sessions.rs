//! Sessions store for persistent session storage.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::MutexGuard;

use chrono::{DateTime, Utc};
use logtrail_sessions::{
    DetailedToolUsageEntry, Message, MessageRole, Session, SessionFilter, SessionStatus,
    SessionUpsert, TokenUsage, ToolUsageCounts,
};
use rusqlite::{params, Connection, OptionalExtension};

const SESSION_COLUMNS: &str = "id, project_name, file_path, start_time, end_time, message_count, \
     input_tokens, output_tokens, cache_write_tokens, cache_read_tokens, token_count, \
     cost_usd, model, status, file_modified_time";

/// Sessions store with a borrowed connection.
pub struct Sessions<'db> {
    conn: MutexGuard<'db, Connection>,
}

impl<'db> Sessions<'db> {
    /// Create a new Sessions store with a borrowed connection.
    pub(crate) fn new(conn: MutexGuard<'db, Connection>) -> Self {
        Self { conn }
    }

    /// Insert a session or update its engine-owned fields.
    ///
    /// `status` is written on insert only, so values set by other
    /// collaborators survive reprocessing.
    pub fn upsert(&self, session: &SessionUpsert) -> Result<(), rusqlite::Error> {
        write_session(&self.conn, session)
    }

    /// Write a session together with its messages and tool usage in one
    /// transaction.
    pub fn ingest(
        &self,
        session: &SessionUpsert,
        messages: &[Message],
        counts: &ToolUsageCounts,
        entries: &[DetailedToolUsageEntry],
    ) -> Result<(), rusqlite::Error> {
        let tx = self.conn.unchecked_transaction()?;
        write_messages(&tx, &session.id, messages)?;
        write_tool_usage_counts(&tx, &session.id, counts)?;
        write_detailed_tool_usage(&tx, &session.id, entries)?;
        write_session(&tx, session)?;
        tx.commit()
    }

    /// Get a session by ID.
    pub fn get(&self, id: &str) -> Result<Option<Session>, rusqlite::Error> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS),
                params![id],
                Self::row_to_session,
            )
            .optional()
    }

    /// List sessions with optional filtering, most recently modified first.
    pub fn list(&self, filter: &SessionFilter) -> Result<Vec<Session>, rusqlite::Error> {
        let mut sql = format!("SELECT {} FROM sessions WHERE 1=1", SESSION_COLUMNS);
        let mut param_values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref project) = filter.project {
            sql.push_str(" AND project_name = ?");
            param_values.push(Box::new(project.clone()));
        }

        if let Some(ref model) = filter.model {
            sql.push_str(" AND model LIKE ? ESCAPE '\\'");
            param_values.push(Box::new(contains_pattern(model)));
        }

        if let Some(ref after) = filter.after {
            sql.push_str(" AND start_time >= ?");
            param_values.push(Box::new(after.to_rfc3339()));
        }

        if let Some(ref before) = filter.before {
            sql.push_str(" AND start_time <= ?");
            param_values.push(Box::new(before.to_rfc3339()));
        }

        if let Some(ref search) = filter.search {
            sql.push_str(" AND (project_name LIKE ? ESCAPE '\\' OR id LIKE ? ESCAPE '\\')");
            let pattern = contains_pattern(search);
            param_values.push(Box::new(pattern.clone()));
            param_values.push(Box::new(pattern));
        }

        if filter.needs_recovery {
            sql.push_str(" AND token_count = 0 AND message_count > 0");
        }

        sql.push_str(" ORDER BY file_modified_time DESC, id");

        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let params: Vec<&dyn rusqlite::ToSql> = param_values.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params.as_slice(), Self::row_to_session)?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }

        Ok(sessions)
    }

    /// Every ingested file path with the mtime it was last derived from.
    pub fn known_paths(&self) -> Result<HashMap<PathBuf, i64>, rusqlite::Error> {
        let mut stmt = self
            .conn
            .prepare("SELECT file_path, file_modified_time FROM sessions")?;
        let rows = stmt.query_map([], |row| {
            Ok((PathBuf::from(row.get::<_, String>(0)?), row.get::<_, i64>(1)?))
        })?;

        let mut known = HashMap::new();
        for row in rows {
            let (path, mtime) = row?;
            known.insert(path, mtime);
        }

        Ok(known)
    }

    /// Replace the full message list of a session.
    pub fn replace_messages(&self, session_id: &str, messages: &[Message]) -> Result<(), rusqlite::Error> {
        let tx = self.conn.unchecked_transaction()?;
        write_messages(&tx, session_id, messages)?;
        tx.commit()
    }

    /// Get the messages of a session in file order.
    pub fn get_messages(&self, session_id: &str) -> Result<Vec<Message>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT role, content, timestamp, token_count FROM messages WHERE session_id = ?1 ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            let role: String = row.get(0)?;
            Ok(Message {
                role: role.parse().unwrap_or(MessageRole::Unknown),
                content: row.get(1)?,
                timestamp: parse_time(row.get(2)?),
                token_count: row.get::<_, i64>(3)? as u64,
            })
        })?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }

        Ok(messages)
    }

    /// Replace the per-tool invocation counts of a session.
    pub fn replace_tool_usage_counts(
        &self,
        session_id: &str,
        counts: &ToolUsageCounts,
    ) -> Result<(), rusqlite::Error> {
        let tx = self.conn.unchecked_transaction()?;
        write_tool_usage_counts(&tx, session_id, counts)?;
        tx.commit()
    }

    pub fn get_tool_usage_counts(&self, session_id: &str) -> Result<ToolUsageCounts, rusqlite::Error> {
        let mut stmt = self
            .conn
            .prepare("SELECT tool_name, count FROM tool_usage_counts WHERE session_id = ?1")?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;

        let mut counts = ToolUsageCounts::new();
        for row in rows {
            let (name, count) = row?;
            counts.insert(name, count);
        }

        Ok(counts)
    }

    /// Replace the detailed tool-usage entries of a session.
    pub fn replace_detailed_tool_usage(
        &self,
        session_id: &str,
        entries: &[DetailedToolUsageEntry],
    ) -> Result<(), rusqlite::Error> {
        let tx = self.conn.unchecked_transaction()?;
        write_detailed_tool_usage(&tx, session_id, entries)?;
        tx.commit()
    }

    pub fn get_detailed_tool_usage(
        &self,
        session_id: &str,
    ) -> Result<Vec<DetailedToolUsageEntry>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT tool_name, tool_input, tool_result_preview, success,
                   input_tokens, output_tokens, cache_write_tokens, cache_read_tokens,
                   cost_usd, message_id, request_id, entry_hash, tool_index, model, timestamp
            FROM tool_usage_details
            WHERE session_id = ?1
            ORDER BY seq
            "#,
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok(DetailedToolUsageEntry {
                tool_name: row.get(0)?,
                tool_input: row.get(1)?,
                tool_result_preview: row.get(2)?,
                success: row.get(3)?,
                tokens: TokenUsage {
                    input_tokens: row.get::<_, i64>(4)? as u64,
                    output_tokens: row.get::<_, i64>(5)? as u64,
                    cache_write_tokens: row.get::<_, i64>(6)? as u64,
                    cache_read_tokens: row.get::<_, i64>(7)? as u64,
                },
                cost_usd: row.get(8)?,
                message_id: row.get(9)?,
                request_id: row.get(10)?,
                entry_hash: row.get(11)?,
                tool_index: row.get::<_, i64>(12)? as usize,
                model: row.get(13)?,
                timestamp: parse_time(row.get(14)?),
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }

        Ok(entries)
    }

    /// Get all unique project names.
    pub fn list_projects(&self) -> Result<Vec<String>, rusqlite::Error> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT project_name FROM sessions ORDER BY project_name")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut projects = Vec::new();
        for row in rows {
            projects.push(row?);
        }

        Ok(projects)
    }

    /// Delete a session and everything recorded for it.
    pub fn delete(&self, id: &str) -> Result<bool, rusqlite::Error> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM messages WHERE session_id = ?1", params![id])?;
        tx.execute("DELETE FROM tool_usage_counts WHERE session_id = ?1", params![id])?;
        tx.execute("DELETE FROM tool_usage_details WHERE session_id = ?1", params![id])?;
        let rows_affected = tx.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(rows_affected > 0)
    }

    fn row_to_session(row: &rusqlite::Row) -> Result<Session, rusqlite::Error> {
        let file_path: String = row.get(2)?;
        let status: String = row.get(13)?;

        Ok(Session {
            id: row.get(0)?,
            project_name: row.get(1)?,
            file_path: PathBuf::from(file_path),
            start_time: parse_time(row.get(3)?),
            end_time: parse_time(row.get(4)?),
            message_count: row.get::<_, i64>(5)? as u64,
            tokens: TokenUsage {
                input_tokens: row.get::<_, i64>(6)? as u64,
                output_tokens: row.get::<_, i64>(7)? as u64,
                cache_write_tokens: row.get::<_, i64>(8)? as u64,
                cache_read_tokens: row.get::<_, i64>(9)? as u64,
            },
            token_count: row.get::<_, i64>(10)? as u64,
            cost_usd: row.get(11)?,
            model: row.get(12)?,
            status: status.parse().unwrap_or(SessionStatus::Idle),
            file_modified_time: row.get(14)?,
        })
    }
}

/// `status` only applies on insert.
fn write_session(conn: &Connection, session: &SessionUpsert) -> Result<(), rusqlite::Error> {
    conn.execute(
        r#"
        INSERT INTO sessions (
            id, project_name, file_path, start_time, end_time, message_count,
            input_tokens, output_tokens, cache_write_tokens, cache_read_tokens,
            token_count, cost_usd, model, status, file_modified_time, updated_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
        ON CONFLICT(id) DO UPDATE SET
            project_name = excluded.project_name,
            file_path = excluded.file_path,
            start_time = excluded.start_time,
            end_time = excluded.end_time,
            message_count = excluded.message_count,
            input_tokens = excluded.input_tokens,
            output_tokens = excluded.output_tokens,
            cache_write_tokens = excluded.cache_write_tokens,
            cache_read_tokens = excluded.cache_read_tokens,
            token_count = excluded.token_count,
            cost_usd = excluded.cost_usd,
            model = excluded.model,
            file_modified_time = excluded.file_modified_time,
            updated_at = excluded.updated_at
        "#,
        params![
            session.id,
            session.project_name,
            session.file_path.to_string_lossy().to_string(),
            session.start_time.map(|t| t.to_rfc3339()),
            session.end_time.map(|t| t.to_rfc3339()),
            session.message_count as i64,
            session.tokens.input_tokens as i64,
            session.tokens.output_tokens as i64,
            session.tokens.cache_write_tokens as i64,
            session.tokens.cache_read_tokens as i64,
            session.tokens.total() as i64,
            session.cost_usd,
            session.model,
            session.status.as_str(),
            session.file_modified_time,
            Utc::now().to_rfc3339(),
        ],
    )?;

    Ok(())
}

fn write_messages(
    conn: &Connection,
    session_id: &str,
    messages: &[Message],
) -> Result<(), rusqlite::Error> {
    conn.execute("DELETE FROM messages WHERE session_id = ?1", params![session_id])?;
    {
        let mut stmt = conn.prepare(
            r#"
            INSERT INTO messages (session_id, seq, role, content, timestamp, token_count)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )?;
        for (seq, message) in messages.iter().enumerate() {
            stmt.execute(params![
                session_id,
                seq as i64,
                message.role.as_str(),
                message.content,
                message.timestamp.map(|t| t.to_rfc3339()),
                message.token_count as i64,
            ])?;
        }
    }
    Ok(())
}

fn write_tool_usage_counts(
    conn: &Connection,
    session_id: &str,
    counts: &ToolUsageCounts,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "DELETE FROM tool_usage_counts WHERE session_id = ?1",
        params![session_id],
    )?;
    {
        let mut stmt = conn.prepare(
            "INSERT INTO tool_usage_counts (session_id, tool_name, count) VALUES (?1, ?2, ?3)",
        )?;
        for (tool_name, count) in counts {
            stmt.execute(params![session_id, tool_name, *count as i64])?;
        }
    }
    Ok(())
}

fn write_detailed_tool_usage(
    conn: &Connection,
    session_id: &str,
    entries: &[DetailedToolUsageEntry],
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "DELETE FROM tool_usage_details WHERE session_id = ?1",
        params![session_id],
    )?;
    {
        let mut stmt = conn.prepare(
            r#"
            INSERT INTO tool_usage_details (
                session_id, seq, tool_name, tool_input, tool_result_preview, success,
                input_tokens, output_tokens, cache_write_tokens, cache_read_tokens,
                cost_usd, message_id, request_id, entry_hash, tool_index, model, timestamp
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            "#,
        )?;
        for (seq, entry) in entries.iter().enumerate() {
            stmt.execute(params![
                session_id,
                seq as i64,
                entry.tool_name,
                entry.tool_input,
                entry.tool_result_preview,
                entry.success,
                entry.tokens.input_tokens as i64,
                entry.tokens.output_tokens as i64,
                entry.tokens.cache_write_tokens as i64,
                entry.tokens.cache_read_tokens as i64,
                entry.cost_usd,
                entry.message_id,
                entry.request_id,
                entry.entry_hash,
                entry.tool_index as i64,
                entry.model,
                entry.timestamp.map(|t| t.to_rfc3339()),
            ])?;
        }
    }
    Ok(())
}

/// `LIKE` pattern matching `text` literally anywhere, escaped with `\`.
fn contains_pattern(text: &str) -> String {
    let mut pattern = String::with_capacity(text.len() + 2);
    pattern.push('%');
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn parse_time(value: Option<String>) -> Option<DateTime<Utc>> {
    value.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use chrono::TimeZone;

    fn upsert(id: &str, project: &str, mtime: i64) -> SessionUpsert {
        SessionUpsert {
            id: id.to_string(),
            project_name: project.to_string(),
            file_path: PathBuf::from(format!("/projects/{}/{}.jsonl", project, id)),
            start_time: Some(Utc.with_ymd_and_hms(2026, 1, 20, 10, 0, 0).unwrap()),
            end_time: Some(Utc.with_ymd_and_hms(2026, 1, 20, 10, 30, 0).unwrap()),
            message_count: 3,
            tokens: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
                cache_write_tokens: 10,
                cache_read_tokens: 5,
            },
            cost_usd: 0.5,
            model: Some("claude-sonnet-4".to_string()),
            status: SessionStatus::Active,
            file_modified_time: mtime,
        }
    }

    #[test]
    fn test_upsert_preserves_status() {
        let db = Database::open_in_memory().unwrap();
        db.sessions().upsert(&upsert("s1", "alpha", 1)).unwrap();

        db.sessions()
            .conn
            .execute("UPDATE sessions SET status = 'archived' WHERE id = 's1'", [])
            .unwrap();

        let mut update = upsert("s1", "alpha", 2);
        update.status = SessionStatus::Idle;
        update.message_count = 7;
        db.sessions().upsert(&update).unwrap();

        let session = db.sessions().get("s1").unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Archived);
        assert_eq!(session.message_count, 7);
        assert_eq!(session.file_modified_time, 2);
    }

    #[test]
    fn test_token_count_matches_components() {
        let db = Database::open_in_memory().unwrap();
        db.sessions().upsert(&upsert("s1", "alpha", 1)).unwrap();

        let session = db.sessions().get("s1").unwrap().unwrap();
        assert_eq!(session.token_count, 165);
        assert_eq!(session.token_count, session.tokens.total());
    }

    #[test]
    fn test_replace_messages_is_wholesale() {
        let db = Database::open_in_memory().unwrap();
        let message = |content: &str| Message {
            role: MessageRole::Assistant,
            content: content.to_string(),
            timestamp: None,
            token_count: 1,
        };

        db.sessions()
            .replace_messages("s1", &[message("a"), message("b"), message("c")])
            .unwrap();
        db.sessions().replace_messages("s1", &[message("d")]).unwrap();

        let messages = db.sessions().get_messages("s1").unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "d");
    }

    #[test]
    fn test_list_filters() {
        let db = Database::open_in_memory().unwrap();
        db.sessions().upsert(&upsert("s1", "alpha", 3)).unwrap();
        db.sessions().upsert(&upsert("s2", "beta", 2)).unwrap();
        let mut broken = upsert("s3", "alpha", 1);
        broken.tokens = TokenUsage::default();
        db.sessions().upsert(&broken).unwrap();

        let all = db.sessions().list(&SessionFilter::default()).unwrap();
        let ids: Vec<&str> = all.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2", "s3"]);

        let alpha = db
            .sessions()
            .list(&SessionFilter {
                project: Some("alpha".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(alpha.len(), 2);

        let recovery = db
            .sessions()
            .list(&SessionFilter {
                needs_recovery: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(recovery.len(), 1);
        assert_eq!(recovery[0].id, "s3");

        let limited = db
            .sessions()
            .list(&SessionFilter {
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 1);

        let searched = db
            .sessions()
            .list(&SessionFilter {
                search: Some("bet".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(searched.len(), 1);
        assert_eq!(searched[0].id, "s2");
    }

    #[test]
    fn test_delete_removes_children() {
        let db = Database::open_in_memory().unwrap();
        db.sessions().upsert(&upsert("s1", "alpha", 1)).unwrap();
        let mut counts = ToolUsageCounts::new();
        counts.insert("Read".to_string(), 2);
        db.sessions().replace_tool_usage_counts("s1", &counts).unwrap();

        assert!(db.sessions().delete("s1").unwrap());
        assert!(db.sessions().get("s1").unwrap().is_none());
        assert!(db.sessions().get_tool_usage_counts("s1").unwrap().is_empty());

        // Deleting again returns false
        assert!(!db.sessions().delete("s1").unwrap());
    }

    #[test]
    fn test_contains_pattern_escapes_wildcards() {
        assert_eq!(contains_pattern("a_b%c"), "%a\\_b\\%c%");
        assert_eq!(contains_pattern("plain"), "%plain%");
    }

    #[test]
    fn test_search_matches_wildcards_literally() {
        let db = Database::open_in_memory().unwrap();
        db.sessions().upsert(&upsert("s1", "my_app", 1)).unwrap();
        db.sessions().upsert(&upsert("s2", "myxapp", 2)).unwrap();
        db.sessions().upsert(&upsert("s3", "100%", 3)).unwrap();

        let search = |term: &str| -> Vec<String> {
            db.sessions()
                .list(&SessionFilter {
                    search: Some(term.to_string()),
                    ..Default::default()
                })
                .unwrap()
                .into_iter()
                .map(|s| s.id)
                .collect()
        };

        assert_eq!(search("my_app"), vec!["s1"]);
        assert_eq!(search("%"), vec!["s3"]);
        assert_eq!(search("app").len(), 2);
    }

    #[test]
    fn test_ingest_replaces_everything_for_the_session() {
        let db = Database::open_in_memory().unwrap();
        let sessions = db.sessions();
        let message = |text: &str| Message {
            role: MessageRole::User,
            content: text.to_string(),
            timestamp: None,
            token_count: 0,
        };
        let counts: ToolUsageCounts = [("Read".to_string(), 2)].into_iter().collect();

        sessions
            .ingest(&upsert("s1", "alpha", 1), &[message("a"), message("b")], &counts, &[])
            .unwrap();
        sessions
            .ingest(&upsert("s1", "alpha", 2), &[message("c")], &ToolUsageCounts::new(), &[])
            .unwrap();

        assert_eq!(sessions.get("s1").unwrap().unwrap().file_modified_time, 2);
        assert_eq!(sessions.get_messages("s1").unwrap(), vec![message("c")]);
        assert!(sessions.get_tool_usage_counts("s1").unwrap().is_empty());
    }
}
