use std::path::PathBuf;

use chrono::{TimeZone, Utc};
use logtrail_db::Database;
use logtrail_sessions::{
    parse_transcript, DetailedToolUsageEntry, SessionFilter, SessionStatus, SessionStore,
    SessionUpsert,
};

const TRANSCRIPT: &str = r#"{"type":"user","timestamp":"2026-01-20T10:00:00Z","message":{"content":"list files"}}
{"type":"assistant","timestamp":"2026-01-20T10:00:02Z","requestId":"r1","message":{"id":"m1","model":"claude-sonnet-4","content":[{"type":"text","text":"Running ls"},{"type":"tool_use","id":"c1","name":"Bash","input":{"command":"ls -la"}}],"usage":{"input_tokens":12,"output_tokens":4}}}
{"type":"user","timestamp":"2026-01-20T10:00:03Z","message":{"content":[{"type":"tool_result","tool_use_id":"c1","content":"Cargo.toml","is_error":false}]}}"#;

fn upsert_for(id: &str, start: chrono::DateTime<Utc>) -> SessionUpsert {
    let parsed = parse_transcript(TRANSCRIPT);
    SessionUpsert {
        id: id.to_string(),
        project_name: "-home-user-app".to_string(),
        file_path: PathBuf::from(format!("/projects/-home-user-app/{}.jsonl", id)),
        start_time: Some(start),
        end_time: parsed.end_time,
        message_count: parsed.message_count(),
        tokens: parsed.tokens,
        cost_usd: parsed.cost_usd,
        model: parsed.model,
        status: SessionStatus::Idle,
        file_modified_time: 42,
    }
}

#[test]
fn test_parsed_transcript_persists_through_store() {
    let db = Database::open_in_memory().unwrap();
    let parsed = parse_transcript(TRANSCRIPT);
    let start = parsed.start_time.unwrap();

    db.upsert_session(&upsert_for("abc", start)).unwrap();
    db.replace_messages("abc", &parsed.messages).unwrap();
    db.replace_tool_usage_counts("abc", &parsed.tool_usage_counts).unwrap();
    db.replace_detailed_tool_usage("abc", &parsed.detailed_tool_usage).unwrap();

    let session = db.get_session("abc").unwrap().unwrap();
    assert_eq!(session.message_count, 2);
    assert_eq!(session.token_count, 16);
    assert_eq!(session.model.as_deref(), Some("claude-sonnet-4"));
    assert_eq!(session.start_time, Some(start));

    assert_eq!(db.sessions().get_messages("abc").unwrap(), parsed.messages);
    assert_eq!(
        db.sessions().get_tool_usage_counts("abc").unwrap().get("Bash(ls)"),
        Some(&1)
    );

    let details: Vec<DetailedToolUsageEntry> = db.sessions().get_detailed_tool_usage("abc").unwrap();
    assert_eq!(details, parsed.detailed_tool_usage);
    assert_eq!(details[0].tool_result_preview.as_deref(), Some("Cargo.toml"));
}

#[test]
fn test_list_by_time_range_and_model() {
    let db = Database::open_in_memory().unwrap();
    db.upsert_session(&upsert_for("early", Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()))
        .unwrap();
    db.upsert_session(&upsert_for("late", Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()))
        .unwrap();

    let after = db
        .list_sessions(&SessionFilter {
            after: Some(Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].id, "late");

    let before = db
        .list_sessions(&SessionFilter {
            before: Some(Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(before.len(), 1);
    assert_eq!(before[0].id, "early");

    let sonnet = db
        .list_sessions(&SessionFilter {
            model: Some("sonnet".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(sonnet.len(), 2);

    assert_eq!(db.sessions().list_projects().unwrap(), vec!["-home-user-app"]);
}

#[test]
fn test_known_paths_track_latest_mtime() {
    let db = Database::open_in_memory().unwrap();
    let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();

    let mut upsert = upsert_for("abc", start);
    db.upsert_session(&upsert).unwrap();
    upsert.file_modified_time = 99;
    db.upsert_session(&upsert).unwrap();

    let known = db.known_paths_with_modified_time().unwrap();
    assert_eq!(known.len(), 1);
    assert_eq!(known.get(&upsert.file_path), Some(&99));
}
