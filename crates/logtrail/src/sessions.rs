use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use clap::Subcommand;
use colored::Colorize;

use logtrail_db::Database;
use logtrail_sessions::{
    DetailedToolUsageEntry, Message, MessageRole, Session, SessionFilter, SessionStatus,
    ToolUsageCounts,
};

#[derive(Subcommand, Debug)]
pub enum SessionsAction {
    /// List stored sessions, most recently modified first
    List {
        /// Filter by project name
        #[arg(long)]
        project: Option<String>,

        /// Filter by model (substring)
        #[arg(long)]
        model: Option<String>,

        /// Show sessions started on or after this date (YYYY-MM-DD)
        #[arg(long)]
        after: Option<String>,

        /// Show sessions started on or before this date (YYYY-MM-DD)
        #[arg(long)]
        before: Option<String>,

        /// Search project name and session id
        #[arg(long)]
        search: Option<String>,

        /// Only sessions with messages but no recorded tokens
        #[arg(long)]
        needs_recovery: bool,

        /// Maximum number of sessions
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a session with its messages and tool usage
    Show {
        /// Session ID
        id: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List projects that have stored sessions
    Projects,

    /// Remove a session and its messages from the database
    Delete {
        /// Session ID
        id: String,
    },
}

pub fn handle_sessions_command(action: SessionsAction, db: &Database) -> Result<()> {
    let sessions = db.sessions();

    match action {
        SessionsAction::List {
            project,
            model,
            after,
            before,
            search,
            needs_recovery,
            limit,
            json,
        } => {
            let filter = build_filter(project, model, after, before, search, needs_recovery, limit)?;
            let found = sessions.list(&filter)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&found)?);
            } else if found.is_empty() {
                println!("{}", "No sessions found.".dimmed());
            } else {
                print_sessions_table(&found);
            }
        }
        SessionsAction::Show { id, json } => {
            let Some(session) = sessions.get(&id)? else {
                bail!("Session not found: {}", id);
            };
            let messages = sessions.get_messages(&id)?;
            let tool_counts = sessions.get_tool_usage_counts(&id)?;
            let tool_details = sessions.get_detailed_tool_usage(&id)?;

            if json {
                let value = serde_json::json!({
                    "session": session,
                    "messages": messages,
                    "toolUsage": tool_counts,
                    "toolDetails": tool_details,
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                print_session_detail(&session, &messages, &tool_counts, &tool_details);
            }
        }
        SessionsAction::Projects => {
            let projects = sessions.list_projects()?;
            if projects.is_empty() {
                println!("{}", "No projects found.".dimmed());
            }
            for project in projects {
                println!("{}", project);
            }
        }
        SessionsAction::Delete { id } => {
            if sessions.delete(&id)? {
                println!("Deleted {}", id);
            } else {
                bail!("Session not found: {}", id);
            }
        }
    }

    Ok(())
}

fn build_filter(
    project: Option<String>,
    model: Option<String>,
    after: Option<String>,
    before: Option<String>,
    search: Option<String>,
    needs_recovery: bool,
    limit: Option<usize>,
) -> Result<SessionFilter> {
    let after = after
        .map(|s| parse_date(&s, NaiveTime::MIN).context("Invalid --after date"))
        .transpose()?;

    let end_of_day = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
    let before = before
        .map(|s| parse_date(&s, end_of_day).context("Invalid --before date"))
        .transpose()?;

    Ok(SessionFilter {
        project,
        model,
        after,
        before,
        search,
        needs_recovery,
        limit,
    })
}

fn parse_date(s: &str, time: NaiveTime) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")?;
    Ok(Utc.from_utc_datetime(&date.and_time(time)))
}

fn colored_status(status: SessionStatus) -> String {
    let label = status.as_str();
    match status {
        SessionStatus::Active => label.bright_cyan().to_string(),
        SessionStatus::Idle => label.bright_yellow().to_string(),
        SessionStatus::Archived => label.dimmed().to_string(),
    }
}

fn print_sessions_table(sessions: &[Session]) {
    println!(
        "{:<17} {:<8} {:<6} {:<10} {:<9} {:<20} {:<24} {}",
        "STARTED".dimmed(),
        "STATUS".dimmed(),
        "MSGS".dimmed(),
        "TOKENS".dimmed(),
        "COST".dimmed(),
        "PROJECT".dimmed(),
        "MODEL".dimmed(),
        "ID".dimmed(),
    );

    for s in sessions {
        let started = s
            .start_time
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        let model = s.model.as_deref().unwrap_or("-");

        println!(
            "{:<17} {:<8} {:<6} {:<10} {:<9} {:<20} {:<24} {}",
            started,
            colored_status(s.status),
            s.message_count,
            s.token_count,
            format!("${:.4}", s.cost_usd),
            truncate(&s.project_name, 20),
            truncate(model, 24),
            s.id
        );
    }
}

fn print_session_detail(
    session: &Session,
    messages: &[Message],
    tool_counts: &ToolUsageCounts,
    tool_details: &[DetailedToolUsageEntry],
) {
    println!("{}", "=== Session Detail ===".bright_blue().bold());
    println!("{}  {}", "ID:".dimmed(), session.id);
    println!("{}  {}", "Project:".dimmed(), session.project_name);
    println!("{}  {}", "File:".dimmed(), session.file_path.display());
    println!("{}  {}", "Status:".dimmed(), colored_status(session.status));
    if let Some(start) = session.start_time {
        println!(
            "{}  {}",
            "Started:".dimmed(),
            start.format("%Y-%m-%d %H:%M:%S UTC")
        );
        if let Some(end) = session.end_time {
            let secs = (end - start).num_milliseconds() as f64 / 1000.0;
            println!("{}  {}", "Duration:".dimmed(), format_duration(secs));
        }
    }
    if let Some(ref model) = session.model {
        println!("{}  {}", "Model:".dimmed(), model);
    }
    println!();
    println!("{}  {}", "Messages:".dimmed(), session.message_count);
    println!(
        "{}  {} (input {}, output {}, cache write {}, cache read {})",
        "Tokens:".dimmed(),
        session.token_count,
        session.tokens.input_tokens,
        session.tokens.output_tokens,
        session.tokens.cache_write_tokens,
        session.tokens.cache_read_tokens
    );
    println!("{}  ${:.4}", "Cost:".dimmed(), session.cost_usd);

    if !tool_counts.is_empty() {
        println!();
        println!("{}", "Tool Usage:".dimmed());
        for (name, count) in tool_counts {
            println!("  {:<20} {}", name, count);
        }
    }

    if !tool_details.is_empty() {
        let failed = tool_details.iter().filter(|d| !d.success).count();
        println!(
            "  {} {} calls, {} failed",
            "Detail:".dimmed(),
            tool_details.len(),
            if failed > 0 {
                failed.to_string().bright_red().to_string()
            } else {
                failed.to_string()
            }
        );
    }

    if !messages.is_empty() {
        println!();
        println!(
            "{}",
            format!("--- Messages ({}) ---", messages.len()).dimmed()
        );
        for message in messages {
            let ts = message
                .timestamp
                .map(|t| t.format("%H:%M:%S").to_string())
                .unwrap_or_else(|| "--:--:--".to_string());
            let role = match message.role {
                MessageRole::User => message.role.as_str().bright_green().to_string(),
                MessageRole::Assistant => message.role.as_str().bright_blue().to_string(),
                MessageRole::Tool | MessageRole::ToolResult => {
                    message.role.as_str().bright_yellow().to_string()
                }
                _ => message.role.as_str().dimmed().to_string(),
            };
            println!(
                "  {} {:<11} {}",
                ts.dimmed(),
                role,
                truncate(&message.content.replace('\n', " "), 120)
            );
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        let cut: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        s.to_string()
    }
}

fn format_duration(secs: f64) -> String {
    if secs < 60.0 {
        format!("{:.0}s", secs)
    } else if secs < 3600.0 {
        let mins = (secs / 60.0).floor() as u64;
        let remaining_secs = (secs % 60.0) as u64;
        format!("{}m {}s", mins, remaining_secs)
    } else {
        let hours = (secs / 3600.0).floor() as u64;
        let mins = ((secs % 3600.0) / 60.0) as u64;
        format!("{}h {}m", hours, mins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter_parses_day_bounds() {
        let filter = build_filter(
            None,
            None,
            Some("2024-03-01".into()),
            Some("2024-03-02".into()),
            None,
            false,
            Some(5),
        )
        .unwrap();
        assert_eq!(
            filter.after.unwrap().to_rfc3339(),
            "2024-03-01T00:00:00+00:00"
        );
        assert_eq!(
            filter.before.unwrap().to_rfc3339(),
            "2024-03-02T23:59:59+00:00"
        );
        assert_eq!(filter.limit, Some(5));
    }

    #[test]
    fn test_build_filter_rejects_bad_date() {
        assert!(build_filter(None, None, Some("03/01/2024".into()), None, None, false, None).is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(42.0), "42s");
        assert_eq!(format_duration(125.0), "2m 5s");
        assert_eq!(format_duration(3720.0), "1h 2m");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo wörld", 8), "héllo...");
        assert_eq!(truncate("short", 8), "short");
    }
}
