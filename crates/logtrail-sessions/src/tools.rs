//! Resolve raw tool-call names into the logical names used for usage counts.
//!
//! Most tools map to themselves. Shell tools are split by the programs their
//! command line runs, MCP tools are shortened to `server:tool`, and sub-agent
//! launches are keyed by agent type.

use serde_json::Value;

const SHELL_TOOLS: &[&str] = &["Bash", "bash", "run_command", "execute_command", "shell"];
const SHELL_PREFIXES: &[&str] = &["sudo", "env", "time", "nohup", "command", "exec"];

/// Resolve the logical names for one tool call. May return zero, one or
/// several names.
pub fn resolve_tool_names(name: &str, input: &Value) -> Vec<String> {
    if SHELL_TOOLS.contains(&name) {
        return match shell_command(input) {
            Some(command) => command_programs(&command)
                .into_iter()
                .map(|program| format!("{}({})", name, program))
                .collect(),
            None => vec![name.to_string()],
        };
    }

    if let Some(rest) = name.strip_prefix("mcp__") {
        if let Some((server, tool)) = rest.split_once("__") {
            return vec![format!("mcp:{}:{}", server, tool)];
        }
    }

    if name == "Task" || name == "Agent" {
        if let Some(agent) = input.get("subagent_type").and_then(|v| v.as_str()) {
            return vec![format!("{}({})", name, agent)];
        }
    }

    vec![name.to_string()]
}

fn shell_command(input: &Value) -> Option<String> {
    ["command", "cmd"]
        .iter()
        .find_map(|key| input.get(*key))
        .and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Array(parts) => Some(
                parts
                    .iter()
                    .filter_map(|p| p.as_str())
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            _ => None,
        })
}

/// Distinct program names in a shell command line, in order of appearance.
fn command_programs(command: &str) -> Vec<String> {
    let mut programs: Vec<String> = Vec::new();

    for segment in split_segments(command) {
        let program = segment
            .split_whitespace()
            .find(|word| !is_env_assignment(word) && !SHELL_PREFIXES.contains(word))
            .map(|word| word.rsplit('/').next().unwrap_or(word).to_string());

        if let Some(program) = program {
            if !program.is_empty() && !programs.contains(&program) {
                programs.push(program);
            }
        }
    }

    programs
}

fn split_segments(command: &str) -> Vec<&str> {
    command
        .split(['\n', ';', '|', '&'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn is_env_assignment(word: &str) -> bool {
    match word.split_once('=') {
        Some((key, _)) => {
            !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}
