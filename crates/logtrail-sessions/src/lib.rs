pub mod content;
pub mod parser;
pub mod scanner;
pub mod store;
pub mod tools;
pub mod types;
pub mod watcher;

pub use content::{Content, ContentBlock};
pub use parser::{
    entry_hash, parse_transcript, parse_transcript_file, ParsedTranscript, TranscriptParser,
    DEFAULT_PREVIEW_CHARS,
};
pub use scanner::{
    classify, project_name_for, scan_directory, session_id_for, Classification, KnownPaths,
    ScanOutcome, TRANSCRIPT_EXTENSION,
};
pub use store::{SessionStore, StoreError};
pub use tools::resolve_tool_names;
pub use types::{
    DetailedToolUsageEntry, Message, MessageRole, Session, SessionFile, SessionFilter,
    SessionStatus, SessionUpsert, TokenUsage, ToolUsageCounts,
};
pub use watcher::{
    BroadcastSink, LiveWatcher, NotificationSink, SessionEvent, SessionKind, Throttle, WatchConfig,
};
