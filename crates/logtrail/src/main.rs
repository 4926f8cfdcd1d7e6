mod config;
mod sessions;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use logtrail_core::{
    EngineConfig, ScanReport, ScanScheduler, ScanStatus, SessionManager, StaticPricing,
};
use logtrail_db::Database;
use logtrail_logging::{LogEvent, LogFormat, Logger};
use logtrail_sessions::{BroadcastSink, SessionEvent};

use crate::config::AppConfig;
use crate::sessions::{handle_sessions_command, SessionsAction};

#[derive(Parser, Debug)]
#[command(
    name = "logtrail",
    about = "Ingest and live-track coding assistant session transcripts",
    version,
    author
)]
struct Cli {
    /// Config file (default: ~/.config/logtrail/logtrail.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Root directory of per-project transcript folders
    #[arg(short = 'd', long, global = true)]
    projects_dir: Option<PathBuf>,

    /// SQLite database file
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Diagnostic log level (overridden by RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, value_enum, global = true)]
    log_format: Option<LogFormatChoice>,

    /// Also write diagnostics to this file, rolled daily
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Append engine events to this file as JSON lines
    #[arg(long, global = true)]
    event_log: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan every transcript once and store what changed
    Scan {
        /// Output the scan report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Process only new and modified transcripts
    Refresh {
        /// Output the scan report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Scan periodically and follow live sessions until Ctrl+C
    Watch {
        /// Seconds between refreshes (default from config)
        #[arg(long)]
        interval: Option<u64>,

        /// Also follow these stored sessions regardless of age
        #[arg(long = "session")]
        sessions: Vec<String>,
    },

    #[command(flatten)]
    Sessions(SessionsAction),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatChoice {
    Pretty,
    Json,
    Compact,
}

impl From<LogFormatChoice> for LogFormat {
    fn from(choice: LogFormatChoice) -> Self {
        match choice {
            LogFormatChoice::Pretty => LogFormat::Pretty,
            LogFormatChoice::Json => LogFormat::Json,
            LogFormatChoice::Compact => LogFormat::Compact,
        }
    }
}

/// Settings after merging the config file with CLI flags.
struct Settings {
    engine: EngineConfig,
    database: PathBuf,
    log_level: String,
    log_format: LogFormat,
    log_file: Option<PathBuf>,
    event_log: Option<PathBuf>,
}

impl Settings {
    fn resolve(cli: &Cli, file: AppConfig) -> Result<Self> {
        let mut engine = file.engine_config();
        if let Some(ref dir) = cli.projects_dir {
            engine.projects_dir = dir.clone();
        }

        let log_format = match (cli.log_format, file.log_format.as_deref()) {
            (Some(choice), _) => choice.into(),
            (None, Some(name)) => name
                .parse::<LogFormat>()
                .map_err(anyhow::Error::msg)
                .context("Invalid log_format in config")?,
            (None, None) => LogFormat::default(),
        };

        Ok(Self {
            engine,
            database: cli
                .database
                .clone()
                .or(file.database)
                .unwrap_or_else(Database::default_path),
            log_level: cli
                .log_level
                .clone()
                .or(file.log_level)
                .unwrap_or_else(|| "info".to_string()),
            log_format,
            log_file: cli.log_file.clone().or(file.log_file),
            event_log: cli.event_log.clone().or(file.event_log),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let file_config = AppConfig::load(cli.config.as_deref())?.unwrap_or_default();
    let settings = Settings::resolve(&cli, file_config)?;

    // Held until exit so the file appender flushes.
    let _log_guard = logtrail_logging::init_tracing(
        &settings.log_level,
        settings.log_format,
        settings.log_file.as_deref(),
    );
    let logger = Arc::new(match settings.event_log {
        Some(ref path) => Logger::with_file(settings.log_format, path)
            .with_context(|| format!("Failed to open event log {}", path.display()))?,
        None => Logger::new(settings.log_format),
    });

    let db = Arc::new(
        Database::open_at(&settings.database)
            .with_context(|| format!("Failed to open {}", settings.database.display()))?,
    );

    match cli.command {
        Command::Scan { json } => {
            let manager = build_manager(&settings, db, logger, Arc::new(BroadcastSink::default()))?;
            let report = manager.scan_all().await?;
            manager.stop();
            print_report(&report, json)?;
        }
        Command::Refresh { json } => {
            let manager = build_manager(&settings, db, logger, Arc::new(BroadcastSink::default()))?;
            manager.load_known_paths()?;
            let report = manager.refresh().await?;
            manager.stop();
            print_report(&report, json)?;
        }
        Command::Watch { interval, sessions } => {
            run_watch(&settings, db, logger, interval, &sessions).await?;
        }
        Command::Sessions(action) => handle_sessions_command(action, &db)?,
    }

    Ok(())
}

fn build_manager(
    settings: &Settings,
    db: Arc<Database>,
    logger: Arc<Logger>,
    sink: Arc<BroadcastSink>,
) -> Result<SessionManager> {
    let manager = SessionManager::new(
        settings.engine.clone(),
        db,
        Arc::new(StaticPricing::builtin()),
        sink,
        logger,
    )?;
    Ok(manager)
}

fn print_report(report: &ScanReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else if !report.no_sessions {
        println!("{}", report.summary());
    }
    Ok(())
}

async fn run_watch(
    settings: &Settings,
    db: Arc<Database>,
    logger: Arc<Logger>,
    interval: Option<u64>,
    session_ids: &[String],
) -> Result<()> {
    let sink = Arc::new(BroadcastSink::default());
    let mut events = sink.subscribe();
    let manager = build_manager(settings, db, logger.clone(), sink)?;

    for id in session_ids {
        manager.watch_session(id)?;
    }

    let event_logger = logger.clone();
    let forward = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::SessionUpdated {
                    session_id,
                    messages,
                    ..
                }) => event_logger.log(&LogEvent::LiveUpdate {
                    session_id,
                    messages: messages.len(),
                }),
                // Announcements are logged by the manager.
                Ok(SessionEvent::SessionDetected { .. }) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Dropped live events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Ctrl+C flips the stop flag; the handler runs on its own thread.
    let (stop_tx, mut stop_rx) = tokio::sync::watch::channel(false);
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(true);
    })
    .context("Failed to set Ctrl+C handler")?;

    let mut scheduler = ScanScheduler::new(manager);
    if let Some(secs) = interval {
        scheduler = scheduler.with_interval(Duration::from_secs(secs));
    }
    let handle = scheduler.start();
    let mut status = handle.status();

    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                match current {
                    ScanStatus::NoSessions | ScanStatus::Stopped => break,
                    ScanStatus::Completed { report } => {
                        debug!(summary = %report.summary(), "Scan completed");
                    }
                    ScanStatus::Idle | ScanStatus::Scanning => {}
                }
            }
        }
    }

    handle.shutdown().await?;
    forward.abort();
    Ok(())
}
