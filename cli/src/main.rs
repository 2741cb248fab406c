//! Warden CLI - inspect the tool sandbox and run single tool calls.
//!
//! ```text
//! warden [--config PATH] [--yes] <command>
//!
//!   tools                      list registered tools (built-in and discovered)
//!   check-command <cmd...>     classify a shell command
//!   check-path [--new] <path>  validate a path against the sandbox
//!   call <tool> [json-args]    run one tool call through the orchestrator
//!   restore <path>             undo the most recent overwrite of a file
//! ```
//!
//! Logs go to `~/.warden/logs/warden.log`; stdout carries only results.

use std::env;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use warden_engine::{
    ApprovalDecision, Approver, EventSink, FixedApprover, StdinApprover, ToolEvent, ToolEventKind,
    ToolOrchestrator, TurnCancellation, WardenConfig, bootstrap, build_settings,
};
use warden_tools::Existence;
use warden_types::ToolCall;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // No log file: stay quiet rather than mixing logs into command output.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_log_file() -> (Option<(PathBuf, std::fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".warden").join("logs").join("warden.log"));
    }

    // Fallback for read-only homes.
    candidates.push(PathBuf::from(".warden").join("logs").join("warden.log"));

    candidates
}

// ============================================================================
// Arguments
// ============================================================================

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Tools,
    CheckCommand(String),
    CheckPath { path: String, allow_missing: bool },
    Call { tool: String, arguments: String },
    Restore(String),
    Help,
}

#[derive(Debug, PartialEq, Eq)]
struct Cli {
    config: Option<PathBuf>,
    /// Approve every confirmation instead of prompting.
    yes: bool,
    command: Command,
}

const USAGE: &str = "usage: warden [--config PATH] [--yes] <tools | check-command CMD... | check-path [--new] PATH | call TOOL [JSON] | restore PATH>";

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Cli> {
    let mut args = args.into_iter().peekable();
    let mut config = None;
    let mut yes = false;

    while let Some(flag) = args.peek().filter(|a| a.starts_with("--")).cloned() {
        args.next();
        match flag.as_str() {
            "--config" => {
                let Some(path) = args.next() else {
                    bail!("--config needs a path");
                };
                config = Some(PathBuf::from(path));
            }
            "--yes" => yes = true,
            "--help" => {
                return Ok(Cli {
                    config,
                    yes,
                    command: Command::Help,
                });
            }
            other => bail!("unknown option {other}\n{USAGE}"),
        }
    }

    let command = match args.next().as_deref() {
        None | Some("help") => Command::Help,
        Some("tools") => Command::Tools,
        Some("check-command") => {
            let command = args.collect::<Vec<_>>().join(" ");
            if command.trim().is_empty() {
                bail!("check-command needs a command\n{USAGE}");
            }
            Command::CheckCommand(command)
        }
        Some("check-path") => {
            let mut allow_missing = false;
            let mut path = None;
            for arg in args {
                if arg == "--new" {
                    allow_missing = true;
                } else if path.is_none() {
                    path = Some(arg);
                } else {
                    bail!("check-path takes one path\n{USAGE}");
                }
            }
            let Some(path) = path else {
                bail!("check-path needs a path\n{USAGE}");
            };
            Command::CheckPath {
                path,
                allow_missing,
            }
        }
        Some("call") => {
            let Some(tool) = args.next() else {
                bail!("call needs a tool name\n{USAGE}");
            };
            let arguments = args.next().unwrap_or_else(|| "{}".to_string());
            if let Some(extra) = args.next() {
                bail!("unexpected argument {extra}; quote the JSON arguments\n{USAGE}");
            }
            Command::Call { tool, arguments }
        }
        Some("restore") => {
            let (Some(path), None) = (args.next(), args.next()) else {
                bail!("restore takes one path\n{USAGE}");
            };
            Command::Restore(path)
        }
        Some(other) => bail!("unknown command {other}\n{USAGE}"),
    };

    Ok(Cli {
        config,
        yes,
        command,
    })
}

// ============================================================================
// Console output
// ============================================================================

/// Prints tool lifecycle events to stderr and mirrors them to the log.
struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn emit(&self, event: ToolEvent) {
        match &event.kind {
            ToolEventKind::Init {
                tool_name,
                description,
            } => eprintln!("▶ {tool_name}: {description}"),
            ToolEventKind::Update { text, .. } => {
                for line in text.lines() {
                    eprintln!("  {line}");
                }
            }
            ToolEventKind::Completion { summary } => eprintln!("✓ {summary}"),
            ToolEventKind::Error { status, message } => {
                eprintln!("✗ [{}] {message}", status.as_str());
            }
        }
        tracing::debug!(call_id = %event.tool_call_id, kind = ?event.kind, "Tool event");
    }
}

// ============================================================================
// Commands
// ============================================================================

fn load_config(cli: &Cli) -> Result<WardenConfig> {
    match &cli.config {
        Some(path) => WardenConfig::load_from(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(WardenConfig::load()
            .context("loading config")?
            .unwrap_or_default()),
    }
}

async fn list_tools(config: &WardenConfig) -> Result<ExitCode> {
    let working_dir = env::current_dir()?;
    let session = bootstrap(config, &working_dir).await?;

    for root in session.settings.sandbox.roots().iter() {
        println!("root        {}", root.display());
    }
    for descriptor in session.registry.descriptors() {
        println!(
            "{:<11} {:<11} {}",
            descriptor.name(),
            descriptor.interaction().as_str(),
            descriptor.description().lines().next().unwrap_or_default()
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn check_command(config: &WardenConfig, command: &str) -> Result<ExitCode> {
    let settings = build_settings(config, &env::current_dir()?)?;
    let verdict = settings.classifier.classify(command);
    if verdict.is_blocked() {
        println!("{verdict}");
        println!("detector: {}", verdict.detector.as_str());
        return Ok(ExitCode::FAILURE);
    }
    println!("allowed");
    Ok(ExitCode::SUCCESS)
}

fn check_path(config: &WardenConfig, path: &str, allow_missing: bool) -> Result<ExitCode> {
    let settings = build_settings(config, &env::current_dir()?)?;
    let existence = if allow_missing {
        Existence::Optional
    } else {
        Existence::Required
    };
    match settings
        .sandbox
        .validate(path, &settings.sandbox.working_dir(), existence)
    {
        Ok(resolved) => {
            println!("{}", resolved.display());
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            println!("rejected: {e}");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn restore(config: &WardenConfig, path: &str) -> Result<ExitCode> {
    let settings = build_settings(config, &env::current_dir()?)?;
    let resolved = match settings.sandbox.validate(
        path,
        &settings.sandbox.working_dir(),
        Existence::Optional,
    ) {
        Ok(resolved) => resolved,
        Err(e) => {
            println!("rejected: {e}");
            return Ok(ExitCode::FAILURE);
        }
    };

    match warden_utils::restore_latest_backup(&resolved)
        .with_context(|| format!("restoring {}", resolved.display()))?
    {
        Some(backup) => {
            println!("restored {} from {}", resolved.display(), backup.display());
            Ok(ExitCode::SUCCESS)
        }
        None => {
            println!("no backup of {}", resolved.display());
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn call_tool(cli: &Cli, config: &WardenConfig, tool: &str, arguments: &str) -> Result<ExitCode> {
    let working_dir = env::current_dir()?;
    let session = bootstrap(config, &working_dir).await?;
    let approver: Arc<dyn Approver> = if cli.yes {
        Arc::new(FixedApprover(ApprovalDecision::Approve))
    } else {
        Arc::new(StdinApprover)
    };
    let mut orchestrator = ToolOrchestrator::new(
        Arc::clone(&session.registry),
        session.settings.clone(),
        Arc::new(ConsoleSink),
        approver,
    )
    .with_max_iterations(session.max_iterations_per_turn);

    let cancel = TurnCancellation::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let call = ToolCall::from_raw("cli-1", tool, arguments);
    let results = orchestrator.dispatch(&[call], None, &cancel).await;
    let Some(result) = results.into_iter().next() else {
        bail!("no result for tool call");
    };

    println!("{}", result.output.to_text());
    Ok(if result.status.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();

    let cli = parse_args(env::args().skip(1))?;
    if cli.command == Command::Help {
        println!("{USAGE}");
        return Ok(ExitCode::SUCCESS);
    }

    let config = load_config(&cli)?;
    match &cli.command {
        Command::Tools => list_tools(&config).await,
        Command::CheckCommand(command) => check_command(&config, command),
        Command::CheckPath {
            path,
            allow_missing,
        } => check_path(&config, path, *allow_missing),
        Command::Call { tool, arguments } => call_tool(&cli, &config, tool, arguments).await,
        Command::Restore(path) => restore(&config, path),
        Command::Help => Ok(ExitCode::SUCCESS),
    }
}
