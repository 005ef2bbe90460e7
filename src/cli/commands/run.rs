//! Run and Replay commands.
//!
//! Both feed an engine message stream through the progress mapper, then print
//! the outcome:
//! - `SUCCESS` / `FAILURE` and the engine's result object on stdout
//! - every log line the engine sent during the run
//!
//! The display is always torn down before anything else is printed, including
//! on errors and Ctrl-C.

use anyhow::Context;
use console::{Term, style};
use std::io::{self, Write};
use std::path::PathBuf;

use crate::config::{ProgressMode, Settings};
use crate::engine::{EngineMessage, EngineRun, EngineSource, LogEntry, RunResult, describe_replay};
use crate::exit_code::ExitCode;
use crate::lifecycle::{ProgressMapper, RenderPolicy};
use crate::progress::MultiProgressBar;
use crate::target::Target;

/// Arguments for the run command.
pub struct RunArgs {
    pub target: Target,
    pub progress: Option<ProgressMode>,
    pub engine: Option<String>,
    pub engine_args: Vec<String>,
}

/// Arguments for the replay command.
pub struct ReplayArgs {
    pub file: PathBuf,
    pub progress: Option<ProgressMode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    Finished,
    Interrupted,
}

/// What the engine told us besides progress.
#[derive(Debug, Default)]
struct Session {
    result: Option<RunResult>,
    logs: Vec<LogEntry>,
}

/// Run the run command.
pub async fn run(args: RunArgs, settings: &Settings) -> ExitCode {
    let RunArgs {
        target,
        progress,
        engine,
        engine_args,
    } = args;

    if let Err(message) = check_forwarded_args(&engine_args) {
        eprintln!("Error: {message}");
        return ExitCode::ConfigError;
    }

    let command = match engine.as_deref().map(split_command_line) {
        Some(Ok(command)) => command,
        Some(Err(message)) => {
            eprintln!("Error: {message}");
            return ExitCode::ConfigError;
        }
        None => settings.engine.command.clone(),
    };
    let extra = std::iter::once(target.to_string()).chain(engine_args);
    let source = match EngineSource::command(&command, extra) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::ConfigError;
        }
    };

    tracing::info!(target: "cli", "running {target}");
    execute(&source, progress, settings).await
}

/// Run the replay command.
pub async fn replay(args: ReplayArgs, settings: &Settings) -> ExitCode {
    let path = (args.file.as_os_str() != "-").then_some(args.file);
    tracing::info!(target: "cli", "replaying {}", describe_replay(path.as_deref()));
    execute(&EngineSource::Replay(path), args.progress, settings).await
}

async fn execute(source: &EngineSource, mode: Option<ProgressMode>, settings: &Settings) -> ExitCode {
    let mut session = Session::default();
    let show = should_render(mode.unwrap_or(settings.progress.mode));
    let outcome = drive(source, show, settings, &mut session).await;
    report(outcome, session)
}

/// Whether to draw the live region for `mode`.
pub fn should_render(mode: ProgressMode) -> bool {
    match mode {
        ProgressMode::Always => true,
        ProgressMode::Never => false,
        ProgressMode::Auto => Term::stderr().is_term(),
    }
}

/// Width of the terminal behind stderr, where the region is drawn.
pub fn terminal_columns() -> Option<usize> {
    let tty = Term::stderr().size_checked().map(|(_rows, columns)| columns);
    pick_columns(tty, std::env::var("COLUMNS").ok().as_deref())
}

/// Prefer the tty's own width, then `COLUMNS`. `None` falls back to `max_width`.
fn pick_columns(tty: Option<u16>, env: Option<&str>) -> Option<usize> {
    tty.map(usize::from)
        .or_else(|| env.and_then(|value| value.trim().parse().ok()))
        .filter(|&columns| columns > 0)
}

/// Split an `--engine` command line with shell quoting rules.
pub fn split_command_line(line: &str) -> Result<Vec<String>, String> {
    shlex::split(line).ok_or_else(|| format!("Unbalanced quotes in engine command: {line}"))
}

async fn drive(
    source: &EngineSource,
    show: bool,
    settings: &Settings,
    session: &mut Session,
) -> anyhow::Result<Completion> {
    let mut engine = EngineRun::start(source, settings.engine.channel_capacity)
        .await
        .context("Failed to start engine")?;

    let stream: Box<dyn Write + Send> = if show {
        Box::new(io::stderr())
    } else {
        Box::new(io::sink())
    };
    let options = settings.progress.bar_options(terminal_columns());
    let bars = MultiProgressBar::with_options(settings.progress.template.clone(), stream, options);
    let policy = RenderPolicy {
        max_lines: settings.progress.max_lines,
        order: settings.progress.order,
    };
    let mut mapper = ProgressMapper::with_policy(bars, policy);

    let completion = consume(&mut engine, &mut mapper, session).await;
    mapper
        .terminate()
        .context("Failed to clear progress display")?;
    let completion = completion?;

    if completion == Completion::Interrupted {
        engine.kill().await.context("Failed to stop engine")?;
    }
    let status = engine.finish().await.context("Engine stream failed")?;
    if let Some(status) = status.filter(|status| !status.success()) {
        tracing::warn!(target: "engine", "engine exited with {status}");
        if session.result.is_none() && completion == Completion::Finished {
            anyhow::bail!("Engine exited with {status} before reporting a result");
        }
    }
    Ok(completion)
}

/// Single consumer: every message is handled to completion before the next.
async fn consume<W: Write>(
    engine: &mut EngineRun,
    mapper: &mut ProgressMapper<W>,
    session: &mut Session,
) -> anyhow::Result<Completion> {
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            message = engine.next() => match message {
                Some(EngineMessage::Progress(event)) => {
                    mapper.handle(&event).context("Failed to render progress")?;
                }
                Some(EngineMessage::Log(entry)) => session.logs.push(entry),
                Some(EngineMessage::Result(result)) => session.result = Some(result),
                None => return Ok(Completion::Finished),
            },
            _ = &mut interrupt => return Ok(Completion::Interrupted),
        }
    }
}

fn report(outcome: anyhow::Result<Completion>, session: Session) -> ExitCode {
    let Session { result, logs } = session;

    match (outcome, result) {
        (Ok(Completion::Interrupted), _) => {
            println!("{}", style("INTERRUPTED").yellow());
            print_logs(&logs);
            ExitCode::Interrupted
        }
        (Ok(Completion::Finished), Some(result)) => {
            if result.success {
                println!("{}", style("SUCCESS").green());
            } else {
                println!("{}", style("FAILURE").red());
            }
            println!("Result: {}", result.to_display_json());
            print_logs(&logs);
            ExitCode::from_success(result.success)
        }
        (Ok(Completion::Finished), None) => {
            println!("{}", style("ERROR").red());
            print_logs(&logs);
            eprintln!("Engine finished without reporting a result");
            ExitCode::EngineError
        }
        (Err(e), _) => {
            println!("{}", style("ERROR").red());
            print_logs(&logs);
            eprintln!("Exception:");
            eprintln!("{e:#}");
            ExitCode::EngineError
        }
    }
}

fn print_logs(logs: &[LogEntry]) {
    println!("\nLogs:");
    for entry in logs {
        println!("{entry}");
    }
}

/// Reject camelCase options; the engine expects kebab-case.
pub fn check_forwarded_args(args: &[String]) -> Result<(), String> {
    for arg in args {
        let Some(option) = arg.strip_prefix("--") else {
            continue;
        };
        let name = option.split('=').next().unwrap_or(option);
        if name.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(format!(
                "Unknown argument {name}. Did you mean {}?",
                to_kebab_case(name)
            ));
        }
    }
    Ok(())
}

fn to_kebab_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            out.push('-');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
