//! CLI argument parsing using clap.

use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

use crate::config::ProgressMode;
use crate::target::Target;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Run a target on an external engine with live progress
#[derive(Parser)]
#[command(
    name = "runbar",
    version = env!("CARGO_PKG_VERSION"),
    about = "Run a project target with live multi-task progress",
    long_about = "Dispatch a project target to the configured task engine and render one progress line per running task.",
    styles = clap_cargo_style()
)]
pub struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Initialize project
    #[command(about = "Create .runbar/settings.toml with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Run a project target
    #[command(
        about = "Run project:target[:configuration] on the task engine",
        after_help = "Examples:\n  runbar run app:build\n  runbar run app:build:production -- --source-map\n  runbar run app:test --progress never"
    )]
    Run {
        /// Target to run, e.g. app:build:production
        target: Target,

        /// When to draw progress (overrides settings.toml)
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,

        /// Engine command line (overrides [engine] command)
        #[arg(long, value_name = "COMMAND")]
        engine: Option<String>,

        /// Options forwarded to the engine, in kebab-case
        #[arg(last = true, value_name = "ENGINE_ARGS")]
        engine_args: Vec<String>,
    },

    /// Replay a recorded engine stream
    #[command(about = "Render a recorded JSON Lines engine stream (use - for stdin)")]
    Replay {
        /// JSON Lines file, or - for stdin
        #[arg(value_name = "FILE", default_value = "-")]
        file: PathBuf,

        /// When to draw progress (overrides settings.toml)
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Show current configuration settings
    #[command(about = "Display active settings")]
    Config,
}
