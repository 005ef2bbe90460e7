use clap::Parser;
use runbar::cli::commands::{init, run};
use runbar::cli::{Cli, Commands};
use runbar::{ExitCode, Settings, logging};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let settings = match cli.config.as_ref() {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    };
    let settings = match settings {
        Ok(settings) => settings,
        Err(e) => {
            logging::init();
            eprintln!("Configuration error: {e}");
            return ExitCode::ConfigError.into();
        }
    };

    let live_region = match &cli.command {
        Commands::Run { progress, .. } | Commands::Replay { progress, .. } => {
            run::should_render(progress.unwrap_or(settings.progress.mode))
        }
        Commands::Init { .. } | Commands::Config => false,
    };
    logging::init_with_config(&settings.logging, live_region);
    tracing::debug!(target: "cli", "settings loaded");

    let code = match cli.command {
        Commands::Init { force } => init::run_init(force),
        Commands::Config => init::run_config(&settings),
        Commands::Run {
            target,
            progress,
            engine,
            engine_args,
        } => {
            let args = run::RunArgs {
                target,
                progress,
                engine,
                engine_args,
            };
            run::run(args, &settings).await
        }
        Commands::Replay { file, progress } => {
            run::replay(run::ReplayArgs { file, progress }, &settings).await
        }
    };

    if code != ExitCode::Success {
        tracing::debug!(target: "cli", "exiting: {}", code.description());
    }
    code.into()
}
