//! Process exit codes.

/// Outcome of a command, as seen by the shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    /// The engine reported success
    Success = 0,
    /// The engine reported failure
    Failure = 1,
    /// The engine crashed, could not start, or never reported a result
    EngineError = 2,
    /// Settings could not be loaded or are incomplete
    ConfigError = 3,
    /// Interrupted by the user
    Interrupted = 130,
}

impl ExitCode {
    pub fn description(self) -> &'static str {
        match self {
            ExitCode::Success => "success",
            ExitCode::Failure => "run failed",
            ExitCode::EngineError => "engine error",
            ExitCode::ConfigError => "configuration error",
            ExitCode::Interrupted => "interrupted",
        }
    }

    pub fn from_success(success: bool) -> Self {
        if success {
            ExitCode::Success
        } else {
            ExitCode::Failure
        }
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code as u8)
    }
}
