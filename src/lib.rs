pub mod cli;
pub mod config;
pub mod engine;
pub mod exit_code;
pub mod lifecycle;
pub mod logging;
pub mod progress;
pub mod target;

pub use config::Settings;
pub use engine::{EngineError, EngineMessage, EngineRun, EngineSource};
pub use exit_code::ExitCode;
pub use lifecycle::{ProgressEvent, ProgressMapper, TaskLine, TaskState};
pub use progress::{BarData, BarOptions, MultiProgressBar};
pub use target::Target;
