//! Configuration for runbar.
//!
//! Layered configuration, later layers win:
//! - Default values
//! - `.runbar/settings.toml`, searched from the current directory upward
//! - Environment variable overrides
//! - CLI argument overrides (applied by the command handlers)
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `RUNBAR_` and use double
//! underscores to separate nested levels:
//! - `RUNBAR_PROGRESS__MAX_WIDTH=100` sets `progress.max_width`
//! - `RUNBAR_PROGRESS__MODE=never` sets `progress.mode`
//! - `RUNBAR_LOGGING__DEFAULT=debug` sets `logging.default`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::progress::{BarOptions, DEFAULT_MAX_WIDTH, DEFAULT_TEMPLATE};

pub const CONFIG_DIR: &str = ".runbar";
pub const CONFIG_FILE: &str = "settings.toml";
const ENV_PREFIX: &str = "RUNBAR_";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Settings {
    /// Progress display settings
    #[serde(default)]
    pub progress: ProgressConfig,

    /// External engine settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Log levels
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// When to draw the live progress region.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProgressMode {
    /// Only when standard error is a terminal
    #[default]
    Auto,
    Always,
    Never,
}

/// Order in which task lines are drawn.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DrawOrder {
    /// First-seen task first
    #[default]
    Insertion,
    /// Alphabetical by display name
    Name,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProgressConfig {
    #[serde(default)]
    pub mode: ProgressMode,

    /// Line template; see `progress::bar` for the tokens
    #[serde(default = "default_template")]
    pub template: String,

    /// Maximum bar width, also the line width when the terminal width is unknown
    #[serde(default = "default_max_width")]
    pub max_width: usize,

    #[serde(default = "default_complete_char")]
    pub complete_char: char,

    #[serde(default = "default_incomplete_char")]
    pub incomplete_char: char,

    /// Erase the progress region when the run finishes
    #[serde(default = "default_true")]
    pub clear_on_terminate: bool,

    #[serde(default = "default_true")]
    pub hide_cursor: bool,

    /// Draw at most this many task lines per repaint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_lines: Option<usize>,

    #[serde(default)]
    pub order: DrawOrder,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EngineConfig {
    /// Program and leading arguments; the target string is appended
    #[serde(default)]
    pub command: Vec<String>,

    /// Capacity of the engine → renderer message channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-target overrides, e.g. `engine = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

// Default value functions
fn default_template() -> String {
    DEFAULT_TEMPLATE.to_string()
}
fn default_max_width() -> usize {
    DEFAULT_MAX_WIDTH
}
fn default_complete_char() -> char {
    '#'
}
fn default_incomplete_char() -> char {
    '.'
}
fn default_true() -> bool {
    true
}
fn default_channel_capacity() -> usize {
    256
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            mode: ProgressMode::default(),
            template: default_template(),
            max_width: default_max_width(),
            complete_char: default_complete_char(),
            incomplete_char: default_incomplete_char(),
            clear_on_terminate: true,
            hide_cursor: true,
            max_lines: None,
            order: DrawOrder::default(),
        }
    }
}

impl ProgressConfig {
    /// Bar options for a terminal that is `columns` wide, if known.
    pub fn bar_options(&self, columns: Option<usize>) -> BarOptions {
        BarOptions::default()
            .with_max_width(self.max_width)
            .with_columns(columns)
            .with_chars(self.complete_char, self.incomplete_char)
            .clear(self.clear_on_terminate)
            .hide_cursor(self.hide_cursor)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file, still honoring env overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            // Double underscore separates nesting; single underscores stay in field names
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Find `.runbar/settings.toml` from the current directory upward
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .map(|ancestor| ancestor.join(CONFIG_DIR))
            .find(|dir| dir.is_dir())
            .map(|dir| dir.join(CONFIG_FILE))
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Write a default settings file under `dir`
    pub fn init_config_file(dir: &Path, force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = dir.join(CONFIG_DIR).join(CONFIG_FILE);

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        Settings::default().save(&config_path)?;
        Ok(config_path)
    }
}
