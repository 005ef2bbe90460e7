//! Diagnostic logging.
//!
//! Compact timestamped output on stderr with per-target level configuration.
//! The default level is `warn`: anything chattier shares stderr with the live
//! progress region and will scroll it. While a region is drawn, the renderer's
//! own targets drop to `error` (see [`LIVE_REGION_TARGETS`]).
//!
//! # Configuration
//!
//! ```toml
//! [logging]
//! default = "warn"
//!
//! [logging.modules]
//! engine = "debug"
//! ```
//!
//! `RUST_LOG` takes precedence over config:
//! ```bash
//! RUST_LOG=engine=debug,progress=trace runbar run app:build
//! ```

use std::sync::Once;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// Compact time format: HH:MM:SS.mmm
struct CompactTime;

impl FormatTime for CompactTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// Targets that emit while the progress region is on screen.
///
/// Log lines share stderr with the region and would push it down a row, so
/// during a live run these default to `error` unless `[logging.modules]`
/// names them explicitly.
pub const LIVE_REGION_TARGETS: &[&str] = &["engine", "progress"];

/// Build the filter directive string from config.
pub fn filter_directives(config: &LoggingConfig, live_region: bool) -> String {
    let mut directives: Vec<(&str, &str)> = config
        .modules
        .iter()
        .map(|(module, level)| (module.as_str(), level.as_str()))
        .collect();
    if live_region {
        directives.extend(
            LIVE_REGION_TARGETS
                .iter()
                .filter(|target| !config.modules.contains_key(**target))
                .map(|target| (*target, "error")),
        );
    }
    directives.sort();

    let mut filter_str = config.default.clone();
    for (module, level) in directives {
        filter_str.push_str(&format!(",{module}={level}"));
    }
    filter_str
}

/// Initialize logging with configuration.
///
/// `live_region` is true when a progress region will be drawn on stderr.
/// Call once at startup; later calls are ignored.
pub fn init_with_config(config: &LoggingConfig, live_region: bool) {
    INIT.call_once(|| {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::new(filter_directives(config, live_region))
        };

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_timer(CompactTime)
            .with_level(true)
            .with_filter(filter);

        tracing_subscriber::registry().with(fmt_layer).init();
    });
}

/// Initialize logging with `LoggingConfig::default()`.
pub fn init() {
    init_with_config(&LoggingConfig::default(), false);
}
