//! Process-wide `tracing` subscriber.
//!
//! Levels come from `[logging]` in the config file:
//!
//! ```toml
//! [logging]
//! default = "info"
//!
//! [logging.modules]
//! ragvault_core = "debug"
//! tower_http = "debug"
//! ```
//!
//! `RUST_LOG` takes precedence over config when set:
//! ```bash
//! RUST_LOG=rvault=debug,ragvault_core=trace rvault serve
//! ```
//!
//! Output goes to stderr so command results on stdout stay pipeable.

use std::sync::Once;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// HH:MM:SS.mmm in local time.
struct CompactTime;

impl FormatTime for CompactTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// Filter directive string built from config, e.g. `info,ragvault_core=debug`.
pub fn filter_directives(config: &LoggingConfig) -> String {
    let mut directives = config.default.clone();
    for (module, level) in &config.modules {
        directives.push_str(&format!(",{module}={level}"));
    }
    directives
}

/// Install the global subscriber. Only the first call has any effect.
pub fn init_with_config(config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::try_new(filter_directives(config))
                .unwrap_or_else(|_| EnvFilter::new("info"))
        };

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_timer(CompactTime)
            .with_level(true)
            .with_filter(filter);

        let _ = tracing_subscriber::registry().with(fmt_layer).try_init();
    });
}

pub fn init() {
    init_with_config(&LoggingConfig::default());
}
