//! src/logging.rs
//!
//! `tracing-subscriber` initialization: verbosity maps to an `EnvFilter`
//! default level, format selects between human-readable and JSON layers.

use tracing_subscriber::EnvFilter;

use crate::cli::LogFormat;

fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

fn env_filter(verbosity: u8) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_for(verbosity)))
}

/// Install the global `tracing` subscriber. Call once, at process startup.
///
/// `RUST_LOG` overrides `verbosity` when set, matching `tracing-subscriber`'s
/// usual precedence.
pub fn init(verbosity: u8, format: LogFormat) {
    let filter = env_filter(verbosity);
    match format {
        LogFormat::Text => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        }
    }
}
