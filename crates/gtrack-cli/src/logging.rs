use crate::error::{CliError, Result};
use std::fs::File;
use std::path::Path;
use tracing_subscriber::{
    filter::{LevelFilter, Targets},
    fmt::{self},
    prelude::*,
};

/// Crates whose events follow the verbosity flags; everything else is capped at `WARN`.
const OWN_TARGETS: [&str; 2] = ["gtrack", "gtrack_cli"];

pub fn level_for(verbosity: u8, quiet: bool) -> LevelFilter {
    if quiet {
        LevelFilter::ERROR
    } else {
        match verbosity {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }
}

fn targets(level: LevelFilter) -> Targets {
    OWN_TARGETS
        .iter()
        .fold(Targets::new().with_default(LevelFilter::WARN.min(level)), |t, name| {
            t.with_target(*name, level)
        })
}

/// Installs the global subscriber: a compact stderr layer and, if requested, a file layer.
///
/// The file always receives at least `INFO` so that a run leaves a usable record even
/// when the console is quiet.
pub fn setup_logging(verbosity: u8, quiet: bool, log_file: Option<&Path>) -> Result<()> {
    let console_level = level_for(verbosity, quiet);

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(false)
        .compact()
        .with_filter(targets(console_level));

    let file_layer = match log_file {
        Some(path) => {
            let file = File::create(path)?;
            let file_level = console_level.max(LevelFilter::INFO);
            Some(
                fmt::layer()
                    .with_writer(file)
                    .with_ansi(false)
                    .with_thread_ids(true)
                    .with_target(true)
                    .with_filter(targets(file_level)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| CliError::Other(anyhow::anyhow!("Failed to install the logger: {}", e)))
}
