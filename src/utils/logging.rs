use super::config::Config;
use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

/// Where and how log lines are written.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub debug: bool,
    pub log_file: Option<PathBuf>,
    pub json: bool,
}

impl From<&Config> for LogOptions {
    fn from(config: &Config) -> Self {
        Self {
            debug: config.debug,
            log_file: config.log_file.clone(),
            json: config.log_json,
        }
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the debug flag.
pub fn init_tracing(options: &LogOptions) -> Result<()> {
    let default_level = if options.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let writer = match &options.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(options.log_file.is_none())
        .with_target(false);

    let installed = if options.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {}", e))
}
