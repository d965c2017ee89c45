use crate::backup::{ComparisonStrategy, CopyJob, DirectoryFanOut};
use anyhow::{bail, ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directories to back up
    pub source_dirs: Vec<PathBuf>,

    /// Backup destination path
    pub backup_dest: PathBuf,

    /// Files copied at once (0 = auto based on CPU)
    pub max_concurrency: usize,

    /// Process memory ceiling in MB (0 = unbounded)
    pub max_memory_mb: u64,

    /// How often a throttled copy re-samples memory
    pub memory_poll_ms: u64,

    /// Recopy files even when the destination looks up to date
    pub overwrite: bool,

    /// Verbose logging
    pub debug: bool,

    /// Append log lines to this file instead of stderr
    pub log_file: Option<PathBuf>,

    /// Emit JSON log lines
    pub log_json: bool,

    /// Directories listed at once (0 = unbounded)
    pub max_directory_tasks: usize,

    /// How unchanged files are detected
    pub compare_by: ComparisonStrategy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_dirs: Vec::new(),
            backup_dest: PathBuf::new(),
            max_concurrency: 0, // Auto-detect
            max_memory_mb: 0,
            memory_poll_ms: 1000,
            overwrite: false,
            debug: false,
            log_file: None,
            log_json: false,
            max_directory_tasks: 0,
            compare_by: ComparisonStrategy::ModifiedTime,
        }
    }
}

impl Config {
    /// Load config from environment
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key/value source; `lookup` returns `None` for unset keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(sources) = lookup("BACKUP_SOURCES") {
            config.source_dirs = std::env::split_paths(&sources)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
        }

        if let Some(dest) = lookup("BACKUP_DEST") {
            config.backup_dest = PathBuf::from(dest);
        }

        if let Some(concurrency) = lookup("MAX_CONCURRENCY") {
            config.max_concurrency = concurrency
                .trim()
                .parse::<usize>()
                .with_context(|| format!("MAX_CONCURRENCY must be a number, got {:?}", concurrency))?;
        }

        if let Some(memory) = lookup("MAX_MEMORY_MB") {
            config.max_memory_mb = memory
                .trim()
                .parse::<u64>()
                .with_context(|| format!("MAX_MEMORY_MB must be a number, got {:?}", memory))?;
        }

        if let Some(poll) = lookup("MEMORY_POLL_MS") {
            config.memory_poll_ms = poll
                .trim()
                .parse::<u64>()
                .with_context(|| format!("MEMORY_POLL_MS must be a number, got {:?}", poll))?;
        }

        if let Some(overwrite) = lookup("OVERWRITE") {
            config.overwrite = parse_flag("OVERWRITE", &overwrite)?;
        }

        if let Some(debug) = lookup("BACKUP_DEBUG") {
            config.debug = parse_flag("BACKUP_DEBUG", &debug)?;
        }

        if let Some(log_file) = lookup("BACKUP_LOG_FILE") {
            if !log_file.trim().is_empty() {
                config.log_file = Some(PathBuf::from(log_file));
            }
        }

        if let Some(format) = lookup("LOG_FORMAT") {
            config.log_json = match format.trim().to_ascii_lowercase().as_str() {
                "json" => true,
                "text" | "" => false,
                other => bail!("LOG_FORMAT must be 'text' or 'json', got {:?}", other),
            };
        }

        if let Some(directories) = lookup("MAX_DIRECTORY_TASKS") {
            config.max_directory_tasks = directories.trim().parse::<usize>().with_context(|| {
                format!("MAX_DIRECTORY_TASKS must be a number, got {:?}", directories)
            })?;
        }

        if let Some(compare) = lookup("COMPARE_BY") {
            config.compare_by = compare
                .parse::<ComparisonStrategy>()
                .map_err(anyhow::Error::msg)?;
        }

        // Auto-detect concurrency if not set
        if config.max_concurrency == 0 {
            config.max_concurrency = num_cpus::get();
        }

        Ok(config)
    }

    /// Validate paths and freeze the settings into a [`CopyJob`].
    pub fn to_job(&self) -> Result<CopyJob> {
        ensure!(
            !self.source_dirs.is_empty(),
            "no source directories configured (set BACKUP_SOURCES)"
        );
        ensure!(
            !self.backup_dest.as_os_str().is_empty(),
            "no destination directory configured (set BACKUP_DEST)"
        );

        let mut sources = Vec::with_capacity(self.source_dirs.len());
        for source in &self.source_dirs {
            sources.push(existing_directory("source", source)?);
        }
        let destination = existing_directory("destination", &self.backup_dest)?;

        let fan_out = match self.max_directory_tasks {
            0 => DirectoryFanOut::Unbounded,
            n => DirectoryFanOut::Bounded(n),
        };
        let max_memory_bytes = match self.max_memory_mb {
            0 => None,
            mb => Some(mb.saturating_mul(1_048_576)),
        };

        Ok(CopyJob::new(sources, destination)
            .with_max_concurrency(self.max_concurrency)
            .with_max_memory_bytes(max_memory_bytes)
            .with_memory_poll_interval(Duration::from_millis(self.memory_poll_ms.max(1)))
            .with_overwrite(self.overwrite)
            .with_debug_logging(self.debug)
            .with_directory_fan_out(fan_out)
            .with_comparison(self.compare_by))
    }
}

pub fn load_config() -> Result<Config> {
    Config::load()
}

fn existing_directory(role: &str, path: &Path) -> Result<PathBuf> {
    let resolved = path
        .canonicalize()
        .with_context(|| format!("{} directory does not exist: {}", role, path.display()))?;
    ensure!(
        resolved.is_dir(),
        "{} path is not a directory: {}",
        role,
        path.display()
    );
    Ok(resolved)
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "s" | "on" => Ok(true),
        "0" | "false" | "no" | "n" | "off" | "" => Ok(false),
        other => bail!("{} must be a yes/no value, got {:?}", key, other),
    }
}
