pub mod copier;
pub mod error;
pub mod gate;
pub mod runner;
pub mod skip_policy;
pub mod throttle;
pub mod tracker;
pub mod walker;

pub use copier::FileCopier;
pub use error::{CopyError, EntryKind, ErrorCategory};
pub use gate::ConcurrencyGate;
pub use runner::{BackupRunner, BackupSummary};
pub use skip_policy::{ChangeDetector, SkipDecision, SkipPolicy};
pub use throttle::MemoryThrottle;
pub use tracker::{CompletionTracker, TaskGuard};
pub use walker::TreeWalker;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default interval between memory samples while throttled.
pub const DEFAULT_MEMORY_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Shortest accepted sampling interval; a zero period cannot drive a timer.
pub const MIN_MEMORY_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Immutable description of one backup run.
///
/// Built once before any task starts and shared read-only behind an `Arc`.
#[derive(Debug, Clone)]
pub struct CopyJob {
    source_roots: Vec<PathBuf>,
    destination_root: PathBuf,
    max_concurrency: usize,
    max_memory_bytes: Option<u64>,
    overwrite_existing: bool,
    debug_logging: bool,
    directory_fan_out: DirectoryFanOut,
    comparison: ComparisonStrategy,
    memory_poll_interval: Duration,
}

impl CopyJob {
    /// Create a job with one file copy token per CPU, no memory ceiling,
    /// and skip-unchanged semantics.
    pub fn new<I, P>(source_roots: I, destination_root: impl Into<PathBuf>) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            source_roots: source_roots.into_iter().map(Into::into).collect(),
            destination_root: destination_root.into(),
            max_concurrency: num_cpus::get(),
            max_memory_bytes: None,
            overwrite_existing: false,
            debug_logging: false,
            directory_fan_out: DirectoryFanOut::Unbounded,
            comparison: ComparisonStrategy::ModifiedTime,
            memory_poll_interval: DEFAULT_MEMORY_POLL_INTERVAL,
        }
    }

    /// Zero is clamped to one token; a gate with no tokens would never admit a copy.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_max_memory_bytes(mut self, max_memory_bytes: Option<u64>) -> Self {
        self.max_memory_bytes = max_memory_bytes;
        self
    }

    pub fn with_overwrite(mut self, overwrite_existing: bool) -> Self {
        self.overwrite_existing = overwrite_existing;
        self
    }

    pub fn with_debug_logging(mut self, debug_logging: bool) -> Self {
        self.debug_logging = debug_logging;
        self
    }

    pub fn with_directory_fan_out(mut self, fan_out: DirectoryFanOut) -> Self {
        self.directory_fan_out = fan_out;
        self
    }

    pub fn with_comparison(mut self, comparison: ComparisonStrategy) -> Self {
        self.comparison = comparison;
        self
    }

    /// Clamped to [`MIN_MEMORY_POLL_INTERVAL`].
    pub fn with_memory_poll_interval(mut self, interval: Duration) -> Self {
        self.memory_poll_interval = interval.max(MIN_MEMORY_POLL_INTERVAL);
        self
    }

    pub fn source_roots(&self) -> &[PathBuf] {
        &self.source_roots
    }

    pub fn destination_root(&self) -> &PathBuf {
        &self.destination_root
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn max_memory_bytes(&self) -> Option<u64> {
        self.max_memory_bytes
    }

    pub fn overwrite_existing(&self) -> bool {
        self.overwrite_existing
    }

    pub fn debug_logging(&self) -> bool {
        self.debug_logging
    }

    pub fn directory_fan_out(&self) -> DirectoryFanOut {
        self.directory_fan_out
    }

    pub fn comparison(&self) -> ComparisonStrategy {
        self.comparison
    }

    pub fn memory_poll_interval(&self) -> Duration {
        self.memory_poll_interval
    }
}

/// How many directory listings may run at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryFanOut {
    /// Every discovered subdirectory is walked immediately; only file copies are gated.
    Unbounded,
    /// At most this many directories are listed concurrently.
    Bounded(usize),
}

/// How the skip policy decides that a destination file is already up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComparisonStrategy {
    ModifiedTime,
    SizeAndModifiedTime,
    ContentHash,
}

impl std::str::FromStr for ComparisonStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mtime" | "modified-time" => Ok(Self::ModifiedTime),
            "size-mtime" | "size-and-modified-time" => Ok(Self::SizeAndModifiedTime),
            "hash" | "content-hash" | "blake3" => Ok(Self::ContentHash),
            other => Err(format!("unknown comparison strategy: {}", other)),
        }
    }
}

/// "Mirror this source directory into that destination directory."
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryTask {
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// "Copy this one file."
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTask {
    pub source: PathBuf,
    pub destination: PathBuf,
}
