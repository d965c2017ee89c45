use super::copier::FileCopier;
use super::error::CopyError;
use super::gate::ConcurrencyGate;
use super::skip_policy::{ChangeDetector, SkipPolicy};
use super::throttle::MemoryThrottle;
use super::tracker::CompletionTracker;
use super::walker::TreeWalker;
use super::{CopyJob, DirectoryFanOut, DirectoryTask, FileTask};
use crate::utils::log_buffer::{LogBuffer, LogKind};
use crate::utils::resource_monitor::{MemoryProbe, ResourceMonitor};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{error, info};
use uuid::Uuid;

/// Everything the tasks of one run share. Built once, read-only apart from
/// the atomic counters, the gates and the tracker.
pub(crate) struct BackupContext {
    pub(crate) job: Arc<CopyJob>,
    pub(crate) gate: ConcurrencyGate,
    pub(crate) directory_gate: Option<Arc<Semaphore>>,
    pub(crate) throttle: MemoryThrottle,
    pub(crate) skip_policy: SkipPolicy,
    pub(crate) copier: FileCopier,
    pub(crate) tracker: CompletionTracker,
    pub(crate) stats: RunStats,
    pub(crate) log_buffer: Option<LogBuffer>,
}

#[derive(Default)]
pub(crate) struct RunStats {
    pub(crate) directories_mirrored: AtomicU64,
    pub(crate) files_copied: AtomicU64,
    pub(crate) files_skipped: AtomicU64,
    pub(crate) bytes_copied: AtomicU64,
    pub(crate) failures: AtomicU64,
}

impl BackupContext {
    pub(crate) fn record(&self, kind: LogKind, message: String, path: &Path) {
        if let Some(log_buffer) = &self.log_buffer {
            log_buffer.add_log(kind, message, Some(path.display().to_string()));
        }
    }

    pub(crate) fn file_failed(&self, task: &FileTask, err: &CopyError) {
        error!(
            source = %task.source.display(),
            destination = %task.destination.display(),
            category = %err.category(),
            "File copy failed: {}",
            err
        );
        self.record(LogKind::FileFailed, err.to_string(), &task.source);
        self.stats.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn directory_failed(&self, task: &DirectoryTask, err: &CopyError) {
        error!(
            source = %task.source.display(),
            destination = %task.destination.display(),
            category = %err.category(),
            "Directory copy failed: {}",
            err
        );
        self.record(LogKind::DirectoryFailed, err.to_string(), &task.source);
        self.stats.failures.fetch_add(1, Ordering::Relaxed);
    }
}

/// Outcome of a run. Informational: a run always completes, and individual
/// failures are reported through the log records.
#[derive(Debug, Clone)]
pub struct BackupSummary {
    pub run_id: Uuid,
    pub elapsed: Duration,
    pub directories_mirrored: u64,
    pub files_copied: u64,
    pub files_skipped: u64,
    pub bytes_copied: u64,
    pub failures: u64,
    pub peak_concurrent_copies: usize,
}

/// Runs a [`CopyJob`] to completion.
pub struct BackupRunner {
    job: Arc<CopyJob>,
    memory_probe: Option<Arc<dyn MemoryProbe>>,
    change_detector: Option<Arc<dyn ChangeDetector>>,
    copier: FileCopier,
    log_buffer: Option<LogBuffer>,
}

impl BackupRunner {
    pub fn new(job: CopyJob) -> Self {
        Self {
            job: Arc::new(job),
            memory_probe: None,
            change_detector: None,
            copier: FileCopier::new(),
            log_buffer: None,
        }
    }

    /// Replace the process memory sampler used by the throttle.
    pub fn with_memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.memory_probe = Some(probe);
        self
    }

    /// Replace the comparison chosen by the job's [`ComparisonStrategy`](super::ComparisonStrategy).
    pub fn with_change_detector(mut self, detector: Arc<dyn ChangeDetector>) -> Self {
        self.change_detector = Some(detector);
        self
    }

    pub fn with_copier(mut self, copier: FileCopier) -> Self {
        self.copier = copier;
        self
    }

    /// Mirror every log record into `log_buffer` as well.
    pub fn with_log_buffer(mut self, log_buffer: LogBuffer) -> Self {
        self.log_buffer = Some(log_buffer);
        self
    }

    pub fn job(&self) -> &CopyJob {
        &self.job
    }

    /// Walk every source root and wait until every spawned task has retired.
    pub async fn run(&self) -> BackupSummary {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let job = &self.job;

        info!(
            %run_id,
            sources = job.source_roots().len(),
            destination = %job.destination_root().display(),
            max_concurrency = job.max_concurrency(),
            max_memory_bytes = ?job.max_memory_bytes(),
            overwrite = job.overwrite_existing(),
            "Starting backup"
        );

        let ctx = Arc::new(self.build_context());
        let walker = TreeWalker::new(ctx.clone());

        // First root wins a destination. A later overlapping root would race
        // its file writes.
        let mut claimed: Vec<(&PathBuf, PathBuf)> = Vec::with_capacity(job.source_roots().len());
        for root in job.source_roots() {
            let destination = match root.file_name() {
                Some(name) => job.destination_root().join(name),
                None => job.destination_root().clone(),
            };
            let task = DirectoryTask {
                source: root.clone(),
                destination,
            };

            let overlap = claimed.iter().find(|(_, taken)| {
                task.destination.starts_with(taken) || taken.starts_with(&task.destination)
            });
            if let Some((claimed_by, _)) = overlap {
                let err = CopyError::DestinationClaimed {
                    root: root.clone(),
                    path: task.destination.clone(),
                    claimed_by: (*claimed_by).clone(),
                };
                ctx.directory_failed(&task, &err);
                continue;
            }

            claimed.push((root, task.destination.clone()));
            walker.spawn(task);
        }

        ctx.tracker.wait().await;

        let elapsed = started.elapsed();
        let summary = BackupSummary {
            run_id,
            elapsed,
            directories_mirrored: ctx.stats.directories_mirrored.load(Ordering::Relaxed),
            files_copied: ctx.stats.files_copied.load(Ordering::Relaxed),
            files_skipped: ctx.stats.files_skipped.load(Ordering::Relaxed),
            bytes_copied: ctx.stats.bytes_copied.load(Ordering::Relaxed),
            failures: ctx.stats.failures.load(Ordering::Relaxed),
            peak_concurrent_copies: ctx.gate.peak(),
        };

        info!(
            %run_id,
            elapsed = %humantime::format_duration(Duration::from_millis(elapsed.as_millis() as u64)),
            directories = summary.directories_mirrored,
            copied = summary.files_copied,
            skipped = summary.files_skipped,
            bytes = summary.bytes_copied,
            failures = summary.failures,
            "Backup complete"
        );
        ctx.record(
            LogKind::BackupComplete,
            "Backup complete".to_string(),
            job.destination_root(),
        );

        summary
    }

    fn build_context(&self) -> BackupContext {
        let job = &self.job;

        let directory_gate = match job.directory_fan_out() {
            DirectoryFanOut::Unbounded => None,
            DirectoryFanOut::Bounded(limit) => Some(Arc::new(Semaphore::new(limit.max(1)))),
        };

        // Only sample the process when a ceiling is set.
        let probe = match (&self.memory_probe, job.max_memory_bytes()) {
            (Some(probe), _) => probe.clone(),
            (None, Some(_)) => Arc::new(ResourceMonitor::new()) as Arc<dyn MemoryProbe>,
            (None, None) => Arc::new(Unsampled) as Arc<dyn MemoryProbe>,
        };
        let throttle = MemoryThrottle::new(job.max_memory_bytes(), probe, job.memory_poll_interval())
            .with_debug(job.debug_logging());

        let detector = self
            .change_detector
            .clone()
            .unwrap_or_else(|| job.comparison().detector());

        BackupContext {
            job: job.clone(),
            gate: ConcurrencyGate::new(job.max_concurrency()),
            directory_gate,
            throttle,
            skip_policy: SkipPolicy::new(job.overwrite_existing(), detector),
            copier: self.copier.clone(),
            tracker: CompletionTracker::new(),
            stats: RunStats::default(),
            log_buffer: self.log_buffer.clone(),
        }
    }
}

/// Stand-in probe for runs without a memory ceiling; never consulted.
struct Unsampled;

impl MemoryProbe for Unsampled {
    fn used_bytes(&self) -> Option<u64> {
        None
    }
}
