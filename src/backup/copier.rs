use super::error::{CopyError, EntryKind};
use super::runner::BackupContext;
use super::skip_policy::SkipDecision;
use super::FileTask;
use crate::utils::log_buffer::LogKind;
use filetime::FileTime;
use std::io;
use std::sync::atomic::Ordering;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufReader};
use tracing::{debug, info};

const DEFAULT_BUFFER_SIZE: usize = 256 * 1024;

/// Streams one file's bytes and carries its modification time across.
#[derive(Debug, Clone)]
pub struct FileCopier {
    buffer_size: usize,
}

impl FileCopier {
    pub fn new() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(4096);
        self
    }

    /// Copy `task.source` over `task.destination` and return the byte count.
    ///
    /// A failed copy leaves the destination as the I/O left it; nothing is
    /// rolled back.
    pub async fn copy(&self, task: &FileTask) -> Result<u64, CopyError> {
        let source = File::open(&task.source)
            .await
            .map_err(|e| CopyError::OpenSource {
                path: task.source.clone(),
                source: e,
            })?;

        let mut destination =
            File::create(&task.destination)
                .await
                .map_err(|e| CopyError::CreateDestination {
                    path: task.destination.clone(),
                    source: e,
                })?;

        let stream_error = |e: io::Error| CopyError::Stream {
            from: task.source.clone(),
            to: task.destination.clone(),
            source: e,
        };

        let mut reader = BufReader::with_capacity(self.buffer_size, source);
        let bytes = tokio::io::copy_buf(&mut reader, &mut destination)
            .await
            .map_err(stream_error)?;
        // Every write must land before the timestamp is set, or a late write
        // would bump the mtime again.
        destination.flush().await.map_err(stream_error)?;
        drop(destination);

        let source_meta = reader
            .get_ref()
            .metadata()
            .await
            .map_err(|e| CopyError::Metadata {
                path: task.source.clone(),
                source: e,
            })?;
        let mtime = FileTime::from_last_modification_time(&source_meta);

        let path = task.destination.clone();
        tokio::task::spawn_blocking(move || filetime::set_file_mtime(&path, mtime))
            .await
            .unwrap_or_else(|e| Err(io::Error::new(io::ErrorKind::Other, e)))
            .map_err(|e| CopyError::SetModifiedTime {
                path: task.destination.clone(),
                source: e,
            })?;

        Ok(bytes)
    }
}

impl Default for FileCopier {
    fn default() -> Self {
        Self::new()
    }
}

/// Full life of one file task: admission, skip check, memory wait, copy.
///
/// The caller owns the task's tracker guard; this function only has to
/// return for the task to retire. The gate permit is dropped on every return
/// path before that happens.
pub(crate) async fn run_file_task(ctx: &BackupContext, task: FileTask) {
    let _permit = match ctx.gate.acquire().await {
        Ok(permit) => permit,
        Err(e) => return ctx.file_failed(&task, &e),
    };

    if ctx.job.debug_logging() {
        debug!(
            in_flight = ctx.gate.in_flight(),
            outstanding = ctx.tracker.outstanding(),
            "Admitted file copy"
        );
    }

    if let Ok(meta) = tokio::fs::metadata(&task.destination).await {
        if meta.is_dir() {
            let conflict = CopyError::TypeConflict {
                path: task.destination.clone(),
                expected: EntryKind::File,
                found: EntryKind::Directory,
            };
            return ctx.file_failed(&task, &conflict);
        }
    }

    match ctx.skip_policy.evaluate(&task).await {
        Ok(SkipDecision::Copy) => {}
        Ok(SkipDecision::Skip) => {
            info!(
                destination = %task.destination.display(),
                "Destination file already up to date, not copying"
            );
            ctx.record(
                LogKind::FileSkipped,
                format!("Destination file already exists, not copied: {}", task.destination.display()),
                &task.destination,
            );
            ctx.stats.files_skipped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        Err(e) => return ctx.file_failed(&task, &e),
    }

    let waited = ctx.throttle.wait_for_headroom().await;
    if waited > 0 && ctx.job.debug_logging() {
        ctx.record(
            LogKind::MemoryWait,
            format!("Waited {} memory polls before copying", waited),
            &task.source,
        );
    }

    info!(
        source = %task.source.display(),
        destination = %task.destination.display(),
        "Copying file"
    );
    ctx.record(
        LogKind::FileCopying,
        format!("Copying file: {} to {}", task.source.display(), task.destination.display()),
        &task.source,
    );

    match ctx.copier.copy(&task).await {
        Ok(bytes) => {
            info!(
                source = %task.source.display(),
                destination = %task.destination.display(),
                bytes,
                "File copied successfully"
            );
            ctx.record(
                LogKind::FileCopied,
                format!(
                    "File copied successfully: {} to {} ({} bytes)",
                    task.source.display(),
                    task.destination.display(),
                    bytes
                ),
                &task.destination,
            );
            ctx.stats.files_copied.fetch_add(1, Ordering::Relaxed);
            ctx.stats.bytes_copied.fetch_add(bytes, Ordering::Relaxed);
        }
        Err(e) => ctx.file_failed(&task, &e),
    }
}
