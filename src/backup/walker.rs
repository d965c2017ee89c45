use super::copier::run_file_task;
use super::error::{CopyError, EntryKind};
use super::runner::BackupContext;
use super::{DirectoryTask, FileTask};
use crate::utils::log_buffer::LogKind;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::ffi::OsString;
use std::io;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info};

/// Mirrors one directory level and fans out a concurrent task per entry.
///
/// Subdirectories become new [`DirectoryTask`]s walked by their own tokio
/// task; everything else becomes a [`FileTask`] that queues on the copy
/// gate. A subtree that cannot be listed or created is logged and left out;
/// nothing above or beside it is affected.
#[derive(Clone)]
pub struct TreeWalker {
    ctx: Arc<BackupContext>,
}

#[derive(Debug)]
struct Entry {
    name: OsString,
    is_dir: bool,
}

impl TreeWalker {
    pub(crate) fn new(ctx: Arc<BackupContext>) -> Self {
        Self { ctx }
    }

    /// Track and spawn a directory task. A panic inside the walk is
    /// reported as a failure of that directory.
    pub fn spawn(&self, task: DirectoryTask) {
        let guard = self.ctx.tracker.track();
        let walker = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let ctx = walker.ctx.clone();
            let outcome = AssertUnwindSafe(walker.walk(task.clone()))
                .catch_unwind()
                .await;
            if let Err(payload) = outcome {
                ctx.directory_failed(&task, &panicked(payload));
            }
        });
    }

    fn spawn_file(&self, task: FileTask) {
        let guard = self.ctx.tracker.track();
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let outcome = AssertUnwindSafe(run_file_task(&ctx, task.clone()))
                .catch_unwind()
                .await;
            if let Err(payload) = outcome {
                ctx.file_failed(&task, &panicked(payload));
            }
        });
    }

    /// Boxed so the recursive spawn has a nameable, `Send` future type.
    pub fn walk(self, task: DirectoryTask) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let ctx = &self.ctx;

            // Held while listing and dispatching only; children take their
            // own permit inside their own task, so a parent never waits on them.
            let _listing_permit = match &ctx.directory_gate {
                Some(semaphore) => match semaphore.clone().acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => return ctx.directory_failed(&task, &CopyError::GateClosed),
                },
                None => None,
            };

            info!(
                source = %task.source.display(),
                destination = %task.destination.display(),
                "Copying directory"
            );
            ctx.record(
                LogKind::DirectoryStarted,
                format!("Copying directory: {} to {}", task.source.display(), task.destination.display()),
                &task.source,
            );

            let entries = match list_entries(&task.source).await {
                Ok(entries) => entries,
                Err(e) => return ctx.directory_failed(&task, &e),
            };

            if let Err(e) = ensure_directory(&task.destination).await {
                return ctx.directory_failed(&task, &e);
            }
            ctx.stats.directories_mirrored.fetch_add(1, Ordering::Relaxed);

            for entry in entries {
                let source = task.source.join(&entry.name);
                let destination = task.destination.join(&entry.name);
                if entry.is_dir {
                    self.spawn(DirectoryTask { source, destination });
                } else {
                    self.spawn_file(FileTask { source, destination });
                }
            }

            if ctx.job.debug_logging() {
                debug!(
                    directory = %task.source.display(),
                    outstanding = ctx.tracker.outstanding(),
                    "Directory dispatched"
                );
            }
        })
    }
}

fn panicked(payload: Box<dyn Any + Send>) -> CopyError {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };
    CopyError::TaskPanicked { message }
}

/// Read every immediate entry up front; a read error anywhere abandons the
/// whole directory.
async fn list_entries(path: &Path) -> Result<Vec<Entry>, CopyError> {
    let list_error = |e: io::Error| CopyError::ListSource {
        path: path.to_path_buf(),
        source: e,
    };

    let mut reader = tokio::fs::read_dir(path).await.map_err(list_error)?;
    let mut entries = Vec::new();
    while let Some(entry) = reader.next_entry().await.map_err(list_error)? {
        // file_type() does not follow symlinks: a link to a directory is
        // handed to the file copier like any other non-directory.
        let file_type = entry.file_type().await.map_err(list_error)?;
        entries.push(Entry {
            name: entry.file_name(),
            is_dir: file_type.is_dir(),
        });
    }
    Ok(entries)
}

/// Create `path` and any missing parents. An existing non-directory at
/// `path` is a type conflict and is never replaced.
async fn ensure_directory(path: &Path) -> Result<(), CopyError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => return Ok(()),
        Ok(meta) => {
            return Err(CopyError::TypeConflict {
                path: path.to_path_buf(),
                expected: EntryKind::Directory,
                found: EntryKind::from_file_type(meta.file_type()),
            })
        }
        Err(_) => {}
    }

    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| CopyError::CreateDirectory {
            path: path.to_path_buf(),
            source: e,
        })
}
