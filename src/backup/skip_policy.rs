//! Per-file decision on whether an existing destination can be left alone.
//!
//! The comparison itself is pluggable through [`ChangeDetector`]; the default
//! compares modification times only, which is what makes a second run over
//! an unchanged tree a no-op.

use super::error::CopyError;
use super::{ComparisonStrategy, FileTask};
use async_trait::async_trait;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Decides whether a destination file already matches its source.
#[async_trait]
pub trait ChangeDetector: Send + Sync {
    async fn is_unchanged(&self, source: &Path, destination: &Path) -> Result<bool, CopyError>;
}

/// Equal modification times.
pub struct ModifiedTimeDetector;

/// Equal length and modification times.
pub struct SizeAndModifiedTimeDetector;

/// Equal BLAKE3 digests of the full contents.
pub struct ContentHashDetector;

#[async_trait]
impl ChangeDetector for ModifiedTimeDetector {
    async fn is_unchanged(&self, source: &Path, destination: &Path) -> Result<bool, CopyError> {
        let source_mtime = modified(&metadata(source).await?, source)?;
        let destination_mtime = modified(&metadata(destination).await?, destination)?;
        Ok(source_mtime == destination_mtime)
    }
}

#[async_trait]
impl ChangeDetector for SizeAndModifiedTimeDetector {
    async fn is_unchanged(&self, source: &Path, destination: &Path) -> Result<bool, CopyError> {
        let source_meta = metadata(source).await?;
        let destination_meta = metadata(destination).await?;
        if source_meta.len() != destination_meta.len() {
            return Ok(false);
        }
        Ok(modified(&source_meta, source)? == modified(&destination_meta, destination)?)
    }
}

#[async_trait]
impl ChangeDetector for ContentHashDetector {
    async fn is_unchanged(&self, source: &Path, destination: &Path) -> Result<bool, CopyError> {
        let source_meta = metadata(source).await?;
        let destination_meta = metadata(destination).await?;
        if source_meta.len() != destination_meta.len() {
            return Ok(false);
        }
        let source_hash = hash_file(source.to_path_buf()).await?;
        let destination_hash = hash_file(destination.to_path_buf()).await?;
        Ok(source_hash == destination_hash)
    }
}

impl ComparisonStrategy {
    pub fn detector(self) -> Arc<dyn ChangeDetector> {
        match self {
            ComparisonStrategy::ModifiedTime => Arc::new(ModifiedTimeDetector),
            ComparisonStrategy::SizeAndModifiedTime => Arc::new(SizeAndModifiedTimeDetector),
            ComparisonStrategy::ContentHash => Arc::new(ContentHashDetector),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipDecision {
    /// Destination is missing, differs, or overwriting is forced.
    Copy,
    /// Destination already matches the source.
    Skip,
}

#[derive(Clone)]
pub struct SkipPolicy {
    overwrite_existing: bool,
    detector: Arc<dyn ChangeDetector>,
}

impl SkipPolicy {
    pub fn new(overwrite_existing: bool, detector: Arc<dyn ChangeDetector>) -> Self {
        Self {
            overwrite_existing,
            detector,
        }
    }

    /// An error means the comparison could not be made; the caller retires
    /// the task without copying.
    pub async fn evaluate(&self, task: &FileTask) -> Result<SkipDecision, CopyError> {
        if self.overwrite_existing {
            return Ok(SkipDecision::Copy);
        }

        match tokio::fs::metadata(&task.destination).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(SkipDecision::Copy),
            Err(e) => {
                return Err(CopyError::Metadata {
                    path: task.destination.clone(),
                    source: e,
                })
            }
        }

        if self
            .detector
            .is_unchanged(&task.source, &task.destination)
            .await?
        {
            Ok(SkipDecision::Skip)
        } else {
            Ok(SkipDecision::Copy)
        }
    }
}

async fn metadata(path: &Path) -> Result<std::fs::Metadata, CopyError> {
    tokio::fs::metadata(path)
        .await
        .map_err(|e| CopyError::Metadata {
            path: path.to_path_buf(),
            source: e,
        })
}

fn modified(meta: &std::fs::Metadata, path: &Path) -> Result<std::time::SystemTime, CopyError> {
    meta.modified().map_err(|e| CopyError::Metadata {
        path: path.to_path_buf(),
        source: e,
    })
}

async fn hash_file(path: PathBuf) -> Result<blake3::Hash, CopyError> {
    let task_path = path.clone();
    let result = tokio::task::spawn_blocking(move || -> io::Result<blake3::Hash> {
        let mut file = std::fs::File::open(&task_path)?;
        let mut hasher = blake3::Hasher::new();
        let mut buffer = vec![0u8; 64 * 1024];
        loop {
            let read = file.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(hasher.finalize())
    })
    .await
    .unwrap_or_else(|e| Err(io::Error::new(io::ErrorKind::Other, e)));

    result.map_err(|e| CopyError::Metadata { path, source: e })
}
