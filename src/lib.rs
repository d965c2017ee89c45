//! Concurrent recursive directory mirroring.
//!
//! A [`backup::BackupRunner`] takes an immutable [`backup::CopyJob`] and
//! reproduces each source tree under the destination root. Directory
//! recursion fans out freely (or through a bounded listing gate); file copies
//! queue on a fixed pool of admission tokens and can additionally be held
//! back while process memory is above a ceiling. Failures stay local to the
//! file or subtree that produced them and are reported through `tracing`.
//!
//! ```no_run
//! use backup_mirror::backup::{BackupRunner, CopyJob};
//!
//! # async fn demo() {
//! let job = CopyJob::new(["/home/me/photos"], "/mnt/usb/backup")
//!     .with_max_concurrency(8)
//!     .with_overwrite(false);
//! let summary = BackupRunner::new(job).run().await;
//! println!("copied {} files", summary.files_copied);
//! # }
//! ```

pub mod backup;
pub mod utils;

pub use backup::{BackupRunner, BackupSummary, CopyError, CopyJob};
