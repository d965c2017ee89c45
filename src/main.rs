use anyhow::Result;
use backup_mirror::backup::BackupRunner;
use backup_mirror::utils::{self, logging::LogOptions};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Optional .env next to the binary's working directory
    dotenvy::dotenv().ok();

    // Load configuration
    let config = utils::config::load_config()?;

    utils::logging::init_tracing(&LogOptions::from(&config))?;

    let job = config.to_job()?;

    info!("Starting backup-mirror v{}", env!("CARGO_PKG_VERSION"));
    info!("CPU cores available: {}", num_cpus::get());
    for source in job.source_roots() {
        info!("Source directory: {}", source.display());
    }
    info!("Destination directory: {}", job.destination_root().display());

    let summary = BackupRunner::new(job).run().await;

    info!(
        run_id = %summary.run_id,
        directories = summary.directories_mirrored,
        copied = summary.files_copied,
        skipped = summary.files_skipped,
        bytes = summary.bytes_copied,
        peak_copies = summary.peak_concurrent_copies,
        "Run summary"
    );

    // Per-file failures only show up in the log; the run itself always completes.
    if summary.failures > 0 {
        info!(
            "{} failures recorded, see the log for details",
            summary.failures
        );
    }

    Ok(())
}
