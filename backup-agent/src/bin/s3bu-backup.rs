//! Runs the full snapshot engine for every source in a job (or one
//! label's source) against S3.

use backup_agent::config::Config;
use backup_agent::daemon::ShutdownCoordinator;
use backup_agent::engine::run_backup;
use backup_agent::job::Job;
use backup_agent::manifest;
use backup_agent::store::s3::S3ObjectStore;
use backup_agent::utils::humanize::comma;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(about = "Back up a job's sources to S3", version)]
struct Args {
    /// Path to configuration file (overrides built-in defaults)
    #[arg(long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// AWS named profile for credentials and configuration
    #[arg(short = 'p', long)]
    profile: Option<String>,

    /// YAML file containing secret passphrases for manifest/job metadata
    #[arg(short = 's', long = "secrets-file")]
    secrets_file: Option<PathBuf>,

    /// File containing age identities used to decrypt data
    #[arg(short = 'i', long = "identities-file")]
    identities_file: Option<PathBuf>,

    /// Compress data before backing up
    #[arg(short = 'c', long)]
    compress: bool,

    /// Verbose per-file reporting
    #[arg(short = 'v', long)]
    verbose: bool,

    bucket: String,
    job: String,
    label: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    backup_agent::utils::logger::init(&config.log.level)?;

    let identities_file = args.identities_file.unwrap_or(config.credentials.identities_file);
    let secrets_file = args.secrets_file.unwrap_or(config.credentials.secrets_file);

    let store = S3ObjectStore::open(
        args.profile.as_deref(),
        None,
        &args.bucket,
        &identities_file,
        &secrets_file,
    )
    .await?;
    let store: Arc<dyn backup_agent::store::ObjectStore> = Arc::new(store);

    let job = Job::download(store.as_ref(), &args.job).await?;

    let shutdown = ShutdownCoordinator::new();
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown.wait_for_signal().await;
            cancel.cancel();
        });
    }

    for source in &job.sources {
        if cancel.is_cancelled() {
            println!("Shutdown requested, stopping before further sources");
            break;
        }
        println!("--------------------------------------------------------------");

        if let Some(label) = &args.label {
            if label != &source.label {
                println!("Skipping {}/{}", job.name, source.label);
                continue;
            }
        }

        let source_root = PathBuf::from(&source.path);
        match std::fs::metadata(&source_root) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                println!("Error: source is not a directory: {}", source.path);
                continue;
            }
            Err(e) => {
                println!("Error: failed to stat source: {}: {e}", source.label);
                continue;
            }
        }

        if let Err(e) = backup_source(
            store.clone(),
            &job,
            &source.label,
            source_root,
            args.compress,
            config.engine.channel_capacity,
            cancel.clone(),
            args.verbose,
        )
        .await
        {
            println!("{e}");
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn backup_source(
    store: Arc<dyn backup_agent::store::ObjectStore>,
    job: &Job,
    label: &str,
    source_root: PathBuf,
    compress: bool,
    channel_capacity: usize,
    cancel: CancellationToken,
    verbose: bool,
) -> anyhow::Result<()> {
    let job_name = &job.name;
    let prior = manifest::download(store.as_ref(), job_name, label).await?;
    let (prior_bytes, mkey) = match prior {
        Some((bytes, key)) => (Some(bytes), Some(key)),
        None => (None, None),
    };

    match &mkey {
        Some(key) => println!("Processing {job_name}/{label} - {key}"),
        None => println!("Processing {job_name}/{label}"),
    }

    let (summary, manifest_bytes) = run_backup(
        store.clone(),
        job,
        source_root,
        prior_bytes,
        compress,
        channel_capacity,
        cancel,
        Box::new(move |record| {
            use backup_agent::engine::record::{EntryAction, EntryStatus};
            let is_change =
                record.status == EntryStatus::New || record.status == EntryStatus::Modified;
            if is_change && record.action == EntryAction::Uploaded {
                println!(
                    "- uploaded: {} ({}, {})",
                    record.rel_path, record.raw_size, record.uploaded_size
                );
            } else if verbose && is_change && record.action == EntryAction::NoAction {
                println!("-  present: {} ({})", record.rel_path, record.raw_size);
            }
            if record.action == EntryAction::Failed {
                println!("-   failed: {}", record.rel_path);
            }
            if verbose && record.status == EntryStatus::NotFound {
                println!("-  missing: {}", record.rel_path);
            }
        }),
    )
    .await?;

    if summary.count_new > 0 || summary.count_modified > 0 {
        let key = manifest::upload(store.as_ref(), manifest_bytes, job_name, label).await?;
        println!("- uploaded: {key}");
    }

    println!();
    println!("Backup Summary");
    println!(" files:");
    println!("        total: {}", summary.total);
    println!("   unmodified: {}", summary.count_ok);
    println!("          new: {}", summary.count_new);
    println!("     modified: {}", summary.count_modified);
    println!("    not found: {}", summary.count_not_found);
    println!(" actions:");
    println!("    no action: {}", summary.count_no_action);
    println!(
        "     uploaded: {} ({} bytes)",
        summary.count_uploaded,
        comma(summary.bytes_uploaded)
    );
    println!("       failed: {}", summary.count_failed);
    println!();

    Ok(())
}
