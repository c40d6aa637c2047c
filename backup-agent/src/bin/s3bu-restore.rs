//! Restores every entry in a manifest matching a pattern to a local
//! directory, or just reports what would be restored in check mode.

use backup_agent::config::Config;
use backup_agent::engine::manifest_scanner;
use backup_agent::engine::record::EntryRecord;
use backup_agent::manifest;
use backup_agent::store::s3::S3ObjectStore;
use backup_agent::store::ObjectStore;
use backup_agent::utils::errors::AgentError;
use backup_agent::utils::humanize::comma;
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(about = "Restore files from a manifest", version)]
struct Args {
    /// Path to configuration file (overrides built-in defaults)
    #[arg(long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(short = 'p', long)]
    profile: Option<String>,

    /// Report matching entries without downloading them
    #[arg(short = 'c', long = "check")]
    check_mode: bool,

    /// Force restore even if the destination directory is not empty
    #[arg(short = 'f', long)]
    force: bool,

    /// Overwrite any existing files
    #[arg(short = 'o', long)]
    overwrite: bool,

    #[arg(short = 's', long = "secrets-file")]
    secrets_file: Option<PathBuf>,

    #[arg(short = 'i', long = "identities-file")]
    identities_file: Option<PathBuf>,

    bucket: String,
    manifest_key: String,
    restore_root: PathBuf,

    /// Regular expression; only matching relative paths are restored
    pattern: Option<String>,
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

    if !store.has_identities() {
        anyhow::bail!(AgentError::IdentitiesNotFound);
    }

    match std::fs::metadata(&args.restore_root) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => anyhow::bail!("the restore root is not a directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            std::fs::create_dir(&args.restore_root)?;
        }
        Err(e) => anyhow::bail!("failed to stat restore root: {e}"),
    }

    if !args.check_mode && !args.force {
        let entries: Vec<_> = std::fs::read_dir(&args.restore_root)?.collect();
        if !entries.is_empty() {
            anyhow::bail!("restore root is not empty; use -f to force restore");
        }
    }

    let pattern = args.pattern.as_deref().unwrap_or(".*");
    let regex = regex::Regex::new(pattern)?;

    let manifest_bytes = manifest::download_with_key(store.as_ref(), &args.manifest_key).await?;
    println!("Processing {}", args.manifest_key);

    let mut rx = manifest_scanner::spawn(
        std::io::Cursor::new(manifest_bytes),
        config.engine.channel_capacity,
        CancellationToken::new(),
    );

    let mut num_total = 0u64;
    let mut total_bytes = 0u64;
    let mut num_fails = 0u64;
    let mut fail_bytes = 0u64;
    let mut num_skipped = 0u64;
    let mut skip_bytes = 0u64;

    while let Some(record) = rx.recv().await {
        if !regex.is_match(&record.rel_path) {
            continue;
        }

        num_total += 1;
        total_bytes += record.raw_size;

        if args.check_mode {
            println!("- found: {} ({} bytes)", record.rel_path, comma(record.raw_size));
            continue;
        }

        let fpath = args.restore_root.join(&record.rel_path);
        if !args.overwrite && fpath.exists() {
            println!("-    skipping: {} ({} bytes)", record.rel_path, comma(record.raw_size));
            num_skipped += 1;
            skip_bytes += record.raw_size;
            continue;
        }

        println!("- downloading: {} ({} bytes)", record.rel_path, comma(record.raw_size));
        if let Err(e) = restore_file(store.as_ref(), &record, &fpath).await {
            num_fails += 1;
            fail_bytes += record.raw_size;
            println!(" - failed: {e}");
        }
    }

    println!();
    println!("Restore Summary");
    println!("-   total files: {num_total}");
    println!("-   total bytes: {}", comma(total_bytes));
    println!("- success files: {}", num_total - num_skipped - num_fails);
    println!(
        "- success bytes: {}",
        comma(total_bytes.saturating_sub(skip_bytes).saturating_sub(fail_bytes))
    );
    println!("- skipped files: {num_skipped}");
    println!("- skipped bytes: {}", comma(skip_bytes));
    println!("-  failed files: {num_fails}");
    println!("-  failed bytes: {}", comma(fail_bytes));
    println!();

    Ok(())
}

async fn restore_file(
    store: &dyn ObjectStore,
    record: &EntryRecord,
    fpath: &std::path::Path,
) -> anyhow::Result<u64> {
    let key = format!("data/{}/{}", &record.hash[..4.min(record.hash.len())], record.hash);

    if let Some(parent) = fpath.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut sink = tokio::fs::File::create(fpath).await?;
    let size = match store.download(&key, &mut sink).await {
        Ok(size) => size,
        Err(e) => {
            drop(sink);
            let _ = std::fs::remove_file(fpath);
            return Err(anyhow::anyhow!(e));
        }
    };
    drop(sink);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(fpath, std::fs::Permissions::from_mode(record.mode))?;
    }

    Ok(size)
}
