//! Downloads a single object by key from S3, decoding whatever codec
//! chain its metadata records.

use backup_agent::config::Config;
use backup_agent::store::s3::S3ObjectStore;
use backup_agent::store::ObjectStore;
use backup_agent::utils::humanize::comma;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(about = "Download a single object from S3", version)]
struct Args {
    /// Path to configuration file (overrides built-in defaults)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(short = 'p', long)]
    profile: Option<String>,

    #[arg(short = 's', long = "secrets-file")]
    secrets_file: Option<PathBuf>,

    #[arg(short = 'i', long = "identities-file")]
    identities_file: Option<PathBuf>,

    /// Overwrite any existing file
    #[arg(short = 'o', long)]
    overwrite: bool,

    bucket: String,
    key: String,
    restore_root: PathBuf,
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

    match std::fs::metadata(&args.restore_root) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => anyhow::bail!("the restore root is not a directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            std::fs::create_dir(&args.restore_root)?;
        }
        Err(e) => anyhow::bail!("failed to stat restore root: {e}"),
    }

    println!("Processing {}", args.key);

    let fname = args.key.rsplit('/').next().unwrap_or(&args.key);
    let fpath = args.restore_root.join(fname);

    println!("- downloading to {}", fpath.display());

    if !args.overwrite && fpath.exists() {
        println!("- unable to download: file already exists");
        return Ok(());
    }

    let mut sink = tokio::fs::File::create(&fpath).await?;
    match store.download(&args.key, &mut sink).await {
        Ok(size) => {
            println!("- success: {} ({})", fpath.display(), comma(size));
        }
        Err(e) => {
            drop(sink);
            let _ = std::fs::remove_file(&fpath);
            return Err(anyhow::anyhow!("download failed: {e}"));
        }
    }

    Ok(())
}
