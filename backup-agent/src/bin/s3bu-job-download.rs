//! Downloads the latest job definition for a job name to the current
//! directory.

use backup_agent::config::Config;
use backup_agent::job::Job;
use backup_agent::store::s3::S3ObjectStore;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(about = "Download the latest job definition from S3", version)]
struct Args {
    /// Path to configuration file (overrides built-in defaults)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(short = 'p', long)]
    profile: Option<String>,

    #[arg(short = 's', long = "secrets-file")]
    secrets_file: Option<PathBuf>,

    bucket: String,
    job_name: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    backup_agent::utils::logger::init(&config.log.level)?;

    let secrets_file = args.secrets_file.unwrap_or(config.credentials.secrets_file);
    let identities_file = config.credentials.identities_file;

    let store = S3ObjectStore::open(
        args.profile.as_deref(),
        None,
        &args.bucket,
        &identities_file,
        &secrets_file,
    )
    .await?;

    let (bytes, key) = Job::download_with_key(&store, &args.job_name).await?;
    let fname = key.rsplit('/').next().unwrap_or(&key).to_string();
    std::fs::write(&fname, &bytes)?;

    println!("downloaded to {}", PathBuf::from(&fname).display());

    Ok(())
}
