//! Uploads a local job definition file to S3, scrypt-encrypted.

use backup_agent::config::Config;
use backup_agent::job::Job;
use backup_agent::store::s3::S3ObjectStore;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(about = "Upload a job definition to S3", version)]
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
    job_file: PathBuf,
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
    // job uploads don't decrypt data, only encrypt metadata, so no
    // identities file is needed here.
    let identities_file = config.credentials.identities_file;

    let store = S3ObjectStore::open(
        args.profile.as_deref(),
        None,
        &args.bucket,
        &identities_file,
        &secrets_file,
    )
    .await?;

    let data = std::fs::read(&args.job_file)?;
    let key = Job::upload_bytes(&store, &args.job_name, data).await?;
    println!("uploaded to {key}");

    Ok(())
}
