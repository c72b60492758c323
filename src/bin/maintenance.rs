use std::env;

use anyhow::{Context, Result};
use diesel::prelude::*;
use tracing_subscriber::EnvFilter;

use consultations::{
    config::AppConfig,
    db,
    models::ConsultationFile,
    schema::consultation_files,
    storage::{ObjectStorage, S3Storage},
};

const USAGE: &str = "Usage: maintenance audit-files";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("audit-files") => audit_files().await?,
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Lists ledger rows whose blob is missing from storage. Read-only.
async fn audit_files() -> Result<()> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        s3_bucket = %config.s3_bucket,
        "loaded consultation service configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let storage = S3Storage::connect(&config).await?;

    let files: Vec<ConsultationFile> = {
        let mut conn = pool.get().context("failed to get database connection")?;
        consultation_files::table
            .order((
                consultation_files::consultation_id.asc(),
                consultation_files::file_name.asc(),
                consultation_files::version.asc(),
            ))
            .load(&mut conn)
            .context("failed to load consultation files")?
    };

    if files.is_empty() {
        println!("No consultation files recorded.");
        return Ok(());
    }

    println!("Checking {} consultation files…", files.len());

    let mut missing = 0usize;
    for file in &files {
        match storage.object_exists(&file.file_path).await {
            Ok(true) => {}
            Ok(false) => {
                missing += 1;
                println!(
                    "missing: consultation={} file={} name={} version={}",
                    file.consultation_id, file.id, file.file_name, file.version
                );
            }
            Err(err) => {
                eprintln!("Failed to check object for file {}: {err}", file.id);
            }
        }
    }

    println!("{missing} of {} files have no stored blob.", files.len());
    Ok(())
}
