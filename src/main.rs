use anyhow::Context;
use clap::Parser;
use futures::future::join_all;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use image_upload_queue::config::{self, Config};
use image_upload_queue::{AppError, AppResult, UploadFile, UploadOptions, UploadQueue};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Image files to upload
    #[arg(required = true)]
    files: Vec<String>,

    /// Config file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Base URL that relative endpoints are joined onto
    #[arg(long)]
    base_url: Option<String>,

    #[arg(long)]
    endpoint: Option<String>,

    #[arg(long)]
    field_name: Option<String>,

    #[arg(long)]
    max_retries: Option<u32>,

    #[arg(long)]
    concurrency: Option<usize>,
}

fn apply_overrides(mut config: Config, args: &Args) -> anyhow::Result<Config> {
    if let Some(base_url) = &args.base_url {
        config.base_url = Some(base_url.clone());
    }
    if let Some(endpoint) = &args.endpoint {
        config.endpoint = endpoint.clone();
    }
    if let Some(field_name) = &args.field_name {
        config.field_name = field_name.clone();
    }
    if let Some(max_retries) = args.max_retries {
        config.max_retries = max_retries;
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }

    config::validate_config(&config).context("Invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => config::load_config_from(path),
        None => config::load_config(),
    }
    .context("Failed to load configuration")?;
    let config = apply_overrides(config, &args)?;

    env_logger::Builder::from_default_env()
        .filter_level(config.log_level_filter())
        .init();

    log::info!(
        "Uploading {} file(s) to {} (concurrency {})",
        args.files.len(),
        config.endpoint,
        config.concurrency
    );

    let cancel = CancellationToken::new();
    let ctrlc_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        log::warn!("Interrupted, cancelling outstanding uploads");
        ctrlc_token.cancel();
    }) {
        log::warn!("Failed to register Ctrl-C handler: {}", e);
    }

    let queue = UploadQueue::from_config(&config)?;

    let uploads = args.files.iter().map(|path| {
        let queue = queue.clone();
        let options = UploadOptions::new().with_cancel(cancel.clone());
        async move {
            let file = UploadFile::from_path(path).await?;
            let url = queue.enqueue(file, options).await?;
            Ok::<String, AppError>(url)
        }
    });

    let results: Vec<AppResult<String>> = join_all(uploads).await;

    let mut failed = 0;
    for (path, result) in args.files.iter().zip(results) {
        match result {
            Ok(url) => println!("{} -> {}", path, url),
            Err(e) if e.is_cancelled() => {
                failed += 1;
                log::warn!("Upload of {} cancelled", path);
            }
            Err(e) => {
                failed += 1;
                log::error!("Upload of {} failed: {}", path, e);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} uploads failed", failed, args.files.len());
    }

    Ok(())
}
