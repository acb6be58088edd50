// src/main.rs

use anyhow::{bail, Context, Result};
use chunkfetch::prelude::*;
use chunkfetch::reporter::to_human_readable;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let mut args = std::env::args().skip(1);
    let Some(url) = args.next() else {
        bail!("usage: chunkfetch <URL> [DESTINATION]");
    };

    let config = DownloadConfig::from_env().context("loading configuration")?;
    let source = HttpSource::new(url.as_str())?;
    let metadata = source
        .metadata()
        .await
        .with_context(|| format!("could not look up {}", url))?;
    let destination = args.next().map(PathBuf::from).unwrap_or_else(|| PathBuf::from(&metadata.name));

    println!("Name: {}", metadata.name);
    println!("Size: {}", to_human_readable(metadata.size as f64));
    println!("ID: {}\n", metadata.id);
    println!("Downloading the file: {}", destination.display());

    let downloader = Downloader::new(config)?;
    let coordinator = downloader.start(&destination, metadata.size, Arc::new(source)).await?;

    let handle = coordinator.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nCleaning up...");
            handle.cancel();
        }
    });

    match downloader.run(coordinator, std::io::stdout()).await {
        Ok(()) => {
            print!("\x1b[2K\r");
            println!("Download finished.");
            Ok(())
        }
        Err(e) if e.is_cancelled() => {
            debug!("Download interrupted by the user");
            Ok(())
        }
        Err(e) => {
            println!();
            Err(e).with_context(|| format!("An error happened while downloading the file {}", metadata.name))
        }
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chunkfetch=info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}
