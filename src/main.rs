//! # Upload Chunker (`upload-chunker`)
//!
//! Runs the upload server until interrupted.
//!
//! ## Usage
//!
//! ```bash
//! UPLOADS_DIR=./uploads CHUNK_SIZE=4096 upload-chunker
//! upload-chunker --config ./config/chunker.toml --bind 0.0.0.0:8000
//! ```
//!
//! Environment variables (also read from a `.env` file in the working
//! directory) override values from the config file:
//!
//! | Variable | Setting |
//! |----------|---------|
//! | `UPLOADS_DIR` | `[storage].uploads_dir` |
//! | `CHUNK_SIZE` | `[storage].chunk_size` |
//! | `BIND_ADDR` | `[server].bind` |
//! | `QUEUE_CAPACITY` | `[queue].capacity` |
//! | `INGEST_WORKERS` | `[queue].workers` |
//! | `RETAINED_STATUSES` | `[queue].retained_statuses` |
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use upload_chunker::{config, server};

/// Upload Chunker: accepts file uploads and splits them into fixed-size,
/// checksummed chunk files.
#[derive(Parser)]
#[command(name = "upload-chunker", version, about)]
struct Cli {
    /// Path to an optional configuration file (TOML).
    #[arg(long, env = "UPLOAD_CHUNKER_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overriding `[server].bind` and `BIND_ADDR`.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut cfg = config::load_config(cli.config.as_deref())?;
    if let Some(bind) = cli.bind {
        cfg.server.bind = bind;
    }

    server::run_server(&cfg).await
}

/// Loads `.env` from the working directory. A missing file is fine; a
/// malformed one is an error.
fn load_dotenv() -> anyhow::Result<()> {
    allow_missing(dotenvy::dotenv().map(|_| ()))
}

fn allow_missing(loaded: dotenvy::Result<()>) -> anyhow::Result<()> {
    match loaded {
        Ok(()) => Ok(()),
        Err(e) if e.not_found() => Ok(()),
        Err(e) => Err(e).context("Failed to load .env"),
    }
}
