//! Service configuration.
//!
//! Settings come from an optional TOML file, overlaid with environment
//! variables through `figment`. `UPLOADS_DIR` and `CHUNK_SIZE` are required
//! from one of the two.
//!
//! ```toml
//! [storage]
//! uploads_dir = "/var/lib/upload-chunker"
//! chunk_size = 1048576
//!
//! [server]
//! bind = "127.0.0.1:8000"
//!
//! [queue]
//! capacity = 64
//! workers = 1
//! retained_statuses = 10000
//! ```

use anyhow::{bail, Context, Result};
use figment::providers::{Env, Format, Toml};
use figment::value::{Uncased, UncasedStr};
use figment::Figment;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub uploads_dir: PathBuf,
    pub chunk_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Finished upload statuses kept for `GET /uploads/{id}`.
    #[serde(default = "default_retained_statuses")]
    pub retained_statuses: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            workers: default_workers(),
            retained_statuses: default_retained_statuses(),
        }
    }
}

fn default_capacity() -> usize {
    64
}
fn default_workers() -> usize {
    1
}
fn default_retained_statuses() -> usize {
    crate::status::DEFAULT_RETAINED
}

/// Environment variable → dotted config key.
const ENV_KEYS: &[(&str, &str)] = &[
    ("UPLOADS_DIR", "storage.uploads_dir"),
    ("CHUNK_SIZE", "storage.chunk_size"),
    ("BIND_ADDR", "server.bind"),
    ("QUEUE_CAPACITY", "queue.capacity"),
    ("INGEST_WORKERS", "queue.workers"),
    ("RETAINED_STATUSES", "queue.retained_statuses"),
];

impl Config {
    /// Builds a config in code, with defaults for everything but storage.
    pub fn new(uploads_dir: impl Into<PathBuf>, chunk_size: usize) -> Self {
        Self {
            storage: StorageConfig {
                uploads_dir: uploads_dir.into(),
                chunk_size,
            },
            server: ServerConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

/// Loads configuration from `path` (if any) and the process environment.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    resolve_config(config_figment(path)?)
}

/// Layers the TOML file at `path` (if any) under the environment overrides.
pub fn config_figment(path: Option<&Path>) -> Result<Figment> {
    let mut figment = Figment::new();
    if let Some(path) = path {
        if !path.is_file() {
            bail!("Config file not found: {}", path.display());
        }
        debug!(config_path = %path.display(), "loading configuration from file");
        figment = figment.merge(Toml::file(path));
    }
    Ok(figment.merge(env_provider()))
}

fn env_provider() -> Env {
    let vars: Vec<&str> = ENV_KEYS.iter().map(|(var, _)| *var).collect();
    Env::raw().only(&vars).map(env_key)
}

fn env_key(key: &UncasedStr) -> Uncased<'_> {
    match ENV_KEYS
        .iter()
        .find(|(var, _)| key.as_str().eq_ignore_ascii_case(var))
    {
        Some((_, dotted)) => Uncased::from(*dotted),
        None => Uncased::from(key.as_str()),
    }
}

/// Extracts and validates a [`Config`] from an assembled figment.
pub fn resolve_config(figment: Figment) -> Result<Config> {
    if !figment.contains("storage.uploads_dir") {
        bail!("UPLOADS_DIR must be set (environment or [storage].uploads_dir)");
    }
    if !figment.contains("storage.chunk_size") {
        bail!("CHUNK_SIZE must be set (environment or [storage].chunk_size)");
    }

    let config: Config = figment.extract().context("Invalid configuration")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.storage.chunk_size == 0 {
        bail!("storage.chunk_size must be > 0");
    }
    if config.queue.capacity == 0 {
        bail!("queue.capacity must be > 0");
    }
    if config.queue.workers == 0 {
        bail!("queue.workers must be > 0");
    }
    if config.queue.retained_statuses == 0 {
        bail!("queue.retained_statuses must be > 0");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_env_only() {
        Jail::expect_with(|jail| {
            jail.set_env("UPLOADS_DIR", "/tmp/x");
            jail.set_env("CHUNK_SIZE", "4");
            let cfg = load_config(None).unwrap();
            assert_eq!(cfg.storage.uploads_dir, PathBuf::from("/tmp/x"));
            assert_eq!(cfg.storage.chunk_size, 4);
            assert_eq!(cfg.server.bind, "127.0.0.1:8000");
            assert_eq!(cfg.queue.capacity, 64);
            assert_eq!(cfg.queue.workers, 1);
            assert_eq!(cfg.queue.retained_statuses, 10_000);
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "chunker.toml",
                r#"
[storage]
uploads_dir = "/srv/uploads"
chunk_size = 1024

[queue]
workers = 2
"#,
            )?;
            jail.set_env("CHUNK_SIZE", "8");
            jail.set_env("BIND_ADDR", "0.0.0.0:9000");
            let cfg = load_config(Some(Path::new("chunker.toml"))).unwrap();
            assert_eq!(cfg.storage.uploads_dir, PathBuf::from("/srv/uploads"));
            assert_eq!(cfg.storage.chunk_size, 8);
            assert_eq!(cfg.server.bind, "0.0.0.0:9000");
            assert_eq!(cfg.queue.workers, 2);
            assert_eq!(cfg.queue.capacity, 64);
            Ok(())
        });
    }

    #[test]
    fn test_queue_env_overrides() {
        Jail::expect_with(|jail| {
            jail.set_env("UPLOADS_DIR", "/tmp/x");
            jail.set_env("CHUNK_SIZE", "4");
            jail.set_env("QUEUE_CAPACITY", "3");
            jail.set_env("INGEST_WORKERS", "5");
            jail.set_env("RETAINED_STATUSES", "7");
            let cfg = load_config(None).unwrap();
            assert_eq!(cfg.queue.capacity, 3);
            assert_eq!(cfg.queue.workers, 5);
            assert_eq!(cfg.queue.retained_statuses, 7);
            Ok(())
        });
    }

    #[test]
    fn test_missing_uploads_dir() {
        Jail::expect_with(|jail| {
            jail.set_env("CHUNK_SIZE", "4");
            let err = load_config(None).unwrap_err();
            assert!(err.to_string().contains("UPLOADS_DIR"));
            Ok(())
        });
    }

    #[test]
    fn test_missing_chunk_size() {
        Jail::expect_with(|jail| {
            jail.set_env("UPLOADS_DIR", "/tmp/x");
            let err = load_config(None).unwrap_err();
            assert!(err.to_string().contains("CHUNK_SIZE"));
            Ok(())
        });
    }

    #[test]
    fn test_non_numeric_chunk_size() {
        Jail::expect_with(|jail| {
            jail.set_env("UPLOADS_DIR", "/tmp/x");
            jail.set_env("CHUNK_SIZE", "big");
            let err = load_config(None).unwrap_err();
            assert!(err.to_string().contains("Invalid configuration"));
            Ok(())
        });
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("UPLOADS_DIR", "/tmp/x");
            jail.set_env("CHUNK_SIZE", "0");
            let err = load_config(None).unwrap_err();
            assert!(err.to_string().contains("chunk_size must be > 0"));
            Ok(())
        });
    }

    #[test]
    fn test_load_config_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "chunker.toml",
                "[storage]\nuploads_dir = \"/data\"\nchunk_size = 16\n\n[server]\nbind = \"127.0.0.1:0\"\n",
            )?;
            let cfg = load_config(Some(Path::new("chunker.toml"))).unwrap();
            assert_eq!(cfg.storage.uploads_dir, PathBuf::from("/data"));
            assert_eq!(cfg.storage.chunk_size, 16);
            assert_eq!(cfg.server.bind, "127.0.0.1:0");
            Ok(())
        });
    }

    #[test]
    fn test_missing_config_file() {
        Jail::expect_with(|_jail| {
            let err = load_config(Some(Path::new("absent.toml"))).unwrap_err();
            assert!(err.to_string().contains("Config file not found"));
            Ok(())
        });
    }
}
