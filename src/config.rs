use anyhow::{Context, Result};
use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::common::{
    DEFAULT_MAX_FILES_PER_BATCH, DEFAULT_STDERR_EXCERPT_CHARS, DEFAULT_WORKER_TIMEOUT_SECS,
};
use crate::store::ResultStore;
use crate::workflow::processors::worker::WorkerCommand;

pub const ENV_PREFIX: &str = "PHOTOTRAIL_";

/// Runtime configuration, read from `PHOTOTRAIL_*` environment variables
/// (and a `.env` file). Every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// 上傳暫存: where multipart uploads wait for processing
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    /// Shared directory of worker outputs
    #[serde(default = "default_derived_dir")]
    pub derived_dir: PathBuf,
    /// One `<id>.json` per stored batch
    #[serde(default = "default_records_dir")]
    pub records_dir: PathBuf,
    #[serde(default = "default_python")]
    pub file_worker_program: String,
    #[serde(default = "default_file_worker_args")]
    pub file_worker_args: Vec<String>,
    #[serde(default = "default_python")]
    pub enrichment_worker_program: String,
    #[serde(default = "default_enrichment_worker_args")]
    pub enrichment_worker_args: Vec<String>,
    #[serde(default = "default_worker_timeout_secs")]
    pub worker_timeout_secs: u64,
    #[serde(default = "default_stderr_excerpt_chars")]
    pub stderr_excerpt_chars: usize,
    #[serde(default = "default_max_files_per_batch")]
    pub max_files_per_batch: usize,
    /// Per-file and per-form upload size limit
    #[serde(default = "default_upload_limit_mb")]
    pub upload_limit_mb: u64,
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("./uploads")
}

fn default_derived_dir() -> PathBuf {
    PathBuf::from("./public/results/images")
}

fn default_records_dir() -> PathBuf {
    PathBuf::from("./results")
}

fn default_python() -> String {
    "python3".to_string()
}

fn default_file_worker_args() -> Vec<String> {
    vec!["./scripts/process_image.py".to_string()]
}

fn default_enrichment_worker_args() -> Vec<String> {
    vec!["./scripts/decide_effects.py".to_string()]
}

fn default_worker_timeout_secs() -> u64 {
    DEFAULT_WORKER_TIMEOUT_SECS
}

fn default_stderr_excerpt_chars() -> usize {
    DEFAULT_STDERR_EXCERPT_CHARS
}

fn default_max_files_per_batch() -> usize {
    DEFAULT_MAX_FILES_PER_BATCH
}

fn default_upload_limit_mb() -> u64 {
    64
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            upload_dir: default_upload_dir(),
            derived_dir: default_derived_dir(),
            records_dir: default_records_dir(),
            file_worker_program: default_python(),
            file_worker_args: default_file_worker_args(),
            enrichment_worker_program: default_python(),
            enrichment_worker_args: default_enrichment_worker_args(),
            worker_timeout_secs: default_worker_timeout_secs(),
            stderr_excerpt_chars: default_stderr_excerpt_chars(),
            max_files_per_batch: default_max_files_per_batch(),
            upload_limit_mb: default_upload_limit_mb(),
        }
    }
}

impl AppConfig {
    /// Load `.env` (if present), then read the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    /// Build the config from explicit `(name, value)` pairs. A bare `PORT`
    /// is honoured when `PHOTOTRAIL_PORT` is not set.
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: Vec<(String, String)> = vars.into_iter().collect();
        let mut config: AppConfig = envy::prefixed(ENV_PREFIX)
            .from_iter(vars.iter().cloned())
            .context("Failed to read PHOTOTRAIL_* configuration")?;

        let prefixed_port = format!("{}PORT", ENV_PREFIX);
        if !vars.iter().any(|(key, _)| *key == prefixed_port) {
            if let Some((_, port)) = vars.iter().find(|(key, _)| key == "PORT") {
                config.port = port
                    .trim()
                    .parse()
                    .with_context(|| format!("PORT is not a valid port number: {:?}", port))?;
            }
        }

        if config.max_files_per_batch == 0 {
            anyhow::bail!("{}MAX_FILES_PER_BATCH must be at least 1", ENV_PREFIX);
        }
        Ok(config)
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_timeout_secs)
    }

    pub fn file_worker(&self) -> WorkerCommand {
        WorkerCommand::new(self.file_worker_program.clone(), self.file_worker_args.clone())
    }

    pub fn enrichment_worker(&self) -> WorkerCommand {
        WorkerCommand::new(
            self.enrichment_worker_program.clone(),
            self.enrichment_worker_args.clone(),
        )
    }

    pub fn result_store(&self) -> ResultStore {
        ResultStore::new(&self.records_dir, &self.derived_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_apply_without_variables() {
        let config = AppConfig::from_vars(vars(&[("HOME", "/root")])).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.port, 3000);
        assert_eq!(config.max_files_per_batch, 10);
        assert_eq!(config.stderr_excerpt_chars, 100);
    }

    #[test]
    fn prefixed_variables_override_defaults() {
        let config = AppConfig::from_vars(vars(&[
            ("PHOTOTRAIL_PORT", "8080"),
            ("PHOTOTRAIL_DERIVED_DIR", "/srv/derived"),
            ("PHOTOTRAIL_FILE_WORKER_PROGRAM", "/usr/bin/python3"),
            ("PHOTOTRAIL_FILE_WORKER_ARGS", "-u,./scripts/process_image.py"),
            ("PHOTOTRAIL_WORKER_TIMEOUT_SECS", "30"),
        ]))
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.derived_dir, PathBuf::from("/srv/derived"));
        assert_eq!(
            config.file_worker(),
            WorkerCommand::new("/usr/bin/python3", ["-u", "./scripts/process_image.py"])
        );
        assert_eq!(config.worker_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn bare_port_is_a_fallback_only() {
        let config = AppConfig::from_vars(vars(&[("PORT", "5000")])).unwrap();
        assert_eq!(config.port, 5000);

        let config =
            AppConfig::from_vars(vars(&[("PORT", "5000"), ("PHOTOTRAIL_PORT", "6000")])).unwrap();
        assert_eq!(config.port, 6000);

        assert!(AppConfig::from_vars(vars(&[("PORT", "http")])).is_err());
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        assert!(AppConfig::from_vars(vars(&[("PHOTOTRAIL_MAX_FILES_PER_BATCH", "0")])).is_err());
    }
}
