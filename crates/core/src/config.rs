use crate::error::{DedupeError, Result};
use globset::Glob;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub paths: PathsConfig,
    #[serde(default)]
    pub scan: ScanConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Roots walked by a scan, in this order.
    pub scan_paths: Vec<String>,
    /// Consolidated files are written under this directory.
    pub output_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Directory names never descended into.
    #[serde(default = "default_exclude_dirs")]
    pub exclude_dirs: Vec<String>,
    /// Extensions (with or without leading dot) skipped by the walker.
    #[serde(default)]
    pub exclude_extensions: Vec<String>,
    /// File-name globs skipped by the walker.
    #[serde(default = "default_exclude_files")]
    pub exclude_files: Vec<String>,
    #[serde(default)]
    pub min_file_size: u64,
    /// Values <= 0 disable the upper bound.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: i64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            chunk_size: default_chunk_size(),
            exclude_dirs: default_exclude_dirs(),
            exclude_extensions: Vec::new(),
            exclude_files: default_exclude_files(),
            min_file_size: 0,
            max_file_size: default_max_file_size(),
        }
    }
}

fn default_batch_size() -> usize {
    100
}

fn default_chunk_size() -> usize {
    1024 * 1024
}

fn default_exclude_dirs() -> Vec<String> {
    ["node_modules", ".git", "dist", "build"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_exclude_files() -> Vec<String> {
    vec![".DS_Store".to_string(), "Thumbs.db".to_string()]
}

fn default_max_file_size() -> i64 {
    1024 * 1024 * 1024
}

impl AppConfig {
    pub fn scan_roots(&self) -> Vec<PathBuf> {
        self.paths.scan_paths.iter().map(PathBuf::from).collect()
    }

    pub fn output_root(&self) -> PathBuf {
        PathBuf::from(&self.paths.output_path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.path.trim().is_empty() {
            return Err(DedupeError::Config("database.path is empty".into()));
        }
        if self.paths.scan_paths.is_empty() {
            return Err(DedupeError::Config("paths.scan_paths is empty".into()));
        }
        if self.paths.output_path.trim().is_empty() {
            return Err(DedupeError::Config("paths.output_path is empty".into()));
        }
        if self.scan.batch_size == 0 {
            return Err(DedupeError::Config("scan.batch_size must be > 0".into()));
        }
        if self.scan.chunk_size == 0 {
            return Err(DedupeError::Config("scan.chunk_size must be > 0".into()));
        }
        for pat in &self.scan.exclude_files {
            Glob::new(pat)
                .map_err(|e| DedupeError::Config(format!("scan.exclude_files `{pat}`: {e}")))?;
        }
        Ok(())
    }
}

/// Loads configuration from an optional file plus `DEDUPE__*` environment overrides,
/// e.g. `DEDUPE__SCAN__BATCH_SIZE=500`.
pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    settings = settings.add_source(
        config::Environment::with_prefix("DEDUPE")
            .prefix_separator("__")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("paths.scan_paths")
            .try_parsing(true),
    );
    let cfg: AppConfig = settings.build()?.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}
