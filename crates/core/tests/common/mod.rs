#![allow(dead_code)]

use dedupe_core::config::{AppConfig, DatabaseConfig, PathsConfig, ScanConfig};
use dedupe_core::models::ScanTask;
use dedupe_core::DedupeService;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub struct Fixture {
    pub temp: TempDir,
    pub root: PathBuf,
    pub out: PathBuf,
    pub cfg: AppConfig,
    pub service: DedupeService,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_scan(ScanConfig::default()).await
    }

    pub async fn with_scan(scan: ScanConfig) -> Self {
        let temp = tempfile::tempdir().unwrap();
        // Catalogued paths are canonical; keep fixture paths comparable.
        let base = temp.path().canonicalize().unwrap();
        let root = base.join("library");
        let out = base.join("consolidated");
        fs::create_dir_all(&root).unwrap();
        let cfg = AppConfig {
            database: DatabaseConfig {
                path: base.join("catalog.db").to_string_lossy().into_owned(),
            },
            paths: PathsConfig {
                scan_paths: vec![root.to_string_lossy().into_owned()],
                output_path: out.to_string_lossy().into_owned(),
            },
            scan,
        };
        let service = DedupeService::open(&cfg).await.unwrap();
        Self {
            temp,
            root,
            out,
            cfg,
            service,
        }
    }

    /// Writes `bytes` at `rel` below the scan root, creating parents.
    pub fn write(&self, rel: &str, bytes: &[u8]) -> PathBuf {
        let path = self.root.join(rel);
        write(&path, bytes);
        path
    }

    pub async fn scan(&self) -> ScanTask {
        let handle = self.service.start_scan().await.unwrap();
        let task_id = handle.task_id.clone();
        handle.wait().await;
        self.service.scan_task(&task_id).await.unwrap()
    }

    /// Ids of every catalogued file with this path suffix, in id order.
    pub async fn ids_of(&self, suffixes: &[&str]) -> Vec<i64> {
        let mut ids = Vec::new();
        for suffix in suffixes {
            let path = self.root.join(suffix);
            let record = self
                .service
                .catalog()
                .file_by_path(&path.to_string_lossy())
                .await
                .unwrap()
                .unwrap_or_else(|| panic!("{suffix} not catalogued"));
            ids.push(record.id);
        }
        ids
    }
}

pub fn write(path: &Path, bytes: &[u8]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, bytes).unwrap();
}
