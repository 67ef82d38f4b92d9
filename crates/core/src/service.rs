//! Caller-facing facade wiring the catalogue, scan orchestrator and
//! consolidation engine together.

use crate::catalog::Catalog;
use crate::config::AppConfig;
use crate::consolidate::{ConsolidateOutcome, ConsolidateRequest, Consolidator};
use crate::error::{DedupeError, Result};
use crate::models::{
    CompletedFile, FileRecord, GroupPage, GroupQuery, OperationLog, ScanProgress, ScanTask,
    Statistics,
};
use crate::output::{self, DirNode};
use crate::preview::{self, FilePreview};
use crate::registry::TaskRegistry;
use crate::scanner::{ScanHandle, ScanOrchestrator, ScanSettings};
use crate::stats;
use anyhow::Context;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::task;

#[derive(Clone)]
pub struct DedupeService {
    catalog: Catalog,
    scans: ScanOrchestrator,
    consolidator: Consolidator,
}

impl DedupeService {
    /// Connects to the configured database, applies migrations and builds the service.
    pub async fn open(cfg: &AppConfig) -> anyhow::Result<Self> {
        let pool = storage::connect(&cfg.database.path)
            .await
            .with_context(|| format!("opening database {}", cfg.database.path))?;
        storage::migrate(&pool)
            .await
            .context("running database migrations")?;
        Ok(Self::with_pool(pool, cfg)?)
    }

    pub fn with_pool(pool: SqlitePool, cfg: &AppConfig) -> Result<Self> {
        let catalog = Catalog::new(pool);
        let registry = Arc::new(TaskRegistry::new(Arc::new(catalog.clone())));
        let settings = ScanSettings::from_config(cfg)?;
        let scans = ScanOrchestrator::new(catalog.clone(), registry, settings);
        let consolidator = Consolidator::new(
            catalog.clone(),
            cfg.output_root(),
            cfg.scan_roots(),
            cfg.scan.chunk_size,
        );
        Ok(Self {
            catalog,
            scans,
            consolidator,
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn scans(&self) -> &ScanOrchestrator {
        &self.scans
    }

    pub async fn start_scan(&self) -> Result<ScanHandle> {
        self.scans.start().await
    }

    pub async fn scan_progress(&self, task_id: &str) -> Result<ScanProgress> {
        self.scans.registry().get(task_id).await
    }

    /// Full task state, including the failure message of a failed scan.
    pub async fn scan_task(&self, task_id: &str) -> Result<ScanTask> {
        self.scans.registry().task(task_id).await
    }

    pub async fn duplicate_groups(&self, query: &GroupQuery) -> Result<GroupPage> {
        self.catalog.duplicate_groups(query).await
    }

    pub async fn file_detail(&self, id: i64) -> Result<FileRecord> {
        self.catalog
            .file_by_id(id)
            .await?
            .ok_or_else(|| DedupeError::NotFound(format!("file {id}")))
    }

    pub async fn file_preview(&self, id: i64) -> Result<FilePreview> {
        let file = self.file_detail(id).await?;
        Ok(task::spawn_blocking(move || preview::preview(file)).await?)
    }

    pub async fn consolidate(&self, req: &ConsolidateRequest) -> Result<ConsolidateOutcome> {
        // Held until the catalogue and filesystem updates are done.
        let _permit = self.scans.consolidation_permit()?;
        self.consolidator.consolidate(req).await
    }

    pub async fn statistics(&self) -> Result<Statistics> {
        stats::statistics(&self.catalog).await
    }

    pub async fn output_tree(&self) -> Result<DirNode> {
        let root = self.consolidator.output_root().to_path_buf();
        task::spawn_blocking(move || output::output_tree(&root)).await?
    }

    pub async fn create_directory(&self, parent: &str, name: &str) -> Result<String> {
        let root = self.consolidator.output_root().to_path_buf();
        let (parent, name) = (parent.to_string(), name.to_string());
        task::spawn_blocking(move || output::create_directory(&root, &parent, &name)).await?
    }

    pub async fn completed_files(&self, limit: u32) -> Result<Vec<CompletedFile>> {
        self.catalog.completed_files(limit).await
    }

    pub async fn operation_logs(&self, limit: u32) -> Result<Vec<OperationLog>> {
        self.catalog.operation_logs(limit).await
    }
}
