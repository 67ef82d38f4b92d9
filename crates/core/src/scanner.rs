//! Scan tasks: walk the roots, fingerprint every file, and store the
//! results in the catalogue in batches while reporting progress.

use crate::catalog::Catalog;
use crate::config::AppConfig;
use crate::error::{DedupeError, Result};
use crate::hasher;
use crate::models::{NewFile, ScanStatus};
use crate::registry::TaskRegistry;
use crate::walker::{FileDescriptor, WalkOptions, Walker};
use chrono::Utc;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, OwnedRwLockReadGuard, RwLock};
use tokio::task::{self, JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub roots: Vec<PathBuf>,
    pub batch_size: usize,
    pub chunk_size: usize,
    pub walk: WalkOptions,
}

impl ScanSettings {
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        Ok(Self {
            roots: cfg.scan_roots(),
            batch_size: cfg.scan.batch_size.max(1),
            chunk_size: cfg.scan.chunk_size.max(1),
            walk: WalkOptions::from_config(&cfg.scan)?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub total_files: u64,
    pub processed_files: u64,
}

struct Discovered {
    file: FileDescriptor,
    hash: io::Result<String>,
}

/// Handle to a running scan; dropping it detaches the task.
#[derive(Debug)]
pub struct ScanHandle {
    pub task_id: String,
    join: JoinHandle<()>,
}

impl ScanHandle {
    /// Waits until the task has reached a terminal state.
    pub async fn wait(self) {
        if let Err(err) = self.join.await {
            error!(task_id = %self.task_id, error = %err, "scan supervisor aborted");
        }
    }
}

/// Clears the in-flight marker when the owning scan finishes, even on panic.
struct ActiveGuard {
    slot: Arc<Mutex<Option<String>>>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }
}

/// Runs at most one scan at a time; a second start while one is in flight is rejected.
///
/// Scans and consolidations exclude each other through `gate`: a running scan
/// holds it exclusively while it rewrites the catalogue, a consolidation holds
/// a shared permit for its whole duration.
#[derive(Clone)]
pub struct ScanOrchestrator {
    catalog: Catalog,
    registry: Arc<TaskRegistry>,
    settings: Arc<ScanSettings>,
    active: Arc<Mutex<Option<String>>>,
    gate: Arc<RwLock<()>>,
}

impl ScanOrchestrator {
    pub fn new(catalog: Catalog, registry: Arc<TaskRegistry>, settings: ScanSettings) -> Self {
        Self {
            catalog,
            registry,
            settings: Arc::new(settings),
            active: Arc::new(Mutex::new(None)),
            gate: Arc::new(RwLock::new(())),
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn active_task(&self) -> Option<String> {
        self.active.lock().ok().and_then(|slot| slot.clone())
    }

    /// Permit to mutate files and catalogue outside a scan. Fails with
    /// `ScanInProgress` while a scan is registered or running. A scan started
    /// while the permit is held waits for it before touching the catalogue.
    pub fn consolidation_permit(&self) -> Result<OwnedRwLockReadGuard<()>> {
        if let Some(running) = self.active_task() {
            return Err(DedupeError::ScanInProgress(running));
        }
        Arc::clone(&self.gate).try_read_owned().map_err(|_| {
            DedupeError::ScanInProgress(self.active_task().unwrap_or_else(|| "pending".into()))
        })
    }

    fn claim(&self, task_id: &str) -> Result<ActiveGuard> {
        let mut slot = self
            .active
            .lock()
            .map_err(|_| DedupeError::Internal("scan state lock poisoned".into()))?;
        if let Some(running) = slot.as_ref() {
            return Err(DedupeError::ScanInProgress(running.clone()));
        }
        *slot = Some(task_id.to_string());
        Ok(ActiveGuard {
            slot: Arc::clone(&self.active),
        })
    }

    /// Registers a new task and runs it in the background.
    pub async fn start(&self) -> Result<ScanHandle> {
        let task_id = new_task_id();
        let guard = self.claim(&task_id)?;
        self.registry.create(&task_id).await?;
        info!(task_id = %task_id, roots = self.settings.roots.len(), "scan started");

        let ctx = RunContext {
            task_id: task_id.clone(),
            catalog: self.catalog.clone(),
            registry: Arc::clone(&self.registry),
            settings: Arc::clone(&self.settings),
            gate: Arc::clone(&self.gate),
        };
        let join = tokio::spawn(supervise(ctx, guard));
        Ok(ScanHandle { task_id, join })
    }
}

#[derive(Clone)]
struct RunContext {
    task_id: String,
    catalog: Catalog,
    registry: Arc<TaskRegistry>,
    settings: Arc<ScanSettings>,
    gate: Arc<RwLock<()>>,
}

/// Runs the scan in its own task so panics are observed too, then records the outcome.
async fn supervise(ctx: RunContext, guard: ActiveGuard) {
    let exclusive = Arc::clone(&ctx.gate).write_owned().await;
    let outcome = match tokio::spawn(run(ctx.clone())).await {
        Ok(result) => result,
        Err(join_err) => Err(DedupeError::from(join_err)),
    };

    let terminal = match outcome {
        Ok(summary) => {
            info!(
                task_id = %ctx.task_id,
                total = summary.total_files,
                processed = summary.processed_files,
                "scan completed"
            );
            ctx.registry
                .set_terminal(&ctx.task_id, ScanStatus::Completed, None)
                .await
        }
        Err(err) => {
            error!(task_id = %ctx.task_id, error = %err, "scan failed");
            ctx.registry
                .set_terminal(&ctx.task_id, ScanStatus::Failed, Some(err.to_string()))
                .await
        }
    };
    if let Err(err) = terminal {
        error!(task_id = %ctx.task_id, error = %err, "could not persist final scan state");
    }
    drop(exclusive);
    drop(guard);
}

async fn run(ctx: RunContext) -> Result<ScanSummary> {
    let cleared = ctx.catalog.clear_files().await?;
    debug!(task_id = %ctx.task_id, cleared, "previous scan generation cleared");

    let (tx, mut rx) = mpsc::channel::<Discovered>(CHANNEL_CAPACITY);
    let settings = Arc::clone(&ctx.settings);

    // Walker + hasher on a blocking thread.
    let walker_handle = task::spawn_blocking(move || {
        let walker = Walker::new(settings.roots.clone(), settings.walk.clone());
        for file in walker {
            let hash = hasher::hash_file(&file.path, settings.chunk_size);
            if tx.blocking_send(Discovered { file, hash }).is_err() {
                // Receiver dropped, stop walking.
                break;
            }
        }
    });

    let batch_size = ctx.settings.batch_size;
    let mut batch: Vec<NewFile> = Vec::with_capacity(batch_size);
    let mut summary = ScanSummary::default();

    while let Some(found) = rx.recv().await {
        summary.total_files += 1;
        ctx.registry
            .record_discovery(&ctx.task_id, summary.total_files)
            .await;

        match found.hash {
            Ok(hash) => batch.push(NewFile {
                path: found.file.path.to_string_lossy().into_owned(),
                name: found.file.name,
                size: found.file.size,
                hash,
                ext: found.file.ext,
            }),
            Err(err) => {
                warn!(
                    path = %found.file.path.display(),
                    error = %err,
                    "hash failed, skipping file"
                );
            }
        }

        if batch.len() >= batch_size {
            flush(&ctx, &mut batch, &mut summary).await?;
        }
    }

    walker_handle.await?;

    if !batch.is_empty() {
        flush(&ctx, &mut batch, &mut summary).await?;
    }
    Ok(summary)
}

async fn flush(
    ctx: &RunContext,
    batch: &mut Vec<NewFile>,
    summary: &mut ScanSummary,
) -> Result<()> {
    ctx.catalog.insert_files(batch).await?;
    summary.processed_files += batch.len() as u64;
    batch.clear();
    ctx.registry
        .update_progress(&ctx.task_id, summary.processed_files, summary.total_files)
        .await?;
    debug!(
        task_id = %ctx.task_id,
        processed = summary.processed_files,
        total = summary.total_files,
        "batch flushed"
    );
    Ok(())
}

fn new_task_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("scan_{}_{}", Utc::now().timestamp_millis(), &suffix[..8])
}
