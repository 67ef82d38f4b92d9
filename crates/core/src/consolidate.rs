//! Consolidation: replace a duplicate group with one canonical file under the
//! output root, archive the group, then remove the originals.

use crate::catalog::{Catalog, NewCompletedFile, NewOperationLog};
use crate::error::{DedupeError, Result};
use crate::fs_ops;
use crate::models::{FileRecord, OperationStatus};
use crate::paths;
use crate::walker::{self, extension_of};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::task;
use tracing::{info, warn};

pub const OPERATION_TYPE: &str = "process_duplicates";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidateRequest {
    pub file_ids: Vec<i64>,
    pub new_file_name: String,
    /// Directory relative to the output root; empty means the root itself.
    pub target_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsolidateOutcome {
    pub target_full_path: PathBuf,
    pub processed_count: usize,
    pub completed_file_id: i64,
    pub removed_originals: usize,
    /// Originals that could not be deleted; they remain on disk.
    pub failed_deletions: Vec<String>,
}

#[derive(Clone)]
pub struct Consolidator {
    catalog: Catalog,
    output_root: PathBuf,
    scan_roots: Vec<PathBuf>,
    chunk_size: usize,
}

impl Consolidator {
    pub fn new(
        catalog: Catalog,
        output_root: PathBuf,
        scan_roots: Vec<PathBuf>,
        chunk_size: usize,
    ) -> Self {
        Self {
            catalog,
            output_root,
            scan_roots,
            chunk_size,
        }
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub async fn consolidate(&self, req: &ConsolidateRequest) -> Result<ConsolidateOutcome> {
        let plan = self.plan(req).await?;
        let originals: Vec<String> = plan.records.iter().map(|r| r.path.clone()).collect();
        let description = format!(
            "Consolidated {} files to {}",
            plan.records.len(),
            req.new_file_name
        );

        if let Err(err) = self.publish_copy(&plan).await {
            self.log_failure(&description, &originals, &err).await;
            return Err(err);
        }

        let completed = NewCompletedFile {
            path: plan.dest.to_string_lossy().into_owned(),
            name: req.new_file_name.clone(),
            size: plan.representative().size,
            hash: plan.representative().hash.clone(),
            ext: extension_of(&plan.dest),
            original_paths: originals.clone(),
        };
        let ids: Vec<i64> = plan.records.iter().map(|r| r.id).collect();
        let completed_file_id = match self.catalog.record_consolidation(&completed, &ids).await {
            Ok(id) => id,
            Err(err) => {
                warn!(
                    dest = %plan.dest.display(),
                    error = %err,
                    "catalogue update failed; published copy left in place"
                );
                self.log_failure(&description, &originals, &err).await;
                return Err(err);
            }
        };

        let roots = self.scan_roots.clone();
        let to_remove = originals.clone();
        let failed_deletions =
            task::spawn_blocking(move || remove_originals(&to_remove, &roots)).await?;
        let removed_originals = originals.len() - failed_deletions.len();

        let (status, error_message) = if failed_deletions.is_empty() {
            (OperationStatus::Success, None)
        } else {
            (
                OperationStatus::Partial,
                Some(format!(
                    "failed to delete {} original(s): {}",
                    failed_deletions.len(),
                    failed_deletions.join(", ")
                )),
            )
        };
        let log = NewOperationLog {
            operation_type: OPERATION_TYPE.to_string(),
            description,
            affected_files: originals,
            status,
            error_message,
        };
        if let Err(err) = self.catalog.append_operation_log(&log).await {
            warn!(error = %err, "could not append operation log");
        }

        info!(
            dest = %plan.dest.display(),
            files = plan.records.len(),
            removed = removed_originals,
            "duplicate group consolidated"
        );
        Ok(ConsolidateOutcome {
            target_full_path: plan.dest,
            processed_count: plan.records.len(),
            completed_file_id,
            removed_originals,
            failed_deletions,
        })
    }

    /// Checks every precondition without touching the filesystem or catalogue.
    async fn plan(&self, req: &ConsolidateRequest) -> Result<Plan> {
        if req.file_ids.is_empty() {
            return Err(DedupeError::InvalidArgument("file_ids is empty".into()));
        }
        paths::validate_file_name(&req.new_file_name)?;

        let wanted: BTreeSet<i64> = req.file_ids.iter().copied().collect();
        let wanted: Vec<i64> = wanted.into_iter().collect();
        let records = self.catalog.files_by_ids(&wanted).await?;
        if records.is_empty() {
            return Err(DedupeError::NotFound(format!("files {:?}", req.file_ids)));
        }
        if records.len() < wanted.len() {
            let missing: Vec<i64> = wanted
                .iter()
                .filter(|id| !records.iter().any(|r| r.id == **id))
                .copied()
                .collect();
            warn!(?missing, "ignoring unknown file ids");
        }

        let first = &records[0];
        if let Some(odd) = records
            .iter()
            .find(|r| r.hash != first.hash || r.size != first.size)
        {
            return Err(DedupeError::InconsistentGroup(format!(
                "file {} differs from file {}",
                odd.id, first.id
            )));
        }

        let dest_dir = paths::resolve_within(&self.output_root, &req.target_path)?;
        let dest = dest_dir.join(&req.new_file_name);
        if fs::symlink_metadata(&dest).is_ok() {
            return Err(DedupeError::Conflict(dest));
        }
        Ok(Plan { records, dest })
    }

    async fn publish_copy(&self, plan: &Plan) -> Result<()> {
        let rep = plan.representative();
        let src = PathBuf::from(&rep.path);
        let dest = plan.dest.clone();
        let hash = rep.hash.clone();
        let size = rep.size;
        let chunk_size = self.chunk_size;
        task::spawn_blocking(move || fs_ops::copy_verified(&src, &dest, &hash, size, chunk_size))
            .await?
    }

    async fn log_failure(&self, description: &str, originals: &[String], err: &DedupeError) {
        let log = NewOperationLog {
            operation_type: OPERATION_TYPE.to_string(),
            description: description.to_string(),
            affected_files: originals.to_vec(),
            status: OperationStatus::Failed,
            error_message: Some(err.to_string()),
        };
        if let Err(log_err) = self.catalog.append_operation_log(&log).await {
            warn!(error = %log_err, "could not record failed consolidation");
        }
    }
}

struct Plan {
    /// Ordered by id; the first one is copied.
    records: Vec<FileRecord>,
    dest: PathBuf,
}

impl Plan {
    fn representative(&self) -> &FileRecord {
        &self.records[0]
    }
}

/// Deletes each original and prunes emptied parents. Returns the paths that
/// could not be deleted.
fn remove_originals(originals: &[String], roots: &[PathBuf]) -> Vec<String> {
    // Catalogued paths are canonical, so the prune bounds must be too.
    let roots = walker::resolve_roots(roots);
    let mut failed = Vec::new();
    for original in originals {
        let path = Path::new(original);
        match fs::remove_file(path) {
            Ok(()) => {
                if let Some(parent) = path.parent() {
                    fs_ops::prune_empty_dirs(parent, &roots);
                }
            }
            Err(err) => {
                warn!(path = %original, error = %err, "could not delete original");
                failed.push(original.clone());
            }
        }
    }
    failed
}
