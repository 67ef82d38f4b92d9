use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use storage::models::{CompletedFileRow, FileRow, OperationLogRow, ScanTaskRow};

/// One scanned file in the current generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: i64,
    pub path: String,
    pub name: String,
    pub size: u64,
    pub hash: String,
    pub ext: String,
    pub discovered_at: DateTime<Utc>,
}

impl From<FileRow> for FileRecord {
    fn from(row: FileRow) -> Self {
        Self {
            id: row.id,
            path: row.path,
            name: row.name,
            size: row.size.max(0) as u64,
            hash: row.hash,
            ext: row.ext,
            discovered_at: from_epoch(row.discovered_at),
        }
    }
}

/// A file ready to be written to the catalogue.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub path: String,
    pub name: String,
    pub size: u64,
    pub hash: String,
    pub ext: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateGroup {
    /// `<hash>_<size>`
    pub group_id: String,
    pub hash: String,
    pub size: u64,
    pub file_count: u64,
    pub files: Vec<FileRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupPage {
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub groups: Vec<DuplicateGroup>,
}

#[derive(Debug, Clone, Default)]
pub struct GroupQuery {
    pub page: u32,
    pub page_size: u32,
    pub min_size: u64,
    pub ext: Option<String>,
}

impl GroupQuery {
    pub fn new(page: u32, page_size: u32) -> Self {
        Self {
            page,
            page_size,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedFile {
    pub id: i64,
    pub path: String,
    pub name: String,
    pub size: u64,
    pub hash: String,
    pub ext: String,
    pub original_paths: Vec<String>,
    pub processed_at: DateTime<Utc>,
}

impl From<CompletedFileRow> for CompletedFile {
    fn from(row: CompletedFileRow) -> Self {
        Self {
            id: row.id,
            path: row.path,
            name: row.name,
            size: row.size.max(0) as u64,
            hash: row.hash,
            ext: row.ext,
            original_paths: serde_json::from_str(&row.original_paths).unwrap_or_default(),
            processed_at: from_epoch(row.processed_at),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Success,
    Partial,
    Failed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Success => "success",
            OperationStatus::Partial => "partial",
            OperationStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationLog {
    pub id: i64,
    pub operation_type: String,
    pub description: String,
    pub affected_files: Vec<String>,
    pub result_status: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<OperationLogRow> for OperationLog {
    fn from(row: OperationLogRow) -> Self {
        Self {
            id: row.id,
            operation_type: row.operation_type,
            description: row.description,
            affected_files: serde_json::from_str(&row.affected_files).unwrap_or_default(),
            result_status: row.result_status,
            error_message: row.error_message,
            created_at: from_epoch(row.created_at),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Pending,
    Scanning,
    Completed,
    Failed,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Scanning => "scanning",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Failed)
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ScanStatus::Pending),
            "scanning" => Ok(ScanStatus::Scanning),
            "completed" => Ok(ScanStatus::Completed),
            "failed" => Ok(ScanStatus::Failed),
            other => Err(format!("unknown scan status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanTask {
    pub id: String,
    pub status: ScanStatus,
    pub total_files: u64,
    pub processed_files: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl ScanTask {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: ScanStatus::Pending,
            total_files: 0,
            processed_files: 0,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }

    pub fn progress(&self) -> ScanProgress {
        ScanProgress {
            task_id: self.id.clone(),
            status: self.status,
            progress: percent(self.processed_files, self.total_files),
            total_files: self.total_files,
            processed_files: self.processed_files,
        }
    }
}

impl TryFrom<ScanTaskRow> for ScanTask {
    type Error = String;

    fn try_from(row: ScanTaskRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            status: row.status.parse()?,
            total_files: row.total_files.max(0) as u64,
            processed_files: row.processed_files.max(0) as u64,
            started_at: from_epoch(row.started_at),
            finished_at: row.finished_at.map(from_epoch),
            error: row.error_message,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanProgress {
    pub task_id: String,
    pub status: ScanStatus,
    /// Whole percent, 0..=100.
    pub progress: u8,
    pub total_files: u64,
    pub processed_files: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_files: u64,
    pub total_size: u64,
    pub duplicate_files: u64,
    pub duplicate_size: u64,
    pub saved_space: u64,
}

/// round(processed / total * 100), 0 when nothing has been discovered.
pub fn percent(processed: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let processed = processed.min(total) as u128;
    let total = total as u128;
    ((processed * 100 + total / 2) / total) as u8
}

pub(crate) fn from_epoch(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}
