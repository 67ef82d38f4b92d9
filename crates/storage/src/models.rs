//! Row shapes for the catalogue tables.

use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct FileRow {
    pub id: i64,
    pub path: String,
    pub name: String,
    pub size: i64,
    pub hash: String,
    pub ext: String,
    pub discovered_at: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct CompletedFileRow {
    pub id: i64,
    pub path: String,
    pub name: String,
    pub size: i64,
    pub hash: String,
    pub ext: String,
    /// JSON array of the original source paths.
    pub original_paths: String,
    pub processed_at: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct OperationLogRow {
    pub id: i64,
    pub operation_type: String,
    pub description: String,
    /// JSON array of affected paths.
    pub affected_files: String,
    pub result_status: String,
    pub error_message: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct ScanTaskRow {
    pub id: String,
    pub status: String,
    pub total_files: i64,
    pub processed_files: i64,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct GroupRow {
    pub hash: String,
    pub size: i64,
    pub file_count: i64,
}
