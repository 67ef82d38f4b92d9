//! Catalogue queries over the SQLite store: file records, duplicate groups,
//! aggregates, consolidation records and the scan-task mirror.

use crate::error::Result;
use crate::models::{
    CompletedFile, DuplicateGroup, FileRecord, GroupPage, GroupQuery, NewFile, OperationLog,
    OperationStatus, ScanTask,
};
use crate::registry::TaskMirror;
use crate::walker::normalize_ext;
use crate::DedupeError;
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use storage::models::{CompletedFileRow, FileRow, GroupRow, OperationLogRow, ScanTaskRow};
use tracing::debug;

/// Rows per multi-row INSERT, keeping bind parameters well under SQLite's limit.
const INSERT_ROWS_PER_STATEMENT: usize = 2_000;
pub const MAX_PAGE_SIZE: u32 = 500;

const FILE_COLUMNS: &str = "id, path, name, size, hash, ext, discovered_at";

/// Archival data written when a duplicate group is consolidated.
#[derive(Debug, Clone)]
pub struct NewCompletedFile {
    pub path: String,
    pub name: String,
    pub size: u64,
    pub hash: String,
    pub ext: String,
    pub original_paths: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NewOperationLog {
    pub operation_type: String,
    pub description: String,
    pub affected_files: Vec<String>,
    pub status: OperationStatus,
    pub error_message: Option<String>,
}

/// Raw aggregate figures; see [`crate::stats`] for the derived view.
#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogTotals {
    pub total_files: i64,
    pub total_size: i64,
    pub duplicate_files: i64,
    pub duplicate_size: i64,
    pub reclaimable: i64,
}

#[derive(Clone)]
pub struct Catalog {
    pool: SqlitePool,
}

impl Catalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Drops every file record of the previous scan generation.
    pub async fn clear_files(&self) -> Result<u64> {
        let res = sqlx::query("DELETE FROM files").execute(&self.pool).await?;
        Ok(res.rows_affected())
    }

    /// Inserts one batch atomically.
    pub async fn insert_files(&self, files: &[NewFile]) -> Result<()> {
        if files.is_empty() {
            return Ok(());
        }
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        for chunk in files.chunks(INSERT_ROWS_PER_STATEMENT) {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new("INSERT INTO files (path, name, size, hash, ext, discovered_at) ");
            qb.push_values(chunk, |mut b, f| {
                b.push_bind(f.path.clone())
                    .push_bind(f.name.clone())
                    .push_bind(f.size as i64)
                    .push_bind(f.hash.clone())
                    .push_bind(f.ext.clone())
                    .push_bind(now);
            });
            qb.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;
        debug!(rows = files.len(), "inserted file batch");
        Ok(())
    }

    pub async fn file_count(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
            .fetch_one(&self.pool)
            .await?;
        Ok(n.max(0) as u64)
    }

    pub async fn file_by_id(&self, id: i64) -> Result<Option<FileRecord>> {
        let row = sqlx::query_as::<_, FileRow>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(FileRecord::from))
    }

    pub async fn file_by_path(&self, path: &str) -> Result<Option<FileRecord>> {
        let row = sqlx::query_as::<_, FileRow>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE path = ?1"
        ))
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(FileRecord::from))
    }

    /// Records for the given ids, ordered by id. Unknown ids are absent.
    pub async fn files_by_ids(&self, ids: &[i64]) -> Result<Vec<FileRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {FILE_COLUMNS} FROM files WHERE id IN ("));
        let mut sep = qb.separated(", ");
        for id in ids {
            sep.push_bind(*id);
        }
        sep.push_unseparated(") ORDER BY id");
        let rows = qb.build_query_as::<FileRow>().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(FileRecord::from).collect())
    }

    pub async fn files_by_fingerprint(&self, hash: &str, size: u64) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query_as::<_, FileRow>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE hash = ?1 AND size = ?2 ORDER BY id"
        ))
        .bind(hash)
        .bind(size as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(FileRecord::from).collect())
    }

    /// One page of duplicate groups, largest files first.
    ///
    /// Groups are aggregated in SQL; members are fetched only for the groups
    /// on the requested page.
    pub async fn duplicate_groups(&self, query: &GroupQuery) -> Result<GroupPage> {
        if query.page == 0 || query.page_size == 0 {
            return Err(DedupeError::InvalidArgument(
                "page and page_size must be >= 1".into(),
            ));
        }
        let page_size = query.page_size.min(MAX_PAGE_SIZE);
        let offset = (query.page as i64 - 1) * page_size as i64;
        let ext = query
            .ext
            .as_deref()
            .map(normalize_ext)
            .filter(|e| !e.is_empty());
        let min_size = query.min_size.min(i64::MAX as u64) as i64;

        let mut count_qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) FROM (SELECT 1 FROM files WHERE size >= ");
        count_qb.push_bind(min_size);
        if let Some(ext) = &ext {
            count_qb.push(" AND ext = ").push_bind(ext.clone());
        }
        count_qb.push(" GROUP BY hash, size HAVING COUNT(*) > 1)");
        let total: i64 = count_qb
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT hash, size, COUNT(*) AS file_count FROM files WHERE size >= ",
        );
        qb.push_bind(min_size);
        if let Some(ext) = &ext {
            qb.push(" AND ext = ").push_bind(ext.clone());
        }
        qb.push(" GROUP BY hash, size HAVING COUNT(*) > 1 ORDER BY size DESC, hash ASC LIMIT ")
            .push_bind(page_size as i64)
            .push(" OFFSET ")
            .push_bind(offset);
        let rows = qb.build_query_as::<GroupRow>().fetch_all(&self.pool).await?;

        let mut groups = Vec::with_capacity(rows.len());
        for row in rows {
            let members = self.group_members(&row.hash, row.size, ext.as_deref()).await?;
            groups.push(DuplicateGroup {
                group_id: format!("{}_{}", row.hash, row.size),
                hash: row.hash,
                size: row.size.max(0) as u64,
                file_count: row.file_count.max(0) as u64,
                files: members,
            });
        }

        Ok(GroupPage {
            total: total.max(0) as u64,
            page: query.page,
            page_size,
            groups,
        })
    }

    async fn group_members(
        &self,
        hash: &str,
        size: i64,
        ext: Option<&str>,
    ) -> Result<Vec<FileRecord>> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {FILE_COLUMNS} FROM files WHERE hash = "));
        qb.push_bind(hash.to_string())
            .push(" AND size = ")
            .push_bind(size);
        if let Some(ext) = ext {
            qb.push(" AND ext = ").push_bind(ext.to_string());
        }
        qb.push(" ORDER BY id");
        let rows = qb.build_query_as::<FileRow>().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(FileRecord::from).collect())
    }

    pub async fn totals(&self) -> Result<CatalogTotals> {
        let (total_files, total_size): (i64, i64) =
            sqlx::query_as("SELECT COUNT(*), COALESCE(SUM(size), 0) FROM files")
                .fetch_one(&self.pool)
                .await?;
        let (duplicate_files, duplicate_size, reclaimable): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(cnt), 0),
                   COALESCE(SUM(cnt * size), 0),
                   COALESCE(SUM((cnt - 1) * size), 0)
            FROM (
                SELECT size, COUNT(*) AS cnt
                FROM files
                GROUP BY hash, size
                HAVING COUNT(*) > 1
            )
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(CatalogTotals {
            total_files,
            total_size,
            duplicate_files,
            duplicate_size,
            reclaimable,
        })
    }

    /// Archives a consolidation and removes its file records in one transaction.
    /// Returns the new completed-file id.
    pub async fn record_consolidation(
        &self,
        completed: &NewCompletedFile,
        consumed_ids: &[i64],
    ) -> Result<i64> {
        let original_paths = serde_json::to_string(&completed.original_paths)
            .map_err(|e| DedupeError::Internal(e.to_string()))?;
        let mut tx = self.pool.begin().await?;

        let res = sqlx::query(
            r#"
            INSERT INTO completed_files (path, name, size, hash, ext, original_paths, processed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&completed.path)
        .bind(&completed.name)
        .bind(completed.size as i64)
        .bind(&completed.hash)
        .bind(&completed.ext)
        .bind(original_paths)
        .bind(Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;
        let completed_id = res.last_insert_rowid();

        if !consumed_ids.is_empty() {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("DELETE FROM files WHERE id IN (");
            let mut sep = qb.separated(", ");
            for id in consumed_ids {
                sep.push_bind(*id);
            }
            sep.push_unseparated(")");
            let deleted = qb.build().execute(&mut *tx).await?.rows_affected();
            if deleted != consumed_ids.len() as u64 {
                // Another consolidation consumed some of these records first.
                return Err(DedupeError::NotFound(format!(
                    "{} of {} file records",
                    consumed_ids.len() as u64 - deleted,
                    consumed_ids.len()
                )));
            }
        }

        tx.commit().await?;
        Ok(completed_id)
    }

    pub async fn append_operation_log(&self, log: &NewOperationLog) -> Result<i64> {
        let affected = serde_json::to_string(&log.affected_files)
            .map_err(|e| DedupeError::Internal(e.to_string()))?;
        let res = sqlx::query(
            r#"
            INSERT INTO operation_logs (operation_type, description, affected_files, result_status, error_message, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&log.operation_type)
        .bind(&log.description)
        .bind(affected)
        .bind(log.status.as_str())
        .bind(&log.error_message)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(res.last_insert_rowid())
    }

    pub async fn completed_files(&self, limit: u32) -> Result<Vec<CompletedFile>> {
        let rows = sqlx::query_as::<_, CompletedFileRow>(
            "SELECT id, path, name, size, hash, ext, original_paths, processed_at FROM completed_files ORDER BY id DESC LIMIT ?1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(CompletedFile::from).collect())
    }

    pub async fn operation_logs(&self, limit: u32) -> Result<Vec<OperationLog>> {
        let rows = sqlx::query_as::<_, OperationLogRow>(
            "SELECT id, operation_type, description, affected_files, result_status, error_message, created_at FROM operation_logs ORDER BY id DESC LIMIT ?1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(OperationLog::from).collect())
    }
}

#[async_trait::async_trait]
impl TaskMirror for Catalog {
    async fn insert_task(&self, task: &ScanTask) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scan_tasks (id, status, total_files, processed_files, started_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&task.id)
        .bind(task.status.as_str())
        .bind(task.total_files as i64)
        .bind(task.processed_files as i64)
        .bind(task.started_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_task_progress(&self, task_id: &str, processed: u64, total: u64) -> Result<()> {
        sqlx::query("UPDATE scan_tasks SET processed_files = ?2, total_files = ?3 WHERE id = ?1")
            .bind(task_id)
            .bind(processed as i64)
            .bind(total as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn finish_task(&self, task: &ScanTask) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scan_tasks
            SET status = ?2, total_files = ?3, processed_files = ?4, finished_at = ?5, error_message = ?6
            WHERE id = ?1
            "#,
        )
        .bind(&task.id)
        .bind(task.status.as_str())
        .bind(task.total_files as i64)
        .bind(task.processed_files as i64)
        .bind(task.finished_at.map(|t| t.timestamp()))
        .bind(&task.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_task(&self, task_id: &str) -> Result<Option<ScanTask>> {
        let row = sqlx::query_as::<_, ScanTaskRow>(
            "SELECT id, status, total_files, processed_files, started_at, finished_at, error_message FROM scan_tasks WHERE id = ?1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| ScanTask::try_from(r).map_err(DedupeError::Internal))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn catalog() -> Catalog {
        let pool = storage::connect("sqlite::memory:").await.unwrap();
        storage::migrate(&pool).await.unwrap();
        Catalog::new(pool)
    }

    fn file(path: &str, hash: &str) -> NewFile {
        NewFile {
            path: path.into(),
            name: path.rsplit('/').next().unwrap().into(),
            size: 10,
            hash: hash.into(),
            ext: ".txt".into(),
        }
    }

    fn completed(originals: &[&str]) -> NewCompletedFile {
        NewCompletedFile {
            path: "/out/merged.txt".into(),
            name: "merged.txt".into(),
            size: 10,
            hash: "h".into(),
            ext: ".txt".into(),
            original_paths: originals.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn large_batches_are_split_across_statements() {
        let catalog = catalog().await;
        let files: Vec<NewFile> = (0..4_500)
            .map(|i| file(&format!("/d/{i}.txt"), &format!("h{}", i % 10)))
            .collect();
        catalog.insert_files(&files).await.unwrap();
        assert_eq!(catalog.file_count().await.unwrap(), 4_500);
        assert_eq!(catalog.files_by_fingerprint("h3", 10).await.unwrap().len(), 450);
    }

    #[tokio::test]
    async fn consolidation_record_consumes_rows_once() {
        let catalog = catalog().await;
        catalog
            .insert_files(&[file("/d/a.txt", "h"), file("/d/b.txt", "h")])
            .await
            .unwrap();
        let ids: Vec<i64> = catalog
            .files_by_fingerprint("h", 10)
            .await
            .unwrap()
            .iter()
            .map(|f| f.id)
            .collect();

        let id = catalog
            .record_consolidation(&completed(&["/d/a.txt", "/d/b.txt"]), &ids)
            .await
            .unwrap();
        assert!(id > 0);
        assert_eq!(catalog.file_count().await.unwrap(), 0);

        // A second attempt on the same rows rolls back entirely.
        let err = catalog
            .record_consolidation(&completed(&["/d/a.txt"]), &ids)
            .await
            .unwrap_err();
        assert!(matches!(err, DedupeError::NotFound(_)));
        let history = catalog.completed_files(10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].original_paths, vec!["/d/a.txt", "/d/b.txt"]);
    }

    #[tokio::test]
    async fn completed_files_cannot_be_rewritten() {
        let catalog = catalog().await;
        catalog
            .record_consolidation(&completed(&["/d/a.txt"]), &[])
            .await
            .unwrap();
        let res = sqlx::query("UPDATE completed_files SET name = 'x'")
            .execute(catalog.pool())
            .await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn task_mirror_round_trips_state() {
        let catalog = catalog().await;
        let mut task = ScanTask::new("scan_1_aaaaaaaa");
        catalog.insert_task(&task).await.unwrap();
        catalog.update_task_progress(&task.id, 2, 5).await.unwrap();

        let loaded = catalog.load_task(&task.id).await.unwrap().unwrap();
        assert_eq!(loaded.processed_files, 2);
        assert_eq!(loaded.total_files, 5);

        task.status = crate::models::ScanStatus::Failed;
        task.error = Some("boom".into());
        task.finished_at = Some(Utc::now());
        catalog.finish_task(&task).await.unwrap();
        let loaded = catalog.load_task(&task.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, crate::models::ScanStatus::Failed);
        assert_eq!(loaded.error.as_deref(), Some("boom"));
        assert!(catalog.load_task("scan_missing").await.unwrap().is_none());
    }
}
