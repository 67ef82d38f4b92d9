use crate::catalog::{Catalog, CatalogTotals};
use crate::error::Result;
use crate::models::Statistics;

impl From<CatalogTotals> for Statistics {
    fn from(t: CatalogTotals) -> Self {
        Self {
            total_files: t.total_files.max(0) as u64,
            total_size: t.total_size.max(0) as u64,
            duplicate_files: t.duplicate_files.max(0) as u64,
            duplicate_size: t.duplicate_size.max(0) as u64,
            saved_space: t.reclaimable.max(0) as u64,
        }
    }
}

/// Aggregate figures over the current scan generation.
///
/// `saved_space` is what consolidating every group would reclaim: one copy
/// per group is kept, so each group contributes `(count - 1) * size`.
pub async fn statistics(catalog: &Catalog) -> Result<Statistics> {
    Ok(catalog.totals().await?.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewFile;

    async fn catalog() -> Catalog {
        let pool = storage::connect("sqlite::memory:").await.unwrap();
        storage::migrate(&pool).await.unwrap();
        Catalog::new(pool)
    }

    fn file(path: &str, size: u64, hash: &str) -> NewFile {
        NewFile {
            path: path.into(),
            name: path.rsplit('/').next().unwrap().into(),
            size,
            hash: hash.into(),
            ext: ".bin".into(),
        }
    }

    #[tokio::test]
    async fn empty_catalogue_is_all_zeros() {
        let stats = statistics(&catalog().await).await.unwrap();
        assert_eq!(stats, Statistics::default());
    }

    #[tokio::test]
    async fn counts_duplicates_and_reclaimable_bytes() {
        let catalog = catalog().await;
        catalog
            .insert_files(&[
                file("/d/a1", 100, "aaa"),
                file("/d/a2", 100, "aaa"),
                file("/d/a3", 100, "aaa"),
                file("/d/b1", 40, "bbb"),
                file("/d/b2", 40, "bbb"),
                file("/d/u", 7, "uuu"),
                // Same hash, different size: not the same group.
                file("/d/a-odd", 99, "aaa"),
            ])
            .await
            .unwrap();

        let stats = statistics(&catalog).await.unwrap();
        assert_eq!(stats.total_files, 7);
        assert_eq!(stats.total_size, 300 + 80 + 7 + 99);
        assert_eq!(stats.duplicate_files, 5);
        assert_eq!(stats.duplicate_size, 380);
        assert_eq!(stats.saved_space, 200 + 40);
    }
}
