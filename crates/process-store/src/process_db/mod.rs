//! Process version store - current analyses, their version snapshots and
//! store-wide flags, in one database.
pub mod schema;

pub use schema::*;

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::StoreResult;
use crate::store_engine::{Database, DatabaseStats, LazyDatabase};

pub struct ProcessStore {
    db: LazyDatabase,
}

impl ProcessStore {
    pub fn new(config: &Config) -> Self {
        Self {
            db: LazyDatabase::new(
                config.database_path(&config.process_db_name),
                config.process_db_name.clone(),
                PROCESS_DB_VERSION,
                config.engine_options(),
                schema::migrate,
            ),
        }
    }

    /// The underlying handle, opened on first use.
    pub async fn database(&self) -> StoreResult<Arc<Database>> {
        self.db.get().await
    }

    /// Upsert the full document and append a new version snapshot.
    ///
    /// The version number is the number of snapshots currently stored for
    /// this id plus one. Snapshots deleted out of band therefore shift the
    /// numbering of later saves.
    pub async fn save_process(&self, mut analysis: Analysis) -> StoreResult<Analysis> {
        let db = self.database().await?;
        let now = Utc::now();
        analysis.created_at.get_or_insert(now);
        analysis.updated_at = Some(now);

        db.put(PROCESSES, &analysis).await?;

        let (number, taken) = next_version(&db, &analysis.id).await?;
        if taken {
            warn!(
                "Snapshot {} already exists and will be overwritten",
                version_id(&analysis.id, number)
            );
        }
        let version = ProcessVersion::new(&analysis, number, now);
        db.put(VERSIONS, &version).await?;

        info!("Saved process {} as version {}", analysis.id, version.version_number);
        Ok(analysis)
    }

    pub async fn get_process(&self, id: &str) -> StoreResult<Option<Analysis>> {
        self.database().await?.get(PROCESSES, id).await
    }

    /// Every current analysis, newest `createdAt` first.
    pub async fn get_all_processes(&self) -> StoreResult<Vec<Analysis>> {
        let mut processes: Vec<Analysis> = self.database().await?.get_all(PROCESSES).await?;
        processes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(processes)
    }

    /// Removes the current document only; snapshots and audit entries stay.
    pub async fn delete_process(&self, id: &str) -> StoreResult<bool> {
        let deleted = self.database().await?.delete(PROCESSES, id).await?;
        info!("Deleted process {} (existed: {})", id, deleted);
        Ok(deleted)
    }

    /// Linear scan over title, description and industry. A blank query
    /// returns everything.
    pub async fn search_processes(&self, query: &str) -> StoreResult<Vec<Analysis>> {
        let all = self.get_all_processes().await?;
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(all);
        }
        let matches: Vec<Analysis> = all.into_iter().filter(|a| a.matches(&needle)).collect();
        debug!("Search '{}' matched {} processes", needle, matches.len());
        Ok(matches)
    }

    pub async fn count_processes(&self) -> StoreResult<usize> {
        self.database().await?.count(PROCESSES).await
    }

    pub async fn get_meta(&self, key: &str) -> StoreResult<Option<serde_json::Value>> {
        let entry: Option<MetaEntry> = self.database().await?.get(META, key).await?;
        Ok(entry.map(|e| e.value))
    }

    pub async fn set_meta<V: Serialize>(&self, key: &str, value: &V) -> StoreResult<()> {
        let entry = MetaEntry { key: key.to_string(), value: serde_json::to_value(value)? };
        self.database().await?.put(META, &entry).await?;
        Ok(())
    }

    /// Snapshots for a process in ascending version order.
    pub async fn get_versions(&self, process_id: &str) -> StoreResult<Vec<ProcessVersion>> {
        let mut versions: Vec<ProcessVersion> = self
            .database()
            .await?
            .get_all_by_index(VERSIONS, VERSIONS_BY_PROCESS, process_id)
            .await?;
        versions.sort_by_key(|v| v.version_number);
        Ok(versions)
    }

    pub async fn get_version(&self, process_id: &str, version_number: u32) -> StoreResult<Option<ProcessVersion>> {
        self.database()
            .await?
            .get(VERSIONS, &version_id(process_id, version_number))
            .await
    }

    pub async fn delete_version(&self, process_id: &str, version_number: u32) -> StoreResult<bool> {
        self.database()
            .await?
            .delete(VERSIONS, &version_id(process_id, version_number))
            .await
    }

    /// Drops every snapshot of a process. Returns how many were removed.
    pub async fn purge_versions(&self, process_id: &str) -> StoreResult<usize> {
        let db = self.database().await?;
        let mut purged = 0;
        for version in self.get_versions(process_id).await? {
            if db.delete(VERSIONS, &version.id).await? {
                purged += 1;
            }
        }
        info!("Purged {} versions of process {}", purged, process_id);
        Ok(purged)
    }

    pub async fn stats(&self) -> StoreResult<DatabaseStats> {
        self.database().await?.stats().await
    }
}

/// Next snapshot number for `process_id`, and whether a snapshot with that
/// number is already stored.
async fn next_version(db: &Database, process_id: &str) -> StoreResult<(u32, bool)> {
    let existing = db.count_by_index(VERSIONS, VERSIONS_BY_PROCESS, process_id).await?;
    let number = existing as u32 + 1;
    let taken: Option<serde_json::Value> = db.get(VERSIONS, &version_id(process_id, number)).await?;
    Ok((number, taken.is_some()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> ProcessStore {
        ProcessStore::new(&Config::with_data_dir(dir.path()))
    }

    fn analysis(id: &str, title: &str, industry: &str) -> Analysis {
        let mut a = Analysis::new(title, format!("{} as it runs today", title));
        a.id = id.into();
        a.industry = industry.into();
        a
    }

    fn dated(id: &str, title: &str, industry: &str, y: i32, m: u32, d: u32) -> Analysis {
        let mut a = analysis(id, title, industry);
        a.created_at = Some(Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap());
        a
    }

    #[tokio::test]
    async fn test_versions_number_sequentially() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let mut doc = analysis("abc-123", "Loan Intake", "Banking");
        for i in 0..3 {
            doc.title = format!("Loan Intake rev {}", i);
            doc = store.save_process(doc).await.unwrap();
        }

        let versions = store.get_versions("abc-123").await.unwrap();
        let numbers: Vec<u32> = versions.iter().map(|v| v.version_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(versions[2].id, "abc-123_v3");
        assert_eq!(versions[0].snapshot.title, "Loan Intake rev 0");

        let current = store.get_process("abc-123").await.unwrap().unwrap();
        assert_eq!(current.title, "Loan Intake rev 2");
    }

    #[tokio::test]
    async fn test_save_sets_timestamps() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let first = store.save_process(analysis("p", "T", "I")).await.unwrap();
        let created = first.created_at.unwrap();
        assert_eq!(first.updated_at, Some(created));

        let second = store.save_process(first).await.unwrap();
        assert_eq!(second.created_at, Some(created));
        assert!(second.updated_at.unwrap() >= created);
    }

    #[tokio::test]
    async fn test_all_processes_newest_first() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.save_process(dated("b", "Mid", "X", 2024, 6, 15)).await.unwrap();
        store.save_process(dated("c", "Late", "X", 2024, 12, 31)).await.unwrap();
        store.save_process(dated("a", "Early", "X", 2024, 1, 1)).await.unwrap();

        let all = store.get_all_processes().await.unwrap();
        let ids: Vec<&str> = all.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_search_is_case_insensitive_and_ordered() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.save_process(dated("1", "Client Onboarding", "Banking", 2024, 3, 1)).await.unwrap();
        store.save_process(dated("2", "Fee Billing", "Wealth Management", 2024, 4, 1)).await.unwrap();
        store.save_process(dated("3", "Compliance Review", "Banking", 2024, 5, 1)).await.unwrap();

        let hits = store.search_processes("banking").await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["3", "1"]);

        let hits = store.search_processes("  BILLING ").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "2");
    }

    #[tokio::test]
    async fn test_blank_search_returns_everything() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.save_process(analysis("1", "A", "X")).await.unwrap();
        store.save_process(analysis("2", "B", "Y")).await.unwrap();

        assert_eq!(store.search_processes("").await.unwrap().len(), 2);
        assert_eq!(store.search_processes(" \t ").await.unwrap().len(), 2);
        assert!(store.search_processes("zzz").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_keeps_version_history() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let doc = store.save_process(analysis("gone", "Temp", "X")).await.unwrap();
        store.save_process(doc).await.unwrap();

        assert!(store.delete_process("gone").await.unwrap());
        assert!(store.get_process("gone").await.unwrap().is_none());
        assert!(store.get_all_processes().await.unwrap().is_empty());
        assert_eq!(store.get_versions("gone").await.unwrap().len(), 2);
        assert!(store.get_version("gone", 1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_deleted_snapshot_shifts_future_numbering() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let mut doc = analysis("p", "T", "I");
        for _ in 0..3 {
            doc = store.save_process(doc).await.unwrap();
        }
        assert!(store.delete_version("p", 1).await.unwrap());

        let db = store.database().await.unwrap();
        assert_eq!(next_version(&db, "p").await.unwrap(), (3, true));
        assert_eq!(next_version(&db, "fresh").await.unwrap(), (1, false));

        // Two snapshots remain, so the next save is numbered 3 and replaces
        // the existing third snapshot.
        doc.title = "after purge".into();
        store.save_process(doc).await.unwrap();
        let versions = store.get_versions("p").await.unwrap();
        let numbers: Vec<u32> = versions.iter().map(|v| v.version_number).collect();
        assert_eq!(numbers, vec![2, 3]);
        assert_eq!(versions[1].snapshot.title, "after purge");
    }

    #[tokio::test]
    async fn test_purge_versions() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let doc = store.save_process(analysis("p", "T", "I")).await.unwrap();
        store.save_process(doc).await.unwrap();
        store.save_process(analysis("q", "T", "I")).await.unwrap();

        assert_eq!(store.purge_versions("p").await.unwrap(), 2);
        assert!(store.get_versions("p").await.unwrap().is_empty());
        assert_eq!(store.get_versions("q").await.unwrap().len(), 1);

        let next = store.save_process(analysis("p", "T", "I")).await.unwrap();
        let versions = store.get_versions(&next.id).await.unwrap();
        assert_eq!(versions[0].version_number, 1);
    }

    #[tokio::test]
    async fn test_missing_version_is_none() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.save_process(analysis("p", "T", "I")).await.unwrap();
        assert!(store.get_version("p", 9).await.unwrap().is_none());
        assert!(store.get_version("other", 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_meta_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(store.get_meta("welcomeDismissed").await.unwrap().is_none());

        store.set_meta("welcomeDismissed", &true).await.unwrap();
        assert_eq!(store.get_meta("welcomeDismissed").await.unwrap(), Some(serde_json::json!(true)));

        store.set_meta("welcomeDismissed", &false).await.unwrap();
        assert_eq!(store.get_meta("welcomeDismissed").await.unwrap(), Some(serde_json::json!(false)));
    }

    #[tokio::test]
    async fn test_stats_count_collections() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let doc = store.save_process(analysis("p", "T", "I")).await.unwrap();
        store.save_process(doc).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.collections.get(PROCESSES), Some(&1));
        assert_eq!(stats.collections.get(VERSIONS), Some(&2));
        assert_eq!(stats.collections.get(META), Some(&0));
        assert_eq!(store.count_processes().await.unwrap(), 1);
    }
}
