//! Append-only audit log of process lifecycle actions, in its own database
pub mod report;
pub mod schema;

pub use report::{render_report, EMPTY_AUDIT_LOG};
pub use schema::*;

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{StoreError, StoreResult};
use crate::ids::generate_log_id;
use crate::store_engine::{Database, LazyDatabase};

pub struct AuditLog {
    db: LazyDatabase,
    default_actor: String,
}

impl AuditLog {
    pub fn new(config: &Config) -> Self {
        Self {
            db: LazyDatabase::new(
                config.database_path(&config.audit_db_name),
                config.audit_db_name.clone(),
                AUDIT_DB_VERSION,
                config.engine_options(),
                schema::migrate,
            ),
            default_actor: config.default_actor.clone(),
        }
    }

    pub async fn database(&self) -> StoreResult<Arc<Database>> {
        self.db.get().await.inspect_err(|e| {
            if let StoreError::StorageBlocked(reason) = e {
                warn!("Audit database {} blocked: {}", self.db.name(), reason);
            }
        })
    }

    /// Record one action. `actor` falls back to the configured default.
    pub async fn add_audit_entry(
        &self,
        process_id: &str,
        action: AuditAction,
        description: &str,
        actor: Option<&str>,
    ) -> StoreResult<AuditEntry> {
        let entry = AuditEntry {
            id: generate_log_id(),
            process_id: process_id.to_string(),
            action,
            description: description.to_string(),
            actor: actor
                .filter(|a| !a.trim().is_empty())
                .unwrap_or(self.default_actor.as_str())
                .to_string(),
            timestamp: Utc::now(),
        };
        self.database().await?.put(AUDIT_LOG, &entry).await?;
        debug!("Audit {} on {} by {}", entry.action, process_id, entry.actor);
        Ok(entry)
    }

    /// Entries for one process, most recent first.
    pub async fn get_audit_log(&self, process_id: &str) -> StoreResult<Vec<AuditEntry>> {
        let mut entries: Vec<AuditEntry> = self
            .database()
            .await?
            .get_all_by_index(AUDIT_LOG, BY_PROCESS, process_id)
            .await?;
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
        Ok(entries)
    }

    pub async fn export_audit_log(&self, process_id: &str) -> StoreResult<String> {
        let entries = self.get_audit_log(process_id).await?;
        Ok(render_report(process_id, &entries, Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_ACTOR;
    use tempfile::TempDir;

    fn audit_log(dir: &TempDir) -> AuditLog {
        AuditLog::new(&Config::with_data_dir(dir.path()))
    }

    #[tokio::test]
    async fn test_entries_newest_first_per_process() {
        let dir = TempDir::new().unwrap();
        let log = audit_log(&dir);
        log.add_audit_entry("p1", AuditAction::Created, "Created process", None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        log.add_audit_entry("p1", AuditAction::Edited, "Renamed", Some("Ana")).await.unwrap();
        log.add_audit_entry("p2", AuditAction::Created, "Other", None).await.unwrap();

        let entries = log.get_audit_log("p1").await.unwrap();
        let actions: Vec<AuditAction> = entries.iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![AuditAction::Edited, AuditAction::Created]);
        assert_eq!(entries[0].actor, "Ana");
        assert_eq!(entries[1].actor, DEFAULT_ACTOR);
        assert!(entries.iter().all(|e| e.process_id == "p1"));
    }

    #[tokio::test]
    async fn test_blank_actor_uses_default() {
        let dir = TempDir::new().unwrap();
        let log = audit_log(&dir);
        let entry = log.add_audit_entry("p", AuditAction::Reviewed, "Looked", Some("  ")).await.unwrap();
        assert_eq!(entry.actor, DEFAULT_ACTOR);
    }

    #[tokio::test]
    async fn test_export_renders_report() {
        let dir = TempDir::new().unwrap();
        let log = audit_log(&dir);
        assert_eq!(log.export_audit_log("p").await.unwrap(), EMPTY_AUDIT_LOG);

        log.add_audit_entry("p", AuditAction::Approved, "Signed off", Some("Lee")).await.unwrap();
        let report = log.export_audit_log("p").await.unwrap();
        assert!(report.starts_with("AUDIT LOG REPORT"));
        assert!(report.contains("Approved by Lee"));
        assert!(report.contains("Total Entries: 1"));
    }

    #[tokio::test]
    async fn test_unreachable_storage_surfaces_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let log = AuditLog::new(&Config::with_data_dir(&blocker));

        let err = log.add_audit_entry("p", AuditAction::Created, "x", None).await.unwrap_err();
        assert!(matches!(err, StoreError::StorageUnavailable(_)));
    }
}
