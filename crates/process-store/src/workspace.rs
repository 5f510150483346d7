//! Lifecycle glue over the three independent databases.
//!
//! The process save is the only step whose failure reaches the caller.
//! Audit and analytics writes that follow it are separate, non-atomic
//! steps: a failure there is logged and the save still stands.

use tracing::{info, warn};

use crate::analytics_db::{AnalyticsTracker, EventData, EventType, EventValue};
use crate::audit_db::{AuditAction, AuditLog};
use crate::config::Config;
use crate::error::StoreResult;
use crate::process_db::{Analysis, ProcessStore};

pub struct Workspace {
    pub processes: ProcessStore,
    pub audit: AuditLog,
    pub analytics: AnalyticsTracker,
}

impl Workspace {
    /// Handles are created lazily; nothing is opened until first use.
    pub fn open(config: &Config) -> Self {
        Self {
            processes: ProcessStore::new(config),
            audit: AuditLog::new(config),
            analytics: AnalyticsTracker::new(config),
        }
    }

    /// Save, then audit the save as `created` or `edited`, then (on
    /// creation) track `process_created`.
    pub async fn save_analysis(&self, analysis: Analysis, actor: Option<&str>) -> StoreResult<Analysis> {
        let is_new = self.processes.get_process(&analysis.id).await?.is_none();
        let saved = self.processes.save_process(analysis).await?;

        let (action, description) = if is_new {
            (AuditAction::Created, format!("Created process \"{}\"", saved.title))
        } else {
            (AuditAction::Edited, format!("Updated process \"{}\"", saved.title))
        };
        if let Err(e) = self.audit.add_audit_entry(&saved.id, action, &description, actor).await {
            warn!("Saved process {} but could not audit it: {}", saved.id, e);
        }

        if is_new {
            let mut data = EventData::new();
            data.insert("industry".into(), EventValue::from(saved.industry.as_str()));
            data.insert("processId".into(), EventValue::from(saved.id.as_str()));
            self.analytics.track_event(EventType::ProcessCreated, data).await;
        }

        Ok(saved)
    }

    pub async fn record_export(&self, process_id: &str, format: &str) {
        let mut data = EventData::new();
        data.insert("format".into(), EventValue::from(format));
        data.insert("processId".into(), EventValue::from(process_id));
        self.analytics.track_event(EventType::ExportPerformed, data).await;
    }

    /// Removes the current document; history and audit entries remain.
    pub async fn delete_analysis(&self, process_id: &str) -> StoreResult<bool> {
        let deleted = self.processes.delete_process(process_id).await?;
        if deleted {
            info!("Process {} deleted; version history and audit log retained", process_id);
        }
        Ok(deleted)
    }
}
