//! Audit entries and the audit database layout
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::store_engine::{CollectionSchema, Upgrade};

pub const AUDIT_DB_VERSION: u32 = 1;

pub const AUDIT_LOG: &str = "audit_log";
pub const BY_PROCESS: &str = "processId";
pub const BY_TIMESTAMP: &str = "timestamp";

pub(crate) fn migrate(upgrade: &mut Upgrade<'_>) -> StoreResult<()> {
    upgrade.create_collection(
        &CollectionSchema::new(AUDIT_LOG, "id")
            .index(BY_PROCESS, "processId")
            .index(BY_TIMESTAMP, "timestamp"),
    )
}

/// Lifecycle actions that can be recorded against a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Edited,
    Reviewed,
    Approved,
    Rejected,
    SubmittedForReview,
    RequestedChanges,
    StatusChanged,
}

impl AuditAction {
    pub const ALL: [AuditAction; 8] = [
        AuditAction::Created,
        AuditAction::Edited,
        AuditAction::Reviewed,
        AuditAction::Approved,
        AuditAction::Rejected,
        AuditAction::SubmittedForReview,
        AuditAction::RequestedChanges,
        AuditAction::StatusChanged,
    ];

    /// Stored form, e.g. `submitted_for_review`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Edited => "edited",
            Self::Reviewed => "reviewed",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::SubmittedForReview => "submitted_for_review",
            Self::RequestedChanges => "requested_changes",
            Self::StatusChanged => "status_changed",
        }
    }

    /// Human label used in reports.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Edited => "Edited",
            Self::Reviewed => "Reviewed",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
            Self::SubmittedForReview => "Submitted for Review",
            Self::RequestedChanges => "Requested Changes",
            Self::StatusChanged => "Status Changed",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| StoreError::ValidationFailed(format!("unknown audit action '{}'", s)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: String,
    /// Weak reference; entries outlive the process they describe.
    pub process_id: String,
    pub action: AuditAction,
    pub description: String,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_parse_matches_serde() {
        for action in AuditAction::ALL {
            let json = serde_json::to_value(action).unwrap();
            assert_eq!(json, action.as_str());
            assert_eq!(action.as_str().parse::<AuditAction>().unwrap(), action);
        }
        assert!("deleted".parse::<AuditAction>().is_err());
    }
}
