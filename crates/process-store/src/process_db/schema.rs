//! Documents held by the process database and its collection layout
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::store_engine::{CollectionSchema, Upgrade};

pub const PROCESS_DB_VERSION: u32 = 1;

pub const PROCESSES: &str = "processes";
pub const VERSIONS: &str = "versions";
pub const META: &str = "meta";
pub const VERSIONS_BY_PROCESS: &str = "processId";

pub fn collections() -> Vec<CollectionSchema> {
    vec![
        CollectionSchema::new(PROCESSES, "id"),
        CollectionSchema::new(VERSIONS, "id").index(VERSIONS_BY_PROCESS, "processId"),
        CollectionSchema::new(META, "key"),
    ]
}

pub(crate) fn migrate(upgrade: &mut Upgrade<'_>) -> StoreResult<()> {
    for collection in collections() {
        upgrade.create_collection(&collection)?;
    }
    Ok(())
}

/// Key of a version snapshot: `<processId>_v<versionNumber>`.
pub fn version_id(process_id: &str, version_number: u32) -> String {
    format!("{}_v{}", process_id, version_number)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Start,
    Process,
    Decision,
    Handoff,
    Bottleneck,
    End,
}

/// One node of a process flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: StepKind,
    /// Ids of the steps that follow this one.
    #[serde(default)]
    pub next: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Step {
    pub fn new(id: impl Into<String>, label: impl Into<String>, kind: StepKind) -> Self {
        Self { id: id.into(), label: label.into(), kind, next: Vec::new(), description: None }
    }

    pub fn then(mut self, next: impl Into<String>) -> Self {
        self.next.push(next.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bottleneck {
    pub step_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessGraph {
    pub steps: Vec<Step>,
    #[serde(default)]
    pub bottlenecks: Vec<Bottleneck>,
}

impl ProcessGraph {
    pub fn has_kind(&self, kind: StepKind) -> bool {
        self.steps.iter().any(|s| s.kind == kind)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationOption {
    pub name: String,
    pub description: String,
    pub improvement: String,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// One comparison row. Option columns are keyed `option1..optionN`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonMetric {
    pub metric: String,
    #[serde(flatten)]
    pub values: BTreeMap<String, String>,
}

impl ComparisonMetric {
    pub fn new<I, S>(metric: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values = values
            .into_iter()
            .enumerate()
            .map(|(i, v)| (format!("option{}", i + 1), v.into()))
            .collect();
        Self { metric: metric.into(), values }
    }

    /// Value for the 1-based option column.
    pub fn value(&self, option: usize) -> Option<&str> {
        self.values.get(&format!("option{}", option)).map(String::as_str)
    }

    /// Values in option order; `option10` sorts after `option9`.
    pub fn ordered_values(&self) -> Vec<&str> {
        let mut columns: Vec<(usize, &str)> = self
            .values
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix("option")
                    .and_then(|n| n.parse().ok())
                    .map(|n: usize| (n, v.as_str()))
            })
            .collect();
        columns.sort_by_key(|(n, _)| *n);
        columns.into_iter().map(|(_, v)| v).collect()
    }
}

/// The primary document: a business process and its analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub id: String,
    pub title: String,
    pub current_process: String,
    #[serde(default)]
    pub desired_outcome: String,
    #[serde(default)]
    pub industry: String,
    #[serde(default)]
    pub current_state: ProcessGraph,
    #[serde(default)]
    pub options: Vec<OptimizationOption>,
    #[serde(default)]
    pub comparison: Vec<ComparisonMetric>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Analysis {
    /// New, unsaved analysis with a generated id.
    pub fn new(title: impl Into<String>, current_process: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            current_process: current_process.into(),
            desired_outcome: String::new(),
            industry: String::new(),
            current_state: ProcessGraph::default(),
            options: Vec::new(),
            comparison: Vec::new(),
            created_at: None,
            updated_at: None,
        }
    }

    /// Case-insensitive containment over title, description and industry.
    /// `needle` must already be lowercase.
    pub fn matches(&self, needle: &str) -> bool {
        [&self.title, &self.current_process, &self.industry]
            .iter()
            .any(|field| field.to_lowercase().contains(needle))
    }

    /// Shape check for callers; the store persists documents as given.
    pub fn validate(&self) -> StoreResult<()> {
        if self.id.trim().is_empty() {
            return Err(StoreError::ValidationFailed("analysis id is empty".into()));
        }
        let graph = &self.current_state;
        if graph.steps.is_empty() {
            return Err(StoreError::ValidationFailed(format!("analysis {} has no steps", self.id)));
        }
        if !graph.has_kind(StepKind::Start) || !graph.has_kind(StepKind::End) {
            return Err(StoreError::ValidationFailed(format!(
                "analysis {} needs a start and an end step",
                self.id
            )));
        }
        Ok(())
    }
}

/// Immutable copy of an analysis taken at save time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessVersion {
    pub id: String,
    pub process_id: String,
    pub version_number: u32,
    pub snapshot: Analysis,
    pub created_at: DateTime<Utc>,
}

impl ProcessVersion {
    pub fn new(analysis: &Analysis, version_number: u32, created_at: DateTime<Utc>) -> Self {
        Self {
            id: version_id(&analysis.id, version_number),
            process_id: analysis.id.clone(),
            version_number,
            snapshot: analysis.clone(),
            created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaEntry {
    pub key: String,
    pub value: serde_json::Value,
}
