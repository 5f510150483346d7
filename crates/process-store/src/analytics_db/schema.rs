//! Analytics events and the analytics database layout
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::store_engine::{CollectionSchema, Upgrade};

pub const ANALYTICS_DB_VERSION: u32 = 1;

pub const EVENTS: &str = "events";
pub const BY_TYPE: &str = "type";
pub const BY_TIMESTAMP: &str = "timestamp";

pub(crate) fn migrate(upgrade: &mut Upgrade<'_>) -> StoreResult<()> {
    upgrade.create_collection(
        &CollectionSchema::new(EVENTS, "id")
            .index(BY_TYPE, "type")
            .index(BY_TIMESTAMP, "timestamp"),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PageView,
    ProcessCreated,
    TemplateUsed,
    ExportPerformed,
    ChatMessageSent,
    SwimlaneToggle,
}

impl EventType {
    pub const ALL: [EventType; 6] = [
        EventType::PageView,
        EventType::ProcessCreated,
        EventType::TemplateUsed,
        EventType::ExportPerformed,
        EventType::ChatMessageSent,
        EventType::SwimlaneToggle,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PageView => "page_view",
            Self::ProcessCreated => "process_created",
            Self::TemplateUsed => "template_used",
            Self::ExportPerformed => "export_performed",
            Self::ChatMessageSent => "chat_message_sent",
            Self::SwimlaneToggle => "swimlane_toggle",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| StoreError::ValidationFailed(format!("unknown event type '{}'", s)))
    }
}

/// A value in an event's data bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventValue {
    Number(f64),
    Text(String),
}

impl fmt::Display for EventValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for EventValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for EventValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<f64> for EventValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i64> for EventValue {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

pub type EventData = BTreeMap<String, EventValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default)]
    pub data: EventData,
    pub timestamp: DateTime<Utc>,
}

impl AnalyticsEvent {
    pub fn text(&self, key: &str) -> Option<String> {
        self.data.get(key).map(|v| v.to_string())
    }
}
