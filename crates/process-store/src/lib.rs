pub mod analytics_db;
pub mod audit_db;
pub mod config;
pub mod error;
pub mod ids;
pub mod process_db;
pub mod store_engine;
pub mod telemetry;
pub mod workspace;

// Public API exports
pub use config::Config;
pub use error::{StoreError, StoreResult};
pub use workspace::Workspace;

pub use analytics_db::{AnalyticsEvent, AnalyticsStats, AnalyticsTracker, EventData, EventType, EventValue};
pub use audit_db::{AuditAction, AuditEntry, AuditLog};
pub use process_db::{
    version_id, Analysis, Bottleneck, ComparisonMetric, OptimizationOption, ProcessGraph, ProcessStore,
    ProcessVersion, Step, StepKind,
};
pub use store_engine::{CollectionSchema, Database, DatabaseStats, EngineOptions, IndexSchema, LazyDatabase};
