//! Best-effort analytics event log and its aggregation.
//!
//! Nothing here returns an error to the caller: storage failures are logged
//! and the call degrades to a no-op or an empty result, so telemetry can
//! never break the primary flow.
pub mod schema;
pub mod stats;

pub use schema::*;
pub use stats::AnalyticsStats;

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::StoreResult;
use crate::ids::generate_log_id;
use crate::store_engine::{Database, LazyDatabase};

pub struct AnalyticsTracker {
    db: LazyDatabase,
}

impl AnalyticsTracker {
    pub fn new(config: &Config) -> Self {
        Self {
            db: LazyDatabase::new(
                config.database_path(&config.analytics_db_name),
                config.analytics_db_name.clone(),
                ANALYTICS_DB_VERSION,
                config.engine_options(),
                schema::migrate,
            ),
        }
    }

    pub async fn database(&self) -> StoreResult<Arc<Database>> {
        self.db.get().await
    }

    pub async fn track_event(&self, event_type: EventType, data: EventData) {
        let event = AnalyticsEvent {
            id: generate_log_id(),
            event_type,
            data,
            timestamp: Utc::now(),
        };
        match self.store_event(&event).await {
            Ok(()) => debug!("Tracked {} ({})", event.event_type, event.id),
            Err(e) => warn!("Failed to track {} event: {}", event.event_type, e),
        }
    }

    /// All events, or only those of `event_type`, in insertion order.
    pub async fn get_events(&self, event_type: Option<EventType>) -> Vec<AnalyticsEvent> {
        match self.load_events(event_type).await {
            Ok(events) => events,
            Err(e) => {
                warn!("Failed to read analytics events: {}", e);
                Vec::new()
            }
        }
    }

    /// One streaming pass over the log.
    pub async fn get_analytics_stats(&self) -> AnalyticsStats {
        let result = async {
            self.database()
                .await?
                .fold(EVENTS, AnalyticsStats::default(), |mut stats, raw: Value| {
                    if let Some(event) = decode_event(raw) {
                        stats.record(&event);
                    }
                    stats
                })
                .await
        }
        .await;
        result.unwrap_or_else(|e| {
            warn!("Failed to aggregate analytics events: {}", e);
            AnalyticsStats::default()
        })
    }

    pub async fn clear_events(&self) {
        let result = async { self.database().await?.clear(EVENTS).await }.await;
        if let Err(e) = result {
            warn!("Failed to clear analytics events: {}", e);
        }
    }

    async fn store_event(&self, event: &AnalyticsEvent) -> StoreResult<()> {
        self.database().await?.put(EVENTS, event).await?;
        Ok(())
    }

    async fn load_events(&self, event_type: Option<EventType>) -> StoreResult<Vec<AnalyticsEvent>> {
        let db = self.database().await?;
        let raw: Vec<Value> = match event_type {
            Some(t) => db.get_all_by_index(EVENTS, BY_TYPE, &t).await?,
            None => db.get_all(EVENTS).await?,
        };
        Ok(raw.into_iter().filter_map(decode_event).collect())
    }
}

/// Rows written by other clients may carry event types this build does not
/// know. Those rows are skipped, never fatal to the whole read.
fn decode_event(raw: Value) -> Option<AnalyticsEvent> {
    match serde_json::from_value::<AnalyticsEvent>(raw) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!("Skipping undecodable analytics event: {}", e);
            None
        }
    }
}
