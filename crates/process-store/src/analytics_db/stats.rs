//! Aggregate view over the analytics event log

use std::collections::BTreeMap;

use serde::Serialize;

use super::schema::{AnalyticsEvent, EventType};

pub const TEMPLATE_KEY: &str = "templateName";
pub const INDUSTRY_KEY: &str = "industry";
pub const FORMAT_KEY: &str = "format";
pub const UNKNOWN_BUCKET: &str = "unknown";

/// Counts derived from the whole event log in one pass
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsStats {
    pub total_events: usize,
    /// Every known type, zero when never seen
    pub events_by_type: BTreeMap<EventType, usize>,
    pub template_usage: BTreeMap<String, usize>,
    pub industry_usage: BTreeMap<String, usize>,
    pub export_formats: BTreeMap<String, usize>,
    /// Keyed by calendar date (`YYYY-MM-DD`, UTC)
    pub daily_activity: BTreeMap<String, usize>,
}

impl Default for AnalyticsStats {
    fn default() -> Self {
        Self {
            total_events: 0,
            events_by_type: EventType::ALL.into_iter().map(|t| (t, 0)).collect(),
            template_usage: BTreeMap::new(),
            industry_usage: BTreeMap::new(),
            export_formats: BTreeMap::new(),
            daily_activity: BTreeMap::new(),
        }
    }
}

impl AnalyticsStats {
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a AnalyticsEvent>) -> Self {
        events.into_iter().fold(Self::default(), |mut stats, event| {
            stats.record(event);
            stats
        })
    }

    /// Fold one event into the counters.
    pub fn record(&mut self, event: &AnalyticsEvent) {
        self.total_events += 1;
        *self.events_by_type.entry(event.event_type).or_insert(0) += 1;

        let bucket = match event.event_type {
            EventType::TemplateUsed => Some((&mut self.template_usage, TEMPLATE_KEY)),
            EventType::ProcessCreated => Some((&mut self.industry_usage, INDUSTRY_KEY)),
            EventType::ExportPerformed => Some((&mut self.export_formats, FORMAT_KEY)),
            _ => None,
        };
        if let Some((histogram, key)) = bucket {
            let label = event
                .text(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN_BUCKET.to_string());
            *histogram.entry(label).or_insert(0) += 1;
        }

        let day = event.timestamp.date_naive().format("%Y-%m-%d").to_string();
        *self.daily_activity.entry(day).or_insert(0) += 1;
    }

    pub fn count(&self, event_type: EventType) -> usize {
        self.events_by_type.get(&event_type).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics_db::schema::{EventData, EventValue};
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn event(id: usize, event_type: EventType, key: Option<(&str, &str)>, day: u32) -> AnalyticsEvent {
        let mut data = EventData::new();
        if let Some((k, v)) = key {
            data.insert(k.to_string(), EventValue::from(v));
        }
        AnalyticsEvent {
            id: format!("{}-x", id),
            event_type,
            data,
            timestamp: Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_empty_stats_list_every_type() {
        let stats = AnalyticsStats::default();
        assert_eq!(stats.events_by_type.len(), EventType::ALL.len());
        assert!(stats.events_by_type.values().all(|c| *c == 0));
    }

    #[test]
    fn test_histograms() {
        let events = vec![
            event(1, EventType::TemplateUsed, Some((TEMPLATE_KEY, "Invoice Approval")), 1),
            event(2, EventType::TemplateUsed, Some((TEMPLATE_KEY, "Invoice Approval")), 1),
            event(3, EventType::ProcessCreated, Some((INDUSTRY_KEY, "Banking")), 2),
            event(4, EventType::ProcessCreated, None, 2),
            event(5, EventType::ExportPerformed, Some((FORMAT_KEY, "pdf")), 3),
            event(6, EventType::PageView, None, 3),
        ];
        let stats = AnalyticsStats::from_events(&events);

        assert_eq!(stats.total_events, 6);
        assert_eq!(stats.count(EventType::TemplateUsed), 2);
        assert_eq!(stats.count(EventType::SwimlaneToggle), 0);
        assert_eq!(stats.template_usage.get("Invoice Approval"), Some(&2));
        assert_eq!(stats.industry_usage.get("Banking"), Some(&1));
        assert_eq!(stats.industry_usage.get(UNKNOWN_BUCKET), Some(&1));
        assert_eq!(stats.export_formats.get("pdf"), Some(&1));
        assert_eq!(stats.daily_activity.get("2024-03-01"), Some(&2));
        assert_eq!(stats.daily_activity.get("2024-03-03"), Some(&2));
    }

    fn arb_event() -> impl Strategy<Value = AnalyticsEvent> {
        (0usize..1000, 0usize..6, 0usize..3, 1u32..28).prop_map(|(id, t, label, day)| {
            let event_type = EventType::ALL[t];
            let labels = ["alpha", "beta", "gamma"];
            let key = match event_type {
                EventType::TemplateUsed => Some((TEMPLATE_KEY, labels[label])),
                EventType::ProcessCreated => Some((INDUSTRY_KEY, labels[label])),
                EventType::ExportPerformed => Some((FORMAT_KEY, labels[label])),
                _ => None,
            };
            event(id, event_type, key, day)
        })
    }

    proptest! {
        #[test]
        fn prop_stats_ignore_event_order(
            (events, shuffled) in prop::collection::vec(arb_event(), 0..50)
                .prop_flat_map(|events| (Just(events.clone()), Just(events).prop_shuffle()))
        ) {
            let a = AnalyticsStats::from_events(&events);
            let b = AnalyticsStats::from_events(&shuffled);
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(a.total_events, events.len());
            prop_assert_eq!(a.daily_activity.values().sum::<usize>(), events.len());
        }
    }
}
