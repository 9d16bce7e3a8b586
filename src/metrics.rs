//! Rate-limit observations with bounded in-memory retention.
//!
//! The engine records one event per 429 response. A single lock guards the
//! ring buffer, so queries observe a linearizable history: any snapshot that
//! contains an event also contains every event recorded before it.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::errors::{Error, Result};

/// One observed 429, with the service's hints at the time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub endpoint: String,
    pub status: u16,
    pub retry_after: Option<u64>,
    pub request_count: u64,
    pub remaining_requests: Option<u64>,
    pub method: String,
}

impl RateLimitEvent {
    pub fn new(endpoint: impl Into<String>, status: u16, method: impl Into<String>) -> Self {
        Self {
            timestamp: OffsetDateTime::now_utc(),
            endpoint: endpoint.into(),
            status,
            retry_after: None,
            request_count: 1,
            remaining_requests: None,
            method: method.into(),
        }
    }

    pub fn with_retry_after(mut self, retry_after: Option<u64>) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn with_remaining_requests(mut self, remaining: Option<u64>) -> Self {
        self.remaining_requests = remaining;
        self
    }
}

/// Aggregate view over the retained events.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitSummary {
    pub total_events: usize,
    pub events_by_endpoint: BTreeMap<String, u64>,
    pub events_by_status: BTreeMap<u16, u64>,
    pub avg_retry_after: Option<f64>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub first_event_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_event_at: Option<OffsetDateTime>,
    pub unique_endpoints: usize,
}

/// Per-endpoint aggregate, mirroring the fields of [`RateLimitSummary`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointSummary {
    pub endpoint: String,
    pub total_events: usize,
    pub total_requests: u64,
    pub avg_retry_after: Option<f64>,
    pub methods: Vec<String>,
}

struct Buffer {
    events: VecDeque<RateLimitEvent>,
    retention: usize,
}

/// Thread-safe recorder owned by one engine instance.
pub struct RateLimitMetrics {
    buffer: Mutex<Buffer>,
}

impl RateLimitMetrics {
    pub fn new(retention: usize) -> Self {
        Self {
            buffer: Mutex::new(Buffer {
                events: VecDeque::new(),
                retention: retention.max(1),
            }),
        }
    }

    /// Append an event, evicting the oldest once the retention bound is hit.
    pub fn record(&self, event: RateLimitEvent) {
        let mut buffer = self.lock();
        if buffer.events.len() == buffer.retention {
            buffer.events.pop_front();
        }
        buffer.events.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().events.is_empty()
    }

    pub fn summary(&self) -> RateLimitSummary {
        let buffer = self.lock();
        let mut events_by_endpoint = BTreeMap::new();
        let mut events_by_status = BTreeMap::new();
        let mut retry_after_sum = 0u64;
        let mut retry_after_count = 0u64;

        for event in &buffer.events {
            *events_by_endpoint
                .entry(event.endpoint.clone())
                .or_insert(0u64) += 1;
            *events_by_status.entry(event.status).or_insert(0u64) += 1;
            if let Some(retry_after) = event.retry_after {
                retry_after_sum += retry_after;
                retry_after_count += 1;
            }
        }

        RateLimitSummary {
            total_events: buffer.events.len(),
            unique_endpoints: events_by_endpoint.len(),
            events_by_endpoint,
            events_by_status,
            avg_retry_after: (retry_after_count > 0)
                .then(|| retry_after_sum as f64 / retry_after_count as f64),
            first_event_at: buffer.events.front().map(|e| e.timestamp),
            last_event_at: buffer.events.back().map(|e| e.timestamp),
        }
    }

    /// Events in insertion order, optionally filtered by endpoint and an
    /// inclusive time window.
    pub fn events_for(
        &self,
        endpoint: Option<&str>,
        since: Option<OffsetDateTime>,
        until: Option<OffsetDateTime>,
    ) -> Vec<RateLimitEvent> {
        self.lock()
            .events
            .iter()
            .filter(|event| endpoint.map_or(true, |e| event.endpoint == e))
            .filter(|event| since.map_or(true, |t| event.timestamp >= t))
            .filter(|event| until.map_or(true, |t| event.timestamp <= t))
            .cloned()
            .collect()
    }

    /// Total request counts per endpoint.
    pub fn usage_stats(&self) -> BTreeMap<String, u64> {
        let mut stats = BTreeMap::new();
        for event in self.lock().events.iter() {
            *stats.entry(event.endpoint.clone()).or_insert(0u64) += event.request_count;
        }
        stats
    }

    pub fn endpoint_summary(&self, endpoint: &str) -> Option<EndpointSummary> {
        let events = self.events_for(Some(endpoint), None, None);
        if events.is_empty() {
            return None;
        }
        let retry_after: Vec<u64> = events.iter().filter_map(|e| e.retry_after).collect();
        let mut methods: Vec<String> = events.iter().map(|e| e.method.clone()).collect();
        methods.sort();
        methods.dedup();
        Some(EndpointSummary {
            endpoint: endpoint.to_string(),
            total_events: events.len(),
            total_requests: events.iter().map(|e| e.request_count).sum(),
            avg_retry_after: (!retry_after.is_empty())
                .then(|| retry_after.iter().sum::<u64>() as f64 / retry_after.len() as f64),
            methods,
        })
    }

    pub fn export_json(&self) -> Result<String> {
        let events = self.events_for(None, None, None);
        serde_json::to_string_pretty(&events)
            .map_err(|e| Error::decode("failed to serialize rate-limit events", "", Some(e)))
    }

    /// CSV with a header row, one row per event, in insertion order.
    pub fn export_csv(&self) -> String {
        let mut out = String::from(
            "timestamp,endpoint,status,retry_after,request_count,remaining_requests,method\n",
        );
        for event in self.lock().events.iter() {
            let timestamp = event
                .timestamp
                .format(&Rfc3339)
                .unwrap_or_else(|_| event.timestamp.to_string());
            let retry_after = event
                .retry_after
                .map(|v| v.to_string())
                .unwrap_or_default();
            let remaining = event
                .remaining_requests
                .map(|v| v.to_string())
                .unwrap_or_default();
            out.push_str(&format!(
                "{timestamp},{},{},{retry_after},{},{remaining},{}\n",
                event.endpoint, event.status, event.request_count, event.method
            ));
        }
        out
    }

    /// Drop every retained event.
    pub fn reset(&self) {
        self.lock().events.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Buffer> {
        // A poisoned lock only means a panic elsewhere mid-record; the buffer
        // itself is still structurally valid.
        self.buffer.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(endpoint: &str, retry_after: Option<u64>) -> RateLimitEvent {
        RateLimitEvent::new(endpoint, 429, "GET").with_retry_after(retry_after)
    }

    #[test]
    fn retention_evicts_oldest_first() {
        let metrics = RateLimitMetrics::new(3);
        for i in 0..5u64 {
            metrics.record(event(&format!("endpoint-{i}"), None));
        }
        let events = metrics.events_for(None, None, None);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].endpoint, "endpoint-2");
        assert_eq!(events[2].endpoint, "endpoint-4");
        assert_eq!(metrics.summary().total_events, 3);
    }

    #[test]
    fn summary_aggregates_by_endpoint_and_status() {
        let metrics = RateLimitMetrics::new(100);
        metrics.record(event("a", Some(1)));
        metrics.record(event("a", Some(3)));
        metrics.record(event("b", Some(5)));

        let summary = metrics.summary();
        assert_eq!(summary.total_events, 3);
        assert_eq!(summary.events_by_endpoint["a"], 2);
        assert_eq!(summary.events_by_endpoint["b"], 1);
        assert_eq!(summary.events_by_status[&429], 3);
        assert_eq!(summary.avg_retry_after, Some(3.0));
        assert_eq!(summary.unique_endpoints, 2);
        assert!(summary.first_event_at.is_some());
        assert!(summary.first_event_at <= summary.last_event_at);
    }

    #[test]
    fn empty_recorder_summarizes_to_zeroes() {
        let metrics = RateLimitMetrics::new(10);
        let summary = metrics.summary();
        assert_eq!(summary.total_events, 0);
        assert_eq!(summary.avg_retry_after, None);
        assert_eq!(summary.first_event_at, None);
    }

    #[test]
    fn events_for_filters_by_endpoint_and_window() {
        let metrics = RateLimitMetrics::new(10);
        metrics.record(event("a", None));
        metrics.record(event("b", None));
        metrics.record(event("a", None));

        let only_a = metrics.events_for(Some("a"), None, None);
        assert_eq!(only_a.len(), 2);
        assert!(only_a.iter().all(|e| e.endpoint == "a"));

        let recorded = metrics.events_for(None, None, None);
        let cutoff = recorded[1].timestamp;
        let tail = metrics.events_for(None, Some(cutoff), None);
        assert!(tail.len() >= 2);
        let head = metrics.events_for(None, None, Some(cutoff));
        assert!(head.iter().any(|e| e.endpoint == "b"));
    }

    #[test]
    fn csv_export_has_header_plus_row_per_event() {
        let metrics = RateLimitMetrics::new(10);
        metrics.record(event("a", Some(1)));
        metrics.record(event("a", Some(3)));
        metrics.record(event("b", Some(5)));

        let csv = metrics.export_csv();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("timestamp,endpoint,status"));
        assert!(lines[1].contains(",a,429,1,"));
        assert!(lines[3].contains(",b,429,5,"));
    }

    #[test]
    fn json_export_round_trips() {
        let metrics = RateLimitMetrics::new(10);
        metrics.record(event("a", Some(2)).with_remaining_requests(Some(9)));
        let json = metrics.export_json().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0]["endpoint"], "a");
        assert_eq!(parsed[0]["retry_after"], 2);
        assert_eq!(parsed[0]["remaining_requests"], 9);
    }

    #[test]
    fn usage_and_endpoint_summaries() {
        let metrics = RateLimitMetrics::new(10);
        metrics.record(event("a", Some(2)));
        metrics.record(event("a", None));
        metrics.record(event("b", None));

        assert_eq!(metrics.usage_stats()["a"], 2);
        let summary = metrics.endpoint_summary("a").unwrap();
        assert_eq!(summary.total_events, 2);
        assert_eq!(summary.avg_retry_after, Some(2.0));
        assert_eq!(summary.methods, vec!["GET".to_string()]);
        assert!(metrics.endpoint_summary("missing").is_none());
    }

    #[test]
    fn reset_empties_the_buffer() {
        let metrics = RateLimitMetrics::new(10);
        metrics.record(event("a", None));
        metrics.reset();
        assert!(metrics.is_empty());
        assert_eq!(metrics.export_csv().lines().count(), 1);
    }

    #[test]
    fn concurrent_recording_keeps_every_event() {
        use std::sync::Arc;
        let metrics = Arc::new(RateLimitMetrics::new(1000));
        let mut handles = Vec::new();
        for t in 0..4 {
            let metrics = Arc::clone(&metrics);
            handles.push(std::thread::spawn(move || {
                for _ in 0..50 {
                    metrics.record(event(&format!("worker-{t}"), None));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(metrics.len(), 200);
        assert_eq!(metrics.summary().unique_endpoints, 4);
    }
}
