use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use utoipa::ToSchema;
use uuid::Uuid;

/// What a handler reports about one completed request.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub target_url: String,
    pub method: String,
    pub status_code: u16,
    pub duration_ms: u64,
    pub response_size_bytes: usize,
    pub user_agent: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    #[schema(value_type = String)]
    pub id: Uuid,
    #[schema(value_type = String)]
    pub timestamp: DateTime<Utc>,
    pub target_url: String,
    pub method: String,
    pub status_code: u16,
    pub duration_ms: u64,
    pub response_size_bytes: usize,
    pub user_agent: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogSummary {
    pub total_requests: usize,
    pub error_count: usize,
    pub average_duration_ms: f64,
}

/// Append-only request log. Implementations may forget old entries.
pub trait RequestLog: Send + Sync {
    fn record(&self, entry: LogEntry) -> RequestRecord;
    /// Newest first.
    fn list(&self, limit: Option<usize>) -> Vec<RequestRecord>;
    fn clear(&self);
    fn count(&self) -> usize;
    fn summary(&self) -> LogSummary;
}

/// Bounded in-process log; the oldest record is evicted when full.
pub struct InMemoryRequestLog {
    capacity: usize,
    records: Mutex<VecDeque<RequestRecord>>,
}

impl InMemoryRequestLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: Mutex::new(VecDeque::new()),
        }
    }

    fn records(&self) -> std::sync::MutexGuard<'_, VecDeque<RequestRecord>> {
        // A panicked writer cannot leave a half-pushed record behind.
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RequestLog for InMemoryRequestLog {
    fn record(&self, entry: LogEntry) -> RequestRecord {
        let record = RequestRecord {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            target_url: entry.target_url,
            method: entry.method,
            status_code: entry.status_code,
            duration_ms: entry.duration_ms,
            response_size_bytes: entry.response_size_bytes,
            user_agent: entry.user_agent,
            error_message: entry.error_message,
        };

        let mut records = self.records();
        if records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record.clone());
        record
    }

    fn list(&self, limit: Option<usize>) -> Vec<RequestRecord> {
        let records = self.records();
        let limit = limit.unwrap_or(records.len());
        records.iter().rev().take(limit).cloned().collect()
    }

    fn clear(&self) {
        self.records().clear();
    }

    fn count(&self) -> usize {
        self.records().len()
    }

    fn summary(&self) -> LogSummary {
        let records = self.records();
        if records.is_empty() {
            return LogSummary::default();
        }
        let total: u64 = records.iter().map(|r| r.duration_ms).sum();
        LogSummary {
            total_requests: records.len(),
            error_count: records
                .iter()
                .filter(|r| r.error_message.is_some() || r.status_code >= 400)
                .count(),
            average_duration_ms: total as f64 / records.len() as f64,
        }
    }
}

pub trait ConnectionCounter: Send + Sync {
    fn increment(&self);
    fn decrement(&self);
    fn active(&self) -> usize;
}

#[derive(Debug, Default)]
pub struct AtomicConnectionCounter {
    active: AtomicUsize,
}

impl ConnectionCounter for AtomicConnectionCounter {
    fn increment(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    fn decrement(&self) {
        let _ = self
            .active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)));
    }

    fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }
}

/// Holds one active connection for as long as it lives.
pub struct ConnectionGuard {
    counter: Arc<dyn ConnectionCounter>,
}

impl ConnectionGuard {
    pub fn acquire(counter: Arc<dyn ConnectionCounter>) -> Self {
        counter.increment();
        Self { counter }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counter.decrement();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(status: u16, duration_ms: u64, error: Option<&str>) -> LogEntry {
        LogEntry {
            target_url: "https://example.com/".to_string(),
            method: "GET".to_string(),
            status_code: status,
            duration_ms,
            response_size_bytes: 10,
            user_agent: Some("test".to_string()),
            error_message: error.map(str::to_string),
        }
    }

    #[test]
    fn list_is_newest_first_and_limited() {
        let log = InMemoryRequestLog::new(10);
        for ms in [1, 2, 3] {
            log.record(entry(200, ms, None));
        }
        let listed = log.list(Some(2));
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].duration_ms, 3);
        assert_eq!(listed[1].duration_ms, 2);
        assert_eq!(log.count(), 3);
    }

    #[test]
    fn capacity_evicts_oldest() {
        let log = InMemoryRequestLog::new(2);
        for ms in [1, 2, 3] {
            log.record(entry(200, ms, None));
        }
        let durations: Vec<_> = log.list(None).iter().map(|r| r.duration_ms).collect();
        assert_eq!(durations, vec![3, 2]);
    }

    #[test]
    fn summary_and_clear() {
        let log = InMemoryRequestLog::new(10);
        log.record(entry(200, 10, None));
        log.record(entry(502, 30, Some("connection refused")));
        let summary = log.summary();
        assert_eq!(summary.total_requests, 2);
        assert_eq!(summary.error_count, 1);
        assert!((summary.average_duration_ms - 20.0).abs() < f64::EPSILON);

        log.clear();
        assert_eq!(log.count(), 0);
        assert_eq!(log.summary().total_requests, 0);
    }

    #[test]
    fn guard_tracks_active_connections() {
        let counter: Arc<dyn ConnectionCounter> = Arc::new(AtomicConnectionCounter::default());
        {
            let _a = ConnectionGuard::acquire(counter.clone());
            let _b = ConnectionGuard::acquire(counter.clone());
            assert_eq!(counter.active(), 2);
        }
        assert_eq!(counter.active(), 0);
        counter.decrement();
        assert_eq!(counter.active(), 0);
    }
}
