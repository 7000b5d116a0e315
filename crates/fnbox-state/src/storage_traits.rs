//! Storage trait definitions for fnbox
//!
//! - `MetricsStore`: append-only log of one record per finished invocation
//! - `PoolStore`: process-lifetime registry of pre-built warm pool images
//!
//! Both traits are async and backend-agnostic. In-memory fakes live in the
//! `fakes` module; the file-backed metrics log lives in `json_store`.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// MetricsRecord
// ---------------------------------------------------------------------------

/// One immutable entry in the metrics log.
///
/// `backend` also reads the legacy `runtime` key so logs written by older
/// deployments stay queryable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    /// Unix epoch seconds (fractional) at which the record was created.
    pub timestamp: f64,
    /// Isolation backend the invocation ran under (`standard`, `sandboxed`).
    #[serde(alias = "runtime")]
    pub backend: String,
    /// Wall-clock duration in seconds, rounded to 4 decimal places.
    pub duration: f64,
    /// Whether the invocation succeeded.
    pub success: bool,
}

impl MetricsRecord {
    /// Build a record stamped with the current time.
    pub fn now(backend: impl Into<String>, duration_secs: f64, success: bool) -> Self {
        let now = Utc::now();
        Self {
            timestamp: now.timestamp_micros() as f64 / 1_000_000.0,
            backend: backend.into(),
            duration: round_duration(duration_secs),
            success,
        }
    }
}

/// Round a duration in seconds to 4 decimal places.
pub fn round_duration(secs: f64) -> f64 {
    (secs * 10_000.0).round() / 10_000.0
}

/// Map legacy backend names (`docker`, `gvisor`) onto their current names.
pub fn canonical_backend(name: &str) -> &str {
    match name {
        "docker" => "standard",
        "gvisor" => "sandboxed",
        other => other,
    }
}

/// Optional predicates applied when reading the metrics log.
///
/// Unset fields match everything; timestamp bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsFilter {
    pub backend: Option<String>,
    pub success: Option<bool>,
    pub from_ts: Option<f64>,
    pub to_ts: Option<f64>,
}

impl MetricsFilter {
    pub fn matches(&self, record: &MetricsRecord) -> bool {
        if let Some(backend) = &self.backend {
            if canonical_backend(&record.backend) != canonical_backend(backend) {
                return false;
            }
        }
        if let Some(success) = self.success {
            if record.success != success {
                return false;
            }
        }
        if let Some(from) = self.from_ts {
            if record.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to_ts {
            if record.timestamp > to {
                return false;
            }
        }
        true
    }
}

/// Append-only metrics log.
///
/// Guarantees:
/// - `append` never rewrites or drops previously stored records.
/// - Concurrent `append` calls on one store are all persisted.
/// - `list` on a store that has never been written returns an empty set.
#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Persist one record at the end of the log.
    async fn append(&self, record: MetricsRecord) -> StorageResult<()>;

    /// Return every record matching `filter`, oldest first.
    async fn list(&self, filter: &MetricsFilter) -> StorageResult<Vec<MetricsRecord>>;
}

// ---------------------------------------------------------------------------
// PoolStore
// ---------------------------------------------------------------------------

/// Registry of warm pool image tags that are ready on the engine.
///
/// Entries live for the process lifetime; nothing in fnbox removes them.
#[async_trait]
pub trait PoolStore: Send + Sync {
    /// Record that `tag` was built successfully. Re-registering is a no-op.
    async fn register(&self, tag: &str) -> StorageResult<()>;

    /// Registered tags in registration order.
    async fn tags(&self) -> StorageResult<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(backend: &str, ts: f64, success: bool) -> MetricsRecord {
        MetricsRecord {
            timestamp: ts,
            backend: backend.into(),
            duration: 0.5,
            success,
        }
    }

    #[test]
    fn test_round_duration_four_places() {
        assert_eq!(round_duration(1.234_567), 1.2346);
        assert_eq!(round_duration(0.000_04), 0.0);
        assert_eq!(round_duration(2.0), 2.0);
    }

    #[test]
    fn test_now_rounds_duration() {
        let r = MetricsRecord::now("standard", 0.123_456_7, true);
        assert_eq!(r.duration, 0.1235);
        assert_eq!(r.backend, "standard");
        assert!(r.timestamp > 1_600_000_000.0);
    }

    #[test]
    fn test_empty_filter_matches_all() {
        let f = MetricsFilter::default();
        assert!(f.matches(&record("standard", 10.0, true)));
        assert!(f.matches(&record("sandboxed", 20.0, false)));
    }

    #[test]
    fn test_filter_by_backend_and_success() {
        let f = MetricsFilter {
            backend: Some("sandboxed".into()),
            success: Some(false),
            ..Default::default()
        };
        assert!(f.matches(&record("sandboxed", 1.0, false)));
        assert!(!f.matches(&record("sandboxed", 1.0, true)));
        assert!(!f.matches(&record("standard", 1.0, false)));
    }

    #[test]
    fn test_filter_treats_legacy_backend_names_as_current() {
        let f = MetricsFilter {
            backend: Some("sandboxed".into()),
            ..Default::default()
        };
        assert!(f.matches(&record("gvisor", 1.0, true)));
        assert!(!f.matches(&record("docker", 1.0, true)));
    }

    #[test]
    fn test_timestamp_bounds_are_inclusive() {
        let f = MetricsFilter {
            from_ts: Some(10.0),
            to_ts: Some(20.0),
            ..Default::default()
        };
        assert!(f.matches(&record("standard", 10.0, true)));
        assert!(f.matches(&record("standard", 20.0, true)));
        assert!(!f.matches(&record("standard", 9.99, true)));
        assert!(!f.matches(&record("standard", 20.01, true)));
    }

    #[test]
    fn test_legacy_runtime_key_is_read() {
        let json = r#"{"timestamp": 1700000000.5, "runtime": "docker", "duration": 1.2, "success": true}"#;
        let r: MetricsRecord = serde_json::from_str(json).unwrap();
        assert_eq!(r.backend, "docker");
        let back = serde_json::to_value(&r).unwrap();
        assert_eq!(back["backend"], "docker");
        assert!(back.get("runtime").is_none());
    }
}
