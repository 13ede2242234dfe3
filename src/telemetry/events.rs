//! Audit event types for structured logging.
//!
//! These events are logged to syslog with the `FRESHGATE` tag.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Audit events for security logging.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Supervised run started.
    RunStart {
        /// Username of the operator.
        user: String,
        /// Package manager being run.
        tool: String,
        /// Process ID of the supervisor.
        pid: u32,
        /// Unique run identifier.
        run_id: String,
    },

    /// Supervised run finished.
    RunEnd {
        /// Package manager that was run.
        tool: String,
        /// Exit code reported by the supervisor.
        exit_code: i32,
        /// Duration of the run in seconds.
        duration_sec: u64,
    },

    /// A tarball fetch passed the freshness check.
    PackageAllow {
        /// Package name.
        package: String,
        /// Package version.
        version: String,
        /// Whole days since publication.
        age_days: i64,
    },

    /// A tarball fetch was rejected as too new.
    PackageBlock {
        /// Package name.
        package: String,
        /// Package version.
        version: String,
        /// Threshold in force.
        min_age_days: u32,
        /// Human-readable block reason.
        reason: String,
    },

    /// Publish metadata could not be obtained.
    LookupFailed {
        /// Package whose metadata was requested.
        package: String,
        /// What went wrong.
        reason: String,
        /// What the gateway did about it.
        action: LookupAction,
    },

    /// The gateway process died during a run.
    GatewayCrash {
        /// Gateway process ID.
        pid: u32,
    },
}

/// What the gateway did after a failed metadata lookup.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupAction {
    /// The fetch was rejected and the run aborted.
    Block,
    /// The fetch was forwarded anyway.
    Allow,
}

/// Wrapper for serializing events with timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct TimestampedEvent<'a> {
    /// ISO8601 timestamp.
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,

    /// The actual event (flattened into this struct).
    #[serde(flatten)]
    pub event: &'a AuditEvent,
}

impl AuditEvent {
    /// Wrap this event with a timestamp for serialization.
    pub fn with_timestamp(&self) -> TimestampedEvent<'_> {
        TimestampedEvent {
            timestamp: Utc::now(),
            event: self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_start_serialization() {
        let event = AuditEvent::RunStart {
            user: "developer".to_string(),
            tool: "npm".to_string(),
            pid: 12345,
            run_id: "abc".to_string(),
        };

        let timestamped = event.with_timestamp();
        let json = serde_json::to_string(&timestamped).unwrap();

        assert!(json.contains("\"event\":\"run_start\""));
        assert!(json.contains("\"user\":\"developer\""));
        assert!(json.contains("\"tool\":\"npm\""));
        assert!(json.contains("\"pid\":12345"));
        assert!(json.contains("\"run_id\":\"abc\""));
        assert!(json.contains("\"ts\""));
    }

    #[test]
    fn test_package_block_serialization() {
        let event = AuditEvent::PackageBlock {
            package: "@scope/pkg".to_string(),
            version: "1.0.0".to_string(),
            min_age_days: 14,
            reason: "too new".to_string(),
        };

        let json = serde_json::to_string(&event.with_timestamp()).unwrap();

        assert!(json.contains("\"event\":\"package_block\""));
        assert!(json.contains("\"package\":\"@scope/pkg\""));
        assert!(json.contains("\"min_age_days\":14"));
    }

    #[test]
    fn test_package_allow_serialization() {
        let event = AuditEvent::PackageAllow {
            package: "left-pad".to_string(),
            version: "1.3.0".to_string(),
            age_days: 25,
        };

        let json = serde_json::to_string(&event.with_timestamp()).unwrap();

        assert!(json.contains("\"event\":\"package_allow\""));
        assert!(json.contains("\"age_days\":25"));
    }

    #[test]
    fn test_lookup_failed_serialization() {
        let event = AuditEvent::LookupFailed {
            package: "left-pad".to_string(),
            reason: "HTTP 503".to_string(),
            action: LookupAction::Block,
        };

        let json = serde_json::to_string(&event.with_timestamp()).unwrap();

        assert!(json.contains("\"event\":\"lookup_failed\""));
        assert!(json.contains("\"action\":\"block\""));
    }

    #[test]
    fn test_run_end_serialization() {
        let event = AuditEvent::RunEnd {
            tool: "yarn".to_string(),
            exit_code: 1,
            duration_sec: 179,
        };

        let json = serde_json::to_string(&event.with_timestamp()).unwrap();

        assert!(json.contains("\"event\":\"run_end\""));
        assert!(json.contains("\"exit_code\":1"));
        assert!(json.contains("\"duration_sec\":179"));
    }

    #[test]
    fn test_gateway_crash_serialization() {
        let event = AuditEvent::GatewayCrash { pid: 4242 };
        let json = serde_json::to_string(&event.with_timestamp()).unwrap();

        assert!(json.contains("\"event\":\"gateway_crash\""));
        assert!(json.contains("\"pid\":4242"));
    }
}
