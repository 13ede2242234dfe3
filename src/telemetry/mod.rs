//! Audit logging for freshgate.
//!
//! Structured JSON events go to syslog with the `FRESHGATE` tag. This is
//! separate from the `tracing` diagnostics on stderr: audit events record
//! what the policy decided, diagnostics record how the program got there.
//! Neither ever writes to stdout, which belongs to the wrapped tool.
//!
//! ```ignore
//! use freshgate::telemetry::{self, AuditEvent};
//!
//! telemetry::init_logger();
//! telemetry::audit().log(AuditEvent::GatewayCrash { pid: 4242 });
//! ```
//!
//! Events carry an ISO8601 timestamp:
//!
//! ```json
//! {"ts":"2026-01-07T14:32:01Z","event":"package_block","package":"left-pad","version":"1.3.1","min_age_days":14,"reason":"..."}
//! ```

mod error;
mod events;
mod syslog;

pub use error::TelemetryError;
pub use events::{AuditEvent, LookupAction};
pub use syslog::{AuditLogger, SYSLOG_TAG, audit, init_logger};
