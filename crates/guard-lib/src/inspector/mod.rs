//! Post-sync health inspection
//!
//! Classifies deployment conditions and pod/container statuses into a closed
//! issue taxonomy, enriches them with recent Warning events, and derives a
//! severity, summary and remediation hints.

mod actions;
pub mod classify;
mod guard;
pub mod report;

pub use actions::suggested_actions;
pub use guard::{HealthCheckOptions, HealthInspector};
pub use report::{
    HealthIssue, HealthReport, IssueDetails, IssueEvent, IssueType, Severity, SuggestedAction,
};
