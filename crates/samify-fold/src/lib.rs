//! Samify Pattern Library
//!
//! Ordered fold rules that collapse clusters of low-level CloudFormation
//! resources into SAM constructs while preserving deploy-time semantics.
//!
//! - [`FoldRule`]: matcher + rewrite, dispatched by type tag and structural
//!   predicate; each rule is testable in isolation
//! - [`PatternLibrary`]: claim-then-rewrite engine; a resource is consumed by
//!   at most one rule, and tied-priority overlap is a configuration defect
//! - [`rules`]: the standard rule set
//!
//! Rules match CDK/CFN-shaped idioms, not already-folded resources: running
//! the library over its own output is a no-op by construction.

mod globals;
mod helpers;
mod rule;
pub mod rules;

pub use globals::apply_function_globals;
pub use rule::{FoldClaim, FoldRule, MatchContext, PatternLibrary};

/// Rule names as they appear in plan entries.
pub const FOLD_FUNCTION: &str = "function-fold";
pub const FOLD_FUNCTION_URL: &str = "function-url-fold";
pub const FOLD_API_EVENT: &str = "api-event-fold";
pub const FOLD_REST_SHELL: &str = "rest-shell-fold";
pub const FOLD_HTTP_SHELL: &str = "http-shell-fold";
pub const FOLD_EVENT_SOURCE: &str = "event-source-fold";
pub const FOLD_STORAGE_EVENT: &str = "storage-event-fold";
pub const FOLD_SCHEDULE_RULE: &str = "schedule-rule-fold";
pub const FOLD_SIMPLE_TABLE: &str = "simple-table-fold";
pub const FOLD_LAYER: &str = "layer-fold";

/// Fold engine failures.
#[derive(Debug, thiserror::Error)]
pub enum FoldError {
    /// Two tied-priority rules claimed the same resources; a configuration
    /// defect, surfaced before any transform runs
    #[error("rules {rule_a} and {rule_b} both claim {contested:?} at equal priority")]
    Ambiguous {
        rule_a: String,
        rule_b: String,
        contested: Vec<String>,
    },
}
