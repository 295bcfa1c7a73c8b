//! Samify Asset Planner
//!
//! Decides inline-vs-external placement for every code asset and stages
//! external bytes under a deterministic relative tree.
//!
//! - [`AssetPlanner`]: placement decisions, digest-keyed write-once staging,
//!   rename-map application; nothing touches disk until [`AssetPlanner::commit`]
//! - [`plan_document`]: walks a folded document and rewrites code-location
//!   properties relative to the output document
//!
//! A run that cannot obtain an asset's bytes fails with
//! [`AssetError::Unavailable`]; a template that cannot build is never
//! emitted.

mod planner;
mod stage;

pub use planner::{AssetPlanner, AssetSource, PlannedLocation, RemoteFetcher, StagedAsset};
pub use stage::{inline_file_name, plan_document};

/// Binary placement policy: inline by default, external on opt-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlacementPolicy {
    /// Keep inline payloads inline; stage only what is already external
    #[default]
    PreferInline,

    /// Materialize inline payloads and fetchable artifacts to disk
    PreferExternal,
}

/// Asset planning failures.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    /// Source bytes cannot be obtained for an asset the plan needs
    #[error("asset for {logical_id} unavailable: {reason}")]
    Unavailable { logical_id: String, reason: String },

    /// Filesystem failure while staging
    #[error("asset staging io error at {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}
