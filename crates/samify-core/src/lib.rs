//! Samify Core: the orchestrator.
//!
//! Sequences one run over one exclusively-owned document:
//! load -> (metadata present? resolve + rename) -> clean -> fold (SAM target
//! only) -> asset-plan -> integrity check -> serialize -> lint -> emit.
//!
//! The pipeline is synchronous and single-threaded; the only suspension
//! points are the blocking I/O boundaries (metadata bundle, stack fetch,
//! external lint), and a failure at any boundary aborts before later stages
//! run. Output files are written exactly once at the very end or not at all.

mod clean;
mod collaborators;
mod options;
mod pipeline;

pub use clean::clean_document;
pub use collaborators::{
    CanonicalFormatter, FetchedStack, Formatter, LintFinding, Linter, Severity, StackFetcher,
};
pub use options::{OutputFormat, PipelineOptions, TargetFormat};
pub use pipeline::{Pipeline, PipelineOutcome, RunStatus, TemplateSource};

use samify_assets::AssetError;
use samify_fold::FoldError;
use samify_metadata::MetadataError;
use samify_rename::RenameConflict;
use samify_template::{ParseError, SerializeError};

/// Everything that can abort a run. Lint findings are advisory and live on
/// the outcome instead; fold information-loss is a plan annotation, never an
/// error.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Malformed input: fatal, no output
    #[error("parse failed: {0}")]
    Parse(#[from] ParseError),

    /// Metadata bundle could not be loaded
    #[error("metadata load failed: {0}")]
    Metadata(#[from] MetadataError),

    /// A collision the deterministic strategy could not resolve
    #[error("rename failed: {0}")]
    Rename(#[from] RenameConflict),

    /// Tied-priority fold rules claimed the same resources
    #[error("fold configuration defect: {0}")]
    Fold(#[from] FoldError),

    /// An asset's bytes could not be obtained
    #[error("asset planning failed: {0}")]
    Asset(#[from] AssetError),

    /// Post-transform integrity check found references to retired IDs,
    /// always an internal invariant violation in a fold rule
    #[error("dangling references after transform: {targets:?}")]
    ReferenceDangling { targets: Vec<String> },

    /// Serializer failure
    #[error("serialize failed: {0}")]
    Serialize(#[from] SerializeError),

    /// A required collaborator was not supplied
    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    /// A collaborator boundary call failed
    #[error("{boundary} failed: {message}")]
    Boundary {
        boundary: &'static str,
        message: String,
    },

    /// Filesystem failure reading input or writing output
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}
