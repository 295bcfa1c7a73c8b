//! Per-run configuration, passed by value into each invocation so runs stay
//! isolated.

use std::path::PathBuf;

use samify_assets::PlacementPolicy;
use samify_metadata::{MetadataBundle, ResolverOptions};

/// What the output document is allowed to contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetFormat {
    /// Clean only: names and metadata, no SAM folding
    #[default]
    CloudFormation,

    /// Fold resource idioms into SAM constructs
    Sam,
}

/// Output text flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Yaml,
    Json,
}

/// Tunables for one pipeline run.
#[derive(Debug, Default)]
pub struct PipelineOptions {
    pub target: TargetFormat,
    pub output: OutputFormat,

    /// CDK build metadata, loaded by the caller and passed in by value
    pub metadata: Option<MetadataBundle>,

    pub resolver: ResolverOptions,
    pub placement: PlacementPolicy,

    /// Keep `aws:cdk:path` entries in resource metadata
    pub keep_path_metadata: bool,

    /// Directories searched for local asset paths
    pub asset_search_roots: Vec<PathBuf>,

    /// Relative directory (from the output document) assets stage into
    pub assets_dir: Option<String>,

    /// Lint errors normally set a failing outcome; this overrides that
    pub allow_lint_errors: bool,
}

impl PipelineOptions {
    /// Options for a SAM conversion run.
    #[must_use]
    pub fn sam() -> Self {
        Self {
            target: TargetFormat::Sam,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: MetadataBundle) -> Self {
        self.metadata = Some(metadata);
        self
    }

    #[must_use]
    pub fn with_placement(mut self, placement: PlacementPolicy) -> Self {
        self.placement = placement;
        self
    }

    pub(crate) fn assets_dir(&self) -> &str {
        self.assets_dir.as_deref().unwrap_or("src")
    }
}
