//! The pipeline: one linear sequence over one owned document.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use samify_assets::{plan_document, AssetPlanner, RemoteFetcher};
use samify_fold::{apply_function_globals, PatternLibrary};
use samify_metadata::{resolve, MetadataBundle};
use samify_plan::RefactorPlan;
use samify_template::{parse_str, to_json_string, ReferenceIndex, TemplateDocument};

use crate::clean::{clean_document, strip_synth_metadata};
use crate::collaborators::{
    CanonicalFormatter, Formatter, LintFinding, Linter, Severity, StackFetcher,
};
use crate::options::{OutputFormat, PipelineOptions, TargetFormat};
use crate::PipelineError;

/// Where the input document comes from.
#[derive(Debug, Clone)]
pub enum TemplateSource {
    /// A file on disk
    Path(PathBuf),

    /// Text already in hand
    Text { name: String, content: String },

    /// A deployed stack, fetched through the [`StackFetcher`] collaborator
    Stack(String),
}

/// Final disposition of a run that produced output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Succeeded,

    /// The external validator reported errors and no override was given
    LintErrors,
}

/// Everything a completed run produced. Nothing has touched the filesystem
/// yet; [`PipelineOutcome::write_to`] performs every write at the very end.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub source_name: String,
    pub text: String,
    pub plan: RefactorPlan,
    pub lint_findings: Vec<LintFinding>,
    pub status: RunStatus,

    /// Whether rename resolution ran (metadata present); distinguishable
    /// from a run that skipped it
    pub renames_performed: bool,

    /// Whether any fold rule applied
    pub folded: bool,

    planner: AssetPlanner,
}

impl PipelineOutcome {
    /// Write the output document and the staged asset tree, exactly once.
    ///
    /// # Errors
    /// [`PipelineError::Io`] / [`PipelineError::Asset`] on write failure.
    pub fn write_to(&self, output_path: &Path) -> Result<(), PipelineError> {
        let output_root = output_path.parent().unwrap_or_else(|| Path::new("."));
        if !output_root.as_os_str().is_empty() {
            std::fs::create_dir_all(output_root).map_err(|source| PipelineError::Io {
                path: output_root.display().to_string(),
                source,
            })?;
        }
        self.planner.commit(output_root)?;
        std::fs::write(output_path, &self.text).map_err(|source| PipelineError::Io {
            path: output_path.display().to_string(),
            source,
        })?;
        Ok(())
    }

    /// Paths of every staged asset, relative to the output document.
    #[must_use]
    pub fn staged_assets(&self) -> Vec<&str> {
        self.planner
            .staged()
            .iter()
            .map(|asset| asset.relative_path.as_str())
            .collect()
    }
}

/// Orchestrator over the pipeline stages and the external collaborators.
#[derive(Default)]
pub struct Pipeline<'a> {
    linter: Option<&'a dyn Linter>,
    formatter: Option<&'a dyn Formatter>,
    fetcher: Option<&'a dyn StackFetcher>,
    remote_assets: Option<&'a dyn RemoteFetcher>,
}

impl<'a> Pipeline<'a> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_linter(mut self, linter: &'a dyn Linter) -> Self {
        self.linter = Some(linter);
        self
    }

    #[must_use]
    pub fn with_formatter(mut self, formatter: &'a dyn Formatter) -> Self {
        self.formatter = Some(formatter);
        self
    }

    #[must_use]
    pub fn with_fetcher(mut self, fetcher: &'a dyn StackFetcher) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    #[must_use]
    pub fn with_remote_assets(mut self, fetcher: &'a dyn RemoteFetcher) -> Self {
        self.remote_assets = Some(fetcher);
        self
    }

    /// Run the full sequence: load, resolve/rename, clean, fold, asset-plan,
    /// integrity check, serialize, lint.
    ///
    /// # Errors
    /// Any [`PipelineError`]; no output is observable on failure.
    pub fn run(
        &self,
        source: TemplateSource,
        options: PipelineOptions,
    ) -> Result<PipelineOutcome, PipelineError> {
        let (content, source_name, fetched_metadata) = self.load(source)?;
        tracing::info!(source = %source_name, "processing template");
        let mut doc = parse_str(&content)?;

        let bundle = match (&options.metadata, fetched_metadata) {
            (Some(_), _) => options.metadata.clone(),
            (None, Some(json)) => Some(parse_fetched_metadata(&json)?),
            (None, None) => None,
        };

        // Resolve + rename, observable when skipped.
        let mut plan = RefactorPlan::new();
        let resolution = resolve(&doc, bundle.as_ref(), options.resolver);
        let renames_performed = resolution.performed();
        if let Some(rename_plan) = resolution.plan() {
            samify_rename::apply(&mut doc, rename_plan)?;
            plan.record_renames(rename_plan);
            tracing::info!(count = rename_plan.len(), "renamed logical ids");
        } else {
            tracing::info!("no metadata bundle; rename resolution skipped");
        }

        clean_document(&mut doc);

        // References the input already failed to resolve are tolerated; the
        // integrity check below only fails on ones the transform introduced.
        let baseline = dangling_targets(&doc);

        let mut folded = false;
        if options.target == TargetFormat::Sam {
            folded = PatternLibrary::standard().fold(&mut doc, &mut plan)?;
            apply_function_globals(&mut doc);
            tracing::info!(folded, "fold pass complete");
        }

        let mut planner = AssetPlanner::new(options.assets_dir(), options.placement);
        if options.target == TargetFormat::Sam {
            plan_document(
                &mut doc,
                &mut planner,
                &options.asset_search_roots,
                self.remote_assets,
                &mut plan,
            )?;
        }

        strip_synth_metadata(&mut doc, options.keep_path_metadata);

        let dangling: Vec<String> = dangling_targets(&doc)
            .difference(&baseline)
            .cloned()
            .collect();
        if !dangling.is_empty() {
            return Err(PipelineError::ReferenceDangling { targets: dangling });
        }

        let text = self.render(&doc, options.output)?;

        let lint_findings = match self.linter {
            Some(linter) => {
                linter
                    .lint(&text, &source_name)
                    .map_err(|message| PipelineError::Boundary {
                        boundary: "lint",
                        message,
                    })?
            }
            None => Vec::new(),
        };
        let has_lint_errors = lint_findings
            .iter()
            .any(|finding| finding.severity == Severity::Error);
        let status = if has_lint_errors && !options.allow_lint_errors {
            RunStatus::LintErrors
        } else {
            RunStatus::Succeeded
        };

        Ok(PipelineOutcome {
            source_name,
            text,
            plan,
            lint_findings,
            status,
            renames_performed,
            folded,
            planner,
        })
    }

    fn load(
        &self,
        source: TemplateSource,
    ) -> Result<(String, String, Option<String>), PipelineError> {
        match source {
            TemplateSource::Path(path) => {
                let content =
                    std::fs::read_to_string(&path).map_err(|source| PipelineError::Io {
                        path: path.display().to_string(),
                        source,
                    })?;
                Ok((content, path.display().to_string(), None))
            }
            TemplateSource::Text { name, content } => Ok((content, name, None)),
            TemplateSource::Stack(stack_id) => {
                let fetcher = self
                    .fetcher
                    .ok_or(PipelineError::MissingCollaborator("stack fetcher"))?;
                let fetched =
                    fetcher
                        .fetch(&stack_id)
                        .map_err(|message| PipelineError::Boundary {
                            boundary: "stack fetch",
                            message,
                        })?;
                Ok((
                    fetched.template_text,
                    format!("stack:{stack_id}"),
                    fetched.metadata_json,
                ))
            }
        }
    }

    fn render(
        &self,
        doc: &TemplateDocument,
        format: OutputFormat,
    ) -> Result<String, PipelineError> {
        let text = match format {
            OutputFormat::Json => to_json_string(doc)?,
            OutputFormat::Yaml => match self.formatter {
                Some(formatter) => formatter.format(doc)?,
                None => CanonicalFormatter.format(doc)?,
            },
        };
        Ok(text)
    }
}

fn dangling_targets(doc: &TemplateDocument) -> BTreeSet<String> {
    let index = ReferenceIndex::build(doc);
    index
        .dangling(doc)
        .into_iter()
        .map(|site| site.target.clone())
        .collect()
}

fn parse_fetched_metadata(json: &str) -> Result<MetadataBundle, PipelineError> {
    MetadataBundle::from_manifest_json(json)
        .ok()
        .filter(|bundle| !bundle.is_empty())
        .map_or_else(|| Ok(MetadataBundle::from_tree_json(json)?), Ok)
}
