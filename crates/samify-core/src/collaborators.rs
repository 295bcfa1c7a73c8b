//! External collaborators the orchestrator talks to. All calls are blocking
//! and all-or-nothing: a failure aborts the pipeline before later stages.

use samify_template::{to_yaml_string, SerializeError, TemplateDocument};

/// Severity of one lint finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// One finding from the external validator.
#[derive(Debug, Clone)]
pub struct LintFinding {
    pub severity: Severity,
    pub rule_id: String,
    pub message: String,
    /// Slash-separated location inside the document
    pub path: String,
}

/// External lint step. Findings are advisory; errors set a non-zero outcome
/// unless explicitly overridden.
pub trait Linter {
    /// Validate the final document text.
    ///
    /// # Errors
    /// A failure of the lint process itself (not a finding).
    fn lint(&self, text: &str, name: &str) -> Result<Vec<LintFinding>, String>;
}

/// Raw template text plus optional metadata for a deployed stack.
#[derive(Debug, Clone)]
pub struct FetchedStack {
    pub template_text: String,
    /// Serialized CDK metadata when the fetcher could recover it
    pub metadata_json: Option<String>,
}

/// Fetches a deployed stack's template. The network call itself lives
/// outside this crate.
pub trait StackFetcher {
    /// Retrieve the template for a stack identifier.
    ///
    /// # Errors
    /// Any retrieval failure; the pipeline aborts on it.
    fn fetch(&self, stack_id: &str) -> Result<FetchedStack, String>;
}

/// Presentational formatter: consumes the final document tree, produces
/// text. Value alignment and highlighting live in external implementations;
/// the canonical serializer is the default.
pub trait Formatter {
    /// Render the final document.
    ///
    /// # Errors
    /// Serializer failures.
    fn format(&self, doc: &TemplateDocument) -> Result<String, SerializeError>;
}

/// Default formatter: the canonical YAML serializer.
#[derive(Debug, Default)]
pub struct CanonicalFormatter;

impl Formatter for CanonicalFormatter {
    fn format(&self, doc: &TemplateDocument) -> Result<String, SerializeError> {
        to_yaml_string(doc)
    }
}
