//! Parse and serialization errors for template documents.

/// Errors raised while loading a template into the typed document model.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// Input was not syntactically valid YAML
    #[error("invalid yaml: {0}")]
    InvalidYaml(#[from] serde_yaml::Error),

    /// Input was not syntactically valid JSON
    #[error("invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The document root must be a mapping
    #[error("template root is not a mapping")]
    RootNotMapping,

    /// Top-level key outside the CloudFormation/SAM section set
    #[error("unrecognized top-level section: {0}")]
    UnknownSection(String),

    /// A section held a shape it cannot have
    #[error("section {0} has an unexpected shape")]
    InvalidSection(&'static str),

    /// Mapping keys must be strings
    #[error("non-string mapping key at {0}")]
    NonStringKey(String),

    /// Every resource needs a `Type` tag
    #[error("resource {0} has no Type")]
    MissingResourceType(String),

    /// `DependsOn` must be a logical ID or a list of logical IDs
    #[error("resource {0} has a malformed DependsOn")]
    MalformedDependsOn(String),

    /// `Transform` must be a string or a list of strings
    #[error("malformed Transform section")]
    MalformedTransform,
}

/// Errors raised while emitting a document back to text.
#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("yaml emit failed: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json emit failed: {0}")]
    Json(#[from] serde_json::Error),
}
