//! Loading CDK build metadata: the assembly manifest and the construct tree.
//!
//! A bundle maps synthesized logical IDs to their construct paths. It is
//! loaded once per run and passed into the pipeline by value; no ambient
//! state, so concurrent runs across processes stay isolated.

use std::path::Path;

use indexmap::IndexMap;

/// Errors while loading a metadata bundle.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("cannot read metadata from {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid metadata json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unrecognized metadata bundle at {0}")]
    Unrecognized(String),
}

/// What the metadata knows about one logical ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstructRecord {
    /// Full construct path, e.g. `/Stack/Api/Handler/Resource`
    pub path: String,

    /// Candidate name extracted from the path
    pub construct_name: String,

    /// True for CDK-generated wrapper resources
    pub is_generated: bool,

    /// CloudFormation type from the construct tree, when available
    pub resource_type: Option<String>,
}

/// Parsed CDK metadata: logical ID to construct record.
#[derive(Debug, Clone, Default)]
pub struct MetadataBundle {
    records: IndexMap<String, ConstructRecord>,
}

impl MetadataBundle {
    #[inline]
    #[must_use]
    pub fn record(&self, logical_id: &str) -> Option<&ConstructRecord> {
        self.records.get(logical_id)
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Load from an assembly `manifest.json` payload.
    ///
    /// # Errors
    /// [`MetadataError::Json`] on malformed JSON.
    pub fn from_manifest_json(text: &str) -> Result<Self, MetadataError> {
        let manifest: serde_json::Value = serde_json::from_str(text)?;
        Ok(Self::extract_manifest(&manifest))
    }

    /// Load from a construct `tree.json` payload.
    pub fn from_tree_json(text: &str) -> Result<Self, MetadataError> {
        let tree: serde_json::Value = serde_json::from_str(text)?;
        Ok(Self::extract_tree(&tree))
    }

    /// Load from a `cdk.out`-style directory: `manifest.json` for the ID
    /// mappings, enriched with resource types from `tree.json` when present.
    /// A single file path is accepted too and dispatched on its contents.
    pub fn from_path(path: &Path) -> Result<Self, MetadataError> {
        if path.is_dir() {
            let manifest_path = path.join("manifest.json");
            let tree_path = path.join("tree.json");
            let mut bundle = if manifest_path.is_file() {
                Self::from_manifest_json(&read(&manifest_path)?)?
            } else {
                Self::default()
            };
            if tree_path.is_file() {
                let tree = Self::from_tree_json(&read(&tree_path)?)?;
                if bundle.is_empty() {
                    bundle = tree;
                } else {
                    bundle.enrich_types(&tree);
                }
            }
            if bundle.is_empty() {
                return Err(MetadataError::Unrecognized(path.display().to_string()));
            }
            return Ok(bundle);
        }

        let text = read(path)?;
        let payload: serde_json::Value = serde_json::from_str(&text)?;
        if payload.get("artifacts").is_some() {
            return Ok(Self::extract_manifest(&payload));
        }
        if payload.get("tree").is_some() {
            return Ok(Self::extract_tree(&payload));
        }
        Err(MetadataError::Unrecognized(path.display().to_string()))
    }

    fn extract_manifest(manifest: &serde_json::Value) -> Self {
        let mut records = IndexMap::new();
        let artifacts = manifest
            .get("artifacts")
            .and_then(serde_json::Value::as_object);
        for artifact in artifacts.into_iter().flatten().map(|(_, a)| a) {
            if artifact.get("type").and_then(serde_json::Value::as_str)
                != Some("aws:cloudformation:stack")
            {
                continue;
            }
            let entries = artifact
                .get("metadata")
                .and_then(serde_json::Value::as_object);
            for (path, items) in entries.into_iter().flatten() {
                let items = items.as_array().map(Vec::as_slice).unwrap_or_default();
                for item in items {
                    if item.get("type").and_then(serde_json::Value::as_str)
                        != Some("aws:cdk:logicalId")
                    {
                        continue;
                    }
                    let Some(logical_id) = item.get("data").and_then(serde_json::Value::as_str)
                    else {
                        continue;
                    };
                    records.insert(logical_id.to_string(), record_for_path(path, None));
                }
            }
        }
        tracing::debug!("loaded {} logical-id mappings from manifest", records.len());
        Self { records }
    }

    fn extract_tree(tree: &serde_json::Value) -> Self {
        let root = tree.get("tree").unwrap_or(tree);
        let mut records = IndexMap::new();
        walk_tree(root, "", &mut records);
        tracing::debug!("loaded {} logical-id mappings from tree", records.len());
        Self { records }
    }

    /// Copy resource types from another bundle keyed by the same IDs.
    fn enrich_types(&mut self, other: &Self) {
        for (logical_id, record) in &mut self.records {
            if record.resource_type.is_none() {
                record.resource_type = other
                    .record(logical_id)
                    .and_then(|r| r.resource_type.clone());
            }
        }
    }
}

fn read(path: &Path) -> Result<String, MetadataError> {
    std::fs::read_to_string(path).map_err(|source| MetadataError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn record_for_path(path: &str, resource_type: Option<String>) -> ConstructRecord {
    let construct_name = construct_name_from_path(path);
    ConstructRecord {
        path: path.to_string(),
        is_generated: is_generated(path, &construct_name),
        construct_name,
        resource_type,
    }
}

/// Extract a candidate construct name from a CDK path.
///
/// The stack segment is dropped, a trailing `Resource` wrapper is dropped,
/// and deeply nested constructs keep a short suffix of the parent path:
/// `/Stack/Vpc/PublicSubnet1/RouteTable` becomes `PublicSubnet1.RouteTable`
/// (dotted; sanitization later removes the dot).
#[must_use]
pub fn construct_name_from_path(path: &str) -> String {
    let mut parts: Vec<&str> = path
        .trim_matches('/')
        .split('/')
        .filter(|part| !part.is_empty())
        .collect();
    if parts.len() > 1 {
        parts.remove(0);
    }
    if parts.last() == Some(&"Resource") {
        parts.pop();
    }
    match parts.len() {
        0 => String::new(),
        1 => parts[0].to_string(),
        2 => parts.join(""),
        _ => parts[parts.len() - 2..].join("."),
    }
}

fn is_generated(path: &str, construct_name: &str) -> bool {
    use once_cell::sync::Lazy;
    use regex::Regex;

    static GENERATED: Lazy<Vec<Regex>> = Lazy::new(|| {
        [
            r"ServiceRole[A-F0-9]{8}$",
            r"DefaultPolicy[A-F0-9]{8}$",
            r"LogGroup[A-F0-9]{8}$",
            r"SecurityGroup[A-F0-9]{8}$",
        ]
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
    });

    if path.ends_with("/Resource") {
        return true;
    }
    if GENERATED.iter().any(|rx| rx.is_match(construct_name)) {
        return true;
    }
    path.trim_matches('/').split('/').count() > 3
}

fn walk_tree(
    node: &serde_json::Value,
    current_path: &str,
    records: &mut IndexMap<String, ConstructRecord>,
) {
    let cfn_type = node
        .get("attributes")
        .and_then(|attrs| attrs.get("aws:cdk:cloudformation:type"))
        .and_then(serde_json::Value::as_str);
    let node_id = node.get("id").and_then(serde_json::Value::as_str).unwrap_or("");

    if !current_path.is_empty() && !node_id.is_empty() && !node_id.starts_with('$') {
        if let Some(cfn_type) = cfn_type {
            records.insert(
                node_id.to_string(),
                record_for_path(current_path, Some(cfn_type.to_string())),
            );
        }
    }

    let children = node.get("children").and_then(serde_json::Value::as_object);
    for (child_id, child) in children.into_iter().flatten() {
        let child_path = format!("{current_path}/{child_id}");
        walk_tree(child, &child_path, records);
    }
}
