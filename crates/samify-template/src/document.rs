//! The template document: ordered sections, resources, and the invariants the
//! pipeline relies on (unique logical IDs, typed intrinsics, pass-through for
//! unmodeled resource attributes).

use indexmap::IndexMap;

use crate::error::ParseError;
use crate::value::{TemplateValue, ValueMap};

/// The SAM transform identifier appended when folding produces serverless
/// resources.
pub const SAM_TRANSFORM: &str = "AWS::Serverless-2016-10-31";

/// `Transform` section: a single macro name or an ordered list of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transform {
    Single(String),
    List(Vec<String>),
}

impl Transform {
    /// True when the SAM transform is already declared.
    #[must_use]
    pub fn includes_sam(&self) -> bool {
        match self {
            Self::Single(name) => name == SAM_TRANSFORM,
            Self::List(names) => names.iter().any(|name| name == SAM_TRANSFORM),
        }
    }
}

/// `DependsOn` keeps its original scalar-or-list shape across rewrites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependsOn {
    Single(String),
    List(Vec<String>),
}

impl DependsOn {
    /// The declared dependency targets in order.
    #[must_use]
    pub fn targets(&self) -> Vec<&str> {
        match self {
            Self::Single(id) => vec![id.as_str()],
            Self::List(ids) => ids.iter().map(String::as_str).collect(),
        }
    }

    /// Drop every entry naming one of `retired`; `None` when nothing is left.
    #[must_use]
    pub fn without(&self, retired: &[&str]) -> Option<Self> {
        match self {
            Self::Single(id) => {
                (!retired.contains(&id.as_str())).then(|| Self::Single(id.clone()))
            }
            Self::List(ids) => {
                let kept: Vec<String> = ids
                    .iter()
                    .filter(|id| !retired.contains(&id.as_str()))
                    .cloned()
                    .collect();
                (!kept.is_empty()).then_some(Self::List(kept))
            }
        }
    }
}

/// One resource body. The logical ID lives on the owning map key.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Resource {
    /// CloudFormation type tag, e.g. `AWS::Lambda::Function`
    pub resource_type: String,

    /// `Properties` mapping; empty when absent
    pub properties: ValueMap,

    pub depends_on: Option<DependsOn>,

    /// `Condition` attribute (a condition name, not an intrinsic)
    pub condition: Option<String>,

    /// `Metadata` mapping; carries `aws:cdk:path` / `aws:asset:*` entries
    pub metadata: ValueMap,

    /// Remaining attributes (DeletionPolicy, UpdatePolicy, ...) pass through
    /// untouched
    pub extra: ValueMap,
}

impl Resource {
    /// New resource of the given type with empty properties.
    #[inline]
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            ..Self::default()
        }
    }

    #[inline]
    #[must_use]
    pub fn is_type(&self, type_tag: &str) -> bool {
        self.resource_type == type_tag
    }

    /// Property lookup.
    #[inline]
    #[must_use]
    pub fn prop(&self, key: &str) -> Option<&TemplateValue> {
        self.properties.get(key)
    }

    /// The `aws:cdk:path` metadata entry, when present.
    #[must_use]
    pub fn cdk_path(&self) -> Option<&str> {
        self.metadata.get("aws:cdk:path").and_then(TemplateValue::as_str)
    }

    /// The `aws:asset:path` metadata entry, when present.
    #[must_use]
    pub fn asset_path(&self) -> Option<&str> {
        self.metadata.get("aws:asset:path").and_then(TemplateValue::as_str)
    }

    /// The `aws:asset:property` metadata entry, when present.
    #[must_use]
    pub fn asset_property(&self) -> Option<&str> {
        self.metadata
            .get("aws:asset:property")
            .and_then(TemplateValue::as_str)
    }
}

/// A parsed template. One document per invocation, owned exclusively by the
/// pipeline and mutated in place by successive passes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TemplateDocument {
    pub format_version: Option<String>,
    pub description: Option<String>,
    pub transform: Option<Transform>,
    pub parameters: ValueMap,
    pub mappings: ValueMap,
    pub conditions: ValueMap,
    pub rules: ValueMap,
    pub resources: IndexMap<String, Resource>,
    pub outputs: ValueMap,
    pub metadata: ValueMap,
    pub globals: ValueMap,
}

impl TemplateDocument {
    #[inline]
    #[must_use]
    pub fn resource(&self, logical_id: &str) -> Option<&Resource> {
        self.resources.get(logical_id)
    }

    #[inline]
    #[must_use]
    pub fn resource_mut(&mut self, logical_id: &str) -> Option<&mut Resource> {
        self.resources.get_mut(logical_id)
    }

    /// Logical IDs of all resources with the given type tag.
    #[must_use]
    pub fn resources_of_type(&self, type_tag: &str) -> Vec<String> {
        self.resources
            .iter()
            .filter(|(_, res)| res.is_type(type_tag))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// True when `name` is a logical ID of any resource, parameter, or
    /// condition: the namespaces a reference can legally target.
    #[must_use]
    pub fn defines(&self, name: &str) -> bool {
        self.resources.contains_key(name)
            || self.parameters.contains_key(name)
            || self.conditions.contains_key(name)
    }

    /// Remove resources and scrub retired IDs out of every `DependsOn`.
    pub fn remove_resources(&mut self, logical_ids: &[String]) {
        if logical_ids.is_empty() {
            return;
        }
        for id in logical_ids {
            self.resources.shift_remove(id);
        }
        let retired: Vec<&str> = logical_ids.iter().map(String::as_str).collect();
        for resource in self.resources.values_mut() {
            if let Some(depends) = resource.depends_on.take() {
                resource.depends_on = depends.without(&retired);
            }
        }
    }

    /// Append the SAM transform, preserving any existing macro declarations.
    pub fn ensure_sam_transform(&mut self) {
        match self.transform.take() {
            None => self.transform = Some(Transform::Single(SAM_TRANSFORM.to_string())),
            Some(existing) if existing.includes_sam() => self.transform = Some(existing),
            Some(Transform::Single(other)) => {
                self.transform =
                    Some(Transform::List(vec![other, SAM_TRANSFORM.to_string()]));
            }
            Some(Transform::List(mut names)) => {
                names.push(SAM_TRANSFORM.to_string());
                self.transform = Some(Transform::List(names));
            }
        }
    }

    /// Validate section shapes that parsing alone cannot rule out.
    ///
    /// # Errors
    /// [`ParseError::MissingResourceType`] when a resource body lacks `Type`.
    pub fn check_invariants(&self) -> Result<(), ParseError> {
        for (id, resource) in &self.resources {
            if resource.resource_type.is_empty() {
                return Err(ParseError::MissingResourceType(id.clone()));
            }
        }
        Ok(())
    }
}

/// Normalize an inline code payload for block-scalar emission: strip leading
/// and trailing blank lines, remove common indentation, expand tabs.
#[must_use]
pub fn normalize_inline_code(payload: &str) -> String {
    let decoded = payload.replace("\r\n", "\n");
    let mut lines: Vec<&str> = decoded.split('\n').collect();
    while lines.first().is_some_and(|line| line.trim().is_empty()) {
        lines.remove(0);
    }
    while lines.last().is_some_and(|line| line.trim().is_empty()) {
        lines.pop();
    }
    if lines.is_empty() {
        return String::new();
    }
    let indent = lines
        .iter()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start_matches(' ').len())
        .min()
        .unwrap_or(0);
    lines
        .iter()
        .map(|line| {
            let line = if line.len() >= indent { &line[indent..] } else { line };
            line.replace('\t', "  ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn depends_on_without_drops_entries() {
        let deps = DependsOn::List(vec!["A".to_string(), "B".to_string()]);
        assert_eq!(
            deps.without(&["A"]),
            Some(DependsOn::List(vec!["B".to_string()]))
        );
        assert_eq!(deps.without(&["A", "B"]), None);
        let single = DependsOn::Single("A".to_string());
        assert_eq!(single.without(&["A"]), None);
    }

    #[test]
    fn remove_resources_scrubs_depends_on() {
        let mut doc = TemplateDocument::default();
        doc.resources.insert("Gone".to_string(), Resource::new("AWS::SQS::Queue"));
        let mut keeper = Resource::new("AWS::Lambda::Function");
        keeper.depends_on = Some(DependsOn::List(vec![
            "Gone".to_string(),
            "Stays".to_string(),
        ]));
        doc.resources.insert("Keeper".to_string(), keeper);
        doc.resources.insert("Stays".to_string(), Resource::new("AWS::SQS::Queue"));

        doc.remove_resources(&["Gone".to_string()]);

        assert!(doc.resource("Gone").is_none());
        let keeper = doc.resource("Keeper").unwrap();
        assert_eq!(
            keeper.depends_on,
            Some(DependsOn::List(vec!["Stays".to_string()]))
        );
    }

    #[test]
    fn ensure_sam_transform_preserves_existing_macros() {
        let mut doc = TemplateDocument::default();
        doc.ensure_sam_transform();
        assert_eq!(
            doc.transform,
            Some(Transform::Single(SAM_TRANSFORM.to_string()))
        );

        let mut doc = TemplateDocument {
            transform: Some(Transform::Single("AWS::LanguageExtensions".to_string())),
            ..TemplateDocument::default()
        };
        doc.ensure_sam_transform();
        assert_eq!(
            doc.transform,
            Some(Transform::List(vec![
                "AWS::LanguageExtensions".to_string(),
                SAM_TRANSFORM.to_string(),
            ]))
        );

        doc.ensure_sam_transform();
        assert!(doc.transform.as_ref().unwrap().includes_sam());
    }

    #[test]
    fn inline_code_normalization_dedents_and_trims() {
        let raw = "\n    def handler(event, context):\n        return 1\n\n";
        assert_eq!(
            normalize_inline_code(raw),
            "def handler(event, context):\n    return 1"
        );
    }

    #[test]
    fn inline_code_normalization_expands_tabs() {
        assert_eq!(normalize_inline_code("a\n\tb"), "a\n  b");
    }
}
