//! Emitting a document back to text.
//!
//! Serialization is lossless for every loaded construct except the deliberate
//! normalizations: canonical long-form intrinsics, fixed resource-attribute
//! order, empty sections dropped, comments not carried.

use crate::document::{DependsOn, Resource, TemplateDocument, Transform};
use crate::error::SerializeError;
use crate::value::{TemplateValue, ValueMap};

/// Emit canonical YAML.
///
/// # Errors
/// [`SerializeError::Yaml`] if the emitter fails (practically unreachable for
/// values built by this crate).
pub fn to_yaml_string(doc: &TemplateDocument) -> Result<String, SerializeError> {
    Ok(serde_yaml::to_string(&document_value(doc).to_yaml())?)
}

/// Emit pretty-printed JSON.
pub fn to_json_string(doc: &TemplateDocument) -> Result<String, SerializeError> {
    let mut text = serde_json::to_string_pretty(&document_value(doc).to_json())?;
    text.push('\n');
    Ok(text)
}

/// The document as a single ordered value tree.
#[must_use]
pub fn document_value(doc: &TemplateDocument) -> TemplateValue {
    let mut root = ValueMap::new();
    if let Some(version) = &doc.format_version {
        root.insert(
            "AWSTemplateFormatVersion".to_string(),
            TemplateValue::string(version.clone()),
        );
    }
    if let Some(description) = &doc.description {
        root.insert(
            "Description".to_string(),
            TemplateValue::string(description.clone()),
        );
    }
    if let Some(transform) = &doc.transform {
        root.insert("Transform".to_string(), transform_value(transform));
    }
    insert_section(&mut root, "Parameters", &doc.parameters);
    insert_section(&mut root, "Mappings", &doc.mappings);
    insert_section(&mut root, "Conditions", &doc.conditions);
    insert_section(&mut root, "Rules", &doc.rules);
    insert_section(&mut root, "Globals", &doc.globals);

    let mut resources = ValueMap::with_capacity(doc.resources.len());
    for (logical_id, resource) in &doc.resources {
        resources.insert(logical_id.clone(), resource_value(resource));
    }
    if !resources.is_empty() {
        root.insert("Resources".to_string(), TemplateValue::Mapping(resources));
    }

    insert_section(&mut root, "Outputs", &doc.outputs);
    insert_section(&mut root, "Metadata", &doc.metadata);
    TemplateValue::Mapping(root)
}

fn insert_section(root: &mut ValueMap, name: &str, section: &ValueMap) {
    if !section.is_empty() {
        root.insert(name.to_string(), TemplateValue::Mapping(section.clone()));
    }
}

fn transform_value(transform: &Transform) -> TemplateValue {
    match transform {
        Transform::Single(name) => TemplateValue::string(name.clone()),
        Transform::List(names) => TemplateValue::Sequence(
            names
                .iter()
                .map(|name| TemplateValue::string(name.clone()))
                .collect(),
        ),
    }
}

fn resource_value(resource: &Resource) -> TemplateValue {
    let mut body = ValueMap::new();
    body.insert(
        "Type".to_string(),
        TemplateValue::string(resource.resource_type.clone()),
    );
    if let Some(condition) = &resource.condition {
        body.insert(
            "Condition".to_string(),
            TemplateValue::string(condition.clone()),
        );
    }
    if let Some(depends) = &resource.depends_on {
        let value = match depends {
            DependsOn::Single(target) => TemplateValue::string(target.clone()),
            DependsOn::List(targets) => TemplateValue::Sequence(
                targets
                    .iter()
                    .map(|target| TemplateValue::string(target.clone()))
                    .collect(),
            ),
        };
        body.insert("DependsOn".to_string(), value);
    }
    if !resource.properties.is_empty() {
        body.insert(
            "Properties".to_string(),
            TemplateValue::Mapping(resource.properties.clone()),
        );
    }
    for (key, value) in &resource.extra {
        body.insert(key.clone(), value.clone());
    }
    if !resource.metadata.is_empty() {
        body.insert(
            "Metadata".to_string(),
            TemplateValue::Mapping(resource.metadata.clone()),
        );
    }
    TemplateValue::Mapping(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_str;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r"
Transform: AWS::Serverless-2016-10-31
Resources:
  Fn:
    Type: AWS::Serverless::Function
    Properties:
      Handler: index.handler
      Role: !GetAtt Role.Arn
      Uri: !Sub 'https://${Api}.example.com/${!Keep}'
Outputs:
  Url:
    Value: !Ref Fn
";

    #[test]
    fn yaml_round_trip_is_stable() {
        let doc = parse_str(SAMPLE).unwrap();
        let first = to_yaml_string(&doc).unwrap();
        let reparsed = parse_str(&first).unwrap();
        let second = to_yaml_string(&reparsed).unwrap();
        assert_eq!(first, second);
        assert_eq!(doc, reparsed);
    }

    #[test]
    fn intrinsics_emit_long_form() {
        let doc = parse_str(SAMPLE).unwrap();
        let text = to_yaml_string(&doc).unwrap();
        assert!(text.contains("Fn::GetAtt"));
        assert!(text.contains("Fn::Sub"));
        assert!(text.contains("${!Keep}"));
        assert!(!text.contains("!GetAtt "));
    }

    #[test]
    fn json_and_yaml_hold_the_same_document() {
        let doc = parse_str(SAMPLE).unwrap();
        let json = to_json_string(&doc).unwrap();
        let from_json = parse_str(&json).unwrap();
        assert_eq!(doc, from_json);
    }

    #[test]
    fn empty_sections_are_dropped() {
        let doc = parse_str("Resources:\n  A:\n    Type: X\nOutputs: {}\n").unwrap();
        let text = to_yaml_string(&doc).unwrap();
        assert!(!text.contains("Outputs"));
    }
}
