//! Loading structural CFN/CDK/SAM text into [`TemplateDocument`].
//!
//! JSON and YAML are both accepted; detection is by leading `{`. Malformed
//! text and unrecognized top-level shapes fail with [`ParseError`]; the
//! loader never guesses.

use crate::document::{DependsOn, Resource, TemplateDocument, Transform};
use crate::error::ParseError;
use crate::value::{TemplateValue, ValueMap};

/// Parse template text, auto-detecting JSON vs YAML.
///
/// # Errors
/// [`ParseError`] on malformed input or an unrecognized top-level shape.
pub fn parse_str(text: &str) -> Result<TemplateDocument, ParseError> {
    let root = if text.trim_start().starts_with('{') {
        let value: serde_json::Value = serde_json::from_str(text)?;
        TemplateValue::from_json(value)?
    } else {
        let value: serde_yaml::Value = serde_yaml::from_str(text)?;
        TemplateValue::from_yaml(value)?
    };
    from_value(root)
}

/// Build a document from an already converted root value.
pub fn from_value(root: TemplateValue) -> Result<TemplateDocument, ParseError> {
    let TemplateValue::Mapping(sections) = root else {
        return Err(ParseError::RootNotMapping);
    };

    let mut doc = TemplateDocument::default();
    for (section, value) in sections {
        match section.as_str() {
            "AWSTemplateFormatVersion" => {
                doc.format_version = Some(scalar_string(value, "AWSTemplateFormatVersion")?);
            }
            "Description" => {
                doc.description = Some(scalar_string(value, "Description")?);
            }
            "Transform" => doc.transform = Some(parse_transform(value)?),
            "Parameters" => doc.parameters = section_map(value, "Parameters")?,
            "Mappings" => doc.mappings = section_map(value, "Mappings")?,
            "Conditions" => doc.conditions = section_map(value, "Conditions")?,
            "Rules" => doc.rules = section_map(value, "Rules")?,
            "Resources" => doc.resources = parse_resources(value)?,
            "Outputs" => doc.outputs = section_map(value, "Outputs")?,
            "Metadata" => doc.metadata = section_map(value, "Metadata")?,
            "Globals" => doc.globals = section_map(value, "Globals")?,
            other => return Err(ParseError::UnknownSection(other.to_string())),
        }
    }

    doc.check_invariants()?;
    Ok(doc)
}

fn scalar_string(value: TemplateValue, section: &'static str) -> Result<String, ParseError> {
    match value {
        TemplateValue::String(s) => Ok(s),
        TemplateValue::Number(crate::value::Number::Int(i)) => Ok(i.to_string()),
        TemplateValue::Number(crate::value::Number::Float(f)) => Ok(f.to_string()),
        _ => Err(ParseError::InvalidSection(section)),
    }
}

fn section_map(value: TemplateValue, section: &'static str) -> Result<ValueMap, ParseError> {
    match value {
        TemplateValue::Mapping(map) => Ok(map),
        TemplateValue::Null => Ok(ValueMap::new()),
        _ => Err(ParseError::InvalidSection(section)),
    }
}

fn parse_transform(value: TemplateValue) -> Result<Transform, ParseError> {
    match value {
        TemplateValue::String(name) => Ok(Transform::Single(name)),
        TemplateValue::Sequence(items) => {
            let names: Option<Vec<String>> = items
                .into_iter()
                .map(|item| match item {
                    TemplateValue::String(name) => Some(name),
                    _ => None,
                })
                .collect();
            names.map(Transform::List).ok_or(ParseError::MalformedTransform)
        }
        _ => Err(ParseError::MalformedTransform),
    }
}

fn parse_resources(
    value: TemplateValue,
) -> Result<indexmap::IndexMap<String, Resource>, ParseError> {
    let bodies = section_map(value, "Resources")?;
    let mut resources = indexmap::IndexMap::with_capacity(bodies.len());
    for (logical_id, body) in bodies {
        let TemplateValue::Mapping(body) = body else {
            return Err(ParseError::MissingResourceType(logical_id));
        };
        resources.insert(logical_id.clone(), parse_resource(&logical_id, body)?);
    }
    Ok(resources)
}

fn parse_resource(logical_id: &str, body: ValueMap) -> Result<Resource, ParseError> {
    let mut resource = Resource::default();
    for (key, value) in body {
        match key.as_str() {
            "Type" => match value {
                TemplateValue::String(type_tag) => resource.resource_type = type_tag,
                _ => return Err(ParseError::MissingResourceType(logical_id.to_string())),
            },
            "Properties" => match value {
                TemplateValue::Mapping(props) => resource.properties = props,
                TemplateValue::Null => {}
                _ => return Err(ParseError::InvalidSection("Resources")),
            },
            "DependsOn" => resource.depends_on = Some(parse_depends_on(logical_id, value)?),
            "Condition" => match value {
                TemplateValue::String(name) => resource.condition = Some(name),
                _ => return Err(ParseError::InvalidSection("Resources")),
            },
            "Metadata" => match value {
                TemplateValue::Mapping(metadata) => resource.metadata = metadata,
                TemplateValue::Null => {}
                _ => return Err(ParseError::InvalidSection("Resources")),
            },
            _ => {
                resource.extra.insert(key, value);
            }
        }
    }
    if resource.resource_type.is_empty() {
        return Err(ParseError::MissingResourceType(logical_id.to_string()));
    }
    Ok(resource)
}

fn parse_depends_on(logical_id: &str, value: TemplateValue) -> Result<DependsOn, ParseError> {
    match value {
        TemplateValue::String(target) => Ok(DependsOn::Single(target)),
        TemplateValue::Sequence(items) => {
            let targets: Option<Vec<String>> = items
                .into_iter()
                .map(|item| match item {
                    TemplateValue::String(target) => Some(target),
                    _ => None,
                })
                .collect();
            targets
                .map(DependsOn::List)
                .ok_or_else(|| ParseError::MalformedDependsOn(logical_id.to_string()))
        }
        _ => Err(ParseError::MalformedDependsOn(logical_id.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const BASIC: &str = r"
AWSTemplateFormatVersion: '2010-09-09'
Description: demo stack
Resources:
  Fn:
    Type: AWS::Lambda::Function
    DependsOn: Queue
    Properties:
      Handler: index.handler
      Role: !GetAtt Role.Arn
  Queue:
    Type: AWS::SQS::Queue
";

    #[test]
    fn parses_yaml_template() {
        let doc = parse_str(BASIC).unwrap();
        assert_eq!(doc.description.as_deref(), Some("demo stack"));
        assert_eq!(doc.resources.len(), 2);
        let function = doc.resource("Fn").unwrap();
        assert!(function.is_type("AWS::Lambda::Function"));
        assert_eq!(
            function.depends_on,
            Some(DependsOn::Single("Queue".to_string()))
        );
    }

    #[test]
    fn parses_json_template() {
        let doc = parse_str(
            r#"{"Resources": {"B": {"Type": "AWS::S3::Bucket", "Properties": {"Tags": []}}}}"#,
        )
        .unwrap();
        assert!(doc.resource("B").unwrap().is_type("AWS::S3::Bucket"));
    }

    #[test]
    fn self_referencing_resource_is_legal() {
        let doc = parse_str(
            "Resources:\n  A:\n    Type: AWS::IAM::Role\n    Properties:\n      Name: !Ref A\n",
        )
        .unwrap();
        assert!(doc.resource("A").is_some());
    }

    #[test]
    fn rejects_non_mapping_root() {
        assert!(matches!(
            parse_str("- just\n- a\n- list\n"),
            Err(ParseError::RootNotMapping)
        ));
    }

    #[test]
    fn rejects_unknown_top_level_section() {
        assert!(matches!(
            parse_str("Resourcez:\n  A:\n    Type: X\n"),
            Err(ParseError::UnknownSection(name)) if name == "Resourcez"
        ));
    }

    #[test]
    fn rejects_resource_without_type() {
        assert!(matches!(
            parse_str("Resources:\n  A:\n    Properties: {}\n"),
            Err(ParseError::MissingResourceType(id)) if id == "A"
        ));
    }

    #[test]
    fn rejects_malformed_yaml() {
        assert!(matches!(
            parse_str("Resources: [unclosed"),
            Err(ParseError::InvalidYaml(_))
        ));
    }
}
