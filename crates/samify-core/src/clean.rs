//! The clean pass: CDK synthesis residue that should not survive a
//! refactored template: metadata resources, bootstrap scaffolding, v1
//! asset parameters.

use samify_template::{Intrinsic, ReferenceIndex, TemplateDocument, TemplateValue};

/// Remove CDK synthesis residue. Returns `true` when anything changed.
///
/// Asset metadata (`aws:asset:*`) is left in place here because the fold and
/// asset passes still need it; [`strip_synth_metadata`] runs after them.
pub fn clean_document(doc: &mut TemplateDocument) -> bool {
    let mut changed = false;

    // AWS::CDK::Metadata resources and their gating condition.
    let metadata_resources = doc.resources_of_type("AWS::CDK::Metadata");
    if !metadata_resources.is_empty() {
        doc.remove_resources(&metadata_resources);
        changed = true;
    }
    if doc.conditions.contains_key("CDKMetadataAvailable") {
        let index = ReferenceIndex::build(doc);
        if !index.references("CDKMetadataAvailable") {
            doc.conditions.shift_remove("CDKMetadataAvailable");
            changed = true;
        }
    }

    // Bootstrap scaffolding.
    if doc.parameters.shift_remove("BootstrapVersion").is_some() {
        changed = true;
    }
    if doc.rules.shift_remove("CheckBootstrapVersion").is_some() {
        changed = true;
    }

    // CDK v1 asset parameters: drop them and leave readable placeholders at
    // their reference sites.
    let asset_params: Vec<String> = doc
        .parameters
        .keys()
        .filter(|name| name.starts_with("AssetParameters"))
        .cloned()
        .collect();
    if !asset_params.is_empty() {
        for name in &asset_params {
            doc.parameters.shift_remove(name);
        }
        replace_asset_parameter_refs(doc, &asset_params);
        changed = true;
    }

    // Trailing whitespace on inline payloads defeats block-scalar emission.
    for resource in doc.resources.values_mut() {
        if !resource.is_type("AWS::Lambda::Function") {
            continue;
        }
        let Some(TemplateValue::Mapping(code)) = resource.properties.get_mut("Code") else {
            continue;
        };
        if let Some(TemplateValue::String(payload)) = code.get_mut("ZipFile") {
            let trimmed = payload.trim_end().to_string();
            if trimmed != *payload {
                *payload = trimmed;
                changed = true;
            }
        }
    }

    if changed {
        tracing::debug!("clean pass removed CDK synthesis residue");
    }
    changed
}

/// Strip synthesis metadata after the folds that consume it have run:
/// `aws:asset:*` always, `aws:cdk:path` unless asked to keep it.
pub(crate) fn strip_synth_metadata(doc: &mut TemplateDocument, keep_path_metadata: bool) -> bool {
    let mut changed = false;
    for resource in doc.resources.values_mut() {
        let before = resource.metadata.len();
        resource.metadata.retain(|key, _| {
            let asset = key.starts_with("aws:asset") || key.starts_with("aws:cdk:asset");
            let path = key == "aws:cdk:path" && !keep_path_metadata;
            !(asset || path)
        });
        changed |= resource.metadata.len() != before;
    }
    changed
}

fn placeholder(name: &str) -> &'static str {
    if name.ends_with("S3Bucket") {
        "<asset-bucket>"
    } else if name.ends_with("S3VersionKey") {
        "<asset-key>"
    } else if name.ends_with("ArtifactHash") {
        "<asset-hash>"
    } else {
        "<asset-param>"
    }
}

fn replace_asset_parameter_refs(doc: &mut TemplateDocument, params: &[String]) {
    for resource in doc.resources.values_mut() {
        for value in resource.properties.values_mut() {
            replace_refs(value, params);
        }
        for value in resource.extra.values_mut() {
            replace_refs(value, params);
        }
    }
    for value in doc.outputs.values_mut() {
        replace_refs(value, params);
    }
}

fn replace_refs(value: &mut TemplateValue, params: &[String]) {
    let replacement = match value {
        TemplateValue::Sequence(items) => {
            for item in items {
                replace_refs(item, params);
            }
            None
        }
        TemplateValue::Mapping(map) => {
            for item in map.values_mut() {
                replace_refs(item, params);
            }
            None
        }
        TemplateValue::Intrinsic(node) => match node.as_mut() {
            Intrinsic::Ref(name) if params.contains(name) => {
                Some(TemplateValue::string(placeholder(name)))
            }
            Intrinsic::Join { parts, .. } => {
                for part in parts {
                    replace_refs(part, params);
                }
                None
            }
            Intrinsic::If {
                when_true,
                when_false,
                ..
            } => {
                replace_refs(when_true, params);
                replace_refs(when_false, params);
                None
            }
            Intrinsic::Sub { variables, .. } => {
                if let Some(vars) = variables {
                    for item in vars.values_mut() {
                        replace_refs(item, params);
                    }
                }
                None
            }
            Intrinsic::ImportValue(payload) | Intrinsic::Other { payload, .. } => {
                replace_refs(payload, params);
                None
            }
            _ => None,
        },
        _ => None,
    };
    if let Some(replacement) = replacement {
        *value = replacement;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use samify_template::parse_str;

    const CDK_TEMPLATE: &str = r"
Parameters:
  BootstrapVersion:
    Type: AWS::SSM::Parameter::Value<String>
    Default: /cdk-bootstrap/hnb659fds/version
  AssetParametersabcS3Bucket:
    Type: String
Conditions:
  CDKMetadataAvailable: !Equals [a, a]
Rules:
  CheckBootstrapVersion:
    Assertions:
      - Assert: !Not [!Equals [!Ref BootstrapVersion, '1']]
Resources:
  CDKMetadata:
    Type: AWS::CDK::Metadata
    Condition: CDKMetadataAvailable
    Properties:
      Analytics: v2
  Fn:
    Type: AWS::Lambda::Function
    Metadata:
      aws:cdk:path: Stack/Fn/Resource
      aws:asset:path: asset.abc
      aws:asset:property: Code
    Properties:
      Handler: index.handler
      Code:
        S3Bucket: !Ref AssetParametersabcS3Bucket
        S3Key: abc.zip
";

    #[test]
    fn clean_removes_cdk_residue() {
        let mut doc = parse_str(CDK_TEMPLATE).unwrap();
        assert!(clean_document(&mut doc));

        assert!(doc.resource("CDKMetadata").is_none());
        assert!(!doc.conditions.contains_key("CDKMetadataAvailable"));
        assert!(!doc.parameters.contains_key("BootstrapVersion"));
        assert!(doc.rules.is_empty());

        // Asset parameter references collapse to readable placeholders.
        let function = doc.resource("Fn").unwrap();
        let code = function.prop("Code").and_then(TemplateValue::as_mapping).unwrap();
        assert_eq!(code.get("S3Bucket").unwrap().as_str(), Some("<asset-bucket>"));

        // Asset metadata survives the clean pass for the fold to consume.
        assert!(function.asset_path().is_some());
    }

    #[test]
    fn clean_is_a_fixed_point_on_clean_templates() {
        let mut doc = parse_str(CDK_TEMPLATE).unwrap();
        clean_document(&mut doc);
        let once = doc.clone();
        assert!(!clean_document(&mut doc));
        assert_eq!(doc, once);
    }

    #[test]
    fn strip_synth_metadata_honors_keep_flag() {
        let mut doc = parse_str(CDK_TEMPLATE).unwrap();
        strip_synth_metadata(&mut doc, true);
        let function = doc.resource("Fn").unwrap();
        assert!(function.asset_path().is_none());
        assert!(function.cdk_path().is_some());

        strip_synth_metadata(&mut doc, false);
        assert!(doc.resource("Fn").unwrap().cdk_path().is_none());
    }
}
