//! Document integration: walk the folded document, decide placement for
//! every code asset, and rewrite code-location properties relative to the
//! output document's final location.

use std::path::{Path, PathBuf};

use samify_plan::{AssetPlacement, RefactorPlan};
use samify_template::{Resource, TemplateDocument, TemplateValue};

use crate::planner::{AssetPlanner, AssetSource, PlannedLocation, RemoteFetcher};
use crate::{AssetError, PlacementPolicy};

/// Plan placement for every function and layer asset in the document.
///
/// # Errors
/// [`AssetError::Unavailable`] when a required asset's bytes cannot be
/// obtained; the document is not usable for output in that case.
pub fn plan_document(
    doc: &mut TemplateDocument,
    planner: &mut AssetPlanner,
    search_roots: &[PathBuf],
    fetcher: Option<&dyn RemoteFetcher>,
    plan: &mut RefactorPlan,
) -> Result<(), AssetError> {
    let targets: Vec<(String, &'static str)> = doc
        .resources
        .iter()
        .filter_map(|(id, resource)| match resource.resource_type.as_str() {
            "AWS::Serverless::Function" => Some((id.clone(), "CodeUri")),
            "AWS::Serverless::LayerVersion" => Some((id.clone(), "ContentUri")),
            _ => None,
        })
        .collect();

    for (logical_id, uri_key) in targets {
        let Some(resource) = doc.resource(&logical_id) else {
            continue;
        };
        let Some(source) = asset_source(resource, uri_key, search_roots) else {
            continue;
        };
        match &source {
            Ok(source) => {
                let location = planner.place(&logical_id, source, fetcher)?;
                apply_location(doc, &logical_id, uri_key, &location, plan);
            }
            Err(missing) => {
                return Err(AssetError::Unavailable {
                    logical_id: logical_id.clone(),
                    reason: format!("code location {missing} resolves to no local file"),
                });
            }
        }
    }
    Ok(())
}

/// The asset behind a function/layer, or `None` when there is nothing to
/// plan (no code, or a location this planner passes through).
/// `Some(Err(path))` marks a local path that resolved nowhere.
fn asset_source(
    resource: &Resource,
    uri_key: &str,
    search_roots: &[PathBuf],
) -> Option<Result<AssetSource, String>> {
    if let Some(TemplateValue::String(payload)) = resource.prop("InlineCode") {
        return Some(Ok(AssetSource::Inline {
            payload: payload.clone(),
            file_name: inline_file_name(resource),
        }));
    }
    match resource.prop(uri_key)? {
        TemplateValue::String(location) => {
            if location.starts_with("s3://") {
                return None;
            }
            match resolve_local(location, search_roots) {
                Some(path) => Some(Ok(AssetSource::Local(path))),
                None => Some(Err(location.clone())),
            }
        }
        TemplateValue::Mapping(map) => {
            let bucket = map.get("Bucket").and_then(TemplateValue::as_str)?;
            let key = map.get("Key").and_then(TemplateValue::as_str)?;
            let version = map
                .get("Version")
                .and_then(TemplateValue::as_str)
                .map(str::to_string);
            Some(Ok(AssetSource::Remote {
                bucket: bucket.to_string(),
                key: key.to_string(),
                version,
            }))
        }
        _ => None,
    }
}

fn apply_location(
    doc: &mut TemplateDocument,
    logical_id: &str,
    uri_key: &str,
    location: &PlannedLocation,
    plan: &mut RefactorPlan,
) {
    match location {
        PlannedLocation::Inline => {
            plan.record_asset(logical_id, AssetPlacement::Inline);
        }
        PlannedLocation::Staged(path) => {
            if let Some(resource) = doc.resource_mut(logical_id) {
                resource.properties.shift_remove("InlineCode");
                resource
                    .properties
                    .insert(uri_key.to_string(), TemplateValue::string(path.clone()));
                // CodeUri reads best right after the type tag.
                if let Some(index) = resource.properties.get_index_of(uri_key) {
                    resource.properties.move_index(index, 0);
                }
            }
            plan.record_asset(
                logical_id,
                AssetPlacement::Staged { path: path.clone() },
            );
        }
        PlannedLocation::Remote => {}
    }
}

fn resolve_local(location: &str, search_roots: &[PathBuf]) -> Option<PathBuf> {
    let candidate = Path::new(location);
    if candidate.is_absolute() {
        return candidate.exists().then(|| candidate.to_path_buf());
    }
    for root in search_roots {
        let resolved = root.join(candidate);
        if resolved.exists() {
            return Some(resolved);
        }
    }
    candidate.exists().then(|| candidate.to_path_buf())
}

/// File name for a materialized inline payload, derived from the handler
/// and the runtime's extension (`index.handler` + `python3.12` ->
/// `index.py`).
#[must_use]
pub fn inline_file_name(resource: &Resource) -> String {
    let handler = resource
        .prop("Handler")
        .and_then(TemplateValue::as_str)
        .unwrap_or("index.handler");
    let base = handler
        .split("::")
        .next()
        .and_then(|part| part.split('.').next())
        .map(|part| part.rsplit('/').next().unwrap_or(part))
        .unwrap_or("index");
    let base: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let base = if base.is_empty() { "index".to_string() } else { base };

    let runtime = resource
        .prop("Runtime")
        .and_then(TemplateValue::as_str)
        .unwrap_or("");
    let extension = runtime_extension(runtime);
    format!("{base}{extension}")
}

fn runtime_extension(runtime: &str) -> &'static str {
    let lowered = runtime.to_ascii_lowercase();
    if lowered.starts_with("python") {
        ".py"
    } else if lowered.starts_with("nodejs") {
        ".js"
    } else if lowered.starts_with("ruby") {
        ".rb"
    } else if lowered.starts_with("dotnet") {
        ".cs"
    } else if lowered.starts_with("go") {
        ".go"
    } else if lowered.starts_with("java") {
        ".java"
    } else if lowered.contains("provided") {
        ".txt"
    } else {
        ".js"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use samify_template::parse_str;

    fn function_doc(extra_props: &str) -> TemplateDocument {
        parse_str(&format!(
            "Transform: AWS::Serverless-2016-10-31\nResources:\n  Fn:\n    Type: AWS::Serverless::Function\n    Properties:\n      Handler: app.handler\n      Runtime: python3.12\n{extra_props}"
        ))
        .unwrap()
    }

    #[test]
    fn inline_payload_stays_inline_by_default() {
        let mut doc = function_doc("      InlineCode: \"print(1)\"\n");
        let mut planner = AssetPlanner::new("src", PlacementPolicy::PreferInline);
        let mut plan = RefactorPlan::new();
        plan_document(&mut doc, &mut planner, &[], None, &mut plan).unwrap();

        let function = doc.resource("Fn").unwrap();
        assert!(function.prop("InlineCode").is_some());
        assert!(function.prop("CodeUri").is_none());
    }

    #[test]
    fn inline_payload_externalizes_on_opt_in() {
        let mut doc = function_doc("      InlineCode: \"print(1)\"\n");
        let mut planner = AssetPlanner::new("src", PlacementPolicy::PreferExternal);
        let mut plan = RefactorPlan::new();
        plan_document(&mut doc, &mut planner, &[], None, &mut plan).unwrap();

        let function = doc.resource("Fn").unwrap();
        assert!(function.prop("InlineCode").is_none());
        assert_eq!(function.prop("CodeUri").unwrap().as_str(), Some("src/Fn"));
        assert_eq!(planner.staged()[0].relative_path, "src/Fn");
        // Handler + runtime pick the staged file name.
        let out = tempfile::tempdir().unwrap();
        planner.commit(out.path()).unwrap();
        assert!(out.path().join("src/Fn/app.py").is_file());
    }

    #[test]
    fn local_asset_path_is_resolved_and_rewritten() {
        let assets = tempfile::tempdir().unwrap();
        let asset_dir = assets.path().join("asset.abc123");
        std::fs::create_dir(&asset_dir).unwrap();
        std::fs::write(asset_dir.join("app.py"), "print(1)").unwrap();

        let mut doc = function_doc("      CodeUri: asset.abc123\n");
        let mut planner = AssetPlanner::new("src", PlacementPolicy::PreferInline);
        let mut plan = RefactorPlan::new();
        plan_document(
            &mut doc,
            &mut planner,
            &[assets.path().to_path_buf()],
            None,
            &mut plan,
        )
        .unwrap();

        let function = doc.resource("Fn").unwrap();
        assert_eq!(function.prop("CodeUri").unwrap().as_str(), Some("src/Fn"));
    }

    #[test]
    fn unresolvable_asset_path_aborts() {
        let mut doc = function_doc("      CodeUri: asset.missing\n");
        let mut planner = AssetPlanner::new("src", PlacementPolicy::PreferInline);
        let mut plan = RefactorPlan::new();
        let err = plan_document(&mut doc, &mut planner, &[], None, &mut plan).unwrap_err();
        assert!(matches!(err, AssetError::Unavailable { .. }));
    }

    #[test]
    fn remote_code_passes_through_under_prefer_inline() {
        let mut doc = function_doc("      CodeUri:\n        Bucket: assets\n        Key: fn.zip\n");
        let mut planner = AssetPlanner::new("src", PlacementPolicy::PreferInline);
        let mut plan = RefactorPlan::new();
        plan_document(&mut doc, &mut planner, &[], None, &mut plan).unwrap();
        let function = doc.resource("Fn").unwrap();
        assert!(function.prop("CodeUri").unwrap().as_mapping().is_some());
    }
}
