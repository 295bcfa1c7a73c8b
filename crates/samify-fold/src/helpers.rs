//! Shared machinery for fold rules: reference extraction over the URI shapes
//! API integrations use, event-name allocation, and permission lookups.

use indexmap::IndexMap;

use samify_template::{
    Intrinsic, Resource, SubSegment, TemplateDocument, TemplateValue, ValueMap,
};

/// The function a value points at, across the shapes integrations use:
/// `Ref`/`GetAtt`, a `Sub` whose first reference carries `.Arn`, a `Join`
/// with an embedded `GetAtt`, or a raw invocation-ARN string.
#[must_use]
pub(crate) fn function_from_uri(value: &TemplateValue) -> Option<String> {
    if let TemplateValue::String(uri) = value {
        return function_from_literal_uri(uri);
    }
    if let Some(id) = value.referenced_id() {
        if !id.contains(':') {
            return Some(id.to_string());
        }
    }
    match value.as_intrinsic()? {
        Intrinsic::Sub { template, .. } => template.segments().find_map(|segment| {
            match segment {
                SubSegment::Reference {
                    name,
                    attribute: Some(attr),
                } if attr == "Arn" => Some(name.clone()),
                _ => None,
            }
        }),
        Intrinsic::Join { parts, .. } => parts.iter().find_map(|part| {
            match part.as_intrinsic() {
                Some(Intrinsic::GetAtt { logical_id, .. }) => Some(logical_id.clone()),
                _ => None,
            }
        }),
        _ => None,
    }
}

/// Parse `.../functions/<Name>/invocations` out of a literal URI.
#[must_use]
pub(crate) fn function_from_literal_uri(uri: &str) -> Option<String> {
    let (_, rest) = uri.split_once("functions/")?;
    let (name, _) = rest.split_once("/invocations")?;
    name.chars()
        .all(|c| c.is_ascii_alphanumeric())
        .then(|| name.to_string())
}

/// True when the resource is a function the fold pass owns: a Lambda function
/// that will fold, or one that already has.
#[must_use]
pub(crate) fn is_foldable_function(resource: &Resource) -> bool {
    resource.is_type("AWS::Lambda::Function") || resource.is_type("AWS::Serverless::Function")
}

/// Allocate an unused event name from a base, suffixing with a counter.
#[must_use]
pub(crate) fn allocate_event_name(events: &ValueMap, base: &str) -> String {
    if !events.contains_key(base) {
        return base.to_string();
    }
    let mut counter = 1usize;
    loop {
        let candidate = format!("{base}{counter}");
        if !events.contains_key(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// Attach an event block to a function resource under `Properties.Events`.
pub(crate) fn attach_event(function: &mut Resource, base_name: &str, event: TemplateValue) {
    let events = function
        .properties
        .entry("Events".to_string())
        .or_insert_with(TemplateValue::mapping);
    if let Some(events) = events.as_mapping_mut() {
        let name = allocate_event_name(events, base_name);
        events.insert(name, event);
    }
}

/// Build an event value: `{Type, Properties}`.
#[must_use]
pub(crate) fn event_value(event_type: &str, properties: ValueMap) -> TemplateValue {
    let mut event = ValueMap::new();
    event.insert("Type".to_string(), TemplateValue::string(event_type));
    event.insert("Properties".to_string(), TemplateValue::Mapping(properties));
    TemplateValue::Mapping(event)
}

/// Invoke permissions attached to `function_id` whose source matches the
/// given predicate over the permission's properties.
pub(crate) fn find_permissions<F>(doc: &TemplateDocument, function_id: &str, matches: F) -> Vec<String>
where
    F: Fn(&ValueMap) -> bool,
{
    doc.resources
        .iter()
        .filter(|(_, resource)| resource.is_type("AWS::Lambda::Permission"))
        .filter(|(_, resource)| {
            resource
                .prop("FunctionName")
                .and_then(TemplateValue::referenced_id)
                .map_or(false, |id| id == function_id)
        })
        .filter(|(_, resource)| matches(&resource.properties))
        .map(|(id, _)| id.clone())
        .collect()
}

/// A permission principal check.
#[must_use]
pub(crate) fn principal_is(props: &ValueMap, service: &str) -> bool {
    props
        .get("Principal")
        .and_then(TemplateValue::as_str)
        .map_or(false, |principal| principal == service)
}

/// Lowercased JSON fingerprint of a value, used for ARN-shape heuristics
/// when the referenced resource is not in the document.
#[must_use]
pub(crate) fn value_fingerprint(value: &TemplateValue) -> String {
    value.to_json().to_string().to_lowercase()
}

/// True when a `SourceArn`-style value names the given logical ID anywhere.
#[must_use]
pub(crate) fn source_refers_to(value: &TemplateValue, logical_id: &str) -> bool {
    value.mentions(logical_id)
}

/// Resource paths for every `AWS::ApiGateway::Resource`, resolved through
/// the parent chain; the REST root is `/`.
#[must_use]
pub(crate) fn api_resource_paths(doc: &TemplateDocument) -> IndexMap<String, String> {
    let mut cache: IndexMap<String, String> = IndexMap::new();
    for logical_id in doc.resources_of_type("AWS::ApiGateway::Resource") {
        resolve_path(doc, &logical_id, &mut cache, 0);
    }
    cache
}

fn resolve_path(
    doc: &TemplateDocument,
    logical_id: &str,
    cache: &mut IndexMap<String, String>,
    depth: usize,
) -> Option<String> {
    // Parent chains are short; the depth guard only protects against a
    // malformed self-parenting resource.
    if depth > 32 {
        return None;
    }
    if let Some(path) = cache.get(logical_id) {
        return Some(path.clone());
    }
    let resource = doc.resource(logical_id)?;
    if !resource.is_type("AWS::ApiGateway::Resource") {
        return None;
    }
    let parent = resource.prop("ParentId")?;
    let parent_path = if is_root_resource_ref(parent) {
        "/".to_string()
    } else {
        let parent_id = parent.referenced_id()?.to_string();
        resolve_path(doc, &parent_id, cache, depth + 1)?
    };
    let path_part = resource.prop("PathPart").and_then(TemplateValue::as_str)?;
    let path = join_paths(&parent_path, path_part);
    cache.insert(logical_id.to_string(), path.clone());
    Some(path)
}

/// `!GetAtt Api.RootResourceId` in any of its forms.
#[must_use]
pub(crate) fn is_root_resource_ref(value: &TemplateValue) -> bool {
    matches!(
        value.as_intrinsic(),
        Some(Intrinsic::GetAtt { attribute, .. }) if attribute == "RootResourceId"
    )
}

fn join_paths(parent: &str, child: &str) -> String {
    if child.is_empty() {
        return parent.to_string();
    }
    if parent == "/" {
        return format!("/{child}");
    }
    format!("{}/{child}", parent.trim_end_matches('/'))
}

/// The method path for an `AWS::ApiGateway::Method` `ResourceId` value.
#[must_use]
pub(crate) fn resolve_method_path(
    resource_id: &TemplateValue,
    paths: &IndexMap<String, String>,
) -> Option<String> {
    if is_root_resource_ref(resource_id) {
        return Some("/".to_string());
    }
    let target = resource_id.referenced_id()?;
    paths.get(target).cloned()
}

/// CamelCase event-name fragment for a method path (`/items/{id}` ->
/// `ItemsId`).
#[must_use]
pub(crate) fn path_event_fragment(path: &str) -> String {
    let mut out = String::new();
    for word in path.split(|c: char| !c.is_ascii_alphanumeric()) {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.push(first.to_ascii_uppercase());
            out.extend(chars);
        }
    }
    if out.is_empty() {
        "Root".to_string()
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use samify_template::parse_str;

    #[test]
    fn function_from_uri_handles_sub_and_getatt() {
        let doc = parse_str(
            r"
Resources:
  M:
    Type: X
    Properties:
      A: !GetAtt Fn.Arn
      B: !Sub 'arn:${AWS::Partition}:apigateway:${AWS::Region}:lambda:path/2015-03-31/functions/${Fn.Arn}/invocations'
      C: !Join ['', ['arn:', !GetAtt Fn.Arn, '/invocations']]
",
        )
        .unwrap();
        let m = doc.resource("M").unwrap();
        for key in ["A", "B", "C"] {
            assert_eq!(
                function_from_uri(m.prop(key).unwrap()).as_deref(),
                Some("Fn"),
                "key {key}"
            );
        }
    }

    #[test]
    fn literal_invocation_uri_parses() {
        assert_eq!(
            function_from_literal_uri(
                "arn:aws:apigateway:us-east-1:lambda:path/2015-03-31/functions/Handler/invocations"
            )
            .as_deref(),
            Some("Handler")
        );
        assert_eq!(function_from_literal_uri("no match"), None);
    }

    #[test]
    fn event_names_stay_unique() {
        let mut events = ValueMap::new();
        events.insert("Queue".to_string(), TemplateValue::Null);
        events.insert("Queue1".to_string(), TemplateValue::Null);
        assert_eq!(allocate_event_name(&events, "Queue"), "Queue2");
        assert_eq!(allocate_event_name(&events, "Fresh"), "Fresh");
    }

    #[test]
    fn api_paths_resolve_through_parents() {
        let doc = parse_str(
            r"
Resources:
  Api:
    Type: AWS::ApiGateway::RestApi
  Proxy:
    Type: AWS::ApiGateway::Resource
    Properties:
      ParentId: !GetAtt Api.RootResourceId
      PathPart: '{proxy+}'
  Nested:
    Type: AWS::ApiGateway::Resource
    Properties:
      ParentId: !Ref Proxy
      PathPart: deep
",
        )
        .unwrap();
        let paths = api_resource_paths(&doc);
        assert_eq!(paths.get("Proxy").map(String::as_str), Some("/{proxy+}"));
        assert_eq!(
            paths.get("Nested").map(String::as_str),
            Some("/{proxy+}/deep")
        );
    }

    #[test]
    fn path_fragments_are_camel_case() {
        assert_eq!(path_event_fragment("/"), "Root");
        assert_eq!(path_event_fragment("/{proxy+}"), "Proxy");
        assert_eq!(path_event_fragment("/items/{id}"), "ItemsId");
    }
}
