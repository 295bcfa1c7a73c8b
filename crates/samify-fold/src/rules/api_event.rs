//! API method folding: an `AWS::ApiGateway::Method` with a lambda proxy
//! integration becomes an `Api` event on the integrated function; the
//! paired invoke permission goes with it.

use samify_plan::RefactorPlan;
use samify_template::{Resource, TemplateDocument, TemplateValue, ValueMap};

use crate::helpers;
use crate::rule::{FoldClaim, FoldRule, MatchContext};
use crate::FOLD_API_EVENT;

pub struct ApiEventFold;

impl FoldRule for ApiEventFold {
    fn name(&self) -> &'static str {
        FOLD_API_EVENT
    }

    fn priority(&self) -> u32 {
        25
    }

    fn claims(&self, ctx: &MatchContext<'_>) -> Vec<FoldClaim> {
        let paths = helpers::api_resource_paths(ctx.doc);
        let mut claims = Vec::new();
        for (logical_id, resource) in &ctx.doc.resources {
            let Some(fold) = match_method(ctx.doc, resource, &paths) else {
                continue;
            };
            let mut consumed = vec![logical_id.clone()];
            consumed.extend(api_permissions(ctx.doc, &fold.function_id, fold.api_id.as_deref()));
            claims.push(FoldClaim {
                anchor: logical_id.clone(),
                consumed,
            });
        }
        claims
    }

    fn rewrite(
        &self,
        doc: &mut TemplateDocument,
        claim: &FoldClaim,
        plan: &mut RefactorPlan,
    ) -> bool {
        let paths = helpers::api_resource_paths(doc);
        let Some(resource) = doc.resource(&claim.anchor) else {
            return false;
        };
        let Some(fold) = match_method(doc, resource, &paths) else {
            return false;
        };

        let mut props = ValueMap::new();
        if let Some(rest_api_id) = fold.rest_api_value {
            props.insert("RestApiId".to_string(), rest_api_id);
        }
        props.insert("Path".to_string(), TemplateValue::string(fold.path.clone()));
        props.insert("Method".to_string(), TemplateValue::string(fold.method.clone()));
        let event = helpers::event_value("Api", props);

        let Some(function) = doc.resource_mut(&fold.function_id) else {
            return false;
        };
        let base = format!(
            "Api{}{}",
            title_case(&fold.method),
            helpers::path_event_fragment(&fold.path)
        );
        helpers::attach_event(function, &base, event);

        doc.remove_resources(&claim.consumed);
        plan.record_fold(
            self.name(),
            claim.consumed.clone(),
            vec![fold.function_id],
            Vec::new(),
        );
        true
    }
}

struct MethodFold {
    function_id: String,
    api_id: Option<String>,
    rest_api_value: Option<TemplateValue>,
    method: String,
    path: String,
}

fn match_method(
    doc: &TemplateDocument,
    resource: &Resource,
    paths: &indexmap::IndexMap<String, String>,
) -> Option<MethodFold> {
    if !resource.is_type("AWS::ApiGateway::Method") {
        return None;
    }
    let integration = resource.prop("Integration")?.as_mapping()?;
    if let Some(kind) = integration.get("Type").and_then(TemplateValue::as_str) {
        if !kind.eq_ignore_ascii_case("AWS_PROXY") {
            return None;
        }
    }
    let uri = integration.get("Uri").or_else(|| integration.get("IntegrationUri"))?;
    let function_id = helpers::function_from_uri(uri)?;
    if !doc.resource(&function_id).map_or(false, helpers::is_foldable_function) {
        return None;
    }
    let path = helpers::resolve_method_path(resource.prop("ResourceId")?, paths)?;
    let method = resource
        .prop("HttpMethod")
        .and_then(TemplateValue::as_str)
        .unwrap_or("ANY")
        .to_ascii_uppercase();
    let rest_api_value = resource.prop("RestApiId").cloned();
    let api_id = rest_api_value
        .as_ref()
        .and_then(TemplateValue::referenced_id)
        .map(str::to_string);
    Some(MethodFold {
        function_id,
        api_id,
        rest_api_value,
        method,
        path,
    })
}

/// API Gateway invoke permissions for the function, scoped to the folded API
/// when the method named one.
fn api_permissions(
    doc: &TemplateDocument,
    function_id: &str,
    api_id: Option<&str>,
) -> Vec<String> {
    helpers::find_permissions(doc, function_id, |props| {
        if !helpers::principal_is(props, "apigateway.amazonaws.com") {
            return false;
        }
        match (api_id, props.get("SourceArn")) {
            (Some(api_id), Some(source)) => helpers::source_refers_to(source, api_id),
            (None, _) => true,
            (Some(_), None) => false,
        }
    })
}

fn title_case(method: &str) -> String {
    let mut chars = method.chars();
    match chars.next() {
        Some(first) => {
            first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
        }
        None => String::new(),
    }
}
