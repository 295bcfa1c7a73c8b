//! REST shell folding: an emptied-out proxy API (catch-all resource, CORS
//! preflight method, deployment/stage pair) collapses into one
//! `AWS::Serverless::Api` carrying the stage name and a Cors block equal to
//! the original preflight headers.

use samify_plan::{LossNote, RefactorPlan};
use samify_template::{
    DependencyGraph, Intrinsic, RefKind, Resource, Section, SubSegment, TemplateDocument,
    TemplateValue, ValueMap,
};

use crate::helpers;
use crate::rule::{FoldClaim, FoldRule, MatchContext};
use crate::FOLD_REST_SHELL;

/// RestApi property keys carried over onto the serverless API unchanged.
const CARRIED_PROPS: [&str; 17] = [
    "Name",
    "Description",
    "FailOnWarnings",
    "EndpointConfiguration",
    "BinaryMediaTypes",
    "MinimumCompressionSize",
    "AccessLogSetting",
    "CanarySetting",
    "Mode",
    "ApiKeySourceType",
    "Policy",
    "OpenApiVersion",
    "Models",
    "Domain",
    "AlwaysDeploy",
    "PropagateTags",
    "Tags",
];

pub struct RestShellFold;

impl FoldRule for RestShellFold {
    fn name(&self) -> &'static str {
        FOLD_REST_SHELL
    }

    fn priority(&self) -> u32 {
        30
    }

    fn claims(&self, ctx: &MatchContext<'_>) -> Vec<FoldClaim> {
        ctx.doc
            .resources_of_type("AWS::ApiGateway::RestApi")
            .into_iter()
            .filter_map(|api_id| {
                match_shell(ctx.doc, ctx.index, ctx.graph, &api_id).map(|shell| FoldClaim {
                    anchor: api_id,
                    consumed: shell.consumed(),
                })
            })
            .collect()
    }

    fn rewrite(
        &self,
        doc: &mut TemplateDocument,
        claim: &FoldClaim,
        plan: &mut RefactorPlan,
    ) -> bool {
        let index = samify_template::ReferenceIndex::build(doc);
        let graph = DependencyGraph::build(doc, &index);
        let Some(shell) = match_shell(doc, &index, &graph, &claim.anchor) else {
            return false;
        };

        let Some(api) = doc.resource_mut(&claim.anchor) else {
            return false;
        };
        let old_props = std::mem::take(&mut api.properties);
        let mut props = ValueMap::new();
        for key in CARRIED_PROPS {
            if let Some(value) = old_props.get(key) {
                props.insert(key.to_string(), value.clone());
            }
        }
        for key in ["DefinitionBody", "DefinitionUri"] {
            if let Some(value) = old_props.get(key) {
                props.insert(key.to_string(), value.clone());
            }
        }
        if let Some(stage_name) = &shell.stage_name {
            props.insert("StageName".to_string(), TemplateValue::string(stage_name.clone()));
        }
        if let Some(cors) = &shell.cors {
            props.insert("Cors".to_string(), cors.to_value());
        }
        let dropped: Vec<String> = old_props
            .keys()
            .filter(|key| {
                !CARRIED_PROPS.contains(&key.as_str())
                    && key.as_str() != "DefinitionBody"
                    && key.as_str() != "DefinitionUri"
            })
            .cloned()
            .collect();
        api.resource_type = "AWS::Serverless::Api".to_string();
        api.properties = props;

        let removals: Vec<String> = shell
            .consumed()
            .into_iter()
            .filter(|id| id != &claim.anchor)
            .collect();
        doc.remove_resources(&removals);

        let mut notes = Vec::new();
        if !dropped.is_empty() {
            notes.push(LossNote::info(
                claim.anchor.clone(),
                format!("properties implied by the serverless form dropped: {dropped:?}"),
            ));
        }
        if let Some(stage_name) = &shell.stage_name {
            rewrite_stage_references(doc, &shell.stages, stage_name);
            notes.push(LossNote::info(
                shell.stages.join(","),
                format!("deployment/stage pair collapsed into StageName {stage_name}"),
            ));
        }
        if shell.cors.is_some() {
            notes.push(LossNote::info(
                shell.cors_methods.join(","),
                "CORS preflight boilerplate replaced by the Cors block",
            ));
        }

        plan.record_fold(
            self.name(),
            claim.consumed.clone(),
            vec![claim.anchor.clone()],
            notes,
        );
        true
    }
}

struct CorsConfig {
    allow_origin: String,
    allow_headers: Option<String>,
    allow_methods: Option<String>,
}

impl CorsConfig {
    fn to_value(&self) -> TemplateValue {
        let mut cors = ValueMap::new();
        cors.insert(
            "AllowOrigin".to_string(),
            TemplateValue::string(self.allow_origin.clone()),
        );
        if let Some(headers) = &self.allow_headers {
            cors.insert(
                "AllowHeaders".to_string(),
                TemplateValue::string(headers.clone()),
            );
        }
        if let Some(methods) = &self.allow_methods {
            cors.insert(
                "AllowMethods".to_string(),
                TemplateValue::string(methods.clone()),
            );
        }
        TemplateValue::Mapping(cors)
    }
}

struct ShellMatch {
    api_id: String,
    cors: Option<CorsConfig>,
    cors_methods: Vec<String>,
    child_resources: Vec<String>,
    permissions: Vec<String>,
    deployments: Vec<String>,
    stages: Vec<String>,
    stage_name: Option<String>,
}

impl ShellMatch {
    fn consumed(&self) -> Vec<String> {
        let mut out = vec![self.api_id.clone()];
        out.extend(self.cors_methods.iter().cloned());
        out.extend(self.child_resources.iter().cloned());
        out.extend(self.permissions.iter().cloned());
        out.extend(self.deployments.iter().cloned());
        out.extend(self.stages.iter().cloned());
        out
    }
}

fn match_shell(
    doc: &TemplateDocument,
    index: &samify_template::ReferenceIndex,
    graph: &DependencyGraph,
    api_id: &str,
) -> Option<ShellMatch> {
    let paths = helpers::api_resource_paths(doc);

    // Every remaining method must be a consistent CORS preflight; anything
    // else means the API is still in use and the shell stays.
    let mut cors_methods = Vec::new();
    let mut origin: Option<String> = None;
    let mut headers: Option<String> = None;
    let mut methods: Option<String> = None;
    let mut has_root_cors = false;
    for (method_id, resource) in &doc.resources {
        if !resource.is_type("AWS::ApiGateway::Method") {
            continue;
        }
        if !prop_names(resource, "RestApiId", api_id) {
            continue;
        }
        let is_options = resource
            .prop("HttpMethod")
            .and_then(TemplateValue::as_str)
            .map_or(false, |m| m.eq_ignore_ascii_case("OPTIONS"));
        if !is_options {
            return None;
        }
        let (o, h, m) = preflight_headers(resource.prop("Integration")?)?;
        if !merge(&mut origin, Some(o)) || !merge(&mut headers, h) || !merge(&mut methods, m) {
            return None;
        }
        if let Some(resource_id) = resource.prop("ResourceId") {
            if helpers::resolve_method_path(resource_id, &paths).as_deref() == Some("/") {
                has_root_cors = true;
            }
        }
        cors_methods.push(method_id.clone());
    }

    let cors = if cors_methods.is_empty() {
        None
    } else {
        let allow_origin = origin.filter(|_| has_root_cors)?;
        Some(CorsConfig {
            allow_origin,
            allow_headers: headers,
            allow_methods: methods,
        })
    };

    let child_resources: Vec<String> = doc
        .resources
        .iter()
        .filter(|(_, res)| {
            res.is_type("AWS::ApiGateway::Resource") && prop_names(res, "RestApiId", api_id)
        })
        .map(|(id, _)| id.clone())
        .collect();

    let permissions: Vec<String> = doc
        .resources
        .iter()
        .filter(|(_, res)| res.is_type("AWS::Lambda::Permission"))
        .filter(|(_, res)| helpers::principal_is(&res.properties, "apigateway.amazonaws.com"))
        .filter(|(_, res)| {
            res.prop("SourceArn")
                .map_or(false, |arn| helpers::source_refers_to(arn, api_id))
        })
        .map(|(id, _)| id.clone())
        .collect();

    let mut deployments = Vec::new();
    let mut stages = Vec::new();
    for (id, resource) in &doc.resources {
        if resource.is_type("AWS::ApiGateway::Deployment") && prop_names(resource, "RestApiId", api_id) {
            deployments.push(id.clone());
        }
        if resource.is_type("AWS::ApiGateway::Stage") && prop_names(resource, "RestApiId", api_id) {
            stages.push(id.clone());
        }
    }
    // A stage of another API pinned to one of our deployments blocks the fold.
    for (_, resource) in &doc.resources {
        if !resource.is_type("AWS::ApiGateway::Stage") || prop_names(resource, "RestApiId", api_id) {
            continue;
        }
        if let Some(dep) = resource
            .prop("DeploymentId")
            .and_then(TemplateValue::referenced_id)
        {
            if deployments.iter().any(|d| d == dep) {
                return None;
            }
        }
    }

    let stage_name = stages.iter().find_map(|stage_id| {
        doc.resource(stage_id)?
            .prop("StageName")
            .and_then(TemplateValue::as_str)
            .map(str::to_string)
    });

    let shell = ShellMatch {
        api_id: api_id.to_string(),
        cors,
        cors_methods,
        child_resources,
        permissions,
        deployments,
        stages,
        stage_name,
    };

    if blocked(doc, index, graph, &shell) {
        return None;
    }
    Some(shell)
}

/// References that would dangle after the fold block it: anything pointing
/// at the deployments, and stage references that cannot be replaced by the
/// literal stage name (`Ref` and `Sub` can; `GetAtt` cannot).
fn blocked(
    doc: &TemplateDocument,
    index: &samify_template::ReferenceIndex,
    graph: &DependencyGraph,
    shell: &ShellMatch,
) -> bool {
    let consumed = shell.consumed();
    let survives = |owner: Option<&str>, section: Section| {
        section != Section::Resources || owner.map_or(true, |o| !consumed.contains(&o.to_string()))
    };

    for target in &shell.deployments {
        for site in index.sites_for(target) {
            if site.kind == RefKind::DependsOn {
                continue;
            }
            if survives(site.path.owner(), site.path.section) {
                return true;
            }
        }
    }
    for target in &shell.stages {
        for site in index.sites_for(target) {
            if site.kind == RefKind::DependsOn {
                continue;
            }
            if !survives(site.path.owner(), site.path.section) {
                continue;
            }
            let rewritable = shell.stage_name.is_some()
                && matches!(site.kind, RefKind::Ref | RefKind::Sub);
            if !rewritable {
                return true;
            }
        }
    }
    // Something other than the shell pieces still leans on the API itself;
    // the dependency graph gives the referrers directly.
    let excluded = [
        "AWS::ApiGateway::Deployment",
        "AWS::ApiGateway::Stage",
        "AWS::ApiGateway::RestApi",
        "AWS::Serverless::Function",
        "AWS::Serverless::Api",
    ];
    for referrer in graph.referrers(&shell.api_id) {
        if consumed.contains(&referrer.to_string()) {
            continue;
        }
        let referrer_type = doc
            .resource(referrer)
            .map(|res| res.resource_type.as_str())
            .unwrap_or_default();
        if !excluded.contains(&referrer_type) {
            return true;
        }
    }
    false
}

fn prop_names(resource: &Resource, key: &str, logical_id: &str) -> bool {
    resource
        .prop(key)
        .and_then(TemplateValue::referenced_id)
        .map_or(false, |id| id == logical_id)
}

/// Accept only the first origin/headers/methods seen; a second distinct
/// value fails the merge.
fn merge(slot: &mut Option<String>, value: Option<String>) -> bool {
    match (slot.as_ref(), value) {
        (_, None) => true,
        (None, Some(value)) => {
            *slot = Some(value);
            true
        }
        (Some(existing), Some(value)) => *existing == value,
    }
}

/// Allow-origin/headers/methods out of a MOCK preflight integration.
fn preflight_headers(
    integration: &TemplateValue,
) -> Option<(String, Option<String>, Option<String>)> {
    let integration = integration.as_mapping()?;
    let kind = integration.get("Type").and_then(TemplateValue::as_str)?;
    if !kind.eq_ignore_ascii_case("MOCK") {
        return None;
    }
    let params = integration
        .get("IntegrationResponses")
        .and_then(TemplateValue::as_sequence)?
        .first()?
        .as_mapping()?
        .get("ResponseParameters")?
        .as_mapping()?;

    let get = |header: &str| {
        params
            .get(&format!("method.response.header.Access-Control-Allow-{header}"))
            .and_then(TemplateValue::as_str)
            .map(str::to_string)
    };
    let origin = get("Origin")?;
    Some((origin, get("Headers"), get("Methods")))
}

/// Replace references to the retired stage resources with the literal stage
/// name: a `Ref` yields the stage name at deploy time, and `${Stage}` tokens
/// inside `Sub` strings read the same way.
fn rewrite_stage_references(doc: &mut TemplateDocument, stages: &[String], stage_name: &str) {
    let mut rewrite = |value: &mut TemplateValue| rewrite_value(value, stages, stage_name);
    for resource in doc.resources.values_mut() {
        for value in resource.properties.values_mut() {
            rewrite(value);
        }
        for value in resource.extra.values_mut() {
            rewrite(value);
        }
    }
    for value in doc.outputs.values_mut() {
        rewrite(value);
    }
    for value in doc.conditions.values_mut() {
        rewrite(value);
    }
    for value in doc.globals.values_mut() {
        rewrite(value);
    }
}

fn rewrite_value(value: &mut TemplateValue, stages: &[String], stage_name: &str) {
    let replace = match value {
        TemplateValue::Sequence(items) => {
            for item in items {
                rewrite_value(item, stages, stage_name);
            }
            false
        }
        TemplateValue::Mapping(map) => {
            for item in map.values_mut() {
                rewrite_value(item, stages, stage_name);
            }
            false
        }
        TemplateValue::Intrinsic(node) => match node.as_mut() {
            Intrinsic::Ref(name) => stages.iter().any(|stage| stage == name),
            Intrinsic::Sub {
                template,
                variables,
            } => {
                for segment in template.segments_mut() {
                    if let SubSegment::Reference { name, attribute } = segment {
                        if attribute.is_none() && stages.iter().any(|stage| stage == name) {
                            *segment = SubSegment::Literal(stage_name.to_string());
                        }
                    }
                }
                if let Some(vars) = variables {
                    for item in vars.values_mut() {
                        rewrite_value(item, stages, stage_name);
                    }
                }
                false
            }
            Intrinsic::Join { parts, .. } => {
                for part in parts {
                    rewrite_value(part, stages, stage_name);
                }
                false
            }
            Intrinsic::If {
                when_true,
                when_false,
                ..
            } => {
                rewrite_value(when_true, stages, stage_name);
                rewrite_value(when_false, stages, stage_name);
                false
            }
            Intrinsic::ImportValue(payload) | Intrinsic::Other { payload, .. } => {
                rewrite_value(payload, stages, stage_name);
                false
            }
            Intrinsic::GetAtt { .. } | Intrinsic::Condition(_) => false,
        },
        _ => false,
    };
    if replace {
        *value = TemplateValue::string(stage_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::PatternLibrary;
    use pretty_assertions::assert_eq;
    use samify_template::parse_str;

    const SHELL: &str = r#"
Resources:
  Api:
    Type: AWS::ApiGateway::RestApi
    Properties:
      Name: demo-api
  ProxyResource:
    Type: AWS::ApiGateway::Resource
    Properties:
      RestApiId: !Ref Api
      ParentId: !GetAtt Api.RootResourceId
      PathPart: '{proxy+}'
  RootPreflight:
    Type: AWS::ApiGateway::Method
    Properties:
      RestApiId: !Ref Api
      ResourceId: !GetAtt Api.RootResourceId
      HttpMethod: OPTIONS
      AuthorizationType: NONE
      Integration:
        Type: MOCK
        IntegrationResponses:
          - StatusCode: '204'
            ResponseParameters:
              method.response.header.Access-Control-Allow-Origin: "'*'"
              method.response.header.Access-Control-Allow-Headers: "'Content-Type,Authorization'"
              method.response.header.Access-Control-Allow-Methods: "'GET,POST,OPTIONS'"
  Deployment:
    Type: AWS::ApiGateway::Deployment
    DependsOn: RootPreflight
    Properties:
      RestApiId: !Ref Api
  ProdStage:
    Type: AWS::ApiGateway::Stage
    Properties:
      RestApiId: !Ref Api
      DeploymentId: !Ref Deployment
      StageName: prod
Outputs:
  Endpoint:
    Value: !Sub 'https://${Api}.execute-api.${AWS::Region}.amazonaws.com/${ProdStage}/'
"#;

    fn fold(doc: &mut TemplateDocument) -> RefactorPlan {
        let mut plan = RefactorPlan::new();
        PatternLibrary::with_rules(vec![Box::new(RestShellFold)])
            .fold(doc, &mut plan)
            .unwrap();
        plan
    }

    #[test]
    fn shell_collapses_to_serverless_api_with_stage_and_cors() {
        let mut doc = parse_str(SHELL).unwrap();
        fold(&mut doc);

        for gone in ["ProxyResource", "RootPreflight", "Deployment", "ProdStage"] {
            assert!(doc.resource(gone).is_none(), "{gone} should be consumed");
        }
        let api = doc.resource("Api").unwrap();
        assert_eq!(api.resource_type, "AWS::Serverless::Api");
        assert_eq!(api.prop("StageName").unwrap().as_str(), Some("prod"));
        let cors = api.prop("Cors").unwrap().as_mapping().unwrap();
        assert_eq!(cors.get("AllowOrigin").unwrap().as_str(), Some("'*'"));
        assert_eq!(
            cors.get("AllowHeaders").unwrap().as_str(),
            Some("'Content-Type,Authorization'")
        );
        assert_eq!(
            cors.get("AllowMethods").unwrap().as_str(),
            Some("'GET,POST,OPTIONS'")
        );
    }

    #[test]
    fn stage_references_become_the_literal_stage_name() {
        let mut doc = parse_str(SHELL).unwrap();
        fold(&mut doc);
        let endpoint = doc
            .outputs
            .get("Endpoint")
            .and_then(TemplateValue::as_mapping)
            .and_then(|map| map.get("Value"))
            .unwrap();
        match endpoint.as_intrinsic() {
            Some(Intrinsic::Sub { template, .. }) => assert_eq!(
                template.render(),
                "https://${Api}.execute-api.${AWS::Region}.amazonaws.com/prod/"
            ),
            other => panic!("unexpected output value: {other:?}"),
        }
    }

    #[test]
    fn shell_with_live_methods_is_not_folded() {
        let live = SHELL.replace("HttpMethod: OPTIONS", "HttpMethod: GET");
        let mut doc = parse_str(&live).unwrap();
        let plan = fold(&mut doc);
        assert_eq!(doc.resource("Api").unwrap().resource_type, "AWS::ApiGateway::RestApi");
        assert!(plan.folds().next().is_none());
    }

    #[test]
    fn referenced_shell_is_not_folded() {
        let extra = "
  UsagePlan:
    Type: AWS::ApiGateway::UsagePlan
    Properties:
      ApiStages:
        - ApiId: !Ref Api
          Stage: !Ref ProdStage
";
        let mut doc = parse_str(&format!("{SHELL}{extra}")).unwrap();
        let plan = fold(&mut doc);
        assert_eq!(doc.resource("Api").unwrap().resource_type, "AWS::ApiGateway::RestApi");
        assert!(plan.folds().next().is_none());
    }
}
