//! HTTP API shell folding: an `AWS::ApiGatewayV2::Api` with no routes left
//! becomes an `AWS::Serverless::HttpApi`; orphaned integrations and stages
//! go with it.

use samify_plan::{LossNote, RefactorPlan};
use samify_template::{Resource, Section, TemplateDocument, TemplateValue, ValueMap};

use crate::rule::{FoldClaim, FoldRule, MatchContext};
use crate::FOLD_HTTP_SHELL;

const CARRIED_PROPS: [&str; 10] = [
    "Name",
    "Description",
    "FailOnWarnings",
    "CorsConfiguration",
    "DefaultRouteSettings",
    "RouteSettings",
    "StageVariables",
    "Tags",
    "PropagateTags",
    "DisableExecuteApiEndpoint",
];

pub struct HttpShellFold;

impl FoldRule for HttpShellFold {
    fn name(&self) -> &'static str {
        FOLD_HTTP_SHELL
    }

    fn priority(&self) -> u32 {
        31
    }

    fn claims(&self, ctx: &MatchContext<'_>) -> Vec<FoldClaim> {
        ctx.doc
            .resources_of_type("AWS::ApiGatewayV2::Api")
            .into_iter()
            .filter_map(|api_id| {
                match_shell(ctx.doc, ctx.index, &api_id).map(|consumed| FoldClaim {
                    anchor: api_id,
                    consumed,
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
        if match_shell(doc, &index, &claim.anchor).is_none() {
            return false;
        }

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
        if let Some(body) = old_props.get("Body") {
            props.insert("DefinitionBody".to_string(), body.clone());
        }
        if let Some(location) = old_props.get("BodyS3Location") {
            props.insert("DefinitionUri".to_string(), location.clone());
        }
        let dropped: Vec<String> = old_props
            .keys()
            .filter(|key| {
                !CARRIED_PROPS.contains(&key.as_str())
                    && key.as_str() != "Body"
                    && key.as_str() != "BodyS3Location"
            })
            .cloned()
            .collect();
        api.resource_type = "AWS::Serverless::HttpApi".to_string();
        api.properties = props;

        let removals: Vec<String> = claim
            .consumed
            .iter()
            .filter(|id| *id != &claim.anchor)
            .cloned()
            .collect();
        doc.remove_resources(&removals);

        let notes = if dropped.is_empty() {
            Vec::new()
        } else {
            vec![LossNote::info(
                claim.anchor.clone(),
                format!("properties implied by the serverless form dropped: {dropped:?}"),
            )]
        };
        plan.record_fold(
            self.name(),
            claim.consumed.clone(),
            vec![claim.anchor.clone()],
            notes,
        );
        true
    }
}

fn match_shell(
    doc: &TemplateDocument,
    index: &samify_template::ReferenceIndex,
    api_id: &str,
) -> Option<Vec<String>> {
    let belongs = |resource: &Resource| {
        resource
            .prop("ApiId")
            .and_then(TemplateValue::referenced_id)
            .map_or(false, |id| id == api_id)
    };

    let mut consumed = vec![api_id.to_string()];
    for (id, resource) in &doc.resources {
        if resource.is_type("AWS::ApiGatewayV2::Route") && belongs(resource) {
            return None;
        }
        if (resource.is_type("AWS::ApiGatewayV2::Integration")
            || resource.is_type("AWS::ApiGatewayV2::Stage"))
            && belongs(resource)
        {
            consumed.push(id.clone());
        }
    }

    // Anything else referencing the shell pieces keeps them alive.
    let v2_types = [
        "AWS::ApiGatewayV2::Api",
        "AWS::ApiGatewayV2::Integration",
        "AWS::ApiGatewayV2::Route",
        "AWS::ApiGatewayV2::Stage",
    ];
    for target in &consumed {
        for site in index.sites_for(target) {
            if site.path.section != Section::Resources {
                if target != api_id {
                    return None;
                }
                continue;
            }
            let Some(owner) = site.path.owner() else {
                continue;
            };
            if consumed.contains(&owner.to_string()) {
                continue;
            }
            let owner_type = doc
                .resource(owner)
                .map(|res| res.resource_type.as_str())
                .unwrap_or_default();
            if !v2_types.contains(&owner_type) {
                return None;
            }
        }
    }
    Some(consumed)
}
