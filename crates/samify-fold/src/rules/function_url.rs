//! Function-URL folding: `AWS::Lambda::Url` plus its invoke permission
//! become a `FunctionUrlConfig` block on the owning serverless function,
//! but only when the URL's CORS/auth configuration maps onto that schema.

use samify_plan::RefactorPlan;
use samify_template::{Resource, TemplateDocument, TemplateValue, ValueMap};

use crate::helpers;
use crate::rule::{FoldClaim, FoldRule, MatchContext};
use crate::FOLD_FUNCTION_URL;

const CONFIG_KEYS: [&str; 3] = ["AuthType", "Cors", "InvokeMode"];

pub struct FunctionUrlFold;

impl FoldRule for FunctionUrlFold {
    fn name(&self) -> &'static str {
        FOLD_FUNCTION_URL
    }

    fn priority(&self) -> u32 {
        20
    }

    fn claims(&self, ctx: &MatchContext<'_>) -> Vec<FoldClaim> {
        let mut claims = Vec::new();
        for (logical_id, resource) in &ctx.doc.resources {
            let Some(function_id) = foldable_target(ctx.doc, resource) else {
                continue;
            };
            let mut consumed = vec![logical_id.clone()];
            consumed.extend(url_permissions(ctx.doc, &function_id));
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
        let Some(resource) = doc.resource(&claim.anchor) else {
            return false;
        };
        let Some(function_id) = foldable_target(doc, resource) else {
            return false;
        };
        let mut config = ValueMap::new();
        for key in CONFIG_KEYS {
            if let Some(value) = resource.prop(key) {
                config.insert(key.to_string(), value.clone());
            }
        }

        let Some(function) = doc.resource_mut(&function_id) else {
            return false;
        };
        function
            .properties
            .insert("FunctionUrlConfig".to_string(), TemplateValue::Mapping(config));

        doc.remove_resources(&claim.consumed);
        plan.record_fold(
            self.name(),
            claim.consumed.clone(),
            vec![function_id],
            Vec::new(),
        );
        true
    }

    fn skips(&self, ctx: &MatchContext<'_>) -> Vec<(String, String)> {
        ctx.doc
            .resources
            .iter()
            .filter(|(_, resource)| resource.is_type("AWS::Lambda::Url"))
            .filter(|(_, resource)| foldable_target(ctx.doc, resource).is_none())
            .map(|(logical_id, _)| {
                (
                    logical_id.clone(),
                    "url configuration does not map onto FunctionUrlConfig".to_string(),
                )
            })
            .collect()
    }
}

/// The function this URL folds onto, or `None` when the shape is not
/// expressible (extra properties like `Qualifier`, no config at all, or a
/// function that already carries a URL config).
fn foldable_target(doc: &TemplateDocument, resource: &Resource) -> Option<String> {
    if !resource.is_type("AWS::Lambda::Url") {
        return None;
    }
    let expressible = resource
        .properties
        .keys()
        .all(|key| key == "TargetFunctionArn" || CONFIG_KEYS.contains(&key.as_str()));
    if !expressible {
        return None;
    }
    if !CONFIG_KEYS.iter().any(|key| resource.prop(key).is_some()) {
        return None;
    }
    let function_id = resource
        .prop("TargetFunctionArn")
        .and_then(TemplateValue::referenced_id)?
        .to_string();
    let function = doc.resource(&function_id)?;
    if !helpers::is_foldable_function(function) {
        return None;
    }
    if function.prop("FunctionUrlConfig").is_some() {
        return None;
    }
    Some(function_id)
}

/// Permissions that exist only to expose the URL.
fn url_permissions(doc: &TemplateDocument, function_id: &str) -> Vec<String> {
    helpers::find_permissions(doc, function_id, |props| {
        props.contains_key("FunctionUrlAuthType")
            || props
                .get("Action")
                .and_then(TemplateValue::as_str)
                .map_or(false, |action| action == "lambda:InvokeFunctionUrl")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::PatternLibrary;
    use crate::rules::FunctionFold;
    use pretty_assertions::assert_eq;
    use samify_plan::PlanEntry;
    use samify_template::parse_str;

    fn fold(doc: &mut TemplateDocument) -> RefactorPlan {
        let mut plan = RefactorPlan::new();
        PatternLibrary::with_rules(vec![Box::new(FunctionFold), Box::new(FunctionUrlFold)])
            .fold(doc, &mut plan)
            .unwrap();
        plan
    }

    const URL_TEMPLATE: &str = r#"
Resources:
  Handler:
    Type: AWS::Lambda::Function
    Properties:
      Handler: index.handler
      Runtime: nodejs20.x
      Code:
        ZipFile: "exports.handler = async () => 'ok'"
  HandlerUrl:
    Type: AWS::Lambda::Url
    Properties:
      TargetFunctionArn: !GetAtt Handler.Arn
      AuthType: NONE
      Cors:
        AllowOrigins: ['*']
  HandlerUrlPermission:
    Type: AWS::Lambda::Permission
    Properties:
      Action: lambda:InvokeFunctionUrl
      FunctionName: !Ref Handler
      FunctionUrlAuthType: NONE
      Principal: '*'
"#;

    #[test]
    fn url_folds_into_function_url_config() {
        let mut doc = parse_str(URL_TEMPLATE).unwrap();
        fold(&mut doc);

        assert!(doc.resource("HandlerUrl").is_none());
        assert!(doc.resource("HandlerUrlPermission").is_none());
        let function = doc.resource("Handler").unwrap();
        let config = function
            .prop("FunctionUrlConfig")
            .and_then(TemplateValue::as_mapping)
            .unwrap();
        assert_eq!(config.get("AuthType").unwrap().as_str(), Some("NONE"));
        assert!(config.contains_key("Cors"));
    }

    #[test]
    fn unexpressible_url_stays_raw_with_annotation() {
        let mut doc = parse_str(&URL_TEMPLATE.replace(
            "      AuthType: NONE\n      Cors:\n        AllowOrigins: ['*']\n",
            "      AuthType: NONE\n      Qualifier: live\n",
        ))
        .unwrap();
        let plan = fold(&mut doc);

        assert!(doc.resource("HandlerUrl").is_some());
        let skipped = plan.entries().iter().any(|entry| {
            matches!(entry, PlanEntry::Skipped { subject, .. } if subject == "HandlerUrl")
        });
        assert!(skipped, "expected a plan annotation: {:?}", plan.entries());
    }
}
