//! Schedule/event-bus rule folding: an `AWS::Events::Rule` with a single
//! lambda target becomes a `Schedule` or `EventBridgeRule` event on the
//! function. Rules with input transformers stay raw; the event schema has
//! no equivalent.

use samify_plan::RefactorPlan;
use samify_template::{Resource, TemplateDocument, TemplateValue, ValueMap};

use crate::helpers;
use crate::rule::{FoldClaim, FoldRule, MatchContext};
use crate::FOLD_SCHEDULE_RULE;

const PATTERN_KEYS: [&str; 5] = ["Name", "Description", "EventBusName", "EventPattern", "State"];
const SCHEDULE_KEYS: [&str; 5] = ["Name", "Description", "ScheduleExpression", "State", "Targets"];

pub struct ScheduleRuleFold;

impl FoldRule for ScheduleRuleFold {
    fn name(&self) -> &'static str {
        FOLD_SCHEDULE_RULE
    }

    fn priority(&self) -> u32 {
        42
    }

    fn claims(&self, ctx: &MatchContext<'_>) -> Vec<FoldClaim> {
        let mut claims = Vec::new();
        for (logical_id, resource) in &ctx.doc.resources {
            let Some(matched) = match_rule(ctx.doc, resource) else {
                continue;
            };
            let mut consumed = vec![logical_id.clone()];
            consumed.extend(rule_permissions(ctx.doc, &matched.function_id, logical_id));
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
        let Some(matched) = match_rule(doc, resource) else {
            return false;
        };

        let Some(function) = doc.resource_mut(&matched.function_id) else {
            return false;
        };
        helpers::attach_event(function, &claim.anchor, matched.event);
        doc.remove_resources(&claim.consumed);
        plan.record_fold(
            self.name(),
            claim.consumed.clone(),
            vec![matched.function_id],
            Vec::new(),
        );
        true
    }

    fn skips(&self, ctx: &MatchContext<'_>) -> Vec<(String, String)> {
        ctx.doc
            .resources
            .iter()
            .filter(|(_, resource)| resource.is_type("AWS::Events::Rule"))
            .filter(|(_, resource)| has_input_transformer(resource))
            .map(|(logical_id, _)| {
                (
                    logical_id.clone(),
                    "target uses InputTransformer; no event equivalent".to_string(),
                )
            })
            .collect()
    }
}

struct RuleMatch {
    function_id: String,
    event: TemplateValue,
}

fn match_rule(doc: &TemplateDocument, resource: &Resource) -> Option<RuleMatch> {
    if !resource.is_type("AWS::Events::Rule") {
        return None;
    }
    let targets = resource.prop("Targets").and_then(TemplateValue::as_sequence)?;
    if targets.len() != 1 {
        return None;
    }
    let target = targets[0].as_mapping()?;
    if target.contains_key("InputTransformer") {
        return None;
    }
    let function_id = target
        .get("Arn")
        .and_then(TemplateValue::referenced_id)?
        .to_string();
    if !doc
        .resource(&function_id)
        .map_or(false, helpers::is_foldable_function)
    {
        return None;
    }

    let event = convert_rule(&resource.properties, target)?;
    Some(RuleMatch { function_id, event })
}

/// `EventPattern` maps to `EventBridgeRule`, `ScheduleExpression` to
/// `Schedule`; any other property shape is out of schema.
fn convert_rule(props: &ValueMap, target: &ValueMap) -> Option<TemplateValue> {
    if props.contains_key("EventPattern") {
        if props
            .keys()
            .any(|key| key != "Targets" && !PATTERN_KEYS.contains(&key.as_str()))
        {
            return None;
        }
        let mut event = ValueMap::new();
        event.insert("Pattern".to_string(), props.get("EventPattern")?.clone());
        if let Some(bus) = props.get("EventBusName") {
            event.insert("EventBusName".to_string(), bus.clone());
        }
        copy_state_and_description(props, &mut event);
        return Some(helpers::event_value("EventBridgeRule", event));
    }

    if !props.contains_key("ScheduleExpression") {
        return None;
    }
    if props.keys().any(|key| !SCHEDULE_KEYS.contains(&key.as_str())) {
        return None;
    }
    let mut event = ValueMap::new();
    event.insert(
        "Schedule".to_string(),
        props.get("ScheduleExpression")?.clone(),
    );
    copy_state_and_description(props, &mut event);
    for key in ["Input", "DeadLetterConfig", "RetryPolicy"] {
        if let Some(value) = target.get(key) {
            event.insert(key.to_string(), value.clone());
        }
    }
    Some(helpers::event_value("Schedule", event))
}

fn copy_state_and_description(props: &ValueMap, event: &mut ValueMap) {
    if let Some(state) = props.get("State").and_then(TemplateValue::as_str) {
        event.insert(
            "Enabled".to_string(),
            TemplateValue::Bool(state == "ENABLED"),
        );
    }
    if let Some(description) = props.get("Description") {
        event.insert("Description".to_string(), description.clone());
    }
}

fn has_input_transformer(resource: &Resource) -> bool {
    resource
        .prop("Targets")
        .and_then(TemplateValue::as_sequence)
        .map_or(false, |targets| {
            targets.iter().any(|target| {
                target
                    .as_mapping()
                    .map_or(false, |map| map.contains_key("InputTransformer"))
            })
        })
}

/// Invoke permissions paired with the rule.
fn rule_permissions(doc: &TemplateDocument, function_id: &str, rule_id: &str) -> Vec<String> {
    helpers::find_permissions(doc, function_id, |props| {
        props
            .get("SourceArn")
            .map_or(false, |arn| helpers::source_refers_to(arn, rule_id))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::PatternLibrary;
    use crate::rules::FunctionFold;
    use pretty_assertions::assert_eq;
    use samify_template::parse_str;

    const SCHEDULE_TEMPLATE: &str = r#"
Resources:
  Cron:
    Type: AWS::Lambda::Function
    Properties:
      Handler: index.handler
      Runtime: python3.12
      Code:
        ZipFile: "def handler(e, c): return 1"
  Nightly:
    Type: AWS::Events::Rule
    Properties:
      ScheduleExpression: rate(1 day)
      State: ENABLED
      Targets:
        - Arn: !GetAtt Cron.Arn
          Id: Target0
  NightlyPermission:
    Type: AWS::Lambda::Permission
    Properties:
      Action: lambda:InvokeFunction
      FunctionName: !Ref Cron
      Principal: events.amazonaws.com
      SourceArn: !GetAtt Nightly.Arn
"#;

    fn fold(doc: &mut TemplateDocument) -> RefactorPlan {
        let mut plan = RefactorPlan::new();
        PatternLibrary::with_rules(vec![Box::new(FunctionFold), Box::new(ScheduleRuleFold)])
            .fold(doc, &mut plan)
            .unwrap();
        plan
    }

    #[test]
    fn schedule_rule_folds_to_schedule_event() {
        let mut doc = parse_str(SCHEDULE_TEMPLATE).unwrap();
        fold(&mut doc);

        assert!(doc.resource("Nightly").is_none());
        assert!(doc.resource("NightlyPermission").is_none());
        let function = doc.resource("Cron").unwrap();
        let events = function.prop("Events").and_then(TemplateValue::as_mapping).unwrap();
        let event = events.get("Nightly").unwrap().as_mapping().unwrap();
        assert_eq!(event.get("Type").unwrap().as_str(), Some("Schedule"));
        let props = event.get("Properties").unwrap().as_mapping().unwrap();
        assert_eq!(props.get("Schedule").unwrap().as_str(), Some("rate(1 day)"));
        assert_eq!(props.get("Enabled"), Some(&TemplateValue::Bool(true)));
    }

    #[test]
    fn input_transformer_rule_stays_raw() {
        let with_transformer = SCHEDULE_TEMPLATE.replace(
            "          Id: Target0\n",
            "          Id: Target0\n          InputTransformer:\n            InputTemplate: '{}'\n",
        );
        let mut doc = parse_str(&with_transformer).unwrap();
        let plan = fold(&mut doc);
        assert!(doc.resource("Nightly").is_some());
        assert!(plan
            .entries()
            .iter()
            .any(|entry| format!("{entry:?}").contains("InputTransformer")));
    }
}
