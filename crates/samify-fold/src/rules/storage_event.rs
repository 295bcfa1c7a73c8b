//! Storage-event folding: bucket notification configurations plus their
//! paired invoke permissions become `S3` event blocks on the target
//! functions. Prefix/suffix filter rules ride along.

use samify_plan::RefactorPlan;
use samify_template::{Resource, TemplateDocument, TemplateValue, ValueMap};

use crate::helpers;
use crate::rule::{FoldClaim, FoldRule, MatchContext};
use crate::FOLD_STORAGE_EVENT;

pub struct StorageEventFold;

impl FoldRule for StorageEventFold {
    fn name(&self) -> &'static str {
        FOLD_STORAGE_EVENT
    }

    fn priority(&self) -> u32 {
        41
    }

    fn claims(&self, ctx: &MatchContext<'_>) -> Vec<FoldClaim> {
        let mut claims = Vec::new();
        for (bucket_id, resource) in &ctx.doc.resources {
            let folds = match_bucket(ctx.doc, bucket_id, resource);
            if folds.is_empty() {
                continue;
            }
            // The bucket itself is modified, not consumed; permissions are.
            let mut consumed = Vec::new();
            for fold in &folds {
                consumed.extend(fold.permissions.iter().cloned());
            }
            claims.push(FoldClaim {
                anchor: bucket_id.clone(),
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
        let Some(bucket) = doc.resource(&claim.anchor) else {
            return false;
        };
        let folds = match_bucket(doc, &claim.anchor, bucket);
        if folds.is_empty() {
            return false;
        }
        let multiple = folds.len() > 1;
        let mut produced = Vec::new();

        for (position, fold) in folds.iter().enumerate() {
            let Some(function) = doc.resource_mut(&fold.function_id) else {
                continue;
            };
            let base = if multiple {
                format!("{}{position}", claim.anchor)
            } else {
                claim.anchor.clone()
            };
            helpers::attach_event(function, &base, fold.event.clone());
            produced.push(fold.function_id.clone());
        }

        // Strip the folded notification entries off the bucket.
        let folded_indexes: Vec<usize> = folds.iter().map(|fold| fold.index).collect();
        if let Some(bucket) = doc.resource_mut(&claim.anchor) {
            remove_notification_entries(bucket, &folded_indexes);
        }
        doc.remove_resources(&claim.consumed);

        let mut consumed = vec![claim.anchor.clone()];
        consumed.extend(claim.consumed.iter().cloned());
        plan.record_fold(self.name(), consumed, produced, Vec::new());
        true
    }
}

struct NotificationFold {
    index: usize,
    function_id: String,
    event: TemplateValue,
    permissions: Vec<String>,
}

fn match_bucket(
    doc: &TemplateDocument,
    bucket_id: &str,
    resource: &Resource,
) -> Vec<NotificationFold> {
    if !resource.is_type("AWS::S3::Bucket") {
        return Vec::new();
    }
    let Some(configs) = lambda_configurations(resource) else {
        return Vec::new();
    };

    let mut folds = Vec::new();
    for (index, config) in configs.iter().enumerate() {
        let Some(config) = config.as_mapping() else {
            continue;
        };
        let Some(function_id) = config
            .get("Function")
            .and_then(TemplateValue::referenced_id)
            .map(str::to_string)
        else {
            continue;
        };
        if !doc
            .resource(&function_id)
            .map_or(false, helpers::is_foldable_function)
        {
            continue;
        }
        let Some(event) = notification_event(bucket_id, config) else {
            continue;
        };
        let permissions = helpers::find_permissions(doc, &function_id, |props| {
            helpers::principal_is(props, "s3.amazonaws.com")
                && props
                    .get("SourceArn")
                    .map_or(false, |arn| helpers::source_refers_to(arn, bucket_id))
        });
        folds.push(NotificationFold {
            index,
            function_id,
            event,
            permissions,
        });
    }
    folds
}

fn lambda_configurations(resource: &Resource) -> Option<&[TemplateValue]> {
    resource
        .prop("NotificationConfiguration")
        .and_then(TemplateValue::as_mapping)?
        .get("LambdaConfigurations")
        .and_then(TemplateValue::as_sequence)
}

fn notification_event(bucket_id: &str, config: &ValueMap) -> Option<TemplateValue> {
    let events = config.get("Event").or_else(|| config.get("Events"))?;
    let event_list = match events {
        TemplateValue::Sequence(items) => items.clone(),
        single => vec![single.clone()],
    };

    let mut props = ValueMap::new();
    props.insert("Bucket".to_string(), TemplateValue::reference(bucket_id));
    props.insert("Events".to_string(), TemplateValue::Sequence(event_list));
    if let Some(rules) = filter_rules(config.get("Filter")) {
        let mut s3_key = ValueMap::new();
        s3_key.insert("Rules".to_string(), TemplateValue::Sequence(rules));
        let mut filter = ValueMap::new();
        filter.insert("S3Key".to_string(), TemplateValue::Mapping(s3_key));
        props.insert("Filter".to_string(), TemplateValue::Mapping(filter));
    }
    Some(helpers::event_value("S3", props))
}

/// Normalized prefix/suffix rules out of the notification filter.
fn filter_rules(filter: Option<&TemplateValue>) -> Option<Vec<TemplateValue>> {
    let rules = filter?
        .as_mapping()?
        .get("S3Key")?
        .as_mapping()?
        .get("Rules")?
        .as_sequence()?;
    let normalized: Vec<TemplateValue> = rules
        .iter()
        .filter_map(|rule| {
            let rule = rule.as_mapping()?;
            let name = rule.get("Name")?.as_str()?;
            if name != "prefix" && name != "suffix" {
                return None;
            }
            let value = rule.get("Value")?;
            let mut out = ValueMap::new();
            out.insert("Name".to_string(), TemplateValue::string(name));
            out.insert("Value".to_string(), value.clone());
            Some(TemplateValue::Mapping(out))
        })
        .collect();
    (!normalized.is_empty()).then_some(normalized)
}

fn remove_notification_entries(bucket: &mut Resource, indexes: &[usize]) {
    let Some(TemplateValue::Mapping(notification)) =
        bucket.properties.get_mut("NotificationConfiguration")
    else {
        return;
    };
    if let Some(TemplateValue::Sequence(configs)) = notification.get_mut("LambdaConfigurations") {
        let mut position = 0usize;
        configs.retain(|_| {
            let keep = !indexes.contains(&position);
            position += 1;
            keep
        });
        if configs.is_empty() {
            notification.shift_remove("LambdaConfigurations");
        }
    }
    if notification.is_empty() {
        bucket.properties.shift_remove("NotificationConfiguration");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::PatternLibrary;
    use crate::rules::FunctionFold;
    use pretty_assertions::assert_eq;
    use samify_template::parse_str;

    const BUCKET_TEMPLATE: &str = r#"
Resources:
  Resizer:
    Type: AWS::Lambda::Function
    Properties:
      Handler: index.handler
      Runtime: python3.12
      Code:
        ZipFile: "def handler(e, c): return 1"
  Uploads:
    Type: AWS::S3::Bucket
    Properties:
      NotificationConfiguration:
        LambdaConfigurations:
          - Event: s3:ObjectCreated:*
            Function: !GetAtt Resizer.Arn
            Filter:
              S3Key:
                Rules:
                  - Name: suffix
                    Value: .jpg
  UploadsPermission:
    Type: AWS::Lambda::Permission
    Properties:
      Action: lambda:InvokeFunction
      FunctionName: !Ref Resizer
      Principal: s3.amazonaws.com
      SourceArn: !GetAtt Uploads.Arn
"#;

    #[test]
    fn bucket_notification_folds_to_s3_event() {
        let mut doc = parse_str(BUCKET_TEMPLATE).unwrap();
        let mut plan = RefactorPlan::new();
        PatternLibrary::with_rules(vec![Box::new(FunctionFold), Box::new(StorageEventFold)])
            .fold(&mut doc, &mut plan)
            .unwrap();

        assert!(doc.resource("UploadsPermission").is_none());
        let bucket = doc.resource("Uploads").unwrap();
        assert!(bucket.prop("NotificationConfiguration").is_none());

        let function = doc.resource("Resizer").unwrap();
        let events = function
            .prop("Events")
            .and_then(TemplateValue::as_mapping)
            .unwrap();
        let event = events.get("Uploads").unwrap().as_mapping().unwrap();
        assert_eq!(event.get("Type").unwrap().as_str(), Some("S3"));
        let props = event.get("Properties").unwrap().as_mapping().unwrap();
        assert_eq!(props.get("Bucket").unwrap().referenced_id(), Some("Uploads"));
        let rendered = format!("{:?}", props.get("Filter").unwrap());
        assert!(rendered.contains("suffix"));
        assert!(rendered.contains(".jpg"));
    }
}
