//! Event-source folding: `AWS::Lambda::EventSourceMapping` becomes an event
//! block on the owning function; queue, stream, table-stream, broker, and
//! Kafka variants.
//!
//! Every mapping-specific field is preserved. Fields with no managed-event
//! equivalent are attached verbatim as raw overrides on the generated event
//! and recorded as a loss note; never dropped silently.

use samify_plan::{LossNote, RefactorPlan};
use samify_template::{Resource, TemplateDocument, TemplateValue, ValueMap};

use crate::helpers;
use crate::rule::{FoldClaim, FoldRule, MatchContext};
use crate::FOLD_EVENT_SOURCE;

/// Mapping fields the managed event schema carries one-for-one.
const MANAGED_KEYS: [&str; 18] = [
    "BatchSize",
    "Enabled",
    "StartingPosition",
    "StartingPositionTimestamp",
    "MaximumBatchingWindowInSeconds",
    "MaximumRetryAttempts",
    "BisectBatchOnFunctionError",
    "MaximumRecordAgeInSeconds",
    "ParallelizationFactor",
    "DestinationConfig",
    "FunctionResponseTypes",
    "FilterCriteria",
    "TumblingWindowInSeconds",
    "ScalingConfig",
    "ConsumerGroupId",
    "Topics",
    "Queues",
    "SourceAccessConfigurations",
];

pub struct EventSourceFold;

impl FoldRule for EventSourceFold {
    fn name(&self) -> &'static str {
        FOLD_EVENT_SOURCE
    }

    fn priority(&self) -> u32 {
        40
    }

    fn claims(&self, ctx: &MatchContext<'_>) -> Vec<FoldClaim> {
        ctx.doc
            .resources
            .iter()
            .filter(|(_, resource)| resource.is_type("AWS::Lambda::EventSourceMapping"))
            .filter(|(_, resource)| match_mapping(ctx.doc, resource).is_some())
            .map(|(logical_id, _)| FoldClaim::single(logical_id.clone()))
            .collect()
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
        let Some(matched) = match_mapping(doc, resource) else {
            return false;
        };

        let mut props = ValueMap::new();
        props.insert(matched.target_key.to_string(), matched.target_value);
        let mut overrides = Vec::new();
        for (key, value) in &resource.properties {
            match key.as_str() {
                "FunctionName" | "EventSourceArn" | "SelfManagedEventSource" => continue,
                "AmazonManagedKafkaEventSourceConfig" => {
                    flatten_kafka_config(value, &mut props, &mut overrides, key);
                    continue;
                }
                _ => {}
            }
            if !MANAGED_KEYS.contains(&key.as_str()) {
                overrides.push(key.clone());
            }
            props.insert(key.clone(), value.clone());
        }

        let event = helpers::event_value(matched.event_type, props);
        let Some(function) = doc.resource_mut(&matched.function_id) else {
            return false;
        };
        helpers::attach_event(function, &claim.anchor, event);
        doc.remove_resources(&claim.consumed);

        let notes = if overrides.is_empty() {
            Vec::new()
        } else {
            vec![LossNote::info(
                claim.anchor.clone(),
                format!("fields with no managed-event equivalent kept as raw overrides: {overrides:?}"),
            )]
        };
        plan.record_fold(
            self.name(),
            claim.consumed.clone(),
            vec![matched.function_id],
            notes,
        );
        true
    }

    fn skips(&self, ctx: &MatchContext<'_>) -> Vec<(String, String)> {
        ctx.doc
            .resources
            .iter()
            .filter(|(_, resource)| resource.is_type("AWS::Lambda::EventSourceMapping"))
            .filter(|(_, resource)| match_mapping(ctx.doc, resource).is_none())
            .map(|(logical_id, _)| {
                (
                    logical_id.clone(),
                    "event source could not be classified; mapping left raw".to_string(),
                )
            })
            .collect()
    }
}

struct MappingMatch {
    function_id: String,
    event_type: &'static str,
    target_key: &'static str,
    target_value: TemplateValue,
}

fn match_mapping(doc: &TemplateDocument, resource: &Resource) -> Option<MappingMatch> {
    if !resource.is_type("AWS::Lambda::EventSourceMapping") {
        return None;
    }
    let function_id = resource
        .prop("FunctionName")
        .and_then(TemplateValue::referenced_id)?
        .to_string();
    if !doc
        .resource(&function_id)
        .map_or(false, helpers::is_foldable_function)
    {
        return None;
    }

    // Self-managed Kafka carries its brokers inside the source block.
    if let Some(source) = resource.prop("SelfManagedEventSource") {
        let brokers = source
            .as_mapping()
            .and_then(|map| map.get("Endpoints"))
            .and_then(TemplateValue::as_mapping)
            .and_then(|endpoints| endpoints.get("KafkaBootstrapServers"))?;
        return Some(MappingMatch {
            function_id,
            event_type: "SelfManagedKafka",
            target_key: "KafkaBootstrapServers",
            target_value: brokers.clone(),
        });
    }

    let arn = resource.prop("EventSourceArn")?;
    let (event_type, target_key) = classify_source(doc, arn)?;
    Some(MappingMatch {
        function_id,
        event_type,
        target_key,
        target_value: arn.clone(),
    })
}

/// Event type and SAM target key for an `EventSourceArn`: by the referenced
/// resource's type tag when it lives in the document, by ARN shape otherwise.
fn classify_source(
    doc: &TemplateDocument,
    arn: &TemplateValue,
) -> Option<(&'static str, &'static str)> {
    if let Some(referenced) = arn
        .referenced_id()
        .and_then(|id| doc.resource(id))
    {
        return match referenced.resource_type.as_str() {
            "AWS::SQS::Queue" => Some(("SQS", "Queue")),
            "AWS::Kinesis::Stream" => Some(("Kinesis", "Stream")),
            "AWS::DynamoDB::Table" => Some(("DynamoDB", "Stream")),
            "AWS::MSK::Cluster" => Some(("MSK", "Stream")),
            "AWS::AmazonMQ::Broker" => Some(("MQ", "Broker")),
            "AWS::DocDB::DBCluster" => Some(("DocumentDB", "Cluster")),
            _ => None,
        };
    }

    let fingerprint = helpers::value_fingerprint(arn);
    if fingerprint.contains("kafka") && fingerprint.contains("cluster") {
        return Some(("MSK", "Stream"));
    }
    if fingerprint.contains(":mq:") {
        return Some(("MQ", "Broker"));
    }
    if fingerprint.contains(":docdb:") {
        return Some(("DocumentDB", "Cluster"));
    }
    if fingerprint.contains(":dynamodb:") {
        return Some(("DynamoDB", "Stream"));
    }
    if fingerprint.contains(":kinesis:") {
        return Some(("Kinesis", "Stream"));
    }
    if fingerprint.contains(":sqs:") {
        return Some(("SQS", "Queue"));
    }
    None
}

/// Hoist `ConsumerGroupId` out of the Kafka config block; a conflicting
/// top-level value keeps the block verbatim instead.
fn flatten_kafka_config(
    config: &TemplateValue,
    props: &mut ValueMap,
    overrides: &mut Vec<String>,
    key: &str,
) {
    let group = config
        .as_mapping()
        .and_then(|map| map.get("ConsumerGroupId"));
    match group {
        Some(group)
            if !props.contains_key("ConsumerGroupId")
                && config.as_mapping().map_or(0, ValueMap::len) == 1 =>
        {
            props.insert("ConsumerGroupId".to_string(), group.clone());
        }
        _ => {
            overrides.push(key.to_string());
            props.insert(key.to_string(), config.clone());
        }
    }
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
        PatternLibrary::with_rules(vec![Box::new(FunctionFold), Box::new(EventSourceFold)])
            .fold(doc, &mut plan)
            .unwrap();
        plan
    }

    const QUEUE_TEMPLATE: &str = r#"
Resources:
  Worker:
    Type: AWS::Lambda::Function
    Properties:
      Handler: index.handler
      Runtime: python3.12
      Code:
        ZipFile: "def handler(e, c): return 1"
  Jobs:
    Type: AWS::SQS::Queue
  WorkerJobsMapping:
    Type: AWS::Lambda::EventSourceMapping
    Properties:
      FunctionName: !Ref Worker
      EventSourceArn: !GetAtt Jobs.Arn
      BatchSize: 7
      MaximumBatchingWindowInSeconds: 20
"#;

    #[test]
    fn queue_mapping_preserves_batch_size_exactly() {
        let mut doc = parse_str(QUEUE_TEMPLATE).unwrap();
        fold(&mut doc);

        assert!(doc.resource("WorkerJobsMapping").is_none());
        let function = doc.resource("Worker").unwrap();
        let events = function
            .prop("Events")
            .and_then(TemplateValue::as_mapping)
            .unwrap();
        let event = events.get("WorkerJobsMapping").unwrap().as_mapping().unwrap();
        assert_eq!(event.get("Type").unwrap().as_str(), Some("SQS"));
        let props = event.get("Properties").unwrap().as_mapping().unwrap();
        assert_eq!(props.get("Queue").unwrap().referenced_id(), Some("Jobs"));
        assert_eq!(
            props.get("BatchSize"),
            Some(&TemplateValue::Number(samify_template::Number::Int(7)))
        );
        assert_eq!(
            props.get("MaximumBatchingWindowInSeconds"),
            Some(&TemplateValue::Number(samify_template::Number::Int(20)))
        );
    }

    #[test]
    fn stream_mapping_folds_by_referenced_type() {
        let mut doc = parse_str(&QUEUE_TEMPLATE.replace(
            "    Type: AWS::SQS::Queue\n",
            "    Type: AWS::Kinesis::Stream\n",
        ))
        .unwrap();
        fold(&mut doc);
        let function = doc.resource("Worker").unwrap();
        let events = function.prop("Events").and_then(TemplateValue::as_mapping).unwrap();
        let event = events.get("WorkerJobsMapping").unwrap().as_mapping().unwrap();
        assert_eq!(event.get("Type").unwrap().as_str(), Some("Kinesis"));
        let props = event.get("Properties").unwrap().as_mapping().unwrap();
        assert!(props.contains_key("Stream"));
    }

    #[test]
    fn unmapped_fields_are_kept_as_raw_overrides_with_a_note() {
        let with_extra = QUEUE_TEMPLATE.replace(
            "      BatchSize: 7\n",
            "      BatchSize: 7\n      SomeNewKnob: 42\n",
        );
        let mut doc = parse_str(&with_extra).unwrap();
        let plan = fold(&mut doc);

        // Folded anyway; the unknown field rides along verbatim.
        let function = doc.resource("Worker").unwrap();
        let events = function.prop("Events").and_then(TemplateValue::as_mapping).unwrap();
        let props = events
            .get("WorkerJobsMapping")
            .and_then(TemplateValue::as_mapping)
            .and_then(|event| event.get("Properties"))
            .and_then(TemplateValue::as_mapping)
            .unwrap();
        assert!(props.contains_key("SomeNewKnob"));

        let noted = plan.folds().any(|entry| match entry {
            PlanEntry::Fold { notes, .. } => notes
                .iter()
                .any(|note| note.detail.contains("SomeNewKnob")),
            _ => false,
        });
        assert!(noted, "raw override not recorded: {:?}", plan.entries());
    }

    #[test]
    fn unknown_source_is_left_raw_with_annotation() {
        let mut doc = parse_str(&QUEUE_TEMPLATE.replace(
            "      EventSourceArn: !GetAtt Jobs.Arn\n",
            "      EventSourceArn: arn:aws:somethingelse:region:acct:thing\n",
        ))
        .unwrap();
        let plan = fold(&mut doc);
        assert!(doc.resource("WorkerJobsMapping").is_some());
        let skipped = plan.entries().iter().any(|entry| {
            matches!(entry, PlanEntry::Skipped { subject, .. } if subject == "WorkerJobsMapping")
        });
        assert!(skipped);
    }
}
