//! Simple-table folding: a provisioned, single-hash-key
//! `AWS::DynamoDB::Table` becomes an `AWS::Serverless::SimpleTable`.

use samify_plan::RefactorPlan;
use samify_template::{Resource, TemplateDocument, TemplateValue, ValueMap};

use crate::rule::{FoldClaim, FoldRule, MatchContext};
use crate::FOLD_SIMPLE_TABLE;

const ALLOWED_PROPS: [&str; 8] = [
    "AttributeDefinitions",
    "KeySchema",
    "ProvisionedThroughput",
    "TableName",
    "Tags",
    "PointInTimeRecoverySpecification",
    "SSESpecification",
    "BillingMode",
];

const CARRIED_PROPS: [&str; 5] = [
    "ProvisionedThroughput",
    "TableName",
    "Tags",
    "PointInTimeRecoverySpecification",
    "SSESpecification",
];

pub struct SimpleTableFold;

impl FoldRule for SimpleTableFold {
    fn name(&self) -> &'static str {
        FOLD_SIMPLE_TABLE
    }

    fn priority(&self) -> u32 {
        60
    }

    fn claims(&self, ctx: &MatchContext<'_>) -> Vec<FoldClaim> {
        ctx.doc
            .resources
            .iter()
            .filter(|(_, resource)| primary_key(resource).is_some())
            .map(|(logical_id, _)| FoldClaim::single(logical_id.clone()))
            .collect()
    }

    fn rewrite(
        &self,
        doc: &mut TemplateDocument,
        claim: &FoldClaim,
        plan: &mut RefactorPlan,
    ) -> bool {
        let Some(resource) = doc.resource_mut(&claim.anchor) else {
            return false;
        };
        let Some(key) = primary_key(resource) else {
            return false;
        };

        let old_props = std::mem::take(&mut resource.properties);
        let mut props = ValueMap::new();
        props.insert("PrimaryKey".to_string(), key);
        for name in CARRIED_PROPS {
            if let Some(value) = old_props.get(name) {
                props.insert(name.to_string(), value.clone());
            }
        }
        resource.resource_type = "AWS::Serverless::SimpleTable".to_string();
        resource.properties = props;

        plan.record_fold(
            self.name(),
            claim.consumed.clone(),
            vec![claim.anchor.clone()],
            Vec::new(),
        );
        true
    }
}

/// The SimpleTable `PrimaryKey` block, or `None` when the table shape is
/// outside what SimpleTable expresses.
fn primary_key(resource: &Resource) -> Option<TemplateValue> {
    if !resource.is_type("AWS::DynamoDB::Table") {
        return None;
    }
    let props = &resource.properties;

    // SimpleTable models provisioned billing only.
    let on_demand = props
        .get("BillingMode")
        .and_then(TemplateValue::as_str)
        .map_or(false, |mode| mode.eq_ignore_ascii_case("PAY_PER_REQUEST"));
    if on_demand || !props.contains_key("ProvisionedThroughput") {
        return None;
    }
    if props.keys().any(|key| !ALLOWED_PROPS.contains(&key.as_str())) {
        return None;
    }

    let key_schema = props.get("KeySchema").and_then(TemplateValue::as_sequence)?;
    if key_schema.len() != 1 {
        return None;
    }
    let hash_entry = key_schema[0].as_mapping()?;
    if hash_entry.get("KeyType").and_then(TemplateValue::as_str) != Some("HASH") {
        return None;
    }
    let hash_name = hash_entry.get("AttributeName").and_then(TemplateValue::as_str)?;

    let attr_type = props
        .get("AttributeDefinitions")
        .and_then(TemplateValue::as_sequence)?
        .iter()
        .filter_map(TemplateValue::as_mapping)
        .find(|attr| {
            attr.get("AttributeName").and_then(TemplateValue::as_str) == Some(hash_name)
        })?
        .get("AttributeType")
        .and_then(TemplateValue::as_str)?;
    let sam_type = match attr_type {
        "S" => "String",
        "N" => "Number",
        "B" => "Binary",
        _ => return None,
    };

    let mut key = ValueMap::new();
    key.insert("Name".to_string(), TemplateValue::string(hash_name));
    key.insert("Type".to_string(), TemplateValue::string(sam_type));
    Some(TemplateValue::Mapping(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::PatternLibrary;
    use pretty_assertions::assert_eq;
    use samify_template::parse_str;

    const TABLE: &str = r"
Resources:
  Orders:
    Type: AWS::DynamoDB::Table
    Properties:
      AttributeDefinitions:
        - AttributeName: id
          AttributeType: S
      KeySchema:
        - AttributeName: id
          KeyType: HASH
      ProvisionedThroughput:
        ReadCapacityUnits: 5
        WriteCapacityUnits: 5
";

    fn fold(doc: &mut TemplateDocument) {
        let mut plan = RefactorPlan::new();
        PatternLibrary::with_rules(vec![Box::new(SimpleTableFold)])
            .fold(doc, &mut plan)
            .unwrap();
    }

    #[test]
    fn provisioned_single_key_table_folds() {
        let mut doc = parse_str(TABLE).unwrap();
        fold(&mut doc);
        let table = doc.resource("Orders").unwrap();
        assert_eq!(table.resource_type, "AWS::Serverless::SimpleTable");
        let key = table.prop("PrimaryKey").unwrap().as_mapping().unwrap();
        assert_eq!(key.get("Name").unwrap().as_str(), Some("id"));
        assert_eq!(key.get("Type").unwrap().as_str(), Some("String"));
        assert!(table.prop("ProvisionedThroughput").is_some());
    }

    #[test]
    fn on_demand_table_stays() {
        let on_demand = TABLE.replace(
            "      ProvisionedThroughput:\n        ReadCapacityUnits: 5\n        WriteCapacityUnits: 5\n",
            "      BillingMode: PAY_PER_REQUEST\n",
        );
        let mut doc = parse_str(&on_demand).unwrap();
        fold(&mut doc);
        assert_eq!(doc.resource("Orders").unwrap().resource_type, "AWS::DynamoDB::Table");
    }

    #[test]
    fn composite_key_table_stays() {
        let composite = TABLE.replace(
            "      KeySchema:\n        - AttributeName: id\n          KeyType: HASH\n",
            "      KeySchema:\n        - AttributeName: id\n          KeyType: HASH\n        - AttributeName: ts\n          KeyType: RANGE\n",
        );
        let mut doc = parse_str(&composite).unwrap();
        fold(&mut doc);
        assert_eq!(doc.resource("Orders").unwrap().resource_type, "AWS::DynamoDB::Table");
    }
}
