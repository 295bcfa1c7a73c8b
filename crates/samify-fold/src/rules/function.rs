//! Function folding: `AWS::Lambda::Function` plus its execution role and
//! attached policies become one `AWS::Serverless::Function`.
//!
//! Policy statements are folded into SAM policy templates where the target
//! schema can express them (S3 read/crud, SQS poller, DynamoDB crud);
//! anything else stays behind on the raw `AWS::IAM::Policy` resource and the
//! plan entry is flagged for manual review.

use std::collections::BTreeSet;

use samify_plan::{LossNote, RefactorPlan};
use samify_template::{
    normalize_inline_code, Intrinsic, Resource, SubSegment, TemplateDocument, TemplateValue,
    ValueMap,
};

use crate::rule::{FoldClaim, FoldRule, MatchContext};
use crate::{helpers, FOLD_FUNCTION};

/// Lambda function + role/policy cluster -> serverless function.
pub struct FunctionFold;

impl FoldRule for FunctionFold {
    fn name(&self) -> &'static str {
        FOLD_FUNCTION
    }

    fn priority(&self) -> u32 {
        10
    }

    fn claims(&self, ctx: &MatchContext<'_>) -> Vec<FoldClaim> {
        let mut claims = Vec::new();
        for (logical_id, resource) in &ctx.doc.resources {
            if !resource.is_type("AWS::Lambda::Function") {
                continue;
            }
            if convert_code(resource).is_none() {
                continue;
            }
            let role = analyze_role(ctx.doc, logical_id, resource, ctx.index);
            let mut consumed = vec![logical_id.clone()];
            for policy in &role.policies {
                if policy.fully_consumed {
                    consumed.push(policy.logical_id.clone());
                }
            }
            if role.absorb_role {
                if let Some(role_id) = &role.role_id {
                    consumed.push(role_id.clone());
                }
            }
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
        if !resource.is_type("AWS::Lambda::Function") {
            return false;
        }
        let Some(code) = convert_code(resource) else {
            return false;
        };
        let index = samify_template::ReferenceIndex::build(doc);
        let role = analyze_role(doc, &claim.anchor, resource, &index);

        let mut notes = Vec::new();

        // Rebuild properties: code location first, everything else after,
        // minus the raw Code block (and the Role when it is absorbed).
        let Some(resource) = doc.resource_mut(&claim.anchor) else {
            return false;
        };
        let old_props = std::mem::take(&mut resource.properties);
        let mut props = ValueMap::new();
        match code {
            CodeLocation::Inline(text) => {
                props.insert("InlineCode".to_string(), TemplateValue::String(text));
            }
            CodeLocation::Uri(value) => {
                props.insert("CodeUri".to_string(), value);
            }
        }
        for (key, value) in old_props {
            if key == "Code" {
                continue;
            }
            if key == "Role" && role.absorb_role {
                continue;
            }
            props.insert(key, value);
        }

        // Fold expressible policy statements onto the function.
        let templates: Vec<TemplateValue> = role
            .policies
            .iter()
            .flat_map(|policy| policy.templates.clone())
            .collect();
        if !templates.is_empty() {
            let policies = props
                .entry("Policies".to_string())
                .or_insert_with(|| TemplateValue::Sequence(Vec::new()));
            if let TemplateValue::Sequence(list) = policies {
                list.extend(templates);
            }
        }
        resource.resource_type = "AWS::Serverless::Function".to_string();
        resource.properties = props;

        // Residue: consumed policies disappear, partially expressible ones
        // keep only their unsupported statements and get flagged.
        let mut removals = Vec::new();
        for policy in &role.policies {
            if policy.fully_consumed {
                removals.push(policy.logical_id.clone());
                continue;
            }
            if policy.templates.is_empty() {
                continue;
            }
            if let Some(policy_resource) = doc.resource_mut(&policy.logical_id) {
                retain_statements(policy_resource, &policy.leftover);
            }
            notes.push(LossNote::review(
                policy.logical_id.clone(),
                "policy statements not expressible as SAM policy templates stay on the raw resource",
            ));
        }
        if role.absorb_role {
            if let Some(role_id) = &role.role_id {
                removals.push(role_id.clone());
                notes.push(LossNote::info(
                    role_id.clone(),
                    "basic execution role absorbed by the serverless function",
                ));
            }
        }
        doc.remove_resources(&removals);

        plan.record_fold(
            self.name(),
            claim.consumed.clone(),
            vec![claim.anchor.clone()],
            notes,
        );
        true
    }
}

enum CodeLocation {
    Inline(String),
    Uri(TemplateValue),
}

/// Where the function's code lives, or `None` when the shape is not
/// convertible (container images, missing code).
fn convert_code(resource: &Resource) -> Option<CodeLocation> {
    // CDK asset metadata wins: the asset planner resolves the path later.
    if let Some(asset_path) = resource.asset_path() {
        let applies = resource
            .asset_property()
            .map_or(true, |property| property == "Code");
        if applies {
            return Some(CodeLocation::Uri(TemplateValue::string(asset_path)));
        }
    }

    let code = resource.prop("Code")?.as_mapping()?;
    if let Some(TemplateValue::String(payload)) = code.get("ZipFile") {
        return Some(CodeLocation::Inline(normalize_inline_code(payload)));
    }
    if code.contains_key("S3Bucket") && code.contains_key("S3Key") {
        let mut uri = ValueMap::new();
        for (from, to) in [
            ("S3Bucket", "Bucket"),
            ("S3Key", "Key"),
            ("S3ObjectVersion", "Version"),
        ] {
            if let Some(value) = code.get(from) {
                uri.insert(to.to_string(), value.clone());
            }
        }
        return Some(CodeLocation::Uri(TemplateValue::Mapping(uri)));
    }
    None
}

struct RoleAnalysis {
    role_id: Option<String>,
    absorb_role: bool,
    policies: Vec<PolicyAnalysis>,
}

struct PolicyAnalysis {
    logical_id: String,
    templates: Vec<TemplateValue>,
    leftover: Vec<TemplateValue>,
    fully_consumed: bool,
}

fn analyze_role(
    doc: &TemplateDocument,
    function_id: &str,
    resource: &Resource,
    index: &samify_template::ReferenceIndex,
) -> RoleAnalysis {
    let role_id = resource
        .prop("Role")
        .and_then(TemplateValue::referenced_id)
        .map(str::to_string);
    let Some(role_id) = role_id else {
        return RoleAnalysis {
            role_id: None,
            absorb_role: false,
            policies: Vec::new(),
        };
    };

    let policies: Vec<PolicyAnalysis> = doc
        .resources
        .iter()
        .filter(|(_, res)| res.is_type("AWS::IAM::Policy"))
        .filter(|(_, res)| policy_targets_role(res, &role_id))
        .map(|(id, res)| analyze_policy(id, res))
        .collect();

    // The basic execution role can only disappear when nothing else needs
    // it: the function itself and fully consumed policies don't count.
    let absorb_role = doc
        .resource(&role_id)
        .map_or(false, is_basic_execution_role)
        && {
            let mut holders: Vec<&str> = vec![function_id];
            holders.extend(
                policies
                    .iter()
                    .filter(|policy| policy.fully_consumed)
                    .map(|policy| policy.logical_id.as_str()),
            );
            !index.referenced_outside(&role_id, &holders)
        };

    RoleAnalysis {
        role_id: Some(role_id),
        absorb_role,
        policies,
    }
}

fn policy_targets_role(resource: &Resource, role_id: &str) -> bool {
    resource
        .prop("Roles")
        .and_then(TemplateValue::as_sequence)
        .map_or(false, |roles| {
            roles
                .iter()
                .any(|role| role.referenced_id() == Some(role_id))
        })
}

fn analyze_policy(logical_id: &str, resource: &Resource) -> PolicyAnalysis {
    let statements = resource
        .prop("PolicyDocument")
        .and_then(TemplateValue::as_mapping)
        .and_then(|doc| doc.get("Statement"))
        .map(statement_list)
        .unwrap_or_default();

    let mut templates = Vec::new();
    let mut leftover = Vec::new();
    let mut dynamo_statements = Vec::new();

    for statement in statements {
        if let Some(template) = match_s3_template(&statement) {
            templates.push(template);
        } else if let Some(template) = match_sqs_poller_template(&statement) {
            templates.push(template);
        } else if is_dynamodb_statement(&statement) {
            dynamo_statements.push(statement);
        } else {
            leftover.push(statement);
        }
    }

    match single_table_target(&dynamo_statements) {
        Some(table_ref) if !dynamo_statements.is_empty() => {
            let mut config = ValueMap::new();
            config.insert("TableName".to_string(), table_ref);
            templates.push(template_entry("DynamoDBCrudPolicy", config));
        }
        _ => leftover.extend(dynamo_statements),
    }

    PolicyAnalysis {
        logical_id: logical_id.to_string(),
        fully_consumed: leftover.is_empty() && !templates.is_empty(),
        templates,
        leftover,
    }
}

/// Replace the policy's statements with the unsupported residue.
fn retain_statements(resource: &mut Resource, leftover: &[TemplateValue]) {
    if let Some(TemplateValue::Mapping(doc)) = resource.properties.get_mut("PolicyDocument") {
        doc.insert(
            "Statement".to_string(),
            TemplateValue::Sequence(leftover.to_vec()),
        );
    }
}

fn statement_list(value: &TemplateValue) -> Vec<TemplateValue> {
    match value {
        TemplateValue::Sequence(items) => items.clone(),
        TemplateValue::Mapping(_) => vec![value.clone()],
        _ => Vec::new(),
    }
}

fn template_entry(name: &str, config: ValueMap) -> TemplateValue {
    let mut entry = ValueMap::new();
    entry.insert(name.to_string(), TemplateValue::Mapping(config));
    TemplateValue::Mapping(entry)
}

fn actions_of(statement: &TemplateValue) -> Option<BTreeSet<String>> {
    let actions = statement.as_mapping()?.get("Action")?;
    match actions {
        TemplateValue::String(action) => Some(BTreeSet::from([action.clone()])),
        TemplateValue::Sequence(items) => Some(
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
        ),
        _ => None,
    }
}

fn resources_of(statement: &TemplateValue) -> Vec<TemplateValue> {
    match statement.as_mapping().and_then(|map| map.get("Resource")) {
        Some(TemplateValue::Sequence(items)) => items.clone(),
        Some(other) => vec![other.clone()],
        None => Vec::new(),
    }
}

const S3_READ_ACTIONS: [&str; 4] = [
    "s3:GetObject",
    "s3:GetObjectVersion",
    "s3:ListBucket",
    "s3:ListBucketVersions",
];

const S3_CRUD_EXTRA_ACTIONS: [&str; 3] =
    ["s3:PutObject", "s3:DeleteObject", "s3:AbortMultipartUpload"];

fn match_s3_template(statement: &TemplateValue) -> Option<TemplateValue> {
    if !allows(statement) {
        return None;
    }
    let actions = actions_of(statement)?;
    if actions.is_empty() {
        return None;
    }
    let resources = resources_of(statement);
    let bucket = common_target(&resources, bucket_from_resource)?;

    let read: BTreeSet<&str> = S3_READ_ACTIONS.into_iter().collect();
    let crud: BTreeSet<&str> = read
        .iter()
        .copied()
        .chain(S3_CRUD_EXTRA_ACTIONS)
        .collect();
    let action_refs: BTreeSet<&str> = actions.iter().map(String::as_str).collect();

    let mut config = ValueMap::new();
    config.insert("BucketName".to_string(), bucket);
    if action_refs.is_subset(&read) {
        Some(template_entry("S3ReadPolicy", config))
    } else if action_refs.is_subset(&crud) {
        Some(template_entry("S3CrudPolicy", config))
    } else {
        None
    }
}

const SQS_POLLER_ACTIONS: [&str; 5] = [
    "sqs:ReceiveMessage",
    "sqs:DeleteMessage",
    "sqs:GetQueueAttributes",
    "sqs:GetQueueUrl",
    "sqs:ChangeMessageVisibility",
];

fn match_sqs_poller_template(statement: &TemplateValue) -> Option<TemplateValue> {
    if !allows(statement) {
        return None;
    }
    let actions = actions_of(statement)?;
    if actions.is_empty() {
        return None;
    }
    let poller: BTreeSet<&str> = SQS_POLLER_ACTIONS.into_iter().collect();
    let action_refs: BTreeSet<&str> = actions.iter().map(String::as_str).collect();
    if !action_refs.is_subset(&poller) {
        return None;
    }
    let resources = resources_of(statement);
    let queue = common_target(&resources, arn_target_from_resource)?;
    let mut config = ValueMap::new();
    config.insert("QueueName".to_string(), queue);
    Some(template_entry("SQSPollerPolicy", config))
}

const DYNAMO_ACTIONS: [&str; 12] = [
    "dynamodb:BatchGetItem",
    "dynamodb:GetRecords",
    "dynamodb:GetShardIterator",
    "dynamodb:Query",
    "dynamodb:GetItem",
    "dynamodb:Scan",
    "dynamodb:ConditionCheckItem",
    "dynamodb:BatchWriteItem",
    "dynamodb:PutItem",
    "dynamodb:UpdateItem",
    "dynamodb:DeleteItem",
    "dynamodb:DescribeTable",
];

fn is_dynamodb_statement(statement: &TemplateValue) -> bool {
    if !allows(statement) {
        return false;
    }
    let Some(actions) = actions_of(statement) else {
        return false;
    };
    if actions.is_empty()
        || !actions
            .iter()
            .all(|action| DYNAMO_ACTIONS.contains(&action.as_str()))
    {
        return false;
    }
    resources_of(statement)
        .iter()
        .any(|resource| table_from_resource(resource).is_some())
}

/// The one table every dynamo statement targets, or `None` when they span
/// several.
fn single_table_target(statements: &[TemplateValue]) -> Option<TemplateValue> {
    let mut table: Option<String> = None;
    for statement in statements {
        for resource in resources_of(statement) {
            let Some(name) = table_from_resource(&resource) else {
                continue;
            };
            match &table {
                None => table = Some(name),
                Some(existing) if *existing == name => {}
                Some(_) => return None,
            }
        }
    }
    table.map(TemplateValue::reference)
}

fn allows(statement: &TemplateValue) -> bool {
    statement
        .as_mapping()
        .and_then(|map| map.get("Effect"))
        .and_then(TemplateValue::as_str)
        .map_or(false, |effect| effect == "Allow")
}

/// All resources agree on the same extracted target.
fn common_target<F>(resources: &[TemplateValue], extract: F) -> Option<TemplateValue>
where
    F: Fn(&TemplateValue) -> Option<TemplateValue>,
{
    let mut target: Option<TemplateValue> = None;
    if resources.is_empty() {
        return None;
    }
    for resource in resources {
        let candidate = extract(resource)?;
        match &target {
            None => target = Some(candidate),
            Some(existing) if *existing == candidate => {}
            Some(_) => return None,
        }
    }
    target
}

/// Bucket name for an S3 policy resource entry: `Ref`, `GetAtt .Arn`,
/// a `${X.Arn}`-style `Sub`, or a literal ARN.
fn bucket_from_resource(value: &TemplateValue) -> Option<TemplateValue> {
    if let Some(target) = arn_target_from_resource(value) {
        return Some(target);
    }
    if let Some(Intrinsic::Sub { template, .. }) = value.as_intrinsic() {
        for segment in template.segments() {
            if let SubSegment::Reference {
                name,
                attribute: Some(attr),
            } = segment
            {
                if attr == "Arn" {
                    return Some(TemplateValue::reference(name.clone()));
                }
            }
        }
    }
    None
}

/// `Ref` / `GetAtt .Arn` / literal-ARN extraction shared by bucket and queue
/// targets.
fn arn_target_from_resource(value: &TemplateValue) -> Option<TemplateValue> {
    match value.as_intrinsic() {
        Some(Intrinsic::Ref(name)) => return Some(TemplateValue::reference(name.clone())),
        Some(Intrinsic::GetAtt {
            logical_id,
            attribute,
        }) if attribute == "Arn" => {
            return Some(TemplateValue::reference(logical_id.clone()));
        }
        _ => {}
    }
    if let TemplateValue::String(arn) = value {
        let parts: Vec<&str> = arn.split(':').collect();
        if parts.first() == Some(&"arn") && parts.len() >= 6 && !parts[5].is_empty() {
            let name = parts[5].split('/').next().unwrap_or(parts[5]);
            if !name.is_empty() {
                return Some(TemplateValue::string(name));
            }
        }
    }
    None
}

fn table_from_resource(value: &TemplateValue) -> Option<String> {
    match value.as_intrinsic() {
        Some(Intrinsic::GetAtt {
            logical_id,
            attribute,
        }) if attribute == "Arn" => Some(logical_id.clone()),
        _ => None,
    }
}

/// A role CDK synthesizes for every function: lambda assume-role trust and
/// the basic execution managed policy, nothing else.
fn is_basic_execution_role(resource: &Resource) -> bool {
    if !resource.is_type("AWS::IAM::Role") {
        return false;
    }
    if resource
        .properties
        .keys()
        .any(|key| key != "AssumeRolePolicyDocument" && key != "ManagedPolicyArns")
    {
        return false;
    }
    let Some(assume) = resource.prop("AssumeRolePolicyDocument") else {
        return false;
    };
    if !assume_allows_lambda(assume) {
        return false;
    }
    let Some(managed) = resource
        .prop("ManagedPolicyArns")
        .and_then(TemplateValue::as_sequence)
    else {
        return false;
    };
    managed.len() == 1
        && helpers::value_fingerprint(&managed[0]).contains("awslambdabasicexecutionrole")
}

fn assume_allows_lambda(doc: &TemplateValue) -> bool {
    let statements = doc
        .as_mapping()
        .and_then(|map| map.get("Statement"))
        .map(statement_list)
        .unwrap_or_default();
    statements.iter().any(|statement| {
        if !allows(statement) {
            return false;
        }
        let has_assume = actions_of(statement)
            .map_or(false, |actions| actions.contains("sts:AssumeRole"));
        let lambda_principal = statement
            .as_mapping()
            .and_then(|map| map.get("Principal"))
            .and_then(TemplateValue::as_mapping)
            .and_then(|principal| principal.get("Service"))
            .map_or(false, |service| match service {
                TemplateValue::String(name) => name == "lambda.amazonaws.com",
                TemplateValue::Sequence(items) => items
                    .iter()
                    .any(|item| item.as_str() == Some("lambda.amazonaws.com")),
                _ => false,
            });
        has_assume && lambda_principal
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::PatternLibrary;
    use pretty_assertions::assert_eq;
    use samify_template::parse_str;

    fn fold(doc: &mut TemplateDocument) -> RefactorPlan {
        let mut plan = RefactorPlan::new();
        PatternLibrary::with_rules(vec![Box::new(FunctionFold)])
            .fold(doc, &mut plan)
            .unwrap();
        plan
    }

    const INLINE_FUNCTION: &str = r#"
Resources:
  Handler:
    Type: AWS::Lambda::Function
    Properties:
      Handler: index.handler
      Runtime: python3.12
      MemorySize: 256
      Timeout: 30
      Code:
        ZipFile: |
          def handler(event, context):
              return "ok"
"#;

    #[test]
    fn inline_function_folds_and_keeps_payload() {
        let mut doc = parse_str(INLINE_FUNCTION).unwrap();
        let plan = fold(&mut doc);

        let function = doc.resource("Handler").unwrap();
        assert_eq!(function.resource_type, "AWS::Serverless::Function");
        let inline = function.prop("InlineCode").unwrap().as_str().unwrap();
        assert_eq!(inline, "def handler(event, context):\n    return \"ok\"");
        assert!(function.prop("Code").is_none());
        assert!(function.prop("Events").is_none());
        assert_eq!(plan.entries().len(), 1);
        assert!(doc.transform.as_ref().unwrap().includes_sam());
    }

    #[test]
    fn s3_code_becomes_code_uri() {
        let mut doc = parse_str(
            r"
Resources:
  Handler:
    Type: AWS::Lambda::Function
    Properties:
      Handler: index.handler
      Runtime: nodejs20.x
      Code:
        S3Bucket: cdk-assets
        S3Key: abc.zip
",
        )
        .unwrap();
        fold(&mut doc);
        let function = doc.resource("Handler").unwrap();
        let uri = function.prop("CodeUri").unwrap().as_mapping().unwrap();
        assert_eq!(uri.get("Bucket").unwrap().as_str(), Some("cdk-assets"));
        assert_eq!(uri.get("Key").unwrap().as_str(), Some("abc.zip"));
    }

    #[test]
    fn container_function_stays_raw() {
        let mut doc = parse_str(
            r"
Resources:
  Img:
    Type: AWS::Lambda::Function
    Properties:
      PackageType: Image
      Code:
        ImageUri: 123.dkr.ecr.example/img:latest
",
        )
        .unwrap();
        let plan = fold(&mut doc);
        assert_eq!(doc.resource("Img").unwrap().resource_type, "AWS::Lambda::Function");
        assert!(plan.folds().next().is_none());
    }

    const FUNCTION_WITH_ROLE: &str = r#"
Resources:
  Handler:
    Type: AWS::Lambda::Function
    DependsOn: HandlerRole
    Properties:
      Handler: index.handler
      Runtime: python3.12
      Role: !GetAtt HandlerRole.Arn
      Code:
        ZipFile: "def handler(e, c): return 1"
  HandlerRole:
    Type: AWS::IAM::Role
    Properties:
      AssumeRolePolicyDocument:
        Version: '2012-10-17'
        Statement:
          - Effect: Allow
            Action: sts:AssumeRole
            Principal:
              Service: lambda.amazonaws.com
      ManagedPolicyArns:
        - !Sub 'arn:${AWS::Partition}:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole'
"#;

    #[test]
    fn basic_execution_role_is_absorbed() {
        let mut doc = parse_str(FUNCTION_WITH_ROLE).unwrap();
        fold(&mut doc);
        assert!(doc.resource("HandlerRole").is_none());
        let function = doc.resource("Handler").unwrap();
        assert!(function.prop("Role").is_none());
        assert!(function.depends_on.is_none());
    }

    #[test]
    fn referenced_role_survives() {
        let extra = "
  Other:
    Type: AWS::SNS::Topic
    Properties:
      Tag: !GetAtt HandlerRole.Arn
";
        let mut doc = parse_str(&format!("{FUNCTION_WITH_ROLE}{extra}")).unwrap();
        fold(&mut doc);
        assert!(doc.resource("HandlerRole").is_some());
        let function = doc.resource("Handler").unwrap();
        assert!(function.prop("Role").is_some());
    }

    const FUNCTION_WITH_POLICIES: &str = r#"
Resources:
  Handler:
    Type: AWS::Lambda::Function
    Properties:
      Handler: index.handler
      Runtime: python3.12
      Role: !GetAtt HandlerRole.Arn
      Code:
        ZipFile: "def handler(e, c): return 1"
  HandlerRole:
    Type: AWS::IAM::Role
    Properties:
      AssumeRolePolicyDocument:
        Statement:
          - Effect: Allow
            Action: sts:AssumeRole
            Principal:
              Service: lambda.amazonaws.com
      ManagedPolicyArns:
        - arn:aws:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole
  HandlerPolicy:
    Type: AWS::IAM::Policy
    Properties:
      PolicyName: handler
      Roles: [!Ref HandlerRole]
      PolicyDocument:
        Statement:
          - Effect: Allow
            Action: [s3:GetObject, s3:ListBucket]
            Resource: [!GetAtt Files.Arn]
          - Effect: Allow
            Action: [dynamodb:GetItem, dynamodb:PutItem]
            Resource: [!GetAtt Orders.Arn]
  Files:
    Type: AWS::S3::Bucket
  Orders:
    Type: AWS::DynamoDB::Table
"#;

    #[test]
    fn expressible_policies_become_templates() {
        let mut doc = parse_str(FUNCTION_WITH_POLICIES).unwrap();
        let plan = fold(&mut doc);

        // Fully expressible: the raw policy and basic role both disappear.
        assert!(doc.resource("HandlerPolicy").is_none());
        assert!(doc.resource("HandlerRole").is_none());

        let function = doc.resource("Handler").unwrap();
        let policies = function.prop("Policies").unwrap().as_sequence().unwrap();
        assert_eq!(policies.len(), 2);
        let rendered = format!("{policies:?}");
        assert!(rendered.contains("S3ReadPolicy"));
        assert!(rendered.contains("DynamoDBCrudPolicy"));
        assert!(!plan.needs_review());
    }

    #[test]
    fn unsupported_statements_stay_on_raw_policy_flagged_for_review() {
        let mut doc = parse_str(&FUNCTION_WITH_POLICIES.replace(
            "          - Effect: Allow\n            Action: [dynamodb:GetItem, dynamodb:PutItem]\n            Resource: [!GetAtt Orders.Arn]\n",
            "          - Effect: Allow\n            Action: [execute-api:ManageConnections]\n            Resource: ['*']\n",
        ))
        .unwrap();
        let plan = fold(&mut doc);

        // The unsupported statement survives on the raw policy resource.
        let policy = doc.resource("HandlerPolicy").unwrap();
        let statements = policy
            .prop("PolicyDocument")
            .and_then(TemplateValue::as_mapping)
            .and_then(|map| map.get("Statement"))
            .and_then(TemplateValue::as_sequence)
            .unwrap();
        assert_eq!(statements.len(), 1);
        assert!(format!("{statements:?}").contains("ManageConnections"));

        // The expressible one still folded, and the plan demands review.
        let function = doc.resource("Handler").unwrap();
        assert!(function.prop("Policies").is_some());
        assert!(plan.needs_review());

        // The role stays: the surviving raw policy still needs it.
        assert!(doc.resource("HandlerRole").is_some());
    }
}
