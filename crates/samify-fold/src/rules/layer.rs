//! Layer folding: `AWS::Lambda::LayerVersion` with resolvable content
//! becomes an `AWS::Serverless::LayerVersion`.

use samify_plan::RefactorPlan;
use samify_template::{Resource, TemplateDocument, TemplateValue, ValueMap};

use crate::rule::{FoldClaim, FoldRule, MatchContext};
use crate::FOLD_LAYER;

const CARRIED_PROPS: [&str; 6] = [
    "Description",
    "LayerName",
    "CompatibleRuntimes",
    "LicenseInfo",
    "RetentionPolicy",
    "CompatibleArchitectures",
];

pub struct LayerFold;

impl FoldRule for LayerFold {
    fn name(&self) -> &'static str {
        FOLD_LAYER
    }

    fn priority(&self) -> u32 {
        61
    }

    fn claims(&self, ctx: &MatchContext<'_>) -> Vec<FoldClaim> {
        ctx.doc
            .resources
            .iter()
            .filter(|(_, resource)| content_uri(resource).is_some())
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
        let Some(uri) = content_uri(resource) else {
            return false;
        };

        let old_props = std::mem::take(&mut resource.properties);
        let mut props = ValueMap::new();
        props.insert("ContentUri".to_string(), uri);
        for key in CARRIED_PROPS {
            if let Some(value) = old_props.get(key) {
                props.insert(key.to_string(), value.clone());
            }
        }
        resource.resource_type = "AWS::Serverless::LayerVersion".to_string();
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

/// Content location: the CDK asset path when the metadata names one, the
/// S3 location otherwise.
fn content_uri(resource: &Resource) -> Option<TemplateValue> {
    if !resource.is_type("AWS::Lambda::LayerVersion") {
        return None;
    }
    if let Some(asset_path) = resource.asset_path() {
        let applies = resource
            .asset_property()
            .map_or(true, |property| property == "Content");
        if applies {
            return Some(TemplateValue::string(asset_path));
        }
    }
    let content = resource.prop("Content")?.as_mapping()?;
    let bucket = content.get("S3Bucket")?;
    let key = content.get("S3Key")?;
    let mut uri = ValueMap::new();
    uri.insert("Bucket".to_string(), bucket.clone());
    uri.insert("Key".to_string(), key.clone());
    if let Some(version) = content.get("S3ObjectVersion") {
        uri.insert("Version".to_string(), version.clone());
    }
    Some(TemplateValue::Mapping(uri))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::PatternLibrary;
    use pretty_assertions::assert_eq;
    use samify_template::parse_str;

    #[test]
    fn layer_with_s3_content_folds() {
        let mut doc = parse_str(
            r"
Resources:
  Shared:
    Type: AWS::Lambda::LayerVersion
    Properties:
      LayerName: shared
      CompatibleRuntimes: [python3.12]
      Content:
        S3Bucket: assets
        S3Key: layer.zip
",
        )
        .unwrap();
        let mut plan = RefactorPlan::new();
        PatternLibrary::with_rules(vec![Box::new(LayerFold)])
            .fold(&mut doc, &mut plan)
            .unwrap();

        let layer = doc.resource("Shared").unwrap();
        assert_eq!(layer.resource_type, "AWS::Serverless::LayerVersion");
        let uri = layer.prop("ContentUri").unwrap().as_mapping().unwrap();
        assert_eq!(uri.get("Bucket").unwrap().as_str(), Some("assets"));
        assert!(layer.prop("Content").is_none());
    }

    #[test]
    fn layer_without_content_stays() {
        let mut doc = parse_str(
            "Resources:\n  Shared:\n    Type: AWS::Lambda::LayerVersion\n    Properties:\n      LayerName: shared\n",
        )
        .unwrap();
        let mut plan = RefactorPlan::new();
        PatternLibrary::with_rules(vec![Box::new(LayerFold)])
            .fold(&mut doc, &mut plan)
            .unwrap();
        assert_eq!(
            doc.resource("Shared").unwrap().resource_type,
            "AWS::Lambda::LayerVersion"
        );
    }
}
