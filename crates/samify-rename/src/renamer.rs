//! Plan application: validate, rewrite a working copy, verify integrity,
//! then swap.

use std::collections::{BTreeSet, HashSet};

use samify_plan::RenamePlan;
use samify_template::{
    DependsOn, Intrinsic, ReferenceIndex, SubSegment, TemplateDocument, TemplateValue, ValueMap,
};

use crate::RenameConflict;

/// Apply every mapping in `plan` to `doc`.
///
/// # Errors
/// [`RenameConflict`] when the plan is inconsistent with the document; the
/// document is left exactly as it was.
pub fn apply(doc: &mut TemplateDocument, plan: &RenamePlan) -> Result<(), RenameConflict> {
    if plan.is_empty() {
        return Ok(());
    }
    validate(doc, plan)?;

    // References the input already failed to resolve (tolerated, but they
    // must not grow): compare post-apply dangling against this baseline.
    let baseline: HashSet<String> = ReferenceIndex::build(doc)
        .dangling(doc)
        .into_iter()
        .map(|site| plan.apply(&site.target).to_string())
        .collect();

    let mut working = doc.clone();
    rewrite_document(&mut working, plan);

    let index = ReferenceIndex::build(&working);
    let dangling: BTreeSet<String> = index
        .dangling(&working)
        .into_iter()
        .map(|site| site.target.clone())
        .filter(|target| !baseline.contains(target))
        .collect();
    if !dangling.is_empty() {
        return Err(RenameConflict::Dangling {
            targets: dangling.into_iter().collect(),
        });
    }

    tracing::debug!("applied {} renames", plan.len());
    *doc = working;
    Ok(())
}

fn validate(doc: &TemplateDocument, plan: &RenamePlan) -> Result<(), RenameConflict> {
    let mut seen_targets: HashSet<&str> = HashSet::new();
    let renamed: HashSet<&str> = plan.iter().map(|(old, _)| old).collect();

    for (old, entry) in plan.iter() {
        if !doc.resources.contains_key(old) && !doc.conditions.contains_key(old) {
            return Err(RenameConflict::UnknownId(old.to_string()));
        }
        if !seen_targets.insert(&entry.new_id) {
            return Err(RenameConflict::DuplicateTarget(entry.new_id.clone()));
        }
        // Colliding with a surviving (not-renamed) ID corrupts the graph.
        let survives = (doc.defines(&entry.new_id) || doc.conditions.contains_key(&entry.new_id))
            && !renamed.contains(entry.new_id.as_str());
        if survives {
            return Err(RenameConflict::TargetCollision {
                old: old.to_string(),
                new: entry.new_id.clone(),
            });
        }
    }
    Ok(())
}

fn rewrite_document(doc: &mut TemplateDocument, plan: &RenamePlan) {
    // Resource keys, preserving document order.
    let resources = std::mem::take(&mut doc.resources);
    doc.resources = resources
        .into_iter()
        .map(|(id, mut resource)| {
            if let Some(depends) = resource.depends_on.take() {
                resource.depends_on = Some(rewrite_depends_on(depends, plan));
            }
            if let Some(condition) = resource.condition.take() {
                resource.condition = Some(plan.apply(&condition).to_string());
            }
            rewrite_map(&mut resource.properties, plan);
            rewrite_map(&mut resource.metadata, plan);
            rewrite_map(&mut resource.extra, plan);
            (plan.apply(&id).to_string(), resource)
        })
        .collect();

    // Condition names and their section keys.
    let conditions = std::mem::take(&mut doc.conditions);
    doc.conditions = conditions
        .into_iter()
        .map(|(name, mut expr)| {
            rewrite_value(&mut expr, plan);
            (plan.apply(&name).to_string(), expr)
        })
        .collect();

    for body in doc.outputs.values_mut() {
        if let Some(map) = body.as_mapping_mut() {
            if let Some(TemplateValue::String(condition)) = map.get_mut("Condition") {
                *condition = plan.apply(condition).to_string();
            }
        }
        rewrite_value(body, plan);
    }
    rewrite_map(&mut doc.globals, plan);
    rewrite_map(&mut doc.rules, plan);
    rewrite_map(&mut doc.metadata, plan);
}

fn rewrite_depends_on(depends: DependsOn, plan: &RenamePlan) -> DependsOn {
    match depends {
        DependsOn::Single(target) => DependsOn::Single(plan.apply(&target).to_string()),
        DependsOn::List(targets) => DependsOn::List(
            targets
                .into_iter()
                .map(|target| plan.apply(&target).to_string())
                .collect(),
        ),
    }
}

fn rewrite_map(map: &mut ValueMap, plan: &RenamePlan) {
    for value in map.values_mut() {
        rewrite_value(value, plan);
    }
}

/// Rewrite every reference form inside a value. Only identifiers change;
/// literal strings and all other data pass through untouched.
fn rewrite_value(value: &mut TemplateValue, plan: &RenamePlan) {
    match value {
        TemplateValue::Sequence(items) => {
            for item in items {
                rewrite_value(item, plan);
            }
        }
        TemplateValue::Mapping(map) => rewrite_map(map, plan),
        TemplateValue::Intrinsic(node) => rewrite_intrinsic(node, plan),
        _ => {}
    }
}

fn rewrite_intrinsic(node: &mut Intrinsic, plan: &RenamePlan) {
    match node {
        Intrinsic::Ref(name) | Intrinsic::Condition(name) => {
            *name = plan.apply(name).to_string();
        }
        Intrinsic::GetAtt { logical_id, .. } => {
            *logical_id = plan.apply(logical_id).to_string();
        }
        Intrinsic::Sub {
            template,
            variables,
        } => {
            let locals: Vec<String> = variables
                .as_ref()
                .map(|vars| vars.keys().cloned().collect())
                .unwrap_or_default();
            for segment in template.segments_mut() {
                if let SubSegment::Reference { name, .. } = segment {
                    if !locals.iter().any(|local| local == name) {
                        *name = plan.apply(name).to_string();
                    }
                }
            }
            if let Some(vars) = variables {
                rewrite_map(vars, plan);
            }
        }
        Intrinsic::Join { parts, .. } => {
            for part in parts {
                rewrite_value(part, plan);
            }
        }
        Intrinsic::If {
            condition,
            when_true,
            when_false,
        } => {
            *condition = plan.apply(condition).to_string();
            rewrite_value(when_true, plan);
            rewrite_value(when_false, plan);
        }
        Intrinsic::ImportValue(payload) | Intrinsic::Other { payload, .. } => {
            rewrite_value(payload, plan);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use samify_plan::NameStrategy;
    use samify_template::{parse_str, to_yaml_string};

    const TEMPLATE: &str = r"
Conditions:
  UseProdA1B2C3D4: !Equals [a, a]
Resources:
  FnA1B2C3D4:
    Type: AWS::Lambda::Function
    Condition: UseProdA1B2C3D4
    DependsOn: QueueA1B2C3D4
    Properties:
      QueueUrl: !Ref QueueA1B2C3D4
      QueueArn: !GetAtt QueueA1B2C3D4.Arn
      Endpoint: !Sub 'https://${QueueA1B2C3D4}.${AWS::Region}'
      Flag: !If [UseProdA1B2C3D4, on, off]
  QueueA1B2C3D4:
    Type: AWS::SQS::Queue
Outputs:
  QueueName:
    Condition: UseProdA1B2C3D4
    Value: !GetAtt QueueA1B2C3D4.QueueName
    Export:
      Name: !Sub '${FnA1B2C3D4}-queue'
";

    fn plan(entries: &[(&str, &str)]) -> RenamePlan {
        let mut plan = RenamePlan::new();
        for (old, new) in entries {
            plan.insert(*old, *new, None, NameStrategy::HashStripped);
        }
        plan
    }

    #[test]
    fn rewrites_every_reference_form() {
        let mut doc = parse_str(TEMPLATE).unwrap();
        apply(
            &mut doc,
            &plan(&[
                ("FnA1B2C3D4", "Fn"),
                ("QueueA1B2C3D4", "Queue"),
                ("UseProdA1B2C3D4", "UseProd"),
            ]),
        )
        .unwrap();

        let text = to_yaml_string(&doc).unwrap();
        assert!(!text.contains("A1B2C3D4"), "stale id in output:\n{text}");
        assert!(doc.resource("Queue").is_some());
        assert!(doc.conditions.contains_key("UseProd"));
        assert_eq!(
            doc.resource("Fn").unwrap().depends_on,
            Some(DependsOn::Single("Queue".to_string()))
        );
        // Post-apply, nothing dangles.
        let index = ReferenceIndex::build(&doc);
        assert!(index.dangling(&doc).is_empty());
    }

    #[test]
    fn renaming_never_touches_types_or_literals() {
        let mut doc = parse_str(TEMPLATE).unwrap();
        apply(&mut doc, &plan(&[("QueueA1B2C3D4", "Queue")])).unwrap();
        let queue = doc.resource("Queue").unwrap();
        assert_eq!(queue.resource_type, "AWS::SQS::Queue");
        let function = doc.resource("FnA1B2C3D4").unwrap();
        let endpoint = function.prop("Endpoint").unwrap();
        match endpoint.as_intrinsic() {
            Some(Intrinsic::Sub { template, .. }) => {
                assert_eq!(template.render(), "https://${Queue}.${AWS::Region}");
            }
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn unknown_id_is_a_conflict_and_doc_is_untouched() {
        let mut doc = parse_str(TEMPLATE).unwrap();
        let before = doc.clone();
        let err = apply(&mut doc, &plan(&[("Nope", "Also")])).unwrap_err();
        assert!(matches!(err, RenameConflict::UnknownId(id) if id == "Nope"));
        assert_eq!(doc, before);
    }

    #[test]
    fn collision_with_surviving_id_is_rejected() {
        let mut doc = parse_str(TEMPLATE).unwrap();
        let before = doc.clone();
        let err = apply(&mut doc, &plan(&[("FnA1B2C3D4", "QueueA1B2C3D4")])).unwrap_err();
        assert!(matches!(err, RenameConflict::TargetCollision { .. }));
        assert_eq!(doc, before);
    }

    #[test]
    fn duplicate_targets_are_rejected() {
        let mut doc = parse_str(TEMPLATE).unwrap();
        let err = apply(
            &mut doc,
            &plan(&[("FnA1B2C3D4", "Same"), ("QueueA1B2C3D4", "Same")]),
        )
        .unwrap_err();
        assert!(matches!(err, RenameConflict::DuplicateTarget(id) if id == "Same"));
    }

    #[test]
    fn swapping_two_ids_is_atomic() {
        let mut doc = parse_str(
            r"
Resources:
  A:
    Type: X
    Properties:
      Peer: !Ref B
  B:
    Type: X
    Properties:
      Peer: !Ref A
",
        )
        .unwrap();
        apply(&mut doc, &plan(&[("A", "B"), ("B", "A")])).unwrap();
        let a = doc.resource("A").unwrap();
        assert_eq!(a.prop("Peer").unwrap().referenced_id(), Some("B"));
        let index = ReferenceIndex::build(&doc);
        assert!(index.dangling(&doc).is_empty());
    }

    #[test]
    fn sub_variable_bindings_shadow_renames() {
        let mut doc = parse_str(
            "Resources:\n  RealA1B2C3D4:\n    Type: X\n  U:\n    Type: X\n    Properties:\n      V: !Sub ['${RealA1B2C3D4}', {RealA1B2C3D4: literal}]\n",
        )
        .unwrap();
        apply(&mut doc, &plan(&[("RealA1B2C3D4", "Real")])).unwrap();
        let user = doc.resource("U").unwrap();
        match user.prop("V").unwrap().as_intrinsic() {
            Some(Intrinsic::Sub { template, .. }) => {
                // The bound variable name stays; only true references rename.
                assert_eq!(template.render(), "${RealA1B2C3D4}");
            }
            other => panic!("unexpected value: {other:?}"),
        }
    }
}

#[cfg(test)]
mod properties {
    use super::*;
    use proptest::prelude::*;
    use samify_plan::NameStrategy;
    use samify_template::parse_str;

    fn arb_suffix() -> impl Strategy<Value = String> {
        "[A-F0-9]{8}"
    }

    proptest! {
        /// Reference integrity: after applying any hash-strip rename plan,
        /// every reference site resolves to an ID present in the document.
        #[test]
        fn renames_preserve_reference_integrity(a in arb_suffix(), b in arb_suffix()) {
            prop_assume!(a != b);
            let text = format!(
                "Resources:\n  Fn{a}:\n    Type: AWS::Lambda::Function\n    Properties:\n      Q: !Ref Queue{b}\n      QArn: !GetAtt Queue{b}.Arn\n  Queue{b}:\n    Type: AWS::SQS::Queue\n"
            );
            let mut doc = parse_str(&text).unwrap();
            let mut plan = RenamePlan::new();
            plan.insert(format!("Fn{a}"), "Fn", None, NameStrategy::HashStripped);
            plan.insert(format!("Queue{b}"), "Queue", None, NameStrategy::HashStripped);
            apply(&mut doc, &plan).unwrap();

            let index = ReferenceIndex::build(&doc);
            prop_assert!(index.dangling(&doc).is_empty());
            prop_assert!(doc.resource("Fn").is_some());
            prop_assert!(doc.resource("Queue").is_some());
        }
    }
}
