//! Fold rule trait and the claim-then-rewrite engine.
//!
//! Rules are matched in two phases. First every rule states its claims (the
//! logical IDs a fold would consume) against the read-only document;
//! overlapping claims from rules of tied priority are a configuration defect
//! and abort the run before any rewrite. Then rules execute one priority
//! level at a time, re-matching against the mutated document so that a level
//! can expose idioms to the next (method folds empty out an API shell, the
//! shell fold then collapses it). A resource is consumed by at most one rule.

use std::collections::HashSet;

use samify_plan::RefactorPlan;
use samify_template::{DependencyGraph, ReferenceIndex, TemplateDocument};

use crate::FoldError;

/// The logical IDs one application of a rule would consume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldClaim {
    /// Primary resource the idiom is anchored on
    pub anchor: String,

    /// Every resource the rewrite removes or replaces (includes the anchor
    /// when the anchor itself is rewritten)
    pub consumed: Vec<String>,
}

impl FoldClaim {
    /// Claim anchored on a single rewritten resource.
    #[must_use]
    pub fn single(anchor: impl Into<String>) -> Self {
        let anchor = anchor.into();
        Self {
            consumed: vec![anchor.clone()],
            anchor,
        }
    }
}

/// Read-only match context handed to rules.
pub struct MatchContext<'a> {
    pub doc: &'a TemplateDocument,
    pub index: &'a ReferenceIndex,
    pub graph: &'a DependencyGraph,
}

/// One pattern: a matcher over a resource subgraph plus a rewrite that
/// replaces it with a SAM-native construct and any residue it cannot absorb.
pub trait FoldRule {
    /// Rule name as recorded in plan entries.
    fn name(&self) -> &'static str;

    /// Lower runs earlier; ties are only legal for rules that can never
    /// claim the same resource.
    fn priority(&self) -> u32;

    /// All applications of this rule against the current document.
    fn claims(&self, ctx: &MatchContext<'_>) -> Vec<FoldClaim>;

    /// Apply one previously claimed fold. Returns `false` when the claim no
    /// longer matches (another fold got there first); nothing is recorded in
    /// that case.
    fn rewrite(
        &self,
        doc: &mut TemplateDocument,
        claim: &FoldClaim,
        plan: &mut RefactorPlan,
    ) -> bool;

    /// Resources this rule looked at but deliberately left raw, as
    /// `(logical_id, reason)` pairs; recorded as plan annotations so the
    /// decision is visible. Called once against the final document.
    fn skips(&self, _ctx: &MatchContext<'_>) -> Vec<(String, String)> {
        Vec::new()
    }
}

/// Ordered collection of fold rules.
pub struct PatternLibrary {
    rules: Vec<Box<dyn FoldRule>>,
}

impl PatternLibrary {
    /// Library with the full standard rule set.
    #[must_use]
    pub fn standard() -> Self {
        Self::with_rules(crate::rules::standard_rules())
    }

    /// Library over an explicit rule list (unit tests fold one rule at a
    /// time this way).
    #[must_use]
    pub fn with_rules(mut rules: Vec<Box<dyn FoldRule>>) -> Self {
        rules.sort_by_key(|rule| rule.priority());
        Self { rules }
    }

    /// Run every rule over the document. Returns `true` when anything folded;
    /// the SAM transform is ensured in that case.
    ///
    /// # Errors
    /// [`FoldError::Ambiguous`] when two tied-priority rules claim the same
    /// resource; detected before any rewrite runs.
    pub fn fold(
        &self,
        doc: &mut TemplateDocument,
        plan: &mut RefactorPlan,
    ) -> Result<bool, FoldError> {
        self.check_ambiguity(doc)?;

        let mut consumed: HashSet<String> = HashSet::new();
        let mut changed = false;

        for level in self.priority_levels() {
            let rules: Vec<&dyn FoldRule> = self
                .rules
                .iter()
                .filter(|rule| rule.priority() == level)
                .map(|rule| rule.as_ref())
                .collect();

            // Claims for the whole level are taken against the same state.
            let index = ReferenceIndex::build(doc);
            let graph = DependencyGraph::build(doc, &index);
            let ctx = MatchContext {
                doc,
                index: &index,
                graph: &graph,
            };
            let mut level_claims: Vec<(usize, FoldClaim)> = Vec::new();
            for (slot, rule) in rules.iter().enumerate() {
                for claim in rule.claims(&ctx) {
                    level_claims.push((slot, claim));
                }
            }
            ambiguity_within_level(&rules, &level_claims)?;

            for (slot, claim) in level_claims {
                if claim.consumed.iter().any(|id| consumed.contains(id)) {
                    continue;
                }
                let rule = rules[slot];
                if rule.rewrite(doc, &claim, plan) {
                    tracing::debug!(rule = rule.name(), anchor = %claim.anchor, "applied fold");
                    consumed.extend(claim.consumed.iter().cloned());
                    changed = true;
                }
            }
        }

        // Annotations for idioms the rules recognized but left raw.
        let index = ReferenceIndex::build(doc);
        let graph = DependencyGraph::build(doc, &index);
        let ctx = MatchContext {
            doc,
            index: &index,
            graph: &graph,
        };
        for rule in &self.rules {
            for (subject, reason) in rule.skips(&ctx) {
                plan.record_skip(subject, reason);
            }
        }

        if changed {
            doc.ensure_sam_transform();
        }
        Ok(changed)
    }

    /// Pre-transform ambiguity check over the pristine document.
    fn check_ambiguity(&self, doc: &TemplateDocument) -> Result<(), FoldError> {
        let index = ReferenceIndex::build(doc);
        let graph = DependencyGraph::build(doc, &index);
        let ctx = MatchContext {
            doc,
            index: &index,
            graph: &graph,
        };
        for level in self.priority_levels() {
            let rules: Vec<&dyn FoldRule> = self
                .rules
                .iter()
                .filter(|rule| rule.priority() == level)
                .map(|rule| rule.as_ref())
                .collect();
            if rules.len() < 2 {
                continue;
            }
            let mut claims: Vec<(usize, FoldClaim)> = Vec::new();
            for (slot, rule) in rules.iter().enumerate() {
                for claim in rule.claims(&ctx) {
                    claims.push((slot, claim));
                }
            }
            ambiguity_within_level(&rules, &claims)?;
        }
        Ok(())
    }

    fn priority_levels(&self) -> Vec<u32> {
        let mut levels: Vec<u32> = self.rules.iter().map(|rule| rule.priority()).collect();
        levels.sort_unstable();
        levels.dedup();
        levels
    }
}

fn ambiguity_within_level(
    rules: &[&dyn FoldRule],
    claims: &[(usize, FoldClaim)],
) -> Result<(), FoldError> {
    for (i, (slot_a, claim_a)) in claims.iter().enumerate() {
        for (slot_b, claim_b) in claims.iter().skip(i + 1) {
            if slot_a == slot_b {
                continue;
            }
            let contested: Vec<String> = claim_a
                .consumed
                .iter()
                .filter(|id| claim_b.consumed.contains(id))
                .cloned()
                .collect();
            if !contested.is_empty() {
                return Err(FoldError::Ambiguous {
                    rule_a: rules[*slot_a].name().to_string(),
                    rule_b: rules[*slot_b].name().to_string(),
                    contested,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use samify_template::parse_str;

    struct Grabby {
        name: &'static str,
        priority: u32,
        target: &'static str,
    }

    impl FoldRule for Grabby {
        fn name(&self) -> &'static str {
            self.name
        }

        fn priority(&self) -> u32 {
            self.priority
        }

        fn claims(&self, ctx: &MatchContext<'_>) -> Vec<FoldClaim> {
            if ctx.doc.resources.contains_key(self.target) {
                vec![FoldClaim::single(self.target)]
            } else {
                Vec::new()
            }
        }

        fn rewrite(
            &self,
            doc: &mut TemplateDocument,
            claim: &FoldClaim,
            plan: &mut RefactorPlan,
        ) -> bool {
            if doc.resources.shift_remove(&claim.anchor).is_none() {
                return false;
            }
            plan.record_fold(self.name, claim.consumed.clone(), Vec::new(), Vec::new());
            true
        }
    }

    fn doc_with_one() -> TemplateDocument {
        parse_str("Resources:\n  Target:\n    Type: X\n").unwrap()
    }

    #[test]
    fn tied_priority_overlap_is_ambiguous_before_any_rewrite() {
        let library = PatternLibrary::with_rules(vec![
            Box::new(Grabby {
                name: "first",
                priority: 5,
                target: "Target",
            }),
            Box::new(Grabby {
                name: "second",
                priority: 5,
                target: "Target",
            }),
        ]);
        let mut doc = doc_with_one();
        let before = doc.clone();
        let mut plan = RefactorPlan::new();
        let err = library.fold(&mut doc, &mut plan).unwrap_err();
        assert!(matches!(err, FoldError::Ambiguous { .. }));
        // Surfaced before any transform ran.
        assert_eq!(doc, before);
        assert!(plan.is_empty());
    }

    #[test]
    fn higher_priority_rule_wins_across_levels() {
        let library = PatternLibrary::with_rules(vec![
            Box::new(Grabby {
                name: "late",
                priority: 9,
                target: "Target",
            }),
            Box::new(Grabby {
                name: "early",
                priority: 1,
                target: "Target",
            }),
        ]);
        let mut doc = doc_with_one();
        let mut plan = RefactorPlan::new();
        assert!(library.fold(&mut doc, &mut plan).unwrap());
        assert_eq!(plan.entries().len(), 1);
        assert!(format!("{:?}", plan.entries()[0]).contains("early"));
    }

    #[test]
    fn folding_sets_the_sam_transform() {
        let library = PatternLibrary::with_rules(vec![Box::new(Grabby {
            name: "only",
            priority: 1,
            target: "Target",
        })]);
        let mut doc = doc_with_one();
        let mut plan = RefactorPlan::new();
        library.fold(&mut doc, &mut plan).unwrap();
        assert!(doc.transform.as_ref().unwrap().includes_sam());
    }
}
