//! Refactor plan: the structured audit trail of a pipeline run.
//!
//! Every rename, fold, and asset decision appends exactly one entry.
//! Information loss during folding is recorded here as annotations; it is
//! never an error, and it never vanishes silently.

mod rename;

pub use rename::{NameStrategy, RenameEntry, RenamePlan};

use serde::Serialize;

/// A note on information that could not be carried into a folded construct
/// verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LossNote {
    /// What the note is about (a property, a statement, a resource)
    pub subject: String,

    /// What happened to it
    pub detail: String,

    /// True when a human should look before deploying
    pub manual_review: bool,
}

impl LossNote {
    /// Informational note.
    #[inline]
    pub fn info(subject: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            detail: detail.into(),
            manual_review: false,
        }
    }

    /// Note that flags the fold for manual review.
    #[inline]
    pub fn review(subject: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            detail: detail.into(),
            manual_review: true,
        }
    }
}

/// Where an asset ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "placement", rename_all = "kebab-case")]
pub enum AssetPlacement {
    /// Payload kept inline in the document
    Inline,
    /// Bytes staged at a path relative to the output document
    Staged { path: String },
}

/// One recorded operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum PlanEntry {
    /// A logical ID was renamed
    Rename {
        old_id: String,
        new_id: String,
        construct_path: Option<String>,
        strategy: NameStrategy,
    },

    /// A fold rule collapsed resources into a higher-level construct
    Fold {
        rule: String,
        consumed: Vec<String>,
        produced: Vec<String>,
        notes: Vec<LossNote>,
    },

    /// An asset placement decision
    Asset {
        logical_id: String,
        #[serde(flatten)]
        placement: AssetPlacement,
    },

    /// A resource was inspected but deliberately left untouched
    Skipped { subject: String, reason: String },
}

/// Append-only record of every operation performed during a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RefactorPlan {
    entries: Vec<PlanEntry>,
}

impl RefactorPlan {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record every mapping of an applied rename plan, in plan order.
    pub fn record_renames(&mut self, plan: &RenamePlan) {
        for (old_id, entry) in plan.iter() {
            self.entries.push(PlanEntry::Rename {
                old_id: old_id.to_string(),
                new_id: entry.new_id.clone(),
                construct_path: entry.construct_path.clone(),
                strategy: entry.strategy,
            });
        }
    }

    /// Record one applied fold.
    pub fn record_fold(
        &mut self,
        rule: impl Into<String>,
        consumed: Vec<String>,
        produced: Vec<String>,
        notes: Vec<LossNote>,
    ) {
        self.entries.push(PlanEntry::Fold {
            rule: rule.into(),
            consumed,
            produced,
            notes,
        });
    }

    /// Record an asset placement.
    pub fn record_asset(&mut self, logical_id: impl Into<String>, placement: AssetPlacement) {
        self.entries.push(PlanEntry::Asset {
            logical_id: logical_id.into(),
            placement,
        });
    }

    /// Record a resource a rule looked at but left as-is.
    pub fn record_skip(&mut self, subject: impl Into<String>, reason: impl Into<String>) {
        self.entries.push(PlanEntry::Skipped {
            subject: subject.into(),
            reason: reason.into(),
        });
    }

    #[inline]
    #[must_use]
    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when any fold entry carries a manual-review note.
    #[must_use]
    pub fn needs_review(&self) -> bool {
        self.entries.iter().any(|entry| match entry {
            PlanEntry::Fold { notes, .. } => notes.iter().any(|note| note.manual_review),
            _ => false,
        })
    }

    /// Fold entries only.
    pub fn folds(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries
            .iter()
            .filter(|entry| matches!(entry, PlanEntry::Fold { .. }))
    }

    /// Serialize the whole plan as pretty JSON.
    ///
    /// # Errors
    /// Propagates serializer failures.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn plan_entries_keep_insertion_order() {
        let mut plan = RefactorPlan::new();
        plan.record_fold("function-fold", vec!["Fn".into()], vec!["Fn".into()], vec![]);
        plan.record_asset("Fn", AssetPlacement::Inline);
        plan.record_skip("Url", "cors shape not expressible");

        let kinds: Vec<&str> = plan
            .entries()
            .iter()
            .map(|entry| match entry {
                PlanEntry::Rename { .. } => "rename",
                PlanEntry::Fold { .. } => "fold",
                PlanEntry::Asset { .. } => "asset",
                PlanEntry::Skipped { .. } => "skipped",
            })
            .collect();
        assert_eq!(kinds, vec!["fold", "asset", "skipped"]);
    }

    #[test]
    fn review_notes_flag_the_plan() {
        let mut plan = RefactorPlan::new();
        assert!(!plan.needs_review());
        plan.record_fold(
            "function-fold",
            vec!["Fn".into()],
            vec!["Fn".into()],
            vec![LossNote::review("Policy", "statement not expressible")],
        );
        assert!(plan.needs_review());
    }

    #[test]
    fn plan_serializes_to_json() {
        let mut plan = RefactorPlan::new();
        plan.record_asset("Fn", AssetPlacement::Staged { path: "src/Fn".into() });
        let json = plan.to_json().unwrap();
        assert!(json.contains("\"op\": \"asset\""));
        assert!(json.contains("src/Fn"));
    }
}
