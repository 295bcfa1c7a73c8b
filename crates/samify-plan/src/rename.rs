//! Rename plan: old logical ID to new logical ID with provenance.

use indexmap::IndexMap;
use serde::Serialize;

/// How a final name was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NameStrategy {
    /// Name kept as-is
    Identity,
    /// The synthesized 8-hex disambiguation suffix was stripped
    HashStripped,
    /// A semantic simplification pattern was applied after hash stripping
    Semantic,
    /// Collision resolved by appending the resource's type suffix
    TypeSuffix,
    /// Collision resolved by appending an incrementing counter
    Counter,
}

/// One planned rename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenameEntry {
    pub new_id: String,

    /// CDK construct path the name was derived from, when metadata had one
    pub construct_path: Option<String>,

    pub strategy: NameStrategy,
}

/// Ordered mapping of old logical ID to its planned replacement.
///
/// Identity mappings are not stored: an entry always changes the name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenamePlan {
    entries: IndexMap<String, RenameEntry>,
}

impl RenamePlan {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mapping. Identity mappings are ignored.
    pub fn insert(
        &mut self,
        old_id: impl Into<String>,
        new_id: impl Into<String>,
        construct_path: Option<String>,
        strategy: NameStrategy,
    ) {
        let old_id = old_id.into();
        let new_id = new_id.into();
        if old_id == new_id {
            return;
        }
        self.entries.insert(
            old_id,
            RenameEntry {
                new_id,
                construct_path,
                strategy,
            },
        );
    }

    /// The planned new name for an old ID.
    #[must_use]
    pub fn new_id(&self, old_id: &str) -> Option<&str> {
        self.entries.get(old_id).map(|entry| entry.new_id.as_str())
    }

    /// Rename `name`, or return it unchanged when it is not in the plan.
    #[must_use]
    pub fn apply<'a>(&'a self, name: &'a str) -> &'a str {
        self.new_id(name).unwrap_or(name)
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RenameEntry)> {
        self.entries.iter().map(|(old, entry)| (old.as_str(), entry))
    }

    /// All planned new names.
    pub fn new_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(|entry| entry.new_id.as_str())
    }
}
