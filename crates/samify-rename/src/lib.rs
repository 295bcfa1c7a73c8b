//! Samify Renamer
//!
//! Applies a [`RenamePlan`] to a document atomically: either every mapping is
//! rewritten and the graph stays fully consistent, or the call fails with
//! [`RenameConflict`] and the document is untouched. Renaming only ever
//! changes identifiers; never type tags or property values.

mod renamer;

pub use renamer::apply;

/// Why a rename plan could not be applied.
#[derive(Debug, thiserror::Error)]
pub enum RenameConflict {
    /// A plan entry names an ID the document does not define
    #[error("plan renames unknown id: {0}")]
    UnknownId(String),

    /// A new name collides with an unrelated surviving ID
    #[error("rename {old} -> {new} collides with an existing id")]
    TargetCollision { old: String, new: String },

    /// Two plan entries produce the same new name
    #[error("two renames target the same id: {0}")]
    DuplicateTarget(String),

    /// Applying the plan would leave references to retired IDs
    #[error("rename left dangling references: {targets:?}")]
    Dangling { targets: Vec<String> },
}
