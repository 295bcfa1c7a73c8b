//! Deriving semantic logical IDs from construct metadata.
//!
//! The resolver turns synthesized names (`OrdersA1B2C3D4`) back into the
//! names a human wrote (`Orders`), resolving collisions deterministically:
//! the resource's type suffix first, then an incrementing counter.

use std::collections::HashSet;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;

use samify_plan::{NameStrategy, RenamePlan};
use samify_template::TemplateDocument;

use crate::bundle::MetadataBundle;

static SEMANTIC_PATTERNS: Lazy<Vec<(Regex, &str)>> = Lazy::new(|| {
    [
        (r"^(.+)ServiceRoleDefaultPolicy([A-F0-9]{8})?$", "${1}Policy"),
        (r"^(.+)ServiceRole([A-F0-9]{8})?$", "${1}Role"),
        (r"^(.+)DefaultPolicy([A-F0-9]{8})?$", "${1}Policy"),
        (r"^(.+)LogGroup([A-F0-9]{8})?$", "${1}Logs"),
    ]
    .iter()
    .filter_map(|(pattern, repl)| Regex::new(pattern).ok().map(|rx| (rx, *repl)))
    .collect()
});

static GENERATED_SIMPLIFICATIONS: Lazy<Vec<(Regex, &str)>> = Lazy::new(|| {
    [
        (r"^(.*Subnet\d+)Subnet$", "$1"),
        (r"^(.*RouteTable\d+)RouteTable$", "$1"),
        (r"^(.*Route\d+)Route$", "$1"),
    ]
    .iter()
    .filter_map(|(pattern, repl)| Regex::new(pattern).ok().map(|rx| (rx, *repl)))
    .collect()
});

/// Tunables for name derivation. Defaults mirror the readable-output mode.
#[derive(Debug, Clone, Copy)]
pub struct ResolverOptions {
    /// Strip the synthesized 8-hex disambiguation suffix
    pub strip_hashes: bool,

    /// Apply semantic simplifications (`ServiceRole` -> `Role`, ...)
    pub semantic_naming: bool,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            strip_hashes: true,
            semantic_naming: true,
        }
    }
}

/// Whether renaming actually ran; callers can tell a performed (possibly
/// empty) resolution from a skipped one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Metadata was available; the plan holds every non-identity mapping
    Performed(RenamePlan),

    /// No metadata bundle: the resolver degrades to identity
    Skipped,
}

impl Resolution {
    #[inline]
    #[must_use]
    pub fn performed(&self) -> bool {
        matches!(self, Self::Performed(_))
    }

    #[inline]
    #[must_use]
    pub fn plan(&self) -> Option<&RenamePlan> {
        match self {
            Self::Performed(plan) => Some(plan),
            Self::Skipped => None,
        }
    }
}

/// Resolve semantic names for every resource in the document.
///
/// Returns [`Resolution::Skipped`] when no bundle is supplied; with a bundle
/// the result is always `Performed`, even when every name was already clean.
#[must_use]
pub fn resolve(
    doc: &TemplateDocument,
    bundle: Option<&MetadataBundle>,
    options: ResolverOptions,
) -> Resolution {
    let Some(bundle) = bundle else {
        tracing::debug!("no metadata bundle supplied; skipping rename resolution");
        return Resolution::Skipped;
    };

    // Candidate derivation, in document order.
    let mut candidates: IndexMap<&str, Candidate> = IndexMap::new();
    for logical_id in doc.resources.keys() {
        candidates.insert(
            logical_id.as_str(),
            derive_candidate(logical_id, bundle, options),
        );
    }

    // Names that survive untouched and must never be collided with:
    // parameters, conditions, and resources whose candidate is an identity.
    let mut taken: HashSet<String> = doc.parameters.keys().cloned().collect();
    taken.extend(doc.conditions.keys().cloned());
    for (logical_id, candidate) in &candidates {
        if candidate.name == **logical_id {
            taken.insert((*logical_id).to_string());
        }
    }

    // IDs vacated by a rename become legal targets for someone else.
    let vacated: HashSet<&str> = candidates
        .iter()
        .filter(|(logical_id, candidate)| candidate.name != **logical_id)
        .map(|(logical_id, _)| *logical_id)
        .collect();

    // Group colliding candidates; within a group the assignment order is the
    // sorted old IDs so reruns agree byte for byte.
    let mut groups: IndexMap<&str, Vec<&str>> = IndexMap::new();
    for (logical_id, candidate) in &candidates {
        groups
            .entry(candidate.name.as_str())
            .or_default()
            .push(*logical_id);
    }
    for members in groups.values_mut() {
        members.sort_unstable();
    }

    let mut plan = RenamePlan::new();
    for members in groups.values() {
        for logical_id in members {
            let candidate = &candidates[*logical_id];
            if candidate.name == **logical_id {
                continue;
            }
            let (final_name, strategy) = disambiguate(
                doc,
                logical_id,
                &candidate.name,
                candidate.strategy,
                &taken,
                &vacated,
            );
            taken.insert(final_name.clone());
            if final_name != **logical_id {
                tracing::debug!(old = *logical_id, new = %final_name, "planned rename");
                plan.insert(
                    *logical_id,
                    final_name,
                    candidate.construct_path.clone(),
                    strategy,
                );
            }
        }
    }

    Resolution::Performed(plan)
}

struct Candidate {
    name: String,
    strategy: NameStrategy,
    construct_path: Option<String>,
}

fn derive_candidate(
    logical_id: &str,
    bundle: &MetadataBundle,
    options: ResolverOptions,
) -> Candidate {
    let record = bundle.record(logical_id);
    let construct_path = record.map(|r| r.path.clone());
    let mut base = match record {
        Some(record) if !record.construct_name.is_empty() => {
            if record.is_generated {
                simplify_generated(&record.construct_name)
            } else {
                record.construct_name.clone()
            }
        }
        _ => logical_id.to_string(),
    };

    let mut strategy = NameStrategy::Identity;
    if options.strip_hashes && has_hash_suffix(&base) {
        base.truncate(base.len() - 8);
        strategy = NameStrategy::HashStripped;
    }
    if options.semantic_naming {
        for (rx, repl) in SEMANTIC_PATTERNS.iter() {
            if rx.is_match(&base) {
                base = rx.replace(&base, *repl).into_owned();
                strategy = NameStrategy::Semantic;
                break;
            }
        }
    }

    let name = sanitize_logical_id(&base);
    if strategy == NameStrategy::Identity && name != logical_id {
        // The construct path alone produced a different name.
        strategy = NameStrategy::HashStripped;
    }
    Candidate {
        name,
        strategy,
        construct_path,
    }
}

fn simplify_generated(name: &str) -> String {
    let mut out = name.to_string();
    for (rx, repl) in GENERATED_SIMPLIFICATIONS.iter() {
        if rx.is_match(&out) {
            out = rx.replace(&out, *repl).into_owned();
        }
    }
    out
}

/// Make a derived name unique: the bare candidate, then candidate plus the
/// resource's type suffix, then an incrementing counter.
fn disambiguate(
    doc: &TemplateDocument,
    logical_id: &str,
    base: &str,
    strategy: NameStrategy,
    taken: &HashSet<String>,
    vacated: &HashSet<&str>,
) -> (String, NameStrategy) {
    let free = |name: &str| {
        !taken.contains(name) && (!doc.defines(name) || vacated.contains(name))
    };
    if free(base) {
        return (base.to_string(), strategy);
    }

    let suffix = type_suffix(doc, logical_id);
    let with_suffix = format!("{base}{suffix}");
    if free(&with_suffix) {
        return (with_suffix, NameStrategy::TypeSuffix);
    }

    let mut counter = 2usize;
    loop {
        let numbered = format!("{with_suffix}{counter}");
        if free(&numbered) {
            return (numbered, NameStrategy::Counter);
        }
        counter += 1;
    }
}

/// True when the name ends in the synthesized 8-hex disambiguation suffix.
fn has_hash_suffix(name: &str) -> bool {
    name.len() > 8
        && name
            .as_bytes()
            .iter()
            .rev()
            .take(8)
            .all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(b))
}

fn type_suffix(doc: &TemplateDocument, logical_id: &str) -> String {
    doc.resource(logical_id)
        .map(|resource| {
            resource
                .resource_type
                .rsplit("::")
                .next()
                .unwrap_or(&resource.resource_type)
                .to_string()
        })
        .unwrap_or_default()
}

/// Logical IDs must be alphanumeric and start with a letter.
#[must_use]
pub fn sanitize_logical_id(name: &str) -> String {
    let cleaned: String = name.chars().filter(char::is_ascii_alphanumeric).collect();
    if cleaned.is_empty() {
        return "Resource".to_string();
    }
    if cleaned.starts_with(|c: char| c.is_ascii_alphabetic()) {
        cleaned
    } else {
        format!("Resource{cleaned}")
    }
}
