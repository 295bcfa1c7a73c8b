//! Reference index: every logical-ID occurrence in the document, recorded
//! with a navigable path so later passes can reason about (and rewrite)
//! references without re-parsing strings.

use std::fmt;

use crate::document::TemplateDocument;
use crate::sub::SubSegment;
use crate::value::{Intrinsic, TemplateValue, ValueMap};

/// Top-level section a reference site lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Resources,
    Outputs,
    Conditions,
    Rules,
    Globals,
}

impl Section {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Resources => "Resources",
            Self::Outputs => "Outputs",
            Self::Conditions => "Conditions",
            Self::Rules => "Rules",
            Self::Globals => "Globals",
        }
    }
}

/// One step into a value tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStep {
    Key(String),
    Index(usize),
}

/// Navigable location of a reference site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValuePath {
    pub section: Section,
    pub steps: Vec<PathStep>,
}

impl ValuePath {
    /// Logical ID of the resource (or output/condition name) owning this
    /// site: the first path step.
    #[must_use]
    pub fn owner(&self) -> Option<&str> {
        match self.steps.first() {
            Some(PathStep::Key(key)) => Some(key),
            _ => None,
        }
    }
}

impl fmt::Display for ValuePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.section.name())?;
        for step in &self.steps {
            match step {
                PathStep::Key(key) => write!(f, "/{key}")?,
                PathStep::Index(idx) => write!(f, "/{idx}")?,
            }
        }
        Ok(())
    }
}

/// The reference construct a site was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    /// Direct reference (`Ref`)
    Ref,
    /// Attribute reference first segment (`Fn::GetAtt`)
    GetAtt,
    /// Interpolation token inside `Fn::Sub`
    Sub,
    /// `DependsOn` declaration entry
    DependsOn,
    /// Condition name used by a resource/output `Condition` attribute
    ConditionAttr,
    /// Condition name inside an expression (`Fn::If`, `Condition` test)
    ConditionExpr,
}

impl RefKind {
    /// Condition sites resolve in the condition namespace, everything else in
    /// the resource/parameter namespace.
    #[must_use]
    pub fn is_condition(self) -> bool {
        matches!(self, Self::ConditionAttr | Self::ConditionExpr)
    }
}

/// A single recorded occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceSite {
    pub target: String,
    pub kind: RefKind,
    pub path: ValuePath,
}

/// Index over every reference occurrence in a document.
///
/// The index is a snapshot: passes that mutate the document rebuild it before
/// querying again.
#[derive(Debug, Default)]
pub struct ReferenceIndex {
    sites: Vec<ReferenceSite>,
}

impl ReferenceIndex {
    /// Walk the whole document and record every reference site.
    #[must_use]
    pub fn build(doc: &TemplateDocument) -> Self {
        let mut walker = Walker { sites: Vec::new() };

        for (logical_id, resource) in &doc.resources {
            let base = vec![PathStep::Key(logical_id.clone())];
            if let Some(depends) = &resource.depends_on {
                for (idx, target) in depends.targets().iter().enumerate() {
                    let mut steps = base.clone();
                    steps.push(PathStep::Key("DependsOn".to_string()));
                    steps.push(PathStep::Index(idx));
                    walker.record(target, RefKind::DependsOn, Section::Resources, steps);
                }
            }
            if let Some(condition) = &resource.condition {
                let mut steps = base.clone();
                steps.push(PathStep::Key("Condition".to_string()));
                walker.record(condition, RefKind::ConditionAttr, Section::Resources, steps);
            }
            walker.visit_map(&resource.properties, Section::Resources, &base, "Properties");
            walker.visit_map(&resource.extra, Section::Resources, &base, "");
            walker.visit_map(&resource.metadata, Section::Resources, &base, "Metadata");
        }

        for (name, body) in &doc.outputs {
            let base = vec![PathStep::Key(name.clone())];
            if let Some(condition) = body
                .as_mapping()
                .and_then(|map| map.get("Condition"))
                .and_then(TemplateValue::as_str)
            {
                let mut steps = base.clone();
                steps.push(PathStep::Key("Condition".to_string()));
                walker.record(condition, RefKind::ConditionAttr, Section::Outputs, steps);
            }
            walker.visit(body, Section::Outputs, base);
        }

        for (name, expr) in &doc.conditions {
            walker.visit(expr, Section::Conditions, vec![PathStep::Key(name.clone())]);
        }
        for (name, body) in &doc.rules {
            walker.visit(body, Section::Rules, vec![PathStep::Key(name.clone())]);
        }
        for (name, body) in &doc.globals {
            walker.visit(body, Section::Globals, vec![PathStep::Key(name.clone())]);
        }

        Self {
            sites: walker.sites,
        }
    }

    /// All recorded sites in document order.
    #[inline]
    #[must_use]
    pub fn sites(&self) -> &[ReferenceSite] {
        &self.sites
    }

    /// Sites targeting the given name.
    pub fn sites_for<'a>(&'a self, target: &'a str) -> impl Iterator<Item = &'a ReferenceSite> {
        self.sites.iter().filter(move |site| site.target == target)
    }

    /// True when any site targets the given name.
    #[must_use]
    pub fn references(&self, target: &str) -> bool {
        self.sites.iter().any(|site| site.target == target)
    }

    /// True when `target` is referenced from a resource other than the ones
    /// listed in `excluding`.
    #[must_use]
    pub fn referenced_outside(&self, target: &str, excluding: &[&str]) -> bool {
        self.sites_for(target).any(|site| {
            site.path.section != Section::Resources
                || site
                    .path
                    .owner()
                    .map_or(true, |owner| !excluding.contains(&owner))
        })
    }

    /// Sites whose target is not defined by the document; the post-transform
    /// integrity violation the pipeline aborts on.
    #[must_use]
    pub fn dangling<'a>(&'a self, doc: &TemplateDocument) -> Vec<&'a ReferenceSite> {
        self.sites
            .iter()
            .filter(|site| {
                if site.kind.is_condition() {
                    !doc.conditions.contains_key(&site.target)
                } else {
                    !doc.defines(&site.target)
                }
            })
            .collect()
    }
}

struct Walker {
    sites: Vec<ReferenceSite>,
}

impl Walker {
    fn record(&mut self, target: &str, kind: RefKind, section: Section, steps: Vec<PathStep>) {
        // Pseudo parameters (AWS::Region, ...) are never logical IDs.
        if target.contains("::") {
            return;
        }
        self.sites.push(ReferenceSite {
            target: target.to_string(),
            kind,
            path: ValuePath { section, steps },
        });
    }

    fn visit_map(&mut self, map: &ValueMap, section: Section, base: &[PathStep], label: &str) {
        if map.is_empty() {
            return;
        }
        let mut steps = base.to_vec();
        if !label.is_empty() {
            steps.push(PathStep::Key(label.to_string()));
        }
        for (key, value) in map {
            let mut child = steps.clone();
            child.push(PathStep::Key(key.clone()));
            self.visit(value, section, child);
        }
    }

    fn visit(&mut self, value: &TemplateValue, section: Section, steps: Vec<PathStep>) {
        match value {
            TemplateValue::Sequence(items) => {
                for (idx, item) in items.iter().enumerate() {
                    let mut child = steps.clone();
                    child.push(PathStep::Index(idx));
                    self.visit(item, section, child);
                }
            }
            TemplateValue::Mapping(map) => {
                for (key, item) in map {
                    let mut child = steps.clone();
                    child.push(PathStep::Key(key.clone()));
                    self.visit(item, section, child);
                }
            }
            TemplateValue::Intrinsic(node) => self.visit_intrinsic(node, section, steps),
            _ => {}
        }
    }

    fn visit_intrinsic(&mut self, node: &Intrinsic, section: Section, steps: Vec<PathStep>) {
        match node {
            Intrinsic::Ref(name) => self.record(name, RefKind::Ref, section, steps),
            Intrinsic::GetAtt { logical_id, .. } => {
                self.record(logical_id, RefKind::GetAtt, section, steps);
            }
            Intrinsic::Sub {
                template,
                variables,
            } => {
                let locals: Vec<&str> = variables
                    .as_ref()
                    .map(|vars| vars.keys().map(String::as_str).collect())
                    .unwrap_or_default();
                for segment in template.segments() {
                    if let SubSegment::Reference { name, .. } = segment {
                        // Names bound by the variable map shadow logical IDs.
                        if !locals.contains(&name.as_str()) {
                            self.record(name, RefKind::Sub, section, steps.clone());
                        }
                    }
                }
                if let Some(vars) = variables {
                    for (key, item) in vars {
                        let mut child = steps.clone();
                        child.push(PathStep::Key(key.clone()));
                        self.visit(item, section, child);
                    }
                }
            }
            Intrinsic::Join { parts, .. } => {
                for (idx, item) in parts.iter().enumerate() {
                    let mut child = steps.clone();
                    child.push(PathStep::Index(idx));
                    self.visit(item, section, child);
                }
            }
            Intrinsic::If {
                condition,
                when_true,
                when_false,
            } => {
                self.record(condition, RefKind::ConditionExpr, section, steps.clone());
                let mut true_steps = steps.clone();
                true_steps.push(PathStep::Index(1));
                self.visit(when_true, section, true_steps);
                let mut false_steps = steps;
                false_steps.push(PathStep::Index(2));
                self.visit(when_false, section, false_steps);
            }
            Intrinsic::Condition(name) => {
                self.record(name, RefKind::ConditionExpr, section, steps);
            }
            Intrinsic::ImportValue(payload) | Intrinsic::Other { payload, .. } => {
                self.visit(payload, section, steps);
            }
        }
    }
}
