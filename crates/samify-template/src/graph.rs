//! Resource dependency graph.
//!
//! A directed graph over logical IDs with one edge per reference between
//! resources. Cycles are legal (self-references and circular chains through
//! attribute references occur in real templates), so nothing here rejects or
//! breaks them; traversals are bounded by the visited set petgraph maintains.

use indexmap::IndexMap;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::document::TemplateDocument;
use crate::index::{RefKind, ReferenceIndex, Section};

/// Directed resource-to-resource reference graph.
#[derive(Debug)]
pub struct DependencyGraph {
    graph: DiGraph<String, RefKind>,
    nodes: IndexMap<String, NodeIndex>,
}

impl DependencyGraph {
    /// Build from a document and its reference index. Edges point from the
    /// referring resource to the referenced one.
    #[must_use]
    pub fn build(doc: &TemplateDocument, index: &ReferenceIndex) -> Self {
        let mut graph = DiGraph::new();
        let mut nodes = IndexMap::with_capacity(doc.resources.len());
        for logical_id in doc.resources.keys() {
            let node = graph.add_node(logical_id.clone());
            nodes.insert(logical_id.clone(), node);
        }

        for site in index.sites() {
            if site.path.section != Section::Resources {
                continue;
            }
            let Some(owner) = site.path.owner() else {
                continue;
            };
            let (Some(&from), Some(&to)) = (nodes.get(owner), nodes.get(&site.target)) else {
                continue;
            };
            graph.add_edge(from, to, site.kind);
        }

        Self { graph, nodes }
    }

    /// Logical IDs of resources that reference `target`.
    #[must_use]
    pub fn referrers(&self, target: &str) -> Vec<&str> {
        let Some(&node) = self.nodes.get(target) else {
            return Vec::new();
        };
        let mut out: Vec<&str> = self
            .graph
            .neighbors_directed(node, Direction::Incoming)
            .map(|n| self.graph[n].as_str())
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Logical IDs this resource references.
    #[must_use]
    pub fn references_of(&self, source: &str) -> Vec<&str> {
        let Some(&node) = self.nodes.get(source) else {
            return Vec::new();
        };
        let mut out: Vec<&str> = self
            .graph
            .neighbors_directed(node, Direction::Outgoing)
            .map(|n| self.graph[n].as_str())
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Number of resource nodes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_str;
    use pretty_assertions::assert_eq;

    #[test]
    fn edges_follow_references() {
        let doc = parse_str(
            r"
Resources:
  Fn:
    Type: AWS::Lambda::Function
    Properties:
      Role: !GetAtt Role.Arn
  Role:
    Type: AWS::IAM::Role
",
        )
        .unwrap();
        let index = ReferenceIndex::build(&doc);
        let graph = DependencyGraph::build(&doc, &index);
        assert_eq!(graph.referrers("Role"), vec!["Fn"]);
        assert_eq!(graph.references_of("Fn"), vec!["Role"]);
    }

    #[test]
    fn cycles_are_tolerated() {
        let doc = parse_str(
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
      Me: !Ref B
",
        )
        .unwrap();
        let index = ReferenceIndex::build(&doc);
        let graph = DependencyGraph::build(&doc, &index);
        assert_eq!(graph.referrers("A"), vec!["B"]);
        assert_eq!(graph.referrers("B"), vec!["A", "B"]);
        assert_eq!(graph.len(), 2);
    }
}
