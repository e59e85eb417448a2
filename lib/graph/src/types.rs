//! Conversation graph types.
//!
//! A [`ConversationGraph`] is what extraction produces for one run: node ids
//! are local to that run and edge types are free text. Stored nodes carry
//! run-namespaced ids, and only allow-listed relations survive the write.

use colloquy_core::RunId;
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Kind of a conversation graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    /// An idea or term.
    Concept,
    /// An assertion made by a speaker.
    Claim,
    /// An open question.
    Question,
    /// A supporting example.
    Example,
    /// A counterexample.
    Counterexample,
}

impl NodeType {
    /// All node types.
    pub const ALL: [NodeType; 5] = [
        NodeType::Concept,
        NodeType::Claim,
        NodeType::Question,
        NodeType::Example,
        NodeType::Counterexample,
    ];

    /// Returns the stored name of this type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Concept => "concept",
            Self::Claim => "claim",
            Self::Question => "question",
            Self::Example => "example",
            Self::Counterexample => "counterexample",
        }
    }

    /// Parses a stored type name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An allow-listed relation between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeType {
    /// Source supports target.
    Supports,
    /// Source contradicts target.
    Contradicts,
    /// Source elaborates on target.
    Elaborates,
    /// Source responds to target.
    RespondsTo,
    /// Source refers to target.
    RefersTo,
}

impl EdgeType {
    /// All relations.
    pub const ALL: [EdgeType; 5] = [
        EdgeType::Supports,
        EdgeType::Contradicts,
        EdgeType::Elaborates,
        EdgeType::RespondsTo,
        EdgeType::RefersTo,
    ];

    /// Returns the relationship type name used in the database.
    #[must_use]
    pub const fn relationship(self) -> &'static str {
        match self {
            Self::Supports => "SUPPORTS",
            Self::Contradicts => "CONTRADICTS",
            Self::Elaborates => "ELABORATES",
            Self::RespondsTo => "RESPONDS_TO",
            Self::RefersTo => "REFERS_TO",
        }
    }

    /// Normalizes a free-text relation; `None` for anything not allow-listed.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let normalized = name.trim().to_uppercase().replace([' ', '-'], "_");
        Self::ALL.into_iter().find(|t| t.relationship() == normalized)
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.relationship())
    }
}

/// A node as produced by extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Run-local identifier; may be blank.
    #[serde(default)]
    pub id: String,
    /// Node kind.
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Node text.
    pub text: String,
    /// Who said it, when known.
    #[serde(default)]
    pub speaker: Option<String>,
}

/// An edge as produced by extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Run-local source node id.
    pub source: String,
    /// Run-local target node id.
    pub target: String,
    /// Free-text relation; filtered against [`EdgeType`] on write.
    #[serde(rename = "type")]
    pub relation: String,
}

/// The graph extracted from one conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationGraph {
    /// Nodes.
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
    /// Edges.
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
}

/// Returns the stored id for a run-local node id.
///
/// Blank local ids get a fresh random id so they never collide.
#[must_use]
pub fn namespaced_id(run_id: &RunId, local_id: &str) -> String {
    let local_id = local_id.trim();
    if local_id.is_empty() {
        format!("{run_id}:{}", Ulid::new())
    } else {
        format!("{run_id}:{local_id}")
    }
}

/// Returns the cross-run concept key for a node, or `None` when its text is
/// blank.
///
/// Whitespace runs collapse to one space and the text is lowercased, so the
/// same idea phrased with different spacing or case aggregates together.
#[must_use]
pub fn concept_key(node_type: NodeType, text: &str) -> Option<String> {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    (!normalized.is_empty()).then(|| format!("{}|{normalized}", node_type.as_str()))
}

/// A node as stored in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredNode {
    /// Run-namespaced id.
    pub id: String,
    /// Node kind.
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Node text.
    pub text: String,
    /// Who said it, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    /// The run the node belongs to.
    pub run_id: String,
}

/// A relation between two stored nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoredEdge {
    /// Source node id.
    pub source: String,
    /// Relation.
    pub relation: EdgeType,
    /// Target node id.
    pub target: String,
}

/// A bounded neighbourhood read back from the graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subgraph {
    /// Nodes.
    pub nodes: Vec<StoredNode>,
    /// Edges whose endpoints are both in `nodes`.
    pub edges: Vec<StoredEdge>,
}

impl Subgraph {
    /// Returns true when no node was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// What a conversation write touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteStats {
    /// Nodes merged.
    pub nodes: usize,
    /// Nodes linked to a concept.
    pub concepts: usize,
    /// Edges merged.
    pub edges: usize,
    /// Edges dropped for an unknown relation or a missing endpoint.
    pub dropped_edges: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_types_are_case_insensitive() {
        assert_eq!(EdgeType::parse("supports"), Some(EdgeType::Supports));
        assert_eq!(EdgeType::parse("Responds_To"), Some(EdgeType::RespondsTo));
        assert_eq!(EdgeType::parse("refers to"), Some(EdgeType::RefersTo));
        assert_eq!(EdgeType::parse("causes"), None);
        assert_eq!(EdgeType::parse(""), None);
    }

    #[test]
    fn concept_key_normalizes_text() {
        assert_eq!(
            concept_key(NodeType::Concept, "  Free   Will "),
            Some("concept|free will".to_string())
        );
        assert_eq!(
            concept_key(NodeType::Concept, "free will"),
            concept_key(NodeType::Concept, "FREE WILL")
        );
        assert_ne!(
            concept_key(NodeType::Claim, "free will"),
            concept_key(NodeType::Concept, "free will")
        );
        assert_eq!(concept_key(NodeType::Claim, "   "), None);
    }

    #[test]
    fn namespaced_ids() {
        let run: RunId = "20250101-120000-000".parse().expect("run id");
        assert_eq!(namespaced_id(&run, "n1"), "20250101-120000-000:n1");

        let a = namespaced_id(&run, "");
        let b = namespaced_id(&run, " ");
        assert!(a.starts_with("20250101-120000-000:"));
        assert_ne!(a, b);
    }

    #[test]
    fn extraction_output_deserializes() {
        let graph: ConversationGraph = serde_json::from_value(serde_json::json!({
            "nodes": [{ "id": "n1", "type": "concept", "text": "自由意志", "speaker": null }],
            "edges": [{ "source": "n1", "target": "n2", "type": "supports" }]
        }))
        .expect("graph");
        assert_eq!(graph.nodes[0].node_type, NodeType::Concept);
        assert_eq!(graph.edges[0].relation, "supports");
    }
}
