//! Graph retrieval.
//!
//! Free-text queries are tokenized into search terms, matched against node
//! text and type to pick seeds, expanded into a bounded neighbourhood and
//! rendered as a deterministic listing. Caller-supplied bounds are never
//! trusted: they are defaulted and clamped here.

use crate::error::GraphError;
use crate::store::GraphStore;
use crate::types::{ConversationGraph, StoredEdge, Subgraph, WriteStats};
use colloquy_core::RunId;
use rootcause::prelude::Report;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Context returned when a query yields no usable search terms.
pub const NO_SEARCH_TERMS: &str =
    "No search terms could be extracted from the query. Try more specific words.";

/// Context returned when nothing in the graph matched.
pub const NO_MATCHES: &str = "No matching nodes were found in the knowledge graph.";

/// Default expansion depth.
pub const DEFAULT_HOPS: u32 = 2;
/// Default number of seed nodes.
pub const DEFAULT_SEEDS: usize = 8;
/// Default node budget of a rendered neighbourhood.
pub const DEFAULT_MAX_NODES: usize = 60;

const HOPS_RANGE: (i64, i64) = (1, 4);
const SEEDS_RANGE: (i64, i64) = (1, 32);
const MAX_NODES_RANGE: (i64, i64) = (1, 200);

fn clamp(value: Option<i64>, default: i64, (min, max): (i64, i64)) -> i64 {
    value.unwrap_or(default).clamp(min, max)
}

/// Retrieval bounds after defaulting and clamping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalBounds {
    /// Expansion depth, 1..=4.
    pub hops: u32,
    /// Seed count, 1..=32.
    pub max_seeds: usize,
    /// Node budget, 1..=200.
    pub max_nodes: usize,
}

impl Default for RetrievalBounds {
    fn default() -> Self {
        Self {
            hops: DEFAULT_HOPS,
            max_seeds: DEFAULT_SEEDS,
            max_nodes: DEFAULT_MAX_NODES,
        }
    }
}

impl RetrievalBounds {
    /// Builds bounds from raw caller values.
    #[must_use]
    pub fn from_requested(hops: Option<i64>, max_seeds: Option<i64>, max_nodes: Option<i64>) -> Self {
        // Clamped values are positive and small, the casts cannot truncate.
        Self {
            hops: clamp(hops, i64::from(DEFAULT_HOPS), HOPS_RANGE) as u32,
            max_seeds: clamp(max_seeds, DEFAULT_SEEDS as i64, SEEDS_RANGE) as usize,
            max_nodes: clamp(max_nodes, DEFAULT_MAX_NODES as i64, MAX_NODES_RANGE) as usize,
        }
    }
}

/// Splits a query into lowercase search terms.
///
/// Every non-alphanumeric character separates terms, duplicates are removed
/// keeping first occurrence, and terms shorter than two characters are
/// dropped.
#[must_use]
pub fn tokenize(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for token in query.split(|c: char| !c.is_alphanumeric()) {
        let term = token.to_lowercase();
        if term.chars().count() >= 2 && !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

/// Renders a neighbourhood as text: nodes sorted by id, then edges sorted
/// by source, relation and target.
#[must_use]
pub fn render_subgraph(subgraph: &Subgraph) -> String {
    if subgraph.is_empty() {
        return NO_MATCHES.to_string();
    }

    let mut nodes: Vec<_> = subgraph.nodes.iter().collect();
    nodes.sort_by(|a, b| a.id.cmp(&b.id));
    let mut edges: Vec<&StoredEdge> = subgraph.edges.iter().collect();
    edges.sort();

    let mut out = String::from("Nodes:\n");
    for node in nodes {
        let _ = match node.speaker {
            Some(ref speaker) => writeln!(
                out,
                "- [{}] ({}, {}) {}",
                node.id, node.node_type, speaker, node.text
            ),
            None => writeln!(out, "- [{}] ({}) {}", node.id, node.node_type, node.text),
        };
    }
    out.push_str("Edges:\n");
    if edges.is_empty() {
        out.push_str("- (none)\n");
    }
    for edge in edges {
        let _ = writeln!(out, "- {} -[{}]-> {}", edge.source, edge.relation, edge.target);
    }
    out
}

/// The outcome of a retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retrieval {
    /// Rendered context.
    pub context: String,
    /// Search terms used (empty for focus lookups).
    pub terms: Vec<String>,
    /// Number of seed nodes.
    pub seeds: usize,
    /// The neighbourhood that was rendered.
    pub subgraph: Subgraph,
}

impl Retrieval {
    /// Returns true when there was nothing to render.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subgraph.is_empty()
    }
}

/// The knowledge graph as seen by the dialog.
#[derive(Clone)]
pub struct KnowledgeGraph {
    store: Arc<dyn GraphStore>,
}

impl KnowledgeGraph {
    /// Wraps a store.
    #[must_use]
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    /// Persists one run's extracted graph.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the write.
    pub async fn write_conversation(
        &self,
        run_id: &RunId,
        graph: &ConversationGraph,
    ) -> Result<WriteStats, Report<GraphError>> {
        self.store.write_conversation(run_id, graph).await
    }

    /// Answers a free-text query.
    ///
    /// A query without usable terms returns [`NO_SEARCH_TERMS`] without
    /// touching the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    #[instrument(skip(self))]
    pub async fn query(
        &self,
        query: &str,
        bounds: RetrievalBounds,
    ) -> Result<Retrieval, Report<GraphError>> {
        let terms = tokenize(query);
        if terms.is_empty() {
            return Ok(Retrieval {
                context: NO_SEARCH_TERMS.to_string(),
                terms,
                seeds: 0,
                subgraph: Subgraph::default(),
            });
        }

        let seeds = self.store.find_seeds(&terms, bounds.max_seeds).await?;
        let seed_ids: Vec<String> = seeds.iter().map(|n| n.id.clone()).collect();
        let subgraph = self
            .store
            .expand(&seed_ids, bounds.hops, bounds.max_nodes)
            .await?;
        debug!(
            terms = terms.len(),
            seeds = seed_ids.len(),
            nodes = subgraph.nodes.len(),
            "graph query expanded"
        );

        Ok(Retrieval {
            context: render_subgraph(&subgraph),
            terms,
            seeds: seed_ids.len(),
            subgraph,
        })
    }

    /// Renders the neighbourhood of one node.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    #[instrument(skip(self))]
    pub async fn focus(
        &self,
        node_id: &str,
        bounds: RetrievalBounds,
    ) -> Result<Retrieval, Report<GraphError>> {
        let node_id = node_id.trim();
        let subgraph = if node_id.is_empty() {
            Subgraph::default()
        } else {
            self.store
                .expand(&[node_id.to_string()], bounds.hops, bounds.max_nodes)
                .await?
        };
        let seeds = usize::from(!subgraph.is_empty());
        Ok(Retrieval {
            context: render_subgraph(&subgraph),
            terms: Vec::new(),
            seeds,
            subgraph,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryGraphStore;
    use crate::types::{GraphEdge, GraphNode, NodeType, StoredNode};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn tokenize_splits_dedupes_and_drops_short_terms() {
        assert_eq!(
            tokenize("Free will, free-will & a determinism?"),
            vec!["free", "will", "determinism"]
        );
        assert_eq!(tokenize("自由意志とは"), vec!["自由意志とは"]);
        assert!(tokenize("a, b; c! ?? ...").is_empty());
        assert!(tokenize("").is_empty());
    }

    #[test]
    fn bounds_are_defaulted_and_clamped() {
        assert_eq!(
            RetrievalBounds::from_requested(None, None, None),
            RetrievalBounds::default()
        );
        let clamped = RetrievalBounds::from_requested(Some(99), Some(-3), Some(0));
        assert_eq!(clamped.hops, 4);
        assert_eq!(clamped.max_seeds, 1);
        assert_eq!(clamped.max_nodes, 1);
        let high = RetrievalBounds::from_requested(Some(0), Some(1000), Some(1000));
        assert_eq!(high.hops, 1);
        assert_eq!(high.max_seeds, 32);
        assert_eq!(high.max_nodes, 200);
    }

    #[test]
    fn render_is_sorted() {
        let node = |id: &str| StoredNode {
            id: id.to_string(),
            node_type: NodeType::Claim,
            text: format!("text {id}"),
            speaker: None,
            run_id: "r".to_string(),
        };
        let subgraph = Subgraph {
            nodes: vec![node("r:b"), node("r:a")],
            edges: vec![
                StoredEdge {
                    source: "r:b".to_string(),
                    relation: crate::types::EdgeType::Supports,
                    target: "r:a".to_string(),
                },
                StoredEdge {
                    source: "r:a".to_string(),
                    relation: crate::types::EdgeType::Contradicts,
                    target: "r:b".to_string(),
                },
            ],
        };
        let rendered = render_subgraph(&subgraph);
        assert_eq!(
            rendered,
            "Nodes:\n- [r:a] (claim) text r:a\n- [r:b] (claim) text r:b\n\
             Edges:\n- r:a -[CONTRADICTS]-> r:b\n- r:b -[SUPPORTS]-> r:a\n"
        );
    }

    #[derive(Default)]
    struct CountingStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl GraphStore for CountingStore {
        async fn write_conversation(
            &self,
            _run_id: &RunId,
            _graph: &ConversationGraph,
        ) -> Result<WriteStats, Report<GraphError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(WriteStats::default())
        }

        async fn find_seeds(
            &self,
            _terms: &[String],
            _limit: usize,
        ) -> Result<Vec<StoredNode>, Report<GraphError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        async fn expand(
            &self,
            _seed_ids: &[String],
            _hops: u32,
            _max_nodes: usize,
        ) -> Result<Subgraph, Report<GraphError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Subgraph::default())
        }
    }

    #[tokio::test]
    async fn query_without_terms_never_touches_the_store() {
        let store = Arc::new(CountingStore::default());
        let graph = KnowledgeGraph::new(store.clone());

        let retrieval = graph
            .query("a ? b !", RetrievalBounds::default())
            .await
            .expect("query");
        assert_eq!(retrieval.context, NO_SEARCH_TERMS);
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn written_concept_is_retrievable() {
        let graph = KnowledgeGraph::new(Arc::new(InMemoryGraphStore::new()));
        let run_id: RunId = "20250101-120000-000".parse().expect("run id");
        graph
            .write_conversation(
                &run_id,
                &ConversationGraph {
                    nodes: vec![
                        GraphNode {
                            id: "n1".to_string(),
                            node_type: NodeType::Concept,
                            text: "自由意志".to_string(),
                            speaker: None,
                        },
                        GraphNode {
                            id: "n2".to_string(),
                            node_type: NodeType::Claim,
                            text: "Choices are caused".to_string(),
                            speaker: Some("OpenAI".to_string()),
                        },
                    ],
                    edges: vec![GraphEdge {
                        source: "n2".to_string(),
                        target: "n1".to_string(),
                        relation: "refers_to".to_string(),
                    }],
                },
            )
            .await
            .expect("write");

        let retrieval = graph
            .query("自由意志", RetrievalBounds::default())
            .await
            .expect("query");
        assert!(retrieval.context.contains("20250101-120000-000:n1"));
        assert!(retrieval.context.contains("自由意志"));
        assert!(retrieval.context.contains("(claim, OpenAI) Choices are caused"));
        assert_eq!(retrieval.seeds, 1);

        let focus = graph
            .focus("20250101-120000-000:n2", RetrievalBounds::default())
            .await
            .expect("focus");
        assert_eq!(focus.subgraph.nodes.len(), 2);
        assert!(focus.context.contains("REFERS_TO"));

        let missing = graph
            .focus("nope", RetrievalBounds::default())
            .await
            .expect("focus");
        assert_eq!(missing.context, NO_MATCHES);
    }
}
