//! Graph stores.
//!
//! The write path merges a run, its namespaced nodes, their cross-run
//! concepts and the allow-listed edges. The read path is a bounded seed
//! lookup followed by bounded expansion. Expansion starts from the seeds and
//! from every node sharing a concept with a seed, which is what connects
//! runs.

use crate::error::GraphError;
use crate::session::{CypherSession, QueryResult, Statement};
use crate::types::{
    ConversationGraph, EdgeType, NodeType, StoredEdge, StoredNode, Subgraph, WriteStats,
    concept_key, namespaced_id,
};
use async_trait::async_trait;
use colloquy_core::RunId;
use rootcause::prelude::Report;
use serde_json::{Value as JsonValue, json};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// Storage for conversation graphs.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Merges one run's graph. Idempotent for the same run and graph.
    async fn write_conversation(
        &self,
        run_id: &RunId,
        graph: &ConversationGraph,
    ) -> Result<WriteStats, Report<GraphError>>;

    /// Finds up to `limit` nodes whose text or type contains any of the
    /// (lowercase) terms.
    async fn find_seeds(
        &self,
        terms: &[String],
        limit: usize,
    ) -> Result<Vec<StoredNode>, Report<GraphError>>;

    /// Expands up to `hops` steps from the seeds, keeping at most
    /// `max_nodes` nodes closest to them.
    async fn expand(
        &self,
        seed_ids: &[String],
        hops: u32,
        max_nodes: usize,
    ) -> Result<Subgraph, Report<GraphError>>;
}

struct PreparedNode {
    id: String,
    node_type: NodeType,
    text: String,
    speaker: Option<String>,
    concept: Option<String>,
}

struct PreparedGraph {
    nodes: Vec<PreparedNode>,
    edges: Vec<StoredEdge>,
    dropped_edges: usize,
}

/// Resolves local ids and filters edges before anything is written.
///
/// An edge survives only if its relation is allow-listed and both endpoints
/// name a node of this graph.
fn prepare(run_id: &RunId, graph: &ConversationGraph) -> PreparedGraph {
    let mut local_ids = HashMap::new();
    let nodes: Vec<PreparedNode> = graph
        .nodes
        .iter()
        .map(|node| {
            let id = namespaced_id(run_id, &node.id);
            let local = node.id.trim();
            if !local.is_empty() {
                local_ids.insert(local.to_string(), id.clone());
            }
            PreparedNode {
                id,
                node_type: node.node_type,
                text: node.text.clone(),
                speaker: node.speaker.clone().filter(|s| !s.trim().is_empty()),
                concept: concept_key(node.node_type, &node.text),
            }
        })
        .collect();

    let mut edges = Vec::new();
    let mut dropped_edges = 0;
    for edge in &graph.edges {
        let resolved = EdgeType::parse(&edge.relation).and_then(|relation| {
            let source = local_ids.get(edge.source.trim())?;
            let target = local_ids.get(edge.target.trim())?;
            Some(StoredEdge {
                source: source.clone(),
                relation,
                target: target.clone(),
            })
        });
        match resolved {
            Some(edge) => edges.push(edge),
            None => dropped_edges += 1,
        }
    }

    PreparedGraph {
        nodes,
        edges,
        dropped_edges,
    }
}

const TRAVERSAL: &str = "SUPPORTS|CONTRADICTS|ELABORATES|RESPONDS_TO|REFERS_TO";

/// A graph store backed by Neo4j.
#[derive(Clone)]
pub struct Neo4jGraphStore {
    session: Arc<dyn CypherSession>,
}

impl Neo4jGraphStore {
    /// Creates a store over a Cypher session.
    #[must_use]
    pub fn new(session: Arc<dyn CypherSession>) -> Self {
        Self { session }
    }

    fn node_from_row(result: &QueryResult, row: &[JsonValue]) -> Option<StoredNode> {
        let text_of = |column: &str| {
            result
                .get(row, column)
                .and_then(JsonValue::as_str)
                .map(str::to_string)
        };
        Some(StoredNode {
            id: text_of("id")?,
            node_type: NodeType::parse(&text_of("type")?)?,
            text: text_of("text").unwrap_or_default(),
            speaker: text_of("speaker"),
            run_id: text_of("run_id").unwrap_or_default(),
        })
    }

    fn nodes_from(result: Option<&QueryResult>) -> Vec<StoredNode> {
        result
            .map(|r| r.rows.iter().filter_map(|row| Self::node_from_row(r, row)).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    #[instrument(skip_all, fields(run_id = %run_id, nodes = graph.nodes.len(), edges = graph.edges.len()))]
    async fn write_conversation(
        &self,
        run_id: &RunId,
        graph: &ConversationGraph,
    ) -> Result<WriteStats, Report<GraphError>> {
        let prepared = prepare(run_id, graph);
        let mut statements = vec![
            Statement::new("MERGE (r:Run {id: $run_id}) ON CREATE SET r.created_at = datetime()")
                .param("run_id", run_id.as_str()),
        ];

        for node in &prepared.nodes {
            statements.push(
                Statement::new(
                    "MATCH (r:Run {id: $run_id}) \
                     MERGE (n:Node {id: $id}) \
                     SET n.type = $type, n.text = $text, n.speaker = $speaker, n.run_id = $run_id \
                     MERGE (n)-[:IN_RUN]->(r)",
                )
                .param("run_id", run_id.as_str())
                .param("id", node.id.as_str())
                .param("type", node.node_type.as_str())
                .param("text", node.text.as_str())
                .param("speaker", node.speaker.clone()),
            );
            if let Some(ref key) = node.concept {
                statements.push(
                    Statement::new(
                        "MATCH (n:Node {id: $id}) \
                         MERGE (c:Concept {key: $key}) \
                         ON CREATE SET c.type = $type, c.text = $text \
                         MERGE (n)-[:INSTANCE_OF]->(c)",
                    )
                    .param("id", node.id.as_str())
                    .param("key", key.as_str())
                    .param("type", node.node_type.as_str())
                    .param("text", node.text.as_str()),
                );
            }
        }

        for edge in &prepared.edges {
            // Relationship types cannot be parameters; the relation is allow-listed.
            statements.push(
                Statement::new(format!(
                    "MATCH (a:Node {{id: $source}}), (b:Node {{id: $target}}) \
                     MERGE (a)-[:{}]->(b)",
                    edge.relation.relationship()
                ))
                .param("source", edge.source.as_str())
                .param("target", edge.target.as_str()),
            );
        }

        self.session.run(&statements).await?;

        let stats = WriteStats {
            nodes: prepared.nodes.len(),
            concepts: prepared.nodes.iter().filter(|n| n.concept.is_some()).count(),
            edges: prepared.edges.len(),
            dropped_edges: prepared.dropped_edges,
        };
        debug!(?stats, "conversation graph merged");
        Ok(stats)
    }

    #[instrument(skip(self))]
    async fn find_seeds(
        &self,
        terms: &[String],
        limit: usize,
    ) -> Result<Vec<StoredNode>, Report<GraphError>> {
        let statement = Statement::new(
            "MATCH (n:Node) \
             WHERE any(term IN $terms WHERE toLower(n.text) CONTAINS term OR toLower(n.type) CONTAINS term) \
             RETURN n.id AS id, n.type AS type, n.text AS text, n.speaker AS speaker, n.run_id AS run_id \
             ORDER BY n.id LIMIT $limit",
        )
        .param("terms", json!(terms))
        .param("limit", limit);

        let results = self.session.run(&[statement]).await?;
        Ok(Self::nodes_from(results.first()))
    }

    #[instrument(skip(self))]
    async fn expand(
        &self,
        seed_ids: &[String],
        hops: u32,
        max_nodes: usize,
    ) -> Result<Subgraph, Report<GraphError>> {
        if seed_ids.is_empty() {
            return Ok(Subgraph::default());
        }

        let nodes_statement = Statement::new(format!(
            "MATCH (s:Node) WHERE s.id IN $seeds \
             OPTIONAL MATCH (s)-[:INSTANCE_OF]->(:Concept)<-[:INSTANCE_OF]-(twin:Node) \
             WITH collect(DISTINCT s) + collect(DISTINCT twin) AS starts \
             UNWIND starts AS start \
             MATCH p = (start)-[:{TRAVERSAL}*0..{hops}]-(m:Node) \
             WITH m, min(length(p)) AS distance \
             ORDER BY distance, m.id LIMIT $max_nodes \
             RETURN m.id AS id, m.type AS type, m.text AS text, m.speaker AS speaker, m.run_id AS run_id"
        ))
        .param("seeds", json!(seed_ids))
        .param("max_nodes", max_nodes);

        let results = self.session.run(&[nodes_statement]).await?;
        let nodes = Self::nodes_from(results.first());
        if nodes.is_empty() {
            return Ok(Subgraph::default());
        }

        let ids: Vec<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        let relations: Vec<&str> = EdgeType::ALL.iter().map(|t| t.relationship()).collect();
        let edges_statement = Statement::new(
            "MATCH (a:Node)-[r]->(b:Node) \
             WHERE a.id IN $ids AND b.id IN $ids AND type(r) IN $relations \
             RETURN a.id AS source, type(r) AS relation, b.id AS target",
        )
        .param("ids", json!(ids))
        .param("relations", json!(relations));

        let results = self.session.run(&[edges_statement]).await?;
        let edges = results
            .first()
            .map(|r| {
                r.rows
                    .iter()
                    .filter_map(|row| {
                        Some(StoredEdge {
                            source: r.get(row, "source")?.as_str()?.to_string(),
                            relation: EdgeType::parse(r.get(row, "relation")?.as_str()?)?,
                            target: r.get(row, "target")?.as_str()?.to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Subgraph { nodes, edges })
    }
}

#[derive(Debug, Default)]
struct MemoryGraph {
    runs: BTreeSet<String>,
    nodes: BTreeMap<String, StoredNode>,
    concepts: BTreeMap<String, BTreeSet<String>>,
    node_concept: BTreeMap<String, String>,
    edges: BTreeSet<StoredEdge>,
}

impl MemoryGraph {
    fn neighbours<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a String> + 'a {
        self.edges.iter().filter_map(move |e| {
            if e.source == id {
                Some(&e.target)
            } else if e.target == id {
                Some(&e.source)
            } else {
                None
            }
        })
    }

    fn concept_twins(&self, id: &str) -> Vec<String> {
        self.node_concept
            .get(id)
            .and_then(|key| self.concepts.get(key))
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// A graph store held in memory, with the same semantics as
/// [`Neo4jGraphStore`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryGraphStore {
    inner: Arc<RwLock<MemoryGraph>>,
}

impl InMemoryGraphStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored nodes.
    pub async fn node_count(&self) -> usize {
        self.inner.read().await.nodes.len()
    }

    /// Returns the number of runs merged so far.
    pub async fn run_count(&self) -> usize {
        self.inner.read().await.runs.len()
    }

    /// Returns the number of distinct concepts.
    pub async fn concept_count(&self) -> usize {
        self.inner.read().await.concepts.len()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn write_conversation(
        &self,
        run_id: &RunId,
        graph: &ConversationGraph,
    ) -> Result<WriteStats, Report<GraphError>> {
        let prepared = prepare(run_id, graph);
        let mut inner = self.inner.write().await;
        inner.runs.insert(run_id.to_string());

        for node in &prepared.nodes {
            inner.nodes.insert(
                node.id.clone(),
                StoredNode {
                    id: node.id.clone(),
                    node_type: node.node_type,
                    text: node.text.clone(),
                    speaker: node.speaker.clone(),
                    run_id: run_id.to_string(),
                },
            );
            if let Some(ref key) = node.concept {
                inner
                    .concepts
                    .entry(key.clone())
                    .or_default()
                    .insert(node.id.clone());
                inner.node_concept.insert(node.id.clone(), key.clone());
            }
        }
        for edge in &prepared.edges {
            inner.edges.insert(edge.clone());
        }

        Ok(WriteStats {
            nodes: prepared.nodes.len(),
            concepts: prepared.nodes.iter().filter(|n| n.concept.is_some()).count(),
            edges: prepared.edges.len(),
            dropped_edges: prepared.dropped_edges,
        })
    }

    async fn find_seeds(
        &self,
        terms: &[String],
        limit: usize,
    ) -> Result<Vec<StoredNode>, Report<GraphError>> {
        let inner = self.inner.read().await;
        Ok(inner
            .nodes
            .values()
            .filter(|node| {
                let text = node.text.to_lowercase();
                let node_type = node.node_type.as_str();
                terms
                    .iter()
                    .any(|term| text.contains(term.as_str()) || node_type.contains(term.as_str()))
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn expand(
        &self,
        seed_ids: &[String],
        hops: u32,
        max_nodes: usize,
    ) -> Result<Subgraph, Report<GraphError>> {
        let inner = self.inner.read().await;

        let mut distance: BTreeMap<String, u32> = BTreeMap::new();
        let mut queue = VecDeque::new();
        for id in seed_ids.iter().filter(|id| inner.nodes.contains_key(*id)) {
            for start in std::iter::once(id.clone()).chain(inner.concept_twins(id)) {
                if !distance.contains_key(&start) {
                    distance.insert(start.clone(), 0);
                    queue.push_back(start);
                }
            }
        }
        while let Some(id) = queue.pop_front() {
            let d = distance.get(&id).copied().unwrap_or_default();
            if d >= hops {
                continue;
            }
            let next: Vec<String> = inner
                .neighbours(&id)
                .filter(|n| !distance.contains_key(*n))
                .cloned()
                .collect();
            for n in next {
                distance.insert(n.clone(), d + 1);
                queue.push_back(n);
            }
        }

        let mut reached: Vec<(u32, &String)> = distance.iter().map(|(id, d)| (*d, id)).collect();
        reached.sort();
        reached.truncate(max_nodes);

        let nodes: Vec<StoredNode> = reached
            .iter()
            .filter_map(|(_, id)| inner.nodes.get(*id).cloned())
            .collect();
        let kept: BTreeSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        let edges = inner
            .edges
            .iter()
            .filter(|e| kept.contains(e.source.as_str()) && kept.contains(e.target.as_str()))
            .cloned()
            .collect();

        Ok(Subgraph { nodes, edges })
    }
}
