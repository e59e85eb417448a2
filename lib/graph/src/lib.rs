//! Conversation knowledge graph for colloquy.
//!
//! Finished conversations are distilled into typed nodes and edges and merged
//! into a graph shared by every run:
//!
//! - **Types**: extracted graphs, run-namespaced node ids, concept keys
//! - **Session**: parametrized Cypher over the Neo4j HTTP API
//! - **Store**: the write and read paths, against Neo4j or in memory
//! - **Retrieval**: tokenized seed search, bounded expansion, rendering

pub mod error;
pub mod rag;
pub mod session;
pub mod store;
pub mod types;

pub use error::GraphError;
pub use rag::{KnowledgeGraph, NO_MATCHES, NO_SEARCH_TERMS, Retrieval, RetrievalBounds, tokenize};
pub use session::{CypherSession, Neo4jConfig, Neo4jHttpSession, QueryResult, Statement};
pub use store::{GraphStore, InMemoryGraphStore, Neo4jGraphStore};
pub use types::{
    ConversationGraph, EdgeType, GraphEdge, GraphNode, NodeType, StoredEdge, StoredNode, Subgraph,
    WriteStats,
};
