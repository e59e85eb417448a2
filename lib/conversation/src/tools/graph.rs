//! Retrieval over the knowledge graph of past conversations.
//!
//! Retrieval never fails the caller: store errors become a textual context,
//! and condensation falls back to the raw listing.

use super::object_schema;
use crate::error::ToolError;
use crate::postprocess::Postprocessor;
use crate::tool::{ToolContext, ToolDefinition, ToolHandler, ToolRegistry, arg_i64, arg_str};
use async_trait::async_trait;
use colloquy_graph::{GraphError, KnowledgeGraph, Retrieval, RetrievalBounds};
use rootcause::prelude::Report;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use tracing::{debug, warn};

pub(super) fn register(
    registry: &mut ToolRegistry,
    graph: &KnowledgeGraph,
    postprocessor: Option<Arc<dyn Postprocessor>>,
) {
    registry.register(
        ToolDefinition::new(
            "graph_rag_query",
            "Search the knowledge graph built from past conversations. Returns a listing of \
             matching nodes and their neighbourhood, with node ids you can pass to \
             graph_rag_focus_node.",
        )
        .with_parameters(object_schema(
            json!({
                "query": { "type": "string", "description": "Keywords to look for." },
                "hops": { "type": "integer", "description": "Expansion depth, 1 to 4." },
                "max_seeds": { "type": "integer", "description": "Matching nodes to start from, 1 to 32." }
            }),
            &["query"],
        ))
        .lenient(),
        Arc::new(GraphQuery {
            graph: graph.clone(),
            postprocessor: postprocessor.clone(),
        }),
    );
    registry.register(
        ToolDefinition::new(
            "graph_rag_focus_node",
            "Show the neighbourhood of one knowledge graph node by id.",
        )
        .with_parameters(object_schema(
            json!({
                "node_id": { "type": "string" },
                "hops": { "type": "integer", "description": "Expansion depth, 1 to 4." }
            }),
            &["node_id"],
        ))
        .lenient(),
        Arc::new(GraphFocus {
            graph: graph.clone(),
            postprocessor,
        }),
    );
}

/// Turns a retrieval into the context handed back to the model.
async fn into_context(
    query: &str,
    retrieval: Result<Retrieval, Report<GraphError>>,
    postprocessor: Option<&Arc<dyn Postprocessor>>,
) -> JsonValue {
    let retrieval = match retrieval {
        Ok(retrieval) => retrieval,
        Err(e) => {
            warn!(error = %e, "knowledge graph lookup failed");
            return json!({
                "success": true,
                "context": format!("The knowledge graph is unavailable right now ({e})."),
            });
        }
    };

    let context = match postprocessor {
        Some(postprocessor) if !retrieval.is_empty() => {
            match postprocessor.condense(query, &retrieval.context).await {
                Ok(condensed) if !condensed.trim().is_empty() => condensed,
                Ok(_) => {
                    debug!("condensation came back empty, using raw graph context");
                    retrieval.context
                }
                Err(e) => {
                    debug!(error = %e, "using raw graph context");
                    retrieval.context
                }
            }
        }
        _ => retrieval.context,
    };
    json!({ "success": true, "context": context })
}

struct GraphQuery {
    graph: KnowledgeGraph,
    postprocessor: Option<Arc<dyn Postprocessor>>,
}

#[async_trait]
impl ToolHandler for GraphQuery {
    async fn call(
        &self,
        _ctx: &mut ToolContext<'_>,
        args: JsonValue,
    ) -> Result<JsonValue, Report<ToolError>> {
        let query = arg_str(&args, "query").unwrap_or_default();
        let bounds =
            RetrievalBounds::from_requested(arg_i64(&args, "hops"), arg_i64(&args, "max_seeds"), None);
        let retrieval = self.graph.query(query, bounds).await;
        Ok(into_context(query, retrieval, self.postprocessor.as_ref()).await)
    }
}

struct GraphFocus {
    graph: KnowledgeGraph,
    postprocessor: Option<Arc<dyn Postprocessor>>,
}

#[async_trait]
impl ToolHandler for GraphFocus {
    async fn call(
        &self,
        _ctx: &mut ToolContext<'_>,
        args: JsonValue,
    ) -> Result<JsonValue, Report<ToolError>> {
        let node_id = arg_str(&args, "node_id").unwrap_or_default();
        let bounds = RetrievalBounds::from_requested(arg_i64(&args, "hops"), None, None);
        let retrieval = self.graph.focus(node_id, bounds).await;
        let query = format!("neighbourhood of node {node_id}");
        Ok(into_context(&query, retrieval, self.postprocessor.as_ref()).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PostprocessError;
    use crate::message::Message;
    use crate::postprocess::ConversationSummary;
    use crate::tools::{build_registry, testing};
    use colloquy_core::{RunId, Side};
    use colloquy_graph::{ConversationGraph, GraphNode, GraphStore, NodeType, StoredNode, Subgraph, WriteStats};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Condenser {
        reply: Option<String>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Postprocessor for Condenser {
        async fn summarize(
            &self,
            _messages: &[Message],
        ) -> Result<ConversationSummary, Report<PostprocessError>> {
            Ok(ConversationSummary::default())
        }

        async fn extract_graph(
            &self,
            _summary: &ConversationSummary,
        ) -> Result<ConversationGraph, Report<PostprocessError>> {
            Ok(ConversationGraph::default())
        }

        async fn condense(&self, _query: &str, _context: &str) -> Result<String, Report<PostprocessError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Some(reply) => Ok(reply.clone()),
                None => Err(PostprocessError::Condense {
                    reason: "down".to_string(),
                }
                .into()),
            }
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl GraphStore for BrokenStore {
        async fn write_conversation(
            &self,
            _run_id: &RunId,
            _graph: &ConversationGraph,
        ) -> Result<WriteStats, Report<GraphError>> {
            Err(GraphError::ConnectionFailed { reason: "refused".to_string() }.into())
        }

        async fn find_seeds(&self, _terms: &[String], _limit: usize) -> Result<Vec<StoredNode>, Report<GraphError>> {
            Err(GraphError::ConnectionFailed { reason: "refused".to_string() }.into())
        }

        async fn expand(
            &self,
            _seeds: &[String],
            _hops: u32,
            _max_nodes: usize,
        ) -> Result<Subgraph, Report<GraphError>> {
            Err(GraphError::ConnectionFailed { reason: "refused".to_string() }.into())
        }
    }

    async fn seeded_graph() -> KnowledgeGraph {
        let graph = KnowledgeGraph::new(Arc::new(colloquy_graph::InMemoryGraphStore::new()));
        let run_id: RunId = "20250101-120000-000".parse().expect("run id");
        let extracted = ConversationGraph {
            nodes: vec![GraphNode {
                id: "n1".to_string(),
                node_type: NodeType::Concept,
                text: "自由意志".to_string(),
                speaker: None,
            }],
            edges: Vec::new(),
        };
        graph.write_conversation(&run_id, &extracted).await.expect("write");
        graph
    }

    #[tokio::test]
    async fn query_finds_written_node() {
        let mut fixture = testing::fixture();
        fixture.services.graph = seeded_graph().await;
        let registry = build_registry(&fixture.services);
        let mut state = testing::state();
        let mut ctx = ToolContext {
            side: Side::OpenAi,
            state: &mut state,
        };

        let result = registry
            .dispatch(&mut ctx, "graph_rag_query", json!({ "query": "自由意志" }))
            .await
            .expect("query");
        assert_eq!(result["success"], true);
        let context = result["context"].as_str().expect("context");
        assert!(context.contains("20250101-120000-000:n1"));
        assert!(context.contains("自由意志"));

        let focus = registry
            .dispatch(
                &mut ctx,
                "graph_rag_focus_node",
                json!({ "node_id": "20250101-120000-000:n1", "hops": 9 }),
            )
            .await
            .expect("focus");
        assert!(focus["context"].as_str().expect("context").contains("自由意志"));
    }

    #[tokio::test]
    async fn punctuation_only_query_skips_store_and_condenser() {
        let condenser = Arc::new(Condenser {
            reply: Some("condensed".to_string()),
            calls: AtomicUsize::new(0),
        });
        let mut fixture = testing::fixture();
        fixture.services.graph = KnowledgeGraph::new(Arc::new(BrokenStore));
        let services = fixture.services.with_postprocessor(condenser.clone());
        let registry = build_registry(&services);
        let mut state = testing::state();
        let mut ctx = ToolContext {
            side: Side::Anthropic,
            state: &mut state,
        };

        let result = registry
            .dispatch(&mut ctx, "graph_rag_query", json!({ "query": "a ? !" }))
            .await
            .expect("query");
        assert_eq!(result["context"], colloquy_graph::NO_SEARCH_TERMS);
        assert_eq!(condenser.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn store_errors_degrade_to_text() {
        let mut fixture = testing::fixture();
        fixture.services.graph = KnowledgeGraph::new(Arc::new(BrokenStore));
        let registry = build_registry(&fixture.services);
        let mut state = testing::state();
        let mut ctx = ToolContext {
            side: Side::OpenAi,
            state: &mut state,
        };
        let result = registry
            .dispatch(&mut ctx, "graph_rag_query", json!({ "query": "free will" }))
            .await
            .expect("query");
        assert_eq!(result["success"], true);
        assert!(result["context"].as_str().expect("context").contains("unavailable"));
    }

    #[tokio::test]
    async fn condensation_is_used_and_falls_back() {
        for (reply, expect_condensed) in [
            (Some("condensed".to_string()), true),
            (None, false),
            (Some(String::new()), false),
            (Some("  \n".to_string()), false),
        ] {
            let condenser = Arc::new(Condenser {
                reply,
                calls: AtomicUsize::new(0),
            });
            let mut fixture = testing::fixture();
            fixture.services.graph = seeded_graph().await;
            let services = fixture.services.with_postprocessor(condenser.clone());
            let registry = build_registry(&services);
            let mut state = testing::state();
            let mut ctx = ToolContext {
                side: Side::OpenAi,
                state: &mut state,
            };

            let result = registry
                .dispatch(&mut ctx, "graph_rag_query", json!({ "query": "自由意志" }))
                .await
                .expect("query");
            let context = result["context"].as_str().expect("context");
            assert_eq!(context == "condensed", expect_condensed);
            if !expect_condensed {
                assert!(context.contains("自由意志"));
            }
            assert_eq!(condenser.calls.load(Ordering::SeqCst), 1);
        }
    }
}
