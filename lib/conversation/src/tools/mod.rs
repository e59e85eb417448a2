//! The dialog's tool catalog.
//!
//! Handlers are grouped by concern:
//!
//! - **memory**: personal notes, instruction negotiation, developer notes
//! - **graph**: retrieval over the knowledge graph
//! - **consult**: asking a third model
//! - **inspect**: source code and past conversation logs
//! - **control**: ending, pausing and aborting the run

pub mod consult;
pub mod control;
pub mod graph;
pub mod inspect;
pub mod memory;

use crate::postprocess::Postprocessor;
use crate::store::ParticipantStore;
use crate::tool::ToolRegistry;
use colloquy_ai::SingleShotApi;
use colloquy_graph::KnowledgeGraph;
use serde_json::{Value as JsonValue, json};
use std::path::PathBuf;
use std::sync::Arc;

/// Default upper bound of the `sleep` tool, in seconds.
pub const DEFAULT_MAX_SLEEP_SECS: u64 = 60;

/// Default budget of `get_main_source_codes`, in bytes of file content.
pub const DEFAULT_MAX_SOURCE_BYTES: usize = 200_000;

/// Everything the handlers reach outside the run state.
#[derive(Clone)]
pub struct ToolServices {
    /// Participant records.
    pub store: ParticipantStore,
    /// The knowledge graph.
    pub graph: KnowledgeGraph,
    /// Condenses retrieval context when present.
    pub postprocessor: Option<Arc<dyn Postprocessor>>,
    /// Third model for `ask_gemini`.
    pub gemini: Option<Arc<dyn SingleShotApi>>,
    /// Where conversation logs live.
    pub log_dir: PathBuf,
    /// Root of the source tree shown by `get_main_source_codes`.
    pub source_dir: PathBuf,
    /// Upper bound of `sleep`.
    pub max_sleep_secs: u64,
    /// Budget of `get_main_source_codes`.
    pub max_source_bytes: usize,
}

impl ToolServices {
    /// Creates services without optional collaborators.
    #[must_use]
    pub fn new(
        store: ParticipantStore,
        graph: KnowledgeGraph,
        log_dir: impl Into<PathBuf>,
        source_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            graph,
            postprocessor: None,
            gemini: None,
            log_dir: log_dir.into(),
            source_dir: source_dir.into(),
            max_sleep_secs: DEFAULT_MAX_SLEEP_SECS,
            max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
        }
    }

    /// Condenses retrieval context through `postprocessor`.
    #[must_use]
    pub fn with_postprocessor(mut self, postprocessor: Arc<dyn Postprocessor>) -> Self {
        self.postprocessor = Some(postprocessor);
        self
    }

    /// Enables `ask_gemini`.
    #[must_use]
    pub fn with_gemini(mut self, gemini: Arc<dyn SingleShotApi>) -> Self {
        self.gemini = Some(gemini);
        self
    }

    /// Sets the upper bound of `sleep`.
    #[must_use]
    pub fn with_max_sleep_secs(mut self, max_sleep_secs: u64) -> Self {
        self.max_sleep_secs = max_sleep_secs;
        self
    }

    /// Sets the budget of `get_main_source_codes`.
    #[must_use]
    pub fn with_max_source_bytes(mut self, max_source_bytes: usize) -> Self {
        self.max_source_bytes = max_source_bytes;
        self
    }
}

/// Builds the full catalog.
#[must_use]
pub fn build_registry(services: &ToolServices) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    control::register_terminate(&mut registry);
    memory::register(&mut registry, &services.store);
    graph::register(&mut registry, &services.graph, services.postprocessor.clone());
    consult::register(&mut registry, services.gemini.clone());
    inspect::register(&mut registry, services);
    control::register(&mut registry, services.max_sleep_secs);
    registry
}

/// An object schema over the given properties.
pub(crate) fn object_schema(properties: JsonValue, required: &[&str]) -> JsonValue {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::state::RunState;
    use colloquy_core::{RunId, Side};
    use colloquy_graph::InMemoryGraphStore;

    pub(crate) struct Fixture {
        pub dir: tempfile::TempDir,
        pub services: ToolServices,
    }

    pub(crate) fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let services = ToolServices::new(
            ParticipantStore::new(dir.path().join("data")),
            KnowledgeGraph::new(Arc::new(InMemoryGraphStore::new())),
            dir.path().join("logs"),
            dir.path().join("src"),
        );
        Fixture { dir, services }
    }

    pub(crate) fn state() -> RunState {
        RunState::new(RunId::generate(), Side::OpenAi)
    }
}
