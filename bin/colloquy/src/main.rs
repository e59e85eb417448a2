mod config;
mod error;

use colloquy_ai::{
    AnthropicClient, GeminiClient, LlmBackendConfig, MessagesApi, OpenAiClient, ResponsesApi,
};
use colloquy_conversation::{
    AnthropicExecutor, Dialog, DialogConfig, DialogOutcome, HtmlRenderer, OpenAiExecutor,
    OpenAiPostprocessor, ParticipantStore, SystemPrompts, ToolServices, TurnSettings,
    build_registry,
};
use crate::config::{AppConfig, ParticipantConfig};
use crate::error::StartupError;
use colloquy_graph::{
    GraphStore, InMemoryGraphStore, KnowledgeGraph, Neo4jGraphStore, Neo4jHttpSession,
};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn turn_settings(participant: &ParticipantConfig, max_tool_rounds: u32) -> TurnSettings {
    let settings = TurnSettings::new(participant.token_ceiling, participant.max_output_tokens)
        .with_max_tool_rounds(max_tool_rounds);
    match participant.temperature {
        Some(temperature) => settings.with_temperature(temperature),
        None => settings,
    }
}

fn backend(base: LlmBackendConfig, participant: &ParticipantConfig) -> LlmBackendConfig {
    match &participant.base_url {
        Some(url) => base.with_base_url(url),
        None => base,
    }
}

fn client_error(name: &'static str, error: impl std::fmt::Display) -> StartupError {
    StartupError::Client {
        name,
        reason: error.to_string(),
    }
}

async fn run() -> colloquy_core::Result<(), StartupError> {
    let config = AppConfig::load().map_err(|e| StartupError::Config {
        reason: e.to_string(),
    })?;
    tracing::info!("Loaded configuration");
    let timeout = config.request_timeout();

    let openai_api: Arc<dyn ResponsesApi> = Arc::new(
        OpenAiClient::new(
            backend(
                LlmBackendConfig::openai(&config.openai.api_key, &config.openai.model),
                &config.openai,
            ),
            timeout,
        )
        .map_err(|e| client_error("openai", e))?,
    );
    let anthropic_api: Arc<dyn MessagesApi> = Arc::new(
        AnthropicClient::new(
            backend(
                LlmBackendConfig::anthropic(&config.anthropic.api_key, &config.anthropic.model),
                &config.anthropic,
            ),
            timeout,
        )
        .map_err(|e| client_error("anthropic", e))?,
    );
    let postprocess_api: Arc<dyn ResponsesApi> = Arc::new(
        OpenAiClient::new(
            backend(
                LlmBackendConfig::openai(&config.openai.api_key, &config.postprocess_model),
                &config.openai,
            ),
            timeout,
        )
        .map_err(|e| client_error("postprocessing", e))?,
    );

    let store: Arc<dyn GraphStore> = match &config.neo4j {
        Some(neo4j) => {
            let session = Neo4jHttpSession::new(neo4j.clone(), timeout)
                .map_err(|e| client_error("neo4j", e))?;
            tracing::info!(url = %neo4j.url, "Using Neo4j knowledge graph");
            Arc::new(Neo4jGraphStore::new(Arc::new(session)))
        }
        None => {
            tracing::warn!("Neo4j is not configured, keeping the knowledge graph in memory");
            Arc::new(InMemoryGraphStore::new())
        }
    };
    let graph = KnowledgeGraph::new(store);

    let postprocessor = Arc::new(OpenAiPostprocessor::new(
        postprocess_api,
        config.openai.max_output_tokens,
    ));
    let participants = ParticipantStore::new(&config.paths.data_dir);
    let mut services = ToolServices::new(
        participants.clone(),
        graph.clone(),
        &config.paths.log_dir,
        &config.paths.source_dir,
    )
    .with_postprocessor(postprocessor.clone())
    .with_max_sleep_secs(config.dialog.max_sleep_secs);
    if let Some(gemini) = &config.gemini {
        let backend = LlmBackendConfig::gemini(&gemini.api_key, &gemini.model);
        let client = GeminiClient::new(backend, timeout).map_err(|e| client_error("gemini", e))?;
        services = services.with_gemini(Arc::new(client));
    }
    let tools = Arc::new(build_registry(&services));
    let prompts = SystemPrompts::new(participants);

    let openai = Arc::new(OpenAiExecutor::new(
        openai_api,
        tools.clone(),
        prompts.clone(),
        turn_settings(&config.openai, config.dialog.max_tool_rounds),
    ));
    let mut anthropic = AnthropicExecutor::new(
        anthropic_api,
        tools,
        prompts,
        turn_settings(&config.anthropic, config.dialog.max_tool_rounds),
    );
    if let Some(budget) = config.anthropic.thinking_budget {
        anthropic = anthropic.with_thinking(budget);
    }

    let mut dialog = Dialog::new(
        openai,
        Arc::new(anthropic),
        postprocessor,
        graph,
        &config.paths.log_dir,
        DialogConfig {
            starting_side: config.dialog.starting_side,
            pacing: Duration::from_secs(config.dialog.pacing_secs),
        },
    )
    .map_err(|e| StartupError::Dialog {
        reason: e.to_string(),
    })?
    .with_renderer(Arc::new(HtmlRenderer));

    let outcome = dialog.run().await.map_err(|e| StartupError::Dialog {
        reason: e.to_string(),
    })?;
    match outcome {
        DialogOutcome::Finished { run_id, reason } => tracing::info!(
            %run_id,
            reason = reason.as_str(),
            log = %dialog.log_path().display(),
            transcript = %dialog.transcript_path().display(),
            "Conversation finished"
        ),
        DialogOutcome::Aborted { run_id } => tracing::warn!(
            %run_id,
            log = %dialog.log_path().display(),
            "Conversation aborted"
        ),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "colloquy failed");
            ExitCode::FAILURE
        }
    }
}
