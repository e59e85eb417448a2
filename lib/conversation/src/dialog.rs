//! Dialog orchestrator.
//!
//! A dialog moves `NotStarted -> Running -> Finishing -> Done`, or into
//! `Aborted` from anywhere a tool can run. The two sides take turns in a
//! fixed order, starting with a randomly chosen side whose introduction
//! seeds the history. When a side terminates the run, the other side gets
//! one closing turn. A run also ends two turns after either side's context
//! came close to its ceiling. Finishing
//! summarizes the conversation, extracts and stores its knowledge graph,
//! writes the terminal `EOF` record and renders the transcript.

use crate::error::DialogError;
use crate::executor::{TurnContext, TurnExecutor, TurnOutcome};
use crate::log::{LogWriter, names};
use crate::message::Message;
use crate::postprocess::Postprocessor;
use crate::prompt::{CLOSING_MODEL_DECISION, CLOSING_TOKEN_LIMIT, PLACEHOLDER, self_introduction};
use crate::render::TranscriptRenderer;
use crate::state::RunState;
use colloquy_core::{PerSide, RunId, Side};
use colloquy_graph::KnowledgeGraph;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Why a finished dialog ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// A participant called `terminate_dialog`.
    ModelDecision,
    /// A context came close to its ceiling.
    TokenLimit,
}

impl FinishReason {
    /// Returns the tag written to the `EOF` record.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ModelDecision => "model_decision",
            Self::TokenLimit => "token_limit",
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogOutcome {
    /// The dialog finished and was postprocessed.
    Finished {
        /// The run.
        run_id: RunId,
        /// Why it ended.
        reason: FinishReason,
    },
    /// A participant aborted the run. Nothing was postprocessed.
    Aborted {
        /// The run.
        run_id: RunId,
    },
}

/// Lifecycle of a dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogPhase {
    /// `run` has not been called.
    NotStarted,
    /// Turns are being taken.
    Running,
    /// Postprocessing is in progress.
    Finishing,
    /// Finished and sealed.
    Done,
    /// Aborted and sealed.
    Aborted,
}

/// Dialog settings.
#[derive(Debug, Clone, Default)]
pub struct DialogConfig {
    /// Forces the starting side instead of picking one at random.
    pub starting_side: Option<Side>,
    /// Pause between turns.
    pub pacing: Duration,
}

/// Picks a side from the operating system's randomness.
fn random_side() -> Result<Side, Report<DialogError>> {
    let mut byte = [0u8; 1];
    getrandom::fill(&mut byte).map_err(|e| DialogError::Randomness {
        reason: e.to_string(),
    })?;
    Ok(if byte[0] & 1 == 0 {
        Side::OpenAi
    } else {
        Side::Anthropic
    })
}

/// One conversation run.
pub struct Dialog {
    executors: PerSide<Arc<dyn TurnExecutor>>,
    postprocessor: Arc<dyn Postprocessor>,
    graph: KnowledgeGraph,
    renderer: Option<Arc<dyn TranscriptRenderer>>,
    config: DialogConfig,
    log: LogWriter,
    state: RunState,
    history: Vec<Message>,
    phase: DialogPhase,
}

impl Dialog {
    /// Creates a dialog logging under `log_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if no starting side is configured and the system
    /// has no randomness to pick one.
    pub fn new(
        openai: Arc<dyn TurnExecutor>,
        anthropic: Arc<dyn TurnExecutor>,
        postprocessor: Arc<dyn Postprocessor>,
        graph: KnowledgeGraph,
        log_dir: &Path,
        config: DialogConfig,
    ) -> Result<Self, Report<DialogError>> {
        let starting_side = match config.starting_side {
            Some(side) => side,
            None => random_side()?,
        };
        let run_id = RunId::generate();
        Ok(Self {
            executors: PerSide::new(openai, anthropic),
            postprocessor,
            graph,
            renderer: None,
            config,
            log: LogWriter::for_run(log_dir, &run_id),
            state: RunState::new(run_id, starting_side),
            history: Vec::new(),
            phase: DialogPhase::NotStarted,
        })
    }

    /// Renders the transcript when the dialog finishes.
    #[must_use]
    pub fn with_renderer(mut self, renderer: Arc<dyn TranscriptRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Returns the run id.
    #[must_use]
    pub fn run_id(&self) -> &RunId {
        &self.state.run_id
    }

    /// Returns the log path.
    #[must_use]
    pub fn log_path(&self) -> &Path {
        self.log.path()
    }

    /// Returns the transcript path.
    #[must_use]
    pub fn transcript_path(&self) -> PathBuf {
        self.log.path().with_extension("html")
    }

    /// Returns the history so far.
    #[must_use]
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Returns the run state.
    #[must_use]
    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Returns the lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> DialogPhase {
        self.phase
    }

    /// Runs the dialog to completion.
    ///
    /// # Errors
    ///
    /// Returns an error if the dialog was already run or its log cannot be
    /// started. Failures after that are absorbed into the run.
    #[instrument(skip(self), fields(run_id = %self.state.run_id))]
    pub async fn run(&mut self) -> Result<DialogOutcome, Report<DialogError>> {
        if self.phase != DialogPhase::NotStarted {
            return Err(DialogError::AlreadyStarted.into());
        }
        self.phase = DialogPhase::Running;

        let start = self.state.starting_side;
        let intro = Message::new(start, self_introduction(start));
        self.log
            .append(start.display_name(), &intro.content)
            .await
            .map_err(|e| DialogError::Log {
                reason: e.to_string(),
            })?;
        self.history.push(intro);
        info!(starting_side = %start, log = %self.log.path().display(), "dialog started");

        let order = [start, start.other()];
        let mut round: u64 = 0;
        let mut closing_turn: Option<Side> = None;
        'rounds: loop {
            for side in order {
                if round == 0 && side == start {
                    continue;
                }
                let Some(message) = self.take_turn(side).await else {
                    return Ok(self.abort());
                };
                self.log.record(side.display_name(), &message.content).await;
                self.history.push(message);
                self.state.count_finished_turn();

                if closing_turn == Some(side) {
                    break 'rounds;
                }
                if self.state.termination_accepted {
                    // The other side gets one closing turn without tools.
                    closing_turn = Some(side.other());
                    continue;
                }
                if self.state.should_stop() {
                    break 'rounds;
                }
                if !self.config.pacing.is_zero() {
                    tokio::time::sleep(self.config.pacing).await;
                    if self.state.aborted {
                        return Ok(self.abort());
                    }
                }
            }
            round += 1;
        }

        if self.state.aborted {
            return Ok(self.abort());
        }
        let run_id = self.state.run_id.clone();
        let reason = self.finish().await.unwrap_or(FinishReason::TokenLimit);
        Ok(DialogOutcome::Finished { run_id, reason })
    }

    /// Runs one side's turn. `None` means the run was aborted.
    async fn take_turn(&mut self, side: Side) -> Option<Message> {
        if self.state.aborted {
            return None;
        }
        let executor = Arc::clone(&self.executors[side]);
        let mut ctx = TurnContext {
            state: &mut self.state,
            log: &self.log,
        };
        let message = match executor.produce_next_message(&self.history, &mut ctx).await {
            Ok(TurnOutcome::Spoke(message)) => message,
            Ok(TurnOutcome::Aborted) => return None,
            Err(e) => {
                warn!(%side, error = %e, "turn failed, using placeholder");
                self.state.failures[side] += 1;
                Message::new(side, PLACEHOLDER)
            }
        };
        if self.state.aborted {
            return None;
        }
        Some(message)
    }

    fn abort(&mut self) -> DialogOutcome {
        self.log.seal();
        self.phase = DialogPhase::Aborted;
        warn!(run_id = %self.state.run_id, "dialog aborted");
        DialogOutcome::Aborted {
            run_id: self.state.run_id.clone(),
        }
    }

    /// Finishes a running dialog. Only the first call does anything.
    pub async fn finish(&mut self) -> Option<FinishReason> {
        if self.phase != DialogPhase::Running {
            return None;
        }
        self.phase = DialogPhase::Finishing;

        let reason = if self.state.termination_accepted {
            FinishReason::ModelDecision
        } else {
            FinishReason::TokenLimit
        };
        let closing = match reason {
            FinishReason::ModelDecision => CLOSING_MODEL_DECISION,
            FinishReason::TokenLimit => CLOSING_TOKEN_LIMIT,
        };
        self.log.record(names::MODERATOR, closing).await;

        self.postprocess().await;

        let eof = json!({
            "reason": reason.as_str(),
            "approx_tokens": self.state.approx_tokens,
            "api_usage": self.state.api_usage,
            "failures": self.state.failures,
            "starting_side": self.state.starting_side,
            "system_prompt": self.state.system_prompts,
            "messages": self.history.len(),
        });
        self.log.record_json(names::EOF, &eof).await;

        if let Some(renderer) = &self.renderer {
            let output = self.transcript_path();
            if let Err(e) = renderer.render(self.log.path(), &output).await {
                warn!(error = %e, "failed to render transcript");
            }
        }
        self.log.seal();
        self.phase = DialogPhase::Done;
        info!(run_id = %self.state.run_id, reason = reason.as_str(), "dialog finished");
        Some(reason)
    }

    async fn postprocess(&self) {
        let summary = match self.postprocessor.summarize(&self.history).await {
            Ok(summary) => summary,
            Err(e) => return self.postprocess_failed(&e.to_string()).await,
        };
        match serde_json::to_value(&summary) {
            Ok(value) => self.log.record_json(names::POSTPROC_SUMMARY, &value).await,
            Err(e) => return self.postprocess_failed(&e.to_string()).await,
        }

        let graph = match self.postprocessor.extract_graph(&summary).await {
            Ok(graph) => graph,
            Err(e) => return self.postprocess_failed(&e.to_string()).await,
        };
        match serde_json::to_value(&graph) {
            Ok(value) => self.log.record_json(names::POSTPROC_GRAPH, &value).await,
            Err(e) => return self.postprocess_failed(&e.to_string()).await,
        }

        match self.graph.write_conversation(&self.state.run_id, &graph).await {
            Ok(stats) => self.log.record_json(names::POSTPROC_NEO4J, &json!(stats)).await,
            Err(e) => self.postprocess_failed(&e.to_string()).await,
        }
    }

    async fn postprocess_failed(&self, error: &str) {
        warn!(error, "postprocessing failed");
        self.log.record(names::POSTPROC_ERROR, error).await;
    }
}
