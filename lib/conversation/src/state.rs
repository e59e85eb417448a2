//! Run state.
//!
//! Everything a run mutates besides the history lives in one [`RunState`].
//! The dialog owns it and lends it by `&mut` to the executor whose turn it
//! is, which lends it on to tool handlers. There is only ever one borrower,
//! so none of it is behind a lock.

use colloquy_ai::TokenUsage;
use colloquy_core::{PerSide, RunId, Side};

/// Mutable state of one conversation run.
#[derive(Debug, Clone)]
pub struct RunState {
    /// The run.
    pub run_id: RunId,
    /// Who spoke first.
    pub starting_side: Side,
    /// Last estimated context size per side.
    pub approx_tokens: PerSide<u64>,
    /// Tokens billed per vendor.
    pub api_usage: PerSide<TokenUsage>,
    /// Turns replaced by the placeholder, per side.
    pub failures: PerSide<u32>,
    /// Soft termination requested because a context grew too large.
    pub hush: bool,
    /// Hard termination requested by a participant.
    pub termination_accepted: bool,
    /// The run was aborted; nothing else may happen.
    pub aborted: bool,
    /// Turns completed since `hush` was raised.
    pub finish_turn_count: u32,
    /// The system prompt each side saw on its latest turn.
    pub system_prompts: PerSide<String>,
}

impl RunState {
    /// Creates the state of a fresh run.
    #[must_use]
    pub fn new(run_id: RunId, starting_side: Side) -> Self {
        Self {
            run_id,
            starting_side,
            approx_tokens: PerSide::default(),
            api_usage: PerSide::default(),
            failures: PerSide::default(),
            hush: false,
            termination_accepted: false,
            aborted: false,
            finish_turn_count: 0,
            system_prompts: PerSide::default(),
        }
    }

    /// Returns true when no further turn may run.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.aborted || self.termination_accepted || self.finish_turn_count >= 2
    }

    /// Records a completed turn against the hush budget.
    pub fn count_finished_turn(&mut self) {
        if self.hush {
            self.finish_turn_count += 1;
        }
    }

    /// Adds vendor-reported usage for a side.
    pub fn add_usage(&mut self, side: Side, usage: TokenUsage) {
        self.api_usage[side].add(usage);
    }
}
