//! AI primitives for colloquy.
//!
//! This crate provides thin, typed clients for the vendor APIs the dialog
//! talks to, plus the primitives built on top of them:
//!
//! - **OpenAI Responses**: the tool-calling API used by one side and by
//!   postprocessing
//! - **Anthropic Messages**: the tool-calling API used by the other side
//! - **Gemini**: single-shot consultation
//! - **LLM Call**: single-shot inference with structured output
//! - **Prompt templates** and a **token estimator** for size backpressure

pub mod anthropic;
pub mod backend;
pub mod error;
pub mod estimate;
pub mod gemini;
pub mod llm_call;
pub mod openai;
pub mod prompt;

pub use anthropic::{AnthropicClient, ContentBlock, MessagesApi, MessagesRequest, MessagesResponse};
pub use backend::{LlmBackendConfig, LlmProvider, MessageRole, TokenUsage};
pub use error::{LlmError, PromptError};
pub use estimate::{HeuristicEstimator, TokenEstimator};
pub use gemini::{GeminiClient, SingleShotApi};
pub use llm_call::{LlmCall, LlmCallConfig, LlmCallResult};
pub use openai::{FunctionCall, OpenAiClient, OutputItem, ResponsesApi, ResponsesRequest, ResponsesResponse};
pub use prompt::{PromptTemplate, VariableDefinition};
