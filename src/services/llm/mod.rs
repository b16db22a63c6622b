//! LLM gateway module.
//!
//! All model access flows through [`LlmGateway`]: scenarios (one per
//! pipeline stage) render themselves to prompts, the gateway handles JSON
//! mode, retries, repair, budgets and token/cost accounting. Nothing outside
//! this module ever sees raw model output.

mod gateway;
mod models;
mod transport;

pub mod scenarios;

pub use gateway::{LlmGateway, LlmScenario};
pub use models::{LlmError, Pricing, TokenUsage};
pub use transport::{ChatCall, ChatOutcome, HttpLlmTransport, LlmTransport};
